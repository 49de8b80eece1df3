//! Per-client sliding-window rate limiting, keyed by peer IP and route.
//!
//! Paths with their own rule get a separate window per client; every other
//! path shares the default window.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::response::ApiError;
use crate::state::AppState;

const IDLE_CLIENT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Window {
    period: Duration,
    max_requests: usize,
}

/// `None` is the default window; `Some(i)` is the i-th path rule.
type Bucket = Option<usize>;

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    default: Window,
    paths: Vec<(String, Window)>,
    clients: DashMap<(IpAddr, Bucket), Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            default: Window {
                period: cfg.period(),
                max_requests: cfg.max_requests as usize,
            },
            paths: cfg
                .paths
                .iter()
                .map(|rule| {
                    let window = Window {
                        period: rule.period(),
                        max_requests: rule.max_requests as usize,
                    };
                    (rule.path.clone(), window)
                })
                .collect(),
            clients: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    fn window_for(&self, path: &str) -> (Bucket, Window) {
        self.paths
            .iter()
            .position(|(p, _)| p == path)
            .map_or((None, self.default), |i| (Some(i), self.paths[i].1))
    }

    /// Record a request from `ip` for `path` at `now`; false if it is over the limit.
    pub fn check(&self, ip: IpAddr, path: &str, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        let (bucket, window) = self.window_for(path);
        let mut hits = self.clients.entry((ip, bucket)).or_default();
        hits.retain(|&t| now.saturating_duration_since(t) < window.period);
        if hits.len() >= window.max_requests {
            return false;
        }
        hits.push(now);
        true
    }

    /// Forget clients not seen for a while.
    pub fn prune(&self, now: Instant) {
        self.clients.retain(|_, hits| {
            hits.last()
                .is_some_and(|t| now.saturating_duration_since(*t) < IDLE_CLIENT_TTL)
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

pub fn spawn_cleanup(limiter: Arc<RateLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            limiter.prune(Instant::now());
        }
    })
}

/// Requests without a known peer address (in-process tests) pass through.
pub async fn limit_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    if let Some(ip) = peer {
        let path = req.uri().path();
        if !state.rate_limiter.check(ip, path, Instant::now()) {
            debug!("{ip} hit rate limit on {path}");
            return ApiError::TooManyRequests.into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathRule;
    use std::net::Ipv4Addr;

    fn limiter(max: u32, paths: Vec<PathRule>) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            period_ms: 1_000,
            max_requests: max,
            paths,
        })
    }

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn limits_within_window_then_recovers() {
        let l = limiter(2, Vec::new());
        let t0 = Instant::now();
        assert!(l.check(A, "/snapshot", t0));
        assert!(l.check(A, "/snapshot", t0));
        assert!(!l.check(A, "/snapshot", t0 + Duration::from_millis(500)));
        // other clients are unaffected
        assert!(l.check(B, "/snapshot", t0));
        assert!(l.check(A, "/snapshot", t0 + Duration::from_millis(1_001)));
    }

    #[test]
    fn unlisted_paths_share_the_default_window() {
        let l = limiter(2, Vec::new());
        let t0 = Instant::now();
        assert!(l.check(A, "/snapshot", t0));
        assert!(l.check(A, "/v1/monitor/cpu", t0));
        assert!(!l.check(A, "/v1/monitor/memory", t0));
    }

    #[test]
    fn path_rules_have_their_own_window() {
        let l = limiter(
            1,
            vec![PathRule {
                path: "/v1/system/information".into(),
                period_ms: 3_000,
                max_requests: 3,
            }],
        );
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(l.check(A, "/v1/system/information", t0));
        }
        assert!(!l.check(A, "/v1/system/information", t0 + Duration::from_millis(2_000)));
        // the default window is untouched by the ruled path
        assert!(l.check(A, "/snapshot", t0));
        assert!(!l.check(A, "/snapshot", t0));
        // and the longer period applies to the ruled path
        assert!(l.check(A, "/v1/system/information", t0 + Duration::from_millis(3_001)));
    }

    #[test]
    fn default_config_carries_root_and_system_rules() {
        let l = RateLimiter::new(&RateLimitConfig::default());
        let t0 = Instant::now();
        assert_eq!((0..10).filter(|_| l.check(A, "/", t0)).count(), 5);
        assert_eq!(
            (0..20).filter(|_| l.check(A, "/v1/system/information", t0)).count(),
            15
        );
        assert_eq!((0..30).filter(|_| l.check(A, "/snapshot", t0)).count(), 20);
    }

    #[test]
    fn disabled_never_limits() {
        let l = RateLimiter::disabled();
        let t0 = Instant::now();
        assert!((0..100).all(|_| l.check(A, "/", t0)));
        assert_eq!(l.tracked_clients(), 0);
    }

    #[test]
    fn prune_drops_idle_clients() {
        let l = limiter(5, Vec::new());
        let t0 = Instant::now();
        l.check(A, "/snapshot", t0);
        l.check(B, "/snapshot", t0 + Duration::from_secs(200));
        l.prune(t0 + Duration::from_secs(301));
        assert_eq!(l.tracked_clients(), 1);
    }
}

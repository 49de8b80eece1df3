//! HTTP surface. Everything except `/` needs a credential; middleware runs
//! CORS, then rate limiting, then auth, then the handler.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use sysinfo::{Networks, System};

use crate::auth::require_token;
use crate::cors::apply_cors;
use crate::identity::MachineIdentity;
use crate::rate_limit::limit_requests;
use crate::response::{self, ApiError};
use crate::state::AppState;
use crate::types::{Metric, Snapshot};
use crate::ws::ws_handler;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/snapshot", get(snapshot))
        .route("/ws", get(ws_handler))
        .route("/v1/system/information", get(system_information))
        .route("/v1/monitor/cpu", get(monitor_cpu))
        .route("/v1/monitor/memory", get(monitor_memory))
        .route("/v1/monitor/storage", get(monitor_storage))
        .route("/v1/monitor/network", get(monitor_network))
        .route("/v1/monitor/processes", get(monitor_processes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    // layers added last run first
    Router::new()
        .route("/", get(root))
        .merge(protected)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), limit_requests))
        .layer(middleware::from_fn_with_state(state.clone(), apply_cors))
        .with_state(state)
}

async fn root() -> Response {
    response::success(serde_json::json!({
        "name": "Twig",
        "version": env!("CARGO_PKG_VERSION"),
        "repository": "https://github.com/rfshub/twig",
        "license": "AGPL-3.0",
    }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn current(state: &AppState) -> Result<Arc<Snapshot>, ApiError> {
    state.cache.note_read();
    state
        .cache
        .current()
        .ok_or_else(|| ApiError::Unavailable("no snapshot collected yet".into()))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub top: Option<usize>,
}

async fn snapshot(
    State(state): State<AppState>,
    query: Result<Query<SnapshotQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let snap = current(&state)?;
    Ok(match q.top {
        Some(top) => response::success(snap.with_top_processes(top)),
        None => response::success(&*snap),
    })
}

fn section<T: Serialize>(
    state: &AppState,
    name: &str,
    pick: impl FnOnce(&Snapshot) -> &Metric<T>,
) -> Result<Response, ApiError> {
    let snap = current(state)?;
    match pick(&snap) {
        Metric::Available(v) => Ok(response::success(v)),
        Metric::Unavailable => Err(ApiError::Unavailable(format!("{name} data unavailable"))),
    }
}

async fn monitor_cpu(State(state): State<AppState>) -> Result<Response, ApiError> {
    section(&state, "cpu", |s| &s.cpu_usage)
}

async fn monitor_memory(State(state): State<AppState>) -> Result<Response, ApiError> {
    section(&state, "memory", |s| &s.memory_usage)
}

async fn monitor_storage(State(state): State<AppState>) -> Result<Response, ApiError> {
    section(&state, "storage", |s| &s.disk_usage)
}

async fn monitor_network(State(state): State<AppState>) -> Result<Response, ApiError> {
    section(&state, "network", |s| &s.network_interfaces)
}

async fn monitor_processes(State(state): State<AppState>) -> Result<Response, ApiError> {
    section(&state, "process", |s| &s.process_list)
}

#[derive(Debug, Serialize)]
struct SystemInformation<'a> {
    #[serde(flatten)]
    identity: &'a MachineIdentity,
    ip: IpAddresses,
    uptime: Uptime,
}

#[derive(Debug, Default, Serialize)]
struct IpAddresses {
    ipv4: Vec<String>,
    ipv6: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Uptime {
    since: String,
    duration: String,
}

async fn system_information(State(state): State<AppState>) -> Response {
    state.cache.note_read();
    let uptime_secs = System::uptime();
    let since = Utc::now() - chrono::Duration::seconds(uptime_secs.min(i64::MAX as u64) as i64);
    response::success(SystemInformation {
        identity: &state.identity,
        ip: ip_addresses(),
        uptime: Uptime {
            since: since.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration: format_uptime_short(uptime_secs),
        },
    })
}

fn ip_addresses() -> IpAddresses {
    let networks = Networks::new_with_refreshed_list();
    let mut out = IpAddresses::default();
    for (_, data) in networks.iter() {
        for net in data.ip_networks() {
            match net.addr {
                IpAddr::V4(v4) if !v4.is_loopback() => out.ipv4.push(v4.to_string()),
                IpAddr::V6(v6) if !v6.is_loopback() => out.ipv6.push(v6.to_string()),
                _ => {}
            }
        }
    }
    out.ipv4.sort();
    out.ipv6.sort();
    out
}

/// `3d 4h 5m 6s`; months are 30 days, years 365. Zero units are skipped except seconds.
pub fn format_uptime_short(secs: u64) -> String {
    const UNITS: [(u64, &str); 5] = [
        (365 * 86_400, "y"),
        (30 * 86_400, "mo"),
        (86_400, "d"),
        (3_600, "h"),
        (60, "m"),
    ];
    let mut rest = secs;
    let mut parts = Vec::new();
    for (size, suffix) in UNITS {
        let n = rest / size;
        rest %= size;
        if n > 0 {
            parts.push(format!("{n}{suffix}"));
        }
    }
    parts.push(format!("{rest}s"));
    parts.join(" ")
}

//! CORS origin allowlist. Entries are exact origins, `*.example.com`
//! wildcards (any subdomain, not the bare domain) or `*` for any origin.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: &[String]) -> Self {
        Self {
            allowed: allowed_origins
                .iter()
                .map(|o| o.trim().trim_end_matches('/').to_ascii_lowercase())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    fn allows_any(&self) -> bool {
        self.allowed.iter().any(|o| o == "*")
    }

    /// Matches against the origin's host, ignoring scheme and port for wildcards.
    pub fn allows(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/').to_ascii_lowercase();
        let host = origin_host(&origin);
        self.allowed.iter().any(|allowed| {
            if allowed == "*" {
                true
            } else if let Some(base) = allowed.strip_prefix("*.") {
                host.len() > base.len()
                    && host.ends_with(base)
                    && host[..host.len() - base.len()].ends_with('.')
            } else {
                *allowed == origin || *allowed == host
            }
        })
    }

    fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        match origin {
            Some(origin) if self.allows(origin) => {
                if let Ok(v) = HeaderValue::from_str(origin) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, v);
                    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                }
            }
            None if self.allows_any() => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
            _ => return,
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Origin, Content-Type, Accept, Authorization"),
        );
    }
}

fn origin_host(origin: &str) -> &str {
    let rest = origin.split_once("://").map_or(origin, |(_, r)| r);
    // strip port, leaving bracketed IPv6 intact
    match rest.rfind(':') {
        Some(i) if !rest[i..].contains(']') => &rest[..i],
        _ => rest,
    }
}

pub async fn apply_cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        state.cors.apply(resp.headers_mut(), origin.as_deref());
        return resp;
    }

    let mut resp = next.run(req).await;
    state.cors.apply(resp.headers_mut(), origin.as_deref());
    resp
}

//! Credential checks for everything except the public routes.
//!
//! Clients present the shared secret as `Authorization: Bearer <token>` or,
//! for WebSocket upgrades from browsers, as `?token=<token>`.

use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use rand::RngCore;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{config_dir, AuthConfig, AuthScheme};
use crate::error::AuthError;
use crate::response::ApiError;
use crate::state::AppState;

const ROTATING_CONTEXT: &str = "twig 2025-06 rotating token v1";
const SECRET_BYTES: usize = 32;

#[derive(Clone)]
pub struct AuthGuard {
    secret: String,
    scheme: AuthScheme,
    window_secs: u64,
}

impl std::fmt::Debug for AuthGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGuard")
            .field("scheme", &self.scheme)
            .field("window_secs", &self.window_secs)
            .finish_non_exhaustive()
    }
}

impl AuthGuard {
    pub fn new(secret: impl Into<String>, scheme: AuthScheme, window_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            scheme,
            window_secs: window_secs.max(1),
        }
    }

    /// Resolve the secret from config, then the token file, generating one if absent.
    pub fn from_config(cfg: &AuthConfig) -> anyhow::Result<Self> {
        let secret = match &cfg.token {
            Some(t) => t.clone(),
            None => {
                let path = cfg.token_file.clone().unwrap_or_else(default_token_path);
                load_or_create_secret(&path)?
            }
        };
        Ok(Self::new(secret, cfg.scheme, cfg.window_secs))
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn validate(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let presented = presented.map(str::trim).filter(|t| !t.is_empty());
        let Some(presented) = presented else {
            return Err(AuthError::Missing);
        };
        let ok = match self.scheme {
            AuthScheme::Static => ct_eq(presented, &self.secret),
            AuthScheme::Rotating => {
                let window = Utc::now().timestamp().max(0) as u64 / self.window_secs;
                // previous window too, so codes don't expire mid-request
                [window.saturating_sub(1), window]
                    .iter()
                    .any(|w| ct_eq(presented, &self.code_for_window(*w)))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }

    /// Six-digit code for one rotation window.
    pub fn code_for_window(&self, window: u64) -> String {
        let key = blake3::derive_key(ROTATING_CONTEXT, self.secret.as_bytes());
        let hash = blake3::keyed_hash(&key, &window.to_be_bytes());
        let b = hash.as_bytes();
        let n = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) % 1_000_000;
        format!("{n:06}")
    }

    /// Code for the window containing now; what `--print-code` shows.
    pub fn current_code(&self) -> String {
        let window = Utc::now().timestamp().max(0) as u64 / self.window_secs;
        self.code_for_window(window)
    }
}

// blake3::Hash equality is constant time
fn ct_eq(a: &str, b: &str) -> bool {
    blake3::hash(a.as_bytes()) == blake3::hash(b.as_bytes())
}

fn load_or_create_secret(path: &Path) -> anyhow::Result<String> {
    use anyhow::Context;
    if let Ok(existing) = fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            info!("using access token from {}", path.display());
            return Ok(existing.to_string());
        }
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating token directory {}", dir.display()))?;
    }
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);
    write_private(path, &secret).with_context(|| format!("writing token file {}", path.display()))?;
    info!("generated access token at {}", path.display());
    Ok(secret)
}

/// Create or truncate `path` readable by the owner only.
#[cfg(unix)]
pub(crate) fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
pub(crate) fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(contents.as_bytes())
}

/// Bearer header first, then the percent-decoded `token` query parameter.
pub fn presented_token(req: &Request) -> Option<String> {
    let header_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.to_string());
    header_token.or_else(|| {
        Query::<HashMap<String, String>>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(mut q)| q.remove("token"))
    })
}

pub async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match state.auth.validate(presented_token(&req).as_deref()) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            debug!("rejected {} {}: {e}", req.method(), req.uri().path());
            ApiError::Unauthorized(e).into_response()
        }
    }
}

pub fn default_token_path() -> PathBuf {
    config_dir().join("token")
}

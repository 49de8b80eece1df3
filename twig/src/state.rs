//! Shared gateway state handed to every handler and middleware.

use std::sync::Arc;

use crate::auth::AuthGuard;
use crate::cache::SnapshotCache;
use crate::cors::CorsPolicy;
use crate::identity::MachineIdentity;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    // Latest snapshot plus subscriber registry
    pub cache: Arc<SnapshotCache>,

    pub identity: Arc<MachineIdentity>,
    pub auth: Arc<AuthGuard>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cors: Arc<CorsPolicy>,
}

impl AppState {
    pub fn new(
        cache: Arc<SnapshotCache>,
        identity: Arc<MachineIdentity>,
        auth: AuthGuard,
        rate_limiter: RateLimiter,
        cors: CorsPolicy,
    ) -> Self {
        Self {
            cache,
            identity,
            auth: Arc::new(auth),
            rate_limiter: Arc::new(rate_limiter),
            cors: Arc::new(cors),
        }
    }
}

//! twig: host telemetry daemon. A background collector publishes snapshots
//! into a shared cache; the gateway serves them over HTTP and WebSocket.

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod cors;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod probe;
pub mod rate_limit;
pub mod response;
pub mod router;
pub mod sampler;
pub mod state;
pub mod tls;
pub mod types;
pub mod ws;

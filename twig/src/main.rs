//! twig binary: load config, load the token, derive identity, start the sampler, serve.

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use twig::auth::AuthGuard;
use twig::cache::SnapshotCache;
use twig::cli::Cli;
use twig::config::{AuthScheme, Config};
use twig::cors::CorsPolicy;
use twig::identity::{IdentitySource, MachineIdentity};
use twig::metrics::Collector;
use twig::probe::SystemProbe;
use twig::rate_limit::{spawn_cleanup, RateLimiter};
use twig::router::build_router;
use twig::sampler::spawn_sampler;
use twig::state::AppState;
use twig::tls;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    init_tracing(&config.log_level);

    let auth = AuthGuard::from_config(&config.auth).context("failed to load access token")?;
    if cli.print_code {
        if auth.scheme() != AuthScheme::Rotating {
            anyhow::bail!("--print-code needs auth.scheme = \"rotating\"");
        }
        println!("{}", auth.current_code());
        return Ok(());
    }
    if auth.scheme() == AuthScheme::Rotating {
        info!(
            "rotating access codes, {}s window",
            config.auth.window_secs
        );
    }

    // Must succeed before anything listens.
    let identity = MachineIdentity::derive(&IdentitySource::from_config(&config.identity))
        .context("failed to derive machine identity")?;
    let identity = Arc::new(identity);
    info!(
        "machine {} ({}, {} {})",
        identity.id, identity.hostname, identity.os, identity.arch
    );

    let cache = Arc::new(
        SnapshotCache::new(config.stream.buffer).with_idle_after(config.collector.idle_after()),
    );
    let collector = Collector::new(
        Box::new(SystemProbe::new()),
        Arc::clone(&identity),
        config.collector.top_processes,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sampler = spawn_sampler(
        Arc::new(Mutex::new(collector)),
        Arc::clone(&cache),
        config.collector.clone(),
        shutdown_rx,
    );

    let state = AppState::new(
        cache,
        identity,
        auth,
        RateLimiter::new(&config.rate_limit),
        CorsPolicy::new(&config.cors.allowed_origins),
    );
    let cleanup = spawn_cleanup(Arc::clone(&state.rate_limiter));
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    if config.tls.enabled {
        let (cert, key) = tls::resolve_cert(&config.tls)?;
        let rustls = RustlsConfig::from_pem_file(&cert, &key)
            .await
            .with_context(|| format!("loading TLS certificate {}", cert.display()))?;
        let handle = axum_server::Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown_signal().await;
                handle.graceful_shutdown(Some(Duration::from_secs(5)));
            }
        });
        info!("twig listening on https://{}", config.listen);
        axum_server::bind_rustls(config.listen, rustls)
            .handle(handle)
            .serve(app)
            .await
            .with_context(|| format!("serving on {}", config.listen))?;
    } else {
        let listener = tokio::net::TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("binding {}", config.listen))?;
        info!("twig listening on http://{}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sampler.await {
        warn!("sampler task ended abnormally: {e}");
    }
    cleanup.abort();
    info!("twig stopped");
    Ok(())
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}

use anyhow::Context;
use std::{fs, path::PathBuf};
use tracing::info;

use crate::auth::write_private;
use crate::config::{config_dir, TlsConfig};
use crate::identity::local_hostname;

pub fn cert_paths() -> (PathBuf, PathBuf) {
    let dir = config_dir().join("tls");
    (dir.join("cert.pem"), dir.join("key.pem"))
}

/// Configured cert/key pair, or a self-signed one under the config dir.
pub fn resolve_cert(cfg: &TlsConfig) -> anyhow::Result<(PathBuf, PathBuf)> {
    match (&cfg.cert_path, &cfg.key_path) {
        (Some(cert), Some(key)) => Ok((cert.clone(), key.clone())),
        (None, None) => ensure_self_signed_cert(),
        _ => anyhow::bail!("tls.cert_path and tls.key_path must be set together"),
    }
}

pub fn ensure_self_signed_cert() -> anyhow::Result<(PathBuf, PathBuf)> {
    let (cert_path, key_path) = cert_paths();
    if cert_path.exists() && key_path.exists() {
        return Ok((cert_path, key_path));
    }
    if let Some(dir) = cert_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    // SANs: hostname + localhost loopbacks
    let hostname = local_hostname();
    let names = vec![
        hostname,
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];
    let certified = rcgen::generate_simple_self_signed(names)
        .context("generating self-signed certificate")?;

    fs::write(&cert_path, certified.cert.pem())
        .with_context(|| format!("writing {}", cert_path.display()))?;
    write_private(&key_path, &certified.key_pair.serialize_pem())
        .with_context(|| format!("writing {}", key_path.display()))?;

    info!(
        "generated self-signed TLS certificate at {}",
        cert_path.display()
    );
    info!("private key at {}", key_path.display());
    Ok((cert_path, key_path))
}

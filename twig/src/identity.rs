//! Stable per-host identity, derived once at startup.
//!
//! The raw OS machine id never leaves this module; clients only see a
//! keyed BLAKE3 digest of it, so the id is stable across restarts without
//! exposing the value other software may rely on.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use sysinfo::System;
use tracing::debug;

use crate::config::IdentityConfig;
use crate::error::IdentityError;

const ID_CONTEXT: &str = "twig 2025-06 machine identity v1";
const ID_HEX_LEN: usize = 32;

#[cfg(target_os = "linux")]
const DEFAULT_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Where the raw machine id comes from.
#[derive(Debug, Clone)]
pub enum IdentitySource {
    /// First readable, non-empty file wins.
    Files(Vec<PathBuf>),
    /// `IOPlatformUUID` from `ioreg`.
    #[cfg(target_os = "macos")]
    IoReg,
}

impl IdentitySource {
    pub fn from_config(cfg: &IdentityConfig) -> Self {
        if let Some(path) = &cfg.machine_id_path {
            return IdentitySource::Files(vec![path.clone()]);
        }
        Self::platform_default()
    }

    #[cfg(target_os = "linux")]
    fn platform_default() -> Self {
        IdentitySource::Files(DEFAULT_ID_PATHS.iter().map(PathBuf::from).collect())
    }

    #[cfg(target_os = "macos")]
    fn platform_default() -> Self {
        IdentitySource::IoReg
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn platform_default() -> Self {
        IdentitySource::Files(Vec::new())
    }

    pub fn read_raw(&self) -> Result<String, IdentityError> {
        match self {
            IdentitySource::Files(paths) => {
                let mut last = IdentityError::NoSource;
                for path in paths {
                    match fs::read_to_string(path) {
                        Ok(s) if !s.trim().is_empty() => return Ok(s.trim().to_string()),
                        Ok(_) => last = IdentityError::Empty(path.display().to_string()),
                        Err(source) => {
                            last = IdentityError::Io {
                                path: path.clone(),
                                source,
                            }
                        }
                    }
                    debug!("machine id source {} skipped", path.display());
                }
                Err(last)
            }
            #[cfg(target_os = "macos")]
            IdentitySource::IoReg => read_ioreg_uuid(),
        }
    }
}

#[cfg(target_os = "macos")]
fn read_ioreg_uuid() -> Result<String, IdentityError> {
    let out = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .map_err(|source| IdentityError::Io {
            path: PathBuf::from("ioreg"),
            source,
        })?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    parse_ioreg_uuid(&stdout).ok_or_else(|| IdentityError::Empty("IOPlatformUUID".into()))
}

// `"IOPlatformUUID" = "XXXXXXXX-...."`
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_ioreg_uuid(text: &str) -> Option<String> {
    let line = text.lines().find(|l| l.contains("IOPlatformUUID"))?;
    let (_, value) = line.split_once('=')?;
    let value = value.trim().trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

/// Immutable for the life of the process; shared read-only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MachineIdentity {
    pub id: String,
    pub hostname: String,
    pub os: String,
    pub kernel: String,
    pub arch: String,
}

impl MachineIdentity {
    pub fn derive(source: &IdentitySource) -> Result<Self, IdentityError> {
        let raw = source.read_raw()?;
        Ok(Self {
            id: digest_id(&raw),
            hostname: local_hostname(),
            os: System::long_os_version()
                .or_else(System::os_version)
                .unwrap_or_else(|| "unknown".into()),
            kernel: format!(
                "{} {}",
                System::name().unwrap_or_else(|| std::env::consts::OS.into()).to_lowercase(),
                System::kernel_version().unwrap_or_else(|| "unknown".into())
            ),
            arch: std::env::consts::ARCH.to_string(),
        })
    }
}

fn digest_id(raw: &str) -> String {
    let key = blake3::derive_key(ID_CONTEXT, raw.as_bytes());
    let mut id = hex::encode(key);
    id.truncate(ID_HEX_LEN);
    id
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .or_else(System::host_name)
        .unwrap_or_else(|| "unknown".into())
}

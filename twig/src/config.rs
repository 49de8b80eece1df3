//! Layered configuration: built-in defaults, then an optional TOML file, then
//! `TWIG_*` environment variables (`__` separates sections), then CLI flags.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 30721;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub listen: SocketAddr,
    pub log_level: String,
    pub collector: CollectorConfig,
    pub stream: StreamConfig,
    pub auth: AuthConfig,
    pub identity: IdentityConfig,
    pub tls: TlsConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Poll interval while anyone is reading.
    pub interval_ms: u64,
    /// Poll interval once nobody has read for `idle_after_secs`.
    pub idle_interval_ms: u64,
    pub idle_after_secs: u64,
    pub top_processes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Snapshots a subscriber may have queued before it is disconnected.
    pub buffer: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    #[default]
    Static,
    Rotating,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub scheme: AuthScheme,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IdentityConfig {
    pub machine_id_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Default window, shared by every path without its own rule.
    pub period_ms: u64,
    pub max_requests: u32,
    pub paths: Vec<PathRule>,
}

/// A separate window for one exact request path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathRule {
    pub path: String,
    pub period_ms: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            log_level: "info".to_string(),
            collector: CollectorConfig::default(),
            stream: StreamConfig::default(),
            auth: AuthConfig::default(),
            identity: IdentityConfig::default(),
            tls: TlsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            idle_interval_ms: 5_000,
            idle_after_secs: 60,
            top_processes: 20,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { buffer: 16 }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_file: None,
            scheme: AuthScheme::Static,
            window_secs: 15,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 1_000,
            max_requests: 20,
            paths: vec![
                PathRule {
                    path: "/".to_string(),
                    period_ms: 1_000,
                    max_requests: 5,
                },
                PathRule {
                    path: "/v1/system/information".to_string(),
                    period_ms: 3_000,
                    max_requests: 15,
                },
            ],
        }
    }
}

impl CollectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(self.interval_ms))
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl PathRule {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Config {
    /// Load defaults, the optional TOML file, `TWIG_*` env, then CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = Self::figment(cli.config.as_deref())
            .extract::<Config>()
            .map_err(Box::new)?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            fig = fig.merge(Toml::file(path));
        }
        // TWIG_TOKEN is read by clap; keep it out of the nested map
        fig.merge(Env::prefixed("TWIG_").ignore(&["token"]).split("__"))
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ip) = cli.bind {
            self.listen.set_ip(ip);
        }
        if let Some(port) = cli.port {
            self.listen.set_port(port);
        }
        if cli.enable_ssl {
            self.tls.enabled = true;
        }
        if let Some(token) = &cli.token {
            self.auth.token = Some(token.clone());
        }
        if let Some(path) = &cli.machine_id_path {
            self.identity.machine_id_path = Some(path.clone());
        }
        if let Some(ms) = cli.interval_ms {
            self.collector.interval_ms = ms;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.interval_ms == 0 {
            return Err(ConfigError::invalid("collector.interval_ms must be > 0"));
        }
        if self.collector.top_processes == 0 {
            return Err(ConfigError::invalid("collector.top_processes must be > 0"));
        }
        if self.stream.buffer == 0 {
            return Err(ConfigError::invalid("stream.buffer must be > 0"));
        }
        if self.auth.window_secs == 0 {
            return Err(ConfigError::invalid("auth.window_secs must be > 0"));
        }
        if self.rate_limit.enabled && (self.rate_limit.period_ms == 0 || self.rate_limit.max_requests == 0) {
            return Err(ConfigError::invalid(
                "rate_limit.period_ms and rate_limit.max_requests must be > 0",
            ));
        }
        if let Some(rule) = self
            .rate_limit
            .paths
            .iter()
            .find(|r| r.period_ms == 0 || r.max_requests == 0)
        {
            return Err(ConfigError::invalid(format!(
                "rate_limit rule for {:?} needs period_ms and max_requests > 0",
                rule.path
            )));
        }
        if let Some(token) = &self.auth.token {
            if token.trim().is_empty() {
                return Err(ConfigError::invalid("auth.token must not be empty"));
            }
        }
        Ok(())
    }
}

/// Per-user config directory, honouring `XDG_CONFIG_HOME` on every platform.
pub fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs_next::config_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twig")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("twig").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_are_valid() {
        let c = Config::default();
        c.validate().unwrap();
        assert_eq!(c.listen.port(), DEFAULT_PORT);
        assert_eq!(c.auth.scheme, AuthScheme::Static);
    }

    #[test]
    fn toml_file_then_cli_override() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "log_level = \"debug\"\n[collector]\ninterval_ms = 250\n[stream]\nbuffer = 4\n[auth]\nscheme = \"rotating\""
        )
        .unwrap();
        let path = f.path().to_str().unwrap().to_string();
        let c = Config::load(&cli(&["-c", &path, "--interval-ms", "750", "-p", "9100"])).unwrap();
        assert_eq!(c.log_level, "debug");
        assert_eq!(c.collector.interval_ms, 750);
        assert_eq!(c.stream.buffer, 4);
        assert_eq!(c.auth.scheme, AuthScheme::Rotating);
        assert_eq!(c.listen.port(), 9100);
    }

    #[test]
    fn toml_replaces_path_rate_rules() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[rate_limit]\nmax_requests = 50\n[[rate_limit.paths]]\npath = \"/snapshot\"\nperiod_ms = 2000\nmax_requests = 4"
        )
        .unwrap();
        let path = f.path().to_str().unwrap().to_string();
        let c = Config::load(&cli(&["-c", &path])).unwrap();
        assert_eq!(c.rate_limit.max_requests, 50);
        assert_eq!(
            c.rate_limit.paths,
            vec![PathRule {
                path: "/snapshot".into(),
                period_ms: 2_000,
                max_requests: 4,
            }]
        );
    }

    #[test]
    fn zero_path_rule_is_rejected() {
        let mut c = Config::default();
        c.rate_limit.paths[0].max_requests = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::load(&cli(&["--interval-ms", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn idle_interval_never_faster_than_active() {
        let c = CollectorConfig {
            interval_ms: 2_000,
            idle_interval_ms: 500,
            ..CollectorConfig::default()
        };
        assert_eq!(c.idle_interval(), Duration::from_millis(2_000));
    }
}

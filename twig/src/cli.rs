//! Command-line flags. Anything given here overrides the config file and env.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Host telemetry over authenticated HTTP and WebSocket.
#[derive(Parser, Debug, Default)]
#[command(name = "twig", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Address to bind.
    #[arg(long, value_name = "IP")]
    pub bind: Option<IpAddr>,

    /// Serve HTTPS/WSS with a self-signed certificate unless one is configured.
    #[arg(long = "enable-ssl", alias = "enableSSL")]
    pub enable_ssl: bool,

    /// Shared secret clients must present.
    #[arg(long, env = "TWIG_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Read the machine id from this file instead of the OS default.
    #[arg(long, value_name = "FILE")]
    pub machine_id_path: Option<PathBuf>,

    /// Collection interval in milliseconds.
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Default log filter (overridden by RUST_LOG).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Print the current rotating access code and exit.
    #[arg(long)]
    pub print_code: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_long_short_and_assign() {
        let p = |args: &[&str]| Cli::try_parse_from(args).unwrap().port;
        assert_eq!(p(&["twig", "--port", "9001"]), Some(9001));
        assert_eq!(p(&["twig", "-p", "9002"]), Some(9002));
        assert_eq!(p(&["twig", "--port=9003"]), Some(9003));
        assert_eq!(p(&["twig"]), None);
    }

    #[test]
    fn legacy_ssl_flag_is_accepted() {
        assert!(Cli::try_parse_from(["twig", "--enableSSL"]).unwrap().enable_ssl);
        assert!(Cli::try_parse_from(["twig", "--enable-ssl"]).unwrap().enable_ssl);
    }

    #[test]
    fn print_code_is_off_by_default() {
        assert!(!Cli::try_parse_from(["twig"]).unwrap().print_code);
        assert!(Cli::try_parse_from(["twig", "--print-code"]).unwrap().print_code);
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(Cli::try_parse_from(["twig", "-p", "70000"]).is_err());
    }
}

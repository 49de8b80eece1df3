//! CLI arg handling for the twig binary.
use assert_cmd::prelude::*;
use std::io::Write;
use std::process::Command;

fn machine_id_file() -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(f, "4c4c4544004d3510804bb4c04f333832").unwrap();
    f
}

#[test]
fn test_port_short_and_long() {
    // The daemon only needs to start; kill it right after it binds.
    let id = machine_id_file();
    let home = tempfile::tempdir().unwrap();
    for args in [["--port", "9555"], ["-p", "9556"]] {
        let mut child = Command::cargo_bin("twig")
            .expect("binary exists")
            .env("XDG_CONFIG_HOME", home.path())
            .args(args)
            .args(["--bind", "127.0.0.1", "--token", "t"])
            .arg("--machine-id-path")
            .arg(id.path())
            .spawn()
            .expect("spawn twig");
        std::thread::sleep(std::time::Duration::from_millis(150));
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[test]
fn help_lists_flags() {
    let out = Command::cargo_bin("twig").unwrap().arg("--help").output().unwrap();
    assert!(out.status.success());
    let help = String::from_utf8_lossy(&out.stdout);
    for flag in ["--port", "--enable-ssl", "--token", "--machine-id-path", "--config"] {
        assert!(help.contains(flag), "missing {flag} in:\n{help}");
    }
}

#[test]
fn invalid_config_aborts() {
    let out = Command::cargo_bin("twig")
        .unwrap()
        .args(["--interval-ms", "0", "--token", "t"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("interval_ms"));
}

#[test]
fn print_code_shows_six_digits_for_rotating_scheme() {
    let home = tempfile::tempdir().unwrap();
    let out = Command::cargo_bin("twig")
        .unwrap()
        .env("XDG_CONFIG_HOME", home.path())
        .env("TWIG_AUTH__SCHEME", "rotating")
        .args(["--token", "rotating-secret", "--print-code"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let code = stdout.lines().last().unwrap_or_default().trim().to_string();
    assert_eq!(code.len(), 6, "{code}");
    assert!(code.chars().all(|c| c.is_ascii_digit()), "{code}");
}

#[test]
fn print_code_refuses_static_scheme() {
    let home = tempfile::tempdir().unwrap();
    let out = Command::cargo_bin("twig")
        .unwrap()
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("TWIG_AUTH__SCHEME")
        .args(["--token", "t", "--print-code"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("rotating"));
}

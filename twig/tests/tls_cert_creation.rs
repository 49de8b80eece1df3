use assert_cmd::prelude::*;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use std::time::Instant;

fn expected_paths(config_home: &std::path::Path) -> (PathBuf, PathBuf) {
    let base = config_home.join("twig").join("tls");
    (base.join("cert.pem"), base.join("key.pem"))
}

#[test]
fn generates_self_signed_cert_and_key_in_xdg_path() {
    // Isolated fake XDG_CONFIG_HOME
    let tmpdir = tempfile::tempdir().expect("tempdir");
    let xdg = tmpdir.path().to_path_buf();
    let mut id = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(id, "4c4c4544004d3510804bb4c04f333832").unwrap();

    let mut cmd = Command::cargo_bin("twig").expect("binary exists");
    // Ephemeral port (-p 0) to avoid conflicts
    cmd.env("XDG_CONFIG_HOME", &xdg)
        .args(["--enableSSL", "-p", "0", "--bind", "127.0.0.1", "--token", "t"])
        .arg("--machine-id-path")
        .arg(id.path());

    let mut child = cmd.spawn().expect("spawn twig");

    // Poll up to ~3s for the files to appear
    let (cert_path, key_path) = expected_paths(&xdg);
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(3000) {
        if cert_path.exists() && key_path.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let _ = child.kill();
    let _ = child.wait();

    assert!(cert_path.exists(), "cert not found at {}", cert_path.display());
    assert!(key_path.exists(), "key not found at {}", key_path.display());
    let cert = fs::read_to_string(&cert_path).expect("cert readable");
    let key = fs::read_to_string(&key_path).expect("key readable");
    assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(key.contains("PRIVATE KEY"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "private key must be owner-only");
    }
}

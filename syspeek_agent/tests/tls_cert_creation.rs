use assert_cmd::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use std::time::Instant;

fn expected_paths(config_home: &std::path::Path) -> (PathBuf, PathBuf) {
    let base = config_home.join("syspeek").join("tls");
    (base.join("cert.pem"), base.join("key.pem"))
}

#[test]
fn generates_self_signed_cert_and_key_in_xdg_path() {
    let tmpdir = tempfile::tempdir().expect("tempdir");
    let xdg = tmpdir.path().to_path_buf();

    let mut cmd = Command::cargo_bin("syspeek_agent").expect("binary exists");
    // ephemeral port avoids conflicts
    cmd.env("XDG_CONFIG_HOME", &xdg)
        .args(["--https", "-a", "--port", "0"]);

    let mut child = cmd.spawn().expect("spawn agent");

    // poll up to ~3s for the files
    let (cert_path, key_path) = expected_paths(&xdg);
    let start = Instant::now();
    let timeout = Duration::from_millis(3000);
    let interval = Duration::from_millis(50);
    while start.elapsed() < timeout {
        if cert_path.exists() && key_path.exists() {
            break;
        }
        std::thread::sleep(interval);
    }
    // the key may still be mid-write when it first appears
    std::thread::sleep(Duration::from_millis(100));

    let _ = child.kill();
    let _ = child.wait();

    assert!(
        cert_path.exists(),
        "cert not found at {}",
        cert_path.display()
    );
    assert!(key_path.exists(), "key not found at {}", key_path.display());

    let cert = fs::read_to_string(&cert_path).expect("cert");
    assert!(cert.contains("BEGIN CERTIFICATE"));
    let key_md = fs::metadata(&key_path).expect("key metadata");
    assert!(key_md.len() > 0, "key is empty");
    assert_eq!(key_md.permissions().mode() & 0o777, 0o600);
}

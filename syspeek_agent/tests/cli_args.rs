//! CLI surface of the server binary.
use assert_cmd::prelude::*;
use std::process::Command;
use std::time::Duration;

use syspeek_agent::auth::hash_password;
use syspeek_agent::config::Config;

fn agent(config_home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("syspeek_agent").expect("binary exists");
    cmd.env("XDG_CONFIG_HOME", config_home);
    cmd
}

#[test]
fn hash_password_prints_stored_form() {
    let tmp = tempfile::tempdir().unwrap();
    let out = agent(tmp.path())
        .args(["--hash-password", "secret"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap().trim(), hash_password("secret"));
}

#[test]
fn print_config_file_emits_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let out = agent(tmp.path()).arg("--print-config-file").output().unwrap();
    assert!(out.status.success());
    let cfg = Config::from_json(&String::from_utf8(out.stdout).unwrap()).unwrap();
    assert_eq!(cfg, Config::default());
}

#[test]
fn refuses_to_start_without_users_or_mode() {
    let tmp = tempfile::tempdir().unwrap();
    let out = agent(tmp.path())
        .args(["--port", "0"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("no users configured"), "stderr: {stderr}");
}

#[test]
fn cert_requires_key() {
    let tmp = tempfile::tempdir().unwrap();
    let out = agent(tmp.path())
        .args(["-a", "--cert", "/tmp/cert.pem"])
        .output()
        .unwrap();
    assert!(!out.status.success());
}

#[test]
fn bad_config_file_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let out = agent(tmp.path())
        .args(["-a", "--port", "0", "--config-file"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(!out.status.success());
}

#[test]
fn public_and_admin_modes_start() {
    let tmp = tempfile::tempdir().unwrap();
    for mode in ["-p", "--admin"] {
        let mut child = agent(tmp.path())
            .args([mode, "--port", "0"])
            .spawn()
            .expect("spawn agent");
        std::thread::sleep(Duration::from_millis(300));
        assert!(child.try_wait().unwrap().is_none(), "{mode} exited early");
        let _ = child.kill();
        let _ = child.wait();
    }
}

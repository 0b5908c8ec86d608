#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::Command;

use bytes::{Bytes, BytesMut};
use serlink::frame::{append_fcs, destuff, encode_frame, verify_fcs, FLAG};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/serlinkcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn checked_frame(payload: &[u8]) -> Vec<u8> {
    let mut protected = BytesMut::new();
    append_fcs(payload, &mut protected);
    let mut wire = BytesMut::new();
    encode_frame(&protected, &mut wire);
    wire.to_vec()
}

#[test]
fn send_writes_checksummed_frame() {
    let dir = unique_temp_dir("send");
    let device = dir.join("line");
    std::fs::write(&device, b"").expect("device file should be creatable");

    let output = Command::new(env!("CARGO_BIN_EXE_serlink"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(&device)
        .arg("--data")
        .arg("hel~lo")
        .output()
        .expect("send should run");
    assert!(output.status.success());

    let wire = std::fs::read(&device).expect("device file should be readable");
    assert_eq!(wire.first(), Some(&FLAG));
    assert_eq!(wire.last(), Some(&FLAG));
    assert!(wire.windows(2).any(|w| w == [0x7D, 0x5E]));

    let body = destuff(&wire[1..wire.len() - 1]).expect("body should destuff");
    let payload = verify_fcs(&body).expect("checksum should match");
    assert_eq!(payload, Bytes::from_static(b"hel~lo"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listen_prints_verified_frames_as_json() {
    let dir = unique_temp_dir("listen");
    let device = dir.join("line");
    let mut wire = checked_frame(b"first");
    wire.extend_from_slice(b"noise");
    let mut corrupted = checked_frame(b"broken");
    corrupted[2] ^= 0x01;
    wire.extend_from_slice(&corrupted);
    wire.extend_from_slice(&checked_frame(b"second"));
    std::fs::write(&device, &wire).expect("device file should be writable");

    let output = Command::new(env!("CARGO_BIN_EXE_serlink"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg(&device)
        .arg("--count")
        .arg("2")
        .output()
        .expect("listen should run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["payload"], "first");
    assert_eq!(lines[0]["sequence"], 1);
    assert_eq!(lines[1]["payload"], "second");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listen_ends_when_device_runs_dry() {
    let dir = unique_temp_dir("dry");
    let device = dir.join("line");
    std::fs::write(&device, checked_frame(b"only")).expect("device file should be writable");

    let output = Command::new(env!("CARGO_BIN_EXE_serlink"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("raw")
        .arg("listen")
        .arg(&device)
        .output()
        .expect("listen should run");
    assert!(output.status.success());
    assert_eq!(output.stdout, b"only");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_device_is_a_transport_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_serlink"))
        .arg("chat")
        .arg("/nonexistent/serlink-tty")
        .output()
        .expect("chat should run");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: open failed"));
}

#[test]
fn unsupported_baud_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_serlink"))
        .arg("send")
        .arg("/dev/null")
        .arg("--baud")
        .arg("12345")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_serlink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("serlink {}", env!("CARGO_PKG_VERSION")));
}

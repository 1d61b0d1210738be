#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/tljcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("server socket did not appear at {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

struct Serving {
    child: Child,
    dir: PathBuf,
}

impl Drop for Serving {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn serve(tag: &str, extra: &[&str]) -> (Serving, PathBuf) {
    let dir = unique_temp_dir(tag);
    let sock = dir.join("serve.sock");
    let child = Command::new(env!("CARGO_BIN_EXE_tlj"))
        .args(["--log-level", "error", "--format", "json", "serve"])
        .arg(&sock)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");
    wait_for_socket(&sock, Duration::from_secs(5));
    (Serving { child, dir }, sock)
}

#[test]
fn request_is_echoed_back() {
    let (_server, sock) = serve("echo", &[]);

    let output = Command::new(env!("CARGO_BIN_EXE_tlj"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .arg(&sock)
        .args(["--json", r#"{"Name":"test","ID":1}"#, "--request"])
        .output()
        .expect("send should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let line: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should print one JSON object");
    assert_eq!(line["kind"], "response");
    assert_eq!(line["request_id"], 1);
    assert_eq!(line["value"]["ID"], 1);
}

#[test]
fn schema_rejected_request_times_out() {
    let dir = unique_temp_dir("schema-src");
    std::fs::write(
        dir.join("type_1.schema.json"),
        r#"{"type":"object","required":["ID"]}"#,
    )
    .expect("schema should be writable");
    let schema_dir = dir.to_string_lossy().to_string();
    let (_server, sock) = serve("schema", &["--validate", &schema_dir]);

    let output = Command::new(env!("CARGO_BIN_EXE_tlj"))
        .args(["--log-level", "error", "send"])
        .arg(&sock)
        .args(["--json", r#"{"Name":"no id"}"#, "--request", "--wait-timeout", "300ms"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_is_transport_error() {
    let dir = unique_temp_dir("missing");
    let output = Command::new(env!("CARGO_BIN_EXE_tlj"))
        .arg("send")
        .arg(dir.join("absent.sock"))
        .args(["--json", "{}"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_json_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_tlj"))
        .args(["send", "/tmp/tlj-never-used.sock", "--json", "{broken"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_tlj"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("tlj {}", env!("CARGO_PKG_VERSION")));
}

//! Integration tests for the `mapserv` binary.

use std::path::PathBuf;
use std::process::{Command, Output};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn mapserv(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mapserv"))
        .args(args)
        .env_remove("MAPSERV_WORKERS")
        .env("MAPSERV_LOG", "warn")
        .output()
        .expect("failed to spawn mapserv")
}

fn world() -> String {
    fixtures_dir().join("world.map").display().to_string()
}

#[test]
fn test_run_prints_headers_then_body() {
    let out = mapserv(&["run", &world(), "--query", "mode=map&q=12"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    let (head, body) = stdout.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("Content-Type: text/plain\r\n"));
    assert!(head.contains(&format!("Content-Length: {}", body.len())));
    assert!(body.starts_with("MAP valid 320x240\n"));
    assert!(body.contains("DATA=roads_12\n"));
}

#[test]
fn test_run_with_post_body() {
    let body = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(body.path(), "mode=mapfile&map.name=posted").unwrap();

    let out = mapserv(&["run", &world(), "--body", body.path().to_str().unwrap()]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("NAME \"posted\""));
}

#[test]
fn test_run_failure_exits_nonzero() {
    let out = mapserv(&["run", &world(), "--query", "mode=teapot"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Invalid mode."));
    assert!(out.stdout.is_empty());
}

#[test]
fn test_run_json_errors() {
    let out = mapserv(&["run", &world(), "--query", "mode=teapot", "--json-errors"]);
    assert!(!out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["name"], "MapserverError");
    assert_eq!(json["message"], "Invalid mode.");
    assert_eq!(json["code"], 14);
}

#[test]
fn test_check_reports_layers() {
    let out = mapserv(&["check", &world()]);
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("map:    valid (320x240)"));
    assert!(stdout.contains("layers: 2"));
}

#[test]
fn test_check_reports_parse_error() {
    let broken = fixtures_dir().join("broken.map");
    let out = mapserv(&["check", broken.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Parsing error near (LAYER):(line 14)"));
}

#[test]
fn test_versions_json() {
    let out = mapserv(&["versions", "--json"]);
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["mapserv"], env!("CARGO_PKG_VERSION"));
    assert!(json["engineDetails"].as_str().unwrap().contains("SUPPORTS=THREADS"));
}

#[test]
fn test_config_file_is_honoured() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut config, b"[dispatcher]\nworkers = 3\n").unwrap();

    let out = mapserv(&["--config", config.path().to_str().unwrap(), "versions"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("workers:        3"));
}

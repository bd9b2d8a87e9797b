#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn setup(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.arbor"));
    cargo_bin_cmd!("arbor")
        .args(["create", "--columns", "id:integer,name:varchar(24)", "--key-columns", "1"])
        .args(["--page-size", "512"])
        .arg(&path)
        .assert()
        .success();
    (dir, path)
}

fn json_of(command: &str, path: &Path, args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("arbor")
        .args(["--format", "json", command])
        .arg(path)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn insert_rows(path: &Path, rows: impl IntoIterator<Item = String>) {
    cargo_bin_cmd!("arbor")
        .arg("insert")
        .arg(path)
        .args(rows)
        .assert()
        .success();
}

#[test]
fn create_reports_header_fields() {
    let (_dir, path) = setup("create");
    let info = json_of("info", &path, &[]);
    assert_eq!(info["page_size"], 512);
    assert_eq!(info["root"], 0);
    assert_eq!(info["key_columns"], 1);
    assert_eq!(info["max_tuple_len"], 166);
    assert!(info["table_stats"].is_null());

    cargo_bin_cmd!("arbor")
        .args(["create", "--columns", "id:integer"])
        .arg(&path)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn insert_get_scan_and_delete() {
    let (_dir, path) = setup("crud");
    insert_rows(&path, (0..60).map(|i| format!("{i},user-{i}")));

    let row = json_of("get", &path, &["42"]);
    assert_eq!(row["values"], serde_json::json!([42, "user-42"]));
    assert!(row["pointer"].as_str().unwrap_or_default().starts_with("FP["));

    let assert = cargo_bin_cmd!("arbor")
        .arg("delete")
        .arg(&path)
        .args(["10", "11", "500"])
        .assert()
        .success();
    let stdout = text(&assert.get_output().stdout);
    assert!(stdout.contains("deleted 2 row(s)"), "{stdout}");
    assert!(stdout.contains("not found: 500"), "{stdout}");

    let rows = json_of("scan", &path, &["--from", "9", "--limit", "3"]);
    let ids: Vec<i64> = rows
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|r| r["values"][0].as_i64())
        .collect();
    assert_eq!(ids, vec![9, 12, 13]);

    let all = json_of("scan", &path, &[]);
    assert_eq!(all.as_array().map(Vec::len), Some(58));
}

#[test]
fn null_fields_and_bad_values() {
    let (_dir, path) = setup("nulls");
    insert_rows(&path, ["7,NULL".to_string()]);
    let row = json_of("get", &path, &["7"]);
    assert!(row["values"][1].is_null());

    let bad = cargo_bin_cmd!("arbor")
        .arg("insert")
        .arg(&path)
        .arg("seven,x")
        .assert()
        .failure();
    assert!(text(&bad.get_output().stderr).contains("cannot read 'seven'"));
    let duplicate = cargo_bin_cmd!("arbor")
        .arg("insert")
        .arg(&path)
        .arg("7,again")
        .assert()
        .failure();
    assert!(text(&duplicate.get_output().stderr).contains("duplicate key"));
}

#[test]
fn analyze_then_info_shows_statistics() {
    let (_dir, path) = setup("analyze");
    insert_rows(&path, (0..200).map(|i| format!("{i},name-{i}")));
    let stats = json_of("analyze", &path, &[]);
    assert_eq!(stats["num_tuples"], 200);
    assert!(stats["depth"].as_u64().unwrap_or(0) >= 2);

    let info = json_of("info", &path, &[]);
    assert_eq!(info["table_stats"]["num_tuples"], 200);

    let assert = cargo_bin_cmd!("arbor").arg("info").arg(&path).assert().success();
    assert!(text(&assert.get_output().stdout).contains("tuples=200"));
}

#[test]
fn verify_exit_status_tracks_findings() {
    let (_dir, path) = setup("verify");
    insert_rows(&path, (0..80).map(|i| format!("{i},v{i}")));
    let report = json_of("verify", &path, &[]);
    assert_eq!(report["diagnostics"], serde_json::json!([]));

    let first_leaf = json_of("info", &path, &[])["first_leaf"].as_u64().expect("first leaf");
    {
        let mut file = OpenOptions::new().write(true).open(&path).expect("open");
        file.seek(SeekFrom::Start(first_leaf * 512)).expect("seek");
        file.write_all(&[0x7f]).expect("write");
    }
    let assert = cargo_bin_cmd!("arbor").arg("verify").arg(&path).assert().code(2);
    assert!(text(&assert.get_output().stdout).contains("problem(s)"));
}

#[test]
fn config_file_supplies_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("config.toml");
    fs::write(&config, "page_size = 1024\noutput = \"json\"\n").expect("config");
    let path = dir.path().join("configured.arbor");

    let output = cargo_bin_cmd!("arbor")
        .arg("--config")
        .arg(&config)
        .args(["create", "--columns", "k:bigint"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let info: Value = serde_json::from_slice(&output).expect("json from config default");
    assert_eq!(info["page_size"], 1024);

    let assert = cargo_bin_cmd!("arbor")
        .env("ARBOR_CONFIG", &config)
        .args(["--format", "text", "info"])
        .arg(&path)
        .assert()
        .success();
    assert!(text(&assert.get_output().stdout).contains("page size:      1024"));
}

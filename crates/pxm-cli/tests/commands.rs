use std::{fs, path::Path};

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use serde_json::Value;
use tempfile::TempDir;

fn pxm(serverdir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("pxm");
    cmd.env("PXM_SERVERDIR", serverdir)
        .env_remove("PXM_OFFLINE")
        .env_remove("PXM_HASH_TYPE")
        .env_remove("PXM_FETCH_TIMEOUT");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let assert = cmd.assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
}

fn stderr_of_failure(cmd: &mut Command) -> String {
    let assert = cmd.assert().failure();
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}

fn upload_fixture(temp: &TempDir, serverdir: &Path) -> String {
    let file = temp.path().join("demo-1.0.tar.gz");
    fs::write(&file, b"demo archive").expect("write fixture");
    let output = stdout_of(
        pxm(serverdir)
            .arg("--json")
            .arg("upload")
            .arg("alice/dev")
            .arg(&file),
    );
    let payload: Value = serde_json::from_str(&output).expect("json envelope");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["command"], "upload");
    payload["details"]["relpath"]
        .as_str()
        .expect("relpath")
        .to_string()
}

#[test]
fn ls_on_fresh_store_reports_no_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = stdout_of(pxm(&temp.path().join("server")).arg("ls"));
    assert_eq!(output.trim(), "no entries");
}

#[test]
fn upload_then_cat_ls_and_rm() {
    let temp = tempfile::tempdir().expect("tempdir");
    let serverdir = temp.path().join("server");
    let relpath = upload_fixture(&temp, &serverdir);
    assert!(relpath.starts_with("alice/dev/+f/"), "unexpected relpath {relpath}");
    assert!(relpath.ends_with("/demo-1.0.tar.gz"));

    let listing = stdout_of(pxm(&serverdir).arg("ls"));
    assert!(listing.contains(&relpath), "ls missing entry: {listing}");
    assert!(listing.contains("  12"), "ls missing size: {listing}");

    let content = pxm(&serverdir).args(["cat", &relpath]).assert().success();
    assert_eq!(content.get_output().stdout, b"demo archive");

    let removed = stdout_of(pxm(&serverdir).args(["rm", &relpath]));
    assert!(removed.contains("removed"));

    let stderr = stderr_of_failure(pxm(&serverdir).args(["cat", &relpath]));
    assert!(stderr.contains("no entry recorded"), "unexpected stderr: {stderr}");
}

#[test]
fn serverdir_flag_overrides_environment() {
    let temp = tempfile::tempdir().expect("tempdir");
    let env_dir = temp.path().join("from-env");
    let flag_dir = temp.path().join("from-flag");
    let relpath = upload_fixture(&temp, &env_dir);

    let listing = stdout_of(pxm(&env_dir).arg("--serverdir").arg(&flag_dir).arg("ls"));
    assert_eq!(listing.trim(), "no entries");
    assert!(flag_dir.join("keyfs.sqlite").exists());

    let listing = stdout_of(pxm(&env_dir).arg("ls"));
    assert!(listing.contains(&relpath));
}

#[test]
fn upload_rejects_malformed_target() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("pkg-1.0.zip");
    fs::write(&file, b"x").expect("write fixture");
    let stderr = stderr_of_failure(
        pxm(&temp.path().join("server"))
            .arg("upload")
            .arg("just-a-user")
            .arg(&file),
    );
    assert!(stderr.contains("USER/INDEX"), "unexpected stderr: {stderr}");
}

#[test]
fn fetch_rejects_unknown_hash_algorithm() {
    let temp = tempfile::tempdir().expect("tempdir");
    let stderr = stderr_of_failure(pxm(&temp.path().join("server")).args([
        "fetch",
        "http://pkg.example/pytest-1.2.zip#crc32=aaaaaaaaaaaaaaaaaaaa",
    ]));
    assert!(stderr.contains("PXM301"), "unexpected stderr: {stderr}");
}

#[test]
fn offline_fetch_fails_and_records_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let serverdir = temp.path().join("server");
    let stderr = stderr_of_failure(
        pxm(&serverdir)
            .env("PXM_OFFLINE", "1")
            .args(["fetch", "http://pkg.example/pytest-1.2.zip"]),
    );
    assert!(stderr.contains("PXM204"), "unexpected stderr: {stderr}");

    let listing = stdout_of(pxm(&serverdir).arg("ls"));
    assert_eq!(listing.trim(), "no entries");
}

#[test]
fn index_prints_one_document_per_project() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = temp.path().join("model.json");
    fs::write(
        &model,
        r#"{"users": {
            "alice": {"indexes": {"dev": {"projects": {
                "Demo_Pkg": {"versions": {
                    "1.0": {"metadata": {"summary": "demo", "license": "UNKNOWN"},
                            "doczip": ["demo-1.0.doc.zip"]}
                }}
            }}}},
            "root": {"indexes": {"pypi": {"type": "mirror", "projects": {
                "requests": {"cached": false}
            }}}}
        }}"#,
    )
    .expect("write model");

    let output = stdout_of(pxm(&temp.path().join("server")).arg("index").arg(&model));
    let documents: Vec<Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(documents.len(), 2);

    let demo = &documents[0];
    assert_eq!(demo["name"], "demo-pkg");
    assert_eq!(demo["summary"], "demo");
    assert_eq!(demo["doc_version"], "1.0");
    assert_eq!(demo["+doczip"]["stage"], "alice/dev");
    assert!(demo.get("license").is_none());

    let stub = &documents[1];
    assert_eq!(
        stub,
        &serde_json::json!({"name": "requests", "user": "root", "index": "pypi"})
    );
}

#[test]
fn index_reports_unreadable_model() {
    let temp = tempfile::tempdir().expect("tempdir");
    let stderr = stderr_of_failure(
        pxm(&temp.path().join("server"))
            .arg("index")
            .arg(temp.path().join("missing.json")),
    );
    assert!(stderr.contains("failed to read model snapshot"), "unexpected stderr: {stderr}");
}

//! End-to-end tests of the `docqa` binary with the offline `hash`
//! embedder and the `disabled` language model.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docqa_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docqa"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("volcanoes.md"),
        "# Volcanoes\n\nVolcanoes erupt when magma rises through the crust.\n\nBasalt lava flows are runny.",
    )
    .unwrap();
    fs::write(
        files_dir.join("baking.txt"),
        "Sourdough bread needs a lively starter and a long cold proof.",
    )
    .unwrap();
    fs::write(files_dir.join("empty.txt"), "").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docqa.sqlite"

[storage]
root = "{root}/data/blobs"

[chunking]
max_tokens = 120
overlap_tokens = 10

[ingest]
max_upload_bytes = 4096

[memory]
summary_every_n_turns = 2

[embedding]
provider = "hash"
dims = 128

[llm]
provider = "disabled"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_as(config_path, "alice", args)
}

fn run_as(config_path: &Path, owner: &str, args: &[&str]) -> (String, String, bool) {
    let binary = docqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["--owner", owner])
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("DOCQA_OWNER")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn files(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

/// Upload a file and return the new document id.
fn upload(config_path: &Path, name: &str) -> String {
    let path = files(config_path).join(name);
    let (stdout, stderr, success) = run_docqa(config_path, &["upload", path.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    stdout
        .split_whitespace()
        .nth(1)
        .expect("upload prints the document id")
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_docqa(&config_path, &["init"]);
    assert!(success);
}

#[test]
fn test_upload_then_jobs_run_processes_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let id = upload(&config_path, "volcanoes.md");

    let (stdout, _, _) = run_docqa(&config_path, &["documents", "show", &id]);
    assert!(stdout.contains("status:     pending"), "got: {}", stdout);

    let (stdout, stderr, success) = run_docqa(&config_path, &["jobs", "run"]);
    assert!(success, "jobs run failed: {}", stderr);
    assert!(stdout.contains("1 done"), "got: {}", stdout);

    let (stdout, _, _) = run_docqa(&config_path, &["documents", "show", &id]);
    assert!(stdout.contains("status:     processed"), "got: {}", stdout);
    assert!(stdout.contains("chunks:     1"), "got: {}", stdout);
}

#[test]
fn test_empty_upload_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let path = files(&config_path).join("empty.txt");
    let (_, stderr, success) = run_docqa(&config_path, &["upload", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("file is empty"), "got: {}", stderr);
}

#[test]
fn test_ask_cites_sources_and_falls_back() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let volcano = upload(&config_path, "volcanoes.md");
    let baking = upload(&config_path, "baking.txt");
    run_docqa(&config_path, &["jobs", "run"]);

    let (stdout, stderr, success) = run_docqa(
        &config_path,
        &["ask", "Why do volcanoes erupt?", "--document", &volcano, "--json"],
    );
    assert!(success, "ask failed: {}", stderr);

    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["fallback"], true);
    let sources = response["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["document_id"], volcano.as_str());
    assert!(sources
        .iter()
        .all(|s| s["document_id"] != baking.as_str()));
}

#[test]
fn test_session_transcript_and_summary_job() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);
    upload(&config_path, "baking.txt");
    run_docqa(&config_path, &["jobs", "run"]);

    let (stdout, _, success) = run_docqa(&config_path, &["ask", "What does sourdough need?", "--json"]);
    assert!(success);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let session = response["session_id"].as_str().unwrap().to_string();

    let (stdout, _, _) = run_docqa(&config_path, &["sessions", "list"]);
    assert!(stdout.contains(&session));

    let (stdout, _, _) = run_docqa(&config_path, &["sessions", "show", &session]);
    assert!(stdout.contains("(2 messages)"), "got: {}", stdout);
    assert!(stdout.contains("user: What does sourdough need?"));

    // First turn reaches 2 messages; summaries run every 2.
    let (stdout, _, _) = run_docqa(&config_path, &["jobs", "status"]);
    assert!(stdout.contains("pending: 1"), "got: {}", stdout);

    let (stdout, _, _) = run_docqa(&config_path, &["memories", "list", "--session", &session]);
    assert!(stdout.contains("qa_turn"), "got: {}", stdout);
}

#[test]
fn test_unknown_session_is_error() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let (_, stderr, success) = run_docqa(
        &config_path,
        &["ask", "anything", "--session", "no-such-session"],
    );
    assert!(!success);
    assert!(stderr.contains("session not found"), "got: {}", stderr);
}

#[test]
fn test_manual_memory_and_owner_isolation() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let (stdout, stderr, success) = run_docqa(
        &config_path,
        &["memories", "add", "Prefers metric units", "--session", "notes"],
    );
    assert!(success, "memories add failed: {}", stderr);
    assert!(stdout.contains("Stored memory"));

    let (stdout, _, _) = run_docqa(&config_path, &["memories", "list"]);
    assert!(stdout.contains("Prefers metric units"));
    assert!(stdout.contains("manual"));

    let (stdout, _, _) = run_as(&config_path, "bob", &["memories", "list"]);
    assert!(stdout.contains("No memories."), "got: {}", stdout);
}

#[test]
fn test_delete_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);
    let id = upload(&config_path, "baking.txt");

    let (stdout, _, success) = run_docqa(&config_path, &["documents", "delete", &id]);
    assert!(success);
    assert!(stdout.contains("Deleted"));

    let (stdout, _, _) = run_docqa(&config_path, &["documents", "list"]);
    assert!(stdout.contains("No documents."));

    let (_, stderr, success) = run_docqa(&config_path, &["documents", "show", &id]);
    assert!(!success);
    assert!(stderr.contains("document not found"), "got: {}", stderr);
}

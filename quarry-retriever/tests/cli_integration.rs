use anyhow::Result;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const OFFLINE_CONFIG: &str = r#"
[chunking]
chunk_size = 200

[embedding]
provider = "hashed"
hashed_dimension = 64

[generation]
base_url = "http://127.0.0.1:9"
request_timeout_secs = 5
retries = 1
check_model = false
"#;

/// Helper to run the CLI binary against `root` with given args
fn run_cli(root: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_quarry"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "error")
        .env_remove("QUARRY_OLLAMA_URL")
        .env_remove("QUARRY_EMBED_MODEL")
        .env_remove("QUARRY_LLM_MODEL")
        .output()?;
    Ok(output)
}

/// A small corpus with an offline embedding configuration
fn setup_corpus() -> Result<TempDir> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    std::fs::write(root.join("quarry.toml"), OFFLINE_CONFIG)?;
    std::fs::create_dir_all(root.join("src"))?;
    std::fs::write(
        root.join("src/auth.py"),
        "def login(user, password):\n    return check_password(user, password)\n",
    )?;
    std::fs::write(
        root.join("src/math.rs"),
        "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
    )?;
    Ok(temp_dir)
}

#[test]
fn test_index_then_reuse() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let output = run_cli(temp_dir.path(), &["index"])?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Index build: done"));
    assert!(stdout.contains("Mode: rebuilt"));
    assert!(temp_dir.path().join(".quarry/CURRENT").is_file());

    let output = run_cli(temp_dir.path(), &["index", "--json"])?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["built"], false);
    assert_eq!(report["persistence"]["status"], "reused");
    // quarry.toml is indexed along with the sources
    assert_eq!(report["files_scanned"], 3);

    let output = run_cli(temp_dir.path(), &["index", "--force", "--json"])?;
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["built"], true);
    assert_eq!(report["rebuild_reason"], "forced");

    Ok(())
}

#[test]
fn test_search_formats() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let output = run_cli(
        temp_dir.path(),
        &["search", "login", "user", "password", "-k", "1", "--format", "json"],
    )?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let hits: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let hits = hits.as_array().expect("array of hits");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["chunk"]["metadata"]["path"], "src/auth.py");

    let output = run_cli(temp_dir.path(), &["search", "add", "--format", "context"])?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("**Path:** `src/math.rs`"));
    assert!(stdout.contains("**Code:**"));

    let output = run_cli(temp_dir.path(), &["search", "add"])?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.starts_with("Found 3 chunks:"));

    Ok(())
}

#[test]
fn test_missing_query_fails() -> Result<()> {
    let temp_dir = setup_corpus()?;
    let output = run_cli(temp_dir.path(), &["ask"])?;
    assert!(!output.status.success());
    let output = run_cli(temp_dir.path(), &["search"])?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_missing_root_names_scan_stage() -> Result<()> {
    let temp_dir = setup_corpus()?;
    let config = temp_dir.path().join("quarry.toml");
    let missing = temp_dir.path().join("nowhere");

    let output = run_cli(
        &missing,
        &["--config", config.to_str().expect("utf-8 path"), "search", "anything"],
    )?;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("scan stage failed"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn test_ask_without_generation_service_is_degraded() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let output = run_cli(temp_dir.path(), &["ask", "how", "does", "login", "work"])?;
    assert!(!output.status.success());

    // The retrieved context is still shown
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("**Path:** `src/auth.py`"));
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("generation stage failed"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn test_chat_answers_each_line_from_one_index() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let mut child = Command::new(env!("CARGO_BIN_EXE_quarry"))
        .arg("--root")
        .arg(temp_dir.path())
        .arg("chat")
        .env("RUST_LOG", "error")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(b"how does login work\n\nwhat does add return\nexit\nnever asked\n")?;
    let output = child.wait_with_output()?;

    // Each failed answer is reported, and the session still ends cleanly
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("**Path:** `src/auth.py`"));
    assert!(stdout.contains("**Path:** `src/math.rs`"));
    let stderr = String::from_utf8(output.stderr)?;
    assert_eq!(stderr.matches("generation stage failed").count(), 2, "stderr: {stderr}");
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() -> Result<()> {
    let temp_dir = setup_corpus()?;
    std::fs::write(
        temp_dir.path().join("quarry.toml"),
        "[chunking]\nchunk_size = 10\noverlap = 10\n",
    )?;

    let output = run_cli(temp_dir.path(), &["index"])?;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("invalid configuration"), "stderr: {stderr}");
    Ok(())
}

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const ALIAS_VARS: [&str; 4] = [
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "MODEL_NAME",
    "DEFAULT_SYSTEM_PROMPT",
];

fn valid_key() -> String {
    format!("sk-{}", "c".repeat(48))
}

/// Run the binary against an isolated config dir, logging into it as well
fn nebula(dir: &Path, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_nebula"));
    cmd.current_dir(dir)
        .arg("--config-dir")
        .arg(dir)
        .args(args)
        .env("NEBULA__LOGGING__DIR", dir.join("logs"))
        .env_remove("RUST_LOG")
        .env_remove("LOG_FORMAT");
    for var in ALIAS_VARS {
        cmd.env_remove(var);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("failed to run nebula")
}

fn completion_body(content: &str) -> String {
    format!(
        r#"{{"choices":[{{"message":{{"role":"assistant","content":"{}"}},"finish_reason":"stop"}}]}}"#,
        content
    )
}

#[test]
fn test_status_without_key() {
    let dir = TempDir::new().unwrap();
    let output = nebula(dir.path(), &["status"], &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("gpt-4o-mini"));
    assert!(stdout.contains("not set"));
}

#[test]
fn test_status_masks_configured_key() {
    let dir = TempDir::new().unwrap();
    let key = valid_key();
    fs::write(
        dir.path().join("config.json"),
        format!(r#"{{"provider":{{"api_key":"{}"}},"chat":{{"model":"gpt-4o"}}}}"#, key),
    )
    .unwrap();

    let output = nebula(dir.path(), &["status"], &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("gpt-4o"));
    assert!(stdout.contains("sk-"));
    assert!(!stdout.contains(&key));
}

#[test]
fn test_ask_requires_a_key() {
    let dir = TempDir::new().unwrap();
    let output = nebula(dir.path(), &["ask", "--message", "hello"], &[]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("No API key configured"));
}

#[test]
fn test_ask_rejects_malformed_key() {
    let dir = TempDir::new().unwrap();
    let output = nebula(
        dir.path(),
        &["ask", "--message", "hello"],
        &[("OPENAI_API_KEY", "abc123")],
    );
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("Invalid API key format"));
}

#[test]
fn test_invalid_config_fails_fast() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.json"),
        r#"{"chat":{"temperature":5.0}}"#,
    )
    .unwrap();

    let output = nebula(dir.path(), &["status"], &[]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("temperature"));
}

#[test]
fn test_ask_prints_reply() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion_body("Hello from the mock"))
        .create();

    let dir = TempDir::new().unwrap();
    let key = valid_key();
    let base = server.url();
    let output = nebula(
        dir.path(),
        &["ask", "--message", "hello"],
        &[("OPENAI_API_KEY", &key), ("OPENAI_BASE_URL", &base)],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success());
    assert_eq!(stdout.trim(), "Hello from the mock");
}

#[test]
fn test_ask_reports_provider_rejection() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":{"message":"Incorrect API key provided"}}"#)
        .create();

    let dir = TempDir::new().unwrap();
    let key = valid_key();
    let base = server.url();
    let output = nebula(
        dir.path(),
        &["ask", "--message", "hello"],
        &[("OPENAI_API_KEY", &key), ("OPENAI_BASE_URL", &base)],
    );
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("An error occurred"));
    assert!(!stderr.contains(&key));
}

#[test]
fn test_json_logs_are_written_to_log_dir() {
    let dir = TempDir::new().unwrap();
    let output = nebula(dir.path(), &["status"], &[("LOG_FORMAT", "json")]);
    assert!(output.status.success());

    let log_files: Vec<_> = fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("nebula.log"))
        .collect();
    assert!(!log_files.is_empty());

    let content = fs::read_to_string(log_files[0].path()).unwrap();
    let line = content
        .lines()
        .find(|line| line.contains("Configuration loaded"))
        .expect("startup line logged");
    assert!(line.trim_start().starts_with('{'));
}

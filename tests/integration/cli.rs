//! The `userflow` binary's exit status and log output.

use std::io::Write;
use std::process::{Command, Output};

fn userflow(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_userflow"))
        .args(args)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .output()
        .unwrap()
}

fn config_file(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_failed_run_exits_nonzero_after_logging_summary() {
    let config = config_file(
        "source:\n  url: http://127.0.0.1:9/\n  timeout_secs: 1\n\
         retry:\n  max_attempts: 1\n  delay_secs: 0\n",
    );
    let path = config.path().to_str().unwrap();

    let output = userflow(&["run", "--config", path]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1), "stdout: {}", stdout);
    assert!(stdout.contains("task 'get_data' failed after 1 attempt(s)"), "stdout: {}", stdout);
    assert!(stdout.contains("Finished with"), "stdout: {}", stdout);
}

#[test]
fn test_validate_exits_zero_for_valid_config() {
    let config = config_file("id: user_registry\npublish_interval_secs: 0\n");
    let path = config.path().to_str().unwrap();

    let output = userflow(&["validate", "--config", path]);

    assert!(output.status.success());
}

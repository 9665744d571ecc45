//! Unit tests for launch argument assembly and binary resolution.

use agent_conduit::process::{resolve_program, SpawnConfig};
#[cfg(unix)]
use agent_conduit::process::{spawn_agent, ExitInfo};
use agent_conduit::AppError;

// ── command_args ─────────────────────────────────────────────────────────────

#[test]
fn default_args_put_protocol_flags_first() {
    let mut config = SpawnConfig::new("claude");
    config.args = vec!["--model".into(), "fast".into()];

    assert_eq!(
        config.command_args(),
        vec![
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--model",
            "fast"
        ]
    );
}

/// Dropping the protocol flags still yields NDJSON mode.
#[test]
fn missing_required_flags_are_restored() {
    let mut config = SpawnConfig::new("claude");
    config.protocol_args.clear();

    assert_eq!(
        config.command_args(),
        vec!["--output-format", "stream-json", "--input-format", "stream-json"]
    );
}

/// A required flag given in caller args is not duplicated.
#[test]
fn required_flag_in_caller_args_is_not_duplicated() {
    let mut config = SpawnConfig::new("claude");
    config.protocol_args = vec!["--output-format".into(), "stream-json".into()];
    config.args = vec!["--input-format".into(), "stream-json".into()];

    let args = config.command_args();
    assert_eq!(args.iter().filter(|a| *a == "--input-format").count(), 1);
    assert_eq!(args.iter().filter(|a| *a == "--output-format").count(), 1);
}

// ── resolve_program ──────────────────────────────────────────────────────────

#[test]
fn unknown_bare_name_is_not_found() {
    let err = resolve_program("conduit-no-such-agent-binary").expect_err("not on PATH");
    assert_eq!(
        err,
        AppError::Spawn("agent binary not found: conduit-no-such-agent-binary".into())
    );
}

#[test]
fn empty_program_is_not_found() {
    assert!(matches!(
        resolve_program("  "),
        Err(AppError::Spawn(ref m)) if m.starts_with("agent binary not found")
    ));
}

#[test]
fn missing_absolute_path_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent");

    let err = resolve_program(&path.display().to_string()).expect_err("missing");
    assert!(matches!(err, AppError::Spawn(ref m) if m.starts_with("agent binary not found")));
}

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use super::*;

    #[test]
    fn executable_path_resolves_to_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent");
        fs::write(&path, "#!/bin/sh\nexit 0\n").expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");

        let resolved = resolve_program(&path.display().to_string()).expect("resolve");
        assert_eq!(resolved, path);
    }

    #[test]
    fn non_executable_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent");
        fs::write(&path, "not a program").expect("write file");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");

        let err = resolve_program(&path.display().to_string()).expect_err("not executable");
        assert!(matches!(err, AppError::Spawn(ref m) if m.starts_with("agent binary not executable")));
    }

    #[test]
    fn directory_is_not_executable() {
        let dir = tempfile::tempdir().expect("tempdir");

        let err = resolve_program(&dir.path().display().to_string()).expect_err("directory");
        assert!(matches!(err, AppError::Spawn(ref m) if m.starts_with("agent binary not executable")));
    }

    #[test]
    fn bare_name_is_found_on_path() {
        let resolved = resolve_program("sh").expect("sh is on PATH");
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }

    /// `wait` reports the exit code and keeps reporting it once published.
    #[tokio::test]
    async fn wait_reports_exit_code() {
        let mut config = SpawnConfig::new("sh");
        config.protocol_args = vec!["-c".into(), "exit 5".into()];

        let transport = spawn_agent(&config, "wait-test").expect("spawn sh");
        let process = transport.process.expect("child process handle");

        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("process must exit");
        assert_eq!(exit, ExitInfo { code: Some(5), signal: None });
        assert_eq!(process.wait().await, exit);
        assert_eq!(process.exit_info(), Some(exit));
    }
}

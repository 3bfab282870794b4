//! Tests for the protocol types.

use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;

mod command_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_defaults() {
        let cmd = Command::new("id-1", "echo hi");
        assert_eq!(cmd.id, "id-1");
        assert!(cmd.capture_output);
        assert!(!cmd.stream_output);
        assert_eq!(cmd.timeout, Duration::ZERO);
        assert_eq!(cmd.max_output_size, 0);
        assert!(cmd.sandbox.is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Command::with_generated_id("true");
        let b = Command::with_generated_id("true");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("exec-"));
    }

    #[test]
    fn test_effective_timeout_takes_smaller() {
        let sandbox = SandboxConfig::default().with_resources(ResourceLimits {
            timeout: Duration::from_secs(2),
            ..ResourceLimits::default()
        });
        let cmd = Command::new("t", "sleep 1")
            .with_timeout(Duration::from_secs(10))
            .with_sandbox(sandbox.clone());
        assert_eq!(cmd.effective_timeout(), Duration::from_secs(2));

        let cmd = Command::new("t", "sleep 1")
            .with_timeout(Duration::from_millis(500))
            .with_sandbox(sandbox);
        assert_eq!(cmd.effective_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_effective_timeout_ignores_zero() {
        let cmd = Command::new("t", "true").with_timeout(Duration::from_secs(3));
        assert_eq!(cmd.effective_timeout(), Duration::from_secs(3));

        let cmd = Command::new("t", "true").with_sandbox(
            SandboxConfig::default().with_resources(ResourceLimits::unlimited()),
        );
        assert_eq!(cmd.effective_timeout(), Duration::ZERO);

        let cmd = Command::new("t", "true").with_sandbox(SandboxConfig::disabled());
        assert_eq!(cmd.effective_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_shell_program_and_flag() {
        assert_eq!(Shell::Sh.program(), "/bin/sh");
        assert_eq!(Shell::Sh.command_flag(), "-c");
        assert_eq!(Shell::Cmd.command_flag(), "/C");
        assert!(Shell::Bash.is_posix());
        assert!(!Shell::PowerShell.is_posix());
        assert_eq!(Shell::PowerShell.to_string(), "powershell");
    }

    #[test]
    fn test_command_deserializes_with_defaults() {
        let cmd: Command =
            serde_json::from_str(r#"{"id":"a","command":"ls","timeout":1500,"shell":"bash"}"#)
                .unwrap();
        assert_eq!(cmd.timeout, Duration::from_millis(1500));
        assert_eq!(cmd.shell, Shell::Bash);
        assert!(cmd.capture_output);
        assert!(cmd.env.is_empty());
    }
}

mod sandbox_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_memory, 500 * 1024 * 1024);
        assert_eq!(limits.max_cpu, 0.0);
        assert_eq!(limits.max_processes, 20);
        assert_eq!(limits.max_file_size, 100 * 1024 * 1024);
        assert_eq!(limits.max_open_files, 1024);
        assert_eq!(limits.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_sandbox_enabled_by_default() {
        let config = SandboxConfig::default();
        assert!(config.enabled);
        assert_eq!(config.network.mode, NetworkMode::Full);
        assert!(!SandboxConfig::disabled().enabled);
    }

    #[test]
    fn test_partial_sandbox_deserialization() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"network":{"mode":"none"},"resources":{"max_processes":5}}"#)
                .unwrap();
        assert!(config.enabled);
        assert_eq!(config.network.mode, NetworkMode::None);
        assert_eq!(config.resources.max_processes, 5);
        assert_eq!(config.resources.max_open_files, 1024);
    }
}

mod execution_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_result_state_derivation() {
        let mut result = ExecutionResult::new("r", "true");
        assert_eq!(result.state(), ExecutionState::Completed);
        assert!(result.success());

        result.exit_code = 3;
        assert_eq!(result.state(), ExecutionState::Failed);

        result.killed = true;
        assert_eq!(result.state(), ExecutionState::Killed);

        result.timed_out = true;
        assert_eq!(result.state(), ExecutionState::TimedOut);
        assert!(result.state().is_terminal());
    }

    #[test]
    fn test_state_display_matches_wire_name() {
        assert_eq!(ExecutionState::TimedOut.to_string(), "timed_out");
        assert_eq!(ExecutionState::Running.to_string(), "running");
        let wire = serde_json::to_string(&ExecutionState::TimedOut).unwrap();
        assert_eq!(wire, format!("\"{}\"", ExecutionState::TimedOut));
    }

    #[test]
    fn test_failed_result() {
        let result = ExecutionResult::failed("r", "nope", "spawn failed");
        assert_eq!(result.error.as_deref(), Some("spawn failed"));
        assert_eq!(result.state(), ExecutionState::Failed);
    }

    #[test]
    fn test_status_refresh_advances_duration() {
        let start = chrono::Utc::now() - chrono::Duration::milliseconds(250);
        let mut status = ExecutionStatus::running("s", "sleep 1", start, 42);
        assert_eq!(status.duration, Duration::ZERO);
        status.refresh();
        assert!(status.duration >= Duration::from_millis(250));
        assert!(!status.state.is_terminal());
    }

    #[test]
    fn test_truncation_detection() {
        let mut result = ExecutionResult::new("r", "yes");
        result.stdout = format!("y\ny\n{TRUNCATION_MARKER}");
        assert!(result.is_truncated());
    }
}

//! Tests for the resource sandbox.

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use warden_protocol::{NetworkMode, ResourceLimits, SandboxConfig};

use super::*;

mod validate_tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ResourceSandbox::validate(&SandboxConfig::default()).is_ok());
        assert!(ResourceSandbox::validate(&SandboxConfig::disabled()).is_ok());
    }

    #[test]
    fn test_negative_cpu_rejected() {
        let config = SandboxConfig::default().with_resources(ResourceLimits {
            max_cpu: -1.0,
            ..ResourceLimits::default()
        });
        let err = ResourceSandbox::validate(&config).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidLimit { field: "max_cpu", .. }));
    }

    #[test]
    fn test_non_finite_cpu_rejected() {
        let config = SandboxConfig::default().with_resources(ResourceLimits {
            max_cpu: f64::NAN,
            ..ResourceLimits::default()
        });
        assert!(ResourceSandbox::validate(&config).is_err());
    }

    #[test]
    fn test_traversal_in_paths_rejected() {
        let mut config = SandboxConfig::default();
        config.filesystem.read_only_paths.push(PathBuf::from("/srv/../etc"));
        assert!(matches!(
            ResourceSandbox::validate(&config),
            Err(SandboxError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_network_none_with_allowances_rejected() {
        let mut config = SandboxConfig::default().with_network_mode(NetworkMode::None);
        assert!(ResourceSandbox::validate(&config).is_ok());

        config.network.allowed_hosts.push("example.com".to_string());
        assert!(matches!(
            ResourceSandbox::validate(&config),
            Err(SandboxError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut config = SandboxConfig::default();
        config.network.allowed_ports = vec![443, 0];
        assert!(ResourceSandbox::validate(&config).is_err());
    }
}

mod apply_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disabled_is_noop() {
        let sandbox = ResourceSandbox::new();
        let mut cmd = tokio::process::Command::new("true");
        let applied = sandbox.apply(&SandboxConfig::disabled(), &mut cmd).unwrap();
        assert!(!applied.enabled);
        assert!(!applied.process_group);
        assert_eq!(applied.enforcement, Enforcement::DeclaredOnly);
    }

    #[test]
    fn test_default_backend_is_declared_only() {
        let sandbox = ResourceSandbox::default();
        assert_eq!(sandbox.backend_name(), "declared-only");

        let mut cmd = tokio::process::Command::new("true");
        let applied = sandbox.apply(&SandboxConfig::default(), &mut cmd).unwrap();
        assert!(applied.enabled);
        assert_eq!(applied.process_group, cfg!(unix));
        assert_eq!(applied.enforcement, Enforcement::DeclaredOnly);
    }

    #[test]
    fn test_invalid_config_fails_apply() {
        let sandbox = ResourceSandbox::new();
        let mut cmd = tokio::process::Command::new("true");
        let config = SandboxConfig::default().with_resources(ResourceLimits {
            max_cpu: -0.5,
            ..ResourceLimits::default()
        });
        assert!(sandbox.apply(&config, &mut cmd).is_err());
    }

    #[test]
    fn test_enforcement_display() {
        assert_eq!(Enforcement::DeclaredOnly.to_string(), "declared_only");
    }
}

#[cfg(unix)]
mod unix_tests {
    use std::sync::Arc;

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_root_dir_becomes_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = ResourceSandbox::new();
        let config = SandboxConfig::default().with_root_dir(dir.path());

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg("pwd -P");
        sandbox.apply(&config, &mut cmd).unwrap();

        let output = cmd.output().await.unwrap();
        let pwd = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(pwd), expected);
    }

    #[tokio::test]
    async fn test_child_leads_its_own_group() {
        let sandbox = ResourceSandbox::new();
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("5").kill_on_drop(true);
        sandbox.apply(&SandboxConfig::default(), &mut cmd).unwrap();

        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap() as libc::pid_t;
        let pgid = unsafe { libc::getpgid(pid) };
        child.kill().await.unwrap();
        assert_eq!(pgid, pid);
    }

    #[tokio::test]
    async fn test_rlimit_backend_enforces_open_files() {
        let sandbox = ResourceSandbox::with_backend(Arc::new(RlimitBackend::new()));
        let config = SandboxConfig::default().with_resources(ResourceLimits {
            max_memory: 0,
            max_processes: 0,
            max_file_size: 0,
            max_open_files: 64,
            ..ResourceLimits::default()
        });

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg("ulimit -n");
        let applied = sandbox.apply(&config, &mut cmd).unwrap();
        assert_eq!(applied.enforcement, Enforcement::Enforced);

        let output = cmd.output().await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "64");
    }

    #[test]
    fn test_rlimit_backend_without_limits_is_declared_only() {
        let backend = RlimitBackend::new();
        assert_eq!(backend.name(), "rlimit");
        let config = SandboxConfig::default().with_resources(ResourceLimits::unlimited());
        let mut cmd = tokio::process::Command::new("true");
        assert_eq!(backend.apply(&config, &mut cmd).unwrap(), Enforcement::DeclaredOnly);
    }
}

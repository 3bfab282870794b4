use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::config::{EngineConfig, LogFormat};
use crate::error::{ConfigError, SignalError};
use crate::signal::{ProcessInfo, ProcessRegistry, Signal, SignalTarget};
use crate::timeout::TimeoutManager;

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let hook = {
        let count = Arc::clone(&count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    };
    (count, hook)
}

mod timeout_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_defaults_and_clamps() {
        let timeouts = TimeoutManager::new(Duration::from_secs(30), Duration::from_secs(60));
        assert_eq!(timeouts.resolve(Duration::ZERO), Duration::from_secs(30));
        assert_eq!(timeouts.resolve(Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(timeouts.resolve(Duration::from_secs(600)), Duration::from_secs(60));

        let unbounded = TimeoutManager::new(Duration::from_secs(30), Duration::ZERO);
        assert_eq!(unbounded.resolve(Duration::from_secs(600)), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_fires_once_and_removes_itself() {
        let timeouts = TimeoutManager::new(Duration::from_secs(30), Duration::ZERO);
        let (count, hook) = counter();

        let armed = timeouts.start("t1", Duration::from_millis(50), hook);
        assert_eq!(armed, Duration::from_millis(50));
        assert!(timeouts.is_active("t1"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timeouts.is_active("t1"));
        assert_eq!(timeouts.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let timeouts = TimeoutManager::new(Duration::from_secs(30), Duration::ZERO);
        let (count, hook) = counter();

        timeouts.start("t1", Duration::from_millis(100), hook);
        assert!(timeouts.cancel("t1"));
        assert!(!timeouts.cancel("t1"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extend_pushes_deadline() {
        let timeouts = TimeoutManager::new(Duration::from_secs(30), Duration::ZERO);
        let (count, hook) = counter();

        timeouts.start("t1", Duration::from_millis(100), hook);
        assert!(timeouts.extend("t1", Duration::from_millis(500)));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(timeouts.is_active("t1"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_extend_unknown_id() {
        let timeouts = TimeoutManager::new(Duration::from_secs(30), Duration::ZERO);
        assert!(!timeouts.extend("missing", Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_zero_means_no_timer() {
        let timeouts = TimeoutManager::new(Duration::ZERO, Duration::ZERO);
        let (count, hook) = counter();

        assert_eq!(timeouts.start("t1", Duration::ZERO, hook), Duration::ZERO);
        assert!(!timeouts.is_active("t1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_replaces_previous_timer() {
        let timeouts = TimeoutManager::new(Duration::from_secs(30), Duration::ZERO);
        let (first, first_hook) = counter();
        let (second, second_hook) = counter();

        timeouts.start("t1", Duration::from_millis(50), first_hook);
        timeouts.start("t1", Duration::from_millis(100), second_hook);
        assert_eq!(timeouts.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}

mod signal_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::Term.name(), "SIGTERM");
        assert_eq!(Signal::Kill.name(), "SIGKILL");
        assert_eq!(Signal::Int.name(), "SIGINT");
        assert_eq!(Signal::Hup.name(), "SIGHUP");
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_numbers() {
        assert_eq!(Signal::Term.as_i32(), libc::SIGTERM);
        assert_eq!(Signal::Kill.as_i32(), libc::SIGKILL);
    }

    #[test]
    fn test_target_prefers_group() {
        let info = ProcessInfo::new(42, Some(42), "sleep 1");
        assert_eq!(info.target(), SignalTarget::Group(42));
        assert_eq!(info.target().to_string(), "process group 42");

        let info = ProcessInfo::new(42, None, "sleep 1");
        assert_eq!(info.target(), SignalTarget::Process(42));
        assert_eq!(info.target().to_string(), "process 42");
    }

    #[test]
    fn test_registry_bookkeeping() {
        let registry = ProcessRegistry::new();
        assert!(registry.is_empty());

        registry.register("a", ProcessInfo::new(1, None, "true"));
        registry.register("b", ProcessInfo::new(2, None, "true"));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let removed = registry.unregister("a");
        assert_eq!(removed.map(|info| info.pid), Some(1));
        assert!(registry.get("a").is_none());
        assert!(registry.unregister("a").is_none());
    }

    #[test]
    fn test_unregister_pid_ignores_reused_id() {
        let registry = ProcessRegistry::new();
        registry.register("job", ProcessInfo::new(200, Some(200), "sleep 1"));

        assert!(registry.unregister_pid("job", 100).is_none());
        assert_eq!(registry.get("job").map(|info| info.pid), Some(200));

        let removed = registry.unregister_pid("job", 200);
        assert_eq!(removed.map(|info| info.pid), Some(200));
        assert!(registry.is_empty());
        assert!(registry.unregister_pid("job", 200).is_none());
    }

    #[test]
    fn test_send_to_unknown_id() {
        let registry = ProcessRegistry::new();
        let err = registry.send("missing", Signal::Term).unwrap_err();
        assert!(matches!(err, SignalError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_unknown_id() {
        let registry = ProcessRegistry::new();
        let err = registry
            .graceful_shutdown("missing", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::NotFound(_)));
    }

    #[cfg(unix)]
    mod unix {
        use std::os::unix::process::ExitStatusExt;
        use std::time::Instant;

        use super::*;
        use pretty_assertions::assert_eq;

        /// Spawn `sleep 30` leading its own group and reap it in the
        /// background, unregistering once it is gone.
        fn spawn_sleeper(
            registry: &ProcessRegistry,
            id: &'static str,
        ) -> tokio::task::JoinHandle<std::process::ExitStatus> {
            let mut child = tokio::process::Command::new("sleep")
                .arg("30")
                .process_group(0)
                .kill_on_drop(true)
                .spawn()
                .unwrap();
            let pid = child.id().unwrap();
            registry.register(id, ProcessInfo::new(pid, Some(pid), "sleep 30"));

            let registry = registry.clone();
            tokio::spawn(async move {
                let status = child.wait().await.unwrap();
                registry.unregister(id);
                status
            })
        }

        #[tokio::test]
        async fn test_send_records_signal() {
            let registry = ProcessRegistry::new();
            let reaper = spawn_sleeper(&registry, "s1");

            registry.send("s1", Signal::Term).unwrap();
            assert_eq!(registry.get("s1").and_then(|i| i.signaled), Some(Signal::Term));

            let status = reaper.await.unwrap();
            assert_eq!(status.signal(), Some(libc::SIGTERM));
            assert!(!registry.contains("s1"));
        }

        #[tokio::test]
        async fn test_graceful_shutdown_terminates() {
            let registry = ProcessRegistry::new();
            let reaper = spawn_sleeper(&registry, "s1");

            let started = Instant::now();
            registry
                .graceful_shutdown("s1", Duration::from_secs(5))
                .await
                .unwrap();
            assert!(started.elapsed() < Duration::from_secs(3));

            let status = reaper.await.unwrap();
            assert_eq!(status.signal(), Some(libc::SIGTERM));
        }

        #[tokio::test]
        async fn test_kill_all() {
            let registry = ProcessRegistry::new();
            let first = spawn_sleeper(&registry, "k1");
            let second = spawn_sleeper(&registry, "k2");

            assert_eq!(registry.kill_all(), 2);
            assert_eq!(first.await.unwrap().signal(), Some(libc::SIGKILL));
            assert_eq!(second.await.unwrap().signal(), Some(libc::SIGKILL));
            assert!(registry.is_empty());
        }
    }
}

mod config_tests {
    use warden_policy::AllowlistMode;
    use warden_protocol::SandboxConfig;

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_presets_validate() {
        EngineConfig::default().validate().unwrap();
        EngineConfig::strict().validate().unwrap();
        EngineConfig::permissive().validate().unwrap();
    }

    #[test]
    fn test_strict_preset() {
        let config = EngineConfig::strict();
        let security = config.security.unwrap();
        assert_eq!(security.allowlist_mode, AllowlistMode::Strict);
        assert!(security.allowlist.contains(&"ls".to_string()));
        assert_eq!(config.max_concurrent, 3);
        assert!(config.audit_log);
        assert_eq!(config.sandbox.unwrap().resources.max_processes, 5);
    }

    #[test]
    fn test_permissive_preset() {
        let config = EngineConfig::permissive();
        assert!(!config.sandbox.unwrap().enabled);
        assert_eq!(config.max_concurrent, 50);
        assert_eq!(config.max_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_missing_sections() {
        let config = EngineConfig {
            security: None,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Missing("security"))));

        let config = EngineConfig {
            sandbox: None,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Missing("sandbox"))));
    }

    #[test]
    fn test_invalid_values() {
        let config = EngineConfig {
            max_concurrent: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig {
            default_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(10),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut sandbox = SandboxConfig::default();
        sandbox.resources.max_cpu = -1.0;
        let config = EngineConfig {
            sandbox: Some(sandbox),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Sandbox(_))));
    }

    #[test]
    fn test_audit_log_on_by_default() {
        assert!(EngineConfig::default().audit_log);
        assert!(EngineConfig::permissive().audit_log);
        assert!(EngineConfig::from_toml_str("max_concurrent = 2\n").unwrap().audit_log);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
max_concurrent = 4
default_timeout = 15000
max_timeout = 120000
audit_log = false

[env]
LANG = "C"

[security]
allowlist_mode = "strict"
allowlist = ["ls", "cat"]

[sandbox.resources]
max_processes = 10

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.default_timeout, Duration::from_secs(15));
        assert_eq!(config.max_timeout, Duration::from_secs(120));
        assert!(!config.audit_log);
        assert_eq!(config.env.get("LANG").map(String::as_str), Some("C"));

        let security = config.security.as_ref().unwrap();
        assert_eq!(security.allowlist_mode, AllowlistMode::Strict);
        assert_eq!(security.allowlist, vec!["ls".to_string(), "cat".to_string()]);

        let sandbox = config.sandbox.as_ref().unwrap();
        assert!(sandbox.enabled);
        assert_eq!(sandbox.resources.max_processes, 10);
        assert_eq!(sandbox.resources.max_open_files, 1024);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let err = EngineConfig::from_toml_str("[security]\nallowlist_mode = \"sometimes\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "max_concurrent = 2\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrent, 2);

        std::fs::write(&path, "max_concurrent = 0\n").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Invalid(_))));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(EngineConfig::load(&missing), Err(ConfigError::Io { .. })));
    }
}

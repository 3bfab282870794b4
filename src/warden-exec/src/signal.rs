//! Live process registry and signal routing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, warn};

use crate::error::SignalError;

/// Liveness polling interval used by [`ProcessRegistry::graceful_shutdown`].
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signals the engine can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// SIGTERM.
    Term,
    /// SIGKILL.
    Kill,
    /// SIGINT.
    Int,
    /// SIGHUP.
    Hup,
}

impl Signal {
    /// Get signal number.
    #[cfg(unix)]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Int => libc::SIGINT,
            Self::Hup => libc::SIGHUP,
        }
    }

    /// Get signal name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Int => "SIGINT",
            Self::Hup => "SIGHUP",
        }
    }
}

/// Where a signal is delivered.
///
/// Without a process group only the direct child is signaled and anything it
/// spawned may survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    Group(u32),
    Process(u32),
}

impl std::fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group(pgid) => write!(f, "process group {pgid}"),
            Self::Process(pid) => write!(f, "process {pid}"),
        }
    }
}

impl SignalTarget {
    #[cfg(unix)]
    fn raw(&self) -> libc::pid_t {
        match *self {
            Self::Group(pgid) => -(pgid as libc::pid_t),
            Self::Process(pid) => pid as libc::pid_t,
        }
    }

    /// Deliver `signal`.
    pub fn send(&self, signal: Signal) -> Result<(), SignalError> {
        #[cfg(unix)]
        {
            // SAFETY: kill(2) has no memory-safety preconditions.
            if unsafe { libc::kill(self.raw(), signal.as_i32()) } == -1 {
                return Err(SignalError::Send {
                    signal: signal.name(),
                    target: self.to_string(),
                    source: std::io::Error::last_os_error(),
                });
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            Err(SignalError::Unsupported)
        }
    }

    /// Non-blocking check: does anything still answer to this target?
    pub fn is_alive(&self) -> bool {
        #[cfg(unix)]
        {
            // SAFETY: signal 0 performs only the existence/permission check.
            if unsafe { libc::kill(self.raw(), 0) } == 0 {
                return true;
            }
            std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

/// Registry entry for a live execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Process group id, when the child leads its own group.
    pub pgid: Option<u32>,
    pub command: String,
    /// Last signal successfully delivered through the registry.
    pub signaled: Option<Signal>,
}

impl ProcessInfo {
    pub fn new(pid: u32, pgid: Option<u32>, command: impl Into<String>) -> Self {
        Self {
            pid,
            pgid,
            command: command.into(),
            signaled: None,
        }
    }

    pub fn target(&self) -> SignalTarget {
        match self.pgid {
            Some(pgid) => SignalTarget::Group(pgid),
            None => SignalTarget::Process(self.pid),
        }
    }
}

/// Concurrency-safe map of live executions to their processes.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: Arc<DashMap<String, ProcessInfo>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, info: ProcessInfo) {
        self.processes.insert(id.into(), info);
    }

    pub fn unregister(&self, id: &str) -> Option<ProcessInfo> {
        self.processes.remove(id).map(|(_, info)| info)
    }

    /// Remove the entry only if it still belongs to `pid`; a later
    /// execution may have reused the id.
    pub fn unregister_pid(&self, id: &str, pid: u32) -> Option<ProcessInfo> {
        self.processes
            .remove_if(id, |_, info| info.pid == pid)
            .map(|(_, info)| info)
    }

    pub fn get(&self, id: &str) -> Option<ProcessInfo> {
        self.processes.get(id).map(|entry| entry.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.processes.iter().map(|e| e.key().clone()).collect()
    }

    /// Signal the execution's process group, or the bare process when no
    /// group was established.
    pub fn send(&self, id: &str, signal: Signal) -> Result<(), SignalError> {
        let target = self
            .processes
            .get(id)
            .map(|entry| entry.target())
            .ok_or_else(|| SignalError::NotFound(id.to_string()))?;

        target.send(signal)?;
        debug!(id, %target, signal = signal.name(), "signal delivered");

        if let Some(mut entry) = self.processes.get_mut(id) {
            entry.signaled = Some(signal);
        }
        Ok(())
    }

    /// Force-kill every registered execution. Returns how many were signaled.
    pub fn kill_all(&self) -> usize {
        let mut killed = 0;
        for id in self.ids() {
            match self.send(&id, Signal::Kill) {
                Ok(()) => killed += 1,
                Err(e) => warn!(id = %id, error = %e, "kill failed"),
            }
        }
        killed
    }

    /// SIGTERM, then poll until the process is gone or `timeout` elapses,
    /// then SIGKILL.
    pub async fn graceful_shutdown(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<(), SignalError> {
        let target = self
            .get(id)
            .map(|info| info.target())
            .ok_or_else(|| SignalError::NotFound(id.to_string()))?;

        if let Err(e) = self.send(id, Signal::Term) {
            if !target.is_alive() {
                return Ok(());
            }
            return Err(e);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.contains(id) || !target.is_alive() {
                debug!(id, "process exited after SIGTERM");
                return Ok(());
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL.min(deadline - now)).await;
        }

        warn!(id, ?timeout, "process ignored SIGTERM, sending SIGKILL");
        match self.send(id, Signal::Kill) {
            Ok(()) => Ok(()),
            // Exited between the last check and the kill.
            Err(_) if !self.contains(id) || !target.is_alive() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

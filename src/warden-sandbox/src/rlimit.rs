//! POSIX resource limits applied in the child before `exec`.
//!
//! Covers memory (`RLIMIT_AS`), process count (`RLIMIT_NPROC`), file size
//! (`RLIMIT_FSIZE`) and open files (`RLIMIT_NOFILE`). CPU cores have no
//! rlimit equivalent and stay declared only.
//!
//! `RLIMIT_NPROC` counts every process of the real user, not just the
//! sandboxed tree, so a low limit can make the command fail to fork on a busy
//! account.

use tokio::process::Command;
use tracing::debug;
use warden_protocol::SandboxConfig;

use crate::{Enforcement, SandboxBackend, SandboxResult};

/// Limits to install, `None` meaning untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RlimitPlan {
    memory: Option<u64>,
    processes: Option<u64>,
    file_size: Option<u64>,
    open_files: Option<u64>,
}

impl RlimitPlan {
    fn from_config(config: &SandboxConfig) -> Self {
        let nonzero = |v: u64| (v > 0).then_some(v);
        let r = &config.resources;
        Self {
            memory: nonzero(r.max_memory),
            processes: nonzero(r.max_processes),
            file_size: nonzero(r.max_file_size),
            open_files: nonzero(r.max_open_files),
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Enforces resource limits with `setrlimit` in a pre-exec hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct RlimitBackend;

impl RlimitBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SandboxBackend for RlimitBackend {
    fn name(&self) -> &str {
        "rlimit"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn apply(&self, config: &SandboxConfig, command: &mut Command) -> SandboxResult<Enforcement> {
        let plan = RlimitPlan::from_config(config);
        if plan.is_empty() {
            return Ok(Enforcement::DeclaredOnly);
        }
        debug!(?plan, "installing rlimits");

        // SAFETY: the hook runs between fork and exec and only calls
        // getrlimit/setrlimit, which are async-signal-safe syscalls.
        unsafe {
            command.pre_exec(move || apply_rlimits(&plan));
        }
        Ok(Enforcement::Enforced)
    }
}

/// Lower both soft and hard limit to the value, never above the current
/// hard limit. A macro because the resource constant type differs between
/// libc targets.
macro_rules! set_limit {
    ($resource:expr, $value:expr) => {{
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `current` is a valid, writable rlimit.
        if unsafe { libc::getrlimit($resource, &mut current) } != 0 {
            return Err(std::io::Error::last_os_error());
        }

        #[allow(clippy::useless_conversion)]
        let wanted = $value as libc::rlim_t;
        let capped = if current.rlim_max == libc::RLIM_INFINITY {
            wanted
        } else {
            wanted.min(current.rlim_max)
        };
        let limit = libc::rlimit {
            rlim_cur: capped,
            rlim_max: capped,
        };
        // SAFETY: `limit` is a valid rlimit.
        if unsafe { libc::setrlimit($resource, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }};
}

fn apply_rlimits(plan: &RlimitPlan) -> std::io::Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    if let Some(v) = plan.memory {
        set_limit!(libc::RLIMIT_AS, v);
    }

    if let Some(v) = plan.processes {
        set_limit!(libc::RLIMIT_NPROC, v);
    }
    if let Some(v) = plan.file_size {
        set_limit!(libc::RLIMIT_FSIZE, v);
    }
    if let Some(v) = plan.open_files {
        set_limit!(libc::RLIMIT_NOFILE, v);
    }
    Ok(())
}

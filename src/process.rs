//! Worker process handles, liveness polling, and signal delivery.
//!
//! The registry and the gateway only ever need three operations on a worker:
//! spawn (see `launch`), `is_alive`, and `terminate`.

use std::process::Child;

use log::warn;

use crate::error::RegistryError;

/// Termination mode selected by the caller's command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// Graceful interrupt (SIGINT).
    Stop,
    /// Forced termination (SIGKILL).
    Kill,
}

/// Handle to a spawned worker child process.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Child,
}

impl WorkerHandle {
    pub fn new(child: Child) -> Self {
        WorkerHandle { child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Explicit liveness poll. A worker that has exited is reaped here.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn terminate(&mut self, mode: SignalMode) -> Result<(), RegistryError> {
        signal_pid(self.pid(), mode)?;
        if mode == SignalMode::Kill {
            let _ = self.child.wait();
        }
        Ok(())
    }
}

/// Deliver the termination signal to an arbitrary pid.
///
/// A failed delivery (typically a pid that already exited) is logged and
/// tolerated so that stale registry entries can still be reconciled.
#[cfg(unix)]
pub fn signal_pid(pid: u32, mode: SignalMode) -> Result<(), RegistryError> {
    let signal = match mode {
        SignalMode::Stop => libc::SIGINT,
        SignalMode::Kill => libc::SIGKILL,
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        warn!(
            "failed to signal pid {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn signal_pid(_pid: u32, _mode: SignalMode) -> Result<(), RegistryError> {
    Err(RegistryError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_handle_liveness_and_terminate() {
        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let mut handle = WorkerHandle::new(child);
        assert!(handle.is_alive());

        handle.terminate(SignalMode::Kill).unwrap();
        assert!(!handle.is_alive());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_dead_pid_is_tolerated() {
        // A pid far above any default pid_max; kill fails with ESRCH and the
        // failure is absorbed.
        signal_pid(4_999_999, SignalMode::Stop).unwrap();
    }
}

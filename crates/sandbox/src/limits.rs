//! Per-call resource budgets.
//!
//! The interpreter runs in-process, so limits are enforced cooperatively:
//! every statement and expression evaluation ticks an operation counter, and
//! the counter periodically checks elapsed run time and an abort flag that a
//! watchdog thread trips when the wall-clock deadline passes.

use crate::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const CHECK_INTERVAL: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_wall_time_ms")]
    pub max_wall_time_ms: u64,

    /// Busy time of the interpreter thread.
    #[serde(default = "default_max_cpu_time_ms")]
    pub max_cpu_time_ms: u64,

    /// Estimated bytes allocated for strings and collections.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,

    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_max_operations() -> u64 {
    100_000
}

fn default_max_wall_time_ms() -> u64 {
    10_000
}

fn default_max_cpu_time_ms() -> u64 {
    5_000
}

fn default_max_memory_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_call_depth() -> usize {
    10
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_wall_time_ms: default_max_wall_time_ms(),
            max_cpu_time_ms: default_max_cpu_time_ms(),
            max_memory_bytes: default_max_memory_bytes(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

/// Usage counters for one call.
#[derive(Debug)]
pub(crate) struct Budget {
    limits: ResourceLimits,
    operations: u64,
    allocated: u64,
    depth: usize,
    started: Instant,
    abort: Arc<AtomicBool>,
}

impl Budget {
    pub(crate) fn new(limits: ResourceLimits, abort: Arc<AtomicBool>) -> Self {
        Self {
            limits,
            operations: 0,
            allocated: 0,
            depth: 0,
            started: Instant::now(),
            abort,
        }
    }

    pub(crate) fn tick(&mut self) -> SandboxResult<()> {
        self.operations += 1;
        if self.operations > self.limits.max_operations {
            return Err(SandboxError::ResourceLimit(format!(
                "operation budget of {} exceeded",
                self.limits.max_operations
            )));
        }
        if self.operations % CHECK_INTERVAL == 0 {
            self.check_clock()?;
        }
        Ok(())
    }

    fn check_clock(&self) -> SandboxResult<()> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(SandboxError::ResourceLimit(format!(
                "wall time limit of {}ms exceeded",
                self.limits.max_wall_time_ms
            )));
        }
        if self.started.elapsed() > Duration::from_millis(self.limits.max_cpu_time_ms) {
            return Err(SandboxError::ResourceLimit(format!(
                "CPU time limit of {}ms exceeded",
                self.limits.max_cpu_time_ms
            )));
        }
        Ok(())
    }

    /// Account for a freshly built string or collection.
    pub(crate) fn charge(&mut self, bytes: usize) -> SandboxResult<()> {
        self.allocated = self.allocated.saturating_add(bytes as u64);
        if self.allocated > self.limits.max_memory_bytes {
            return Err(SandboxError::ResourceLimit(format!(
                "memory limit of {} bytes exceeded",
                self.limits.max_memory_bytes
            )));
        }
        Ok(())
    }

    pub(crate) fn enter_call(&mut self) -> SandboxResult<()> {
        if self.depth >= self.limits.max_call_depth {
            return Err(SandboxError::ResourceLimit(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_call_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn operations(&self) -> u64 {
        self.operations
    }
}

/// Background thread that trips the abort flag once the deadline passes.
/// Dropping the watchdog disarms it.
pub(crate) struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub(crate) fn arm(timeout: Duration, abort: Arc<AtomicBool>) -> Self {
        let (cancel, wait) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("sandbox-watchdog".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = wait.recv_timeout(timeout) {
                    abort.store(true, Ordering::Relaxed);
                }
            });
        match handle {
            Ok(handle) => Self {
                cancel: Some(cancel),
                handle: Some(handle),
            },
            Err(e) => {
                // Without a watchdog the CPU-time check still bounds the call.
                tracing::warn!(error = %e, "Failed to spawn sandbox watchdog");
                Self {
                    cancel: None,
                    handle: None,
                }
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(limits: ResourceLimits) -> Budget {
        Budget::new(limits, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let limits: ResourceLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits, ResourceLimits::default());
        assert_eq!(limits.max_call_depth, 10);
        assert_eq!(limits.max_memory_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_operation_budget() {
        let mut b = budget(ResourceLimits {
            max_operations: 3,
            ..Default::default()
        });
        assert!(b.tick().is_ok());
        assert!(b.tick().is_ok());
        assert!(b.tick().is_ok());
        assert!(b.tick().unwrap_err().is_resource_limit());
    }

    #[test]
    fn test_memory_and_depth() {
        let mut b = budget(ResourceLimits {
            max_memory_bytes: 10,
            max_call_depth: 1,
            ..Default::default()
        });
        assert!(b.charge(8).is_ok());
        assert!(b.charge(8).is_err());
        assert!(b.enter_call().is_ok());
        assert!(b.enter_call().is_err());
        b.exit_call();
        assert!(b.enter_call().is_ok());
    }

    #[test]
    fn test_watchdog_trips_abort_flag() {
        let abort = Arc::new(AtomicBool::new(false));
        let dog = Watchdog::arm(Duration::from_millis(10), abort.clone());
        std::thread::sleep(Duration::from_millis(50));
        assert!(abort.load(Ordering::Relaxed));
        drop(dog);

        let abort = Arc::new(AtomicBool::new(false));
        drop(Watchdog::arm(Duration::from_secs(60), abort.clone()));
        assert!(!abort.load(Ordering::Relaxed));
    }
}

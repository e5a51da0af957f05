//! Tiered diagnostic tracing for test modules.
//!
//! Tiers are ordered; each one includes everything below it:
//!
//! | tier        | emits                                                     |
//! |-------------|-----------------------------------------------------------|
//! | `Verbose`   | frame enter/exit with elapsed time                        |
//! | `Debug`     | plus every cluster command before it is issued            |
//! | `DebugAll`  | plus the call stack on entry, value dumps, safe-mode flips |
//!
//! All output goes through `tracing` at `DEBUG` under the
//! `k3s_validator::trace` target, so it respects the subscriber's filter.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

const TARGET: &str = "k3s_validator::trace";

/// Diagnostic tier selected on the command line.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TraceLevel {
    #[default]
    Off,
    Verbose,
    Debug,
    DebugAll,
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Verbose => "verbose",
            Self::Debug => "debug",
            Self::DebugAll => "debug-all",
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-scope tracer handle.
///
/// Clones share the call stack and safe-mode flag; [`Tracer::fork`] starts a
/// fresh stack for a concurrently running category.
#[derive(Debug, Clone)]
pub struct Tracer {
    level: TraceLevel,
    scope: Arc<str>,
    stack: Arc<Mutex<Vec<String>>>,
    safe_mode: Arc<AtomicBool>,
}

impl Tracer {
    pub fn new(level: TraceLevel) -> Self {
        Self {
            level,
            scope: Arc::from("main"),
            stack: Arc::default(),
            safe_mode: Arc::default(),
        }
    }

    /// Tracer that emits nothing.
    pub fn disabled() -> Self {
        Self::new(TraceLevel::Off)
    }

    /// Same tier, independent stack and safe-mode flag.
    pub fn fork(&self, scope: impl AsRef<str>) -> Self {
        Self {
            level: self.level,
            scope: Arc::from(scope.as_ref()),
            stack: Arc::default(),
            safe_mode: Arc::default(),
        }
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether output for `tier` is emitted.
    pub fn enabled(&self, tier: TraceLevel) -> bool {
        tier != TraceLevel::Off && self.level >= tier
    }

    /// Push a frame; it is popped when the guard drops.
    pub fn enter(&self, frame: impl Into<String>) -> FrameGuard {
        let frame = frame.into();
        let depth = {
            let mut stack = self.lock_stack();
            stack.push(frame.clone());
            stack.len()
        };

        if self.enabled(TraceLevel::Verbose) {
            tracing::debug!(target: TARGET, scope = %self.scope, frame = %frame, depth, "enter");
        }
        if self.enabled(TraceLevel::DebugAll) {
            tracing::debug!(
                target: TARGET,
                scope = %self.scope,
                stack = %self.call_stack().join(" > "),
                "call stack"
            );
        }

        FrameGuard {
            tracer: self.clone(),
            frame,
            started: Instant::now(),
        }
    }

    /// Echo a cluster command before it is issued.
    pub fn command(&self, operation: &str, args: fmt::Arguments<'_>) {
        if self.enabled(TraceLevel::Debug) {
            tracing::debug!(target: TARGET, scope = %self.scope, operation, args = %args, "command");
        }
    }

    /// Dump an intermediate value.
    pub fn dump(&self, name: &str, value: &dyn fmt::Debug) {
        if self.enabled(TraceLevel::DebugAll) {
            tracing::debug!(target: TARGET, scope = %self.scope, name, value = ?value, "dump");
        }
    }

    /// Suppress abort-on-error semantics until the guard drops.
    ///
    /// The flag is restored on every exit path, including unwinding.
    pub fn enter_safe_mode(&self) -> SafeModeGuard {
        let previous = self.safe_mode.swap(true, Ordering::SeqCst);
        if self.enabled(TraceLevel::DebugAll) {
            tracing::debug!(target: TARGET, scope = %self.scope, "safe mode on");
        }
        SafeModeGuard {
            tracer: self.clone(),
            previous,
        }
    }

    pub fn in_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    /// Snapshot of the frames currently entered, outermost first.
    pub fn call_stack(&self) -> Vec<String> {
        self.lock_stack().clone()
    }

    fn lock_stack(&self) -> MutexGuard<'_, Vec<String>> {
        // A panicking module may poison the lock; the stack itself stays valid.
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pops its frame on drop.
#[must_use = "the frame is popped as soon as the guard drops"]
pub struct FrameGuard {
    tracer: Tracer,
    frame: String,
    started: Instant,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        {
            let mut stack = self.tracer.lock_stack();
            if let Some(pos) = stack.iter().rposition(|f| *f == self.frame) {
                stack.remove(pos);
            }
        }
        if self.tracer.enabled(TraceLevel::Verbose) {
            tracing::debug!(
                target: TARGET,
                scope = %self.tracer.scope,
                frame = %self.frame,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "exit"
            );
        }
    }
}

/// Restores the previous safe-mode state on drop.
#[must_use = "safe mode ends as soon as the guard drops"]
pub struct SafeModeGuard {
    tracer: Tracer,
    previous: bool,
}

impl Drop for SafeModeGuard {
    fn drop(&mut self) {
        self.tracer.safe_mode.store(self.previous, Ordering::SeqCst);
        if self.tracer.enabled(TraceLevel::DebugAll) {
            tracing::debug!(target: TARGET, scope = %self.tracer.scope, "safe mode off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_cumulative() {
        let tracer = Tracer::new(TraceLevel::Debug);
        assert!(tracer.enabled(TraceLevel::Verbose));
        assert!(tracer.enabled(TraceLevel::Debug));
        assert!(!tracer.enabled(TraceLevel::DebugAll));
        assert!(!Tracer::disabled().enabled(TraceLevel::Verbose));
    }

    #[test]
    fn frames_nest_and_unwind() {
        let tracer = Tracer::new(TraceLevel::DebugAll);
        {
            let _outer = tracer.enter("run_category");
            {
                let _inner = tracer.enter("dns");
                assert_eq!(tracer.call_stack(), vec!["run_category", "dns"]);
            }
            assert_eq!(tracer.call_stack(), vec!["run_category"]);
        }
        assert!(tracer.call_stack().is_empty());
    }

    #[test]
    fn stack_is_tracked_even_when_tracing_is_off() {
        let tracer = Tracer::disabled();
        let _frame = tracer.enter("nodes");
        assert_eq!(tracer.call_stack(), vec!["nodes"]);
    }

    #[test]
    fn fork_has_independent_stack() {
        let tracer = Tracer::new(TraceLevel::Verbose);
        let _main = tracer.enter("main");
        let forked = tracer.fork("core");
        assert!(forked.call_stack().is_empty());
        assert_eq!(forked.scope(), "core");
        assert_eq!(forked.level(), TraceLevel::Verbose);
    }

    #[test]
    fn safe_mode_is_restored_on_drop() {
        let tracer = Tracer::new(TraceLevel::DebugAll);
        assert!(!tracer.in_safe_mode());
        {
            let _guard = tracer.enter_safe_mode();
            assert!(tracer.in_safe_mode());
            {
                let _nested = tracer.enter_safe_mode();
            }
            assert!(tracer.in_safe_mode());
        }
        assert!(!tracer.in_safe_mode());
    }

    #[test]
    fn safe_mode_is_restored_after_panic() {
        let tracer = Tracer::new(TraceLevel::Off);
        let inner = tracer.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.enter_safe_mode();
            let _frame = inner.enter("panicking");
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!tracer.in_safe_mode());
        assert!(tracer.call_stack().is_empty());
    }

    #[test]
    fn level_orders_and_displays() {
        assert!(TraceLevel::DebugAll > TraceLevel::Debug);
        assert!(TraceLevel::Verbose > TraceLevel::Off);
        assert_eq!(TraceLevel::DebugAll.to_string(), "debug-all");
    }
}

//! Middleware hooks around the sampler lifecycle.
//!
//! Diagnostics integrations (trace exporters, accelerator profilers, ...)
//! attach here instead of wrapping the sampler. Hooks run in registration
//! order; a panicking hook is contained and logged, never propagated into
//! the sampler.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Lifecycle hooks. Every method has a no-op default; implement only what
/// the integration needs.
pub trait Middleware: Send + Sync {
    /// Runs before the timer is armed.
    fn before_start(&self) {}

    /// Runs once the sampler has reached the started state.
    fn after_start(&self) {}

    /// Runs before the timer is disarmed.
    fn before_stop(&self) {}

    /// Runs once the sampler has reached the finished state.
    fn after_stop(&self) {}

    /// Post-process the folded dump. Returning `Some` replaces the current
    /// text for the rest of the chain; `None` keeps it.
    fn process_dump(&self, text: &str) -> Option<String> {
        let _ = text;
        None
    }
}

/// Ordered middleware chain.
#[derive(Default)]
pub(crate) struct MiddlewareChain {
    hooks: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub(crate) fn register(&mut self, hook: Arc<dyn Middleware>) {
        self.hooks.push(hook);
    }

    pub(crate) fn before_start(&self) {
        self.each("before_start", |m| m.before_start());
    }

    pub(crate) fn after_start(&self) {
        self.each("after_start", |m| m.after_start());
    }

    pub(crate) fn before_stop(&self) {
        self.each("before_stop", |m| m.before_stop());
    }

    pub(crate) fn after_stop(&self) {
        self.each("after_stop", |m| m.after_stop());
    }

    /// Thread `text` through every hook's `process_dump`.
    pub(crate) fn process_dump(&self, text: String) -> String {
        let mut current = text;
        for hook in &self.hooks {
            let result = catch_unwind(AssertUnwindSafe(|| hook.process_dump(&current)));
            match result {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(_) => log::warn!("middleware panicked in process_dump; hook skipped"),
            }
        }
        current
    }

    fn each(&self, hook_name: &str, call: impl Fn(&dyn Middleware)) {
        for hook in &self.hooks {
            if catch_unwind(AssertUnwindSafe(|| call(hook.as_ref()))).is_err() {
                log::warn!("middleware panicked in {hook_name}; hook skipped");
            }
        }
    }
}

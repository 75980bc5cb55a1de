//! The seam between the profiler and the runtime it observes.
//!
//! The embedding runtime implements [`RuntimeHost`]; everything the
//! sampler knows about threads, frames, and scheduling flows through this
//! trait. [`sim`] provides a scripted host for tests, demos, and the CLI's
//! scenario mode.

pub mod sim;

use crate::frame::Frame;

use std::time::Duration;

/// A snapshot of one live thread taken during a sample tick.
#[derive(Debug, Clone)]
pub struct ThreadStack {
    /// Runtime-assigned thread id.
    pub thread_id: u64,
    /// Thread name as shown in the folded output (`MainThread`, ...).
    pub name: String,
    /// Frame chain in caller-first order (root first, leaf last).
    pub frames: Vec<Frame>,
}

/// Capabilities the host runtime exposes to the sampler.
///
/// Implementations are shared across the sampler and the signal handler,
/// so every method must be callable from any thread.
pub trait RuntimeHost: Send + Sync + 'static {
    /// Snapshot every live thread's frame chain.
    ///
    /// Contract: the implementation holds the runtime's global execution
    /// lock while walking frames, so each tick observes a consistent set of
    /// top frames and no frame object is collected mid-walk. The returned
    /// stacks are detached copies; the lock is released before this method
    /// returns.
    fn snapshot_threads(&self) -> Vec<ThreadStack>;

    /// The runtime's cooperative thread-switch interval.
    fn switch_interval(&self) -> Duration;

    /// Adjust the cooperative thread-switch interval.
    fn set_switch_interval(&self, interval: Duration);

    /// Root of the runtime installation (focus-mode filtering).
    fn runtime_prefix(&self) -> String;

    /// Root of the third-party package directory (focus-mode filtering).
    fn package_prefix(&self) -> String;

    /// Where the profiler's own support code lives (self-filtering).
    fn profiler_prefix(&self) -> String;

    /// True once the runtime has begun tearing itself down; the sampler
    /// skips ticks past this point.
    fn is_finalizing(&self) -> bool {
        false
    }
}

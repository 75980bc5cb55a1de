//! Engine error types.

use crate::sampler::SamplerState;

/// Errors surfaced by the profiler core.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An operation was invoked in an incompatible sampler state.
    #[error("invalid sampler state: cannot {op} a {state} sampler")]
    StateViolation {
        /// The attempted operation.
        op: &'static str,
        /// The state the sampler was in.
        state: SamplerState,
    },

    /// Signal-driven sampling was started off the main thread.
    #[error("signal-driven sampling must be started from the main thread")]
    ThreadViolation,

    /// The selected signal already has a handler installed.
    #[error("signal {signal} is already in use by another handler")]
    HandlerConflict {
        /// The signal number that was found occupied.
        signal: i32,
    },

    /// A second sampler was installed in the same process.
    #[error("a sampler instance already exists in this process")]
    SamplerExists,

    /// The configuration could not be applied.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Reading or writing a profile artifact failed. A merge-wait timeout
    /// is deliberately not an error: it is reported on the save result.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A folded artifact could not be parsed back into a table.
    #[error("malformed folded line {line_no}: {line:?}")]
    FoldedFormat {
        /// 1-based line number within the input.
        line_no: usize,
        /// The offending line.
        line: String,
    },

    /// An environment operation ran before
    /// [`install`](crate::topology::env::install).
    #[error("the profiler environment is not installed")]
    NotInstalled,

    /// Signal-driven sampling is not available on this platform.
    #[error("signal-driven sampling is not supported on this platform")]
    Unsupported,
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

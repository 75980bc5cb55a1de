//! Process-topology orchestration.
//!
//! Profiling must follow the profiled program across every child-creation
//! path of the host runtime: `fork` (the timer is re-armed in the child),
//! `spawn` (the child argv is rewritten to boot the profiler first), and
//! `forkserver` (the server process arms profiling in the children it
//! forks). On stop, every process writes a folded artifact; the root waits
//! for its children's artifacts and merges them.

pub mod env;
pub mod exit;
pub mod saver;
pub mod spawn;

use crate::config::SessionConfig;

/// How this process relates to the profiled process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRole {
    /// The originating process.
    pub is_root: bool,
    /// Descendant created by `fork`.
    pub from_fork: bool,
    /// Descendant created by a profiled spawn.
    pub from_mp: bool,
    /// The child-creation server process; it does not sample itself but
    /// arms profiling in its forked children.
    pub forkserver: bool,
}

impl ProcessRole {
    /// The role of a freshly launched root process.
    pub fn root() -> Self {
        Self {
            is_root: true,
            from_fork: false,
            from_mp: false,
            forkserver: false,
        }
    }

    /// Derive the role from a session's flags: a process launched with
    /// `--mp` or `--fork-server` is never the root.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            is_root: !(config.mp || config.fork_server),
            from_fork: false,
            from_mp: config.mp,
            forkserver: config.fork_server,
        }
    }
}

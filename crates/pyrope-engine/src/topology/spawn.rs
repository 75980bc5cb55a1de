//! Spawn-path argv rewriting.
//!
//! When the host runtime spawns a fresh interpreter for a child process,
//! the orchestrator rewrites the child's argv so the interpreter boots the
//! profiler module first, hands it the parent's effective configuration,
//! and only then runs the original command. The host exposes its spawn
//! routine through [`SpawnStrategy`]; [`SpawnInterceptor`] wraps any
//! implementation of it.

use crate::topology::env;

use std::io;

/// Token separating profiler arguments from the wrapped command's own
/// trailing arguments.
pub const CMD_SEPARATOR: &str = "--";

/// Module name the rewritten argv asks the child interpreter to run.
pub const PROFILER_MODULE: &str = "pyrope";

/// What a rewrite decided about one spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnRewrite {
    /// Argv was not recognised; the child runs unprofiled.
    Unchanged,
    /// A regular spawn; the child will report back for merging.
    Spawn,
    /// The child-creation server; its descendants sample but are never
    /// merged back.
    ForkServer,
}

/// Rewrite a child interpreter argv of the shape `... -c <cmd> [rest...]`.
///
/// `profiler_args` is the parent's effective configuration serialised as
/// CLI tokens. Unrecognised shapes (no `-c`, a resource-tracker command)
/// pass through untouched; the child simply runs without profiling.
pub fn rewrite_spawn_argv(
    argv: &[String],
    profiler_args: &[String],
) -> (Vec<String>, SpawnRewrite) {
    let Some(idx) = argv.iter().position(|a| a == "-c") else {
        return (argv.to_vec(), SpawnRewrite::Unchanged);
    };
    let Some(cmd) = argv.get(idx + 1) else {
        return (argv.to_vec(), SpawnRewrite::Unchanged);
    };

    let (injected, kind): (&[&str], SpawnRewrite) = if cmd.contains("forkserver") {
        // The server process itself must not sample; --no-merge because its
        // children cannot report back through it.
        (
            &["-m", PROFILER_MODULE, "--fork-server", "--no-merge"],
            SpawnRewrite::ForkServer,
        )
    } else if !cmd.contains("resource_tracker") {
        (&["-m", PROFILER_MODULE, "--mp"], SpawnRewrite::Spawn)
    } else {
        return (argv.to_vec(), SpawnRewrite::Unchanged);
    };

    let mut rewritten: Vec<String> = argv[..idx].to_vec();
    rewritten.extend(injected.iter().map(|s| s.to_string()));
    rewritten.extend(profiler_args.iter().cloned());
    rewritten.extend(argv[idx..idx + 2].iter().cloned());
    let rest = &argv[idx + 2..];
    if !rest.is_empty() {
        rewritten.push(CMD_SEPARATOR.to_string());
        rewritten.extend(rest.iter().cloned());
    }
    (rewritten, kind)
}

/// The host runtime's child-spawn routine.
pub trait SpawnStrategy: Send + Sync {
    /// Launch `path` with `argv`; returns the child pid.
    fn spawn(&self, path: &str, argv: &[String]) -> io::Result<u32>;
}

/// Wraps a [`SpawnStrategy`] so every recognised spawn boots the profiler
/// in the child and is counted against the installed sampler.
pub struct SpawnInterceptor<S> {
    inner: S,
}

impl<S: SpawnStrategy> SpawnInterceptor<S> {
    /// Wrap a spawn strategy.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Unwrap, restoring the original strategy.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: SpawnStrategy> SpawnStrategy for SpawnInterceptor<S> {
    fn spawn(&self, path: &str, argv: &[String]) -> io::Result<u32> {
        let Some(config) = env::config() else {
            log::debug!("no profiler environment installed; spawn passes through");
            return self.inner.spawn(path, argv);
        };

        let (rewritten, kind) = rewrite_spawn_argv(argv, &config.to_cli_args());
        match kind {
            SpawnRewrite::Spawn => {
                if let Some(sampler) = env::sampler() {
                    sampler.incr_child_cnt();
                }
            }
            SpawnRewrite::ForkServer => {
                log::warn!(
                    "forkserver detected: child processes will be profiled \
                     but their flame graphs will not be merged"
                );
            }
            SpawnRewrite::Unchanged => {
                log::debug!("unrecognised spawn argv shape; left untouched");
            }
        }
        self.inner.spawn(path, &rewritten)
    }
}

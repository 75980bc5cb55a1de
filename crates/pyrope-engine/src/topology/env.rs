//! The process-wide profiler environment.
//!
//! Exactly one sampler drives a process. [`install`] creates it, wires the
//! fork hooks and the exit guard, and hands back a shared handle;
//! [`finalize`] stops it and writes the artifacts; [`teardown`] releases
//! the singleton. All three take the same environment lock, so state is
//! observed atomically.

use crate::config::SessionConfig;
use crate::error::{EngineError, Result};
use crate::runtime::RuntimeHost;
use crate::sampler::Sampler;
use crate::topology::saver::{ProfileSaver, SaveReport};
use crate::topology::{exit, ProcessRole};

use parking_lot::Mutex;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct EnvState {
    sampler: Arc<Sampler>,
    config: SessionConfig,
}

static ENVIRONMENT: Mutex<Option<EnvState>> = Mutex::new(None);

/// The fork hooks cannot be unregistered, so they are installed at most
/// once per process and consult the current environment on each firing.
static FORK_HOOKS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Create the process's sampler from a session configuration and install
/// the topology hooks. Fails with *sampler-exists* if an environment is
/// already installed.
pub fn install(host: Arc<dyn RuntimeHost>, config: SessionConfig) -> Result<Arc<Sampler>> {
    let mut env = ENVIRONMENT.lock();
    if env.is_some() {
        return Err(EngineError::SamplerExists);
    }

    let mut config = config;
    config.sampler.normalize();
    let role = ProcessRole::from_config(&config);
    let sampler = Arc::new(Sampler::worker_with_role(
        host,
        config.sampler.clone(),
        role,
    )?);

    install_fork_hooks();
    exit::activate();

    *env = Some(EnvState {
        sampler: sampler.clone(),
        config,
    });
    Ok(sampler)
}

/// The installed sampler, if any.
pub fn sampler() -> Option<Arc<Sampler>> {
    ENVIRONMENT.lock().as_ref().map(|env| env.sampler.clone())
}

/// The installed session configuration, if any.
pub fn config() -> Option<SessionConfig> {
    ENVIRONMENT.lock().as_ref().map(|env| env.config.clone())
}

/// Release the singleton and deactivate the exit guard. The sampler keeps
/// living for as long as callers hold handles to it.
pub fn teardown() {
    exit::deactivate();
    *ENVIRONMENT.lock() = None;
}

/// Stop the installed sampler (a forkserver process never started it) and,
/// when `save` is set, write the per-role artifacts. Releases the
/// singleton afterwards.
pub fn finalize(save: bool) -> Result<Option<SaveReport>> {
    let (sampler, config) = {
        let env = ENVIRONMENT.lock();
        match env.as_ref() {
            Some(state) => (state.sampler.clone(), state.config.clone()),
            None => return Err(EngineError::NotInstalled),
        }
    };

    let mut report = None;
    if sampler.started() {
        sampler.stop()?;
        if save {
            report = Some(ProfileSaver::new(&sampler, &config).save()?);
        }
    }
    teardown();
    Ok(report)
}

/// Stop and save with the installed configuration, without releasing the
/// environment. Used by the exit guard.
pub fn save_now() -> Result<SaveReport> {
    let (sampler, config) = {
        let env = ENVIRONMENT.lock();
        match env.as_ref() {
            Some(state) => (state.sampler.clone(), state.config.clone()),
            None => return Err(EngineError::NotInstalled),
        }
    };
    ProfileSaver::new(&sampler, &config).save()
}

// ── Fork hooks ─────────────────────────────────────────────────────────

fn install_fork_hooks() {
    if FORK_HOOKS_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    #[cfg(unix)]
    unsafe {
        libc::pthread_atfork(
            Some(fork_prepare_hook),
            Some(fork_parent_hook),
            Some(fork_child_hook),
        );
    }
}

#[cfg(unix)]
unsafe extern "C" fn fork_prepare_hook() {
    // Nothing to quiesce: the aggregation table is consistent between
    // ticks and the child rebuilds its engine anyway.
}

#[cfg(unix)]
unsafe extern "C" fn fork_parent_hook() {
    handle_fork_in_parent();
}

#[cfg(unix)]
unsafe extern "C" fn fork_child_hook() {
    handle_fork_in_child();
}

/// After-fork bookkeeping on the parent side: one more child is expected
/// to report a folded artifact.
pub fn handle_fork_in_parent() {
    if let Some(sampler) = sampler() {
        sampler.incr_child_cnt();
    }
}

/// After-fork bookkeeping on the child side: inherited samples belong to
/// the parent, the inherited timer is gone, and the child is a descendant
/// from here on. A forkserver process finally starts sampling here, in
/// its children.
pub fn handle_fork_in_child() {
    let Some(sampler) = sampler() else {
        return;
    };
    sampler.clear();
    if sampler.started() {
        if let Err(err) = sampler.restart_in_child() {
            log::warn!("failed to re-arm sampler after fork: {err}");
        }
    }
    sampler.reset_child_cnt();
    sampler.set_from_fork(true);
    if sampler.is_root() {
        sampler.set_is_root(false);
    }
    if sampler.forkserver() {
        if let Err(err) = sampler.start_in_child() {
            log::warn!("failed to start sampler in forkserver child: {err}");
        }
        sampler.set_forkserver(false);
    }
}

//! Early-exit flushing.
//!
//! A process that terminates while its sampler is still running would lose
//! every sample since the last save. The exit guard hooks process exit so
//! a final stop + save happens anyway. Registration with the C runtime is
//! permanent, so the callback is gated on an active flag that
//! [`deactivate`] clears, the scoped-resource equivalent of swapping the
//! wrappers back out.

use crate::topology::env;

use std::sync::atomic::{AtomicBool, Ordering};

static GUARD_ACTIVE: AtomicBool = AtomicBool::new(false);
static GUARD_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Arm the exit guard for the current environment.
pub fn activate() {
    GUARD_ACTIVE.store(true, Ordering::SeqCst);
    if GUARD_REGISTERED.swap(true, Ordering::SeqCst) {
        return;
    }
    #[cfg(unix)]
    unsafe {
        libc::atexit(exit_flush_hook);
    }
}

/// Disarm the guard; the registered callback becomes a no-op.
pub fn deactivate() {
    GUARD_ACTIVE.store(false, Ordering::SeqCst);
}

/// True while the guard would flush on exit.
pub fn is_active() -> bool {
    GUARD_ACTIVE.load(Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn exit_flush_hook() {
    flush_profile();
}

/// Stop a still-running sampler and write its artifacts. Errors are
/// logged: the process is exiting and has nowhere to surface them.
pub fn flush_profile() {
    if !GUARD_ACTIVE.load(Ordering::SeqCst) {
        return;
    }
    let Some(sampler) = env::sampler() else {
        return;
    };
    if !sampler.started() {
        return;
    }
    log::debug!("process exiting with a running sampler; flushing profile");
    if let Err(err) = sampler.stop() {
        log::warn!("exit flush: stop failed: {err}");
        return;
    }
    if let Err(err) = env::save_now() {
        log::warn!("exit flush: save failed: {err}");
    }
}

/// Terminate the process through the guard: flush, then exit with `code`.
pub fn exit_process(code: i32) -> ! {
    flush_profile();
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_deactivate_round_trip() {
        activate();
        assert!(is_active());
        deactivate();
        assert!(!is_active());
        // Inactive guard never touches the environment.
        flush_profile();
    }
}

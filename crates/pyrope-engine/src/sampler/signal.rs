//! Signal-driven sampling engine (unix).
//!
//! Arms a per-process interval timer whose expiry delivers a signal to the
//! main thread; the handler runs the shared tick in place of the
//! interrupted instruction. The cpu timer source uses `ITIMER_PROF` +
//! SIGPROF (fires only while the process accumulates on-CPU time), the
//! wall source `ITIMER_REAL` + SIGALRM.
//!
//! Handler constraints: no blocking I/O, no unrelated locks, bail out once
//! the runtime is finalising (checked inside the shared tick).

use crate::config::TimerSource;
use crate::error::{EngineError, Result};
use crate::sampler::SamplerShared;

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The shared state the handler ticks against. Null while no signal
/// engine is armed. The pointee is owned by the engine that published it
/// and stays alive until `shutdown` clears the pointer.
static SIGNAL_TARGET: AtomicPtr<SamplerShared> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn handle_timer(_signal: libc::c_int) {
    let target = SIGNAL_TARGET.load(Ordering::Acquire);
    if !target.is_null() {
        // SAFETY: published by arm(); the owning engine keeps the
        // allocation alive until it swaps the pointer back to null.
        unsafe { (*target).on_tick() }
    }
}

pub(crate) struct SignalEngine {
    shared: Arc<SamplerShared>,
    armed: AtomicBool,
}

impl SignalEngine {
    pub(crate) fn new(shared: Arc<SamplerShared>) -> Self {
        Self {
            shared,
            armed: AtomicBool::new(false),
        }
    }

    fn selection(&self) -> (libc::c_int, libc::c_int) {
        match self.shared.config.timer_source {
            TimerSource::Cpu => (libc::ITIMER_PROF, libc::SIGPROF),
            TimerSource::Wall => (libc::ITIMER_REAL, libc::SIGALRM),
        }
    }

    /// Install the handler and arm the interval timer.
    ///
    /// Preconditions: must run on the main thread, the selected signal
    /// must carry no foreign handler, and no other signal engine may be
    /// armed in this process.
    pub(crate) fn arm(&self) -> Result<()> {
        if !is_main_thread() {
            return Err(EngineError::ThreadViolation);
        }
        let (_, signal) = self.selection();
        if !SIGNAL_TARGET.load(Ordering::Acquire).is_null() {
            return Err(EngineError::HandlerConflict { signal });
        }

        unsafe {
            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signal, std::ptr::null(), &mut previous) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if previous.sa_sigaction != libc::SIG_DFL && previous.sa_sigaction != libc::SIG_IGN {
                return Err(EngineError::HandlerConflict { signal });
            }

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_timer as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }

        // Publish the tick target before the first expiry. The pointer
        // borrows from self.shared, which outlives the armed window.
        SIGNAL_TARGET.store(
            Arc::as_ptr(&self.shared) as *mut SamplerShared,
            Ordering::Release,
        );

        if let Err(err) = self.set_timer(self.shared.config.interval()) {
            SIGNAL_TARGET.store(std::ptr::null_mut(), Ordering::Release);
            install_ignore(signal);
            return Err(err);
        }
        self.armed.store(true, Ordering::Release);
        Ok(())
    }

    /// Disarm the timer; the handler stays installed for resume.
    pub(crate) fn pause(&self) -> Result<()> {
        self.set_timer(Duration::ZERO)
    }

    pub(crate) fn resume(&self) -> Result<()> {
        self.set_timer(self.shared.config.interval())
    }

    /// Disarm, ignore further deliveries, and unpublish the tick target.
    pub(crate) fn shutdown(&self) {
        if !self.armed.swap(false, Ordering::AcqRel) {
            return;
        }
        let (_, signal) = self.selection();
        let _ = self.set_timer(Duration::ZERO);
        install_ignore(signal);
        SIGNAL_TARGET.store(std::ptr::null_mut(), Ordering::Release);
    }

    /// Interval timers do not survive `fork`; the handler and the
    /// published target do. Re-arming is just restarting the timer.
    pub(crate) fn rearm_in_child(&self) -> Result<()> {
        self.set_timer(self.shared.config.interval())
    }

    fn set_timer(&self, interval: Duration) -> Result<()> {
        let (which, _) = self.selection();
        let tv = libc::timeval {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_usec: interval.subsec_micros() as libc::suseconds_t,
        };
        let timer = libc::itimerval {
            it_interval: tv,
            it_value: tv,
        };
        if unsafe { libc::setitimer(which, &timer, std::ptr::null_mut()) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Drop for SignalEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn install_ignore(signal: libc::c_int) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut action.sa_mask);
        let _ = libc::sigaction(signal, &action, std::ptr::null_mut());
    }
}

#[cfg(target_os = "linux")]
fn is_main_thread() -> bool {
    // On Linux the main thread's tid equals the pid.
    unsafe { libc::syscall(libc::SYS_gettid) == libc::c_long::from(libc::getpid()) }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_main_thread() -> bool {
    unsafe { libc::pthread_main_np() != 0 }
}

#[cfg(test)]
mod tests {
    use crate::config::SamplerConfig;
    use crate::error::EngineError;
    use crate::runtime::sim::SimRuntime;
    use crate::sampler::Sampler;

    use std::sync::Arc;

    #[test]
    fn test_signal_start_off_main_thread_is_rejected() {
        // The test harness runs each test on its own thread, never the
        // process main thread, so the precondition trips reliably.
        let sampler = Sampler::signal(Arc::new(SimRuntime::new()), SamplerConfig::default()).unwrap();
        match sampler.start() {
            Err(EngineError::ThreadViolation) => {}
            other => panic!("expected thread violation, got {other:?}"),
        }
    }
}

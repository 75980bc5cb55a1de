//! Worker-thread sampling engine.
//!
//! A dedicated thread parks on a condvar with a per-interval deadline,
//! then runs the shared tick. Pause, resume, and shutdown are flag flips
//! plus a notify; the loop re-checks the flags after every wakeup, so
//! `stop()` completes within one interval plus epsilon.

use crate::error::Result;
use crate::sampler::SamplerShared;

use parking_lot::{Condvar, Mutex};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Flags {
    paused: bool,
    shutdown: bool,
}

struct Control {
    flags: Mutex<Flags>,
    notify: Condvar,
}

pub(crate) struct WorkerEngine {
    shared: Arc<SamplerShared>,
    control: Arc<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerEngine {
    pub(crate) fn new(shared: Arc<SamplerShared>) -> Self {
        Self {
            shared,
            control: Arc::new(Control {
                flags: Mutex::new(Flags::default()),
                notify: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sampling thread.
    pub(crate) fn arm(&self) -> Result<()> {
        *self.control.flags.lock() = Flags::default();
        let shared = self.shared.clone();
        let control = self.control.clone();
        let handle = thread::Builder::new()
            .name("pyrope-sampler".to_string())
            .spawn(move || run_loop(shared, control))?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn pause(&self) {
        self.control.flags.lock().paused = true;
        self.control.notify.notify_one();
    }

    pub(crate) fn resume(&self) {
        self.control.flags.lock().paused = false;
        self.control.notify.notify_one();
    }

    /// Stop the thread and wait for it to observe the flag. Bounded: the
    /// loop wakes at least once per interval, so the join polls for one
    /// interval plus a grace period before detaching.
    pub(crate) fn shutdown(&self) {
        self.control.flags.lock().shutdown = true;
        self.control.notify.notify_one();

        if let Some(handle) = self.handle.lock().take() {
            let limit = self.shared.config.interval() + Duration::from_millis(100);
            let begin = Instant::now();
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    return;
                }
                if begin.elapsed() > limit {
                    log::warn!("sampling thread did not stop in time; detaching");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// After a fork the sampling thread exists only in the parent. The
    /// stale handle is dropped (never joined: that thread id is gone) and
    /// a fresh thread is spawned for the child.
    pub(crate) fn rearm_in_child(&self) -> Result<()> {
        drop(self.handle.lock().take());
        self.arm()
    }
}

fn run_loop(shared: Arc<SamplerShared>, control: Arc<Control>) {
    let interval = shared.config.interval();
    loop {
        {
            let mut flags = control.flags.lock();
            if flags.shutdown {
                break;
            }
            if flags.paused {
                control.notify.wait(&mut flags);
                continue;
            }
            // Timed park; pause/shutdown notifications cut it short.
            let deadline = Instant::now() + interval;
            while !flags.shutdown && !flags.paused {
                if control.notify.wait_until(&mut flags, deadline).timed_out() {
                    break;
                }
            }
            if flags.shutdown {
                break;
            }
            if flags.paused {
                continue;
            }
        }
        shared.on_tick();
    }
}

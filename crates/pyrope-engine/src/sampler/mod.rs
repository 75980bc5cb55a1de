//! The sampler: state machine, shared tick logic, and the two engines.
//!
//! Two deployment modes drive the same core algorithm: a signal-driven
//! engine (`setitimer` + SIGPROF/SIGALRM, unix only) and a worker-thread
//! engine (a dedicated named thread on a condvar-timed loop) for platforms
//! without per-process interval timers.

mod worker;

#[cfg(unix)]
mod signal;

use crate::config::SamplerConfig;
use crate::error::{EngineError, Result};
use crate::folded::StackTable;
use crate::frame::FrameFilters;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::runtime::RuntimeHost;
use crate::topology::ProcessRole;

use parking_lot::{Mutex, ReentrantMutex};

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle states of a sampler.
///
/// ```text
/// INITIALIZED -> STARTED <-> PAUSED
///                   \          /
///                    v        v
///                     FINISHED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Constructed, timer not yet armed.
    Initialized,
    /// Actively sampling.
    Started,
    /// Timer disarmed, table retained.
    Paused,
    /// Stopped for good; no transitions out.
    Finished,
}

impl std::fmt::Display for SamplerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SamplerState::Initialized => "initialized",
            SamplerState::Started => "started",
            SamplerState::Paused => "paused",
            SamplerState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Counters accumulated across a sampler's life.
#[derive(Debug, Clone, Copy)]
pub struct SamplerMetrics {
    /// Completed sample ticks.
    pub samples: u64,
    /// Time spent inside tick processing, in microseconds.
    pub acc_sampling_us: u64,
    /// Monotonic start timestamp (microseconds since sampler creation).
    pub start_us: u64,
    /// Monotonic stop timestamp; 0 while still running.
    pub end_us: u64,
}

impl SamplerMetrics {
    /// Share of the sampler's life spent inside tick processing.
    pub fn sampling_rate(&self) -> f64 {
        let life = self.end_us.saturating_sub(self.start_us);
        if life == 0 {
            return 0.0;
        }
        self.acc_sampling_us as f64 / life as f64
    }
}

/// State shared between the public handle, the engines, and the signal
/// handler.
pub(crate) struct SamplerShared {
    pub(crate) config: SamplerConfig,
    filters: FrameFilters,
    host: Arc<dyn RuntimeHost>,
    /// Transitions are observed atomically under this re-entrant lock.
    state: ReentrantMutex<Cell<SamplerState>>,
    table: Mutex<StackTable>,
    middleware: Mutex<MiddlewareChain>,
    epoch: Instant,
    acc_sampling_us: AtomicU64,
    start_us: AtomicU64,
    end_us: AtomicU64,
    saved_switch_interval: Mutex<Option<Duration>>,

    // Mutable process-role state, adjusted by the fork hooks.
    is_root: AtomicBool,
    from_fork: AtomicBool,
    from_mp: AtomicBool,
    forkserver: AtomicBool,
    child_cnt: AtomicU32,
}

impl SamplerShared {
    /// One sample tick: snapshot every thread under the runtime's
    /// execution lock, then canonicalise and fold outside it. Errors are
    /// logged and swallowed; sampling must be robust.
    pub(crate) fn on_tick(&self) {
        if self.host.is_finalizing() {
            return;
        }
        let t0 = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let stacks = self.host.snapshot_threads();
            if stacks.is_empty() {
                log::debug!("sample tick observed no live threads");
            }
            // try_lock: in signal-driven mode the handler may interrupt a
            // reader holding the table on this very thread; blocking here
            // would deadlock. Losing one tick is fine, losing the thread
            // is not.
            let Some(mut table) = self.table.try_lock() else {
                log::debug!("aggregation table busy; tick skipped");
                return;
            };
            for stack in &stacks {
                let frames = self.filters.canonical_stack(&stack.frames);
                table.fold(&stack.name, &frames);
            }
            table.record_tick();
        }));
        if outcome.is_err() {
            log::warn!("sample tick failed; skipped");
        }
        self.acc_sampling_us
            .fetch_add(t0.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    fn elapsed_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Make sure the runtime actually schedules other threads between our
    /// samples: if the sampling interval is not at least 4x shorter than
    /// the cooperative switch interval, tighten the switch interval.
    /// Reversed by [`restore_switch_interval`](Self::restore_switch_interval).
    fn adjust_switch_interval(&self) {
        let interval = self.config.interval();
        let switch = self.host.switch_interval();
        if interval < switch * 4 {
            *self.saved_switch_interval.lock() = Some(switch);
            self.host.set_switch_interval(interval / 4);
        }
    }

    fn restore_switch_interval(&self) {
        if let Some(previous) = self.saved_switch_interval.lock().take() {
            self.host.set_switch_interval(previous);
        }
    }
}

enum Engine {
    Worker(worker::WorkerEngine),
    #[cfg(unix)]
    Signal(signal::SignalEngine),
}

impl Engine {
    fn arm(&self) -> Result<()> {
        match self {
            Engine::Worker(e) => e.arm(),
            #[cfg(unix)]
            Engine::Signal(e) => e.arm(),
        }
    }

    fn pause(&self) -> Result<()> {
        match self {
            Engine::Worker(e) => {
                e.pause();
                Ok(())
            }
            #[cfg(unix)]
            Engine::Signal(e) => e.pause(),
        }
    }

    fn resume(&self) -> Result<()> {
        match self {
            Engine::Worker(e) => {
                e.resume();
                Ok(())
            }
            #[cfg(unix)]
            Engine::Signal(e) => e.resume(),
        }
    }

    fn shutdown(&self) {
        match self {
            Engine::Worker(e) => e.shutdown(),
            #[cfg(unix)]
            Engine::Signal(e) => e.shutdown(),
        }
    }

    fn rearm_in_child(&self) -> Result<()> {
        match self {
            Engine::Worker(e) => e.rearm_in_child(),
            #[cfg(unix)]
            Engine::Signal(e) => e.rearm_in_child(),
        }
    }
}

/// A statistical sampler bound to one runtime host.
///
/// At most one sampler should drive a process; the process-wide singleton
/// is enforced by [`topology::env::install`](crate::topology::env::install),
/// the public entry point.
pub struct Sampler {
    shared: Arc<SamplerShared>,
    engine: Engine,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").finish_non_exhaustive()
    }
}

impl Sampler {
    /// Create a worker-thread sampler.
    pub fn worker(host: Arc<dyn RuntimeHost>, config: SamplerConfig) -> Result<Self> {
        Self::worker_with_role(host, config, ProcessRole::root())
    }

    /// Create a worker-thread sampler with an explicit process role.
    pub fn worker_with_role(
        host: Arc<dyn RuntimeHost>,
        config: SamplerConfig,
        role: ProcessRole,
    ) -> Result<Self> {
        let shared = Self::build_shared(host, config, role)?;
        let engine = Engine::Worker(worker::WorkerEngine::new(shared.clone()));
        Ok(Self { shared, engine })
    }

    /// Create a signal-driven sampler. Its `start` must be invoked on the
    /// main thread and the selected signal must be unclaimed.
    #[cfg(unix)]
    pub fn signal(host: Arc<dyn RuntimeHost>, config: SamplerConfig) -> Result<Self> {
        let shared = Self::build_shared(host, config, ProcessRole::root())?;
        let engine = Engine::Signal(signal::SignalEngine::new(shared.clone()));
        Ok(Self { shared, engine })
    }

    /// Signal-driven sampling needs per-process interval timers; use
    /// [`Sampler::worker`] on this platform.
    #[cfg(not(unix))]
    pub fn signal(host: Arc<dyn RuntimeHost>, config: SamplerConfig) -> Result<Self> {
        let _ = (host, config);
        Err(EngineError::Unsupported)
    }

    fn build_shared(
        host: Arc<dyn RuntimeHost>,
        mut config: SamplerConfig,
        role: ProcessRole,
    ) -> Result<Arc<SamplerShared>> {
        config.normalize();
        let filters = FrameFilters::compile(&config, host.as_ref())?;
        Ok(Arc::new(SamplerShared {
            config,
            filters,
            host,
            state: ReentrantMutex::new(Cell::new(SamplerState::Initialized)),
            table: Mutex::new(StackTable::new()),
            middleware: Mutex::new(MiddlewareChain::default()),
            epoch: Instant::now(),
            acc_sampling_us: AtomicU64::new(0),
            start_us: AtomicU64::new(0),
            end_us: AtomicU64::new(0),
            saved_switch_interval: Mutex::new(None),
            is_root: AtomicBool::new(role.is_root),
            from_fork: AtomicBool::new(role.from_fork),
            from_mp: AtomicBool::new(role.from_mp),
            forkserver: AtomicBool::new(role.forkserver),
            child_cnt: AtomicU32::new(0),
        }))
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Arm the timer and begin sampling.
    pub fn start(&self) -> Result<()> {
        let state = self.shared.state.lock();
        match state.get() {
            SamplerState::Initialized => {}
            current => {
                return Err(EngineError::StateViolation {
                    op: "start",
                    state: current,
                })
            }
        }
        self.shared.middleware.lock().before_start();
        self.shared.adjust_switch_interval();
        if let Err(err) = self.engine.arm() {
            self.shared.restore_switch_interval();
            return Err(err);
        }
        state.set(SamplerState::Started);
        self.shared
            .start_us
            .store(self.shared.elapsed_us(), Ordering::Relaxed);
        self.shared.middleware.lock().after_start();
        Ok(())
    }

    /// Disarm the timer without flushing; the table is retained.
    pub fn pause(&self) -> Result<()> {
        let state = self.shared.state.lock();
        match state.get() {
            SamplerState::Started => {}
            current => {
                return Err(EngineError::StateViolation {
                    op: "pause",
                    state: current,
                })
            }
        }
        self.engine.pause()?;
        state.set(SamplerState::Paused);
        Ok(())
    }

    /// Re-arm a paused sampler.
    pub fn resume(&self) -> Result<()> {
        let state = self.shared.state.lock();
        match state.get() {
            SamplerState::Paused => {}
            current => {
                return Err(EngineError::StateViolation {
                    op: "resume",
                    state: current,
                })
            }
        }
        self.engine.resume()?;
        state.set(SamplerState::Started);
        Ok(())
    }

    /// Stop sampling for good. Synchronous: the engine is disarmed and, in
    /// worker mode, joined before this returns.
    pub fn stop(&self) -> Result<()> {
        let state = self.shared.state.lock();
        match state.get() {
            SamplerState::Started | SamplerState::Paused => {}
            current => {
                return Err(EngineError::StateViolation {
                    op: "stop",
                    state: current,
                })
            }
        }
        self.shared.middleware.lock().before_stop();
        self.engine.shutdown();
        self.shared.restore_switch_interval();
        self.shared
            .end_us
            .store(self.shared.elapsed_us(), Ordering::Relaxed);
        state.set(SamplerState::Finished);
        self.shared.middleware.lock().after_stop();
        Ok(())
    }

    /// Re-arm inside a freshly forked child: the parent's timer and worker
    /// thread do not survive the fork, so the engine is rebuilt while the
    /// state stays `Started`. Bypasses the terminal-state rule on purpose.
    pub(crate) fn restart_in_child(&self) -> Result<()> {
        let state = self.shared.state.lock();
        self.engine.rearm_in_child()?;
        state.set(SamplerState::Started);
        Ok(())
    }

    /// Start inside a forkserver's child, where the server never sampled.
    pub(crate) fn start_in_child(&self) -> Result<()> {
        self.start()
    }

    // ── Observation ────────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        self.shared.state.lock().get()
    }

    /// True while the sampler is in the started state.
    pub fn started(&self) -> bool {
        self.state() == SamplerState::Started
    }

    /// Serialise the aggregation table to folded text and run it through
    /// the middleware `process_dump` chain. Valid in any state; the state
    /// lock serialises this against concurrent transitions.
    pub fn dumps(&self) -> String {
        let _state = self.shared.state.lock();
        let text = self.shared.table.lock().dumps();
        self.shared.middleware.lock().process_dump(text)
    }

    /// Write `dumps()` to a file.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.dumps())?;
        Ok(())
    }

    /// A one-off canonicalised snapshot of every live thread, without
    /// touching the aggregation. This is what the monitoring surface
    /// exposes as "current stacks".
    pub fn current_stacks(&self) -> Vec<String> {
        self.shared
            .host
            .snapshot_threads()
            .iter()
            .map(|stack| {
                let frames = self.shared.filters.canonical_stack(&stack.frames);
                if frames.is_empty() {
                    stack.name.clone()
                } else {
                    format!("{};{}", stack.name, frames.join(";"))
                }
            })
            .collect()
    }

    /// Counters accumulated so far.
    pub fn metrics(&self) -> SamplerMetrics {
        SamplerMetrics {
            samples: self.shared.table.lock().ticks(),
            acc_sampling_us: self.shared.acc_sampling_us.load(Ordering::Relaxed),
            start_us: self.shared.start_us.load(Ordering::Relaxed),
            end_us: self.shared.end_us.load(Ordering::Relaxed),
        }
    }

    /// Reset the aggregation table and counters, preserving configuration.
    /// Used by the post-fork child hook.
    pub fn clear(&self) {
        let _state = self.shared.state.lock();
        self.shared.table.lock().clear();
        self.shared.acc_sampling_us.store(0, Ordering::Relaxed);
    }

    /// Attach a middleware hook; hooks run in registration order.
    pub fn register_middleware(&self, hook: Arc<dyn Middleware>) {
        self.shared.middleware.lock().register(hook);
    }

    /// The sampler's effective configuration.
    pub fn config(&self) -> &SamplerConfig {
        &self.shared.config
    }

    /// The runtime host this sampler observes.
    pub fn host(&self) -> &Arc<dyn RuntimeHost> {
        &self.shared.host
    }

    // ── Process role ───────────────────────────────────────────────────

    /// This process is the originating root.
    pub fn is_root(&self) -> bool {
        self.shared.is_root.load(Ordering::Relaxed)
    }

    /// Flip the root flag (fork-child hook).
    pub fn set_is_root(&self, value: bool) {
        self.shared.is_root.store(value, Ordering::Relaxed);
    }

    /// This process was created by `fork`.
    pub fn from_fork(&self) -> bool {
        self.shared.from_fork.load(Ordering::Relaxed)
    }

    /// Mark the process as a fork descendant.
    pub fn set_from_fork(&self, value: bool) {
        self.shared.from_fork.store(value, Ordering::Relaxed);
    }

    /// This process was created by a profiled spawn.
    pub fn from_mp(&self) -> bool {
        self.shared.from_mp.load(Ordering::Relaxed)
    }

    /// This process hosts the child-creation server.
    pub fn forkserver(&self) -> bool {
        self.shared.forkserver.load(Ordering::Relaxed)
    }

    /// Clear the forkserver flag once a child has been armed.
    pub fn set_forkserver(&self, value: bool) {
        self.shared.forkserver.store(value, Ordering::Relaxed);
    }

    /// Children expected to report a folded artifact back.
    pub fn child_cnt(&self) -> u32 {
        self.shared.child_cnt.load(Ordering::Relaxed)
    }

    /// Count one new profiled child.
    pub fn incr_child_cnt(&self) {
        self.shared.child_cnt.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget inherited children (fork-child hook).
    pub fn reset_child_cnt(&self) {
        self.shared.child_cnt.store(0, Ordering::Relaxed);
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if matches!(
            self.state(),
            SamplerState::Started | SamplerState::Paused
        ) {
            self.engine.shutdown();
            self.shared.restore_switch_interval();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::runtime::sim::SimRuntime;

    fn sim_host() -> Arc<SimRuntime> {
        let host = Arc::new(SimRuntime::new());
        host.spawn_thread(
            "MainThread",
            vec![
                Frame::new("/src/app.py", "main", 1, 12),
                Frame::new("/src/app.py", "busy", 10, 11),
            ],
        );
        host
    }

    fn quick_config() -> SamplerConfig {
        SamplerConfig {
            interval_us: 1_000,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_start_stop_collects_samples() {
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        sampler.stop().unwrap();

        let metrics = sampler.metrics();
        assert!(metrics.samples > 0, "no ticks in 60ms at 1ms interval");
        let dump = sampler.dumps();
        assert!(dump.starts_with("MainThread;"));
        assert!(dump.contains("/src/app.py:main:1"));
    }

    #[test]
    fn test_state_violations() {
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();

        // stop before start
        assert!(matches!(
            sampler.stop(),
            Err(EngineError::StateViolation { op: "stop", .. })
        ));

        sampler.start().unwrap();
        // double start
        assert!(matches!(
            sampler.start(),
            Err(EngineError::StateViolation { op: "start", .. })
        ));

        sampler.stop().unwrap();
        // start after stop: FINISHED is terminal
        assert!(matches!(
            sampler.start(),
            Err(EngineError::StateViolation { op: "start", .. })
        ));
        assert_eq!(sampler.state(), SamplerState::Finished);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        assert!(sampler.pause().is_err());

        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        sampler.pause().unwrap();
        assert_eq!(sampler.state(), SamplerState::Paused);

        // Let a tick that was mid-flight when the flag flipped drain out.
        std::thread::sleep(Duration::from_millis(10));
        let frozen = sampler.metrics().samples;
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(sampler.metrics().samples, frozen, "ticks while paused");

        sampler.resume().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        sampler.stop().unwrap();
        assert!(sampler.metrics().samples > frozen, "no ticks after resume");
    }

    #[test]
    fn test_clear_preserves_config() {
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        sampler.stop().unwrap();

        assert!(!sampler.dumps().is_empty());
        sampler.clear();
        assert!(sampler.dumps().is_empty());
        assert_eq!(sampler.metrics().samples, 0);
        assert_eq!(sampler.config().interval_us, 1_000);
    }

    #[test]
    fn test_dumps_idempotent_after_stop() {
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        sampler.stop().unwrap();
        assert_eq!(sampler.dumps(), sampler.dumps());
    }

    #[test]
    fn test_tick_sum_matches_thread_count() {
        // One live thread and no filtering: sum of counts == tick count.
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        sampler.stop().unwrap();

        let table = StackTable::parse(&sampler.dumps()).unwrap();
        assert_eq!(table.total(), sampler.metrics().samples);
    }

    #[test]
    fn test_switch_interval_adjustment_is_reversible() {
        let host = sim_host();
        host.set_switch_interval(Duration::from_millis(5));
        let sampler = Sampler::worker(host.clone(), quick_config()).unwrap();

        sampler.start().unwrap();
        // 1ms sampling interval < 4 * 5ms switch interval: tightened.
        assert_eq!(host.switch_interval(), Duration::from_micros(250));
        sampler.stop().unwrap();
        assert_eq!(host.switch_interval(), Duration::from_millis(5));
    }

    #[test]
    fn test_switch_interval_untouched_when_comfortable() {
        let host = sim_host();
        host.set_switch_interval(Duration::from_micros(100));
        let sampler = Sampler::worker(host.clone(), quick_config()).unwrap();

        sampler.start().unwrap();
        assert_eq!(host.switch_interval(), Duration::from_micros(100));
        sampler.stop().unwrap();
        assert_eq!(host.switch_interval(), Duration::from_micros(100));
    }

    #[test]
    fn test_middleware_order_and_dump_hook() {
        struct Tagger(&'static str);
        impl Middleware for Tagger {
            fn process_dump(&self, text: &str) -> Option<String> {
                Some(format!("{text}{}", self.0))
            }
        }

        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        sampler.register_middleware(Arc::new(Tagger("|a")));
        sampler.register_middleware(Arc::new(Tagger("|b")));
        assert!(sampler.dumps().ends_with("|a|b"));
    }

    #[test]
    fn test_current_stacks_snapshot() {
        let sampler = Sampler::worker(sim_host(), quick_config()).unwrap();
        let stacks = sampler.current_stacks();
        assert_eq!(stacks.len(), 1);
        assert!(stacks[0].starts_with("MainThread;"));
        // Observation does not touch the aggregation.
        assert!(sampler.dumps().is_empty());
    }

    #[test]
    fn test_regex_patterns_filter_sampled_frames() {
        let host = Arc::new(SimRuntime::new());
        host.spawn_thread(
            "MainThread",
            vec![
                Frame::new("/src/app.py", "main", 1, 5),
                Frame::new("/src/app.py", "fib", 4, 6),
            ],
        );
        host.spawn_thread("noise", vec![Frame::new("/src/app.py", "other", 9, 9)]);

        let config = SamplerConfig {
            interval_us: 1_000,
            regex_patterns: vec![".*fib.*".to_string()],
            ..SamplerConfig::default()
        };
        let sampler = Sampler::worker(host, config).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        sampler.stop().unwrap();

        let dump = sampler.dumps();
        assert!(!dump.is_empty());
        for line in dump.lines() {
            let (key, _) = line.rsplit_once(' ').unwrap();
            for frame in key.split(';').skip(1) {
                assert!(frame.contains("fib"), "unfiltered frame in {key}");
            }
        }
    }

    #[test]
    fn test_finalizing_host_suppresses_ticks() {
        let host = sim_host();
        host.set_finalizing(true);
        let sampler = Sampler::worker(host, quick_config()).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        sampler.stop().unwrap();
        assert_eq!(sampler.metrics().samples, 0);
    }
}

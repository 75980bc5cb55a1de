//! A scripted runtime host.
//!
//! `SimRuntime` behaves like a small interpreter from the sampler's point
//! of view: it has named threads, each with a frame chain, a global
//! execution lock, and a cooperative switch interval. Tests drive it
//! directly; the CLI's `--simulate` mode builds one from a [`Scenario`]
//! description and mutates thread stacks while the sampler runs.

use crate::frame::Frame;
use crate::runtime::{RuntimeHost, ThreadStack};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Default cooperative switch interval, mirroring a typical interpreter.
const DEFAULT_SWITCH_INTERVAL: Duration = Duration::from_millis(5);

struct SimThread {
    id: u64,
    name: String,
    frames: Vec<Frame>,
}

/// Scripted [`RuntimeHost`] implementation.
pub struct SimRuntime {
    /// Doubles as the runtime's global execution lock: snapshots hold it
    /// while copying frame chains, mutators hold it while editing them.
    threads: Mutex<Vec<SimThread>>,
    next_id: AtomicU64,
    switch_interval_ns: AtomicU64,
    finalizing: AtomicBool,
    runtime_prefix: String,
    package_prefix: String,
    profiler_prefix: String,
}

impl SimRuntime {
    /// A host with no threads and the stock directory layout.
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            switch_interval_ns: AtomicU64::new(DEFAULT_SWITCH_INTERVAL.as_nanos() as u64),
            finalizing: AtomicBool::new(false),
            runtime_prefix: "/opt/simrt/lib".to_string(),
            package_prefix: "/opt/simrt/lib/packages".to_string(),
            profiler_prefix: "/opt/simrt/lib/packages/pyrope".to_string(),
        }
    }

    /// Register a thread with an initial frame chain (caller-first).
    /// Returns its id.
    pub fn spawn_thread(&self, name: impl Into<String>, frames: Vec<Frame>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.threads.lock().push(SimThread {
            id,
            name: name.into(),
            frames,
        });
        id
    }

    /// Replace a thread's frame chain.
    pub fn set_stack(&self, thread_id: u64, frames: Vec<Frame>) {
        let mut threads = self.threads.lock();
        if let Some(thread) = threads.iter_mut().find(|t| t.id == thread_id) {
            thread.frames = frames;
        }
    }

    /// Remove a thread, as if it exited.
    pub fn finish_thread(&self, thread_id: u64) {
        self.threads.lock().retain(|t| t.id != thread_id);
    }

    /// Flip the finalizing flag the sampler checks before each tick.
    pub fn set_finalizing(&self, value: bool) {
        self.finalizing.store(value, Ordering::Release);
    }

    /// Number of live scripted threads.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeHost for SimRuntime {
    fn snapshot_threads(&self) -> Vec<ThreadStack> {
        let threads = self.threads.lock();
        threads
            .iter()
            .map(|t| ThreadStack {
                thread_id: t.id,
                name: t.name.clone(),
                frames: t.frames.clone(),
            })
            .collect()
    }

    fn switch_interval(&self) -> Duration {
        Duration::from_nanos(self.switch_interval_ns.load(Ordering::Relaxed))
    }

    fn set_switch_interval(&self, interval: Duration) {
        self.switch_interval_ns
            .store(interval.as_nanos() as u64, Ordering::Relaxed);
    }

    fn runtime_prefix(&self) -> String {
        self.runtime_prefix.clone()
    }

    fn package_prefix(&self) -> String {
        self.package_prefix.clone()
    }

    fn profiler_prefix(&self) -> String {
        self.profiler_prefix.clone()
    }

    fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Scenario descriptions
// ---------------------------------------------------------------------------

/// A frame in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSpec {
    /// Source path.
    pub path: String,
    /// Qualified symbol name.
    pub name: String,
    /// Definition line.
    #[serde(default)]
    pub def_line: i64,
    /// Currently-executing line.
    #[serde(default)]
    pub line: i64,
    /// Frozen bootstrap frame.
    #[serde(default)]
    pub frozen: bool,
}

impl FrameSpec {
    /// Materialise the frame record.
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::new(&self.path, &self.name, self.def_line, self.line);
        frame.frozen = self.frozen;
        frame
    }
}

/// One weighted stack a scenario thread cycles through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSpec {
    /// Frame chain, caller-first.
    pub frames: Vec<FrameSpec>,
    /// Relative share of time spent in this stack.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// A scenario thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSpec {
    /// Thread name shown in the folded output.
    pub name: String,
    /// Stacks the thread rotates through, weighted.
    pub stacks: Vec<StackSpec>,
}

/// A scripted workload: threads with rotating weighted stacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// How long to run, in milliseconds.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// The scripted threads.
    pub threads: Vec<ThreadSpec>,
}

fn default_duration_ms() -> u64 {
    200
}

impl Scenario {
    /// Instantiate the scenario's threads on a fresh host. Returns the
    /// host and, per thread, its id plus the expanded rotation of frame
    /// chains (each stack repeated `weight` times).
    pub fn instantiate(&self) -> (SimRuntime, Vec<(u64, Vec<Vec<Frame>>)>) {
        let host = SimRuntime::new();
        let mut rotations = Vec::with_capacity(self.threads.len());
        for thread in &self.threads {
            let mut rotation = Vec::new();
            for stack in &thread.stacks {
                let frames: Vec<Frame> = stack.frames.iter().map(FrameSpec::to_frame).collect();
                for _ in 0..stack.weight.max(1) {
                    rotation.push(frames.clone());
                }
            }
            let initial = rotation.first().cloned().unwrap_or_default();
            let id = host.spawn_thread(&thread.name, initial);
            rotations.push((id, rotation));
        }
        (host, rotations)
    }
}

//! Sampler and session configuration.

use crate::error::{EngineError, Result};

use std::path::PathBuf;
use std::time::Duration;

/// Hard floor for the sampling interval. Finer intervals are clamped here.
pub const MIN_INTERVAL_US: u64 = 5;

/// Default sampling interval: 8 ms.
pub const DEFAULT_INTERVAL_US: u64 = 8_000;

/// Which clock drives the periodic timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerSource {
    /// Count only while the process is on-CPU (SIGPROF / `ITIMER_PROF`).
    #[default]
    Cpu,
    /// Count real elapsed time (SIGALRM / `ITIMER_REAL`).
    Wall,
}

impl std::fmt::Display for TimerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerSource::Cpu => f.write_str("cpu"),
            TimerSource::Wall => f.write_str("wall"),
        }
    }
}

impl std::str::FromStr for TimerSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(TimerSource::Cpu),
            "wall" => Ok(TimerSource::Wall),
            other => Err(EngineError::ConfigInvalid(format!(
                "unknown timer source {other:?} (expected \"cpu\" or \"wall\")"
            ))),
        }
    }
}

/// Immutable per-sampler options.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Microseconds between sample ticks, clamped to [`MIN_INTERVAL_US`].
    pub interval_us: u64,
    /// Drop frames belonging to the runtime's frozen bootstrap code.
    pub ignore_frozen: bool,
    /// Drop frames belonging to the profiler's own installation.
    pub ignore_self: bool,
    /// Attach each frame's call-site line instead of its definition line.
    pub tree_mode: bool,
    /// Keep only frames outside the runtime install and package roots.
    pub focus_mode: bool,
    /// Allow-list: a frame is kept only if `path:qualname` matches one of
    /// these patterns. Empty means no filtering.
    pub regex_patterns: Vec<String>,
    /// Clock driving the periodic timer (signal-driven mode).
    pub timer_source: TimerSource,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_us: DEFAULT_INTERVAL_US,
            ignore_frozen: false,
            ignore_self: true,
            tree_mode: false,
            focus_mode: false,
            regex_patterns: Vec::new(),
            timer_source: TimerSource::Cpu,
        }
    }
}

impl SamplerConfig {
    /// The sampling interval as a [`Duration`], after clamping.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us.max(MIN_INTERVAL_US))
    }

    /// Clamp out-of-range values in place.
    pub fn normalize(&mut self) {
        self.interval_us = self.interval_us.max(MIN_INTERVAL_US);
    }
}

/// Everything a profiling session carries: sampler knobs, save policy,
/// process-role flags, and diagnostics switches. This is the record that
/// travels to child processes as CLI tokens.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Sampler options.
    pub sampler: SamplerConfig,
    /// Artifact save policy.
    pub save: SaveOptions,
    /// This process was created by a profiled spawn (`--mp`).
    pub mp: bool,
    /// This process hosts the child-creation server (`--fork-server`).
    pub fork_server: bool,
    /// Chatty user-facing output.
    pub verbose: bool,
    /// Diagnostics output (per-process save messages, metrics table).
    pub debug: bool,
}

impl SessionConfig {
    /// Serialise the effective configuration back into CLI tokens, so a
    /// rewritten child argv reproduces this session's behaviour. Role flags
    /// (`--mp`, `--fork-server`) are owned by the argv rewriter and are not
    /// emitted here.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["--interval".to_string(), self.sampler.interval_us.to_string()];
        if self.sampler.ignore_frozen {
            args.push("--ignore-frozen".to_string());
        }
        if !self.sampler.ignore_self {
            args.push("--include-pyrope".to_string());
        }
        if self.sampler.tree_mode {
            args.push("--tree-mode".to_string());
        }
        if self.sampler.focus_mode {
            args.push("--focus-mode".to_string());
        }
        for pattern in &self.sampler.regex_patterns {
            args.push("--regex-patterns".to_string());
            args.push(pattern.clone());
        }
        args.push("--time".to_string());
        args.push(self.sampler.timer_source.to_string());

        if self.save.full_path {
            args.push("--full-path".to_string());
        }
        if self.save.inverted {
            args.push("--inverted".to_string());
        }
        args.push("--output".to_string());
        args.push(self.save.output.display().to_string());
        if self.save.folded_save {
            args.push("--folded-save".to_string());
        }
        args.push("--folded-file".to_string());
        args.push(self.save.folded_file.display().to_string());
        args.push(if self.save.merge { "--merge" } else { "--no-merge" }.to_string());
        args.push("--timeout".to_string());
        args.push(self.save.timeout.as_secs().to_string());

        if self.verbose {
            args.push("--verbose".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }
}

/// Where and how profile artifacts are written on stop.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Keep full source paths instead of shortening install prefixes.
    pub full_path: bool,
    /// Render an icicle graph (root row at the top).
    pub inverted: bool,
    /// SVG document width in pixels.
    pub width: u32,
    /// Destination of the rendered SVG (root process, merge mode).
    pub output: PathBuf,
    /// Also persist the folded text.
    pub folded_save: bool,
    /// Destination of the folded text when `folded_save` is set.
    pub folded_file: PathBuf,
    /// Merge descendants' tables into the root artifact.
    pub merge: bool,
    /// How long the root waits for child artifacts before giving up.
    pub timeout: Duration,
    /// Directory where per-process artifacts are exchanged.
    pub work_dir: PathBuf,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            full_path: false,
            inverted: false,
            width: 1200,
            output: PathBuf::from("result.svg"),
            folded_save: false,
            folded_file: PathBuf::from("result.folded"),
            merge: true,
            timeout: Duration::from_secs(10),
            work_dir: std::env::current_dir().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_clamped_to_floor() {
        let cfg = SamplerConfig {
            interval_us: 1,
            ..SamplerConfig::default()
        };
        assert_eq!(cfg.interval(), Duration::from_micros(5));

        let mut cfg = cfg;
        cfg.normalize();
        assert_eq!(cfg.interval_us, 5);
    }

    #[test]
    fn test_timer_source_round_trip() {
        for source in [TimerSource::Cpu, TimerSource::Wall] {
            assert_eq!(source.to_string().parse::<TimerSource>().unwrap(), source);
        }
        assert!("sideways".parse::<TimerSource>().is_err());
    }

    #[test]
    fn test_to_cli_args_carries_every_knob() {
        let config = SessionConfig {
            sampler: SamplerConfig {
                interval_us: 500,
                ignore_frozen: true,
                tree_mode: true,
                regex_patterns: vec![".*fib.*".to_string()],
                ..SamplerConfig::default()
            },
            verbose: true,
            ..SessionConfig::default()
        };
        let args = config.to_cli_args();
        for expected in ["--interval", "500", "--ignore-frozen", "--tree-mode", "--regex-patterns", ".*fib.*", "--merge", "--verbose"] {
            assert!(args.iter().any(|a| a == expected), "missing {expected}");
        }
        assert!(!args.iter().any(|a| a == "--mp"));
    }
}

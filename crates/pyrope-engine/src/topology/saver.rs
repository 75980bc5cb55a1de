//! Per-process artifact writing and the root-side merge.
//!
//! On stop every process writes a folded artifact. What and where depends
//! on its role and on merge mode:
//!
//! | role              | merge                               | no merge              |
//! |-------------------|-------------------------------------|-----------------------|
//! | sole root         | SVG (+ optional folded) to user path| same                  |
//! | root with children| wait for `<pid>-<mypid>.folded`,    | SVG (+ folded)        |
//! |                   | concatenate, SVG (+ folded)         |                       |
//! | child             | tag keys, write `<pid>-<ppid>.folded`| `<pid>-<ppid>.svg`   |
//! | child w/ children | consume own children first, then as child | own files directly |
//!
//! Stack keys are tagged `Process(pid=X, ppid=Y);` (the root uses
//! `Process(root, pid=X);`) so the merged graph separates per-process
//! subtrees.

use crate::config::{SaveOptions, SessionConfig};
use crate::error::Result;
use crate::sampler::Sampler;

use pyrope_flame::{FlameGraph, Options, MIN_SAMPLE_COUNT};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What a save produced.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// The merge wait gave up before every child reported.
    pub timed_out: bool,
    /// Total samples in the rendered document (0 if no SVG was written).
    pub sample_count: u64,
    /// Every file written, in order.
    pub written: Vec<PathBuf>,
}

/// Writes one process's profile according to its role.
pub struct ProfileSaver {
    lines: Vec<String>,
    opts: SaveOptions,
    verbose: bool,
    debug: bool,
    is_root: bool,
    child_cnt: u32,
    pid: u32,
    ppid: u32,
    command: String,
    package_path: String,
    timed_out: bool,
    sample_count: u64,
    written: Vec<PathBuf>,
}

impl ProfileSaver {
    /// Snapshot the sampler's folded table and role for saving. Paths are
    /// shortened here unless `full_path` asked for the raw form.
    pub fn new(sampler: &Sampler, config: &SessionConfig) -> Self {
        let opts = config.save.clone();
        let host = sampler.host();
        let package_prefix = host.package_prefix();

        let mut lines: Vec<String> = sampler
            .dumps()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        if !opts.full_path {
            let work_dir = opts.work_dir.display().to_string();
            lines = pyrope_flame::shorten_paths(&lines, &package_prefix, &work_dir);
        }

        let package_path = Path::new(&package_prefix)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            lines,
            opts,
            verbose: config.verbose,
            debug: config.debug,
            is_root: sampler.is_root(),
            child_cnt: sampler.child_cnt(),
            pid: std::process::id(),
            ppid: parent_pid(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
            package_path,
            timed_out: false,
            sample_count: 0,
            written: Vec::new(),
        }
    }

    /// Write the artifacts this process's role calls for.
    pub fn save(mut self) -> Result<SaveReport> {
        if self.child_cnt > 0 {
            self.wait_children();
            if self.is_root {
                self.multi_process_root()?;
            } else {
                self.multi_process_child()?;
            }
        } else if self.is_root {
            self.single_process_root()?;
        } else {
            self.single_process_child()?;
        }
        Ok(SaveReport {
            timed_out: self.timed_out,
            sample_count: self.sample_count,
            written: self.written,
        })
    }

    // ── Role handlers ──────────────────────────────────────────────────

    fn single_process_root(&mut self) -> Result<()> {
        let output = self.resolve(&self.opts.output.clone());
        self.save_svg(&output)?;
        if self.verbose {
            log::info!("process {} saved the flame graph to {}", self.pid, output.display());
        }
        if self.opts.folded_save {
            let folded = self.resolve(&self.opts.folded_file.clone());
            self.save_folded(&folded)?;
        }
        Ok(())
    }

    fn single_process_child(&mut self) -> Result<()> {
        if self.opts.merge {
            self.tag_lines(&format!("pid={}, ppid={}", self.pid, self.ppid));
            let folded = self.child_artifact();
            self.save_folded(&folded)?;
            if self.debug {
                log::info!("process {} wrote {}", self.pid, folded.display());
            }
        } else {
            let svg = self.resolve(Path::new(&format!("{}-{}.svg", self.pid, self.ppid)));
            self.save_svg(&svg)?;
            if self.opts.folded_save {
                let folded = self.child_artifact();
                self.save_folded(&folded)?;
            }
        }
        Ok(())
    }

    fn multi_process_root(&mut self) -> Result<()> {
        if self.opts.merge {
            self.tag_lines(&format!("root, pid={}", self.pid));
            self.consume_child_files();
        }
        let output = self.resolve(&self.opts.output.clone());
        self.save_svg(&output)?;
        if self.verbose {
            log::info!(
                "root process {} collected the profiling data into {}",
                self.pid,
                output.display()
            );
        }
        if self.opts.folded_save {
            let folded = self.resolve(&self.opts.folded_file.clone());
            self.save_folded(&folded)?;
        }
        Ok(())
    }

    fn multi_process_child(&mut self) -> Result<()> {
        if self.opts.merge {
            self.tag_lines(&format!("pid={}, ppid={}", self.pid, self.ppid));
            self.consume_child_files();
            let folded = self.child_artifact();
            self.save_folded(&folded)?;
            if self.debug {
                log::info!("process {} forwarded merged data via {}", self.pid, folded.display());
            }
        } else {
            let svg = self.resolve(Path::new(&format!("{}-{}.svg", self.pid, self.ppid)));
            self.save_svg(&svg)?;
            if self.opts.folded_save {
                let folded = self.child_artifact();
                self.save_folded(&folded)?;
            }
        }
        Ok(())
    }

    // ── Mechanics ──────────────────────────────────────────────────────

    /// Poll the working directory until every expected
    /// `<child>-<pid>.folded` artifact appears, yielding the scheduler
    /// between polls. Bounded by the configured timeout; expiry is
    /// reported, never fatal.
    fn wait_children(&mut self) {
        if !self.opts.merge {
            return;
        }
        if self.debug {
            log::info!(
                "process {} waiting for {} child artifact(s)",
                self.pid,
                self.child_cnt
            );
        }
        let begin = Instant::now();
        loop {
            std::thread::yield_now();
            let found = self.child_files().len();
            if found >= self.child_cnt as usize {
                break;
            }
            if begin.elapsed() > self.opts.timeout {
                self.timed_out = true;
                log::warn!(
                    "timed out waiting for child profiles ({found} of {} present); \
                     merging what is available",
                    self.child_cnt
                );
                break;
            }
        }
    }

    /// The `<child_pid>-<my_pid>.folded` files currently present.
    fn child_files(&self) -> Vec<PathBuf> {
        let suffix = format!("-{}.folded", self.pid);
        let mut files = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.opts.work_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().ends_with(&suffix) {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        files
    }

    /// Read and unlink every child artifact, appending its lines. A child
    /// that died before flushing simply has no file; the gap is tolerated.
    fn consume_child_files(&mut self) {
        for file in self.child_files() {
            match fs::read_to_string(&file) {
                Ok(content) => {
                    let _ = fs::remove_file(&file);
                    if self.debug {
                        log::info!("process {} consumed {}", self.pid, file.display());
                    }
                    self.lines.extend(
                        content
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(str::to_string),
                    );
                }
                Err(err) => log::warn!("could not read child profile {}: {err}", file.display()),
            }
        }
    }

    fn tag_lines(&mut self, label: &str) {
        for line in &mut self.lines {
            *line = format!("Process({label});{line}");
        }
    }

    fn save_svg(&mut self, path: &Path) -> Result<()> {
        let mut graph = FlameGraph::new(Options {
            width: self.opts.width,
            inverted: self.opts.inverted,
            command: self.command.clone(),
            package_path: self.package_path.clone(),
            work_dir: self.opts.work_dir.display().to_string(),
            ..Options::default()
        });
        graph.feed(&self.lines);
        fs::write(path, graph.render())?;
        self.sample_count = graph.total_samples();
        self.written.push(path.to_path_buf());

        if self.sample_count < MIN_SAMPLE_COUNT {
            log::warn!(
                "sample count {} is low; consider a finer --interval",
                self.sample_count
            );
        }
        Ok(())
    }

    fn save_folded(&mut self, path: &Path) -> Result<()> {
        fs::write(path, self.lines.join("\n"))?;
        self.written.push(path.to_path_buf());
        Ok(())
    }

    fn child_artifact(&self) -> PathBuf {
        self.opts
            .work_dir
            .join(format!("{}-{}.folded", self.pid, self.ppid))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.opts.work_dir.join(path)
        }
    }
}

#[cfg(unix)]
fn parent_pid() -> u32 {
    unsafe { libc::getppid() as u32 }
}

#[cfg(not(unix))]
fn parent_pid() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SamplerConfig, SessionConfig};
    use crate::frame::Frame;
    use crate::runtime::sim::SimRuntime;
    use crate::topology::ProcessRole;

    use std::sync::Arc;
    use std::time::Duration;

    fn sampled(role: ProcessRole) -> Sampler {
        let host = Arc::new(SimRuntime::new());
        host.spawn_thread(
            "MainThread",
            vec![
                Frame::new("/src/app.py", "main", 1, 5),
                Frame::new("/src/app.py", "busy", 4, 6),
            ],
        );
        let config = SamplerConfig {
            interval_us: 1_000,
            ..SamplerConfig::default()
        };
        let sampler = Sampler::worker_with_role(host, config, role).unwrap();
        sampler.start().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        sampler.stop().unwrap();
        sampler
    }

    fn session(dir: &Path) -> SessionConfig {
        let mut config = SessionConfig::default();
        config.save.work_dir = dir.to_path_buf();
        config.save.output = PathBuf::from("result.svg");
        config.save.folded_file = PathBuf::from("result.folded");
        config
    }

    #[test]
    fn test_sole_root_writes_svg_and_optional_folded() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = sampled(ProcessRole::root());
        let mut config = session(dir.path());
        config.save.folded_save = true;

        let report = ProfileSaver::new(&sampler, &config).save().unwrap();
        assert!(!report.timed_out);
        assert!(report.sample_count > 0);
        assert!(dir.path().join("result.svg").exists());
        assert!(dir.path().join("result.folded").exists());

        let folded = fs::read_to_string(dir.path().join("result.folded")).unwrap();
        assert!(folded.starts_with("MainThread;"));
        assert!(!folded.ends_with('\n'));
    }

    #[test]
    fn test_child_writes_tagged_folded_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let role = ProcessRole {
            is_root: false,
            from_fork: false,
            from_mp: true,
            forkserver: false,
        };
        let sampler = sampled(role);
        let config = session(dir.path());

        let report = ProfileSaver::new(&sampler, &config).save().unwrap();
        let pid = std::process::id();
        let artifact = dir.path().join(format!("{pid}-{}.folded", parent_pid()));
        assert_eq!(report.written, vec![artifact.clone()]);

        let content = fs::read_to_string(artifact).unwrap();
        for line in content.lines() {
            assert!(line.starts_with(&format!("Process(pid={pid}, ppid=")));
        }
    }

    #[test]
    fn test_root_merges_and_unlinks_child_files() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = sampled(ProcessRole::root());
        sampler.incr_child_cnt();

        let pid = std::process::id();
        let child_file = dir.path().join(format!("4242-{pid}.folded"));
        fs::write(
            &child_file,
            "Process(pid=4242, ppid=1);MainThread;/src/app.py:main:1 7",
        )
        .unwrap();

        let mut config = session(dir.path());
        config.save.folded_save = true;
        let report = ProfileSaver::new(&sampler, &config).save().unwrap();

        assert!(!report.timed_out);
        assert!(!child_file.exists(), "consumed child file must be unlinked");

        let folded = fs::read_to_string(dir.path().join("result.folded")).unwrap();
        assert!(folded.contains(&format!("Process(root, pid={pid});MainThread;")));
        assert!(folded.contains("Process(pid=4242, ppid=1);MainThread;"));

        // Count conservation: merged totals include the child's 7 samples.
        let own: u64 = folded
            .lines()
            .filter(|l| l.starts_with("Process(root"))
            .map(|l| l.rsplit_once(' ').unwrap().1.parse::<u64>().unwrap())
            .sum();
        assert_eq!(report.sample_count, own + 7);
    }

    #[test]
    fn test_merge_wait_timeout_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = sampled(ProcessRole::root());
        sampler.incr_child_cnt();

        let mut config = session(dir.path());
        config.save.timeout = Duration::from_millis(50);
        let report = ProfileSaver::new(&sampler, &config).save().unwrap();

        assert!(report.timed_out);
        assert!(dir.path().join("result.svg").exists());
    }

    #[test]
    fn test_no_merge_root_skips_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = sampled(ProcessRole::root());
        sampler.incr_child_cnt();

        let mut config = session(dir.path());
        config.save.merge = false;
        config.save.timeout = Duration::from_secs(30);

        let begin = Instant::now();
        let report = ProfileSaver::new(&sampler, &config).save().unwrap();
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert!(!report.timed_out);
        assert!(dir.path().join("result.svg").exists());
    }

    #[test]
    fn test_no_merge_child_writes_its_own_svg() {
        let dir = tempfile::tempdir().unwrap();
        let role = ProcessRole {
            is_root: false,
            from_fork: true,
            from_mp: false,
            forkserver: false,
        };
        let sampler = sampled(role);
        let mut config = session(dir.path());
        config.save.merge = false;

        ProfileSaver::new(&sampler, &config).save().unwrap();
        let svg = dir
            .path()
            .join(format!("{}-{}.svg", std::process::id(), parent_pid()));
        assert!(svg.exists());
    }
}

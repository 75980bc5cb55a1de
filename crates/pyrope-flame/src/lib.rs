//! Folded-stack parsing and flame graph rendering.
//!
//! Input is the folded format: one line per unique call stack, frames joined
//! with `;`, followed by a space and a decimal sample count:
//!
//! ```text
//! MainThread;app.py:main:1;app.py:fib:10 42
//! ```
//!
//! [`FlameGraph`] aggregates those lines into a call tree and renders a
//! self-contained interactive SVG document. Rectangle width is proportional
//! to sample count; vertical position encodes caller/callee depth.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod svg;
mod tree;

pub use tree::{CallTree, Node, NodeId};

use indexmap::IndexMap;

/// Advisory floor: totals below this usually mean the sampling interval was
/// too coarse for the workload.
pub const MIN_SAMPLE_COUNT: u64 = 50;

/// Presentation options for a rendered flame graph.
#[derive(Debug, Clone)]
pub struct Options {
    /// Document title, centred at the top.
    pub title: String,
    /// Total document width in pixels.
    pub width: u32,
    /// Height of one frame row in pixels.
    pub frame_height: u32,
    /// Frames narrower than this many pixels are omitted from the output.
    pub min_width: f64,
    /// Label for the counted unit (samples, bytes, ...).
    pub count_name: String,
    /// Command line that produced the profile, shown in the header.
    pub command: String,
    /// Package root shown in the `Environment:` header.
    pub package_path: String,
    /// Working directory shown in the header.
    pub work_dir: String,
    /// Reverse the frame order of every stack at parse time.
    pub reverse: bool,
    /// Draw the root row at the top (icicle) instead of the bottom.
    pub inverted: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            title: "Pyrope Flame Graph".to_string(),
            width: 1200,
            frame_height: 15,
            min_width: 0.1,
            count_name: "samples".to_string(),
            command: String::new(),
            package_path: String::new(),
            work_dir: String::new(),
            reverse: false,
            inverted: false,
        }
    }
}

/// Aggregates folded stack lines and renders them as an SVG flame graph.
pub struct FlameGraph {
    opts: Options,
    stacks: IndexMap<String, u64>,
    total_samples: u64,
    max_depth: usize,
    skipped: usize,
}

impl FlameGraph {
    /// Create an empty graph with the given presentation options.
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            stacks: IndexMap::new(),
            total_samples: 0,
            max_depth: 0,
            skipped: 0,
        }
    }

    /// Parse and aggregate a batch of folded lines.
    ///
    /// Malformed lines are skipped with a warning and counted in
    /// [`skipped`](Self::skipped); they are never fatal.
    pub fn feed<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.feed_line(line.as_ref());
        }
    }

    /// Parse and aggregate a single folded line.
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let Some((stack, count_str)) = line.rsplit_once(' ') else {
            log::warn!("invalid folded line (ignored): {line}");
            self.skipped += 1;
            return;
        };
        let count: u64 = match count_str.parse() {
            Ok(n) => n,
            Err(_) => {
                log::warn!("invalid folded line (ignored): {line}");
                self.skipped += 1;
                return;
            }
        };

        let mut frames: Vec<&str> = stack.split(';').collect();
        if self.opts.reverse {
            frames.reverse();
        }

        *self.stacks.entry(frames.join(";")).or_insert(0) += count;
        self.total_samples += count;
        self.max_depth = self.max_depth.max(frames.len());
    }

    /// Sum of the counts of every accepted line.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Number of malformed lines that were skipped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Deepest accepted stack, in frames.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Presentation options this graph renders with.
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Aggregated stacks in insertion order.
    pub fn stacks(&self) -> &IndexMap<String, u64> {
        &self.stacks
    }

    /// Render the aggregated stacks as a self-contained SVG document.
    pub fn render(&self) -> String {
        let mut tree = CallTree::build(&self.stacks);
        tree.layout(self.opts.width);
        svg::render(self, &tree)
    }
}

/// Strip installation and working-directory prefixes from every frame of
/// every folded line.
///
/// This is a presentation-time transform owned by the renderer's caller:
/// the sampler always records full paths. `package_root` is the
/// third-party package directory; its parent is treated as the runtime
/// install base.
pub fn shorten_paths(lines: &[String], package_root: &str, work_dir: &str) -> Vec<String> {
    let base_dir = match package_root.rfind('/') {
        Some(idx) => &package_root[..idx],
        None => "",
    };
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let shortened: Vec<String> = line
            .split(';')
            .map(|item| {
                let mut item = item;
                for prefix in [package_root, work_dir, base_dir] {
                    if !prefix.is_empty() {
                        item = item.strip_prefix(prefix).unwrap_or(item);
                    }
                }
                item.strip_prefix('/').unwrap_or(item).to_string()
            })
            .collect();
        out.push(shortened.join(";"));
    }
    out
}

//! Frame records and the canonical-string filter chain.

use crate::config::SamplerConfig;
use crate::error::{EngineError, Result};
use crate::runtime::RuntimeHost;

use regex::RegexSet;

/// One interpreter frame observed during a sample walk.
///
/// Frames are ephemeral: they are copied out of the runtime while its
/// execution lock is held and discarded once the stack has been folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Source file the frame executes in.
    pub path: String,
    /// Plain function name.
    pub name: String,
    /// Qualified symbol name, when the runtime can provide one.
    pub qualname: Option<String>,
    /// Line currently executing in this frame.
    pub lineno: i64,
    /// Line the function is defined on.
    pub def_line: i64,
    /// The frame belongs to the runtime's frozen bootstrap code.
    pub frozen: bool,
}

impl Frame {
    /// Build a frame with a qualified name.
    pub fn new(
        path: impl Into<String>,
        qualname: impl Into<String>,
        def_line: i64,
        lineno: i64,
    ) -> Self {
        let qualname = qualname.into();
        Self {
            path: path.into(),
            name: qualname.rsplit('.').next().unwrap_or(&qualname).to_string(),
            qualname: Some(qualname),
            lineno,
            def_line,
            frozen: false,
        }
    }

    /// Mark the frame as frozen bootstrap code.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Qualified name when available, plain name otherwise.
    pub fn symbol(&self) -> &str {
        self.qualname.as_deref().unwrap_or(&self.name)
    }
}

/// Compiled per-sampler frame filters.
///
/// Built once at sampler construction; applied to every frame of every
/// sample tick.
#[derive(Debug)]
pub struct FrameFilters {
    ignore_frozen: bool,
    self_prefix: Option<String>,
    focus_prefixes: Option<[String; 2]>,
    patterns: Option<RegexSet>,
    tree_mode: bool,
}

impl FrameFilters {
    /// Compile the filters for `config`, resolving path prefixes against
    /// the host runtime. A pattern that fails to compile is a
    /// *config-invalid* error.
    pub fn compile(config: &SamplerConfig, host: &dyn RuntimeHost) -> Result<Self> {
        let patterns = if config.regex_patterns.is_empty() {
            None
        } else {
            Some(
                RegexSet::new(&config.regex_patterns)
                    .map_err(|e| EngineError::ConfigInvalid(e.to_string()))?,
            )
        };
        Ok(Self {
            ignore_frozen: config.ignore_frozen,
            self_prefix: config.ignore_self.then(|| host.profiler_prefix()),
            focus_prefixes: config
                .focus_mode
                .then(|| [host.runtime_prefix(), host.package_prefix()]),
            patterns,
            tree_mode: config.tree_mode,
        })
    }

    /// Permissive filters used by tests and diagnostics paths.
    pub fn permissive() -> Self {
        Self {
            ignore_frozen: false,
            self_prefix: None,
            focus_prefixes: None,
            patterns: None,
            tree_mode: false,
        }
    }

    /// Canonicalise one frame, or drop it.
    ///
    /// `call_site` is the currently-executing line of the *caller* frame;
    /// `None` for the root of a stack. The filter chain short-circuits on
    /// the first drop: frozen, profiler-own code, focus mode, allow-list.
    pub fn canonical(&self, frame: &Frame, call_site: Option<i64>) -> Option<String> {
        if self.ignore_frozen && frame.frozen {
            return None;
        }
        if let Some(prefix) = &self.self_prefix {
            if frame.path.starts_with(prefix.as_str()) {
                return None;
            }
        }
        if let Some(prefixes) = &self.focus_prefixes {
            if prefixes.iter().any(|p| frame.path.starts_with(p.as_str())) {
                return None;
            }
        }
        if let Some(patterns) = &self.patterns {
            let probe = format!("{}:{}", frame.path, frame.symbol());
            if !patterns.is_match(&probe) {
                return None;
            }
        }

        let line = if self.tree_mode {
            call_site.unwrap_or(frame.def_line)
        } else {
            frame.def_line
        };
        Some(format!("{}:{}:{}", frame.path, frame.symbol(), line.max(0)))
    }

    /// Canonicalise a whole stack (caller-first order), dropping filtered
    /// frames. In tree mode each frame is labelled with the line its caller
    /// was executing, so distinct call sites of the same symbol stay
    /// distinct.
    pub fn canonical_stack(&self, frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .enumerate()
            .filter_map(|(i, frame)| {
                let call_site = (i > 0).then(|| frames[i - 1].lineno);
                self.canonical(frame, call_site)
            })
            .collect()
    }
}

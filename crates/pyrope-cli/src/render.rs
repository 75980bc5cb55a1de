//! Folded-text to SVG rendering (`--parse`).

use anyhow::{Context, Result};
use pyrope_flame::{FlameGraph, Options};

use std::path::Path;

/// Render a folded stack file into a flame graph document.
pub fn execute(input: &Path, output: &Path, reverse: bool, inverted: bool) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("reading stack trace file {}", input.display()))?;

    let mut graph = FlameGraph::new(Options {
        reverse,
        inverted,
        command: std::env::args().collect::<Vec<_>>().join(" "),
        work_dir: std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default(),
        ..Options::default()
    });
    graph.feed(content.lines().filter(|l| !l.trim().is_empty()));

    if graph.skipped() > 0 {
        crate::output::warning(&format!(
            "{} malformed line(s) in {} were skipped",
            graph.skipped(),
            input.display()
        ));
    }

    std::fs::write(output, graph.render())
        .with_context(|| format!("writing {}", output.display()))?;

    if graph.total_samples() < pyrope_flame::MIN_SAMPLE_COUNT {
        crate::output::warning(&format!(
            "sample count {} is a little low; a finer --interval gives a \
             more faithful graph",
            graph.total_samples()
        ));
    }

    crate::output::success(&format!(
        "generated a flame graph `{}` from the stack trace file `{}` \
         ({} samples); open it in a browser",
        output.display(),
        input.display(),
        graph.total_samples()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_renders_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("trace.folded");
        let output = dir.path().join("trace.svg");
        std::fs::write(&input, "MainThread;a;b 10\nMainThread;a;c 5").unwrap();

        execute(&input, &output, false, false).unwrap();
        let svg = std::fs::read_to_string(&output).unwrap();
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_execute_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.folded");
        let output = dir.path().join("out.svg");
        assert!(execute(&missing, &output, false, false).is_err());
    }
}

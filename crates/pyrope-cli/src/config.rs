//! Configuration file handling.
//!
//! `~/.pyrope/.pyroperc` is a JSON object whose `args` key holds a list of
//! CLI tokens prepended to the effective argv. Later command-line tokens
//! override earlier config tokens.

use anyhow::{Context, Result};
use serde_json::Value;

use std::path::PathBuf;

const CONFIG_DIR: &str = ".pyrope";
const CONFIG_FILE: &str = ".pyroperc";

/// Location of the user configuration file.
pub fn config_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Read the `args` list from the config file. A missing file is an empty
/// list; a malformed file is warned about and ignored.
pub fn config_args() -> Vec<String> {
    let Some(path) = config_path() else {
        return Vec::new();
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    parse_config_args(&content).unwrap_or_else(|| {
        crate::output::warning(&format!(
            "configuration file {} is not a JSON object with an \"args\" list; ignoring",
            path.display()
        ));
        Vec::new()
    })
}

/// Extract the `args` list, `None` if the document has the wrong shape.
/// An object without `args` is a valid, empty configuration.
pub fn parse_config_args(content: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(content).ok()?;
    let object = value.as_object()?;
    let Some(args) = object.get("args") else {
        return Some(Vec::new());
    };
    args.as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Config tokens first, command line second: the later (CLI) tokens win
/// wherever the parser takes the last occurrence.
pub fn merge_with_args(cli_args: &[String]) -> Vec<String> {
    let mut merged = config_args();
    merged.extend(cli_args.iter().cloned());
    merged
}

/// Write a commented example configuration, refusing to clobber silently.
pub fn create_example_config(force: bool) -> Result<PathBuf> {
    let path = config_path().context("cannot determine the home directory")?;
    if path.exists() && !force {
        anyhow::bail!(
            "configuration file already exists at {} (remove it first)",
            path.display()
        );
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let example = serde_json::json!({
        "args": [
            "--interval", "8000",
            "--timeout", "30",
            "--output", "result.svg",
            "--folded-file", "result.folded",
            "--folded-save",
            "--ignore-frozen",
            "--merge",
        ]
    });
    std::fs::write(&path, serde_json::to_string_pretty(&example)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

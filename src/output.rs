//! Artifact writing and console reporting

use crate::error::Result;
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Write a payload as pretty-printed JSON with a trailing newline,
/// creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(payload)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

/// Write a text artifact, creating parent directories as needed
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

/// One green `ok:` line on stderr, matching the gate tooling convention
pub fn print_ok(message: &str) {
    eprintln!("{} {message}", "ok:".green().bold());
}

/// One red `error:` line on stderr
pub fn print_error(message: &str) {
    eprintln!("{} {message}", "error:".red().bold());
}

/// Colored PASS/FAIL tag for summary lines
#[must_use]
pub fn gate_tag(passed: bool) -> String {
    if passed {
        "PASS".green().bold().to_string()
    } else {
        "FAIL".red().bold().to_string()
    }
}

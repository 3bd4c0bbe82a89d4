//! Schema checks for JSONL evidence.

use std::path::{Path, PathBuf};

use serde::Serialize;
use xpthread_core::structured_log::validate_log_file;

#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub path: PathBuf,
    pub lines: usize,
    pub errors: Vec<String>,
    pub ok: bool,
}

/// Validate every line of `path` and summarize the result.
pub fn summarize_log(path: &Path) -> std::io::Result<LogSummary> {
    let (lines, errors) = validate_log_file(path)?;
    let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
    Ok(LogSummary {
        path: path.to_path_buf(),
        lines,
        ok: errors.is_empty() && lines > 0,
        errors,
    })
}

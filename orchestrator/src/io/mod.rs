//! Side-effecting helpers: config and state files, prompts, LLM calls.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod config;
pub mod init;
pub mod llm;
pub mod prompt;
pub mod state_store;

/// Write `contents` to a sibling temp file, then rename it over `path`.
///
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

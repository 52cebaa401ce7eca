//! JSON-lines event scripts for the demo runner.
//!
//! One serialized [`Event`] per line. Blank lines and lines starting with `#`
//! are skipped.

use std::path::{Path, PathBuf};

use eira_domain::Event;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

pub fn parse_script(content: &str) -> Result<Vec<Event>, ScriptError> {
    content
        .lines()
        .enumerate()
        .map(|(index, raw)| (index + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            serde_json::from_str::<Event>(text).map_err(|source| ScriptError::Parse { line, source })
        })
        .collect()
}

pub async fn load_script(path: &Path) -> Result<Vec<Event>, ScriptError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let events = parse_script(&content)?;
    tracing::info!(path = %path.display(), count = events.len(), "Loaded event script");
    Ok(events)
}

use std::path::{Path, PathBuf};

use mcp_sse::model::{CallToolResult, Content, ErrorData};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LsError {
    #[error("Error: Directory '{}' does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("Error: '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("Error: cannot read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListDirectory {
    /// Directory to list, relative to the server's working directory
    #[serde(default = "current_dir")]
    pub path: String,
}

fn current_dir() -> String {
    ".".to_string()
}

/// One line per entry, directories first, each group sorted by name.
pub async fn list_directory(base: &Path, requested: &str) -> Result<String, LsError> {
    let path: PathBuf = base.join(requested);
    let Ok(metadata) = tokio::fs::metadata(&path).await else {
        return Err(LsError::NotFound(path));
    };
    if !metadata.is_dir() {
        return Err(LsError::NotADirectory(path));
    }
    let read_error = |source| LsError::Read {
        path: path.clone(),
        source,
    };
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&path).await.map_err(read_error)?;
    while let Some(entry) = dir.next_entry().await.map_err(read_error)? {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push((!is_dir, entry.file_name().to_string_lossy().into_owned()));
    }
    if entries.is_empty() {
        return Ok("Empty directory".to_string());
    }
    entries.sort();
    Ok(entries
        .into_iter()
        .map(|(is_file, name)| format!("{}{name}", if is_file { "- " } else { "d " }))
        .collect::<Vec<_>>()
        .join("\n"))
}

pub async fn ls(ListDirectory { path }: ListDirectory) -> Result<CallToolResult, ErrorData> {
    let base = std::env::current_dir()
        .map_err(|e| ErrorData::internal_error(format!("no working directory: {e}"), None))?;
    tracing::debug!(%path, base = %base.display(), "ls");
    Ok(match list_directory(&base, &path).await {
        Ok(listing) => CallToolResult::success(vec![Content::text(listing)]),
        Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
    })
}

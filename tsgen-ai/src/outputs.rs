//! Finalized artifact persistence
//!
//! Writes one directory per session under the configured output directory:
//! `extracted_data.json`, `conflicts.json`, `user_decisions.json`, the
//! rendered document (`<document_type>.md`) and `execution_log.json`.

use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::session::FinalArtifacts;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {name}: {source}")]
    Serialize {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(session_id.to_string())
    }

    /// Write every artifact; returns the paths written
    pub async fn write(&self, artifacts: &FinalArtifacts) -> Result<Vec<PathBuf>, OutputError> {
        let dir = self.session_dir(artifacts.session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| OutputError::Io {
                path: dir.clone(),
                source,
            })?;

        let extracted = json!({
            "session_id": artifacts.session_id,
            "document_type": artifacts.document_type,
            "generated_at": artifacts.generated_at,
            "sections": &artifacts.fields,
        });

        let files: Vec<(String, String)> = vec![
            ("extracted_data.json".to_string(), to_json("extracted_data", &extracted)?),
            ("conflicts.json".to_string(), to_json("conflicts", &artifacts.conflicts)?),
            ("user_decisions.json".to_string(), to_json("user_decisions", &artifacts.decisions)?),
            (format!("{}.md", artifacts.document_type), artifacts.document.clone()),
            ("execution_log.json".to_string(), to_json("execution_log", &artifacts.execution)?),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, contents) in files {
            let path = dir.join(&name);
            tokio::fs::write(&path, contents)
                .await
                .map_err(|source| OutputError::Io {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "Artifact written");
            written.push(path);
        }
        Ok(written)
    }
}

fn to_json<T: Serialize + ?Sized>(name: &'static str, value: &T) -> Result<String, OutputError> {
    serde_json::to_string_pretty(value).map_err(|source| OutputError::Serialize { name, source })
}

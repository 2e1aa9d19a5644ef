//! Source Context Builder
//!
//! Concept: Turn the configured source documents into one normalized text
//! context, each document tagged with a key and a role
//! Synchronization: Built once per extraction run, shared read-only by
//! every section call

pub mod parsers;

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use tsgen_common::config::{SourceRole, SourceRule};

use parsers::{archive_entries, extract_text, matches_pattern, SourceFormat};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable source documents in {0}")]
    NoDocuments(PathBuf),

    #[error("source build task failed: {0}")]
    Internal(String),
}

/// One normalized source document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDocument {
    pub key: String,
    pub file_name: String,
    pub role: SourceRole,
    pub text: String,
}

/// Every source document for a run, in prompt order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceContext {
    documents: Vec<SourceDocument>,
}

impl SourceContext {
    /// Orders documents deal-specific first, then policy, then reference
    pub fn new(mut documents: Vec<SourceDocument>) -> Self {
        documents.sort_by_key(|d| match d.role {
            SourceRole::DealSpecific => 0,
            SourceRole::Policy => 1,
            SourceRole::Reference => 2,
        });
        Self { documents }
    }

    pub fn documents(&self) -> &[SourceDocument] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn total_chars(&self) -> usize {
        self.documents.iter().map(|d| d.text.len()).sum()
    }

    /// Find the document a model citation refers to
    ///
    /// Matches file name, key or file stem, case-insensitively, after
    /// dropping any directory prefix and sheet/cell suffix (`Model.csv!B5`).
    pub fn resolve(&self, cited: &str) -> Option<&SourceDocument> {
        let cited = cited.trim();
        let cited = cited.split('!').next().unwrap_or(cited);
        let cited = cited.rsplit(['/', '\\']).next().unwrap_or(cited).trim();
        if cited.is_empty() {
            return None;
        }

        self.documents
            .iter()
            .find(|d| d.file_name == cited || d.key == cited)
            .or_else(|| {
                self.documents.iter().find(|d| {
                    d.file_name.eq_ignore_ascii_case(cited)
                        || d.key.eq_ignore_ascii_case(cited)
                        || file_stem(&d.file_name).eq_ignore_ascii_case(file_stem(cited))
                })
            })
    }

    /// Full text of every document under `=== KEY (file) ===` headers
    pub fn render(&self) -> String {
        let mut out = String::new();
        for doc in &self.documents {
            let label = match doc.role {
                SourceRole::Reference => " [REFERENCE ONLY - format guidance, not deal data]",
                _ => "",
            };
            out.push_str(&format!(
                "=== {} ({}){} ===\n{}\n\n",
                doc.key.to_uppercase(),
                doc.file_name,
                label,
                doc.text
            ));
        }
        out
    }
}

fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

fn push_document(
    documents: &mut Vec<SourceDocument>,
    mut key: String,
    file_name: String,
    role: SourceRole,
    text: String,
) {
    if documents.iter().any(|d| d.key == key) {
        key = format!("{}/{}", key, file_name.to_lowercase());
    }
    documents.push(SourceDocument {
        key,
        file_name,
        role,
        text,
    });
}

/// Produces the source context for an extraction run
#[async_trait]
pub trait SourceContextBuilder: Send + Sync {
    async fn build(&self) -> Result<SourceContext, SourceError>;
}

/// Metadata for one file in the data directory
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceInfo {
    pub name: String,
    pub key: String,
    pub role: SourceRole,
    /// Normalized format name, or `unsupported`
    pub format: String,
    pub size_bytes: u64,
}

/// Builds the context from files in a directory, classified by rules
#[derive(Debug, Clone)]
pub struct DirectorySourceBuilder {
    dir: PathBuf,
    rules: Vec<SourceRule>,
}

impl DirectorySourceBuilder {
    pub fn new(dir: impl Into<PathBuf>, rules: Vec<SourceRule>) -> Self {
        Self {
            dir: dir.into(),
            rules,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Key and role for a file name; first matching rule wins
    ///
    /// Unmatched files are reference documents keyed by their stem.
    pub fn classify(&self, file_name: &str) -> (String, SourceRole) {
        self.rules
            .iter()
            .find(|rule| matches_pattern(&rule.pattern, file_name))
            .map(|rule| (rule.key.clone(), rule.role))
            .unwrap_or_else(|| {
                (
                    format!("reference/{}", file_stem(file_name).to_lowercase()),
                    SourceRole::Reference,
                )
            })
    }

    /// Visible files in the directory tree, sorted by path
    pub fn discover(&self) -> Result<Vec<PathBuf>, SourceError> {
        if !self.dir.is_dir() {
            return Err(SourceError::DirectoryNotFound(self.dir.clone()));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !name.starts_with("__")
            })
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Load, classify and normalize the given files
    ///
    /// Unsupported or unreadable files are skipped with a warning. Files
    /// inside a ZIP archive become reference documents keyed
    /// `<archive stem>/<file name>`. A key used by more than one file is
    /// suffixed with the file name after its first use.
    pub fn build_from_files(&self, files: &[PathBuf]) -> Result<SourceContext, SourceError> {
        let mut documents: Vec<SourceDocument> = Vec::new();

        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());

            let Some(format) = SourceFormat::from_path(path) else {
                warn!(file = %file_name, "Unsupported source format, skipping");
                continue;
            };

            let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;

            if format == SourceFormat::Archive {
                let entries = match archive_entries(&bytes) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(file = %file_name, error = %e, "Unreadable archive, skipping");
                        continue;
                    }
                };
                info!(file = %file_name, entries = entries.len(), "Expanding archive");
                let stem = file_stem(&file_name).to_string();
                for entry in entries {
                    match extract_text(&entry.bytes, entry.format, &entry.name) {
                        Ok(text) => push_document(
                            &mut documents,
                            format!("{}/{}", stem, entry.name),
                            entry.name,
                            SourceRole::Reference,
                            text,
                        ),
                        Err(e) => {
                            warn!(archive = %file_name, file = %entry.name, error = %e, "Skipping archive entry");
                        }
                    }
                }
                continue;
            }

            let text = match extract_text(&bytes, format, &file_name) {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %file_name, format = format.name(), error = %e, "Skipping unreadable source");
                    continue;
                }
            };

            let (key, role) = self.classify(&file_name);
            debug!(file = %file_name, key = %key, role = role.as_str(), format = format.name(), "Loaded source document");
            push_document(&mut documents, key, file_name, role, text);
        }

        if documents.is_empty() {
            return Err(SourceError::NoDocuments(self.dir.clone()));
        }

        let context = SourceContext::new(documents);
        info!(
            documents = context.documents().len(),
            chars = context.total_chars(),
            "Source context built"
        );
        Ok(context)
    }

    /// Describe every visible file in the data directory
    pub fn list(&self) -> Result<Vec<DataSourceInfo>, SourceError> {
        self.discover()?
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let size_bytes = std::fs::metadata(&path)
                    .map_err(|source| SourceError::Io {
                        path: path.clone(),
                        source,
                    })?
                    .len();
                let (key, role) = self.classify(&name);
                Ok(DataSourceInfo {
                    format: SourceFormat::from_path(&path)
                        .map(|f| f.name().to_string())
                        .unwrap_or_else(|| "unsupported".to_string()),
                    name,
                    key,
                    role,
                    size_bytes,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceContextBuilder for DirectorySourceBuilder {
    async fn build(&self) -> Result<SourceContext, SourceError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || {
            let files = builder.discover()?;
            builder.build_from_files(&files)
        })
        .await
        .map_err(|e| SourceError::Internal(e.to_string()))?
    }
}

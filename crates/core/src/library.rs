use crate::config::LimitsConfig;
use crate::error::IngestError;
use crate::extractor::{file_name_of, Extractor, FileKind};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// A file kept in the document root.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredDocument {
    pub file_name: String,
    pub size: u64,
    pub kind: String,
    pub path: PathBuf,
}

/// The directory holding every accepted document.
///
/// Only the top level is considered; files of unsupported kinds that end up
/// there are ignored by `list` and `discover`.
#[derive(Debug, Clone)]
pub struct DocumentLibrary {
    root: PathBuf,
    extractor: Extractor,
    max_total_bytes: u64,
}

impl DocumentLibrary {
    pub fn new(root: impl Into<PathBuf>, limits: LimitsConfig) -> Self {
        Self {
            root: root.into(),
            extractor: Extractor::new(limits.max_file_bytes()),
            max_total_bytes: limits.max_total_bytes(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates `path` and copies it into the root under its own file name,
    /// replacing a stored file of the same name.
    pub fn accept(&self, path: &Path) -> Result<StoredDocument, IngestError> {
        let kind = self.extractor.validate(path)?;
        let file_name = file_name_of(path)?;
        let size = fs::metadata(path)?.len();

        let destination = self.root.join(&file_name);
        let replaced = fs::metadata(&destination)
            .map(|meta| if meta.is_file() { meta.len() } else { 0 })
            .unwrap_or(0);
        let used = self.total_usage()?.saturating_sub(replaced);
        if used.saturating_add(size) > self.max_total_bytes {
            return Err(IngestError::CorpusFull {
                used,
                max: self.max_total_bytes,
                needed: size,
            });
        }

        fs::create_dir_all(&self.root)?;
        if fs::canonicalize(path).ok() != fs::canonicalize(&destination).ok() {
            fs::copy(path, &destination)?;
        }
        info!(file = %file_name, bytes = size, root = %self.root.display(), "document stored");

        Ok(StoredDocument {
            file_name,
            size,
            kind: format!(".{}", kind.extension()),
            path: destination,
        })
    }

    /// Stored documents of a supported kind, sorted by file name.
    pub fn list(&self) -> Result<Vec<StoredDocument>, IngestError> {
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "document root does not exist yet");
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(kind) = FileKind::from_path(entry.path()) else {
                continue;
            };
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            documents.push(StoredDocument {
                file_name: entry.file_name().to_string_lossy().to_string(),
                size,
                kind: format!(".{}", kind.extension()),
                path: entry.path().to_path_buf(),
            });
        }

        documents.sort_unstable_by(|left, right| left.file_name.cmp(&right.file_name));
        Ok(documents)
    }

    pub fn discover(&self) -> Result<Vec<PathBuf>, IngestError> {
        Ok(self.list()?.into_iter().map(|document| document.path).collect())
    }

    /// Bytes used by every regular file in the root, supported or not.
    pub fn total_usage(&self) -> Result<u64, IngestError> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        let mut total = 0u64;
        for entry in fs::read_dir(&self.root)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                total = total.saturating_add(metadata.len());
            }
        }
        Ok(total)
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes
    }
}

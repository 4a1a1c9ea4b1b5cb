use crate::chunking::Chunker;
use crate::error::IngestError;
use crate::extractor::{digest_bytes, file_name_of, Extractor};
use crate::library::DocumentLibrary;
use crate::models::Chunk;
use crate::traits::VectorIndex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Chunked,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file_name: String,
    pub path: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub char_count: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file_name: String,
    pub path: PathBuf,
    pub message: String,
    /// Rejected before the contents were read.
    pub validation: bool,
}

/// Extraction and indexing are tracked separately: a file counts as
/// succeeded once it is chunked, even if the index write later fails.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_unchanged: usize,
    pub chunks_indexed: usize,
    pub indexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
    pub files: Vec<FileReport>,
    pub errors: Vec<FileError>,
    pub summary: String,
}

impl IngestReport {
    fn record_failure(&mut self, path: &Path, cause: &IngestError) {
        let file_name = display_name(path);
        let message = cause.to_string();
        warn!(file = %file_name, reason = %message, "skipped document");
        self.failed += 1;
        self.files.push(FileReport {
            file_name: file_name.clone(),
            path: path.to_path_buf(),
            status: FileStatus::Failed,
            source_id: None,
            char_count: 0,
            chunks: 0,
        });
        self.errors.push(FileError {
            file_name,
            path: path.to_path_buf(),
            message,
            validation: cause.is_validation(),
        });
    }

    fn summarize(&mut self) {
        let mut summary = format!(
            "processed {} document(s) successfully, {} error(s)",
            self.succeeded, self.failed
        );
        if self.skipped_unchanged > 0 {
            summary.push_str(&format!(", {} unchanged", self.skipped_unchanged));
        }
        summary.push_str(&format!("; {} chunk(s) indexed", self.chunks_indexed));
        if let Some(reason) = &self.index_error {
            summary.push_str(&format!(" (indexing failed: {reason})"));
        }
        self.summary = summary;
    }
}

/// Validates, extracts and chunks a batch of files, then writes every chunk
/// of the batch into the index in one call.
///
/// Runs must not overlap: the index does not support concurrent writers.
pub struct IngestionPipeline {
    extractor: Extractor,
    chunker: Chunker,
    library: DocumentLibrary,
    index: Arc<dyn VectorIndex>,
    max_files: usize,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Extractor,
        chunker: Chunker,
        library: DocumentLibrary,
        index: Arc<dyn VectorIndex>,
        max_files: usize,
    ) -> Self {
        Self {
            extractor,
            chunker,
            library,
            index,
            max_files: max_files.max(1),
        }
    }

    /// `None` re-ingests every document in the library.
    pub async fn ingest(&self, paths: Option<&[PathBuf]>) -> IngestReport {
        let mut report = IngestReport::default();

        let files = match paths {
            Some(paths) => paths.to_vec(),
            None => match self.library.discover() {
                Ok(found) => found,
                Err(cause) => {
                    error!(
                        root = %self.library.root().display(),
                        reason = %cause,
                        "document discovery failed"
                    );
                    report.record_failure(self.library.root(), &cause);
                    report.summarize();
                    return report;
                }
            },
        };

        if files.is_empty() {
            info!("no documents to ingest");
            report.summarize();
            return report;
        }

        let (accepted, overflow) = files.split_at(files.len().min(self.max_files));
        for path in overflow {
            let cause = IngestError::InvalidArgument(format!(
                "batch limit of {} files exceeded",
                self.max_files
            ));
            report.record_failure(path, &cause);
        }

        info!(files = accepted.len(), "ingesting documents");
        let mut pending: Vec<Chunk> = Vec::new();
        let mut seen_sources: HashSet<String> = HashSet::new();

        for path in accepted {
            match self.prepare_file(path, &mut seen_sources).await {
                Ok(Prepared::Unchanged { file_name, source_id }) => {
                    info!(file = %file_name, "document unchanged, skipping");
                    report.skipped_unchanged += 1;
                    report.files.push(FileReport {
                        file_name,
                        path: path.clone(),
                        status: FileStatus::Unchanged,
                        source_id: Some(source_id),
                        char_count: 0,
                        chunks: 0,
                    });
                }
                Ok(Prepared::Chunked {
                    file_name,
                    source_id,
                    char_count,
                    chunks,
                }) => {
                    info!(file = %file_name, chunks = chunks.len(), "document chunked");
                    report.succeeded += 1;
                    report.files.push(FileReport {
                        file_name,
                        path: path.clone(),
                        status: FileStatus::Chunked,
                        source_id: Some(source_id),
                        char_count,
                        chunks: chunks.len(),
                    });
                    pending.extend(chunks);
                }
                Err(cause) => report.record_failure(path, &cause),
            }
        }

        if pending.is_empty() {
            // Nothing to write, so the index is already current.
            report.indexed = true;
        } else {
            match self.index.add_chunks(&pending).await {
                Ok(update) => {
                    report.indexed = true;
                    report.chunks_indexed = update.inserted_chunks;
                }
                Err(cause) => {
                    error!(reason = %cause, chunks = pending.len(), "indexing failed");
                    report.index_error = Some(cause.to_string());
                }
            }
        }

        report.summarize();
        info!(summary = %report.summary, "ingestion finished");
        report
    }

    async fn prepare_file(
        &self,
        path: &Path,
        seen_sources: &mut HashSet<String>,
    ) -> Result<Prepared, IngestError> {
        let kind = self.extractor.validate(path)?;
        let file_name = file_name_of(path)?;

        let bytes = fs::read(path)?;
        let source_id = digest_bytes(&bytes);
        if !seen_sources.insert(source_id.clone()) || self.index.contains_source(&source_id).await {
            return Ok(Prepared::Unchanged {
                file_name,
                source_id,
            });
        }

        let document = self.extractor.process_bytes(path, kind, &bytes)?;
        let chunks = self.chunker.split_document(&document);
        Ok(Prepared::Chunked {
            file_name: document.file_name,
            source_id: document.source_id,
            char_count: document.text.chars().count(),
            chunks,
        })
    }
}

enum Prepared {
    Unchanged {
        file_name: String,
        source_id: String,
    },
    Chunked {
        file_name: String,
        source_id: String,
        char_count: usize,
        chunks: Vec<Chunk>,
    },
}

fn display_name(path: &Path) -> String {
    file_name_of(path).unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::config::LimitsConfig;
    use crate::error::IndexError;
    use crate::extractor::tests::docx_bytes;
    use crate::index::tests::local_index;
    use crate::index::{EmbeddingIndex, IndexUpdate, ScoredRecord};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn pipeline_with(
        index: Arc<dyn VectorIndex>,
        root: &Path,
        max_files: usize,
    ) -> IngestionPipeline {
        IngestionPipeline::new(
            Extractor::default(),
            Chunker::new(ChunkingConfig {
                chunk_size: 80,
                chunk_overlap: 20,
            }),
            DocumentLibrary::new(root, LimitsConfig::default()),
            index,
            max_files,
        )
    }

    fn fixture() -> Result<(TempDir, Vec<PathBuf>), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let text = dir.path().join("boiler.txt");
        fs::write(
            &text,
            "The boiler runs at 12 bar.\n\nThe relief valve opens at 14 bar and must be tested monthly.",
        )?;
        let docx = dir.path().join("pump.docx");
        fs::write(
            &docx,
            docx_bytes(
                r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Pumps are serviced twice a year.</w:t></w:r></w:p></w:body></w:document>"#,
            ),
        )?;
        let broken = dir.path().join("broken.pdf");
        fs::write(&broken, b"%PDF-1.4\n%broken")?;
        let image = dir.path().join("diagram.png");
        fs::write(&image, b"png")?;
        Ok((dir, vec![text, docx, broken, image]))
    }

    #[tokio::test]
    async fn partial_failures_do_not_abort_the_batch() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index.clone(), dir.path(), 10);

        let report = pipeline.ingest(Some(files.as_slice())).await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert!(report.indexed);
        assert!(report.chunks_indexed >= 2);
        let failed: Vec<_> = report.errors.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(failed, vec!["broken.pdf", "diagram.png"]);
        assert!(!report.errors[0].validation);
        assert!(report.errors[1].validation);
        assert_eq!(index.stats().await.map(|s| s.documents), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_unchanged_files_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index.clone(), dir.path(), 10);
        let good = &files[..2];

        let first = pipeline.ingest(Some(good)).await;
        let chunks_after_first = index.stats().await.map(|s| s.chunks);
        let second = pipeline.ingest(Some(good)).await;

        assert_eq!(first.succeeded, 2);
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.skipped_unchanged, 2);
        assert_eq!(second.chunks_indexed, 0);
        assert!(second.files.iter().all(|f| f.status == FileStatus::Unchanged));
        assert_eq!(index.stats().await.map(|s| s.chunks), chunks_after_first);
        Ok(())
    }

    #[tokio::test]
    async fn changed_file_replaces_its_old_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index.clone(), dir.path(), 10);
        let boiler = files[0].clone();

        let first = pipeline.ingest(Some(std::slice::from_ref(&boiler))).await;
        fs::write(&boiler, "The boiler was replaced; it now runs at 10 bar.")?;
        let second = pipeline.ingest(Some(std::slice::from_ref(&boiler))).await;

        let old_id = first.files[0].source_id.clone().expect("source id");
        let new_id = second.files[0].source_id.clone().expect("source id");
        assert_ne!(old_id, new_id);
        assert!(!index.contains_source(&old_id).await);
        assert!(index.contains_source(&new_id).await);
        assert_eq!(index.stats().await.map(|s| s.documents), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn same_file_name_in_other_directory_survives_replacement(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let first = dir.path().join("site-a").join("notes.txt");
        let second = dir.path().join("site-b").join("notes.txt");
        fs::create_dir_all(dir.path().join("site-a"))?;
        fs::create_dir_all(dir.path().join("site-b"))?;
        fs::write(&first, "Site A compressors are checked weekly.")?;
        fs::write(&second, "Site B compressors are checked daily.")?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index.clone(), dir.path(), 10);

        let initial = pipeline.ingest(Some(&[first, second.clone()][..])).await;
        fs::write(&second, "Site B compressors are now checked hourly.")?;
        let update = pipeline.ingest(Some(std::slice::from_ref(&second))).await;

        let site_a = initial.files[0].source_id.clone().expect("source id");
        let old_site_b = initial.files[1].source_id.clone().expect("source id");
        let new_site_b = update.files[0].source_id.clone().expect("source id");
        assert!(index.contains_source(&site_a).await);
        assert!(!index.contains_source(&old_site_b).await);
        assert!(index.contains_source(&new_site_b).await);
        assert_eq!(index.stats().await.map(|s| s.documents), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn nothing_new_to_index_still_counts_as_indexed(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index, dir.path(), 10);
        pipeline.ingest(Some(&files[..1])).await;

        // The unchanged boiler.txt is skipped and diagram.png is rejected.
        let report = pipeline.ingest(Some(&[files[0].clone(), files[3].clone()][..])).await;

        assert_eq!(report.skipped_unchanged, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.chunks_indexed, 0);
        assert!(report.indexed);
        assert!(report.index_error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn reported_source_id_is_the_hash_of_the_indexed_bytes(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index.clone(), dir.path(), 10);

        let report = pipeline.ingest(Some(&files[..1])).await;

        let expected = digest_bytes(&fs::read(&files[0])?);
        assert_eq!(report.files[0].source_id.as_deref(), Some(expected.as_str()));
        assert!(index.contains_source(&expected).await);
        Ok(())
    }

    #[tokio::test]
    async fn batch_limit_reports_overflow_as_errors() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index, dir.path(), 1);

        let report = pipeline.ingest(Some(&files[..2])).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].message.contains("batch limit"));
        Ok(())
    }

    #[tokio::test]
    async fn none_ingests_the_document_root() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, _files) = fixture()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index, dir.path(), 10);

        let report = pipeline.ingest(None).await;

        // The png is not a supported kind, so discovery never offers it.
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_root_yields_empty_report() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index, &dir.path().join("docs"), 10);

        let report = pipeline.ingest(None).await;

        assert_eq!(report.succeeded + report.failed, 0);
        assert!(report.summary.contains("0 document(s)"));
        Ok(())
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn ensure_loaded(&self) -> bool {
            false
        }

        async fn add_chunks(&self, _chunks: &[Chunk]) -> Result<IndexUpdate, IndexError> {
            Err(IndexError::Embedding("provider unreachable".to_string()))
        }

        async fn similarity_search(
            &self,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<ScoredRecord>, IndexError> {
            Ok(Vec::new())
        }

        async fn contains_source(&self, _source_id: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn index_failure_keeps_extraction_results() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, files) = fixture()?;
        let pipeline = pipeline_with(Arc::new(BrokenIndex), dir.path(), 10);

        let report = pipeline.ingest(Some(&files[..2])).await;

        assert_eq!(report.succeeded, 2);
        assert!(!report.indexed);
        assert_eq!(report.chunks_indexed, 0);
        assert!(report
            .index_error
            .as_deref()
            .is_some_and(|reason| reason.contains("provider unreachable")));
        assert!(report.summary.contains("indexing failed"));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_content_in_one_batch_is_indexed_once(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let first = dir.path().join("a.txt");
        let second = dir.path().join("b.txt");
        fs::write(&first, "identical content about turbines")?;
        fs::write(&second, "identical content about turbines")?;
        let index: Arc<EmbeddingIndex> = Arc::new(local_index(&dir.path().join("index")));
        let pipeline = pipeline_with(index.clone(), dir.path(), 10);

        let report = pipeline.ingest(Some(&[first, second][..])).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped_unchanged, 1);
        assert_eq!(index.stats().await.map(|s| s.documents), Some(1));
        Ok(())
    }
}

use crate::config::ChunkingSettings;
use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata, SourceDocument};
use sha2::{Digest, Sha256};
use std::ops::Range;
use tracing::{info, warn};

/// Split points, coarsest first. A hard cut is used when none fits.
pub const SEPARATORS: [&str; 8] = ["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingSettings::default().into()
    }
}

impl From<ChunkingSettings> for ChunkingConfig {
    fn from(value: ChunkingSettings) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Provenance stamped on every chunk of one document.
#[derive(Debug, Clone)]
pub struct ChunkOrigin {
    pub file_name: String,
    pub source_id: String,
    pub source: String,
}

impl From<&SourceDocument> for ChunkOrigin {
    fn from(document: &SourceDocument) -> Self {
        Self {
            file_name: document.file_name.clone(),
            source_id: document.source_id.clone(),
            source: document.source_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Never drops a non-empty document: if splitting fails the whole text
    /// becomes a single chunk.
    pub fn split(&self, text: &str, origin: &ChunkOrigin) -> Vec<Chunk> {
        if text.trim().is_empty() {
            info!(file = %origin.file_name, "document has no text, no chunks produced");
            return Vec::new();
        }

        match self.try_split(text, origin) {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(
                    file = %origin.file_name,
                    reason = %error,
                    "splitter failed, indexing the document as a single chunk"
                );
                vec![make_chunk(origin, 0, text.to_string())]
            }
        }
    }

    pub fn split_document(&self, document: &SourceDocument) -> Vec<Chunk> {
        self.split(&document.text, &ChunkOrigin::from(document))
    }

    pub fn try_split(&self, text: &str, origin: &ChunkOrigin) -> Result<Vec<Chunk>, IngestError> {
        let spans = split_spans(text, self.config)?;
        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(sequence, span)| make_chunk(origin, sequence as u64, text[span].to_string()))
            .collect())
    }
}

/// Byte ranges of `text`, each at most `chunk_size` chars long and sharing at
/// most `chunk_overlap` chars with its predecessor. Leading and trailing
/// whitespace of each range is excluded.
pub fn split_spans(text: &str, config: ChunkingConfig) -> Result<Vec<Range<usize>>, IngestError> {
    config.validate()?;

    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let skip_whitespace = |mut index: usize| {
        while index < total && chars[index].is_whitespace() {
            index += 1;
        }
        index
    };

    let mut spans = Vec::new();
    let mut start = skip_whitespace(0);

    while start < total {
        let limit = start + config.chunk_size;
        if limit >= total {
            push_trimmed(&mut spans, &chars, &offsets, start, total);
            break;
        }

        let window = &text[offsets[start]..offsets[limit]];
        let end = start + split_point(window, config.chunk_overlap).unwrap_or(config.chunk_size);
        push_trimmed(&mut spans, &chars, &offsets, start, end);

        let mut next = end.saturating_sub(config.chunk_overlap).max(start + 1);
        if config.chunk_overlap > 0 {
            if let Some(space) = (next..end).find(|&index| chars[index].is_whitespace()) {
                next = space + 1;
            }
        }
        start = skip_whitespace(next);
    }

    Ok(spans)
}

/// Char length of the chunk ending after the coarsest separator in `window`.
/// The chunk must be longer than the overlap so the next window advances.
fn split_point(window: &str, overlap: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|separator| {
        let position = window.rfind(separator)? + separator.len();
        let length = window[..position].chars().count();
        (length > overlap).then_some(length)
    })
}

fn push_trimmed(
    spans: &mut Vec<Range<usize>>,
    chars: &[char],
    offsets: &[usize],
    mut start: usize,
    mut end: usize,
) {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    if start < end {
        spans.push(offsets[start]..offsets[end]);
    }
}

fn make_chunk(origin: &ChunkOrigin, sequence: u64, text: String) -> Chunk {
    Chunk {
        chunk_id: make_chunk_id(&origin.source_id, sequence, &text),
        sequence,
        metadata: ChunkMetadata {
            file_name: origin.file_name.clone(),
            source_id: origin.source_id.clone(),
            source: origin.source.clone(),
            char_count: text.chars().count(),
        },
        text,
    }
}

fn make_chunk_id(source_id: &str, sequence: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

//! Token-window chunking.
//!
//! Documents are split on BPE token boundaries, not characters: a sliding
//! window of `chunk_size` tokens advances by `chunk_size - chunk_overlap`
//! each step, so consecutive chunks share `chunk_overlap` tokens of context.
//! Decoded windows that are pure whitespace are dropped, but the window still
//! advances, so positions stay aligned with the token stream.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::config::RagConfig;

/// Errors from chunker construction or window decoding.
#[derive(Debug, Error, Diagnostic)]
pub enum ChunkerError {
    /// The window geometry cannot make progress.
    #[error("invalid chunk window: size {size}, overlap {overlap}")]
    #[diagnostic(
        code(ragweave::chunker::window),
        help("Chunk size must be nonzero and overlap must be smaller than the size.")
    )]
    InvalidWindow { size: usize, overlap: usize },

    /// The BPE vocabulary could not be loaded.
    #[error("tokenizer initialization failed: {message}")]
    #[diagnostic(code(ragweave::chunker::tokenizer))]
    Tokenizer { message: String },

    /// A token window did not decode back to text.
    #[error("token window could not be decoded: {message}")]
    #[diagnostic(code(ragweave::chunker::decode))]
    Decode { message: String },
}

/// One decoded window of the source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    /// Number of BPE tokens in the window (not a character count).
    pub token_count: u32,
}

/// Splits text into overlapping token windows using the `cl100k_base`
/// vocabulary.
///
/// Cloning is cheap; the vocabulary is shared behind an [`Arc`].
#[derive(Clone)]
pub struct TokenChunker {
    bpe: Arc<CoreBPE>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl std::fmt::Debug for TokenChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChunker")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish()
    }
}

impl TokenChunker {
    /// Creates a chunker with the given window geometry.
    ///
    /// Fails when `chunk_size` is zero or `chunk_overlap >= chunk_size`,
    /// since the window could never advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkerError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ChunkerError::InvalidWindow {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        let bpe = cl100k_base().map_err(|e| ChunkerError::Tokenizer {
            message: e.to_string(),
        })?;
        Ok(Self {
            bpe: Arc::new(bpe),
            chunk_size,
            chunk_overlap,
        })
    }

    /// Creates a chunker from the configured window geometry.
    pub fn from_config(config: &RagConfig) -> Result<Self, ChunkerError> {
        Self::new(config.chunk_size_tokens, config.chunk_overlap_tokens)
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Counts BPE tokens in `text`.
    #[must_use]
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Splits `text` into overlapping token windows.
    ///
    /// Empty or whitespace-only input yields no chunks. Each returned chunk
    /// records the exact number of tokens in its window, which the ingestion
    /// pipeline sums into the document's `total_tokens`.
    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkerError> {
        let tokens = self.bpe.encode_ordinary(text);
        let stride = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < tokens.len() {
            let end = usize::min(start + self.chunk_size, tokens.len());
            let window = tokens[start..end].to_vec();
            let content = self.bpe.decode(window).map_err(|e| ChunkerError::Decode {
                message: e.to_string(),
            })?;
            if !content.trim().is_empty() {
                chunks.push(TextChunk {
                    content,
                    token_count: (end - start) as u32,
                });
            }
            start += stride;
        }
        Ok(chunks)
    }
}

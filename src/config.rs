//! Runtime configuration for ingestion, retrieval, and generation.
//!
//! [`RagConfig::default`] gives deterministic built-in values; call
//! [`RagConfig::from_env`] to layer `.env` / process environment overrides on
//! top, which is what the demo binaries do. [`RagConfig::validate`] rejects
//! parameter combinations the pipeline cannot run with.

use miette::Diagnostic;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("chunk window is invalid: size {size_tokens} tokens, overlap {overlap_tokens} tokens")]
    #[diagnostic(
        code(ragweave::config::chunk_window),
        help("size must be positive and overlap strictly smaller than size")
    )]
    InvalidChunkWindow {
        size_tokens: usize,
        overlap_tokens: usize,
    },

    #[error("{field} must be positive")]
    #[diagnostic(code(ragweave::config::zero_limit))]
    ZeroLimit { field: &'static str },
}

/// Tunables shared across the pipeline.
///
/// Cloned freely; every service holds its own copy.
#[derive(Clone, Debug)]
pub struct RagConfig {
    /// Window length for token-based chunking.
    pub chunk_size_tokens: usize,
    /// Overlap carried between consecutive chunks.
    pub chunk_overlap_tokens: usize,
    /// Embedding model name sent to hosted providers.
    pub embedding_model: String,
    /// Completion model name sent to hosted providers.
    pub completion_model: String,
    /// Number of chunks retrieved per query.
    pub top_k: usize,
    /// Upload size ceiling, in bytes.
    pub max_file_size_bytes: u64,
    /// Per-owner document ceiling.
    pub max_documents_per_owner: usize,
    /// Dimensionality of the deterministic local embedding.
    pub local_embedding_dims: usize,
    /// Hosted provider credential; absent means local fallback providers.
    pub openai_api_key: Option<String>,
    /// Hosted provider endpoint root, overridable for self-hosted gateways.
    pub openai_base_url: String,
    /// Connection string for the SQLite-backed store.
    pub database_url: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: Self::DEFAULT_CHUNK_SIZE_TOKENS,
            chunk_overlap_tokens: Self::DEFAULT_CHUNK_OVERLAP_TOKENS,
            embedding_model: Self::DEFAULT_EMBEDDING_MODEL.to_string(),
            completion_model: Self::DEFAULT_COMPLETION_MODEL.to_string(),
            top_k: Self::DEFAULT_TOP_K,
            max_file_size_bytes: Self::DEFAULT_MAX_FILE_SIZE_MB * 1024 * 1024,
            max_documents_per_owner: Self::DEFAULT_MAX_DOCUMENTS_PER_OWNER,
            local_embedding_dims: Self::DEFAULT_EMBEDDING_DIMS,
            openai_api_key: None,
            openai_base_url: Self::DEFAULT_OPENAI_BASE_URL.to_string(),
            database_url: Self::DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl RagConfig {
    pub const DEFAULT_CHUNK_SIZE_TOKENS: usize = 500;
    pub const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 50;
    pub const DEFAULT_EMBEDDING_MODEL: &'static str = "text-embedding-3-small";
    pub const DEFAULT_COMPLETION_MODEL: &'static str = "gpt-4o";
    pub const DEFAULT_TOP_K: usize = 5;
    pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;
    pub const DEFAULT_MAX_DOCUMENTS_PER_OWNER: usize = 50;
    pub const DEFAULT_EMBEDDING_DIMS: usize = 64;
    pub const DEFAULT_OPENAI_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_DATABASE_URL: &'static str = "sqlite://ragweave.db";

    /// Builds a configuration from `.env` and the process environment.
    ///
    /// Unset or unparseable variables fall back to the built-in defaults.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            chunk_size_tokens: env_parse("CHUNK_SIZE_TOKENS", defaults.chunk_size_tokens),
            chunk_overlap_tokens: env_parse("CHUNK_OVERLAP_TOKENS", defaults.chunk_overlap_tokens),
            embedding_model: env_string("EMBEDDING_MODEL", defaults.embedding_model),
            completion_model: env_string("COMPLETION_MODEL", defaults.completion_model),
            top_k: env_parse("TOP_K", defaults.top_k),
            max_file_size_bytes: env_parse("MAX_FILE_SIZE_MB", Self::DEFAULT_MAX_FILE_SIZE_MB)
                * 1024
                * 1024,
            max_documents_per_owner: env_parse(
                "MAX_DOCUMENTS_PER_USER",
                defaults.max_documents_per_owner,
            ),
            local_embedding_dims: env_parse("EMBEDDING_DIMS", defaults.local_embedding_dims),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_base_url: env_string("OPENAI_BASE_URL", defaults.openai_base_url),
            database_url: env_string("DATABASE_URL", defaults.database_url),
        }
    }

    #[must_use]
    pub fn with_chunking(mut self, size_tokens: usize, overlap_tokens: usize) -> Self {
        self.chunk_size_tokens = size_tokens;
        self.chunk_overlap_tokens = overlap_tokens;
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    #[must_use]
    pub fn with_completion_model(mut self, model: &str) -> Self {
        self.completion_model = model.to_string();
        self
    }

    #[must_use]
    pub fn with_openai_api_key(mut self, key: &str) -> Self {
        self.openai_api_key = Some(key.to_string());
        self
    }

    #[must_use]
    pub fn with_openai_base_url(mut self, base_url: &str) -> Self {
        self.openai_base_url = base_url.to_string();
        self
    }

    #[must_use]
    pub fn with_max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_max_documents_per_owner(mut self, count: usize) -> Self {
        self.max_documents_per_owner = count;
        self
    }

    #[must_use]
    pub fn with_database_url(mut self, url: &str) -> Self {
        self.database_url = url.to_string();
        self
    }

    /// True when a hosted provider credential is configured.
    #[must_use]
    pub fn has_openai_credentials(&self) -> bool {
        self.openai_api_key.is_some()
    }

    /// Checks that the pipeline can actually run with these values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_tokens == 0 || self.chunk_overlap_tokens >= self.chunk_size_tokens {
            return Err(ConfigError::InvalidChunkWindow {
                size_tokens: self.chunk_size_tokens,
                overlap_tokens: self.chunk_overlap_tokens,
            });
        }
        if self.top_k == 0 {
            return Err(ConfigError::ZeroLimit { field: "top_k" });
        }
        if self.max_file_size_bytes == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_file_size_bytes",
            });
        }
        if self.max_documents_per_owner == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_documents_per_owner",
            });
        }
        if self.local_embedding_dims == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "local_embedding_dims",
            });
        }
        Ok(())
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RagConfig::default();
        assert_eq!(config.chunk_size_tokens, 500);
        assert_eq!(config.chunk_overlap_tokens, 50);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_documents_per_owner, 50);
        assert_eq!(config.local_embedding_dims, 64);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.completion_model, "gpt-4o");
        assert!(!config.has_openai_credentials());
    }

    #[test]
    fn builders_override_fields() {
        let config = RagConfig::default()
            .with_chunking(128, 16)
            .with_top_k(3)
            .with_openai_api_key("sk-test")
            .with_openai_base_url("http://localhost:9999/v1");

        assert_eq!(config.chunk_size_tokens, 128);
        assert_eq!(config.chunk_overlap_tokens, 16);
        assert_eq!(config.top_k, 3);
        assert!(config.has_openai_credentials());
        assert_eq!(config.openai_base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_windows() {
        let overlap_too_big = RagConfig::default().with_chunking(50, 50);
        assert!(matches!(
            overlap_too_big.validate(),
            Err(ConfigError::InvalidChunkWindow { .. })
        ));

        let zero_size = RagConfig::default().with_chunking(0, 0);
        assert!(zero_size.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let config = RagConfig::default().with_top_k(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroLimit { field: "top_k" })
        ));
    }
}

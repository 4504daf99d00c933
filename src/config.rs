//! Environment-driven settings shared by every binary.
//!
//! Each group is a `clap::Args` struct so binaries can `#[command(flatten)]` the pieces they
//! need; every field falls back to an environment variable and then to a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};

/// Loads `.env` from the working directory (if any) before clap reads the environment.
pub fn load_dotenv() {
    if let Ok(path) = dotenv::dotenv() {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
}

/// Local Ollama model server settings.
#[derive(Args, Debug, Clone)]
pub struct OllamaSettings {
    /// Ollama API base URL
    #[arg(long = "ollama-url", env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    pub base_url: String,

    /// Chat model used for answer generation
    #[arg(long = "chat-model", env = "OLLAMA_DEFAULT_MODEL", default_value = "qwen2.5:14b")]
    pub default_model: String,

    /// Embedding model identifier
    #[arg(
        long = "embedding-model",
        env = "OLLAMA_EMBEDDING_MODEL",
        default_value = "nomic-embed-text"
    )]
    pub embedding_model: String,

    /// Expected embedding dimension
    #[arg(long, env = "OLLAMA_EMBEDDING_DIMENSION", default_value_t = 768)]
    pub embedding_dimension: usize,

    /// Sampling temperature for generation
    #[arg(long, env = "OLLAMA_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[arg(long, env = "OLLAMA_MAX_TOKENS", default_value_t = 2048)]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[arg(
        id = "ollama_timeout_secs",
        long = "ollama-timeout-secs",
        env = "OLLAMA_TIMEOUT",
        default_value_t = 120
    )]
    pub timeout_secs: u64,

    /// Attempts per request before giving up
    #[arg(
        id = "ollama_max_retries",
        long = "ollama-max-retries",
        env = "OLLAMA_MAX_RETRIES",
        default_value_t = 3
    )]
    pub max_retries: usize,
}

impl OllamaSettings {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Checks ranges and required values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.base_url.starts_with("http://") || self.base_url.starts_with("https://"),
            "OLLAMA_BASE_URL must be an http(s) URL, got {:?}",
            self.base_url
        );
        anyhow::ensure!(!self.default_model.trim().is_empty(), "missing Ollama chat model name");
        anyhow::ensure!(
            !self.embedding_model.trim().is_empty(),
            "missing Ollama embedding model name"
        );
        anyhow::ensure!(self.embedding_dimension >= 1, "embedding dimension must be positive");
        anyhow::ensure!(
            (0.0..=2.0).contains(&self.temperature),
            "temperature {} outside 0.0..=2.0",
            self.temperature
        );
        anyhow::ensure!(self.max_tokens >= 1, "max tokens must be at least 1");
        anyhow::ensure!(self.timeout_secs >= 1, "timeout must be at least 1 second");
        anyhow::ensure!(self.max_retries >= 1, "max retries must be at least 1");
        Ok(())
    }
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "qwen2.5:14b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// Similarity metric for the hosted index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Metric {
    /// Cosine similarity (default).
    Cosine,
    /// Euclidean distance.
    Euclidean,
    /// Dot product.
    Dotproduct,
}

impl Metric {
    /// Wire name expected by the index API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dotproduct => "dotproduct",
        }
    }
}

/// Hosted Pinecone index settings.
#[derive(Args, Debug, Clone)]
pub struct PineconeSettings {
    /// Pinecone API key
    #[arg(long = "pinecone-api-key", env = "PINECONE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Index name
    #[arg(long = "index-name", env = "PINECONE_INDEX_NAME", default_value = "ecowas-summit-kb")]
    pub index_name: String,

    /// Vector dimension (must match the embedding model)
    #[arg(long = "index-dimension", env = "PINECONE_DIMENSION", default_value_t = 768)]
    pub dimension: usize,

    /// Distance metric used when creating the index
    #[arg(long, env = "PINECONE_METRIC", value_enum, default_value = "cosine")]
    pub metric: Metric,

    /// Serverless cloud provider
    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pub cloud: String,

    /// Serverless region
    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Control-plane base URL
    #[arg(
        long = "pinecone-controller-url",
        env = "PINECONE_CONTROLLER_URL",
        default_value = "https://api.pinecone.io"
    )]
    pub controller_url: String,

    /// Request timeout in seconds
    #[arg(
        id = "pinecone_timeout_secs",
        long = "pinecone-timeout-secs",
        env = "PINECONE_TIMEOUT",
        default_value_t = 30
    )]
    pub timeout_secs: u64,

    /// Attempts per request before giving up
    #[arg(
        id = "pinecone_max_retries",
        long = "pinecone-max-retries",
        env = "PINECONE_MAX_RETRIES",
        default_value_t = 3
    )]
    pub max_retries: usize,
}

impl PineconeSettings {
    /// Returns the API key or a descriptive error when it is missing.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow::anyhow!("PINECONE_API_KEY not set"))
    }

    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Checks ranges and required values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.index_name.trim().is_empty(), "index name is required");
        anyhow::ensure!(self.dimension >= 1, "index dimension must be positive");
        anyhow::ensure!(!self.cloud.trim().is_empty(), "cloud provider is required");
        anyhow::ensure!(!self.region.trim().is_empty(), "cloud region is required");
        Ok(())
    }
}

impl Default for PineconeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            index_name: "ecowas-summit-kb".to_string(),
            dimension: 768,
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            controller_url: "https://api.pinecone.io".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Chunking strategy selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChunkStrategy {
    /// Fixed-size windows snapped to sentence endings.
    Fixed,
    /// Sentence-grouped chunks bounded by min/max sizes.
    Semantic,
    /// Separator hierarchy (paragraph, line, sentence, word, character).
    Recursive,
}

/// Document ingestion knobs.
#[derive(Args, Debug, Clone)]
pub struct IngestionSettings {
    /// Target chunk size in characters (fixed/recursive strategies)
    #[arg(long, env = "INGESTION_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    /// Overlap between chunks in characters (fixed/recursive strategies)
    #[arg(long, env = "INGESTION_CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Maximum chunk size in characters (semantic strategy)
    #[arg(long, env = "INGESTION_MAX_CHUNK_SIZE", default_value_t = 1500)]
    pub max_chunk_size: usize,

    /// Minimum chunk size in characters (semantic strategy)
    #[arg(long, env = "INGESTION_MIN_CHUNK_SIZE", default_value_t = 500)]
    pub min_chunk_size: usize,

    /// Chunking strategy
    #[arg(long, env = "INGESTION_STRATEGY", value_enum, default_value = "semantic")]
    pub strategy: ChunkStrategy,

    /// Vectors per upsert request
    #[arg(long, env = "INGESTION_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,
}

impl IngestionSettings {
    /// Checks ranges and required values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.chunk_size >= 100,
            "chunk size {} below minimum of 100",
            self.chunk_size
        );
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk overlap {} must be smaller than chunk size {}",
            self.chunk_overlap,
            self.chunk_size
        );
        anyhow::ensure!(
            self.min_chunk_size <= self.max_chunk_size,
            "min chunk size {} exceeds max chunk size {}",
            self.min_chunk_size,
            self.max_chunk_size
        );
        anyhow::ensure!(self.batch_size >= 1, "batch size must be at least 1");
        Ok(())
    }
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_chunk_size: 1500,
            min_chunk_size: 500,
            strategy: ChunkStrategy::Semantic,
            batch_size: 100,
        }
    }
}

/// Project directory layout.
#[derive(Args, Debug, Clone)]
pub struct PathSettings {
    /// Project root holding `data/` and `logs/`
    #[arg(long = "project-root", env = "SUMMIT_KB_ROOT", default_value = ".")]
    pub project_root: PathBuf,
}

impl PathSettings {
    /// Builds a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: root.into(),
        }
    }

    /// `<root>/data`
    pub fn data_dir(&self) -> PathBuf {
        self.project_root.join("data")
    }

    /// `<root>/data/raw`, where source documents are dropped.
    pub fn raw_data_dir(&self) -> PathBuf {
        self.data_dir().join("raw")
    }

    /// `<root>/data/processed`
    pub fn processed_data_dir(&self) -> PathBuf {
        self.data_dir().join("processed")
    }

    /// `<root>/data/metadata`
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir().join("metadata")
    }

    /// `<root>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.project_root.join("logs")
    }

    /// Directories created by the setup binary.
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.raw_data_dir(),
            self.processed_data_dir(),
            self.metadata_dir(),
            self.logs_dir(),
        ]
    }

    /// Returns the project root.
    pub fn root(&self) -> &Path {
        &self.project_root
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Logging knobs.
#[derive(Args, Debug, Clone)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Full application settings.
#[derive(Args, Debug, Clone, Default)]
pub struct Settings {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub ollama: OllamaSettings,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub pinecone: PineconeSettings,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub ingestion: IngestionSettings,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub paths: PathSettings,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub logging: LogSettings,
}

impl Settings {
    /// Validates every group plus cross-group constraints.
    pub fn validate(&self) -> Result<()> {
        self.ollama.validate()?;
        self.pinecone.validate()?;
        self.ingestion.validate()?;
        anyhow::ensure!(
            self.ollama.embedding_dimension == self.pinecone.dimension,
            "embedding dimension {} does not match index dimension {}",
            self.ollama.embedding_dimension,
            self.pinecone.dimension
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().expect("defaults are valid");
        assert_eq!(settings.ingestion.strategy, ChunkStrategy::Semantic);
        assert_eq!(settings.pinecone.metric.as_str(), "cosine");
    }

    #[test]
    fn parses_flags_over_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--chunk-size",
            "400",
            "--chunk-overlap",
            "50",
            "--strategy",
            "recursive",
            "--index-name",
            "custom",
            "--project-root",
            "/tmp/kb",
        ]);
        let settings = cli.settings;
        assert_eq!(settings.ingestion.chunk_size, 400);
        assert_eq!(settings.ingestion.strategy, ChunkStrategy::Recursive);
        assert_eq!(settings.pinecone.index_name, "custom");
        assert_eq!(
            settings.paths.raw_data_dir(),
            PathBuf::from("/tmp/kb/data/raw")
        );
    }

    #[test]
    fn flattened_groups_have_unique_ids() {
        TestCli::command().debug_assert();
    }

    #[test]
    fn service_timeouts_and_retries_are_independent() {
        let cli = TestCli::try_parse_from([
            "test",
            "--ollama-timeout-secs",
            "120",
            "--pinecone-timeout-secs",
            "7",
            "--ollama-max-retries",
            "5",
            "--pinecone-max-retries",
            "2",
        ])
        .unwrap();
        let settings = cli.settings;
        assert_eq!(settings.ollama.timeout(), Duration::from_secs(120));
        assert_eq!(settings.pinecone.timeout(), Duration::from_secs(7));
        assert_eq!(settings.ollama.max_retries, 5);
        assert_eq!(settings.pinecone.max_retries, 2);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut ollama = OllamaSettings::default();
        ollama.temperature = 2.5;
        assert!(ollama.validate().is_err());

        let mut ingestion = IngestionSettings::default();
        ingestion.chunk_size = 50;
        assert!(ingestion.validate().is_err());

        let mut ingestion = IngestionSettings::default();
        ingestion.chunk_overlap = ingestion.chunk_size;
        assert!(ingestion.validate().is_err());

        let mut settings = Settings::default();
        settings.pinecone.dimension = 1024;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn api_key_must_be_present() {
        let mut pinecone = PineconeSettings::default();
        assert!(pinecone.require_api_key().is_err());
        pinecone.api_key = Some("  ".to_string());
        assert!(pinecone.require_api_key().is_err());
        pinecone.api_key = Some("pc-key".to_string());
        assert_eq!(pinecone.require_api_key().unwrap(), "pc-key");
    }
}

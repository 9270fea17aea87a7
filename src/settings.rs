use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "doc-search";
const ENV_PREFIX: &str = "DOC_SEARCH";

/// Service configuration.
///
/// Layered lowest to highest: built-in defaults, `doc-search.toml` (or an
/// explicit `--config` file), then `DOC_SEARCH__SECTION__KEY` variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub index: IndexSettings,
    pub search: SearchSettings,
    pub embedding: EmbeddingSettings,
    pub vector_store: VectorStoreSettings,
    pub summarizer: SummarizerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub index_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/sample_data"),
            index_dir: PathBuf::from("faiss_store"),
            allowed_extensions: vec!["pdf".to_string()],
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub rebuild_timeout_secs: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Build or load the index in the background as soon as the server starts.
    pub warm_on_start: bool,
}

impl IndexSettings {
    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_secs(self.rebuild_timeout_secs)
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            rebuild_timeout_secs: 300,
            chunk_size: 1000,
            chunk_overlap: 200,
            warm_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hashing,
    FastEmbed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model_dir: PathBuf,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model_dir: PathBuf::from("models/bge-small-en-v1.5"),
            dimensions: 384,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreBackend {
    Local,
    Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub backend: VectorStoreBackend,
    pub qdrant_url: String,
    pub collection: String,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            backend: VectorStoreBackend::Local,
            qdrant_url: "http://localhost:6334".to_string(),
            collection: "documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerProvider {
    Extractive,
    Chat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
    pub provider: SummarizerProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_context_tokens: usize,
    /// Upper bound for one chat completion request, connect included.
    pub request_timeout_secs: u64,
}

impl SummarizerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            provider: SummarizerProvider::Extractive,
            base_url: "http://localhost:4000".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_context_tokens: 3000,
            request_timeout_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings from the optional config file and the environment.
    ///
    /// An explicit `path` must exist; the default `doc-search.*` file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p.to_path_buf()).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("storage.allowed_extensions")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.allowed_extensions.is_empty() {
            anyhow::bail!("storage.allowed_extensions must not be empty");
        }
        if self.search.max_top_k == 0 {
            anyhow::bail!("search.max_top_k must be at least 1");
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            anyhow::bail!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap,
                self.index.chunk_size
            );
        }
        if self.embedding.dimensions == 0 {
            anyhow::bail!("embedding.dimensions must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_constants() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.storage.allowed_extensions, vec!["pdf"]);
        assert_eq!(settings.storage.max_upload_bytes, 52_428_800);
        assert_eq!(settings.search.default_top_k, 5);
        assert_eq!(settings.search.max_top_k, 20);
        assert_eq!(settings.index.rebuild_timeout(), Duration::from_secs(300));
        assert_eq!(settings.summarizer.request_timeout(), Duration::from_secs(60));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 8088

[storage]
allowed_extensions = ["pdf", "txt"]

[embedding]
provider = "hashing"
dimensions = 64
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.storage.allowed_extensions, vec!["pdf", "txt"]);
        assert_eq!(settings.embedding.dimensions, 64);
        assert_eq!(settings.vector_store.backend, VectorStoreBackend::Local);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut settings = Settings::default();
        settings.index.chunk_overlap = settings.index.chunk_size;
        assert!(settings.validate().is_err());
    }
}

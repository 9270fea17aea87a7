use std::path::Path;

use anyhow::{Context, Result};
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use sha2::{Digest, Sha256};

/// Turns text into fixed-size vectors.
pub trait Embedder: Send + Sync {
    /// Stable identifier; part of the index fingerprint.
    fn id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()])?
            .into_iter()
            .next()
            .context("Embedder returned no vector")
    }
}

/// ONNX sentence embedding model loaded from a local directory.
pub struct FastEmbedder {
    id: String,
    dimensions: usize,
    model: TextEmbedding,
}

impl FastEmbedder {
    pub fn from_dir(model_dir: &Path, dimensions: usize) -> Result<Self> {
        tracing::info!(dir = %model_dir.display(), "Loading embedding model");
        if !model_dir.is_dir() {
            anyhow::bail!("Model directory not found: {}", model_dir.display());
        }

        let read = |name: &str| {
            std::fs::read(model_dir.join(name))
                .with_context(|| format!("Failed to read {}", model_dir.join(name).display()))
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());
        tracing::info!(model = %name, "Embedding model ready");

        Ok(Self {
            id: format!("fastembed:{}", name),
            dimensions,
            model,
        })
    }
}

impl Embedder for FastEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let vectors = self.model.embed(texts, None)?;
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dimensions) {
            anyhow::bail!(
                "Model produced {}-dimensional vectors, configured for {}",
                v.len(),
                self.dimensions
            );
        }
        Ok(vectors)
    }
}

/// Feature-hashing bag of words. Needs no model files and is deterministic
/// across processes, so persisted indexes stay valid between restarts.
pub struct HashingEmbedder {
    id: String,
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            id: format!("hashing-{}", dimensions),
            dimensions: dimensions.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            vector[slot] += if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

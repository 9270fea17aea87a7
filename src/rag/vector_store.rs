use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    pub score: f32,
}

/// Nearest-neighbour index over chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Load a previously persisted index built for `fingerprint`.
    /// Returns `false` when nothing matching is available.
    async fn load_existing(&self, fingerprint: &str) -> Result<bool>;

    async fn replace_all(&self, chunks: Vec<IndexedChunk>, fingerprint: &str) -> Result<()>;

    /// Append chunks; `fingerprint` describes the document set afterwards.
    async fn add_chunks(&self, chunks: Vec<IndexedChunk>, fingerprint: &str) -> Result<()>;

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    async fn len(&self) -> Result<usize>;

    /// Release resources once a newer store has replaced this one.
    async fn retire(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens a fresh store for each build so the previous one keeps serving
/// searches until it is swapped out.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn VectorStore>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalIndex {
    fingerprint: String,
    dimensions: usize,
    chunks: Vec<IndexedChunk>,
}

/// Flat in-memory index persisted as JSON.
pub struct LocalVectorStore {
    path: PathBuf,
    dimensions: usize,
    index: RwLock<LocalIndex>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl LocalVectorStore {
    pub fn new(path: PathBuf, dimensions: usize) -> Self {
        Self {
            path,
            dimensions,
            index: RwLock::new(LocalIndex {
                dimensions,
                ..Default::default()
            }),
        }
    }

    fn check_dimensions(&self, chunks: &[IndexedChunk]) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != self.dimensions) {
            anyhow::bail!(
                "Chunk {} has {} dimensions, index expects {}",
                bad.id,
                bad.embedding.len(),
                self.dimensions
            );
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let bytes = {
            let index = self.index.read().await;
            serde_json::to_vec(&*index)?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn load_existing(&self, fingerprint: &str) -> Result<bool> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let stored: LocalIndex = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Ignoring unreadable index: {}", e);
                return Ok(false);
            }
        };
        if stored.fingerprint != fingerprint || stored.dimensions != self.dimensions {
            tracing::debug!(path = %self.path.display(), "Persisted index is stale");
            return Ok(false);
        }

        tracing::info!(chunks = stored.chunks.len(), "Loaded existing index");
        *self.index.write().await = stored;
        Ok(true)
    }

    async fn replace_all(&self, chunks: Vec<IndexedChunk>, fingerprint: &str) -> Result<()> {
        self.check_dimensions(&chunks)?;
        *self.index.write().await = LocalIndex {
            fingerprint: fingerprint.to_string(),
            dimensions: self.dimensions,
            chunks,
        };
        self.persist().await
    }

    async fn add_chunks(&self, chunks: Vec<IndexedChunk>, fingerprint: &str) -> Result<()> {
        self.check_dimensions(&chunks)?;
        {
            let mut index = self.index.write().await;
            index.chunks.extend(chunks);
            index.fingerprint = fingerprint.to_string();
        }
        self.persist().await
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let index = self.index.read().await;
        let mut scored: Vec<(f32, &IndexedChunk)> = index
            .chunks
            .iter()
            .map(|c| (cosine_similarity(query, &c.embedding), c))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, c)| SearchHit {
                text: c.text.clone(),
                source: c.source.clone(),
                chunk_index: c.chunk_index,
                score,
            })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.index.read().await.chunks.len())
    }
}

pub struct LocalStoreProvider {
    path: PathBuf,
    dimensions: usize,
}

impl LocalStoreProvider {
    pub fn new(index_dir: PathBuf, dimensions: usize) -> Self {
        Self {
            path: index_dir.join("index.json"),
            dimensions,
        }
    }
}

#[async_trait]
impl StoreProvider for LocalStoreProvider {
    async fn open(&self) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(LocalVectorStore::new(self.path.clone(), self.dimensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            id: id.to_string(),
            text: format!("text of {}", id),
            source: format!("{}.pdf", id),
            chunk_index: 0,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path().join("index.json"), 2);
        store
            .replace_all(
                vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.7, 0.7]), chunk("c", vec![0.0, 1.0])],
                "fp",
            )
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "a.pdf");
        assert_eq!(hits[1].source, "b.pdf");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_persisted_index_reloads_only_for_matching_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("index.json");
        let store = LocalVectorStore::new(path.clone(), 2);
        store.replace_all(vec![chunk("a", vec![1.0, 0.0])], "fp-1").await.unwrap();

        let reopened = LocalVectorStore::new(path.clone(), 2);
        assert!(!reopened.load_existing("fp-2").await.unwrap());
        assert_eq!(reopened.len().await.unwrap(), 0);
        assert!(reopened.load_existing("fp-1").await.unwrap());
        assert_eq!(reopened.len().await.unwrap(), 1);

        let other_dims = LocalVectorStore::new(path, 3);
        assert!(!other_dims.load_existing("fp-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_or_missing_file_is_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let store = LocalVectorStore::new(path.clone(), 2);
        assert!(!store.load_existing("fp").await.unwrap());

        std::fs::write(&path, b"{not json").unwrap();
        assert!(!store.load_existing("fp").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_chunks_appends_and_rejects_wrong_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path().join("index.json"), 2);
        store.replace_all(vec![chunk("a", vec![1.0, 0.0])], "fp-1").await.unwrap();
        store.add_chunks(vec![chunk("b", vec![0.0, 1.0])], "fp-2").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert!(store.add_chunks(vec![chunk("c", vec![1.0])], "fp-3").await.is_err());

        let reopened = LocalVectorStore::new(dir.path().join("index.json"), 2);
        assert!(reopened.load_existing("fp-2").await.unwrap());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeleteCollectionBuilder, Distance, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::vector_store::{IndexedChunk, SearchHit, StoreProvider, VectorStore};

const UPSERT_BATCH: usize = 128;

/// Qdrant-backed store. Every build writes a collection of its own,
/// `<base>_<fingerprint prefix>_<millis>_<id>`, so a rebuild never touches
/// the collection an older handle is still searching. A retired store drops
/// its collection once the last handle to it is gone.
pub struct QdrantVectorStore {
    client: Arc<Qdrant>,
    base: String,
    dimensions: u64,
    collection: RwLock<Option<String>>,
    retired: AtomicBool,
}

fn collection_prefix(base: &str, fingerprint: &str) -> String {
    let prefix: String = fingerprint.chars().take(12).collect();
    format!("{}_{}_", base, prefix)
}

fn build_collection_name(base: &str, fingerprint: &str, millis: i64, id: &str) -> String {
    let id: String = id.chars().take(8).collect();
    format!("{}{:013}_{}", collection_prefix(base, fingerprint), millis, id)
}

/// Names sort by build time, so the greatest match is the latest build.
fn newest_for_fingerprint<'a>(
    names: impl IntoIterator<Item = &'a str>,
    base: &str,
    fingerprint: &str,
) -> Option<String> {
    let prefix = collection_prefix(base, fingerprint);
    names
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .max()
        .map(str::to_string)
}

impl QdrantVectorStore {
    async fn current(&self) -> Result<String> {
        self.collection
            .read()
            .await
            .clone()
            .context("Qdrant store has no collection yet")
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(self.dimensions, Distance::Cosine)),
            )
            .await
            .with_context(|| format!("Failed to create collection {}", name))?;
        Ok(())
    }

    async fn upsert(&self, name: &str, chunks: Vec<IndexedChunk>) -> Result<()> {
        let points: Vec<PointStruct> = chunks
            .into_iter()
            .map(|chunk| {
                let mut payload = JsonMap::new();
                payload.insert("text".to_string(), JsonValue::String(chunk.text));
                payload.insert("source".to_string(), JsonValue::String(chunk.source));
                payload.insert("chunk_index".to_string(), JsonValue::from(chunk.chunk_index));
                payload.insert("chunk_id".to_string(), JsonValue::String(chunk.id));
                PointStruct::new(Uuid::new_v4().to_string(), chunk.embedding, payload)
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH) {
            self.client
                .upsert_points(UpsertPointsBuilder::new(name, batch.to_vec()).wait(true))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn kind(&self) -> &'static str {
        "qdrant"
    }

    async fn load_existing(&self, fingerprint: &str) -> Result<bool> {
        let response = self
            .client
            .list_collections()
            .await
            .context("Failed to list Qdrant collections")?;
        let newest = newest_for_fingerprint(
            response.collections.iter().map(|c| c.name.as_str()),
            &self.base,
            fingerprint,
        );
        let Some(name) = newest else {
            return Ok(false);
        };
        tracing::info!(collection = %name, "Using existing Qdrant collection");
        *self.collection.write().await = Some(name);
        Ok(true)
    }

    async fn replace_all(&self, chunks: Vec<IndexedChunk>, fingerprint: &str) -> Result<()> {
        let name = build_collection_name(
            &self.base,
            fingerprint,
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string(),
        );
        self.create_collection(&name).await?;
        if let Err(e) = self.upsert(&name, chunks).await {
            if let Err(cleanup) = self
                .client
                .delete_collection(DeleteCollectionBuilder::new(&name))
                .await
            {
                tracing::warn!(collection = %name, "Failed to drop partial collection: {}", cleanup);
            }
            return Err(e);
        }
        *self.collection.write().await = Some(name);
        Ok(())
    }

    async fn add_chunks(&self, chunks: Vec<IndexedChunk>, fingerprint: &str) -> Result<()> {
        // Collections are named by fingerprint and cannot be renamed.
        let current = self.current().await?;
        let next = collection_prefix(&self.base, fingerprint);
        if !current.starts_with(&next) {
            anyhow::bail!(
                "Qdrant collections are per document set; rebuild instead of appending ({} -> {})",
                current,
                next
            );
        }
        self.upsert(&current, chunks).await
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let name = self.current().await?;
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&name, query.to_vec(), top_k as u64).with_payload(true),
            )
            .await?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let text = point.payload.get("text")?.as_str()?.to_string();
                let source = point
                    .payload
                    .get("source")
                    .and_then(|v| v.as_str())
                    .cloned()
                    .unwrap_or_default();
                let chunk_index = point
                    .payload
                    .get("chunk_index")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0) as usize;
                Some(SearchHit {
                    text,
                    source,
                    chunk_index,
                    score: point.score,
                })
            })
            .collect();
        Ok(hits)
    }

    async fn len(&self) -> Result<usize> {
        let name = self.current().await?;
        let response = self
            .client
            .count(CountPointsBuilder::new(&name).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn retire(&self) -> Result<()> {
        self.retired.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for QdrantVectorStore {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::SeqCst) {
            return;
        }
        let Some(name) = self.collection.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let client = Arc::clone(&self.client);
                runtime.spawn(async move {
                    tracing::info!(collection = %name, "Dropping superseded Qdrant collection");
                    if let Err(e) = client
                        .delete_collection(DeleteCollectionBuilder::new(&name))
                        .await
                    {
                        tracing::warn!(collection = %name, "Failed to drop collection: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(collection = %name, "No runtime left to drop superseded collection")
            }
        }
    }
}

pub struct QdrantStoreProvider {
    client: Arc<Qdrant>,
    base: String,
    dimensions: u64,
}

impl QdrantStoreProvider {
    pub fn new(url: &str, base: &str, dimensions: usize) -> Result<Self> {
        tracing::info!(url = %url, "Building Qdrant client");
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| anyhow::anyhow!("Qdrant client build failed: {}", e))?;
        Ok(Self {
            client: Arc::new(client),
            base: base.to_string(),
            dimensions: dimensions as u64,
        })
    }
}

#[async_trait]
impl StoreProvider for QdrantStoreProvider {
    async fn open(&self) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(QdrantVectorStore {
            client: Arc::clone(&self.client),
            base: self.base.clone(),
            dimensions: self.dimensions,
            collection: RwLock::new(None),
            retired: AtomicBool::new(false),
        }))
    }
}

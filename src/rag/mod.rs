pub mod embeddings;
pub mod lifecycle;
pub mod qdrant;
pub mod summarizer;
pub mod vector_store;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::indexer::chunker::chunk_text;
use crate::indexer::Document;
use crate::settings::{EmbeddingProvider, Settings, SummarizerProvider, VectorStoreBackend};

use self::embeddings::{Embedder, FastEmbedder, HashingEmbedder};
use self::qdrant::QdrantStoreProvider;
use self::summarizer::{ChatSummarizer, ExtractiveSummarizer, Summarizer};
use self::vector_store::{IndexedChunk, LocalStoreProvider, SearchHit, StoreProvider, VectorStore};

const EMBED_BATCH: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub size: usize,
    pub overlap: usize,
}

fn file_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// The store handle: chunks and embeds documents into a [`VectorStore`].
pub struct DocumentIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunking: ChunkingOptions,
}

impl DocumentIndex {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, chunking: ChunkingOptions) -> Self {
        Self {
            embedder,
            store,
            chunking,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn load_existing(&self, fingerprint: &str) -> Result<bool> {
        self.store.load_existing(fingerprint).await
    }

    /// Replace the store contents with `documents`. Returns the chunk count.
    pub async fn build_from_documents(&self, documents: &[Document], fingerprint: &str) -> Result<usize> {
        let chunks = self.embed_documents(documents).await?;
        let count = chunks.len();
        self.store.replace_all(chunks, fingerprint).await?;
        Ok(count)
    }

    pub async fn add_documents(&self, documents: &[Document], fingerprint: &str) -> Result<usize> {
        let chunks = self.embed_documents(documents).await?;
        let count = chunks.len();
        self.store.add_chunks(chunks, fingerprint).await?;
        Ok(count)
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let embedder = Arc::clone(&self.embedder);
        let query_text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_one(&query_text))
            .await
            .context("Query embedding task failed")??;
        self.store.search(&vector, top_k).await
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        self.store.len().await
    }

    async fn embed_documents(&self, documents: &[Document]) -> Result<Vec<IndexedChunk>> {
        let mut pending = Vec::new();
        for doc in documents {
            let id = file_id(&doc.metadata.path);
            for chunk in chunk_text(&doc.content, self.chunking.size, self.chunking.overlap) {
                pending.push(IndexedChunk {
                    id: format!("{}_{}", id, chunk.chunk_index),
                    text: chunk.text,
                    source: doc.metadata.filename.clone(),
                    chunk_index: chunk.chunk_index,
                    embedding: Vec::new(),
                });
            }
        }
        if pending.is_empty() {
            return Ok(pending);
        }

        let embedder = Arc::clone(&self.embedder);
        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(EMBED_BATCH) {
                vectors.extend(embedder.embed(batch.to_vec())?);
            }
            Ok(vectors)
        })
        .await
        .context("Embedding task failed")??;

        if vectors.len() != pending.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                pending.len()
            );
        }
        for (chunk, vector) in pending.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }
        Ok(pending)
    }
}

/// The search handle: retrieval plus summarization.
pub struct RagSearch {
    index: Arc<DocumentIndex>,
    summarizer: Arc<dyn Summarizer>,
}

impl RagSearch {
    pub fn new(index: Arc<DocumentIndex>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { index, summarizer }
    }

    pub async fn search_and_summarize(&self, query: &str, top_k: usize) -> Result<String> {
        let hits = self.index.search(query, top_k).await?;
        tracing::debug!(hits = hits.len(), top_k, "Retrieved passages");
        if hits.is_empty() {
            return Ok(format!("No relevant documents found for: '{}'", query));
        }
        self.summarizer.summarize(query, &hits).await
    }

    pub fn describe(&self) -> String {
        format!(
            "rag-search(store={}, embedder={}, summarizer={})",
            self.index.store.kind(),
            self.index.embedder.id(),
            self.summarizer.kind()
        )
    }
}

/// Long-lived collaborators shared by every build.
#[derive(Clone)]
pub struct RagComponents {
    pub embedder: Arc<dyn Embedder>,
    pub stores: Arc<dyn StoreProvider>,
    pub summarizer: Arc<dyn Summarizer>,
    pub chunking: ChunkingOptions,
}

impl RagComponents {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let dims = settings.embedding.dimensions;
        let embedder: Arc<dyn Embedder> = match settings.embedding.provider {
            EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(dims)),
            EmbeddingProvider::FastEmbed => {
                Arc::new(FastEmbedder::from_dir(&settings.embedding.model_dir, dims)?)
            }
        };

        let stores: Arc<dyn StoreProvider> = match settings.vector_store.backend {
            VectorStoreBackend::Local => {
                Arc::new(LocalStoreProvider::new(settings.storage.index_dir.clone(), dims))
            }
            VectorStoreBackend::Qdrant => Arc::new(QdrantStoreProvider::new(
                &settings.vector_store.qdrant_url,
                &settings.vector_store.collection,
                dims,
            )?),
        };

        let s = &settings.summarizer;
        let summarizer: Arc<dyn Summarizer> = match s.provider {
            SummarizerProvider::Extractive => Arc::new(ExtractiveSummarizer),
            SummarizerProvider::Chat => Arc::new(ChatSummarizer::new(
                s.base_url.clone(),
                s.api_key.clone(),
                s.model.clone(),
                s.max_context_tokens,
                s.request_timeout(),
            )?),
        };

        Ok(Self {
            embedder,
            stores,
            summarizer,
            chunking: ChunkingOptions {
                size: settings.index.chunk_size,
                overlap: settings.index.chunk_overlap,
            },
        })
    }

    /// Everything besides the document set that determines index contents.
    pub fn fingerprint_params(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.embedder.id(),
            self.embedder.dimensions(),
            self.chunking.size,
            self.chunking.overlap
        )
    }

    pub async fn open_index(&self) -> Result<DocumentIndex> {
        let store = self.stores.open().await?;
        Ok(DocumentIndex::new(Arc::clone(&self.embedder), store, self.chunking))
    }

    /// Components for tests and tooling: hashing embedder, local store under `index_dir`.
    pub fn local(index_dir: &Path, dimensions: usize, chunking: ChunkingOptions) -> Self {
        Self {
            embedder: Arc::new(HashingEmbedder::new(dimensions)),
            stores: Arc::new(LocalStoreProvider::new(index_dir.to_path_buf(), dimensions)),
            summarizer: Arc::new(ExtractiveSummarizer),
            chunking,
        }
    }
}

//! Lazy initialization and full rebuilds of the document index.
//!
//! The controller owns the only [`IndexState`]. Builds are serialized by one
//! mutex and the finished handles are swapped in with a single write, so a
//! search always sees either the previous pair or the new one. Rebuild
//! requests that arrive while a build is running coalesce into the next
//! build instead of queueing one build each.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::{DocumentIndex, RagComponents, RagSearch};
use crate::error::IndexError;
use crate::indexer::loader::{fingerprint, load_all_documents, load_documents, scan_documents};
use crate::indexer::LoadReport;
use crate::library::DocumentLibrary;

/// Search and store handles, always installed together.
#[derive(Clone)]
pub struct IndexHandles {
    pub search: Arc<RagSearch>,
    pub store: Arc<DocumentIndex>,
    fingerprint: String,
}

impl fmt::Debug for IndexHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandles")
            .field("search", &self.search.describe())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

enum IndexState {
    Uninitialized,
    Initialized(IndexHandles),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    Uninitialized,
    Initialized,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub documents: usize,
    pub chunks: usize,
    pub failed: Vec<String>,
    /// A persisted index matching the document set was loaded instead of built.
    pub reused: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub phase: IndexPhase,
    pub building: bool,
    pub indexed_chunks: usize,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failed_files: Vec<String>,
    pub description: Option<String>,
}

#[derive(Default)]
struct BuildRecord {
    indexed_chunks: usize,
    last_indexed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    failed_files: Vec<String>,
}

/// Held while a build runs.
#[derive(Default)]
struct BuildSlot {
    /// Every rebuild ticket up to this one was covered by a finished build.
    covered: u64,
    last: Option<Result<IndexSummary, IndexError>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    LoadOrBuild,
    Rebuild,
}

pub struct IndexController {
    library: Arc<DocumentLibrary>,
    components: RagComponents,
    timeout: Duration,
    state: RwLock<IndexState>,
    slot: Mutex<BuildSlot>,
    tickets: AtomicU64,
    record: Mutex<BuildRecord>,
}

impl IndexController {
    pub fn new(library: Arc<DocumentLibrary>, components: RagComponents, timeout: Duration) -> Self {
        Self {
            library,
            components,
            timeout,
            state: RwLock::new(IndexState::Uninitialized),
            slot: Mutex::new(BuildSlot::default()),
            tickets: AtomicU64::new(0),
            record: Mutex::new(BuildRecord::default()),
        }
    }

    pub fn library(&self) -> &Arc<DocumentLibrary> {
        &self.library
    }

    pub async fn handles(&self) -> Option<IndexHandles> {
        match &*self.state.read().await {
            IndexState::Initialized(handles) => Some(handles.clone()),
            IndexState::Uninitialized => None,
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.handles().await.is_some()
    }

    /// Return the current handles, loading or building the index first if
    /// there are none. Idempotent.
    pub async fn ensure_ready(&self) -> Result<IndexHandles, IndexError> {
        if let Some(handles) = self.handles().await {
            return Ok(handles);
        }

        let mut slot = self.slot.lock().await;
        if let Some(handles) = self.handles().await {
            return Ok(handles);
        }

        let covers = self.tickets.load(Ordering::SeqCst);
        let outcome = self.run_build(BuildMode::LoadOrBuild).await;
        slot.covered = covers;
        slot.last = Some(outcome.clone());
        outcome?;

        self.handles()
            .await
            .ok_or_else(|| IndexError::Build("index was not installed".to_string()))
    }

    /// Full rebuild from the documents currently on disk.
    pub async fn rebuild(&self) -> Result<IndexSummary, IndexError> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.slot.lock().await;

        if slot.covered >= ticket {
            if let Some(last) = &slot.last {
                tracing::debug!(ticket, "Rebuild request coalesced into a newer build");
                return last.clone();
            }
        }

        let covers = self.tickets.load(Ordering::SeqCst);
        let outcome = self.run_build(BuildMode::Rebuild).await;
        slot.covered = covers;
        slot.last = Some(outcome.clone());
        outcome
    }

    /// Called after a document was added or removed. Rebuild failures are
    /// logged only; the mutation itself already succeeded.
    pub async fn after_mutation(&self) {
        match self.rebuild().await {
            Ok(summary) => tracing::info!(
                documents = summary.documents,
                chunks = summary.chunks,
                "Index rebuilt after document change"
            ),
            Err(e) => tracing::error!("Rebuild after document change failed: {}", e),
        }
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<String, IndexError> {
        let handles = self.ensure_ready().await?;
        tracing::info!(query = %query, top_k, "Searching");
        handles
            .search
            .search_and_summarize(query, top_k)
            .await
            .map_err(|e| IndexError::Search(format!("{:#}", e)))
    }

    pub async fn status(&self) -> IndexStatus {
        let handles = self.handles().await;
        let record = self.record.lock().await;
        IndexStatus {
            phase: if handles.is_some() {
                IndexPhase::Initialized
            } else {
                IndexPhase::Uninitialized
            },
            // The slot is only held while a build runs.
            building: self.slot.try_lock().is_err(),
            indexed_chunks: if handles.is_some() { record.indexed_chunks } else { 0 },
            last_indexed_at: record.last_indexed_at,
            last_error: record.last_error.clone(),
            failed_files: record.failed_files.clone(),
            description: handles.map(|h| h.search.describe()),
        }
    }

    /// Must be called with the build slot held.
    async fn run_build(&self, mode: BuildMode) -> Result<IndexSummary, IndexError> {
        let started = Instant::now();
        tracing::info!(
            folder = %self.library.upload_dir().display(),
            rebuild = (mode == BuildMode::Rebuild),
            "Index build starting"
        );

        let result = match tokio::time::timeout(self.timeout, self.build(mode)).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Timeout(self.timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((handles, mut summary)) => {
                summary.elapsed_ms = elapsed_ms;
                let previous = {
                    let mut state = self.state.write().await;
                    std::mem::replace(&mut *state, IndexState::Initialized(handles.clone()))
                };
                {
                    let mut record = self.record.lock().await;
                    record.indexed_chunks = summary.chunks;
                    record.last_indexed_at = Some(Utc::now());
                    record.last_error = None;
                    record.failed_files = summary.failed.clone();
                }
                // Every build opens a fresh store, so the replaced one is never shared.
                if let IndexState::Initialized(old) = previous {
                    if let Err(e) = old.store.store().retire().await {
                        tracing::warn!("Failed to release previous index: {:#}", e);
                    }
                }
                tracing::info!(
                    documents = summary.documents,
                    chunks = summary.chunks,
                    failed = summary.failed.len(),
                    reused = summary.reused,
                    elapsed_ms,
                    "Index ready"
                );
                Ok(summary)
            }
            Err(e) => {
                *self.state.write().await = IndexState::Uninitialized;
                let mut record = self.record.lock().await;
                record.indexed_chunks = 0;
                record.last_error = Some(e.to_string());
                tracing::error!(elapsed_ms, "Index build failed: {}", e);
                Err(e)
            }
        }
    }

    async fn build(&self, mode: BuildMode) -> Result<(IndexHandles, IndexSummary), IndexError> {
        let dir = self.library.upload_dir().to_path_buf();
        let allowed = self.library.allowed_extensions().to_vec();
        let params = self.components.fingerprint_params();
        let index = Arc::new(self.components.open_index().await.map_err(build_err)?);

        let (fp, summary) = match mode {
            BuildMode::LoadOrBuild => {
                let files = tokio::task::spawn_blocking(move || scan_documents(&dir, &allowed))
                    .await
                    .map_err(|e| IndexError::Build(format!("document scan task failed: {}", e)))?
                    .map_err(build_err)?;
                let fp = fingerprint(&files, &params);

                if index.load_existing(&fp).await.map_err(build_err)? {
                    let summary = IndexSummary {
                        documents: files.len(),
                        chunks: index.chunk_count().await.map_err(build_err)?,
                        failed: Vec::new(),
                        reused: true,
                        elapsed_ms: 0,
                    };
                    (fp, summary)
                } else {
                    let report =
                        tokio::task::spawn_blocking(move || load_documents(&files, "folder"))
                            .await
                            .map_err(|e| {
                                IndexError::Build(format!("document load task failed: {}", e))
                            })?;
                    let summary = index_report(&index, report, &fp).await?;
                    (fp, summary)
                }
            }
            BuildMode::Rebuild => {
                let report = tokio::task::spawn_blocking(move || load_all_documents(&dir, &allowed))
                    .await
                    .map_err(|e| IndexError::Build(format!("document load task failed: {}", e)))?
                    .map_err(build_err)?;
                let fp = fingerprint(&report.files, &params);
                let summary = index_report(&index, report, &fp).await?;
                (fp, summary)
            }
        };

        let search = Arc::new(RagSearch::new(
            Arc::clone(&index),
            Arc::clone(&self.components.summarizer),
        ));
        let handles = IndexHandles {
            search,
            store: index,
            fingerprint: fp,
        };
        Ok((handles, summary))
    }
}

fn build_err(e: anyhow::Error) -> IndexError {
    IndexError::Build(format!("{:#}", e))
}

async fn index_report(
    index: &DocumentIndex,
    report: LoadReport,
    fp: &str,
) -> Result<IndexSummary, IndexError> {
    let chunks = index
        .build_from_documents(&report.documents, fp)
        .await
        .map_err(build_err)?;
    Ok(IndexSummary {
        documents: report.documents.len(),
        chunks,
        failed: report.failed.into_iter().map(|(name, _)| name).collect(),
        reused: false,
        elapsed_ms: 0,
    })
}

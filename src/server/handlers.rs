use std::path::PathBuf;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};

use super::{pages, AppState};
use crate::error::{AppError, AppResult, InputError};
use crate::indexer::extractor::extract_text;
use crate::indexer::walker::DocumentFormat;
use crate::models::{
    resolve_top_k, ActionResponse, DocumentList, FailedFile, HealthResponse, SearchForm,
    SearchResponse, SystemStatusResponse, UploadResponse, UploadedFile,
};
use crate::rag::lifecycle::IndexPhase;

pub async fn index_page() -> Html<String> {
    Html(pages::search_page())
}

pub async fn upload_page() -> Html<String> {
    Html(pages::upload_page())
}

fn top_k(state: &AppState, form: &SearchForm) -> usize {
    let search = &state.settings.search;
    resolve_top_k(form.top_k.as_ref(), search.default_top_k, search.max_top_k)
}

pub async fn search_page(State(state): State<AppState>, Form(form): Form<SearchForm>) -> Response {
    let query = form.query.trim();
    if query.is_empty() {
        let page = pages::results_page(query, &InputError::EmptyQuery.to_string());
        return (StatusCode::BAD_REQUEST, Html(page)).into_response();
    }

    let top_k = top_k(&state, &form);
    match state.controller.search(query, top_k).await {
        Ok(summary) => Html(pages::results_page(query, &summary)).into_response(),
        Err(e) => {
            tracing::error!(query = %query, "Search failed: {}", e);
            let page = pages::results_page(query, &format!("An error occurred: {}", e));
            (StatusCode::INTERNAL_SERVER_ERROR, Html(page)).into_response()
        }
    }
}

pub async fn api_search(
    State(state): State<AppState>,
    Json(form): Json<SearchForm>,
) -> AppResult<Json<SearchResponse>> {
    let query = form.query.trim().to_string();
    if query.is_empty() {
        return Err(InputError::EmptyQuery.into());
    }
    let top_k = top_k(&state, &form);
    let summary = state.controller.search(&query, top_k).await?;
    Ok(Json(SearchResponse {
        query,
        top_k,
        summary,
    }))
}

/// Extract text from a freshly saved upload to make sure it is indexable.
async fn check_extractable(path: PathBuf) -> Result<(), String> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let format = DocumentFormat::from_extension(&ext)
        .ok_or_else(|| format!("No text extractor for .{} files", ext))?;

    let text = tokio::task::spawn_blocking(move || extract_text(&path, format))
        .await
        .map_err(|e| format!("Text extraction crashed: {}", e))?
        .map_err(|e| format!("{:#}", e))?;
    if text.trim().is_empty() {
        return Err("No text could be extracted from the document".to_string());
    }
    Ok(())
}

pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut received = 0usize;
    let mut uploaded = Vec::new();
    let mut failed = Vec::new();

    // A broken stream ends the loop; files already stored still get indexed.
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if received == 0 => return Err(InputError::Multipart(e.body_text()).into()),
            Err(e) => {
                tracing::warn!("Upload stream ended early: {}", e.body_text());
                failed.push(FailedFile {
                    original: String::new(),
                    error: InputError::Multipart(e.body_text()).to_string(),
                });
                break;
            }
        };
        if field.name() != Some("files") {
            continue;
        }
        let original = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        received += 1;

        if !state.library.is_allowed(&original) {
            tracing::warn!(file = %original, "Rejected upload with disallowed extension");
            failed.push(FailedFile {
                error: format!(
                    "Invalid file type. Allowed: {}",
                    state.library.allowed_extensions().join(", ")
                ),
                original,
            });
            continue;
        }

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(file = %original, "Upload stream ended early: {}", e.body_text());
                failed.push(FailedFile {
                    original,
                    error: InputError::Multipart(e.body_text()).to_string(),
                });
                break;
            }
        };

        let (saved_as, path) = match state.library.save(&original, &data).await {
            Ok(saved) => saved,
            Err(e) => {
                if e.status().is_server_error() {
                    tracing::error!(file = %original, "Failed to store upload: {}", e);
                }
                failed.push(FailedFile {
                    original,
                    error: e.to_string(),
                });
                continue;
            }
        };

        match check_extractable(path.clone()).await {
            Ok(()) => {
                tracing::info!(file = %original, saved_as = %saved_as, bytes = data.len(), "Stored upload");
                uploaded.push(UploadedFile {
                    original,
                    saved_as,
                    status: "success".to_string(),
                    message: "Document processed successfully".to_string(),
                });
            }
            Err(error) => {
                tracing::warn!(file = %original, "Discarding upload: {}", error);
                state.library.remove_quietly(&path).await;
                failed.push(FailedFile { original, error });
            }
        }
    }

    if received == 0 {
        return Err(InputError::NoFiles.into());
    }
    if !uploaded.is_empty() {
        state.controller.after_mutation().await;
    }

    Ok(Json(UploadResponse {
        success: !uploaded.is_empty(),
        message: format!(
            "Successfully uploaded {} files. Failed: {}",
            uploaded.len(),
            failed.len()
        ),
        uploaded,
        failed,
    }))
}

pub async fn list_documents(State(state): State<AppState>) -> AppResult<Json<DocumentList>> {
    let library = state.library.clone();
    let documents = tokio::task::spawn_blocking(move || library.list())
        .await
        .map_err(|e| AppError::storage("Document listing task failed", std::io::Error::other(e)))??;
    Ok(Json(DocumentList { documents }))
}

pub async fn view_document(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    let (stored, bytes) = state.library.read(&name).await?;
    let mime = mime_guess::from_path(&stored).first_or_octet_stream();
    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", stored),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ActionResponse>> {
    let stored = state.library.delete(&name).await?;
    tracing::info!(file = %stored, "Deleted document");
    state.controller.after_mutation().await;
    Ok(Json(ActionResponse {
        success: true,
        message: "Document deleted successfully".to_string(),
        chunks: None,
    }))
}

pub async fn reindex(State(state): State<AppState>) -> AppResult<Json<ActionResponse>> {
    let summary = state.controller.rebuild().await?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!(
            "Reindexing completed successfully: {} documents, {} failed",
            summary.documents,
            summary.failed.len()
        ),
        chunks: Some(summary.chunks),
    }))
}

/// Missing or unreadable upload folders count as empty.
fn document_count(state: &AppState) -> usize {
    match state.library.count() {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("Could not count documents: {}", e);
            0
        }
    }
}

pub async fn system_status(State(state): State<AppState>) -> Json<SystemStatusResponse> {
    let status = state.controller.status().await;
    let initialized = status.phase == IndexPhase::Initialized;
    Json(SystemStatusResponse {
        status: if initialized { "initialized" } else { "not_initialized" }.to_string(),
        document_count: document_count(&state),
        vector_store_loaded: initialized,
        upload_folder: state.library.upload_dir().display().to_string(),
        search_system_type: status.description,
        indexed_chunks: status.indexed_chunks,
        building: status.building,
        last_indexed_at: status.last_indexed_at,
        last_error: status.last_error,
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        search_system: state.controller.is_initialized().await,
        document_count: document_count(&state),
        upload_folder: state.library.upload_dir().display().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

//! Filesystem bookkeeping for uploaded documents.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use unicode_normalization::UnicodeNormalization;

use crate::error::{AppError, AppResult, InputError};
use crate::indexer::walker::{allowed_extension, walk_documents};
use crate::models::StoredDocument;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Reduce a client-supplied file name to `[A-Za-z0-9_.-]`, with accents
/// folded away (NFKD) and path separators and whitespace runs folded into `_`.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    UNSAFE_FILENAME_CHARS
        .replace_all(&joined, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

fn is_traversal(name: &str) -> bool {
    name.contains("..") || name.contains('/') || name.contains('\\') || name.contains('\0')
}

pub struct DocumentLibrary {
    upload_dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl DocumentLibrary {
    pub fn new(upload_dir: PathBuf, allowed_extensions: Vec<String>) -> Self {
        Self {
            upload_dir,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn ensure_dir(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.upload_dir).map_err(|e| {
            AppError::storage(format!("Failed to create {}", self.upload_dir.display()), e)
        })
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        allowed_extension(name, &self.allowed_extensions).is_some()
    }

    fn check_allowed(&self, name: &str) -> Result<(), InputError> {
        if self.is_allowed(name) {
            Ok(())
        } else {
            Err(InputError::DisallowedExtension {
                name: name.to_string(),
                allowed: self.allowed_extensions.join(", "),
            })
        }
    }

    /// Map a name from a request path onto a path in the upload folder.
    pub fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        if is_traversal(name) {
            return Err(InputError::PathTraversal(name.to_string()).into());
        }
        let safe = sanitize_filename(name);
        if safe.is_empty() {
            return Err(InputError::InvalidFilename(name.to_string()).into());
        }
        Ok(self.upload_dir.join(safe))
    }

    /// Resolve `name` to a stored document. Missing names are `NotFound`
    /// whatever their extension; existing files outside the allowed set are
    /// rejected.
    async fn locate(&self, name: &str) -> AppResult<(String, PathBuf)> {
        let path = self.resolve(name)?;
        let stored = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(AppError::NotFound(stored)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(AppError::NotFound(stored)),
            Err(e) => return Err(AppError::storage(format!("Failed to stat {}", stored), e)),
        }
        self.check_allowed(&stored)?;
        Ok((stored, path))
    }

    /// Store `data` under a sanitized, timestamp-suffixed name that does not
    /// collide with an existing file. Returns the stored name and path.
    pub async fn save(&self, original: &str, data: &[u8]) -> AppResult<(String, PathBuf)> {
        self.check_allowed(original)?;
        let safe = sanitize_filename(original);
        let (stem, ext) = match safe.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => return Err(InputError::InvalidFilename(original.to_string()).into()),
        };
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}_{}{}", stem, timestamp, ext)
            } else {
                format!("{}_{}_{}{}", stem, timestamp, attempt, ext)
            };
            attempt += 1;

            let path = self.upload_dir.join(&name);
            let open = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match open {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(AppError::storage(format!("Failed to create {}", name), e));
                }
            };

            let written = match file.write_all(data).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            drop(file);
            if let Err(e) = written {
                self.remove_quietly(&path).await;
                return Err(AppError::storage(format!("Failed to write {}", name), e));
            }
            return Ok((name, path));
        }
    }

    pub async fn remove_quietly(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), "Failed to remove file: {}", e);
            }
        }
    }

    pub async fn read(&self, name: &str) -> AppResult<(String, Vec<u8>)> {
        let (stored, path) = self.locate(name).await?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok((stored, bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(stored)),
            Err(e) => Err(AppError::storage(format!("Failed to read {}", stored), e)),
        }
    }

    pub async fn delete(&self, name: &str) -> AppResult<String> {
        let (stored, path) = self.locate(name).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(stored),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(stored)),
            Err(e) => Err(AppError::storage(format!("Failed to delete {}", stored), e)),
        }
    }

    /// Stored documents, newest first.
    pub fn list(&self) -> AppResult<Vec<StoredDocument>> {
        let files = walk_documents(&self.upload_dir, &self.allowed_extensions)
            .map_err(|e| {
                AppError::storage(
                    format!("Failed to list {}", self.upload_dir.display()),
                    std::io::Error::other(e),
                )
            })?;

        let mut documents: Vec<StoredDocument> = files
            .into_iter()
            .filter_map(|(path, _)| {
                let metadata = std::fs::metadata(&path).ok()?;
                let modified: DateTime<Utc> = metadata.modified().ok()?.into();
                let size = metadata.len();
                Some(StoredDocument {
                    name: path.file_name()?.to_string_lossy().to_string(),
                    size: format!("{:.2} MB", size as f64 / 1024.0 / 1024.0),
                    size_bytes: size,
                    date: modified.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
                    modified_at: modified,
                    path: path.to_string_lossy().to_string(),
                })
            })
            .collect();

        documents.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(documents)
    }

    pub fn count(&self) -> AppResult<usize> {
        Ok(self.list()?.len())
    }
}

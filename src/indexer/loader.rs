use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::extractor::extract_text;
use super::walker::{walk_documents, DocumentFormat};

/// A file in the document folder, as seen when the folder was scanned.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub format: DocumentFormat,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub filename: String,
    pub path: String,
    pub format: String,
    pub modified_at: DateTime<Utc>,
    pub source: String,
}

/// Extracted text of one stored file.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    /// Every file the load looked at, extracted or not.
    pub files: Vec<SourceFile>,
    pub documents: Vec<Document>,
    /// `(file name, reason)` for files that produced no text.
    pub failed: Vec<(String, String)>,
}

pub fn scan_documents(dir: &Path, allowed: &[String]) -> Result<Vec<SourceFile>> {
    walk_documents(dir, allowed)?
        .into_iter()
        .map(|(path, format)| {
            let meta = std::fs::metadata(&path)
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let modified: DateTime<Utc> = meta.modified()?.into();
            Ok(SourceFile {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                path,
                format,
                size: meta.len(),
                modified_at: modified,
            })
        })
        .collect()
}

/// Extract every scanned file. A file that fails (or panics inside the PDF
/// parser) is reported in `failed` instead of aborting the whole load.
pub fn load_documents(files: &[SourceFile], source: &str) -> LoadReport {
    let mut report = LoadReport {
        files: files.to_vec(),
        ..LoadReport::default()
    };

    for file in files {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            extract_text(&file.path, file.format)
        }));
        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(file = %file.name, "Failed to extract text: {:#}", e);
                report.failed.push((file.name.clone(), e.to_string()));
                continue;
            }
            Err(_) => {
                tracing::warn!(file = %file.name, "Text extraction panicked");
                report
                    .failed
                    .push((file.name.clone(), "text extraction panicked".to_string()));
                continue;
            }
        };

        if text.trim().is_empty() {
            report
                .failed
                .push((file.name.clone(), "no text could be extracted".to_string()));
            continue;
        }

        report.documents.push(Document {
            content: text,
            metadata: DocumentMetadata {
                filename: file.name.clone(),
                path: file.path.to_string_lossy().to_string(),
                format: file.format.as_str().to_string(),
                modified_at: file.modified_at,
                source: source.to_string(),
            },
        });
    }

    report
}

pub fn load_all_documents(dir: &Path, allowed: &[String]) -> Result<LoadReport> {
    let files = scan_documents(dir, allowed)?;
    Ok(load_documents(&files, "folder"))
}

/// Digest of the document set plus whatever else decides the index contents
/// (`params`: embedder id, dimensions, chunking).
pub fn fingerprint(files: &[SourceFile], params: &str) -> String {
    let mut stamps: Vec<_> = files
        .iter()
        .map(|f| (f.name.as_str(), f.size, f.modified_at.timestamp_millis()))
        .collect();
    stamps.sort();

    let mut hasher = Sha256::new();
    hasher.update(params.as_bytes());
    for (name, size, modified) in stamps {
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(size.to_le_bytes());
        hasher.update(modified.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txt_allowed() -> Vec<String> {
        vec!["txt".to_string(), "pdf".to_string()]
    }

    #[test]
    fn test_load_reports_empty_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.txt"), "lazy index initialization").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "   ").unwrap();
        std::fs::write(dir.path().join("broken.pdf"), b"%PDF-garbage").unwrap();

        let report = load_all_documents(dir.path(), &txt_allowed()).unwrap();
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].metadata.filename, "good.txt");
        assert_eq!(report.documents[0].metadata.source, "folder");
        let failed: Vec<_> = report.failed.iter().map(|(n, _)| n.as_str()).collect();
        assert!(failed.contains(&"empty.txt"));
        assert!(failed.contains(&"broken.pdf"));
    }

    #[test]
    fn test_fingerprint_tracks_document_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        let before = fingerprint(&scan_documents(dir.path(), &txt_allowed()).unwrap(), "p");
        let again = fingerprint(&scan_documents(dir.path(), &txt_allowed()).unwrap(), "p");
        assert_eq!(before, again);

        std::fs::write(dir.path().join("b.txt"), "two").unwrap();
        let after = fingerprint(&scan_documents(dir.path(), &txt_allowed()).unwrap(), "p");
        assert_ne!(before, after);

        let other_params = fingerprint(&scan_documents(dir.path(), &txt_allowed()).unwrap(), "q");
        assert_ne!(after, other_params);

        let loaded = load_all_documents(dir.path(), &txt_allowed()).unwrap();
        assert_eq!(fingerprint(&loaded.files, "p"), after);
    }
}

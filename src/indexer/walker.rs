use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    Docx,
    Xlsx,
    Pptx,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "md" | "csv" | "json" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Pptx => "pptx",
        }
    }
}

/// Lowercased extension of `name` if it is one of `allowed`.
pub fn allowed_extension(name: &str, allowed: &[String]) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    allowed
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&ext))
        .then_some(ext)
}

/// Top-level files in `dir` whose extension is allowed and extractable,
/// sorted by file name.
pub fn walk_documents(dir: &Path, allowed: &[String]) -> Result<Vec<(PathBuf, DocumentFormat)>> {
    if !dir.is_dir() {
        anyhow::bail!("Document folder is not a directory: {}", dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(ext) = allowed_extension(&name, allowed) else {
            continue;
        };
        if let Some(format) = DocumentFormat::from_extension(&ext) {
            files.push((entry.into_path(), format));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_only() -> Vec<String> {
        vec!["pdf".to_string()]
    }

    #[test]
    fn test_allowed_extension_is_case_insensitive() {
        assert_eq!(allowed_extension("Report.PDF", &pdf_only()), Some("pdf".into()));
        assert_eq!(allowed_extension("report.txt", &pdf_only()), None);
        assert_eq!(allowed_extension("pdf", &pdf_only()), None);
        assert_eq!(allowed_extension("archive.tar.pdf", &pdf_only()), Some("pdf".into()));
    }

    #[test]
    fn test_walk_skips_other_files_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();
        std::fs::write(dir.path().join("nested.pdf").join("c.pdf"), b"x").unwrap();

        let files = walk_documents(dir.path(), &pdf_only()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert!(files.iter().all(|(_, f)| *f == DocumentFormat::Pdf));
    }

    #[test]
    fn test_walk_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(walk_documents(&dir.path().join("missing"), &pdf_only()).is_err());
    }
}

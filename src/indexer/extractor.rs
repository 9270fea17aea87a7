use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use super::walker::DocumentFormat;

pub fn extract_text(path: &Path, format: DocumentFormat) -> Result<String> {
    let text = match format {
        DocumentFormat::PlainText => extract_plain_text(path)?,
        DocumentFormat::Pdf => extract_pdf(path)?,
        DocumentFormat::Docx => extract_zipped_xml(path, |name| name == "word/document.xml", "w:t")?,
        DocumentFormat::Xlsx => extract_xlsx(path)?,
        DocumentFormat::Pptx => extract_zipped_xml(
            path,
            |name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"),
            "a:t",
        )?,
    };
    Ok(text)
}

fn extract_plain_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))
}

fn extract_pdf(path: &Path) -> Result<String> {
    // Pages are joined with newlines, empty pages contribute nothing.
    let text = pdf_extract::extract_text(path)
        .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?;
    let pages: Vec<&str> = text
        .split('\u{c}')
        .map(str::trim_end)
        .filter(|p| !p.trim().is_empty())
        .collect();
    Ok(pages.join("\n"))
}

fn extract_zipped_xml(path: &Path, wanted: impl Fn(&str) -> bool, tag: &str) -> Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read {} as ZIP", path.display()))?;

    let mut parts = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !wanted(entry.name()) {
            continue;
        }
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        let text = text_between_tags(&xml, tag);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    if parts.is_empty() {
        anyhow::bail!("No <{}> text found in {}", tag, path.display());
    }
    Ok(parts.join("\n\n"))
}

fn extract_xlsx(path: &Path) -> Result<String> {
    use calamine::{open_workbook, Reader, Xlsx};

    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Failed to open XLSX: {}", path.display()))?;

    let mut lines = Vec::new();
    for sheet in workbook.sheet_names().to_vec() {
        let Ok(range) = workbook.worksheet_range(&sheet) else {
            continue;
        };
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| cell.to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !cells.is_empty() {
                lines.push(cells.join("\t"));
            }
        }
    }

    Ok(lines.join("\n"))
}

fn text_between_tags(xml: &str, tag: &str) -> String {
    let open_tag = format!("<{}", tag);
    let close_tag = format!("</{}>", tag);
    let mut texts = Vec::new();
    let mut from = 0;

    while let Some(rel) = xml[from..].find(&open_tag) {
        let open = from + rel;
        let after_name = open + open_tag.len();
        // `<w:t>` or `<w:t xml:space=...>`, but not `<w:tbl>`
        match xml[after_name..].chars().next() {
            Some('>') | Some(' ') => {}
            _ => {
                from = after_name;
                continue;
            }
        }
        let Some(tag_end) = xml[open..].find('>') else {
            break;
        };
        let content_start = open + tag_end + 1;
        let Some(close) = xml[content_start..].find(&close_tag) else {
            break;
        };
        let content = &xml[content_start..content_start + close];
        if !content.is_empty() {
            texts.push(content.to_string());
        }
        from = content_start + close + close_tag.len();
    }

    texts.join(" ")
}

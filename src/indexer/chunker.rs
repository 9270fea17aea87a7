#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
}

/// Preferred split points, strongest first.
const BREAKS: &[&str] = &["\n\n", "\n", "。", "？", "！", ". ", "? ", "! ", " "];

fn ceil_char_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

fn floor_char_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Split `text` into chunks of at most `max_chunk_size` bytes (rounded up to
/// a char boundary) where consecutive chunks share roughly `overlap` bytes.
pub fn chunk_text(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_chunk_size {
        return vec![TextChunk {
            text: text.to_string(),
            chunk_index: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let limit = ceil_char_boundary(text, start + max_chunk_size);
        let end = if limit < text.len() {
            break_point(text, start, limit)
        } else {
            limit
        };

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(TextChunk {
                text: piece.to_string(),
                chunk_index: chunks.len(),
            });
        }
        if end >= text.len() {
            break;
        }

        let next = floor_char_boundary(text, end.saturating_sub(overlap));
        start = if next <= start { end } else { next };
    }

    chunks
}

fn break_point(text: &str, start: usize, max_end: usize) -> usize {
    let segment = &text[start..max_end];
    BREAKS
        .iter()
        .find_map(|sep| segment.rfind(sep).map(|pos| start + pos + sep.len()))
        .filter(|&end| end > start)
        .unwrap_or(max_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("  short  ", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("   \n ", 100, 10).is_empty());
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = chunk_text(&text, 60, 0);
        assert_eq!(chunks[0].text, "a".repeat(40));
        assert_eq!(chunks[1].text, "b".repeat(40));
    }

    #[test]
    fn test_indices_are_sequential_and_chunks_bounded() {
        let text = "The index is rebuilt after every upload. ".repeat(50);
        let chunks = chunk_text(&text, 200, 40);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert!(chunk.text.len() <= 200);
        }
    }

    #[test]
    fn test_multibyte_text_does_not_split_chars() {
        let text = "これはテスト文章です。日本語のマルチバイト文字を含むテキストを分割します。".repeat(5);
        let chunks = chunk_text(&text, 60, 10);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn test_unbroken_text_still_terminates() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() >= 10);
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
    }
}

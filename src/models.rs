use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// `top_k` as sent by a client: form fields are strings, JSON may be either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTopK {
    Number(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for RawTopK {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Either {
            Number(i64),
            // Integers beyond i64 and fractional numbers.
            Float(f64),
            Text(String),
        }
        Ok(match Either::deserialize(deserializer)? {
            Either::Number(n) => RawTopK::Number(n),
            Either::Float(f) => RawTopK::Number(f as i64),
            Either::Text(s) => RawTopK::Text(s),
        })
    }
}

impl RawTopK {
    /// Integer value, saturated to the i64 range when the digits overflow.
    fn parse(&self) -> Option<i64> {
        match self {
            RawTopK::Number(n) => Some(*n),
            RawTopK::Text(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse() {
                    return Some(n);
                }
                let (negative, digits) = match s.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, s.strip_prefix('+').unwrap_or(s)),
                };
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Some(if negative { i64::MIN } else { i64::MAX })
            }
        }
    }
}

/// Clamp a requested `top_k` into `[1, max]`; missing or non-numeric values
/// fall back to `default`.
pub fn resolve_top_k(raw: Option<&RawTopK>, default: usize, max: usize) -> usize {
    match raw.and_then(RawTopK::parse) {
        Some(n) => n.clamp(1, max as i64) as usize,
        None => default.clamp(1, max),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchForm {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub top_k: Option<RawTopK>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub top_k: usize,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub original: String,
    pub saved_as: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub original: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedFile>,
    pub message: String,
}

/// An uploaded source file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub name: String,
    pub size: String,
    pub size_bytes: u64,
    pub date: String,
    pub modified_at: DateTime<Utc>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<StoredDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    pub status: String,
    pub document_count: usize,
    pub vector_store_loaded: bool,
    pub upload_folder: String,
    pub search_system_type: Option<String>,
    pub indexed_chunks: usize,
    pub building: bool,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub search_system: bool,
    pub document_count: usize,
    pub upload_folder: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_accepts_number_or_string() {
        let form: SearchForm = serde_json::from_str(r#"{"query":"q","top_k":7}"#).unwrap();
        assert_eq!(form.top_k, Some(RawTopK::Number(7)));
        let form: SearchForm = serde_json::from_str(r#"{"query":"q","top_k":"abc"}"#).unwrap();
        assert_eq!(form.top_k, Some(RawTopK::Text("abc".into())));
        let form: SearchForm = serde_json::from_str(r#"{"query":"q"}"#).unwrap();
        assert_eq!(form.top_k, None);
    }

    #[test]
    fn test_resolve_top_k_clamps() {
        let resolve = |raw: Option<RawTopK>| resolve_top_k(raw.as_ref(), 5, 20);
        assert_eq!(resolve(Some(RawTopK::Text("999".into()))), 20);
        assert_eq!(resolve(Some(RawTopK::Number(999))), 20);
        assert_eq!(resolve(Some(RawTopK::Text("0".into()))), 1);
        assert_eq!(resolve(Some(RawTopK::Number(-3))), 1);
        assert_eq!(resolve(Some(RawTopK::Text(" 7 ".into()))), 7);
        assert_eq!(resolve(Some(RawTopK::Text("abc".into()))), 5);
        assert_eq!(resolve(Some(RawTopK::Text("".into()))), 5);
        assert_eq!(resolve(None), 5);
        assert_eq!(resolve(Some(RawTopK::Text("99999999999999999999".into()))), 20);
        assert_eq!(resolve(Some(RawTopK::Text("-99999999999999999999".into()))), 1);
        assert_eq!(resolve(Some(RawTopK::Text("+12".into()))), 12);
        assert_eq!(resolve(Some(RawTopK::Text("12abc".into()))), 5);
        assert_eq!(resolve(Some(RawTopK::Text("-".into()))), 5);
    }

    #[test]
    fn test_oversized_json_number_clamps_to_max() {
        let form: SearchForm =
            serde_json::from_str(r#"{"query":"q","top_k":99999999999999999999}"#).unwrap();
        assert_eq!(resolve_top_k(form.top_k.as_ref(), 5, 20), 20);
        let form: SearchForm = serde_json::from_str(r#"{"query":"q","top_k":3.7}"#).unwrap();
        assert_eq!(resolve_top_k(form.top_k.as_ref(), 5, 20), 3);
    }
}

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use super::vector_store::SearchHit;

const SNIPPET_CHARS: usize = 500;

/// Turns retrieved passages into the text returned to the user.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn summarize(&self, query: &str, hits: &[SearchHit]) -> Result<String>;
}

fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &collapsed[..cut]),
        None => collapsed,
    }
}

/// Lists the best passages with their source and score.
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    fn kind(&self) -> &'static str {
        "extractive"
    }

    async fn summarize(&self, query: &str, hits: &[SearchHit]) -> Result<String> {
        let mut out = format!("Top {} passages for '{}':", hits.len(), query);
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "\n\n[{}] {} (chunk {}, score {:.2})\n{}",
                i + 1,
                hit.source,
                hit.chunk_index,
                hit.score,
                snippet(&hit.text, SNIPPET_CHARS)
            ));
        }
        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You answer questions using only the provided document excerpts. \
Summarize what they say about the question and name the source files you relied on. \
If the excerpts do not answer the question, say so.";

/// Summarizes through an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatSummarizer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_context_tokens: usize,
    bpe: CoreBPE,
}

impl ChatSummarizer {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        max_context_tokens: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_context_tokens,
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }

    /// Concatenate passages until the token budget is spent.
    fn build_context(&self, hits: &[SearchHit]) -> String {
        let mut used = 0;
        let mut parts = Vec::new();
        for hit in hits {
            let part = format!("Source: {}\n{}", hit.source, hit.text);
            let tokens = self.bpe.encode_with_special_tokens(&part).len();
            if used + tokens > self.max_context_tokens {
                if parts.is_empty() {
                    // Roughly four characters per token.
                    parts.push(snippet(&part, self.max_context_tokens * 4));
                }
                break;
            }
            used += tokens;
            parts.push(part);
        }
        parts.join("\n\n---\n\n")
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    fn kind(&self) -> &'static str {
        "chat"
    }

    async fn summarize(&self, query: &str, hits: &[SearchHit]) -> Result<String> {
        let context = self.build_context(hits);
        let user = format!("Question: {}\n\nExcerpts:\n\n{}", query, context);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("Summarization request failed: {} - {}", status, body);
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Summarization response had no content"))
    }
}

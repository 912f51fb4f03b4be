//! Language model collaborator.
//!
//! The core needs exactly two things from the model: a blocking
//! `summarize` call used during ingestion, and a token stream for
//! answering. Both are served by an Ollama-compatible `/api/generate`
//! endpoint; the streaming form is NDJSON, one JSON object per line,
//! terminated by an object with `done: true`.
//!
//! [`LanguageModel`] is the seam — the chat and ingestion pipelines only
//! see the trait, so tests drive them with scripted token sequences.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::config::LlmConfig;
use crate::error::EngineError;

/// A stream of raw text tokens. Granularity is not predetermined; a
/// token may hold any fraction of a word, marker, or sentence.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a short synopsis of `text` in a single blocking call.
    async fn summarize(&self, text: &str) -> Result<String, EngineError>;

    /// Start token generation for `prompt`. Fails with
    /// [`EngineError::ModelUnavailable`] before any token is produced;
    /// may also fail mid-stream through the stream items.
    async fn stream(&self, prompt: &str) -> Result<TokenStream, EngineError>;

    /// Cheap reachability probe for health reporting.
    async fn available(&self) -> bool;
}

/// Upper bound on the document text handed to `summarize`; the model's
/// context window is the real limit, this keeps requests bounded.
const SUMMARY_INPUT_CAP: usize = 12_000;

const SUMMARY_INSTRUCTION: &str = "Summarize the following document in three to five sentences. \
    Name the subject matter and the kinds of questions the document can answer.\n\n";

/// Client for an Ollama-compatible generation API.
pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaModel {
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

enum LineEvent {
    Token(String),
    Done(Option<String>),
    Error(String),
    Skip,
}

fn parse_line(line: &[u8]) -> LineEvent {
    let trimmed = std::str::from_utf8(line).unwrap_or("").trim();
    if trimmed.is_empty() {
        return LineEvent::Skip;
    }
    match serde_json::from_str::<GenerateChunk>(trimmed) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return LineEvent::Error(error);
            }
            if chunk.done {
                let last = (!chunk.response.is_empty()).then_some(chunk.response);
                return LineEvent::Done(last);
            }
            if chunk.response.is_empty() {
                LineEvent::Skip
            } else {
                LineEvent::Token(chunk.response)
            }
        }
        Err(e) => LineEvent::Error(format!("malformed stream line: {e}")),
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn summarize(&self, text: &str) -> Result<String, EngineError> {
        let mut cap = SUMMARY_INPUT_CAP.min(text.len());
        while cap > 0 && !text.is_char_boundary(cap) {
            cap -= 1;
        }
        let prompt = format!("{}{}", SUMMARY_INSTRUCTION, &text[..cap]);

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EngineError::ModelUnavailable(format!("cannot reach model at {}: {e}", self.url))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::ModelUnavailable(format!(
                "model returned {status}: {text}"
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::ModelUnavailable(format!("malformed response: {e}")))?;

        let summary = parsed.response.trim().to_string();
        if summary.is_empty() {
            return Err(EngineError::ModelUnavailable(
                "model produced an empty summary".to_string(),
            ));
        }
        Ok(summary)
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EngineError::ModelUnavailable(format!("cannot reach model at {}: {e}", self.url))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::ModelUnavailable(format!(
                "model returned {status}: {text}"
            )));
        }

        let mut bytes = Box::pin(resp.bytes_stream());
        let stream = async_stream::stream! {
            // NDJSON lines can straddle transport chunks; reassemble
            // before parsing.
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(EngineError::ModelUnavailable(format!("stream aborted: {e}")));
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_line(&line) {
                        LineEvent::Token(token) => yield Ok(token),
                        LineEvent::Done(last) => {
                            if let Some(token) = last {
                                yield Ok(token);
                            }
                            return;
                        }
                        LineEvent::Error(message) => {
                            yield Err(EngineError::ModelUnavailable(message));
                            return;
                        }
                        LineEvent::Skip => {}
                    }
                }
            }
            match parse_line(&buf) {
                LineEvent::Token(token) | LineEvent::Done(Some(token)) => yield Ok(token),
                LineEvent::Error(message) => {
                    yield Err(EngineError::ModelUnavailable(message));
                }
                _ => {}
            }
        };

        Ok(Box::pin(stream))
    }

    async fn available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

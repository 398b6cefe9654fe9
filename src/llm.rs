//! Language model abstraction and chat backends.
//!
//! [`LanguageModel`] has two entry points: `generate` for a complete answer
//! and `generate_streaming` for token-by-token delivery over a channel. The
//! OpenAI backend speaks the chat-completions SSE protocol; the Ollama
//! backend reads its NDJSON generate stream. Neither retries internally.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;

    /// Generate a complete response for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a response as a stream of tokens.
    ///
    /// The receiver yields `Ok(token)` items and at most one final `Err`;
    /// the channel closing without an error means the response completed.
    async fn generate_streaming(&self, prompt: &str) -> Result<mpsc::Receiver<Result<String>>>;
}

/// Create the configured chat backend.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => Err(Error::Config(format!("unknown llm provider: {}", other))),
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Llm(e.to_string()))
}

// ============ OpenAI ============

/// Chat backend using the OpenAI `POST /v1/chat/completions` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiChat {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".to_string()))?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            client: build_client(config.timeout_secs)?,
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("invalid OpenAI response: {}", e)))?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Llm("invalid OpenAI response: missing content".to_string()))
    }

    async fn generate_streaming(&self, prompt: &str) -> Result<mpsc::Receiver<Result<String>>> {
        let mut response = self.send(prompt, true).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut buffer = String::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if let Some(token) = parse_openai_sse_line(&line) {
                                if tx.send(Ok(token)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("OpenAI stream finished");
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Llm(format!("OpenAI stream error: {}", e))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Extract the delta token from one `data:` SSE line, if it carries any.
fn parse_openai_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(payload).ok()?;
    json.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

// ============ Ollama ============

/// Chat backend using a local Ollama instance's `POST /api/generate`.
pub struct OllamaChat {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            client: build_client(config.timeout_secs)?,
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::Llm(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("invalid Ollama response: {}", e)))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Llm("invalid Ollama response: missing response".to_string()))
    }

    async fn generate_streaming(&self, prompt: &str) -> Result<mpsc::Receiver<Result<String>>> {
        let mut response = self.send(prompt, true).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut buffer = String::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            match parse_ollama_stream_line(&line) {
                                Ok(Some(token)) => {
                                    if tx.send(Ok(token)).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    let _ = tx.send(Err(e)).await;
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("Ollama stream finished");
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Llm(format!("Ollama stream error: {}", e))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Parse one NDJSON line from the Ollama generate stream.
fn parse_ollama_stream_line(line: &str) -> Result<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| Error::Llm(format!("invalid Ollama stream line: {}", e)))?;

    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(Error::Llm(format!("Ollama error: {}", err)));
    }

    Ok(json
        .get("response")
        .and_then(|r| r.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_parsing_extracts_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_openai_sse_line(line), Some("Hel".to_string()));

        assert_eq!(parse_openai_sse_line("data: [DONE]"), None);
        assert_eq!(parse_openai_sse_line(""), None);
        assert_eq!(parse_openai_sse_line(": keep-alive"), None);
        // Role-only first delta carries no content.
        let first = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_openai_sse_line(first), None);
    }

    #[test]
    fn ollama_stream_line_parsing() {
        let line = r#"{"response":"Hi","done":false}"#;
        assert_eq!(
            parse_ollama_stream_line(line).unwrap(),
            Some("Hi".to_string())
        );

        let done = r#"{"response":"","done":true}"#;
        assert_eq!(parse_ollama_stream_line(done).unwrap(), None);

        let err = parse_ollama_stream_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(err, Error::Llm(_)));

        assert!(parse_ollama_stream_line("not json").is_err());
    }
}

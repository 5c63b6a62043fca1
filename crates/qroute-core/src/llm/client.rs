//! Generation API HTTP Client
//!
//! Supports both Claude API and OpenAI-compatible APIs (GLM, etc.)

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{Error, Result};

use super::types::*;
use super::{GenerationService, TextStream};

/// Generation client (supports Claude and OpenAI-compatible APIs)
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: LlmProvider,
}

impl LlmClient {
    /// Create a new generation client.
    ///
    /// Only connection establishment is bounded here; request duration is
    /// governed by the router's whole-invocation timeout.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(Error::Http)?;

        let base_url = match &config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match config.provider {
                LlmProvider::Claude => "https://api.anthropic.com/v1".to_string(),
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            },
        };

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url,
            provider: config.provider.clone(),
        })
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the provider type
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    fn build_request(&self, request: &MessagesRequest) -> RequestBuilder {
        match self.provider {
            LlmProvider::Claude => self
                .client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(request),
            LlmProvider::OpenAi => self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&ChatCompletionRequest::from_claude_request(request)),
        }
    }

    /// Send a completion request and return the response text
    pub async fn messages(&self, request: MessagesRequest) -> Result<String> {
        debug!(
            "Sending completion request: provider={:?}, max_tokens={}",
            self.provider, request.max_tokens
        );

        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("Generation API error: {} - {}", status, body);
            return Err(Error::GenerationApi(format!("{}: {}", status, body)));
        }

        let text = match self.provider {
            LlmProvider::Claude => {
                let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
                    Error::GenerationApi(format!("Failed to parse response: {} - {}", e, body))
                })?;
                info!(
                    "Claude API response: stop_reason={:?}, tokens={}",
                    parsed.stop_reason,
                    parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
                );
                parsed.text()
            }
            LlmProvider::OpenAi => {
                let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
                    Error::GenerationApi(format!("Failed to parse response: {} - {}", e, body))
                })?;
                info!(
                    "OpenAI API response: tokens={}",
                    parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0)
                );
                parsed.text()
            }
        };

        Ok(text)
    }

    /// Send a streaming completion request
    pub async fn messages_stream(&self, request: MessagesRequest) -> Result<TextStream> {
        let request = request.streaming();
        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(Error::Http)?;
            warn!("Generation API stream error: {} - {}", status, body);
            return Err(Error::GenerationApi(format!("{}: {}", status, body)));
        }

        let provider = self.provider.clone();
        let mut decoder = SseDecoder::default();

        let stream = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<String>> {
                match chunk {
                    Ok(bytes) => decoder
                        .feed(&bytes)
                        .iter()
                        .filter_map(|data| parse_stream_data(&provider, data).transpose())
                        .collect(),
                    Err(e) => vec![Err(Error::Http(e))],
                }
            })
            .flat_map(futures::stream::iter)
            .boxed();

        Ok(stream)
    }
}

#[async_trait]
impl GenerationService for LlmClient {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = MessagesRequest::prompt(&self.model, prompt, max_tokens, temperature);
        self.messages(request).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TextStream> {
        let request = MessagesRequest::prompt(&self.model, prompt, max_tokens, temperature);
        self.messages_stream(request).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Incremental server-sent-events decoder.
///
/// Buffers raw bytes so multi-byte characters split across network chunks
/// are decoded only once their line is complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning the `data:` payloads of every completed line
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Extract the text delta carried by one SSE `data:` payload.
///
/// Returns `Ok(None)` for keep-alives, terminators and non-text events.
pub fn parse_stream_data(provider: &LlmProvider, data: &str) -> Result<Option<String>> {
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    match provider {
        LlmProvider::Claude => match serde_json::from_str::<StreamEvent>(data)? {
            StreamEvent::ContentBlockDelta {
                delta: StreamDelta::TextDelta { text },
            } => Ok(Some(text)),
            StreamEvent::Error { error } => Err(Error::GenerationApi(error.to_string())),
            _ => Ok(None),
        },
        LlmProvider::OpenAi => {
            let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
            Ok(chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|s| !s.is_empty()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_default_base_url() {
        let config = LlmConfig {
            api_key: "k".to_string(),
            model: "m".to_string(),
            provider: LlmProvider::OpenAi,
            base_url: Some("http://localhost:8080/v1/".to_string()),
        };
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.model(), "m");
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: content_block_delta\ndata: {\"a\"").is_empty());
        let payloads = decoder.feed(b":1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_chars_intact() {
        let mut decoder = SseDecoder::default();
        let line = "data: 안녕\n".as_bytes();
        let (head, tail) = line.split_at(8); // splits inside the first Hangul syllable
        assert!(decoder.feed(head).is_empty());
        assert_eq!(decoder.feed(tail), vec!["안녕".to_string()]);
    }

    #[test]
    fn test_parse_stream_data_claude() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#;
        assert_eq!(
            parse_stream_data(&LlmProvider::Claude, data).unwrap(),
            Some("Hel".to_string())
        );
        assert_eq!(
            parse_stream_data(&LlmProvider::Claude, r#"{"type":"message_stop"}"#).unwrap(),
            None
        );
        assert!(
            parse_stream_data(
                &LlmProvider::Claude,
                r#"{"type":"error","error":{"type":"overloaded_error"}}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_parse_stream_data_openai() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":"lo"}}]}"#;
        assert_eq!(
            parse_stream_data(&LlmProvider::OpenAi, data).unwrap(),
            Some("lo".to_string())
        );
        assert_eq!(parse_stream_data(&LlmProvider::OpenAi, "[DONE]").unwrap(), None);
    }
}

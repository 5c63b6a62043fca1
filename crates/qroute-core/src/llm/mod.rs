//! Generation service trait, HTTP client and wire types
//!
//! Supports both Claude API and OpenAI-compatible APIs (GLM, etc.)

mod client;
mod types;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::Result;

pub use client::{LlmClient, SseDecoder, parse_stream_data};
pub use types::*;

/// Lazily produced completion text
pub type TextStream = BoxStream<'static, Result<String>>;

/// Opaque text-completion backend.
///
/// Every call is a suspension point for the caller. Implementations must be
/// shareable across concurrent requests.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Complete `prompt` and return the full text
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;

    /// Complete `prompt` as a stream of text chunks.
    ///
    /// The default implementation yields the whole completion as one chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TextStream> {
        let text = self.generate(prompt, max_tokens, temperature).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    /// Name used in logs
    fn name(&self) -> &str {
        "generation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    struct Fixed;

    #[async_trait]
    impl GenerationService for Fixed {
        async fn generate(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            Ok(format!("echo: {}", prompt))
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_chunk() {
        let chunks: Vec<String> = Fixed
            .generate_stream("hi", 8, 0.0)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec!["echo: hi".to_string()]);
    }
}

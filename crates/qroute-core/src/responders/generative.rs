//! Responder backed by the generation service
//!
//! Sends a per-domain instruction together with the history window and any
//! earlier workflow outputs, and returns the completion as its output.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Responder, ResponderCapability, ResponderContext};
use crate::llm::{GenerationService, render_transcript};
use crate::{Error, Result};

/// Built-in responder implementation
pub struct GenerativeResponder {
    name: String,
    label: String,
    instruction: String,
    capabilities: Vec<ResponderCapability>,
    generation: Arc<dyn GenerationService>,
    max_tokens: u32,
    temperature: f32,
}

impl GenerativeResponder {
    pub fn builder(
        name: impl Into<String>,
        generation: Arc<dyn GenerationService>,
    ) -> GenerativeResponderBuilder {
        GenerativeResponderBuilder::new(name, generation)
    }

    /// Full prompt sent for `query`
    pub fn build_prompt(&self, query: &str, context: &ResponderContext) -> String {
        let mut prompt = format!("Responder: {}\n{}\n", self.name, self.instruction);

        if !context.history.is_empty() {
            prompt.push_str("\nConversation so far:\n");
            prompt.push_str(&render_transcript(&context.history));
            prompt.push('\n');
        }

        if !context.prior_outputs.is_empty() {
            prompt.push_str("\nResults from earlier steps:\n");
            for output in &context.prior_outputs {
                prompt.push_str(&format!("### {}\n{}\n", output.name, output.text));
            }
        }

        prompt.push_str(&format!("\nRequest: {}\n", query));
        prompt
    }
}

#[async_trait]
impl Responder for GenerativeResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn capabilities(&self) -> Vec<ResponderCapability> {
        self.capabilities.clone()
    }

    async fn process(&self, query: &str, context: &ResponderContext) -> Result<String> {
        let prompt = self.build_prompt(query, context);
        debug!(responder = %self.name, prompt_len = prompt.len(), "responder prompt built");

        let text = self
            .generation
            .generate(&prompt, self.max_tokens, self.temperature)
            .await
            .map_err(|e| Error::responder(&self.name, e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::responder(&self.name, "empty completion"));
        }
        Ok(text.to_string())
    }
}

/// Builder for [`GenerativeResponder`]
pub struct GenerativeResponderBuilder {
    responder: GenerativeResponder,
}

impl GenerativeResponderBuilder {
    fn new(name: impl Into<String>, generation: Arc<dyn GenerationService>) -> Self {
        let name = name.into();
        Self {
            responder: GenerativeResponder {
                label: name.clone(),
                name,
                instruction: String::new(),
                capabilities: vec![],
                generation,
                max_tokens: 2048,
                temperature: 0.4,
            },
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.responder.label = label.into();
        self
    }

    /// Domain instruction placed at the top of every prompt
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.responder.instruction = instruction.into();
        self
    }

    pub fn capability(mut self, capability: ResponderCapability) -> Self {
        self.responder.capabilities.push(capability);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.responder.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.responder.temperature = temperature;
        self
    }

    pub fn build(self) -> GenerativeResponder {
        self.responder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use crate::responders::ResponderOutput;
    use std::sync::Mutex;

    /// Records prompts and answers with a fixed text
    struct Recording {
        prompts: Mutex<Vec<String>>,
        answer: &'static str,
    }

    #[async_trait]
    impl GenerationService for Recording {
        async fn generate(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.answer.to_string())
        }
    }

    fn recording(answer: &'static str) -> Arc<Recording> {
        Arc::new(Recording {
            prompts: Mutex::new(vec![]),
            answer,
        })
    }

    #[tokio::test]
    async fn test_prompt_includes_history_and_prior_outputs() {
        let generation = recording("  summary text \n");
        let responder = GenerativeResponder::builder("research", generation.clone())
            .instruction("Research the topic.")
            .build();

        let history: Arc<[Message]> = Arc::from(vec![Message::user("earlier question")]);
        let context = ResponderContext::new(history)
            .with_prior_outputs(vec![ResponderOutput::new("translation", "translated")]);

        let output = responder.process("find sources", &context).await.unwrap();
        assert_eq!(output, "summary text");

        let prompts = generation.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.starts_with("Responder: research\nResearch the topic."));
        assert!(prompt.contains("User: earlier question"));
        assert!(prompt.contains("### translation\ntranslated"));
        assert!(prompt.ends_with("Request: find sources\n"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_failure() {
        let responder = GenerativeResponder::builder("general", recording("   ")).build();
        let err = responder
            .process("anything", &ResponderContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResponderExecution { .. }));
        assert_eq!(responder.label(), "general");
    }
}

//! Structured clarification of vague requests
//!
//! The generation service is asked for one JSON object describing the
//! clarified intent. Each attempt yields a [`ClarifyOutcome`] value; the
//! router's retry loop works on that value instead of on errors.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{GenerationService, Message, render_transcript};

/// Complexity reported by the clarifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
}

/// Next route recommended by the clarifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedRoute {
    Direct,
    Specialized,
}

/// Parsed clarification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub clarified_intent: String,
    pub missing_context: Vec<String>,
    pub complexity: Complexity,
    pub recommended_route: RecommendedRoute,
    pub responder_hint: Option<String>,
    pub refined_query: String,
}

impl Clarification {
    /// Whether the request should be answered without the engine
    pub fn wants_direct(&self) -> bool {
        self.complexity == Complexity::Simple || self.recommended_route == RecommendedRoute::Direct
    }
}

/// Result of one clarification attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClarifyOutcome {
    Parsed(Clarification),
    /// The generation call failed
    Unavailable(String),
    /// The completion did not contain a usable payload
    Unparseable(String),
}

impl ClarifyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ClarifyOutcome::Parsed(_) => "parsed",
            ClarifyOutcome::Unavailable(_) => "unavailable",
            ClarifyOutcome::Unparseable(_) => "unparseable",
        }
    }
}

/// Wire shape, validated into [`Clarification`]
#[derive(Debug, Deserialize)]
struct RawClarification {
    clarified_intent: String,
    #[serde(default)]
    missing_context: Option<Vec<String>>,
    complexity: String,
    recommended_route: String,
    #[serde(default)]
    responder_hint: Option<String>,
    refined_query: String,
}

impl RawClarification {
    fn validate(self) -> Result<Clarification, String> {
        let complexity = match self.complexity.trim().to_lowercase().as_str() {
            "simple" => Complexity::Simple,
            "complex" => Complexity::Complex,
            other => return Err(format!("unknown complexity: {}", other)),
        };
        let recommended_route = match self.recommended_route.trim().to_lowercase().as_str() {
            "direct" => RecommendedRoute::Direct,
            "specialized" => RecommendedRoute::Specialized,
            other => return Err(format!("unknown recommended_route: {}", other)),
        };

        let refined_query = self.refined_query.trim().to_string();
        if refined_query.is_empty() {
            return Err("refined_query is empty".to_string());
        }

        Ok(Clarification {
            clarified_intent: self.clarified_intent.trim().to_string(),
            missing_context: self
                .missing_context
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            complexity,
            recommended_route,
            responder_hint: self
                .responder_hint
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty()),
            refined_query,
        })
    }
}

/// Prompt requesting the clarification payload
pub fn clarification_prompt(query: &str, history: &[Message]) -> String {
    let mut prompt = String::from(
        "The user's request may be vague. Work out what they want.\n\
         Respond with a single JSON object and nothing else, with these fields:\n\
         - \"clarified_intent\": string\n\
         - \"missing_context\": array of strings naming information still needed\n\
         - \"complexity\": \"simple\" or \"complex\"\n\
         - \"recommended_route\": \"direct\" or \"specialized\"\n\
         - \"responder_hint\": optional responder name (document_writing, data_analysis, \
         code_assistant, research, translation)\n\
         - \"refined_query\": the request rewritten to be self-contained\n",
    );
    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        prompt.push_str(&render_transcript(history));
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nRequest: {}\n", query));
    prompt
}

/// Outermost `{ ... }` span of `text`, tolerating code fences and chatter
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_clarification(text: &str) -> ClarifyOutcome {
    let Some(json) = extract_json_object(text) else {
        return ClarifyOutcome::Unparseable("no JSON object in completion".to_string());
    };

    match serde_json::from_str::<RawClarification>(json) {
        Ok(raw) => match raw.validate() {
            Ok(clarification) => ClarifyOutcome::Parsed(clarification),
            Err(reason) => ClarifyOutcome::Unparseable(reason),
        },
        Err(e) => ClarifyOutcome::Unparseable(e.to_string()),
    }
}

/// One clarification attempt
pub async fn request_clarification(
    generation: &dyn GenerationService,
    prompt: &str,
    max_tokens: u32,
) -> ClarifyOutcome {
    match generation.generate(prompt, max_tokens, 0.0).await {
        Ok(text) => {
            let outcome = parse_clarification(&text);
            debug!(outcome = outcome.label(), "clarification attempt");
            outcome
        }
        Err(e) => ClarifyOutcome::Unavailable(e.to_string()),
    }
}

/// Question asking the user for the missing items
pub fn clarifying_question(intent: &str, missing: &[String]) -> String {
    let mut question = if intent.is_empty() {
        String::from("I need a bit more information before I can help:\n")
    } else {
        format!(
            "I need a bit more information before I can help with \"{}\":\n",
            intent
        )
    };
    for item in missing {
        question.push_str(&format!("- {}\n", item));
    }
    question.push_str("Could you share these details?");
    question
}

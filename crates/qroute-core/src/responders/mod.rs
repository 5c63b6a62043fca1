//! Domain responders and the read-only registry that holds them

mod generative;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classifier::keywords::count_hits;
use crate::config::EngineConfig;
use crate::llm::{GenerationService, Message};
use crate::{Error, Result};

pub use generative::{GenerativeResponder, GenerativeResponderBuilder};

/// Name of the responder used when nothing else matches
pub const DEFAULT_RESPONDER: &str = "general";

/// Output produced by one responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderOutput {
    pub name: String,
    pub text: String,
}

impl ResponderOutput {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// What a responder sees besides the query
#[derive(Debug, Clone, Default)]
pub struct ResponderContext {
    /// Trailing history window
    pub history: Arc<[Message]>,
    /// Outputs of responders that ran earlier in a sequential workflow
    pub prior_outputs: Vec<ResponderOutput>,
}

impl ResponderContext {
    pub fn new(history: Arc<[Message]>) -> Self {
        Self {
            history,
            prior_outputs: Vec::new(),
        }
    }

    pub fn with_prior_outputs(mut self, outputs: Vec<ResponderOutput>) -> Self {
        self.prior_outputs = outputs;
        self
    }

    /// Earlier output of the named responder
    pub fn prior(&self, name: &str) -> Option<&str> {
        self.prior_outputs
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.text.as_str())
    }
}

/// Keyword capability used for deterministic responder matching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderCapability {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
}

impl ResponderCapability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            keywords: vec![],
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Distinct keywords of this capability found in `query`
    pub fn hits(&self, query: &str) -> usize {
        count_hits(&self.keywords, query)
    }
}

/// A self-contained domain handler
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Stable registry key
    fn name(&self) -> &str;

    /// Human-readable label
    fn label(&self) -> &str;

    fn capabilities(&self) -> Vec<ResponderCapability> {
        vec![]
    }

    /// Keyword hits across all capabilities
    fn keyword_hits(&self, query: &str) -> usize {
        self.capabilities().iter().map(|c| c.hits(query)).sum()
    }

    async fn process(&self, query: &str, context: &ResponderContext) -> Result<String>;
}

/// Static description of a registered responder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderDescriptor {
    pub name: String,
    pub label: String,
    pub keywords: Vec<String>,
}

/// Immutable set of responders, in registration order
pub struct ResponderRegistry {
    responders: Vec<Arc<dyn Responder>>,
    default: Arc<dyn Responder>,
}

impl std::fmt::Debug for ResponderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderRegistry")
            .field("responders", &self.names())
            .field("default", &self.default.name())
            .finish()
    }
}

impl ResponderRegistry {
    pub fn builder() -> ResponderRegistryBuilder {
        ResponderRegistryBuilder::default()
    }

    /// Registry with the built-in generative responders
    pub fn builtin(generation: Arc<dyn GenerationService>, config: &EngineConfig) -> Result<Self> {
        let responder = |name: &str, label: &str| {
            GenerativeResponder::builder(name, generation.clone())
                .label(label)
                .max_tokens(config.responder_max_tokens)
                .temperature(config.responder_temperature)
        };

        Self::builder()
            .register(
                responder("document_writing", "Document Writing")
                    .instruction(
                        "Write or revise the requested document. Produce well structured, \
                         ready-to-use prose.",
                    )
                    .capability(
                        ResponderCapability::new("writing", "Documents and reports").with_keywords([
                            "문서", "작성", "보고서", "초안", "기획서", "이메일", "document", "report", "draft",
                            "write", "essay", "proposal", "letter",
                        ]),
                    )
                    .build(),
            )
            .register(
                responder("data_analysis", "Data Analysis")
                    .instruction(
                        "Analyze the data described in the request. State the method, \
                         the findings and their limits.",
                    )
                    .capability(
                        ResponderCapability::new("analysis", "Data and statistics").with_keywords([
                            "분석", "데이터", "통계", "매출", "차트", "그래프", "analyze", "analysis", "data",
                            "statistics", "chart", "csv", "trend",
                        ]),
                    )
                    .build(),
            )
            .register(
                responder("code_assistant", "Code Assistant")
                    .instruction(
                        "Help with the programming task. Show code in fenced blocks and explain \
                         non-obvious parts briefly.",
                    )
                    .capability(
                        ResponderCapability::new("coding", "Programming help").with_keywords([
                            "코드", "함수", "버그", "프로그램", "디버그", "파이썬", "code", "function", "bug",
                            "debug", "program", "python", "rust", "compile",
                        ]),
                    )
                    .build(),
            )
            .register(
                responder("research", "Research")
                    .instruction(
                        "Research the topic of the request. Summarize what is known and note \
                         open points.",
                    )
                    .capability(
                        ResponderCapability::new("research", "Investigation and sources").with_keywords([
                            "검색", "조사", "자료", "찾아", "동향", "논문", "research", "search", "find",
                            "investigate", "sources", "paper",
                        ]),
                    )
                    .build(),
            )
            .register(
                responder("translation", "Translation")
                    .instruction(
                        "Translate the given text faithfully, keeping tone and formatting.",
                    )
                    .capability(
                        ResponderCapability::new("translation", "Translation").with_keywords([
                            "번역", "영어로", "한국어로", "일본어로", "translate", "translation", "english",
                            "korean",
                        ]),
                    )
                    .build(),
            )
            .register(
                responder(DEFAULT_RESPONDER, "General Assistant")
                    .instruction("Answer the request as a capable general assistant.")
                    .build(),
            )
            .default_responder(DEFAULT_RESPONDER)
            .build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Responder>> {
        self.responders.iter().find(|r| r.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.responders.iter().any(|r| r.name() == name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.responders.iter().map(|r| r.name()).collect()
    }

    pub fn responders(&self) -> &[Arc<dyn Responder>] {
        &self.responders
    }

    pub fn default_responder(&self) -> Arc<dyn Responder> {
        self.default.clone()
    }

    pub fn descriptors(&self) -> Vec<ResponderDescriptor> {
        self.responders
            .iter()
            .map(|r| ResponderDescriptor {
                name: r.name().to_string(),
                label: r.label().to_string(),
                keywords: r
                    .capabilities()
                    .into_iter()
                    .flat_map(|c| c.keywords)
                    .collect(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }
}

/// Builder for [`ResponderRegistry`]
#[derive(Default)]
pub struct ResponderRegistryBuilder {
    responders: Vec<Arc<dyn Responder>>,
    default: Option<String>,
}

impl ResponderRegistryBuilder {
    pub fn register(mut self, responder: impl Responder) -> Self {
        self.responders.push(Arc::new(responder));
        self
    }

    pub fn register_arc(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responders.push(responder);
        self
    }

    /// Responder used when keyword matching finds nothing.
    /// Defaults to the first registered responder.
    pub fn default_responder(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn build(self) -> Result<ResponderRegistry> {
        let mut seen = HashSet::new();
        for responder in &self.responders {
            if !seen.insert(responder.name().to_string()) {
                return Err(Error::Config(format!(
                    "duplicate responder name: {}",
                    responder.name()
                )));
            }
        }

        let default = match &self.default {
            Some(name) => self
                .responders
                .iter()
                .find(|r| r.name() == name)
                .cloned()
                .ok_or_else(|| Error::ResponderNotFound(name.clone()))?,
            None => self
                .responders
                .first()
                .cloned()
                .ok_or_else(|| Error::Config("responder registry is empty".to_string()))?,
        };

        Ok(ResponderRegistry {
            responders: self.responders,
            default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Responder for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn label(&self) -> &str {
            "Echo"
        }

        async fn process(&self, query: &str, _context: &ResponderContext) -> Result<String> {
            Ok(query.to_string())
        }
    }

    struct Offline;

    #[async_trait]
    impl GenerationService for Offline {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            Err(Error::GenerationApi("offline".to_string()))
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ResponderRegistry::builtin(Arc::new(Offline), &EngineConfig::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "document_writing",
                "data_analysis",
                "code_assistant",
                "research",
                "translation",
                "general"
            ]
        );
        assert_eq!(registry.default_responder().name(), DEFAULT_RESPONDER);
        assert_eq!(
            registry
                .get("document_writing")
                .unwrap()
                .keyword_hits("문서 작성해줘 보고서"),
            3
        );
        assert_eq!(registry.get("general").unwrap().keyword_hits("문서"), 0);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ResponderRegistry::builder()
            .register(Echo("a"))
            .register(Echo("a"))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_default_rejected() {
        let result = ResponderRegistry::builder()
            .register(Echo("a"))
            .default_responder("missing")
            .build();
        assert!(matches!(result, Err(Error::ResponderNotFound(_))));
    }

    #[test]
    fn test_default_is_first_when_unset() {
        let registry = ResponderRegistry::builder()
            .register(Echo("a"))
            .register(Echo("b"))
            .build()
            .unwrap();
        assert_eq!(registry.default_responder().name(), "a");
        assert!(registry.contains("b"));
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_context_prior_lookup() {
        let context = ResponderContext::new(Arc::from(Vec::new()))
            .with_prior_outputs(vec![ResponderOutput::new("research", "facts")]);
        assert_eq!(context.prior("research"), Some("facts"));
        assert_eq!(context.prior("translation"), None);
    }
}

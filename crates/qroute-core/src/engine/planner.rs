//! Responder selection
//!
//! The planner asks the generation service for a compact `r1,r2|workflow`
//! line. When that call fails or its answer is unusable, the deterministic
//! keyword matcher picks exactly one responder.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{PARALLEL_CAP, SEQUENTIAL_CAP};
use crate::llm::{Message, render_transcript};
use crate::responders::{Responder, ResponderRegistry};
use crate::state::Workflow;

/// Where a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// Caller forced a known responder
    Forced,
    /// Parsed from the planner completion
    Planner,
    /// Keyword matcher found at least one hit
    KeywordMatch,
    /// Keyword matcher found nothing; registry default used
    Default,
}

/// Responders to run and in which topology
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub responders: Vec<String>,
    pub workflow: Workflow,
    pub source: PlanSource,
    /// Names removed by the workflow caps
    pub dropped: Vec<String>,
}

impl Plan {
    pub fn single(name: impl Into<String>, source: PlanSource) -> Self {
        Self {
            responders: vec![name.into()],
            workflow: Workflow::Single,
            source,
            dropped: vec![],
        }
    }

    /// Truncate the responder list to the cap of its workflow. Configured
    /// caps never exceed [`SEQUENTIAL_CAP`] and [`PARALLEL_CAP`].
    pub fn apply_caps(mut self, max_sequential: usize, max_parallel: usize) -> Self {
        let cap = match self.workflow {
            Workflow::Single => 1,
            Workflow::Sequential => max_sequential.clamp(1, SEQUENTIAL_CAP),
            Workflow::Parallel => max_parallel.clamp(1, PARALLEL_CAP),
        };
        if self.responders.len() > cap {
            self.dropped = self.responders.split_off(cap);
        }
        self
    }

    pub fn unclassified(&self) -> bool {
        self.source == PlanSource::Default
    }
}

/// Prompt asking for a responder list and workflow label
pub fn planner_prompt(registry: &ResponderRegistry, query: &str, history: &[Message]) -> String {
    let mut prompt = String::from(
        "Select the responders that should handle the request below.\n\nAvailable responders:\n",
    );
    for descriptor in registry.descriptors() {
        prompt.push_str(&format!("- {}: {}\n", descriptor.name, descriptor.label));
    }
    prompt.push_str(
        "\nReply with exactly one line of the form `name1,name2|workflow` where workflow is \
         single, sequential or parallel. Use sequential when a responder needs the results of \
         the previous one and parallel when the parts are independent.\n",
    );
    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        prompt.push_str(&render_transcript(history));
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nRequest: {}\n", query));
    prompt
}

/// Parse a planner completion into a plan.
///
/// Reads the first line containing `|`. Names are lower-cased, filtered to
/// registered responders and deduplicated. Returns `None` if no usable
/// line, label, or name remains.
pub fn parse_plan(text: &str, registry: &ResponderRegistry) -> Option<Plan> {
    let line = text.lines().find(|l| l.contains('|'))?;
    let (names, label) = line.split_once('|')?;

    let label = label.trim().trim_matches(|c: char| !c.is_ascii_alphabetic());
    let workflow = Workflow::parse(label.split_whitespace().next()?)?;

    let mut seen = HashSet::new();
    let mut responders: Vec<String> = names
        .split(',')
        .map(|n| {
            n.trim()
                .trim_matches(|c: char| c == '`' || c == '"' || c == '\'')
                .to_lowercase()
        })
        .filter(|n| registry.contains(n))
        .filter(|n| seen.insert(n.clone()))
        .collect();

    if responders.is_empty() {
        return None;
    }

    let workflow = if responders.len() == 1 {
        Workflow::Single
    } else {
        workflow
    };
    let mut dropped = vec![];
    if workflow == Workflow::Single && responders.len() > 1 {
        dropped = responders.split_off(1);
    }

    Some(Plan {
        responders,
        workflow,
        source: PlanSource::Planner,
        dropped,
    })
}

/// Deterministic fallback: the responder with the most keyword hits, or the
/// registry default when nothing matches. Registration order breaks ties.
pub fn keyword_match(registry: &ResponderRegistry, query: &str) -> Plan {
    let mut best: Option<(&Arc<dyn Responder>, usize)> = None;

    for responder in registry.responders() {
        let hits = responder.keyword_hits(query);
        if hits == 0 {
            continue;
        }
        match best {
            Some((_, best_hits)) if hits <= best_hits => {}
            _ => best = Some((responder, hits)),
        }
    }

    match best {
        Some((responder, _)) => Plan::single(responder.name(), PlanSource::KeywordMatch),
        None => Plan::single(registry.default_responder().name(), PlanSource::Default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::config::EngineConfig;
    use crate::llm::GenerationService;
    use async_trait::async_trait;

    struct Unused;

    #[async_trait]
    impl GenerationService for Unused {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            Ok(String::new())
        }
    }

    fn registry() -> ResponderRegistry {
        ResponderRegistry::builtin(Arc::new(Unused), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_plan_sequential() {
        let plan = parse_plan("research, document_writing|sequential", &registry()).unwrap();
        assert_eq!(plan.responders, vec!["research", "document_writing"]);
        assert_eq!(plan.workflow, Workflow::Sequential);
        assert_eq!(plan.source, PlanSource::Planner);
    }

    #[test]
    fn test_parse_plan_uses_first_pipe_line() {
        let text = "Sure, here is the plan:\n`Research,Translation|Parallel`.\nother|single";
        let plan = parse_plan(text, &registry()).unwrap();
        assert_eq!(plan.responders, vec!["research", "translation"]);
        assert_eq!(plan.workflow, Workflow::Parallel);
    }

    #[test]
    fn test_parse_plan_filters_and_dedupes() {
        let plan = parse_plan("research,unknown,research|parallel", &registry()).unwrap();
        assert_eq!(plan.responders, vec!["research"]);
        assert_eq!(plan.workflow, Workflow::Single);
    }

    #[test]
    fn test_parse_plan_rejects_unusable_text() {
        let registry = registry();
        assert!(parse_plan("no pipe here", &registry).is_none());
        assert!(parse_plan("research|fanout", &registry).is_none());
        assert!(parse_plan("wizard,oracle|parallel", &registry).is_none());
    }

    #[test]
    fn test_caps_drop_excess_names() {
        let plan = Plan {
            responders: ["a", "b", "c", "d"].map(String::from).to_vec(),
            workflow: Workflow::Parallel,
            source: PlanSource::Planner,
            dropped: vec![],
        }
        .apply_caps(5, 3);
        assert_eq!(plan.responders, vec!["a", "b", "c"]);
        assert_eq!(plan.dropped, vec!["d"]);
    }

    #[test]
    fn test_caps_never_exceed_hard_limits() {
        let names = ["a", "b", "c", "d", "e", "f", "g"].map(String::from).to_vec();
        let parallel = Plan {
            responders: names.clone(),
            workflow: Workflow::Parallel,
            source: PlanSource::Planner,
            dropped: vec![],
        }
        .apply_caps(10, 6);
        assert_eq!(parallel.responders.len(), PARALLEL_CAP);
        assert_eq!(parallel.dropped.len(), 4);

        let sequential = Plan {
            responders: names,
            workflow: Workflow::Sequential,
            source: PlanSource::Planner,
            dropped: vec![],
        }
        .apply_caps(10, 6);
        assert_eq!(sequential.responders.len(), SEQUENTIAL_CAP);
        assert_eq!(sequential.dropped, vec!["f", "g"]);
    }

    #[test]
    fn test_keyword_match_picks_best_responder() {
        let plan = keyword_match(&registry(), "문서 작성해줘 보고서");
        assert_eq!(plan.responders, vec!["document_writing"]);
        assert_eq!(plan.workflow, Workflow::Single);
        assert_eq!(plan.source, PlanSource::KeywordMatch);
    }

    #[test]
    fn test_keyword_match_tie_uses_registration_order() {
        // one document_writing hit and one data_analysis hit
        let plan = keyword_match(&registry(), "report on the data");
        assert_eq!(plan.responders, vec!["document_writing"]);
    }

    #[test]
    fn test_keyword_match_zero_hits_is_unclassified_default() {
        let plan = keyword_match(&registry(), "고양이가 귀여워");
        assert_eq!(plan.responders, vec!["general"]);
        assert!(plan.unclassified());
    }

    #[test]
    fn test_planner_prompt_lists_responders() {
        let prompt = planner_prompt(&registry(), "q", &[]);
        assert!(prompt.contains("Available responders:"));
        assert!(prompt.contains("- translation: Translation"));
        assert!(prompt.ends_with("Request: q\n"));
    }
}

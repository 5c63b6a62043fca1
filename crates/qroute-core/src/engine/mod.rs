//! Multi-responder execution engine
//!
//! Picks one or more responders plus a topology for a query, runs them and
//! merges their outputs. Every decision is written to the returned log.

pub mod aggregate;
pub mod planner;
pub mod workflow;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::ErrorKind;
use crate::llm::{GenerationService, Message};
use crate::responders::{Responder, ResponderContext, ResponderOutput, ResponderRegistry};
use crate::state::{ExecutionLogEntry, Workflow};
use crate::{Error, Result};

use aggregate::merge_outputs;
use planner::{Plan, PlanSource, keyword_match, parse_plan, planner_prompt};
use workflow::{WorkflowRun, run_parallel, run_sequential, run_single};

/// Overall status of one engine execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Every invoked responder succeeded
    Success,
    /// At least one responder failed or was skipped
    Partial,
}

/// Result of one engine execution
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub status: EngineStatus,
    pub outputs: Vec<ResponderOutput>,
    pub responders_used: Vec<String>,
    pub workflow: Workflow,
    pub merged_output: String,
    pub log: Vec<ExecutionLogEntry>,
}

impl EngineOutcome {
    /// True when at least one responder produced output
    pub fn has_output(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Engine over a shared, read-only responder registry
pub struct MultiResponderEngine {
    registry: Arc<ResponderRegistry>,
    generation: Arc<dyn GenerationService>,
    config: EngineConfig,
}

impl MultiResponderEngine {
    pub fn new(
        registry: Arc<ResponderRegistry>,
        generation: Arc<dyn GenerationService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            generation,
            config,
        }
    }

    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    /// Execute `query` with responders chosen by the planner, or with
    /// `forced` when it names a registered responder.
    pub async fn execute(
        &self,
        query: &str,
        history: &[Message],
        forced: Option<&str>,
    ) -> Result<EngineOutcome> {
        let mut log = Vec::new();

        let plan_start = Instant::now();
        let (plan, forced_missing) = self.plan(query, history, forced).await;
        let plan = plan.apply_caps(self.config.max_sequential, self.config.max_parallel);

        info!(
            responders = ?plan.responders,
            workflow = %plan.workflow,
            source = ?plan.source,
            "engine plan"
        );
        if !plan.dropped.is_empty() {
            warn!(dropped = ?plan.dropped, "responders beyond the workflow cap were dropped");
        }

        let mut plan_meta = json!({
            "responders": plan.responders,
            "workflow": plan.workflow,
            "source": plan.source,
            "dropped": plan.dropped,
            "unclassified": plan.unclassified(),
        });
        if let Some(name) = &forced_missing {
            plan_meta["forced_responder"] = json!(name);
            plan_meta["error"] = json!(ErrorKind::ResponderNotFound);
        }
        log.push(ExecutionLogEntry::success("engine_plan", plan_start.elapsed()).with_metadata(plan_meta));

        let responders = self.resolve(&plan.responders)?;
        let context = ResponderContext::new(Arc::from(history));

        let run = match plan.workflow {
            Workflow::Single => {
                let responder = responders
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Other("empty single-responder plan".to_string()))?;
                run_single(responder, query, context).await
            }
            Workflow::Sequential => run_sequential(responders, query, context).await,
            Workflow::Parallel => {
                run_parallel(responders, query, context, self.config.max_parallel).await?
            }
        };

        Ok(self.aggregate(plan.workflow, run, log))
    }

    /// Decide which responders run and how.
    ///
    /// Returns the plan and, if the caller forced an unknown responder, its
    /// name.
    async fn plan(
        &self,
        query: &str,
        history: &[Message],
        forced: Option<&str>,
    ) -> (Plan, Option<String>) {
        let mut forced_missing = None;

        if let Some(name) = forced.map(str::trim).filter(|n| !n.is_empty()) {
            let name = name.to_lowercase();
            if self.registry.contains(&name) {
                return (Plan::single(name, PlanSource::Forced), None);
            }
            warn!(responder = %name, "forced responder is not registered");
            forced_missing = Some(name);
        }

        let prompt = planner_prompt(&self.registry, query, history);
        let plan = match self
            .generation
            .generate(&prompt, self.config.planner_max_tokens, 0.0)
            .await
        {
            Ok(text) => match parse_plan(&text, &self.registry) {
                Some(plan) => plan,
                None => {
                    debug!(completion = %text, "planner output unparseable, using keyword matcher");
                    keyword_match(&self.registry, query)
                }
            },
            Err(e) => {
                warn!(error = %e, "planner call failed, using keyword matcher");
                keyword_match(&self.registry, query)
            }
        };

        (plan, forced_missing)
    }

    fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Responder>>> {
        names
            .iter()
            .map(|name| {
                self.registry
                    .get(name)
                    .ok_or_else(|| Error::ResponderNotFound(name.clone()))
            })
            .collect()
    }

    fn aggregate(
        &self,
        workflow: Workflow,
        run: WorkflowRun,
        mut log: Vec<ExecutionLogEntry>,
    ) -> EngineOutcome {
        let start = Instant::now();
        let WorkflowRun {
            outputs,
            failed,
            skipped,
            invoked,
            entries,
        } = run;

        log.extend(entries);

        let status = if failed.is_empty() && skipped.is_empty() && !outputs.is_empty() {
            EngineStatus::Success
        } else {
            EngineStatus::Partial
        };
        let merged_output = merge_outputs(workflow, &outputs);

        let entry = if outputs.is_empty() {
            ExecutionLogEntry::error("engine_aggregate", start.elapsed())
        } else {
            ExecutionLogEntry::success("engine_aggregate", start.elapsed())
        };
        log.push(entry.with_metadata(json!({
            "status": status,
            "workflow": workflow,
            "succeeded": outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            "failed": failed,
            "skipped": skipped,
        })));

        EngineOutcome {
            status,
            outputs,
            responders_used: invoked,
            workflow,
            merged_output,
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Planner answers with a fixed line; responders echo their name
    struct Stub {
        plan: Option<&'static str>,
        planner_calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationService for Stub {
        async fn generate(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            if prompt.contains("Available responders:") {
                self.planner_calls.fetch_add(1, Ordering::SeqCst);
                return match self.plan {
                    Some(plan) => Ok(plan.to_string()),
                    None => Err(Error::GenerationApi("unavailable".to_string())),
                };
            }
            let name = prompt
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Responder: "))
                .unwrap_or("?");
            Ok(format!("output of {}", name))
        }
    }

    fn engine(plan: Option<&'static str>) -> (MultiResponderEngine, Arc<Stub>) {
        let stub = Arc::new(Stub {
            plan,
            planner_calls: AtomicUsize::new(0),
        });
        let config = EngineConfig::default();
        let registry = Arc::new(ResponderRegistry::builtin(stub.clone(), &config).unwrap());
        (MultiResponderEngine::new(registry, stub.clone(), config), stub)
    }

    fn stages(outcome: &EngineOutcome) -> Vec<&str> {
        outcome.log.iter().map(|e| e.stage.as_str()).collect()
    }

    #[tokio::test]
    async fn test_forced_responder_skips_planner() {
        let (engine, stub) = engine(Some("research|single"));
        let outcome = engine
            .execute("번역해줘", &[], Some("translation"))
            .await
            .unwrap();

        assert_eq!(stub.planner_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.workflow, Workflow::Single);
        assert_eq!(outcome.responders_used, vec!["translation"]);
        assert_eq!(outcome.merged_output, "output of translation");
        assert_eq!(outcome.status, EngineStatus::Success);
        assert_eq!(
            stages(&outcome),
            vec!["engine_plan", "responder:translation", "engine_aggregate"]
        );
    }

    #[tokio::test]
    async fn test_unknown_forced_responder_falls_back_to_planning() {
        let (engine, stub) = engine(Some("research|single"));
        let outcome = engine.execute("q", &[], Some("astrology")).await.unwrap();

        assert_eq!(stub.planner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.responders_used, vec!["research"]);
        assert_eq!(outcome.log[0].metadata["error"], "responder_not_found");
    }

    #[tokio::test]
    async fn test_planner_sequential_plan() {
        let (engine, _) = engine(Some("research,document_writing|sequential"));
        let outcome = engine.execute("시장 조사 후 보고서", &[], None).await.unwrap();

        assert_eq!(outcome.workflow, Workflow::Sequential);
        assert_eq!(
            outcome.merged_output,
            "### research\noutput of research\n\n### document_writing\noutput of document_writing"
        );
    }

    #[tokio::test]
    async fn test_planner_unavailable_uses_keyword_matcher() {
        let (engine, stub) = engine(None);
        let outcome = engine.execute("문서 작성해줘 보고서", &[], None).await.unwrap();

        assert_eq!(stub.planner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.workflow, Workflow::Single);
        assert_eq!(outcome.responders_used, vec!["document_writing"]);
        assert_eq!(outcome.log[0].metadata["source"], "keyword_match");
    }

    #[tokio::test]
    async fn test_unparseable_plan_with_no_hits_uses_default() {
        let (engine, _) = engine(Some("I am not sure"));
        let outcome = engine.execute("고양이가 귀여워", &[], None).await.unwrap();

        assert_eq!(outcome.responders_used, vec!["general"]);
        assert_eq!(outcome.log[0].metadata["unclassified"], true);
    }

    #[tokio::test]
    async fn test_parallel_cap_applied() {
        let (engine, _) = engine(Some(
            "research,translation,data_analysis,code_assistant|parallel",
        ));
        let outcome = engine.execute("q", &[], None).await.unwrap();

        assert_eq!(outcome.workflow, Workflow::Parallel);
        assert_eq!(outcome.responders_used.len(), 3);
        assert_eq!(outcome.log[0].metadata["dropped"][0], "code_assistant");
        assert_eq!(outcome.status, EngineStatus::Success);
    }
}

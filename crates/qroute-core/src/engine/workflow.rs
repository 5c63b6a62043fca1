//! Single, sequential and parallel responder execution

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::responders::{Responder, ResponderContext, ResponderOutput};
use crate::state::{ExecutionLogEntry, Workflow};
use crate::{Error, Result};

/// Everything one workflow run produced
#[derive(Debug, Default)]
pub struct WorkflowRun {
    /// Successful outputs in execution (or completion) order
    pub outputs: Vec<ResponderOutput>,
    pub failed: Vec<String>,
    /// Responders that were never started
    pub skipped: Vec<String>,
    /// Responders that were started, in start order
    pub invoked: Vec<String>,
    pub entries: Vec<ExecutionLogEntry>,
}

impl WorkflowRun {
    fn record(&mut self, workflow: Workflow, name: &str, elapsed: Duration, result: Result<String>) {
        match result {
            Ok(text) => {
                debug!(responder = name, ?elapsed, "responder completed");
                self.entries.push(
                    ExecutionLogEntry::success(format!("responder:{}", name), elapsed)
                        .with_metadata(json!({ "workflow": workflow })),
                );
                self.outputs.push(ResponderOutput::new(name, text));
            }
            Err(e) => {
                warn!(responder = name, error = %e, "responder failed");
                self.entries.push(
                    ExecutionLogEntry::error(format!("responder:{}", name), elapsed).with_metadata(
                        json!({
                            "workflow": workflow,
                            "error": ErrorKind::ResponderExecutionFailure,
                        }),
                    ),
                );
                self.failed.push(name.to_string());
            }
        }
    }
}

/// Run `responder.process`, turning a panic into an execution error
async fn process_isolated(
    responder: &Arc<dyn Responder>,
    query: &str,
    context: &ResponderContext,
) -> Result<String> {
    match std::panic::AssertUnwindSafe(responder.process(query, context))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::responder(responder.name(), "responder panicked")),
    }
}

pub async fn run_single(
    responder: Arc<dyn Responder>,
    query: &str,
    context: ResponderContext,
) -> WorkflowRun {
    let mut run = WorkflowRun::default();
    run.invoked.push(responder.name().to_string());

    let start = Instant::now();
    let result = process_isolated(&responder, query, &context).await;
    run.record(Workflow::Single, responder.name(), start.elapsed(), result);
    run
}

/// Run in order, giving each responder the outputs of those before it.
/// Stops at the first failure.
pub async fn run_sequential(
    responders: Vec<Arc<dyn Responder>>,
    query: &str,
    context: ResponderContext,
) -> WorkflowRun {
    let mut run = WorkflowRun::default();
    let mut remaining = responders.into_iter();

    for responder in remaining.by_ref() {
        run.invoked.push(responder.name().to_string());

        let step_context = context.clone().with_prior_outputs(run.outputs.clone());
        let start = Instant::now();
        let result = process_isolated(&responder, query, &step_context).await;
        let failed = result.is_err();
        run.record(Workflow::Sequential, responder.name(), start.elapsed(), result);

        if failed {
            break;
        }
    }

    run.skipped = remaining.map(|r| r.name().to_string()).collect();
    if !run.skipped.is_empty() {
        debug!(skipped = ?run.skipped, "sequential workflow stopped early");
    }
    run
}

/// Run concurrently as independent tasks and wait for all of them.
///
/// Each task sees only the query and history. A failing or panicking task
/// does not affect its siblings. Outputs are recorded in completion order.
pub async fn run_parallel(
    responders: Vec<Arc<dyn Responder>>,
    query: &str,
    context: ResponderContext,
    max_concurrency: usize,
) -> Result<WorkflowRun> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let mut pending: HashMap<tokio::task::Id, String> = HashMap::new();
    let mut run = WorkflowRun::default();
    let fan_out = Instant::now();

    for responder in responders {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("parallel workflow semaphore closed: {}", e)))?;
        let query = query.to_string();
        let context = context.clone();
        let name = responder.name().to_string();

        let handle = join_set.spawn(async move {
            let start = Instant::now();
            let result = responder.process(&query, &context).await;
            drop(permit);
            (start.elapsed(), result)
        });
        run.invoked.push(name.clone());
        pending.insert(handle.id(), name);
    }

    // Fan-in barrier: every task resolves before the workflow returns
    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, (elapsed, result))) => {
                let name = pending.remove(&id).unwrap_or_default();
                run.record(Workflow::Parallel, &name, elapsed, result);
            }
            Err(join_error) => {
                let name = pending.remove(&join_error.id()).unwrap_or_default();
                let reason = if join_error.is_panic() {
                    "responder panicked"
                } else {
                    "responder task cancelled"
                };
                run.record(
                    Workflow::Parallel,
                    &name,
                    fan_out.elapsed(),
                    Err(Error::responder(&name, reason)),
                );
            }
        }
    }

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use async_trait::async_trait;

    /// Answers after `delay_ms`, or fails / panics by name
    struct Scripted {
        name: &'static str,
        delay_ms: u64,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Echo,
        Fail,
        Panic,
    }

    #[async_trait]
    impl Responder for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn label(&self) -> &str {
            self.name
        }

        async fn process(&self, query: &str, context: &ResponderContext) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            match self.behavior {
                Behavior::Echo => Ok(format!(
                    "{} saw {} prior for {}",
                    self.name,
                    context.prior_outputs.len(),
                    query
                )),
                Behavior::Fail => Err(Error::responder(self.name, "scripted failure")),
                Behavior::Panic => panic!("scripted panic"),
            }
        }
    }

    fn scripted(name: &'static str, delay_ms: u64, behavior: Behavior) -> Arc<dyn Responder> {
        Arc::new(Scripted {
            name,
            delay_ms,
            behavior,
        })
    }

    fn context() -> ResponderContext {
        ResponderContext::new(Arc::from(vec![Message::user("earlier")]))
    }

    fn names(outputs: &[ResponderOutput]) -> Vec<&str> {
        outputs.iter().map(|o| o.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_single_records_one_entry() {
        let run = run_single(scripted("a", 0, Behavior::Echo), "q", context()).await;
        assert_eq!(names(&run.outputs), vec!["a"]);
        assert_eq!(run.entries.len(), 1);
        assert_eq!(run.entries[0].stage, "responder:a");
    }

    #[tokio::test]
    async fn test_sequential_passes_prior_outputs() {
        let responders = vec![
            scripted("a", 0, Behavior::Echo),
            scripted("b", 0, Behavior::Echo),
            scripted("c", 0, Behavior::Echo),
        ];
        let run = run_sequential(responders, "q", context()).await;
        assert_eq!(names(&run.outputs), vec!["a", "b", "c"]);
        assert_eq!(run.outputs[0].text, "a saw 0 prior for q");
        assert_eq!(run.outputs[2].text, "c saw 2 prior for q");
        assert!(run.failed.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        for failing in 0..5 {
            let responders: Vec<_> = ["a", "b", "c", "d", "e"]
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    let behavior = if i == failing { Behavior::Fail } else { Behavior::Echo };
                    scripted(name, 0, behavior)
                })
                .collect();

            let run = run_sequential(responders, "q", context()).await;
            assert_eq!(run.outputs.len(), failing);
            assert_eq!(run.failed.len(), 1);
            assert_eq!(run.skipped.len(), 4 - failing);
            assert_eq!(run.entries.len(), failing + 1);
        }
    }

    #[tokio::test]
    async fn test_parallel_isolates_failures() {
        let responders = vec![
            scripted("slow", 30, Behavior::Echo),
            scripted("broken", 0, Behavior::Fail),
            scripted("fast", 5, Behavior::Echo),
        ];
        let run = run_parallel(responders, "q", context(), 3).await.unwrap();

        let mut succeeded = names(&run.outputs);
        succeeded.sort();
        assert_eq!(succeeded, vec!["fast", "slow"]);
        assert_eq!(run.failed, vec!["broken"]);
        assert_eq!(run.entries.len(), 3);
        // parallel responders never see each other's output
        assert!(run.outputs.iter().all(|o| o.text.contains("saw 0 prior")));
    }

    #[tokio::test]
    async fn test_parallel_survives_panic() {
        let responders = vec![
            scripted("steady", 0, Behavior::Echo),
            scripted("panicky", 0, Behavior::Panic),
        ];
        let run = run_parallel(responders, "q", context(), 3).await.unwrap();
        assert_eq!(names(&run.outputs), vec!["steady"]);
        assert_eq!(run.failed, vec!["panicky"]);
    }

    #[tokio::test]
    async fn test_single_survives_panic() {
        let run = run_single(scripted("panicky", 0, Behavior::Panic), "q", context()).await;
        assert!(run.outputs.is_empty());
        assert_eq!(run.failed, vec!["panicky"]);
    }
}

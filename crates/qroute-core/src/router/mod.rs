//! Routing state machine
//!
//! ```text
//! Classify ──┬─> DirectExecute ───────────────────────────┐
//!            ├─> ReasoningExecute ─┬─> DirectExecute ─────┤
//!            │                     └─> SpecializedExecute ┤
//!            └─> SpecializedExecute ──(failure)─> Direct ─┴─> Finalize
//! ```
//!
//! Each stage reads the [`RequestState`] and returns a [`StateUpdate`] plus
//! the next stage. The whole sequence runs under one wall-clock budget.

pub mod clarify;
pub mod direct;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditLogger, AuditSink};
use crate::classifier::{Classification, IntentClassifier};
use crate::config::{Config, RouterConfig};
use crate::engine::{EngineStatus, MultiResponderEngine};
use crate::error::ErrorKind;
use crate::llm::{GenerationService, Message, history_window};
use crate::responders::ResponderRegistry;
use crate::state::{
    ExecutionLogEntry, RequestState, Route, RouteResult, StageOutcome, StateUpdate,
};
use crate::{Error, Result};

use clarify::{ClarifyOutcome, clarification_prompt, clarifying_question, request_clarification};
use direct::{APOLOGY, direct_prompt};

/// Response when the whole-invocation budget is exhausted
pub const TIMEOUT_RESPONSE: &str =
    "Sorry, this request took too long to complete and was stopped. Please try again.";

/// Response when an unexpected failure escaped every stage
pub const INTERNAL_ERROR_RESPONSE: &str =
    "Sorry, something went wrong while handling your request. Please try again.";

/// Substituted if a request somehow finishes without a response
pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I'm not sure how to answer that. Could you rephrase your request?";

/// Pipeline stages
#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Classify,
    DirectExecute { query: String },
    ReasoningExecute,
    SpecializedExecute { query: String, forced: Option<String> },
    Finalize,
}

/// Top-level router: classify, execute, finalize
pub struct QueryRouter {
    classifier: Arc<IntentClassifier>,
    engine: Arc<MultiResponderEngine>,
    generation: Arc<dyn GenerationService>,
    config: RouterConfig,
    timeout: Duration,
    classifier_permits: Arc<Semaphore>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl QueryRouter {
    pub fn new(
        classifier: Arc<IntentClassifier>,
        engine: Arc<MultiResponderEngine>,
        generation: Arc<dyn GenerationService>,
        config: RouterConfig,
    ) -> Self {
        Self {
            classifier,
            engine,
            generation,
            timeout: config.timeout(),
            classifier_permits: Arc::new(Semaphore::new(config.classifier_workers.max(1))),
            config,
            audit: None,
        }
    }

    /// Build the router and its collaborators from configuration
    pub fn from_config(config: &Config, generation: Arc<dyn GenerationService>) -> Result<Self> {
        let registry = Arc::new(ResponderRegistry::builtin(generation.clone(), &config.engine)?);
        let engine = Arc::new(MultiResponderEngine::new(
            registry,
            generation.clone(),
            config.engine.clone(),
        ));
        let router = Self::new(
            Arc::new(IntentClassifier::new()),
            engine,
            generation,
            config.router.clone(),
        );

        if !config.audit.enabled {
            return Ok(router);
        }
        let logger = AuditLogger::new(config.audit.clone())
            .map_err(|e| Error::Config(format!("audit logger: {}", e)))?;
        Ok(router.with_audit(Arc::new(logger)))
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Override the whole-invocation budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine(&self) -> &MultiResponderEngine {
        &self.engine
    }

    /// Route `query` and return the merged result. Never fails; every
    /// failure is reported through the result's status and error fields.
    pub async fn route_and_execute(
        &self,
        query: &str,
        history: &[Message],
        user_id: &str,
    ) -> RouteResult {
        let started = Instant::now();
        let window = history_window(history, self.config.history_window);
        let mut state = RequestState::new(query, window, user_id);

        info!(
            request_id = %state.request_id,
            user_id = %state.user_id,
            history = window.len(),
            "routing request"
        );

        let outcome = AssertUnwindSafe(tokio::time::timeout(
            self.timeout,
            self.run_stages(&mut state),
        ))
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                error!(request_id = %state.request_id, error = %e, "request failed outside stage handling");
                self.catch_all(&mut state, started);
            }
            Ok(Err(_elapsed)) => self.on_timeout(&mut state),
            Err(_panic) => {
                error!(request_id = %state.request_id, "request panicked");
                self.catch_all(&mut state, started);
            }
        }

        self.finalize(state).await
    }

    async fn run_stages(&self, state: &mut RequestState) -> Result<()> {
        let mut stage = Stage::Classify;
        loop {
            let (update, next) = match &stage {
                Stage::Classify => self.classify(state).await,
                Stage::DirectExecute { query } => self.direct_execute(state, query).await?,
                Stage::ReasoningExecute => self.reasoning_execute(state).await?,
                Stage::SpecializedExecute { query, forced } => {
                    self.specialized_execute(state, query, forced.as_deref())
                        .await?
                }
                Stage::Finalize => return Ok(()),
            };
            state.apply(update)?;
            debug!(request_id = %state.request_id, from = ?stage, to = ?next, "stage transition");
            stage = next;
        }
    }

    async fn classify(&self, state: &RequestState) -> (StateUpdate, Stage) {
        let start = Instant::now();
        let (classification, failure) = match self.classify_offloaded(state.query.clone()).await {
            Ok(c) => (c, None),
            Err(e) => {
                warn!(error = %e, "classifier unavailable, defaulting to reasoning");
                (Classification::fallback(), Some(e.kind()))
            }
        };

        let route = classification.route;
        info!(
            request_id = %state.request_id,
            route = %route,
            confidence = classification.confidence,
            method = classification.method.as_str(),
            "classified"
        );

        let mut metadata = json!({
            "route": route,
            "confidence": classification.confidence,
            "method": classification.method,
        });
        let entry = match failure {
            Some(kind) => {
                metadata["error"] = json!(kind);
                ExecutionLogEntry::error("classify", start.elapsed())
            }
            None => ExecutionLogEntry::success("classify", start.elapsed()),
        };

        let mut update = StateUpdate::new().log(entry.with_metadata(metadata));
        update.route = Some(route);
        update.classification = Some((classification.confidence, classification.method));

        let next = match route {
            Route::Direct => Stage::DirectExecute {
                query: state.query.clone(),
            },
            Route::Reasoning => Stage::ReasoningExecute,
            Route::Specialized => Stage::SpecializedExecute {
                query: state.query.clone(),
                forced: None,
            },
        };
        (update, next)
    }

    /// Run the classifier on the bounded blocking pool
    async fn classify_offloaded(&self, query: String) -> Result<Classification> {
        let _permit = self
            .classifier_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::ClassificationFailure(e.to_string()))?;
        let classifier = self.classifier.clone();

        tokio::task::spawn_blocking(move || classifier.classify(&query))
            .await
            .map_err(|e| Error::ClassificationFailure(e.to_string()))
    }

    async fn direct_execute(&self, state: &RequestState, query: &str) -> Result<(StateUpdate, Stage)> {
        state.require_route()?;

        let start = Instant::now();
        let prompt = direct_prompt(query, &state.history);
        let result = self
            .generation
            .generate(
                &prompt,
                self.config.direct_max_tokens,
                self.config.direct_temperature,
            )
            .await
            .and_then(|text| {
                let text = text.trim().to_string();
                if text.is_empty() {
                    Err(Error::DownstreamGeneration("empty completion".to_string()))
                } else {
                    Ok(text)
                }
            });

        let refined = query != state.query;
        let update = match result {
            Ok(text) => StateUpdate::new().response(text).log(
                ExecutionLogEntry::success("direct_execute", start.elapsed())
                    .with_metadata(json!({ "refined_query": refined })),
            ),
            Err(e) => {
                warn!(request_id = %state.request_id, error = %e, "direct generation failed");
                StateUpdate::new()
                    .response(APOLOGY)
                    .error(ErrorKind::DownstreamGenerationFailure)
                    .degraded()
                    .log(
                        ExecutionLogEntry::error("direct_execute", start.elapsed()).with_metadata(
                            json!({
                                "refined_query": refined,
                                "error": ErrorKind::DownstreamGenerationFailure,
                            }),
                        ),
                    )
            }
        };
        Ok((update, Stage::Finalize))
    }

    async fn reasoning_execute(&self, state: &RequestState) -> Result<(StateUpdate, Stage)> {
        state.require_route()?;

        let prompt = clarification_prompt(&state.query, &state.history);
        let attempts = self.config.clarify_attempts.max(1);
        let mut update = StateUpdate::new();
        let mut clarification = None;

        for attempt in 1..=attempts {
            let start = Instant::now();
            let outcome = request_clarification(
                self.generation.as_ref(),
                &prompt,
                self.config.clarify_max_tokens,
            )
            .await;

            match outcome {
                ClarifyOutcome::Parsed(c) => {
                    update = update.log(
                        ExecutionLogEntry::success("clarify", start.elapsed()).with_metadata(json!({
                            "attempt": attempt,
                            "complexity": c.complexity,
                            "recommended_route": c.recommended_route,
                            "responder_hint": c.responder_hint,
                            "missing_context": c.missing_context.len(),
                        })),
                    );
                    clarification = Some(c);
                    break;
                }
                ClarifyOutcome::Unavailable(ref reason) | ClarifyOutcome::Unparseable(ref reason) => {
                    warn!(attempt, outcome = outcome.label(), %reason, "clarification attempt failed");
                    let backoff = if attempt < attempts {
                        self.config.backoff_after(attempt)
                    } else {
                        Duration::ZERO
                    };
                    tokio::time::sleep(backoff).await;

                    update = update.log(
                        ExecutionLogEntry::error("clarify", start.elapsed()).with_metadata(json!({
                            "attempt": attempt,
                            "outcome": outcome.label(),
                            "backoff_ms": backoff.as_millis() as u64,
                            "error": ErrorKind::ClassificationFailure,
                        })),
                    );
                }
            }
        }

        let Some(c) = clarification else {
            warn!(request_id = %state.request_id, attempts, "clarification exhausted, answering directly");
            update = update.log(
                ExecutionLogEntry::error("clarify_fallback", Duration::ZERO).with_metadata(json!({
                    "attempts": attempts,
                    "error": ErrorKind::ClassificationFailure,
                    "reroute": Route::Direct,
                })),
            );
            update.reroute = Some(Route::Direct);
            let next = Stage::DirectExecute {
                query: state.query.clone(),
            };
            return Ok((update, next));
        };

        update.clarified_intent = Some(c.clarified_intent.clone());
        update.missing_context = Some(c.missing_context.clone());
        update.refined_query = Some(c.refined_query.clone());

        if c.wants_direct() {
            if !c.missing_context.is_empty() {
                info!(request_id = %state.request_id, missing = c.missing_context.len(), "asking for missing context");
                let question = clarifying_question(&c.clarified_intent, &c.missing_context);
                return Ok((update.response(question), Stage::Finalize));
            }
            update.reroute = Some(Route::Direct);
            let next = Stage::DirectExecute {
                query: c.refined_query,
            };
            return Ok((update, next));
        }

        update.reroute = Some(Route::Specialized);
        let next = Stage::SpecializedExecute {
            query: c.refined_query,
            forced: c.responder_hint,
        };
        Ok((update, next))
    }

    async fn specialized_execute(
        &self,
        state: &RequestState,
        query: &str,
        forced: Option<&str>,
    ) -> Result<(StateUpdate, Stage)> {
        state.require_route()?;

        let start = Instant::now();
        let failure = match self.engine.execute(query, &state.history, forced).await {
            Ok(outcome) if outcome.has_output() => {
                let mut update = StateUpdate::new().response(outcome.merged_output);
                update.log = outcome.log;
                update.selected_responders = Some(outcome.responders_used.clone());
                update.responders_used = outcome.responders_used;
                update.outputs = outcome.outputs.into_iter().map(|o| (o.name, o.text)).collect();
                update.workflow = Some(outcome.workflow);
                update.partial = outcome.status == EngineStatus::Partial;
                return Ok((update, Stage::Finalize));
            }
            Ok(outcome) => {
                let mut update = StateUpdate::new();
                update.log = outcome.log;
                update.responders_used = outcome.responders_used;
                update.workflow = Some(outcome.workflow);
                (update, ErrorKind::ResponderExecutionFailure)
            }
            Err(e) => {
                warn!(request_id = %state.request_id, error = %e, "engine failed");
                (StateUpdate::new(), e.kind())
            }
        };

        let (update, kind) = failure;
        warn!(request_id = %state.request_id, error = %kind, "engine produced no output, answering directly");
        let update = update.error(kind).degraded().log(
            ExecutionLogEntry::new("engine_fallback", start.elapsed(), StageOutcome::Error)
                .with_metadata(json!({ "error": kind, "reroute": Route::Direct })),
        );
        let next = Stage::DirectExecute {
            query: state.query.clone(),
        };
        Ok((update, next))
    }

    /// Abort after the budget: canned text, no fallback execution
    fn on_timeout(&self, state: &mut RequestState) {
        warn!(request_id = %state.request_id, budget = ?self.timeout, "request timed out");

        let logged = Duration::from_millis(state.log().total_duration_ms());
        let remainder = self.timeout.saturating_sub(logged);
        state.append_log(
            ExecutionLogEntry::new("workflow_timeout", remainder, StageOutcome::Timeout)
                .with_metadata(json!({
                    "error": ErrorKind::WorkflowTimeout,
                    "budget_ms": self.timeout.as_millis() as u64,
                })),
        );
        state.final_response = TIMEOUT_RESPONSE.to_string();
        state.error = Some(ErrorKind::WorkflowTimeout);
    }

    /// Replace the whole result after an escaped error or panic
    fn catch_all(&self, state: &mut RequestState, started: Instant) {
        let logged = Duration::from_millis(state.log().total_duration_ms());
        let remainder = started.elapsed().saturating_sub(logged);
        state.append_log(
            ExecutionLogEntry::error("catch_all", remainder)
                .with_metadata(json!({ "error": ErrorKind::Internal })),
        );
        state.final_response = INTERNAL_ERROR_RESPONSE.to_string();
        state.error = Some(ErrorKind::Internal);
    }

    async fn finalize(&self, mut state: RequestState) -> RouteResult {
        let start = Instant::now();

        if state.final_response.trim().is_empty() {
            warn!(request_id = %state.request_id, "no response produced, using fallback text");
            state.final_response = EMPTY_RESPONSE_FALLBACK.to_string();
        }

        let status = state.status();
        state.append_log(
            ExecutionLogEntry::success("finalize", start.elapsed()).with_metadata(json!({
                "route": state.route(),
                "reroute": state.reroute,
                "status": status,
            })),
        );
        state.processing_time_ms = state.log().total_duration_ms();

        let user_id = state.user_id.clone();
        let result = state.into_result();

        info!(
            request_id = %result.request_id,
            status = %result.status,
            processing_time_ms = result.processing_time_ms,
            "request finished"
        );

        // Sinks do blocking file I/O
        if let Some(sink) = &self.audit {
            let sink = Arc::clone(sink);
            let entry = AuditEntry::from_result(&result, user_id);
            match tokio::task::spawn_blocking(move || sink.record(&entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(request_id = %result.request_id, error = %e, "failed to write audit entry");
                }
                Err(e) => {
                    warn!(request_id = %result.request_id, error = %e, "audit task did not complete");
                }
            }
        }
        result
    }
}

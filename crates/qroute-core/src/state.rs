//! Per-request state threaded through the routing pipeline
//!
//! A [`RequestState`] is created for one inbound query, owned by that request
//! only, and consumed into a [`RouteResult`] when the pipeline finishes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::llm::Message;

/// Coarse execution path for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Direct,
    Reasoning,
    Specialized,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Direct => "direct",
            Route::Reasoning => "reasoning",
            Route::Specialized => "specialized",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Responder topology inside specialized execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Single,
    Sequential,
    Parallel,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Single => "single",
            Workflow::Sequential => "sequential",
            Workflow::Parallel => "parallel",
        }
    }

    /// Parse a workflow label, case-insensitively
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "single" => Some(Workflow::Single),
            "sequential" => Some(Workflow::Sequential),
            "parallel" => Some(Workflow::Parallel),
            _ => None,
        }
    }
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the route of a request was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Keyword,
    Embedding,
    /// Classifier worker was unavailable and the route was defaulted
    Fallback,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::Keyword => "keyword",
            ClassificationMethod::Embedding => "embedding",
            ClassificationMethod::Fallback => "fallback",
        }
    }
}

/// Outcome of one logged stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Error,
    Timeout,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Success => "success",
            StageOutcome::Error => "error",
            StageOutcome::Timeout => "timeout",
        }
    }
}

/// One record of the execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub stage: String,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(stage: impl Into<String>, duration: Duration, outcome: StageOutcome) -> Self {
        Self {
            stage: stage.into(),
            duration_ms: duration.as_millis() as u64,
            outcome,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn success(stage: impl Into<String>, duration: Duration) -> Self {
        Self::new(stage, duration, StageOutcome::Success)
    }

    pub fn error(stage: impl Into<String>, duration: Duration) -> Self {
        Self::new(stage, duration, StageOutcome::Error)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Ordered, append-only list of stage records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    entries: Vec<ExecutionLogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ExecutionLogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ExecutionLogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all recorded stage durations
    pub fn total_duration_ms(&self) -> u64 {
        self.entries.iter().map(|e| e.duration_ms).sum()
    }

    /// Entries whose stage name matches exactly
    pub fn stage(&self, name: &str) -> impl Iterator<Item = &ExecutionLogEntry> {
        let name = name.to_string();
        self.entries.iter().filter(move |e| e.stage == name)
    }
}

impl Extend<ExecutionLogEntry> for ExecutionLog {
    fn extend<I: IntoIterator<Item = ExecutionLogEntry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

/// Caller-visible status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Success,
    /// Some responders failed but others produced output
    Partial,
    /// A fallback path produced the response
    Degraded,
    Timeout,
    Error,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Success => "success",
            RouteStatus::Partial => "partial",
            RouteStatus::Degraded => "degraded",
            RouteStatus::Timeout => "timeout",
            RouteStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable record for one in-flight request
#[derive(Debug)]
pub struct RequestState {
    pub request_id: String,
    pub user_id: String,
    pub query: String,
    /// Read-only copy of the caller's trailing history window
    pub history: Vec<Message>,
    route: Option<Route>,
    pub reroute: Option<Route>,
    pub confidence: f32,
    pub method: Option<ClassificationMethod>,
    pub clarified_intent: Option<String>,
    pub missing_context: Vec<String>,
    pub refined_query: Option<String>,
    pub selected_responders: Vec<String>,
    outputs: HashMap<String, String>,
    pub responders_used: Vec<String>,
    pub workflow: Option<Workflow>,
    pub final_response: String,
    pub error: Option<ErrorKind>,
    pub degraded: bool,
    pub partial: bool,
    log: ExecutionLog,
    pub processing_time_ms: u64,
}

impl RequestState {
    pub fn new(query: impl Into<String>, history: &[Message], user_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            query: query.into(),
            history: history.to_vec(),
            route: None,
            reroute: None,
            confidence: 0.0,
            method: None,
            clarified_intent: None,
            missing_context: Vec::new(),
            refined_query: None,
            selected_responders: Vec::new(),
            outputs: HashMap::new(),
            responders_used: Vec::new(),
            workflow: None,
            final_response: String::new(),
            error: None,
            degraded: false,
            partial: false,
            log: ExecutionLog::new(),
            processing_time_ms: 0,
        }
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    /// Set the route. A request's route can only be set once.
    pub fn set_route(&mut self, route: Route) -> Result<()> {
        match self.route {
            Some(existing) => Err(Error::Other(format!(
                "route already set to {} (attempted {})",
                existing, route
            ))),
            None => {
                self.route = Some(route);
                Ok(())
            }
        }
    }

    /// Route required by an execution stage
    pub fn require_route(&self) -> Result<Route> {
        self.route
            .ok_or_else(|| Error::Other("execution stage reached before classification".to_string()))
    }

    /// Record a responder's output. Returns `false` if that responder
    /// already has one, leaving the existing output untouched.
    pub fn record_output(&mut self, responder: impl Into<String>, text: impl Into<String>) -> bool {
        let responder = responder.into();
        if self.outputs.contains_key(&responder) {
            return false;
        }
        self.outputs.insert(responder, text.into());
        true
    }

    pub fn output(&self, responder: &str) -> Option<&str> {
        self.outputs.get(responder).map(String::as_str)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn append_log(&mut self, entry: ExecutionLogEntry) {
        self.log.append(entry);
    }

    /// Merge a stage's partial update into the record
    pub fn apply(&mut self, update: StateUpdate) -> Result<()> {
        self.log.extend(update.log);

        if let Some(route) = update.route {
            self.set_route(route)?;
        }
        if let Some(route) = update.reroute {
            self.reroute = Some(route);
        }
        if let Some((confidence, method)) = update.classification {
            self.confidence = confidence;
            self.method = Some(method);
        }
        if let Some(intent) = update.clarified_intent {
            self.clarified_intent = Some(intent);
        }
        if let Some(missing) = update.missing_context {
            self.missing_context = missing;
        }
        if let Some(refined) = update.refined_query {
            self.refined_query = Some(refined);
        }
        if let Some(selected) = update.selected_responders {
            self.selected_responders = selected;
        }
        for (name, text) in update.outputs {
            self.record_output(name, text);
        }
        for name in update.responders_used {
            if !self.responders_used.contains(&name) {
                self.responders_used.push(name);
            }
        }
        if let Some(workflow) = update.workflow {
            self.workflow = Some(workflow);
        }
        if let Some(response) = update.final_response {
            self.final_response = response;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.degraded |= update.degraded;
        self.partial |= update.partial;

        Ok(())
    }

    /// Drop the large transient fields before the record is returned
    pub fn release_transient(&mut self) {
        self.history = Vec::new();
        self.outputs = HashMap::new();
    }

    /// Status derived from the record's flags
    pub fn status(&self) -> RouteStatus {
        match self.error {
            Some(ErrorKind::WorkflowTimeout) => RouteStatus::Timeout,
            Some(ErrorKind::Internal) => RouteStatus::Error,
            _ if self.degraded => RouteStatus::Degraded,
            _ if self.partial => RouteStatus::Partial,
            _ => RouteStatus::Success,
        }
    }

    /// Consume the record into the caller-facing result
    pub fn into_result(mut self) -> RouteResult {
        self.release_transient();
        let status = self.status();
        RouteResult {
            request_id: self.request_id,
            response: self.final_response,
            route_taken: self.route,
            status,
            degraded: self.degraded,
            processing_time_ms: self.processing_time_ms,
            responders_used: self.responders_used,
            workflow: self.workflow,
            execution_log: self.log,
            error: self.error,
        }
    }
}

/// Partial update returned by one stage.
///
/// Stages read the fields of [`RequestState`] they need and describe their
/// writes here; the router merges them with [`RequestState::apply`].
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub route: Option<Route>,
    pub reroute: Option<Route>,
    pub classification: Option<(f32, ClassificationMethod)>,
    pub clarified_intent: Option<String>,
    pub missing_context: Option<Vec<String>>,
    pub refined_query: Option<String>,
    pub selected_responders: Option<Vec<String>>,
    pub outputs: Vec<(String, String)>,
    pub responders_used: Vec<String>,
    pub workflow: Option<Workflow>,
    pub final_response: Option<String>,
    pub error: Option<ErrorKind>,
    pub degraded: bool,
    pub partial: bool,
    pub log: Vec<ExecutionLogEntry>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(mut self, entry: ExecutionLogEntry) -> Self {
        self.log.push(entry);
        self
    }

    pub fn response(mut self, text: impl Into<String>) -> Self {
        self.final_response = Some(text.into());
        self
    }

    pub fn error(mut self, kind: ErrorKind) -> Self {
        self.error = Some(kind);
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

/// Caller-facing result of one routed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    pub request_id: String,
    pub response: String,
    pub route_taken: Option<Route>,
    pub status: RouteStatus,
    pub degraded: bool,
    pub processing_time_ms: u64,
    pub responders_used: Vec<String>,
    pub workflow: Option<Workflow>,
    pub execution_log: ExecutionLog,
    pub error: Option<ErrorKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_set_once() {
        let mut state = RequestState::new("q", &[], "u1");
        assert!(state.require_route().is_err());
        state.set_route(Route::Reasoning).unwrap();
        assert!(state.set_route(Route::Direct).is_err());
        assert_eq!(state.route(), Some(Route::Reasoning));
    }

    #[test]
    fn test_output_written_once_per_responder() {
        let mut state = RequestState::new("q", &[], "u1");
        assert!(state.record_output("research", "first"));
        assert!(!state.record_output("research", "second"));
        assert_eq!(state.output("research"), Some("first"));
        assert_eq!(state.output_count(), 1);
    }

    #[test]
    fn test_apply_appends_log_in_order() {
        let mut state = RequestState::new("q", &[], "u1");
        state
            .apply(
                StateUpdate::new()
                    .log(ExecutionLogEntry::success("classify", Duration::from_millis(2)))
                    .log(ExecutionLogEntry::success("direct", Duration::from_millis(5))),
            )
            .unwrap();
        state.append_log(ExecutionLogEntry::success("finalize", Duration::ZERO));

        let stages: Vec<&str> = state.log().iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec!["classify", "direct", "finalize"]);
        assert_eq!(state.log().total_duration_ms(), 7);
    }

    #[test]
    fn test_status_precedence() {
        let mut state = RequestState::new("q", &[], "u1");
        assert_eq!(state.status(), RouteStatus::Success);
        state.partial = true;
        assert_eq!(state.status(), RouteStatus::Partial);
        state.degraded = true;
        assert_eq!(state.status(), RouteStatus::Degraded);
        state.error = Some(ErrorKind::WorkflowTimeout);
        assert_eq!(state.status(), RouteStatus::Timeout);
    }

    #[test]
    fn test_into_result_releases_history() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let mut state = RequestState::new("q", &history, "u1");
        assert_eq!(state.history.len(), 2);
        state.final_response = "done".to_string();
        let result = state.into_result();
        assert_eq!(result.response, "done");
        assert!(result.route_taken.is_none());
    }

    #[test]
    fn test_workflow_parse() {
        assert_eq!(Workflow::parse(" Parallel "), Some(Workflow::Parallel));
        assert_eq!(Workflow::parse("fanout"), None);
    }
}

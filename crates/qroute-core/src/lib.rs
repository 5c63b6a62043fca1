//! qroute-core: query routing core library
//!
//! 意図分類、ルーティングステートマシン、マルチレスポンダー実行エンジン、
//! 監査ログのコア機能を提供します。

pub mod audit;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod responders;
pub mod router;
pub mod state;

pub use audit::{AuditConfig, AuditEntry, AuditLogger, AuditSink, MemoryAuditSink};
pub use classifier::{Classification, IntentClassifier};
pub use config::{Config, EngineConfig, LlmConfig, LlmProvider, RouterConfig};
pub use engine::{EngineOutcome, EngineStatus, MultiResponderEngine};
pub use error::{Error, ErrorKind, Result};
pub use llm::{GenerationService, LlmClient, Message};
pub use responders::{GenerativeResponder, Responder, ResponderContext, ResponderRegistry};
pub use router::QueryRouter;
pub use state::{
    ClassificationMethod, ExecutionLog, ExecutionLogEntry, RequestState, Route, RouteResult,
    RouteStatus, StageOutcome, Workflow,
};

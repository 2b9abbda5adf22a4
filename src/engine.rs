//! Scripting-engine seam.
//!
//! Script compilation, sandboxing, and evaluation-timeout enforcement live
//! in the engine implementation; the processor submits an [`EvalJob`] and
//! awaits its completion. The adaptor [`result_iter`] turns whatever the
//! engine returns into the uniform iterator the result streamer consumes.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A script submission: source, language, bindings, and an optional
/// engine-side timeout override.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalJob {
    /// Script source text.
    pub script: String,
    /// Scripting-engine language identifier.
    pub language: String,
    /// Variables pre-bound into the script's scope.
    pub bindings: HashMap<String, Value>,
    /// Per-request evaluation timeout, overriding the engine default.
    pub timeout: Option<Duration>,
}

/// Failure modes of an evaluation future.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine cancelled the evaluation after its timeout elapsed.
    #[error("evaluation exceeded the configured threshold of {} ms", .0.as_millis())]
    Timeout(Duration),
    /// The script itself failed; the message is the script error verbatim.
    #[error("{0}")]
    Evaluation(String),
    /// The engine failed outside the script (pool exhaustion, compilation
    /// host errors, and the like).
    #[error("script engine failure: {0}")]
    Engine(String),
}

/// A pluggable scripting engine.
///
/// `eval` returns the evaluation future of the submitted job; the worker
/// pool and timeout enforcement are the engine's concern.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// The language used when a request does not name one.
    fn default_language(&self) -> &str;

    /// Submit a job and await its completion.
    ///
    /// # Errors
    /// Returns an [`EngineError`] describing the failure kind when the
    /// evaluation does not complete normally.
    async fn eval(&self, job: EvalJob) -> Result<Value, EngineError>;
}

/// Adapt an evaluation result into the streamer's result iterator.
///
/// Arrays traverse in their natural order, `null` becomes the empty
/// iterator, and every other value yields itself once.
#[must_use]
pub fn result_iter(value: Value) -> Box<dyn Iterator<Item = Value> + Send> {
    match value {
        Value::Null => Box::new(std::iter::empty()),
        Value::Array(items) => Box::new(items.into_iter()),
        other => Box::new(std::iter::once(other)),
    }
}

//! The default `eval` operation.
//!
//! Submits the request's script to the engine, times the evaluation span,
//! funnels the completed result into the result streamer, and translates
//! every failure mode into its terminal response, rolling the transaction
//! scope back where the processor manages transactions. Exactly one
//! terminal status reaches the channel per request; the context's
//! terminal guard backstops that here.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::{
    context::OpContext,
    engine::{self, EngineError, EvalJob, ScriptEngine},
    graph,
    message::{
        ARG_BATCH_SIZE, ARG_BINDINGS, ARG_EVAL_TIMEOUT, ARG_GREMLIN, ARG_LANGUAGE, RequestMessage,
        ResponseMessage, ResponseStatusCode, is_identifier, is_reserved_binding_key,
    },
    metrics,
    op::{
        FrameDecorator, HandlerError, NoDecoration, OpHandler, OpSelectionError,
        stream::{self, StreamError},
    },
};

/// Supplies the bindings for an evaluation; may reject the request.
pub type BindingsSupplier =
    dyn Fn(&OpContext) -> Result<HashMap<String, Value>, OpSelectionError> + Send + Sync;

/// Validate an `eval` request's arguments.
///
/// # Errors
/// Returns [`OpSelectionError::InvalidArguments`] when the script is
/// missing, a binding key is reserved or not an identifier, the bindings
/// argument is not a string-keyed map, or a numeric argument has the
/// wrong type.
pub fn validate_eval_message(message: &RequestMessage) -> Result<(), OpSelectionError> {
    if message.arg_str(ARG_GREMLIN).is_none() {
        return Err(OpSelectionError::InvalidArguments(format!(
            "message must contain a [{ARG_GREMLIN}] argument with the script to evaluate"
        )));
    }
    if let Some(bindings_arg) = message.arg(ARG_BINDINGS) {
        let Some(bindings) = bindings_arg.as_object() else {
            return Err(OpSelectionError::InvalidArguments(format!(
                "the [{ARG_BINDINGS}] argument must be a map with string keys"
            )));
        };
        for key in bindings.keys() {
            if is_reserved_binding_key(key) {
                return Err(OpSelectionError::InvalidArguments(format!(
                    "binding key [{key}] conflicts with a statically imported token of \
                     [id, key, label, value] and must be renamed"
                )));
            }
            if !is_identifier(key) {
                return Err(OpSelectionError::InvalidArguments(format!(
                    "binding key [{key}] is not a valid identifier"
                )));
            }
        }
    }
    if let Some(timeout_arg) = message.arg(ARG_EVAL_TIMEOUT) {
        if timeout_arg.as_u64().is_none() {
            return Err(OpSelectionError::InvalidArguments(format!(
                "the [{ARG_EVAL_TIMEOUT}] argument must be a non-negative integer of milliseconds"
            )));
        }
    }
    if let Some(batch_arg) = message.arg(ARG_BATCH_SIZE) {
        if batch_arg.as_u64().is_none() {
            return Err(OpSelectionError::InvalidArguments(format!(
                "the [{ARG_BATCH_SIZE}] argument must be a non-negative integer"
            )));
        }
    }
    Ok(())
}

/// The default bindings supplier: the request's validated bindings map.
fn request_bindings(ctx: &OpContext) -> Result<HashMap<String, Value>, OpSelectionError> {
    Ok(ctx
        .request()
        .bindings()
        .map(|bindings| {
            bindings
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default())
}

/// Handler for the `eval` op code.
pub struct EvalHandler {
    engine: Arc<dyn ScriptEngine>,
    manage_transactions: bool,
    decorator: Arc<dyn FrameDecorator>,
    bindings_supplier: Arc<BindingsSupplier>,
    metric_scope: String,
    eval_timer: String,
    error_counter: String,
}

impl EvalHandler {
    /// Build the handler with the default metric scope.
    ///
    /// Seeding the handler into an [`crate::op::OpProcessor`] re-scopes
    /// its metrics under the processor's name.
    #[must_use]
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            manage_transactions: false,
            decorator: Arc::new(NoDecoration),
            bindings_supplier: Arc::new(request_bindings),
            metric_scope: metrics::DEFAULT_METRIC_SCOPE.to_owned(),
            eval_timer: metrics::eval_timer_name(metrics::DEFAULT_METRIC_SCOPE),
            error_counter: metrics::eval_error_counter_name(metrics::DEFAULT_METRIC_SCOPE),
        }
    }

    /// Re-scope the handler's metrics, typically to the name of the
    /// processor that owns it.
    #[must_use]
    pub fn with_metric_scope(mut self, scope: &str) -> Self {
        self.metric_scope = scope.to_owned();
        self.eval_timer = metrics::eval_timer_name(scope);
        self.error_counter = metrics::eval_error_counter_name(scope);
        self
    }

    /// The scope the handler's metrics are recorded under.
    #[must_use]
    pub fn metric_scope(&self) -> &str { &self.metric_scope }

    /// Make the processor responsible for commit and rollback.
    #[must_use]
    pub fn manage_transactions(mut self, manage: bool) -> Self {
        self.manage_transactions = manage;
        self
    }

    /// Replace the frame decoration hooks.
    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn FrameDecorator>) -> Self {
        self.decorator = decorator;
        self
    }

    /// Replace the bindings supplier.
    #[must_use]
    pub fn with_bindings_supplier(mut self, supplier: Arc<BindingsSupplier>) -> Self {
        self.bindings_supplier = supplier;
        self
    }

    async fn rollback_if_managed(&self, ctx: &OpContext) {
        if !self.manage_transactions {
            return;
        }
        let strict = ctx.settings().strict_transaction_management;
        if let Err(err) = graph::attempt_rollback(ctx.request(), ctx.graphs(), strict).await {
            error!(
                request_id = %ctx.request().request_id,
                %err,
                "transaction rollback failed"
            );
        }
    }

    async fn complete_stream_failure(
        &self,
        ctx: &OpContext,
        err: StreamError,
    ) -> Result<(), HandlerError> {
        let request_id = ctx.request().request_id;
        metrics::increment_eval_errors(&self.error_counter);
        match err {
            StreamError::Timeout { .. } => {
                warn!(%request_id, %err, "response streaming timed out");
                self.rollback_if_managed(ctx).await;
                let response = ResponseMessage::error(
                    request_id,
                    ResponseStatusCode::ServerErrorTimeout,
                    err.to_string(),
                );
                ctx.write_response(response).await?;
            }
            StreamError::Serialization(source) => {
                // The frame builder already wrote the terminal response.
                warn!(%request_id, %source, "response streaming aborted by serialization failure");
                self.rollback_if_managed(ctx).await;
            }
            StreamError::Interrupted => {
                warn!(%request_id, "evaluation interrupted by cancellation");
                self.rollback_if_managed(ctx).await;
                let response = ResponseMessage::error(
                    request_id,
                    ResponseStatusCode::ServerError,
                    format!("request [{request_id}] was interrupted before completing"),
                );
                ctx.write_response(response).await?;
            }
            StreamError::Transaction(source) => {
                // A commit was already attempted; never follow it with a
                // rollback.
                error!(%request_id, %source, "transaction commit failed during streaming");
                let response = ResponseMessage::error(
                    request_id,
                    ResponseStatusCode::ServerError,
                    source.to_string(),
                );
                ctx.write_response(response).await?;
            }
            StreamError::Channel { source, committed } => {
                error!(%request_id, %source, committed, "channel failed during streaming");
                // After a completed commit the transaction outcome stands;
                // roll back only when no commit was attempted.
                if !committed {
                    self.rollback_if_managed(ctx).await;
                }
                return Err(HandlerError::Other(format!(
                    "channel failed while streaming response for request [{request_id}]: {source}"
                )));
            }
        }
        Ok(())
    }

    async fn complete_eval_failure(
        &self,
        ctx: &OpContext,
        err: EngineError,
    ) -> Result<(), HandlerError> {
        let request_id = ctx.request().request_id;
        metrics::increment_eval_errors(&self.error_counter);
        self.rollback_if_managed(ctx).await;
        let (code, message) = match &err {
            EngineError::Timeout(threshold) => (
                ResponseStatusCode::ServerErrorTimeout,
                format!(
                    "Response evaluation exceeded the configured threshold of {} ms for \
                     request [{request_id}]",
                    threshold.as_millis()
                ),
            ),
            EngineError::Evaluation(_) | EngineError::Engine(_) => (
                ResponseStatusCode::ServerErrorScriptEvaluation,
                err.to_string(),
            ),
        };
        warn!(%request_id, %err, "script evaluation failed");
        ctx.write_response(ResponseMessage::error(request_id, code, message))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OpHandler for EvalHandler {
    fn validate(&self, message: &RequestMessage) -> Result<(), OpSelectionError> {
        validate_eval_message(message)
    }

    async fn execute(&self, ctx: &OpContext) -> Result<(), HandlerError> {
        let request = ctx.request();
        let request_id = request.request_id;

        let bindings = match (self.bindings_supplier)(ctx) {
            Ok(bindings) => bindings,
            Err(err) => {
                ctx.write_response(err.into_response(request_id)).await?;
                return Ok(());
            }
        };

        let Some(script) = request.arg_str(ARG_GREMLIN) else {
            // select() rejects these; guard direct executions too.
            let err = OpSelectionError::InvalidArguments(format!(
                "message must contain a [{ARG_GREMLIN}] argument with the script to evaluate"
            ));
            ctx.write_response(err.into_response(request_id)).await?;
            return Ok(());
        };
        let language = request
            .arg_str(ARG_LANGUAGE)
            .unwrap_or_else(|| self.engine.default_language())
            .to_owned();
        let timeout = request.arg_u64(ARG_EVAL_TIMEOUT).map(Duration::from_millis);

        let job = EvalJob {
            script: script.to_owned(),
            language,
            bindings,
            timeout,
        };

        let eval_started = Instant::now();
        let outcome = self.engine.eval(job).await;
        metrics::record_eval_span(&self.eval_timer, eval_started.elapsed());

        match outcome {
            Ok(value) => {
                let iterator = engine::result_iter(value);
                match stream::stream_results(
                    ctx,
                    iterator,
                    self.manage_transactions,
                    self.decorator.as_ref(),
                )
                .await
                {
                    Ok(()) => Ok(()),
                    Err(err) => self.complete_stream_failure(ctx, err).await,
                }
            }
            Err(err) => self.complete_eval_failure(ctx, err).await,
        }
    }
}

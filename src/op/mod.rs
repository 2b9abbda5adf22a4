//! Op-code dispatch for decoded requests.
//!
//! An [`OpProcessor`] owns a registry mapping op-code tokens to handlers,
//! seeded with the default `eval` handler. Selection validates the request
//! against the chosen handler's rules and hands the bound handler back to
//! the channel pipeline; the dispatcher itself never writes to the
//! channel. [`OpProcessor::handle`] is the pipeline entry point that
//! converts selection failures into error responses and runs the handler.

pub mod eval;
pub mod stream;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    context::{OpContext, WriteError},
    message::{OP_EVAL, OP_INVALID, RequestMessage, ResponseMessage, ResponseStatusCode},
};

/// Rejections raised while selecting a handler for a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpSelectionError {
    /// The message itself is unusable: the `invalid` sentinel or an
    /// unrecognized op code.
    #[error("{0}")]
    MalformedRequest(String),
    /// The message is structurally sound but its arguments are not.
    #[error("{0}")]
    InvalidArguments(String),
}

impl OpSelectionError {
    /// The response status code this rejection surfaces as.
    #[must_use]
    pub const fn status_code(&self) -> ResponseStatusCode {
        match self {
            Self::MalformedRequest(_) => ResponseStatusCode::MalformedRequest,
            Self::InvalidArguments(_) => ResponseStatusCode::InvalidRequestArguments,
        }
    }

    /// Convert the rejection into the terminal response for `request_id`.
    #[must_use]
    pub fn into_response(self, request_id: Uuid) -> ResponseMessage {
        let code = self.status_code();
        ResponseMessage::error(request_id, code, self.to_string())
    }
}

/// Failures escaping a handler after response writing was attempted.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A response could not be written to the channel.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// A custom handler failed outside the response path.
    #[error("{0}")]
    Other(String),
}

/// A bound operation for one op code.
#[async_trait]
pub trait OpHandler: Send + Sync {
    /// Validate the request before it is bound to this handler.
    ///
    /// # Errors
    /// Returns a rejection that the pipeline converts into a terminal
    /// error response.
    fn validate(&self, message: &RequestMessage) -> Result<(), OpSelectionError> {
        let _ = message;
        Ok(())
    }

    /// Run the operation to completion, writing all of its responses.
    ///
    /// # Errors
    /// Returns an error only when the handler could not deliver its
    /// responses; ordinary operation failures are reported on the channel.
    async fn execute(&self, ctx: &OpContext) -> Result<(), HandlerError>;
}

/// Hooks letting concrete processors attach status attributes and result
/// metadata to data frames without touching the frame path.
pub trait FrameDecorator: Send + Sync {
    /// Attributes for the status block of a frame with `code`.
    fn status_attributes(
        &self,
        ctx: &OpContext,
        code: ResponseStatusCode,
    ) -> HashMap<String, Value> {
        let _ = (ctx, code);
        HashMap::new()
    }

    /// Metadata for the result block of a frame with `code`.
    fn result_meta(&self, ctx: &OpContext, code: ResponseStatusCode) -> HashMap<String, Value> {
        let _ = (ctx, code);
        HashMap::new()
    }
}

/// The default decoration: empty attributes and metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecoration;

impl FrameDecorator for NoDecoration {}

/// Handler registry for one processor.
pub struct OpProcessor {
    name: String,
    handlers: HashMap<String, Arc<dyn OpHandler>>,
}

impl OpProcessor {
    /// Build a processor seeded with the given `eval` handler.
    ///
    /// The handler's metrics are re-scoped under the processor's name, so
    /// a processor named `server` records its evaluation spans under
    /// `server.op.eval`.
    #[must_use]
    pub fn new(name: impl Into<String>, eval_handler: eval::EvalHandler) -> Self {
        let name = name.into();
        let mut handlers: HashMap<String, Arc<dyn OpHandler>> = HashMap::new();
        handlers.insert(
            OP_EVAL.to_owned(),
            Arc::new(eval_handler.with_metric_scope(&name)),
        );
        Self { name, handlers }
    }

    /// The processor's name, used to scope metrics and logs.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Register a handler for an additional op code.
    ///
    /// Registering an op code twice replaces the earlier handler.
    pub fn register(&mut self, op: impl Into<String>, handler: Arc<dyn OpHandler>) {
        self.handlers.insert(op.into(), handler);
    }

    /// Select and validate the handler for a request.
    ///
    /// # Errors
    /// Returns a rejection for the `invalid` sentinel, an unrecognized op
    /// code, or a request that fails the handler's validation.
    pub fn select(&self, message: &RequestMessage) -> Result<Arc<dyn OpHandler>, OpSelectionError> {
        if message.op == OP_INVALID {
            return Err(OpSelectionError::MalformedRequest(format!(
                "message could not be parsed; check the format of the request: {message:?}"
            )));
        }
        match self.handlers.get(message.op.as_str()) {
            Some(handler) => {
                handler.validate(message)?;
                Ok(Arc::clone(handler))
            }
            None => Err(OpSelectionError::MalformedRequest(format!(
                "message with op code [{}] is not recognized",
                message.op
            ))),
        }
    }

    /// Pipeline entry point: select the handler, run it, and convert
    /// selection failures into terminal error responses.
    pub async fn handle(&self, ctx: &OpContext) {
        let request_id = ctx.request().request_id;
        match self.select(ctx.request()) {
            Ok(handler) => {
                if let Err(err) = handler.execute(ctx).await {
                    error!(processor = %self.name, %request_id, %err, "op handler failed");
                }
            }
            Err(err) => {
                warn!(processor = %self.name, %request_id, %err, "request rejected");
                let response = err.into_response(request_id);
                if let Err(write_err) = ctx.write_response(response).await {
                    error!(%request_id, %write_err, "failed to write rejection response");
                }
            }
        }
    }
}

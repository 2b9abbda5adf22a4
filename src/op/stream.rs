//! The result streamer.
//!
//! Consumes the result iterator for one request and writes a sequence of
//! framed responses to the channel: batches bounded by the effective batch
//! size, a pause while the channel reports backpressure, a wall-clock
//! budget on the whole response, and commit woven in ahead of the terminal
//! flush so a client that sees `SUCCESS` can rely on the transaction being
//! durable.

use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::{
    channel::{ChannelError, Frame},
    codec::{self, SerializeError},
    context::OpContext,
    graph::{self, GraphError},
    message::ResponseStatusCode,
    op::FrameDecorator,
};

/// Pause between writability probes while the channel is saturated.
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(10);

fn backpressure_note(observed: &bool) -> &'static str {
    if *observed {
        "channel backpressure was encountered"
    } else {
        "channel backpressure was not encountered"
    }
}

/// Failures raised while streaming a result iterator.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The serialization budget for the whole response elapsed.
    #[error(
        "Serialization of the entire response exceeded the {} ms budget ({})",
        .budget.as_millis(),
        backpressure_note(.backpressure)
    )]
    Timeout {
        /// The budget that was exceeded.
        budget: Duration,
        /// Whether backpressure was observed before the breach.
        backpressure: bool,
    },
    /// A batch could not be serialized; the frame builder has already
    /// written the error response.
    #[error(transparent)]
    Serialization(SerializeError),
    /// The request was cancelled cooperatively.
    #[error("streaming was interrupted by cancellation")]
    Interrupted,
    /// The channel rejected a frame.
    #[error("{source}")]
    Channel {
        /// The channel failure.
        #[source]
        source: ChannelError,
        /// Whether a managed commit had already completed for this
        /// request when the write failed. The caller must not roll back
        /// when it had.
        committed: bool,
    },
    /// A transaction commit failed at a terminal boundary.
    #[error(transparent)]
    Transaction(#[from] GraphError),
}

/// Drain `iterator`, writing framed batches to the request's channel.
///
/// When `manage_transactions` is set, the transaction scope is committed
/// ahead of the terminal frame (including the empty-iterator `NO_CONTENT`
/// frame). Every failure is returned to the caller, which owns rollback
/// and terminal error reporting; the sole exception is serialization
/// failure, where the frame builder has already written the terminal
/// response.
///
/// # Errors
/// Returns a [`StreamError`] describing why the stream aborted.
pub async fn stream_results<I>(
    ctx: &OpContext,
    iterator: I,
    manage_transactions: bool,
    decorator: &dyn FrameDecorator,
) -> Result<(), StreamError>
where
    I: Iterator<Item = Value> + Send,
{
    let batch_size = ctx.batch_size();
    let budget = ctx.settings().serialized_response_timeout();
    let strict = ctx.settings().strict_transaction_management;
    let started = Instant::now();
    let mut iter = iterator.peekable();

    if iter.peek().is_none() {
        if manage_transactions {
            graph::attempt_commit(ctx.request(), ctx.graphs(), strict).await?;
        }
        let frame = build_frame(ctx, decorator, Vec::new(), ResponseStatusCode::NoContent).await?;
        ctx.submit_frame(frame, true)
            .await
            .map_err(|source| StreamError::Channel {
                source,
                committed: manage_transactions,
            })?;
        return Ok(());
    }

    let mut aggregate: Vec<Value> = Vec::with_capacity(batch_size);
    let mut warned_backpressure = false;
    let mut has_more = true;

    // `has_more` is latched instead of re-probing the iterator after the
    // terminal commit; a probe can open a fresh transaction on some graph
    // implementations.
    while has_more {
        if ctx.cancellation().is_cancelled() {
            return Err(StreamError::Interrupted);
        }

        // The gate keeps the buffer bounded while the channel is paused.
        if aggregate.len() < batch_size {
            if let Some(item) = iter.next() {
                aggregate.push(item);
            }
        }

        if ctx.channel().is_writable() {
            let drained = iter.peek().is_none();
            if aggregate.len() == batch_size || drained {
                let code = if drained {
                    ResponseStatusCode::Success
                } else {
                    ResponseStatusCode::PartialContent
                };
                let batch = std::mem::take(&mut aggregate);
                let frame = build_frame(ctx, decorator, batch, code).await?;
                if drained {
                    // Commit precedes the terminal flush.
                    if manage_transactions {
                        graph::attempt_commit(ctx.request(), ctx.graphs(), strict).await?;
                    }
                    has_more = false;
                }
                ctx.submit_frame(frame, drained)
                    .await
                    .map_err(|source| StreamError::Channel {
                        source,
                        committed: drained && manage_transactions,
                    })?;
                if !drained {
                    aggregate = Vec::with_capacity(batch_size);
                }
            }
        } else {
            if !warned_backpressure {
                warn!(
                    request_id = %ctx.request().request_id,
                    elapsed = ?started.elapsed(),
                    "channel is not writable, pausing response stream"
                );
                warned_backpressure = true;
            }
            sleep(BACKPRESSURE_PAUSE).await;
        }

        if has_more && started.elapsed() > budget {
            return Err(StreamError::Timeout {
                budget,
                backpressure: warned_backpressure,
            });
        }
    }

    Ok(())
}

async fn build_frame(
    ctx: &OpContext,
    decorator: &dyn FrameDecorator,
    batch: Vec<Value>,
    code: ResponseStatusCode,
) -> Result<Frame, StreamError> {
    let attributes = decorator.status_attributes(ctx, code);
    let meta = decorator.result_meta(ctx, code);
    codec::make_frame(ctx, batch, code, attributes, meta)
        .await
        .map_err(StreamError::Serialization)
}

//! Per-request execution state.
//!
//! An [`OpContext`] is created when a decoded request enters the pipeline
//! and lives until its response stream terminates. It owns the request,
//! the channel handle, the server settings, the graph manager, and the
//! request-scoped guards: a cancellation token checked cooperatively by
//! the streamer and a terminal-write flag that keeps every request to
//! exactly one terminal response.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    channel::{ChannelError, Frame, ResponseChannel},
    codec::{self, SerializeError},
    graph::GraphManager,
    message::{ARG_BATCH_SIZE, RequestMessage, ResponseMessage},
    settings::Settings,
};

/// Errors raised while writing a structured response.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The response could not be serialized.
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    /// The channel rejected the frame.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Per-request execution state.
pub struct OpContext {
    channel: Arc<dyn ResponseChannel>,
    request: RequestMessage,
    settings: Arc<Settings>,
    graphs: Arc<dyn GraphManager>,
    cancel: CancellationToken,
    terminal_written: AtomicBool,
}

impl OpContext {
    /// Bind a decoded request to its channel and server collaborators.
    #[must_use]
    pub fn new(
        channel: Arc<dyn ResponseChannel>,
        request: RequestMessage,
        settings: Arc<Settings>,
        graphs: Arc<dyn GraphManager>,
    ) -> Self {
        Self {
            channel,
            request,
            settings,
            graphs,
            cancel: CancellationToken::new(),
            terminal_written: AtomicBool::new(false),
        }
    }

    /// The request being processed.
    #[must_use]
    pub fn request(&self) -> &RequestMessage { &self.request }

    /// The server settings in force for this request.
    #[must_use]
    pub fn settings(&self) -> &Settings { &self.settings }

    /// The graph manager shared across requests.
    #[must_use]
    pub fn graphs(&self) -> &dyn GraphManager { self.graphs.as_ref() }

    /// The channel this request's responses are written to.
    #[must_use]
    pub fn channel(&self) -> &dyn ResponseChannel { self.channel.as_ref() }

    /// Token for cooperative cancellation of this request.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken { &self.cancel }

    /// The batch size in force: the request's `batchSize` argument when
    /// supplied, the server default otherwise. Never zero.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        let size = self
            .request
            .arg_u64(ARG_BATCH_SIZE)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(self.settings.result_iteration_batch_size);
        size.max(1)
    }

    /// Whether a terminal response has already been written.
    #[must_use]
    pub fn terminal_written(&self) -> bool { self.terminal_written.load(Ordering::Acquire) }

    /// Claim the terminal write. Returns false if it was already claimed.
    fn claim_terminal(&self) -> bool {
        !self.terminal_written.swap(true, Ordering::AcqRel)
    }

    /// Serialize and submit a structured response.
    ///
    /// Terminal responses pass through the request's terminal guard:
    /// a second terminal write is dropped rather than sent, so a request
    /// never sees more than one terminal status.
    ///
    /// # Errors
    /// Returns an error if serialization fails or the channel rejects the
    /// frame.
    pub async fn write_response(&self, response: ResponseMessage) -> Result<(), WriteError> {
        if response.status.code.is_terminal() && !self.claim_terminal() {
            debug!(
                request_id = %self.request.request_id,
                code = %response.status.code,
                "suppressed duplicate terminal response"
            );
            return Ok(());
        }
        let frame = codec::serialize_response(self.channel.as_ref(), &response)?;
        self.channel.write_frame(frame).await?;
        Ok(())
    }

    /// Submit an already-serialized frame, honouring the terminal guard.
    ///
    /// # Errors
    /// Returns an error if the channel rejects the frame.
    pub(crate) async fn submit_frame(
        &self,
        frame: Frame,
        terminal: bool,
    ) -> Result<(), ChannelError> {
        if terminal && !self.claim_terminal() {
            debug!(
                request_id = %self.request.request_id,
                "suppressed duplicate terminal frame"
            );
            return Ok(());
        }
        self.channel.write_frame(frame).await
    }
}

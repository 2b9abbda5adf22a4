//! Outbound channel seam.
//!
//! The transport and codec pipeline live outside this crate; the processor
//! sees a connection only through [`ResponseChannel`]: a writability probe,
//! the per-connection serializer attributes, and an asynchronous frame
//! submission path. Frame submission transfers buffer ownership to the
//! channel and does not wait for transmission.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::codec::ResponseSerializer;

/// An opaque serialized response ready for the channel's write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Wrap serialized bytes as a frame.
    #[must_use]
    pub const fn new(bytes: Bytes) -> Self { Self(bytes) }

    /// The serialized length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the frame carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Consume the frame, yielding its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes { self.0 }
}

/// Errors raised when submitting a frame to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The connection has been closed; no further frames can be written.
    #[error("channel closed")]
    Closed,
    /// The outbound queue rejected the frame.
    #[error("outbound queue full")]
    QueueFull,
}

/// Per-connection view of the outbound path.
///
/// Implementations are supplied by the transport layer. Writes are
/// asynchronous and must preserve submission order per channel.
#[async_trait]
pub trait ResponseChannel: Send + Sync {
    /// Whether the channel can currently accept another frame without
    /// buffering unboundedly. The streamer pauses while this is false.
    fn is_writable(&self) -> bool;

    /// Whether this connection negotiated the binary serialization format.
    fn use_binary(&self) -> bool;

    /// The serializer pair negotiated for this connection.
    fn serializer(&self) -> Arc<dyn ResponseSerializer>;

    /// Submit a frame for asynchronous write.
    ///
    /// # Errors
    /// Returns an error if the channel is closed or its queue is full.
    async fn write_frame(&self, frame: Frame) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn frame_exposes_length_and_bytes() {
        let frame = Frame::new(Bytes::from_static(b"abc"));
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
        assert_eq!(frame.into_bytes(), Bytes::from_static(b"abc"));
    }

    #[rstest]
    fn empty_frame_is_empty() {
        assert!(Frame::new(Bytes::new()).is_empty());
    }
}

//! Response serialization and frame building.
//!
//! Each connection negotiates a serializer pair and a `use_binary` flag
//! during the transport handshake, carried as channel attributes. The
//! frame builder serializes a batch of result objects into a framed
//! response with the chosen format; when serialization fails it writes a
//! `SERVER_ERROR_SERIALIZATION` response directly to the channel and
//! re-signals the failure so the streamer aborts.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::{
    channel::Frame,
    context::OpContext,
    message::{ResponseMessage, ResponseStatusCode},
};

/// Errors raised while serializing a response.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// The text serializer rejected the response.
    #[error("text serialization failed: {0}")]
    Text(#[from] serde_json::Error),
    /// The binary serializer rejected the response.
    #[error("binary serialization failed: {0}")]
    Binary(#[from] bincode::error::EncodeError),
    /// A custom serializer rejected the response.
    #[error("{0}")]
    Other(String),
}

/// Serializer pair negotiated per connection.
///
/// Both methods produce complete frame payloads; the transport owns any
/// outer length-prefixing.
pub trait ResponseSerializer: Send + Sync {
    /// Serialize a response with the text format.
    ///
    /// # Errors
    /// Returns an error if the response cannot be represented in the
    /// text format.
    fn serialize_text(&self, message: &ResponseMessage) -> Result<Bytes, SerializeError>;

    /// Serialize a response with the binary format.
    ///
    /// # Errors
    /// Returns an error if the response cannot be represented in the
    /// binary format.
    fn serialize_binary(&self, message: &ResponseMessage) -> Result<Bytes, SerializeError>;
}

/// Default serializer pair: JSON text and bincode binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireSerializer;

impl ResponseSerializer for WireSerializer {
    fn serialize_text(&self, message: &ResponseMessage) -> Result<Bytes, SerializeError> {
        Ok(Bytes::from(serde_json::to_vec(message)?))
    }

    fn serialize_binary(&self, message: &ResponseMessage) -> Result<Bytes, SerializeError> {
        let encoded = bincode::serde::encode_to_vec(message, bincode::config::standard())?;
        Ok(Bytes::from(encoded))
    }
}

/// Serialize a response with the channel's negotiated format.
///
/// # Errors
/// Returns an error if the serializer rejects the response.
pub fn serialize_response(
    channel: &dyn crate::channel::ResponseChannel,
    message: &ResponseMessage,
) -> Result<Frame, SerializeError> {
    let serializer = channel.serializer();
    let bytes = if channel.use_binary() {
        serializer.serialize_binary(message)?
    } else {
        serializer.serialize_text(message)?
    };
    Ok(Frame::new(bytes))
}

/// Serialize an aggregated batch into a framed response.
///
/// `attributes` and `meta` come from the processor's decoration hooks and
/// land in the response's status and result blocks respectively.
///
/// On serialization failure a `SERVER_ERROR_SERIALIZATION` response naming
/// the root cause is written to the channel directly, and the failure is
/// re-signalled to the caller so the streaming loop aborts.
///
/// # Errors
/// Returns the serializer's error after the error response has been
/// submitted.
pub async fn make_frame(
    ctx: &OpContext,
    aggregate: Vec<Value>,
    code: ResponseStatusCode,
    attributes: HashMap<String, Value>,
    meta: HashMap<String, Value>,
) -> Result<Frame, SerializeError> {
    let request_id = ctx.request().request_id;
    let message = ResponseMessage::data_frame(request_id, code, aggregate)
        .with_attributes(attributes)
        .with_meta(meta);
    match serialize_response(ctx.channel(), &message) {
        Ok(frame) => Ok(frame),
        Err(err) => {
            warn!(%request_id, %err, "response serialization failed");
            let error_message = format!(
                "error during serialization of response for request [{request_id}]: {err}"
            );
            let response = ResponseMessage::error(
                request_id,
                ResponseStatusCode::ServerErrorSerialization,
                error_message,
            );
            if let Err(write_err) = ctx.write_response(response).await {
                warn!(%request_id, %write_err, "failed to write serialization error response");
            }
            Err(err)
        }
    }
}

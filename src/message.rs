//! Request and response message types for the operation processor.
//!
//! A [`RequestMessage`] is the decoded form of a client request: an opaque
//! request identifier, an op code, and a map of heterogeneous arguments.
//! A [`ResponseMessage`] carries a status block and a result block back to
//! the encoder. Both sides of the exchange use the argument and op tokens
//! defined here as their wire vocabulary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Op code requesting script evaluation.
pub const OP_EVAL: &str = "eval";
/// Sentinel op code emitted by the decoder for unparseable messages.
pub const OP_INVALID: &str = "invalid";

/// Argument token carrying the script source.
pub const ARG_GREMLIN: &str = "gremlin";
/// Argument token selecting the scripting-engine language.
pub const ARG_LANGUAGE: &str = "language";
/// Argument token carrying pre-bound script variables.
pub const ARG_BINDINGS: &str = "bindings";
/// Argument token overriding the server's result batch size.
pub const ARG_BATCH_SIZE: &str = "batchSize";
/// Argument token mapping logical graph names to physical ones.
pub const ARG_ALIASES: &str = "aliases";
/// Historical alias for [`ARG_ALIASES`].
pub const ARG_REBINDINGS: &str = "rebindings";
/// Argument token overriding the engine-side evaluation timeout (ms).
pub const ARG_EVAL_TIMEOUT: &str = "evaluationTimeout";

/// Binding keys that collide with statically imported tokens and are
/// therefore rejected in both their original and upper-cased forms.
pub const RESERVED_BINDING_KEYS: [&str; 4] = ["id", "key", "label", "value"];

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Unique, opaque identifier echoed on every response.
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    /// Op code selecting the handler.
    pub op: String,
    /// Heterogeneous named arguments.
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

impl RequestMessage {
    /// Build a request with the given op code and a fresh identifier.
    #[must_use]
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            op: op.into(),
            args: HashMap::new(),
        }
    }

    /// Attach an argument, consuming and returning the message.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Look up a raw argument value.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&Value> { self.args.get(key) }

    /// Look up an argument expected to hold a string.
    #[must_use]
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Look up an argument expected to hold a non-negative integer.
    #[must_use]
    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(Value::as_u64)
    }

    /// The bindings map, if the request supplied one.
    ///
    /// Returns `None` both when the argument is absent and when it is not
    /// an object; eval validation distinguishes the latter case.
    #[must_use]
    pub fn bindings(&self) -> Option<&serde_json::Map<String, Value>> {
        self.args.get(ARG_BINDINGS).and_then(Value::as_object)
    }

    /// The alias mapping used to scope transactions in strict mode.
    ///
    /// `aliases` wins over the historical `rebindings` token when both are
    /// present.
    #[must_use]
    pub fn aliases(&self) -> Option<&serde_json::Map<String, Value>> {
        self.args
            .get(ARG_ALIASES)
            .or_else(|| self.args.get(ARG_REBINDINGS))
            .and_then(Value::as_object)
    }
}

/// Whether `key` matches the identifier pattern `[A-Za-z$_][A-Za-z0-9$_]*`.
#[must_use]
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '$' || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '$' || c == '_')
}

/// Whether `key` collides with a reserved token, checked case-insensitively
/// so both the original and upper-cased forms are caught.
#[must_use]
pub fn is_reserved_binding_key(key: &str) -> bool {
    RESERVED_BINDING_KEYS
        .iter()
        .any(|reserved| key.eq_ignore_ascii_case(reserved))
}

/// Response status codes, serialized as their numeric wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResponseStatusCode {
    /// Terminal success carrying the final payload batch.
    Success,
    /// Terminal success with no payload.
    NoContent,
    /// Non-terminal chunk; more frames follow.
    PartialContent,
    /// The request could not be authenticated.
    Unauthorized,
    /// The request message itself was unusable.
    MalformedRequest,
    /// The request was structurally sound but its arguments were not.
    InvalidRequestArguments,
    /// Unclassified server-side failure.
    ServerError,
    /// The script failed during evaluation.
    ServerErrorScriptEvaluation,
    /// Evaluation or response serialization exceeded its time budget.
    ServerErrorTimeout,
    /// The response could not be serialized.
    ServerErrorSerialization,
}

impl ResponseStatusCode {
    /// The numeric wire value of this code.
    #[must_use]
    pub const fn value(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::NoContent => 204,
            Self::PartialContent => 206,
            Self::Unauthorized => 401,
            Self::MalformedRequest => 498,
            Self::InvalidRequestArguments => 499,
            Self::ServerError => 500,
            Self::ServerErrorScriptEvaluation => 597,
            Self::ServerErrorTimeout => 598,
            Self::ServerErrorSerialization => 599,
        }
    }

    /// Whether this code ends the response stream for a request.
    ///
    /// Every code except [`Self::PartialContent`] is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool { !matches!(self, Self::PartialContent) }

    /// Whether this code reports a failure.
    #[must_use]
    pub const fn is_error(self) -> bool { self.value() >= 400 }
}

impl From<ResponseStatusCode> for u16 {
    fn from(code: ResponseStatusCode) -> Self { code.value() }
}

impl TryFrom<u16> for ResponseStatusCode {
    type Error = UnknownStatusCode;

    fn try_from(value: u16) -> Result<Self, UnknownStatusCode> {
        match value {
            200 => Ok(Self::Success),
            204 => Ok(Self::NoContent),
            206 => Ok(Self::PartialContent),
            401 => Ok(Self::Unauthorized),
            498 => Ok(Self::MalformedRequest),
            499 => Ok(Self::InvalidRequestArguments),
            500 => Ok(Self::ServerError),
            597 => Ok(Self::ServerErrorScriptEvaluation),
            598 => Ok(Self::ServerErrorTimeout),
            599 => Ok(Self::ServerErrorSerialization),
            other => Err(UnknownStatusCode(other)),
        }
    }
}

impl std::fmt::Display for ResponseStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Error raised when decoding an unrecognized numeric status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown response status code {0}")]
pub struct UnknownStatusCode(pub u16);

/// Status block of a response: code, optional diagnostic, and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStatus {
    /// Status code for this frame.
    pub code: ResponseStatusCode,
    /// Human-readable diagnostic, populated on error frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Processor-supplied status attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Value>,
}

/// Result block of a response: the data batch and its metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    /// Ordered batch of result objects scoped to this frame.
    #[serde(default)]
    pub data: Vec<Value>,
    /// Processor-supplied result metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, Value>,
}

/// A structured response, one per outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Identifier of the request this frame answers.
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    /// Status block.
    pub status: ResponseStatus,
    /// Result block.
    #[serde(default, skip_serializing_if = "is_empty_result")]
    pub result: ResponseResult,
}

fn is_empty_result(result: &ResponseResult) -> bool {
    result.data.is_empty() && result.meta.is_empty()
}

impl ResponseMessage {
    /// Build a data-bearing frame with the given code.
    #[must_use]
    pub fn data_frame(request_id: Uuid, code: ResponseStatusCode, data: Vec<Value>) -> Self {
        Self {
            request_id,
            status: ResponseStatus {
                code,
                message: None,
                attributes: HashMap::new(),
            },
            result: ResponseResult {
                data,
                meta: HashMap::new(),
            },
        }
    }

    /// Build the terminal frame for an empty result.
    #[must_use]
    pub fn no_content(request_id: Uuid) -> Self {
        Self::data_frame(request_id, ResponseStatusCode::NoContent, Vec::new())
    }

    /// Build a terminal error frame carrying a diagnostic.
    #[must_use]
    pub fn error(request_id: Uuid, code: ResponseStatusCode, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ResponseStatus {
                code,
                message: Some(message.into()),
                attributes: HashMap::new(),
            },
            result: ResponseResult::default(),
        }
    }

    /// Attach status attributes, consuming and returning the message.
    #[must_use]
    pub fn with_attributes(mut self, attributes: HashMap<String, Value>) -> Self {
        self.status.attributes = attributes;
        self
    }

    /// Attach result metadata, consuming and returning the message.
    #[must_use]
    pub fn with_meta(mut self, meta: HashMap<String, Value>) -> Self {
        self.result.meta = meta;
        self
    }
}

//! Test doubles for exercising the processor without a transport, engine,
//! or graph store.
//!
//! Compiled for unit tests and, behind the `test-support` feature, for the
//! integration suites under `tests/`.

#![allow(clippy::expect_used, reason = "test support code can panic")]
#![allow(clippy::unwrap_used, reason = "test support code can panic")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::{
    channel::{ChannelError, Frame, ResponseChannel},
    codec::{ResponseSerializer, SerializeError, WireSerializer},
    engine::{EngineError, EvalJob, ScriptEngine},
    graph::{GraphError, GraphManager},
    message::{ARG_GREMLIN, OP_EVAL, RequestMessage, ResponseMessage},
};

/// A channel that records every submitted frame.
pub struct RecordingChannel {
    frames: Mutex<Vec<Bytes>>,
    writable: AtomicBool,
    closed: AtomicBool,
    use_binary: bool,
    serializer: Arc<dyn ResponseSerializer>,
}

impl Default for RecordingChannel {
    fn default() -> Self { Self::new() }
}

impl RecordingChannel {
    /// A writable text-format channel with the default serializer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            writable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            use_binary: false,
            serializer: Arc::new(WireSerializer),
        }
    }

    /// A channel that negotiated the binary format.
    #[must_use]
    pub fn binary() -> Self {
        Self {
            use_binary: true,
            ..Self::new()
        }
    }

    /// Replace the negotiated serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn ResponseSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Toggle the writability flag observed by the streamer.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    /// Refuse all further frames.
    pub fn close(&self) { self.closed.store(true, Ordering::Release); }

    /// Number of frames written so far.
    #[must_use]
    pub fn frame_count(&self) -> usize { self.frames.lock().unwrap().len() }

    /// Raw frames in submission order.
    #[must_use]
    pub fn frames(&self) -> Vec<Bytes> { self.frames.lock().unwrap().clone() }

    /// Frames decoded as text-format responses, in submission order.
    ///
    /// # Panics
    /// Panics if a frame is not a JSON-encoded response.
    #[must_use]
    pub fn responses(&self) -> Vec<ResponseMessage> {
        self.frames()
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).expect("frame decodes as response"))
            .collect()
    }
}

#[async_trait]
impl ResponseChannel for RecordingChannel {
    fn is_writable(&self) -> bool { self.writable.load(Ordering::Acquire) }

    fn use_binary(&self) -> bool { self.use_binary }

    fn serializer(&self) -> Arc<dyn ResponseSerializer> { Arc::clone(&self.serializer) }

    async fn write_frame(&self, frame: Frame) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        self.frames.lock().unwrap().push(frame.into_bytes());
        Ok(())
    }
}

/// A serializer that fails on success-class responses but still encodes
/// error responses, so the frame builder's fallback path can be observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlakySerializer;

impl ResponseSerializer for FlakySerializer {
    fn serialize_text(&self, message: &ResponseMessage) -> Result<Bytes, SerializeError> {
        if message.status.code.is_error() {
            WireSerializer.serialize_text(message)
        } else {
            Err(SerializeError::Other("serializer rejected the batch".to_owned()))
        }
    }

    fn serialize_binary(&self, message: &ResponseMessage) -> Result<Bytes, SerializeError> {
        self.serialize_text(message)
    }
}

/// An engine that returns a canned outcome and records submitted jobs.
pub struct StubEngine {
    language: String,
    outcome: Result<Value, EngineError>,
    jobs: Mutex<Vec<EvalJob>>,
}

impl StubEngine {
    /// An engine whose evaluations complete with `value`.
    #[must_use]
    pub fn returning(value: Value) -> Self {
        Self {
            language: "gremlin-groovy".to_owned(),
            outcome: Ok(value),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// An engine whose evaluations fail with `err`.
    #[must_use]
    pub fn failing(err: EngineError) -> Self {
        Self {
            outcome: Err(err),
            ..Self::returning(Value::Null)
        }
    }

    /// Jobs submitted so far, in order.
    #[must_use]
    pub fn jobs(&self) -> Vec<EvalJob> { self.jobs.lock().unwrap().clone() }
}

#[async_trait]
impl ScriptEngine for StubEngine {
    fn default_language(&self) -> &str { &self.language }

    async fn eval(&self, job: EvalJob) -> Result<Value, EngineError> {
        self.jobs.lock().unwrap().push(job);
        self.outcome.clone()
    }
}

/// A transaction operation observed by [`RecordingGraphManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOp {
    /// Whether this was a commit or a rollback.
    pub kind: TxKind,
    /// The graphs the operation was scoped to.
    pub graphs: Vec<String>,
    /// Frames already on the observed channel when the operation ran.
    pub frames_written: usize,
}

/// Kind of transaction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// A commit call.
    Commit,
    /// A rollback call.
    Rollback,
}

/// A graph manager that records commit and rollback calls.
pub struct RecordingGraphManager {
    names: Vec<String>,
    ops: Mutex<Vec<TxOp>>,
    observed: Mutex<Option<Arc<RecordingChannel>>>,
    fail_commit: bool,
}

impl RecordingGraphManager {
    /// A manager over the named graphs.
    #[must_use]
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| (*n).to_owned()).collect(),
            ops: Mutex::new(Vec::new()),
            observed: Mutex::new(None),
            fail_commit: false,
        }
    }

    /// A manager whose commits fail.
    #[must_use]
    pub fn failing_commit(names: &[&str]) -> Self {
        Self {
            fail_commit: true,
            ..Self::new(names)
        }
    }

    /// Snapshot the given channel's frame count on every operation, so
    /// tests can assert commit-before-flush ordering.
    pub fn observe_channel(&self, channel: Arc<RecordingChannel>) {
        *self.observed.lock().unwrap() = Some(channel);
    }

    fn record(&self, kind: TxKind, graphs: &[String]) {
        let frames_written = self
            .observed
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |channel| channel.frame_count());
        self.ops.lock().unwrap().push(TxOp {
            kind,
            graphs: graphs.to_vec(),
            frames_written,
        });
    }

    /// All operations in call order.
    #[must_use]
    pub fn ops(&self) -> Vec<TxOp> { self.ops.lock().unwrap().clone() }

    /// Commit operations in call order.
    #[must_use]
    pub fn commits(&self) -> Vec<TxOp> {
        self.ops().into_iter().filter(|op| op.kind == TxKind::Commit).collect()
    }

    /// Rollback operations in call order.
    #[must_use]
    pub fn rollbacks(&self) -> Vec<TxOp> {
        self.ops().into_iter().filter(|op| op.kind == TxKind::Rollback).collect()
    }
}

#[async_trait]
impl GraphManager for RecordingGraphManager {
    fn graph_names(&self) -> Vec<String> { self.names.clone() }

    async fn commit(&self, graphs: &[String]) -> Result<(), GraphError> {
        self.record(TxKind::Commit, graphs);
        if self.fail_commit {
            return Err(GraphError::Transaction("commit refused".to_owned()));
        }
        Ok(())
    }

    async fn rollback(&self, graphs: &[String]) -> Result<(), GraphError> {
        self.record(TxKind::Rollback, graphs);
        Ok(())
    }
}

/// An `eval` request for the given script with a fresh request id.
#[must_use]
pub fn eval_request(script: &str) -> RequestMessage {
    RequestMessage::new(OP_EVAL).with_arg(ARG_GREMLIN, Value::String(script.to_owned()))
}

/// Decode a channel's frames and return each response's status code value
/// with its data batch.
#[must_use]
pub fn frame_summary(channel: &RecordingChannel) -> Vec<(u16, Vec<Value>)> {
    channel
        .responses()
        .into_iter()
        .map(|response| (response.status.code.value(), response.result.data))
        .collect()
}

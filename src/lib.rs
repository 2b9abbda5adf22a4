//! Script-evaluation operation processor for a graph query server.
//!
//! Decoded client requests enter through [`op::OpProcessor`], which
//! validates the message and selects the handler for its op code. The
//! default `eval` handler submits the script to a pluggable
//! [`engine::ScriptEngine`], streams the resulting object sequence back
//! over the connection's [`channel::ResponseChannel`] in batched frames,
//! and coordinates graph-transaction commit and rollback around the
//! evaluation. Transport, codec pipeline, engine internals, and graph
//! storage live behind the seams in [`channel`], [`codec`], [`engine`],
//! and [`graph`].

#![cfg_attr(test, allow(clippy::unwrap_used, reason = "test code can panic"))]
#![cfg_attr(test, allow(clippy::expect_used, reason = "test code can panic"))]
#![cfg_attr(
    test,
    allow(clippy::indexing_slicing, reason = "test code with known bounds")
)]

pub mod channel;
pub mod codec;
pub mod context;
pub mod engine;
pub mod graph;
pub mod message;
pub mod metrics;
pub mod op;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod testkit;

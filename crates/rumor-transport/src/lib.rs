//! Rumor Transport - line-delimited JSON messaging for cluster nodes
//!
//! This crate provides the messaging layer that broadcast protocols run on:
//!
//! - **Envelopes**: `{src, dest, body}` JSON objects, one per line
//! - **Handlers**: registered per message `type`, run concurrently
//! - **Replies**: addressed back to the sender with `in_reply_to` set
//! - **RPC**: request/response with an asynchronous completion callback
//! - **Errors**: handler failures are answered with coded `error` bodies
//!
//! Protocol crates depend only on the [`Transport`] trait, so they can be
//! tested against a recording transport and run against the [`Node`] runtime.
//!
//! # Example
//!
//! ```no_run
//! use rumor_transport::{Body, Node, Transport};
//!
//! #[tokio::main]
//! async fn main() -> rumor_transport::Result<()> {
//!     let mut node = Node::new();
//!     node.register("echo", |handle, msg| {
//!         let echo = msg.body.field("echo").cloned().unwrap_or_default();
//!         handle.reply(&msg, Body::new("echo_ok").with("echo", echo))
//!     });
//!     node.run().await
//! }
//! ```

pub mod error;
pub mod message;
pub mod node;
pub mod transport;

pub use error::{Error, ErrorCode, Result};
pub use message::{Body, InitRequest, Message, NodeId};
pub use node::{Handler, Node};
pub use transport::{NodeHandle, ResponseCallback, Transport};

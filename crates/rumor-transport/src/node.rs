//! Node runtime: reads envelopes, dispatches them, writes replies.
//!
//! One envelope per line in each direction. Each inbound message is handled on
//! its own task, so handlers for different messages run concurrently. Replies
//! to outstanding RPCs are routed to their callbacks instead of a handler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::message::{Body, InitRequest, Message};
use crate::transport::{NodeHandle, Transport};

/// A message handler.
pub type Handler = Arc<dyn Fn(&NodeHandle, Message) -> Result<()> + Send + Sync>;

/// A node that has not started running yet.
///
/// Register handlers with [`register`](Self::register), grab a
/// [`NodeHandle`] for background tasks, then call [`run`](Self::run).
pub struct Node {
    handle: NodeHandle,
    handlers: HashMap<String, Handler>,
    outbound: mpsc::UnboundedReceiver<Message>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// Create a node with no handlers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: NodeHandle::new(tx),
            handlers: HashMap::new(),
            outbound: rx,
        }
    }

    /// Get a handle for sending messages.
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Register the handler for a message type, replacing any previous one.
    ///
    /// `init` is answered by the runtime itself; a handler registered for it
    /// runs after the identity has been recorded.
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&NodeHandle, Message) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    /// Run on stdin/stdout until stdin is closed.
    pub async fn run(self) -> Result<()> {
        self.run_with(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Run on the given streams until `reader` reaches end of input.
    ///
    /// Handlers still running at end of input are awaited. The writer keeps
    /// draining outbound messages for as long as any [`NodeHandle`] is alive.
    pub async fn run_with<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            handle,
            handlers,
            outbound,
        } = self;

        tokio::spawn(write_loop(outbound, writer));

        let mut lines = reader.lines();
        let mut in_flight = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let msg = match Message::from_line(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed envelope");
                    continue;
                }
            };

            trace!(src = %msg.src, kind = %msg.body.kind, msg_id = ?msg.body.msg_id, "Received message");

            if let Some(in_reply_to) = msg.body.in_reply_to {
                match handle.take_callback(in_reply_to) {
                    Some(callback) => callback(msg),
                    None => debug!(in_reply_to, src = %msg.src, "Ignoring reply with no pending callback"),
                }
                continue;
            }

            if msg.body.kind == "init" {
                handle_init(&handle, &msg);
            }

            match handlers.get(&msg.body.kind).cloned() {
                Some(handler) => {
                    let handle = handle.clone();
                    in_flight.spawn(async move {
                        let request = msg.clone();
                        if let Err(e) = handler(&handle, msg) {
                            report_error(&handle, &request, &e);
                        }
                    });
                }
                None if msg.body.kind == "init" => {}
                None => {
                    let err = Error::NotSupported(msg.body.kind.clone());
                    report_error(&handle, &msg, &err);
                }
            }

            while let Some(result) = in_flight.try_join_next() {
                log_join(result);
            }
        }

        debug!("Input closed, waiting for in-flight handlers");
        while let Some(result) = in_flight.join_next().await {
            log_join(result);
        }
        Ok(())
    }
}

fn handle_init(handle: &NodeHandle, msg: &Message) {
    let request = match msg.body.decode::<InitRequest>() {
        Ok(request) => request,
        Err(e) => {
            report_error(handle, msg, &e);
            return;
        }
    };

    let node_id = request.node_id.clone();
    let members = request.node_ids.len();
    if handle.init(request) {
        info!(node_id = %node_id, members, "Node initialized");
    } else {
        warn!(node_id = %node_id, "Ignoring repeated init");
    }

    if let Err(e) = handle.reply(msg, Body::new("init_ok")) {
        warn!(error = %e, "Failed to acknowledge init");
    }
}

fn report_error(handle: &NodeHandle, request: &Message, err: &Error) {
    warn!(
        src = %request.src,
        kind = %request.body.kind,
        code = %err.code(),
        error = %err,
        "Handler failed"
    );
    if let Err(e) = handle.reply(request, Body::error(err)) {
        debug!(error = %e, "Failed to send error reply");
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Handler task panicked");
    }
}

async fn write_loop<W>(mut outbound: mpsc::UnboundedReceiver<Message>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        let line = match msg.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, dest = %msg.dest, "Failed to encode outbound message");
                continue;
            }
        };
        if let Err(e) = write_line(&mut writer, &line).await {
            error!(error = %e, "Output closed, stopping writer");
            break;
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

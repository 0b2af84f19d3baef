//! In-memory transport that records traffic instead of delivering it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rumor_transport::{Body, Error, Message, NodeId, ResponseCallback, Result, Transport};

#[derive(Default)]
struct Recorded {
    sent: Vec<Message>,
    rpcs: Vec<(Message, ResponseCallback)>,
}

pub(crate) struct RecordingTransport {
    node_id: Option<NodeId>,
    recorded: Mutex<Recorded>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new(node_id: &str) -> Arc<Self> {
        Arc::new(Self {
            node_id: Some(node_id.to_string()),
            recorded: Mutex::new(Recorded::default()),
            failing: AtomicBool::new(false),
        })
    }

    pub(crate) fn uninitialized() -> Arc<Self> {
        Arc::new(Self {
            node_id: None,
            recorded: Mutex::new(Recorded::default()),
            failing: AtomicBool::new(false),
        })
    }

    /// Make every `rpc` call fail until reset.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Replies and one-way sends, in order.
    pub(crate) fn sent(&self) -> Vec<Message> {
        self.recorded.lock().unwrap().sent.clone()
    }

    /// RPC requests issued so far, without their callbacks.
    pub(crate) fn rpc_requests(&self) -> Vec<Message> {
        self.recorded
            .lock()
            .unwrap()
            .rpcs
            .iter()
            .map(|(msg, _)| msg.clone())
            .collect()
    }

    /// Drain pending RPCs together with their callbacks.
    pub(crate) fn take_rpcs(&self) -> Vec<(Message, ResponseCallback)> {
        std::mem::take(&mut self.recorded.lock().unwrap().rpcs)
    }

    /// Answer every pending RPC the way a peer would: `broadcast_ok` with the
    /// correlation id echoed.
    pub(crate) fn ack_all(&self) -> usize {
        let rpcs = self.take_rpcs();
        let count = rpcs.len();
        for (request, callback) in rpcs {
            let mut body = Body::new("broadcast_ok");
            if let Some(id) = request.body.field("correlation_id") {
                body = body.with("correlation_id", id.clone());
            }
            body.in_reply_to = request.body.msg_id;
            callback(Message {
                src: request.dest,
                dest: request.src,
                body,
            });
        }
        count
    }
}

impl Transport for RecordingTransport {
    fn node_id(&self) -> Result<NodeId> {
        self.node_id.clone().ok_or(Error::NotInitialized)
    }

    fn reply(&self, request: &Message, mut body: Body) -> Result<()> {
        body.in_reply_to = request.body.msg_id;
        self.recorded.lock().unwrap().sent.push(Message {
            src: request.dest.clone(),
            dest: request.src.clone(),
            body,
        });
        Ok(())
    }

    fn send(&self, dest: &str, body: Body) -> Result<()> {
        let src = self.node_id()?;
        self.recorded.lock().unwrap().sent.push(Message {
            src,
            dest: dest.to_string(),
            body,
        });
        Ok(())
    }

    fn rpc(&self, dest: &str, mut body: Body, on_response: ResponseCallback) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let src = self.node_id()?;
        let mut recorded = self.recorded.lock().unwrap();
        body.msg_id = Some(recorded.rpcs.len() as u64 + 1);
        recorded.rpcs.push((
            Message {
                src,
                dest: dest.to_string(),
                body,
            },
            on_response,
        ));
        Ok(())
    }
}

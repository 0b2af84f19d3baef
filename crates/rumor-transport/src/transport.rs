//! The messaging primitives consumed by protocol code.
//!
//! Protocol code talks to the network only through [`Transport`]: it never sees
//! framing, message ids, or request/response correlation. [`NodeHandle`] is the
//! implementation backed by the [`Node`](crate::Node) runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::message::{Body, InitRequest, Message, NodeId};

/// Completion callback for an RPC.
///
/// Invoked at most once, when a reply arrives. There is no timeout: if the
/// peer never answers, the callback is never invoked.
pub type ResponseCallback = Box<dyn FnOnce(Message) + Send + 'static>;

/// Request/response and one-way messaging between nodes.
pub trait Transport: Send + Sync + 'static {
    /// This node's identifier.
    fn node_id(&self) -> Result<NodeId>;

    /// Send `body` back to the sender of `request`.
    fn reply(&self, request: &Message, body: Body) -> Result<()>;

    /// Fire-and-forget delivery to `dest`.
    fn send(&self, dest: &str, body: Body) -> Result<()>;

    /// Send `body` to `dest` and invoke `on_response` if a reply arrives.
    fn rpc(&self, dest: &str, body: Body, on_response: ResponseCallback) -> Result<()>;
}

impl<T: Transport> Transport for Arc<T> {
    fn node_id(&self) -> Result<NodeId> {
        (**self).node_id()
    }

    fn reply(&self, request: &Message, body: Body) -> Result<()> {
        (**self).reply(request, body)
    }

    fn send(&self, dest: &str, body: Body) -> Result<()> {
        (**self).send(dest, body)
    }

    fn rpc(&self, dest: &str, body: Body, on_response: ResponseCallback) -> Result<()> {
        (**self).rpc(dest, body, on_response)
    }
}

#[derive(Debug)]
struct Identity {
    node_id: NodeId,
    node_ids: Vec<NodeId>,
}

struct HandleState {
    identity: OnceLock<Identity>,
    next_msg_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, ResponseCallback>>,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Cheaply cloneable handle to a running node's outbound side.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<HandleState>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("identity", &self.inner.identity.get())
            .field("pending_callbacks", &self.pending_callbacks())
            .finish()
    }
}

impl NodeHandle {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            inner: Arc::new(HandleState {
                identity: OnceLock::new(),
                next_msg_id: AtomicU64::new(1),
                callbacks: Mutex::new(HashMap::new()),
                outbound,
            }),
        }
    }

    /// Record the identity assigned by `init`.
    ///
    /// Returns `false` if the node was already initialized; the first
    /// identity is kept.
    pub(crate) fn init(&self, request: InitRequest) -> bool {
        self.inner
            .identity
            .set(Identity {
                node_id: request.node_id,
                node_ids: request.node_ids,
            })
            .is_ok()
    }

    /// Whether `init` has been received.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.identity.get().is_some()
    }

    /// All cluster members announced by `init` (including this node).
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner
            .identity
            .get()
            .map(|identity| identity.node_ids.clone())
            .unwrap_or_default()
    }

    /// Number of RPCs still waiting for a reply.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks().len()
    }

    pub(crate) fn take_callback(&self, in_reply_to: u64) -> Option<ResponseCallback> {
        self.callbacks().remove(&in_reply_to)
    }

    fn callbacks(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ResponseCallback>> {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_msg_id(&self) -> u64 {
        self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, src: NodeId, dest: &str, body: Body) -> Result<()> {
        trace!(dest, kind = %body.kind, msg_id = ?body.msg_id, "Queueing outbound message");
        self.inner
            .outbound
            .send(Message {
                src,
                dest: dest.to_string(),
                body,
            })
            .map_err(|_| Error::Closed)
    }
}

impl Transport for NodeHandle {
    fn node_id(&self) -> Result<NodeId> {
        self.inner
            .identity
            .get()
            .map(|identity| identity.node_id.clone())
            .ok_or(Error::NotInitialized)
    }

    fn reply(&self, request: &Message, mut body: Body) -> Result<()> {
        body.msg_id = Some(self.next_msg_id());
        body.in_reply_to = request.body.msg_id;
        // The request was addressed to us, so this works even before init.
        self.emit(request.dest.clone(), &request.src, body)
    }

    fn send(&self, dest: &str, mut body: Body) -> Result<()> {
        let src = self.node_id()?;
        body.msg_id = Some(self.next_msg_id());
        self.emit(src, dest, body)
    }

    fn rpc(&self, dest: &str, mut body: Body, on_response: ResponseCallback) -> Result<()> {
        let src = self.node_id()?;
        let msg_id = self.next_msg_id();
        body.msg_id = Some(msg_id);

        self.callbacks().insert(msg_id, on_response);
        if let Err(e) = self.emit(src, dest, body) {
            self.callbacks().remove(&msg_id);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized() -> (NodeHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = NodeHandle::new(tx);
        assert!(handle.init(InitRequest {
            node_id: "n1".into(),
            node_ids: vec!["n1".into(), "n2".into()],
        }));
        (handle, rx)
    }

    #[test]
    fn test_requires_init() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = NodeHandle::new(tx);

        assert!(!handle.is_initialized());
        assert!(matches!(handle.node_id(), Err(Error::NotInitialized)));
        assert!(matches!(
            handle.send("n2", Body::new("ping")),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_second_init_is_ignored() {
        let (handle, _rx) = initialized();
        assert!(!handle.init(InitRequest {
            node_id: "n9".into(),
            node_ids: vec![],
        }));
        assert_eq!(handle.node_id().unwrap(), "n1");
        assert_eq!(handle.node_ids(), vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn test_msg_ids_increase() {
        let (handle, mut rx) = initialized();
        handle.send("n2", Body::new("a")).unwrap();
        handle.send("n2", Body::new("b")).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.src, "n1");
        assert!(second.body.msg_id > first.body.msg_id);
    }

    #[test]
    fn test_reply_addresses_sender() {
        let (handle, mut rx) = initialized();
        let mut request_body = Body::new("read");
        request_body.msg_id = Some(17);
        let request = Message {
            src: "c3".into(),
            dest: "n1".into(),
            body: request_body,
        };

        handle.reply(&request, Body::new("read_ok")).unwrap();

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.src, "n1");
        assert_eq!(reply.dest, "c3");
        assert_eq!(reply.body.in_reply_to, Some(17));
    }

    #[test]
    fn test_rpc_registers_callback() {
        let (handle, mut rx) = initialized();
        handle
            .rpc("n2", Body::new("ping"), Box::new(|_| {}))
            .unwrap();

        let sent = rx.try_recv().unwrap();
        assert_eq!(handle.pending_callbacks(), 1);
        assert!(handle.take_callback(sent.body.msg_id.unwrap()).is_some());
        assert_eq!(handle.pending_callbacks(), 0);
    }

    #[test]
    fn test_rpc_on_closed_transport_drops_callback() {
        let (handle, rx) = initialized();
        drop(rx);

        let result = handle.rpc("n2", Body::new("ping"), Box::new(|_| {}));
        assert!(matches!(result, Err(Error::Closed)));
        assert_eq!(handle.pending_callbacks(), 0);
    }
}

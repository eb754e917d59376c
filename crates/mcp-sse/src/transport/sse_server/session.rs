use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::common::{SessionId, session_id};
use crate::{
    error::{InboundError, SessionNotFound, TransportError},
    model::JsonRpcMessage,
};

const SESSION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    endpoint: Arc<str>,
    to_client_tx: mpsc::Sender<String>,
    from_client_tx: mpsc::Sender<JsonRpcMessage>,
    ct: CancellationToken,
}

/// One client conversation: an open event stream plus the POST endpoint
/// derived from it. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Session(Arc<SessionInner>);

/// The receiving ends of a freshly created session.
#[derive(Debug)]
pub struct SessionChannels {
    /// Encoded messages to write to the event stream, in order.
    pub to_client_rx: mpsc::Receiver<String>,
    /// Decoded messages POSTed by the client.
    pub from_client_rx: mpsc::Receiver<JsonRpcMessage>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.0.id
    }

    /// The absolute url announced in the `endpoint` event.
    pub fn endpoint(&self) -> &Arc<str> {
        &self.0.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.0.ct.is_cancelled()
    }

    pub fn close(&self) {
        self.0.ct.cancel();
    }

    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.0.ct.clone().cancelled_owned()
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.0.ct
    }

    pub(crate) fn to_client_sender(&self) -> mpsc::Sender<String> {
        self.0.to_client_tx.clone()
    }

    /// Queue an encoded message for the event stream.
    pub(crate) async fn push(&self, body: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::StreamClosed);
        }
        tokio::select! {
            biased;
            _ = self.0.ct.cancelled() => Err(TransportError::StreamClosed),
            sent = self.0.to_client_tx.send(body) => sent.map_err(|_| TransportError::StreamClosed),
        }
    }

    async fn deliver(&self, message: JsonRpcMessage) -> Result<(), InboundError> {
        let closed = || InboundError::SessionClosed(self.0.id.clone());
        if self.is_closed() {
            return Err(closed());
        }
        tokio::select! {
            biased;
            _ = self.0.ct.cancelled() => Err(closed()),
            sent = self.0.from_client_tx.send(message) => sent.map_err(|_| closed()),
        }
    }
}

/// Live sessions keyed by id.
///
/// Backed by a sharded concurrent map, so unrelated sessions never contend on
/// a single lock. Entries are cloned out of the map before any await point.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session whose endpoint is `endpoint_base?sessionId=<id>`.
    /// The session closes when `ct` is cancelled.
    pub fn create(&self, endpoint_base: &str, ct: CancellationToken) -> (Session, SessionChannels) {
        let id = session_id();
        let (to_client_tx, to_client_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (from_client_tx, from_client_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let session = Session(Arc::new(SessionInner {
            endpoint: format!("{endpoint_base}?sessionId={id}").into(),
            id: id.clone(),
            to_client_tx,
            from_client_tx,
            ct,
        }));
        let previous = self.sessions.insert(id, session.clone());
        debug_assert!(previous.is_none(), "session id collision");
        (
            session,
            SessionChannels {
                to_client_rx,
                from_client_rx,
            },
        )
    }

    pub fn lookup(&self, id: &str) -> Result<Session, SessionNotFound> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionNotFound(id.into()))
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Decode `body` and hand it to the session's transport.
    ///
    /// The session is looked up before anything else, so an unknown id never
    /// costs a decode.
    pub async fn handle_inbound(&self, id: &str, body: &str) -> Result<(), InboundError> {
        let session = self.lookup(id)?;
        let message = JsonRpcMessage::decode(body)?;
        session.deliver(message).await
    }
}

use std::sync::{
    Arc, Mutex as StdMutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    common::SessionId,
    session::{Session, SessionRegistry},
};
use crate::{
    error::TransportError,
    model::JsonRpcMessage,
    transport::{HandlerSlot, Transport, TransportHandler},
};

/// The server end of one SSE session.
///
/// `send` pushes onto the session's event stream; messages POSTed by the
/// client are delivered to the handler once `start` has been called.
#[derive(Debug)]
pub struct SseServerTransport {
    session: Session,
    registry: SessionRegistry,
    handler: Arc<HandlerSlot>,
    inbound: StdMutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
    started: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SseServerTransport {
    pub(crate) fn new(
        session: Session,
        registry: SessionRegistry,
        inbound: mpsc::Receiver<JsonRpcMessage>,
    ) -> Self {
        Self {
            session,
            registry,
            handler: Arc::new(HandlerSlot::default()),
            inbound: StdMutex::new(Some(inbound)),
            started: AtomicBool::new(false),
            pump: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn endpoint(&self) -> &Arc<str> {
        self.session.endpoint()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

async fn pump_inbound(
    mut inbound: mpsc::Receiver<JsonRpcMessage>,
    handler: Arc<HandlerSlot>,
    ct: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = ct.cancelled() => break,
            message = inbound.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        tracing::debug!(?message, "inbound message");
        handler.message(message);
    }
    tracing::info!("session closed");
    handler.close();
}

impl Transport for SseServerTransport {
    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.handler.set(handler);
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::AlreadyStarted);
        }
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        let span = tracing::info_span!("session", session_id = %self.session.id());
        let pump = tokio::spawn(
            pump_inbound(
                inbound,
                self.handler.clone(),
                self.session.cancellation_token().clone(),
            )
            .instrument(span),
        );
        *self.pump.lock().await = Some(pump);
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let body = match message.encode() {
            Ok(body) => body,
            Err(e) => {
                let e = TransportError::Encode(e);
                self.handler.error(&e);
                return Err(e);
            }
        };
        let result = self.session.push(body).await;
        if let Err(e) = &result {
            tracing::error!(session_id = %self.session.id(), error = %e, "failed to push message");
            self.handler.error(e);
        }
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(TransportError::NotStarted);
        }
        self.registry.remove(self.session.id());
        self.session.close();
        let pump = self.pump.lock().await.take();
        let mut result = Ok(());
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                if e.is_panic() {
                    result = Err(TransportError::Join(e));
                }
            }
        }
        self.handler.close();
        result
    }
}

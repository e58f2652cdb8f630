//! Transport session contract.
//!
//! A transport opens exactly one connection per `open` call and reports its
//! lifecycle through an `EventSink`. Every reported event carries the
//! session's generation so the client can discard events from sessions it
//! has already replaced.

mod websocket;

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::errors::TransportError;
use crate::event::RawEvent;
use crate::supervisor::Generation;

pub use websocket::WebSocketTransport;

/// WebSocket-style close status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Reserved for intentional shutdown; never retried.
    pub const NORMAL: Self = Self(1000);
    pub const GOING_AWAY: Self = Self(1001);
    /// Peer sent a close frame without a status.
    pub const NO_STATUS: Self = Self(1005);
    /// Connection ended without a close frame.
    pub const ABNORMAL: Self = Self(1006);

    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-initiated shutdown of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseRequest {
    /// Close with the normal-closure code.
    pub fn intentional(reason: impl Into<String>) -> Self {
        Self {
            code: CloseCode::NORMAL,
            reason: reason.into(),
        }
    }
}

/// Lifecycle and payload events reported by a transport session.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(RawEvent),
    /// Diagnostic only; a `Closed` event always follows a fatal failure.
    Failed(TransportError),
    Closed { code: CloseCode, reason: String },
}

/// A transport event tagged with the session that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionEvent {
    pub generation: Generation,
    pub event: TransportEvent,
}

/// Sending half handed to a transport session.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn new(generation: Generation, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Delivers an event; returns false once the client is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Owner's handle to an open session.
///
/// Dropping the handle closes the session intentionally.
#[derive(Debug)]
pub struct SessionHandle {
    generation: Generation,
    close_tx: Option<oneshot::Sender<CloseRequest>>,
}

impl SessionHandle {
    /// Creates a handle and the signal the session task waits on.
    pub fn new(generation: Generation) -> (Self, CloseSignal) {
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self {
                generation,
                close_tx: Some(close_tx),
            },
            CloseSignal {
                rx: Some(close_rx),
            },
        )
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Requests shutdown of the session.
    pub fn close(mut self, request: CloseRequest) {
        self.send_close(request);
    }

    fn send_close(&mut self, request: CloseRequest) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(request);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.send_close(CloseRequest::intentional("session handle dropped"));
    }
}

/// Receiving half of a session's close request.
#[derive(Debug)]
pub struct CloseSignal {
    rx: Option<oneshot::Receiver<CloseRequest>>,
}

impl CloseSignal {
    /// Waits for the owner to close the session. Resolves once; later calls
    /// never resolve.
    pub async fn recv(&mut self) -> CloseRequest {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        let request = rx
            .await
            .unwrap_or_else(|_| CloseRequest::intentional("session handle dropped"));
        self.rx = None;
        request
    }

    /// Non-blocking check used by in-memory transports.
    pub fn try_recv(&mut self) -> Option<CloseRequest> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(request) => {
                self.rx = None;
                Some(request)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                Some(CloseRequest::intentional("session handle dropped"))
            }
        }
    }
}

/// Opens transport sessions for job stream endpoints.
pub trait Transport: Send + Sync {
    /// Starts one connection to `endpoint`; lifecycle events go to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    fn open(&self, endpoint: &str, sink: EventSink) -> SessionHandle;
}

/// Decodes one text frame, dropping malformed payloads with a warning.
pub fn decode_frame(text: &str) -> Option<RawEvent> {
    match RawEvent::from_json(text) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, bytes = text.len(), "dropping malformed stream message");
            None
        }
    }
}

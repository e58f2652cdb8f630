use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::errors::TransportError;

use super::{
    CloseCode, CloseSignal, EventSink, SessionHandle, Transport, TransportEvent, decode_frame,
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Transport backed by `tokio-tungstenite`; one spawned task per session.
#[derive(Clone, Debug, Default)]
pub struct WebSocketTransport {
    connect_timeout: Option<Duration>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the connect timeout from `config`.
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
        }
    }

    /// Limits each connection attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, endpoint: &str, sink: EventSink) -> SessionHandle {
        let (handle, close) = SessionHandle::new(sink.generation());
        tokio::spawn(run_session(
            endpoint.to_string(),
            self.connect_timeout,
            sink,
            close,
        ));
        handle
    }
}

async fn run_session(
    endpoint: String,
    connect_timeout: Option<Duration>,
    sink: EventSink,
    mut close: CloseSignal,
) {
    let generation = sink.generation();

    let connected = tokio::select! {
        request = close.recv() => {
            debug!(%generation, reason = %request.reason, "session closed before connect finished");
            return;
        }
        result = connect(&endpoint, connect_timeout) => result,
    };
    let stream = match connected {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%generation, error = %err, "stream connect failed");
            let reason = err.to_string();
            if sink.emit(TransportEvent::Failed(err)).await {
                let _ = sink
                    .emit(TransportEvent::Closed {
                        code: CloseCode::ABNORMAL,
                        reason,
                    })
                    .await;
            }
            return;
        }
    };

    info!(%generation, endpoint = %endpoint, "stream connection established");
    if !sink.emit(TransportEvent::Opened).await {
        return;
    }

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            request = close.recv() => {
                let frame = CloseFrame {
                    code: request.code.0.into(),
                    reason: request.reason.clone().into(),
                };
                if let Err(err) = writer.send(Message::Close(Some(frame))).await {
                    debug!(%generation, error = %err, "close frame not delivered");
                }
                let _ = sink
                    .emit(TransportEvent::Closed {
                        code: request.code,
                        reason: request.reason,
                    })
                    .await;
                return;
            }
            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(&text)
                            && !sink.emit(TransportEvent::Message(event)).await
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            if let Some(event) = decode_frame(text)
                                && !sink.emit(TransportEvent::Message(event)).await
                            {
                                return;
                            }
                        }
                        Err(_) => warn!(%generation, bytes = bytes.len(), "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (CloseCode(u16::from(f.code)), f.reason.into_owned()))
                            .unwrap_or((CloseCode::NO_STATUS, String::new()));
                        info!(%generation, %code, reason = %reason, "stream closed by remote");
                        let _ = sink.emit(TransportEvent::Closed { code, reason }).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%generation, error = %err, "stream read failed");
                        let reason = err.to_string();
                        if sink.emit(TransportEvent::Failed(TransportError::io(reason.clone()))).await {
                            let _ = sink
                                .emit(TransportEvent::Closed { code: CloseCode::ABNORMAL, reason })
                                .await;
                        }
                        return;
                    }
                    None => {
                        let _ = sink
                            .emit(TransportEvent::Closed {
                                code: CloseCode::ABNORMAL,
                                reason: "stream ended without close frame".into(),
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

async fn connect(endpoint: &str, timeout: Option<Duration>) -> Result<WsStream, TransportError> {
    let attempt = tokio_tungstenite::connect_async(endpoint);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| TransportError::timeout(endpoint))?,
        None => attempt.await,
    };
    result
        .map(|(stream, _response)| stream)
        .map_err(|e| TransportError::connect(endpoint, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use crate::supervisor::Generation;
    use crate::transport::{CloseRequest, SessionEvent};
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;

    async fn collect_until_closed(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("event within timeout")
                .expect("sink open");
            let closed = matches!(next.event, TransportEvent::Closed { .. });
            events.push(next.event);
            if closed {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn streams_frames_in_order_and_reports_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            for frame in [
                r#"{"type":"progress","session_id":"J1","step":"Discovery","progress":10}"#,
                "{not json",
                r#"{"type":"log","session_id":"J1","message":"scanning 42 files"}"#,
            ] {
                ws.send(Message::Text(frame.into())).await.expect("send");
            }
            ws.close(Some(CloseFrame {
                code: WsCloseCode::Away,
                reason: "restarting".into(),
            }))
            .await
            .expect("close");
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = mpsc::channel(16);
        let _handle = WebSocketTransport::new().open(
            &format!("ws://{addr}/ws/sessions/J1"),
            EventSink::new(Generation::new(7), tx),
        );

        let events = collect_until_closed(&mut rx).await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Opened,
                TransportEvent::Message(RawEvent::Progress {
                    session_id: Some("J1".into()),
                    step: Some("Discovery".into()),
                    progress: Some(10),
                    message: None,
                }),
                TransportEvent::Message(RawEvent::Log {
                    session_id: Some("J1".into()),
                    message: Some("scanning 42 files".into()),
                }),
                TransportEvent::Closed {
                    code: CloseCode::GOING_AWAY,
                    reason: "restarting".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn intentional_close_sends_normal_code_to_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (seen_tx, seen_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(frame) = message {
                    let _ = seen_tx.send(frame.map(|f| u16::from(f.code)));
                    break;
                }
            }
        });

        let (tx, mut rx) = mpsc::channel(16);
        let handle = WebSocketTransport::new().open(
            &format!("ws://{addr}/ws/sessions/J1"),
            EventSink::new(Generation::new(1), tx),
        );
        let opened = rx.recv().await.expect("opened");
        assert_eq!(opened.event, TransportEvent::Opened);

        handle.close(CloseRequest::intentional("done"));
        let events = collect_until_closed(&mut rx).await;
        assert_eq!(
            events,
            vec![TransportEvent::Closed {
                code: CloseCode::NORMAL,
                reason: "done".into(),
            }]
        );
        let code = tokio::time::timeout(Duration::from_secs(5), seen_rx)
            .await
            .expect("server saw close")
            .expect("server task alive");
        assert_eq!(code, Some(1000));
    }

    #[tokio::test]
    async fn refused_connection_reports_failure_then_abnormal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (tx, mut rx) = mpsc::channel(16);
        let _handle = WebSocketTransport::new().open(
            &format!("ws://{addr}/ws/sessions/J1"),
            EventSink::new(Generation::new(2), tx),
        );

        let events = collect_until_closed(&mut rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            TransportEvent::Failed(TransportError::Connect { .. })
        ));
        assert!(matches!(
            &events[1],
            TransportEvent::Closed { code, .. } if *code == CloseCode::ABNORMAL
        ));
    }
}

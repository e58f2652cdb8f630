//! Stream client: one actor task per client owns the supervisor, the view
//! model and the live session handle. Commands from the public handle and
//! events from every transport session arrive on channels consumed only by
//! that task, so all state transitions are serialized.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::config::StreamConfig;
use crate::errors::StreamError;
use crate::event::JobId;
use crate::reducer::{reduce, reduce_connection};
use crate::supervisor::{CloseOutcome, ConnectionPhase, Generation, ReconnectSupervisor};
use crate::transport::{CloseRequest, EventSink, SessionEvent, SessionHandle, Transport, TransportEvent};
use crate::view::ViewModel;

#[derive(Debug)]
enum Command {
    Enable(JobId),
    Disable,
    Reset,
}

/// Handle to a running stream client.
///
/// Dropping the handle stops the client task, closing any open session
/// intentionally and cancelling a pending reconnect.
pub struct StreamClient {
    client_id: uuid::Uuid,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ViewModel>,
    phase: watch::Receiver<ConnectionPhase>,
    job: watch::Receiver<Option<JobId>>,
}

impl StreamClient {
    /// Validates `config` and starts the client task on the current runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let client_id = uuid::Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer_capacity);
        let (view_tx, view_rx) = watch::channel(ViewModel::default());
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Idle);
        let (job_tx, job_rx) = watch::channel(None);

        let actor = StreamActor {
            supervisor: ReconnectSupervisor::new(config.reconnect.clone()),
            transport,
            config,
            job: None,
            live: None,
            retry_at: None,
            event_tx,
            view: view_tx,
            phase: phase_tx,
            job_id: job_tx,
        };
        tokio::spawn(
            actor
                .run(command_rx, event_rx)
                .instrument(info_span!(
                    "stream_client",
                    %client_id,
                    job_id = tracing::field::Empty
                )),
        );

        Ok(Self {
            client_id,
            commands: command_tx,
            view: view_rx,
            phase: phase_rx,
            job: job_rx,
        })
    }

    /// Applies the `(job_id, enabled)` pair a consumer currently holds.
    ///
    /// `enabled` with a job id connects (or keeps the connection); anything
    /// else tears the stream down without connecting.
    pub fn set(&self, job_id: Option<JobId>, enabled: bool) {
        match (job_id, enabled) {
            (Some(job_id), true) => self.enable(job_id),
            (None, true) => {
                debug!(client_id = %self.client_id, "enable without job id ignored");
                self.disable();
            }
            (_, false) => self.disable(),
        }
    }

    /// Binds the client to `job_id` and starts streaming.
    ///
    /// A different job id than the bound one starts a new run from a fresh
    /// view model.
    pub fn enable(&self, job_id: impl Into<JobId>) {
        self.send(Command::Enable(job_id.into()));
    }

    /// Closes the live session intentionally and cancels any pending retry.
    pub fn disable(&self) {
        self.send(Command::Disable);
    }

    /// Clears the view model and cancels retries without reconnecting.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Current view model snapshot.
    pub fn view(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view model change.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    /// Current supervisor phase.
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// Receiver notified on every supervisor phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.clone()
    }

    /// Job the client is bound to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        self.job.borrow().clone()
    }

    pub fn client_id(&self) -> uuid::Uuid {
        self.client_id
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(client_id = %self.client_id, "stream client task is gone");
        }
    }
}

struct StreamActor {
    supervisor: ReconnectSupervisor,
    transport: Arc<dyn Transport>,
    config: StreamConfig,
    job: Option<JobId>,
    live: Option<SessionHandle>,
    retry_at: Option<Instant>,
    event_tx: mpsc::Sender<SessionEvent>,
    view: watch::Sender<ViewModel>,
    phase: watch::Sender<ConnectionPhase>,
    job_id: watch::Sender<Option<JobId>>,
}

impl StreamActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown("client dropped");
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_session_event(event),
                _ = wait_until(self.retry_at) => {
                    self.retry_at = None;
                    if let Some(generation) = self.supervisor.retry_due() {
                        info!(%generation, attempt = self.supervisor.attempts(), "reconnecting");
                        self.open_session(generation);
                    }
                }
            }
            self.publish_phase();
        }
        debug!("stream client stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enable(job_id) => {
                if self.job.as_ref() != Some(&job_id) {
                    if self.job.is_some() {
                        self.clear("job changed");
                    }
                    tracing::Span::current().record("job_id", tracing::field::display(&job_id));
                    info!(job_id = %job_id, "binding stream to job");
                    self.job = Some(job_id.clone());
                    self.job_id.send_replace(Some(job_id));
                }
                if let Some(generation) = self.supervisor.enable() {
                    self.open_session(generation);
                }
            }
            Command::Disable => self.teardown("stream disabled"),
            Command::Reset => self.clear("stream reset"),
        }
    }

    fn handle_session_event(&mut self, SessionEvent { generation, event }: SessionEvent) {
        if !self.supervisor.is_live(generation) {
            debug!(%generation, "dropping event from stale session");
            return;
        }

        match event {
            TransportEvent::Opened => {
                if self.supervisor.opened(generation) {
                    info!(%generation, "stream connected");
                    self.update_view(|view| reduce_connection(view, true));
                }
            }
            TransportEvent::Message(raw) => {
                debug!(%generation, kind = raw.kind(), "stream event");
                self.update_view(|view| reduce(view, &raw));
                if self.view.borrow().is_terminal()
                    && self.supervisor.phase() != ConnectionPhase::Terminal
                {
                    info!(%generation, kind = raw.kind(), "job reached terminal state");
                    self.supervisor.job_finished();
                }
            }
            TransportEvent::Failed(err) => {
                warn!(%generation, error = %err, "transport failure");
            }
            TransportEvent::Closed { code, reason } => {
                // The session already ended; dropping its handle is harmless.
                self.live = None;
                self.update_view(|view| reduce_connection(view, false));
                match self.supervisor.closed(generation, code) {
                    CloseOutcome::Retry(delay) => {
                        info!(%generation, %code, reason = %reason, delay_ms = delay.as_millis() as u64, "stream dropped; scheduling reconnect");
                        self.retry_at = Some(Instant::now() + delay);
                    }
                    CloseOutcome::Parked => {
                        warn!(%generation, %code, reason = %reason, attempts = self.supervisor.attempts(), "stream closed; not reconnecting");
                    }
                    CloseOutcome::Finished => {
                        debug!(%generation, %code, "stream closed after terminal event");
                    }
                    CloseOutcome::Stale => {}
                }
            }
        }
    }

    fn open_session(&mut self, generation: Generation) {
        let Some(job) = self.job.as_ref() else {
            return;
        };
        if let Some(previous) = self.live.take() {
            previous.close(CloseRequest::intentional("superseded"));
        }
        let endpoint = self.config.session_endpoint(job);
        info!(%generation, job_id = %job, endpoint = %endpoint, "opening stream session");
        let sink = EventSink::new(generation, self.event_tx.clone());
        self.live = Some(self.transport.open(&endpoint, sink));
    }

    /// Intentional close and timer cancel; the view model is kept.
    fn teardown(&mut self, reason: &str) {
        self.retry_at = None;
        self.supervisor.disable();
        self.close_live(reason);
        self.update_view(|view| reduce_connection(view, false));
    }

    /// Intentional close, timer cancel and a fresh view model.
    fn clear(&mut self, reason: &str) {
        self.retry_at = None;
        self.supervisor.reset();
        self.close_live(reason);
        self.view.send_if_modified(|view| {
            let fresh = ViewModel::default();
            if *view == fresh {
                return false;
            }
            *view = fresh;
            true
        });
    }

    fn close_live(&mut self, reason: &str) {
        if let Some(handle) = self.live.take() {
            info!(generation = %handle.generation(), reason, "closing stream session");
            handle.close(CloseRequest::intentional(reason));
        }
    }

    fn update_view(&self, transition: impl FnOnce(ViewModel) -> ViewModel) {
        self.view.send_if_modified(|view| {
            let next = transition(view.clone());
            if next == *view {
                return false;
            }
            *view = next;
            true
        });
    }

    fn publish_phase(&self) {
        let phase = self.supervisor.phase();
        self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::event::RawEvent;
    use crate::reducer::COMPLETE_LOG_LINE;
    use crate::transport::{CloseCode, CloseSignal};
    use std::time::Duration;

    struct OpenedSession {
        endpoint: String,
        sink: EventSink,
        close: CloseSignal,
    }

    impl OpenedSession {
        async fn emit(&self, event: TransportEvent) {
            assert!(self.sink.emit(event).await, "client task alive");
        }

        async fn message(&self, json: &str) {
            self.emit(TransportEvent::Message(
                RawEvent::from_json(json).expect("valid event"),
            ))
            .await;
        }

        async fn drop_abnormally(&self) {
            self.emit(TransportEvent::Closed {
                code: CloseCode::ABNORMAL,
                reason: "network reset".into(),
            })
            .await;
        }
    }

    /// In-memory transport that hands every opened session to the test.
    struct ScriptedTransport {
        opened: mpsc::UnboundedSender<OpenedSession>,
    }

    impl Transport for ScriptedTransport {
        fn open(&self, endpoint: &str, sink: EventSink) -> SessionHandle {
            let (handle, close) = SessionHandle::new(sink.generation());
            let _ = self.opened.send(OpenedSession {
                endpoint: endpoint.to_string(),
                sink,
                close,
            });
            handle
        }
    }

    fn client() -> (StreamClient, mpsc::UnboundedReceiver<OpenedSession>) {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let client = StreamClient::spawn(
            Arc::new(ScriptedTransport { opened: opened_tx }),
            StreamConfig::default(),
        )
        .expect("spawn client");
        (client, opened_rx)
    }

    async fn next_session(opened: &mut mpsc::UnboundedReceiver<OpenedSession>) -> OpenedSession {
        tokio::time::timeout(Duration::from_secs(60), opened.recv())
            .await
            .expect("session opened in time")
            .expect("transport alive")
    }

    async fn connected_session(
        client: &StreamClient,
        opened: &mut mpsc::UnboundedReceiver<OpenedSession>,
    ) -> OpenedSession {
        let session = next_session(opened).await;
        session.emit(TransportEvent::Opened).await;
        wait_view(client, |v| v.is_connected).await;
        session
    }

    async fn wait_view(client: &StreamClient, predicate: impl FnMut(&ViewModel) -> bool) -> ViewModel {
        let mut rx = client.subscribe();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("view reached expected state")
            .expect("client alive")
            .clone()
    }

    async fn wait_phase(client: &StreamClient, phase: ConnectionPhase) {
        let mut rx = client.subscribe_phase();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|p| *p == phase))
            .await
            .expect("phase reached")
            .expect("client alive");
    }

    async fn assert_no_session_opens(opened: &mut mpsc::UnboundedReceiver<OpenedSession>) {
        let next = tokio::time::timeout(Duration::from_secs(30), opened.recv()).await;
        assert!(next.is_err(), "unexpected reconnect");
    }

    #[tokio::test(start_paused = true)]
    async fn progress_then_log_are_reduced_in_order() {
        let (client, mut opened) = client();
        client.set(Some(JobId::from("J1")), true);
        let session = connected_session(&client, &mut opened).await;
        assert_eq!(session.endpoint, "ws://127.0.0.1:8000/ws/sessions/J1");
        assert_eq!(client.job_id(), Some(JobId::from("J1")));
        assert_eq!(client.phase(), ConnectionPhase::Connected);

        session
            .message(r#"{"type":"progress","session_id":"J1","step":"Discovery","progress":10}"#)
            .await;
        let view = wait_view(&client, |v| v.progress == 10).await;
        assert_eq!(view.step, "Discovery");
        assert!(view.logs.is_empty());

        session
            .message(r#"{"type":"log","session_id":"J1","message":"scanning 42 files"}"#)
            .await;
        let view = wait_view(&client, |v| !v.logs.is_empty()).await;
        assert_eq!(view.logs, vec!["scanning 42 files".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_without_job_id_opens_nothing() {
        let (client, mut opened) = client();
        client.set(None, true);
        assert_no_session_opens(&mut opened).await;
        assert_eq!(client.phase(), ConnectionPhase::Idle);
        assert_eq!(client.view(), ViewModel::default());
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_after_fixed_delay() {
        let (client, mut opened) = client();
        client.enable("J1");
        let first = connected_session(&client, &mut opened).await;
        first.message(r#"{"type":"log","message":"line 1"}"#).await;

        first.drop_abnormally().await;
        let view = wait_view(&client, |v| !v.is_connected).await;
        assert_eq!(view.logs, vec!["line 1".to_string()]);
        wait_phase(&client, ConnectionPhase::Retrying).await;
        let dropped_at = Instant::now();

        let second = next_session(&mut opened).await;
        assert!(dropped_at.elapsed() >= Duration::from_millis(2_000));
        assert_eq!(second.endpoint, first.endpoint);
        assert!(second.sink.generation() > first.sink.generation());

        second.emit(TransportEvent::Opened).await;
        second.message(r#"{"type":"log","message":"line 2"}"#).await;
        let view = wait_view(&client, |v| v.logs.len() == 2).await;
        assert!(view.is_connected);
        assert_eq!(view.logs, vec!["line 1".to_string(), "line 2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_events_are_ignored() {
        let (client, mut opened) = client();
        client.enable("J1");
        let first = connected_session(&client, &mut opened).await;
        first.drop_abnormally().await;
        let second = next_session(&mut opened).await;
        second.emit(TransportEvent::Opened).await;
        second.message(r#"{"type":"progress","step":"Build Graph","progress":50}"#).await;
        let expected = wait_view(&client, |v| v.progress == 50).await;

        first.message(r#"{"type":"error","error":"late ghost"}"#).await;
        first.message(r#"{"type":"log","message":"ghost line"}"#).await;
        first.drop_abnormally().await;
        second.message(r#"{"type":"log","message":"after ghost"}"#).await;

        let view = wait_view(&client, |v| !v.logs.is_empty()).await;
        assert_eq!(view.logs, vec!["after ghost".to_string()]);
        assert_eq!(view.error, None);
        assert_eq!(view.step, expected.step);
        assert!(view.is_connected);
        assert_eq!(client.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_is_terminal_even_if_socket_drops() {
        let (client, mut opened) = client();
        client.enable("J1");
        let session = connected_session(&client, &mut opened).await;
        session
            .message(r#"{"type":"error","error":"parse failure","trace":"at line 1"}"#)
            .await;
        let view = wait_view(&client, |v| v.error.is_some()).await;
        assert_eq!(view.error.as_deref(), Some("parse failure"));
        assert_eq!(view.trace.as_deref(), Some("at line 1"));
        assert!(!view.is_complete);
        wait_phase(&client, ConnectionPhase::Terminal).await;

        session.drop_abnormally().await;
        wait_view(&client, |v| !v.is_connected).await;
        assert_no_session_opens(&mut opened).await;
        assert_eq!(client.phase(), ConnectionPhase::Terminal);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_is_terminal_and_replay_is_idempotent() {
        let (client, mut opened) = client();
        client.enable("J1");
        let session = connected_session(&client, &mut opened).await;
        session.message(r#"{"type":"complete","session_id":"J1"}"#).await;
        session.message(r#"{"type":"complete","session_id":"J1"}"#).await;
        session.drop_abnormally().await;

        let view = wait_view(&client, |v| v.is_complete && !v.is_connected).await;
        assert_eq!(view.progress, 100);
        assert_eq!(
            view.logs.iter().filter(|l| *l == COMPLETE_LOG_LINE).count(),
            1
        );
        assert_no_session_opens(&mut opened).await;
        assert_eq!(client.phase(), ConnectionPhase::Terminal);

        client.enable("J1");
        assert_no_session_opens(&mut opened).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disable_closes_intentionally_and_cancels_pending_retry() {
        let (client, mut opened) = client();
        client.enable("J1");
        let mut first = connected_session(&client, &mut opened).await;

        client.disable();
        let request = tokio::time::timeout(Duration::from_secs(5), first.close.recv())
            .await
            .expect("close requested");
        assert_eq!(request.code, CloseCode::NORMAL);
        wait_phase(&client, ConnectionPhase::Idle).await;

        client.enable("J1");
        let second = connected_session(&client, &mut opened).await;
        second.drop_abnormally().await;
        wait_phase(&client, ConnectionPhase::Retrying).await;
        client.disable();
        wait_phase(&client, ConnectionPhase::Idle).await;
        assert_no_session_opens(&mut opened).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_initial_view_without_reconnecting() {
        let (client, mut opened) = client();
        client.enable("J1");
        let mut session = connected_session(&client, &mut opened).await;
        session
            .message(r#"{"type":"progress","step":"Assertions","progress":70,"message":"checking"}"#)
            .await;
        session.message(r#"{"type":"error","error":"boom","trace":"t"}"#).await;
        wait_view(&client, |v| v.error.is_some()).await;

        client.reset();
        let view = wait_view(&client, |v| *v == ViewModel::default()).await;
        assert_eq!(view, ViewModel::default());
        let request = tokio::time::timeout(Duration::from_secs(5), session.close.recv())
            .await
            .expect("close requested");
        assert!(request.code.is_normal());
        assert_no_session_opens(&mut opened).await;
        assert_eq!(client.phase(), ConnectionPhase::Idle);

        client.enable("J1");
        let fresh = connected_session(&client, &mut opened).await;
        fresh.message(r#"{"type":"log","message":"second run"}"#).await;
        let view = wait_view(&client, |v| !v.logs.is_empty()).await;
        assert_eq!(view.logs, vec!["second run".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_while_retrying_cancels_the_pending_reconnect() {
        let (client, mut opened) = client();
        client.enable("J1");
        let session = connected_session(&client, &mut opened).await;
        session
            .message(r#"{"type":"progress","step":"Discovery","progress":10,"message":"walking tree"}"#)
            .await;
        wait_view(&client, |v| v.progress == 10).await;

        session.drop_abnormally().await;
        wait_phase(&client, ConnectionPhase::Retrying).await;
        client.reset();
        wait_phase(&client, ConnectionPhase::Idle).await;

        assert_no_session_opens(&mut opened).await;
        assert_eq!(client.view(), ViewModel::default());
        assert_eq!(client.phase(), ConnectionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_jobs_starts_a_fresh_run() {
        let (client, mut opened) = client();
        client.enable("J1");
        let mut first = connected_session(&client, &mut opened).await;
        first.message(r#"{"type":"complete"}"#).await;
        wait_phase(&client, ConnectionPhase::Terminal).await;

        client.enable("J2");
        let second = next_session(&mut opened).await;
        assert_eq!(second.endpoint, "ws://127.0.0.1:8000/ws/sessions/J2");
        assert!(first.close.try_recv().is_some());
        let view = client.view();
        assert!(!view.is_complete);
        assert!(view.logs.is_empty());
        assert_eq!(client.job_id(), Some(JobId::from("J2")));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_stops_reconnecting() {
        let (opened_tx, mut opened) = mpsc::unbounded_channel();
        let client = StreamClient::spawn(
            Arc::new(ScriptedTransport { opened: opened_tx }),
            StreamConfig::default().reconnect(
                ReconnectPolicy::fixed(Duration::from_millis(100)).with_max_attempts(1),
            ),
        )
        .expect("spawn");
        client.enable("J1");
        let first = next_session(&mut opened).await;
        first.drop_abnormally().await;
        let second = next_session(&mut opened).await;
        second.drop_abnormally().await;
        wait_phase(&client, ConnectionPhase::Idle).await;
        assert_no_session_opens(&mut opened).await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_client_closes_live_session() {
        let (client, mut opened) = client();
        client.enable("J1");
        let mut session = connected_session(&client, &mut opened).await;
        drop(client);
        let request = tokio::time::timeout(Duration::from_secs(5), session.close.recv())
            .await
            .expect("close requested");
        assert!(request.code.is_normal());
    }

    #[test]
    fn spawn_rejects_invalid_config() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let _guard = runtime.enter();
        let (opened_tx, _opened_rx) = mpsc::unbounded_channel();
        let result = StreamClient::spawn(
            Arc::new(ScriptedTransport { opened: opened_tx }),
            StreamConfig::default().event_buffer_capacity(0),
        );
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}

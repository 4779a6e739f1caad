use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::events::{
    parse_socket_frame, EventContext, EventDispatcher, HandlerResult, OutboundMessage, SlackEnvelope,
    SlackEvent, SocketFrame,
};
use crate::web::{MessagingSurface, SlackWebClient};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("slack requested reconnect: {0}")]
    ReconnectRequested(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// Next envelope, or `None` once the server closed the stream.
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket Mode over a real WebSocket. Each `connect` asks the Web API for a
/// fresh URL with the app-level token.
pub struct SlackSocketTransport {
    web: SlackWebClient,
    app_token: SecretString,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    writer: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
}

impl SlackSocketTransport {
    pub fn new(web: SlackWebClient, app_token: SecretString) -> Self {
        Self { web, app_token, reader: Mutex::new(None), writer: Mutex::new(None) }
    }
}

#[async_trait]
impl SocketTransport for SlackSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .web
            .open_connection(&self.app_token)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock().await = Some(reader);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(TransportError::Receive("not connected".to_owned()));
        };

        while let Some(message) = reader.next().await {
            let message = message.map_err(|error| TransportError::Receive(error.to_string()))?;
            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            };
            match parse_socket_frame(&text) {
                Ok(SocketFrame::Hello) => debug!(event_name = "ingress.slack.hello", "socket mode session ready"),
                Ok(SocketFrame::Disconnect { reason }) => {
                    return Err(TransportError::ReconnectRequested(reason));
                }
                Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                Err(error) => {
                    warn!(event_name = "ingress.slack.frame_rejected", error = %error, "dropping unreadable socket frame");
                }
            }
        }
        Ok(None)
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::Acknowledge("not connected".to_owned()));
        };
        let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
        writer
            .send(WsMessage::Text(ack))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        writer.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

/// Why a session ended with an error, and whether it had connected first.
struct SessionFailure {
    error: TransportError,
    connected: bool,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    surface: Arc<dyn MessagingSurface>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        surface: Arc<dyn MessagingSurface>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), surface, reconnect_policy }
    }

    /// Runs until the server closes the stream or retries are exhausted.
    /// Consecutive failures are counted from the last successful connection.
    pub async fn start(&self) {
        let mut failures = 0_u32;
        loop {
            let Err(failure) = self.connect_and_pump(failures).await else {
                return;
            };
            if failure.connected {
                failures = 0;
            }
            warn!(
                event_name = "ingress.slack.transport_failed",
                attempt = failures,
                max_retries = self.reconnect_policy.max_retries,
                error = %failure.error,
                "socket mode transport failed"
            );

            if failures >= self.reconnect_policy.max_retries {
                warn!(
                    event_name = "ingress.slack.retries_exhausted",
                    max_retries = self.reconnect_policy.max_retries,
                    "socket mode retries exhausted; continuing process without crash"
                );
                return;
            }

            let delay = self.reconnect_policy.backoff(failures);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            failures += 1;
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), SessionFailure> {
        info!(attempt, "opening socket mode transport connection");
        self.transport
            .connect()
            .await
            .map_err(|error| SessionFailure { error, connected: false })?;
        info!(attempt, "socket mode transport connected");

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        loop {
            in_flight.retain(|handle| !handle.is_finished());
            let envelope = match self.transport.next_envelope().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(error) => return Err(SessionFailure { error, connected: true }),
            };
            let (channel_id, user_id) = correlation_fields(&envelope);

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                channel_id = channel_id.unwrap_or("unknown"),
                user_id = user_id.unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_failed",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged slack envelope"
                );
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let surface = Arc::clone(&self.surface);
            in_flight.push(tokio::spawn(async move {
                handle_envelope(&dispatcher, surface.as_ref(), envelope).await;
            }));
        }

        info!(attempt, "socket mode transport stream closed");
        for handle in in_flight {
            if let Err(error) = handle.await {
                warn!(error = %error, "envelope task ended abnormally");
            }
        }
        self.transport.disconnect().await.map_err(|error| SessionFailure { error, connected: true })
    }
}

async fn handle_envelope(dispatcher: &EventDispatcher, surface: &dyn MessagingSurface, envelope: SlackEnvelope) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(outbound)) => {
            for message in &outbound {
                deliver(surface, message, &context.correlation_id).await;
            }
        }
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
        Err(error) => {
            warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %context.correlation_id,
                error = %error,
                "event dispatch failed; continuing socket loop"
            );
        }
    }
}

async fn deliver(surface: &dyn MessagingSurface, outbound: &OutboundMessage, correlation_id: &str) {
    let result = match &outbound.update_ts {
        Some(message_ts) => surface.update_message(&outbound.channel_id, message_ts, &outbound.message).await,
        None => surface
            .post_message(&outbound.channel_id, &outbound.message, outbound.thread_ts.as_deref())
            .await
            .map(|_| ()),
    };
    if let Err(error) = result {
        warn!(
            event_name = "egress.slack.delivery_failed",
            correlation_id,
            channel_id = %outbound.channel_id,
            update = outbound.update_ts.is_some(),
            error = %error,
            "failed to deliver slack message"
        );
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (Option<&str>, Option<&str>) {
    match &envelope.event {
        SlackEvent::Message(event) => (Some(event.channel_id.as_str()), Some(event.user_id.as_str())),
        SlackEvent::BlockAction(event) => (Some(event.channel_id.as_str()), Some(event.user_id.as_str())),
        SlackEvent::Unsupported { .. } => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
    use crate::blocks::{reply_message, MessageTemplate};
    use crate::events::{
        agent_dispatcher, BlockActionEvent, BlockActionResponse, BlockActionService, EventContext,
        EventDispatcher, EventHandlerError, InboundMessageService, MessageEvent, SlackEnvelope, SlackEvent,
    };
    use crate::web::{RecordingSurface, SentMessage};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl InboundMessageService for Echo {
        async fn handle_message(
            &self,
            event: &MessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            Ok(Some(reply_message(&format!("echo: {}", event.text), Vec::new())))
        }
    }

    struct NoActions;

    #[async_trait]
    impl BlockActionService for NoActions {
        async fn handle_block_action(
            &self,
            _event: &BlockActionEvent,
            _ctx: &EventContext,
        ) -> Result<BlockActionResponse, EventHandlerError> {
            Ok(BlockActionResponse::default())
        }
    }

    fn unsupported(envelope_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: envelope_id.to_owned(),
            event: SlackEvent::Unsupported { event_type: "test".to_owned() },
        }
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(unsupported("env-1"))), Ok(None)],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            Arc::new(RecordingSurface::new()),
            no_delay(2),
        );

        runner.start().await;

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            Arc::new(RecordingSurface::new()),
            no_delay(2),
        );

        runner.start().await;
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn a_connected_session_resets_the_failure_count() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Ok(()),
            ],
            vec![Err(TransportError::ReconnectRequested("refresh_requested".to_owned())), Ok(None)],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            Arc::new(RecordingSurface::new()),
            no_delay(2),
        );

        runner.start().await;
        assert_eq!(transport.connect_attempts().await, 4);
    }

    #[tokio::test]
    async fn replies_are_delivered_before_start_returns() {
        let message = MessageEvent {
            channel_id: "D1".to_owned(),
            channel_type: Some("im".to_owned()),
            user_id: "U1".to_owned(),
            text: "list clients".to_owned(),
            ts: "1.0".to_owned(),
            ..MessageEvent::default()
        };
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(SlackEnvelope { envelope_id: "env-7".to_owned(), event: SlackEvent::Message(message) })),
                Ok(None),
            ],
        ));
        let surface = RecordingSurface::new();

        let runner = SocketModeRunner::new(
            transport.clone(),
            agent_dispatcher(Echo, NoActions),
            Arc::new(surface.clone()),
            no_delay(0),
        );
        runner.start().await;

        let sent = surface.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            SentMessage::Posted { channel_id, thread_ts: None, message }
                if channel_id == "D1" && message.fallback_text == "echo: list clients"
        ));
    }

    #[tokio::test]
    async fn delivery_failures_do_not_stop_the_loop() {
        let message = MessageEvent {
            channel_id: "D1".to_owned(),
            user_id: "U1".to_owned(),
            text: "hi".to_owned(),
            ts: "1.0".to_owned(),
            ..MessageEvent::default()
        };
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(SlackEnvelope { envelope_id: "env-1".to_owned(), event: SlackEvent::Message(message) })),
                Ok(Some(unsupported("env-2"))),
                Ok(None),
            ],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            agent_dispatcher(Echo, NoActions),
            Arc::new(RecordingSurface::failing()),
            no_delay(0),
        );
        runner.start().await;

        assert_eq!(transport.acknowledgements().await, vec!["env-1", "env-2"]);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(2).as_millis(), 1_000);
        assert_eq!(policy.backoff(10).as_millis(), 5_000);
    }
}

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::blocks::MessageTemplate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessageEvent),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    BlockAction,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    /// `im`, `channel`, `group` or `mpim` as sent by Slack.
    pub channel_type: Option<String>,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl MessageEvent {
    /// Bot echoes, edits and joins are not user requests.
    pub fn is_user_message(&self) -> bool {
        self.bot_id.is_none()
            && self.subtype.is_none()
            && !self.user_id.is_empty()
            && !self.text.trim().is_empty()
    }

    /// Replies stay in the thread they came from. Top-level channel messages
    /// get a thread of their own; DMs are answered inline.
    pub fn reply_thread_ts(&self) -> Option<String> {
        if let Some(thread_ts) = &self.thread_ts {
            return Some(thread_ts.clone());
        }
        match self.channel_type.as_deref() {
            Some("im") => None,
            _ if self.channel_id.starts_with('D') => None,
            _ => Some(self.ts.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
    pub action_id: String,
    pub value: Option<String>,
    /// Fallback text of the message the button sits on.
    pub message_text: Option<String>,
}

/// A frame read off the Socket Mode connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    /// Slack asks the client to reconnect, for example before rotating hosts.
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEventsApiPayload {
    event: RawEvent,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInteractivePayload {
    #[serde(rename = "type")]
    interaction_type: String,
    user: RawId,
    #[serde(default)]
    channel: Option<RawId>,
    #[serde(default)]
    container: Option<RawContainer>,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawContainer {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    message_ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameParseError {
    #[error("frame is not valid json: {0}")]
    Json(String),
    #[error("frame of type `{0}` has no envelope id")]
    MissingEnvelopeId(String),
    #[error("malformed `{frame_type}` payload: {detail}")]
    Payload { frame_type: String, detail: String },
}

/// Decodes one Socket Mode text frame.
///
/// Event and interaction shapes this bot does not act on still decode, as
/// [`SlackEvent::Unsupported`], so they get acknowledged.
pub fn parse_socket_frame(raw: &str) -> Result<SocketFrame, FrameParseError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|error| FrameParseError::Json(error.to_string()))?;

    match frame.frame_type.as_str() {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            return Ok(SocketFrame::Disconnect {
                reason: frame.reason.unwrap_or_else(|| "unspecified".to_owned()),
            })
        }
        _ => {}
    }

    let envelope_id = frame
        .envelope_id
        .clone()
        .ok_or_else(|| FrameParseError::MissingEnvelopeId(frame.frame_type.clone()))?;
    let payload = frame.payload.unwrap_or(serde_json::Value::Null);
    let payload_error = |error: serde_json::Error| FrameParseError::Payload {
        frame_type: frame.frame_type.clone(),
        detail: error.to_string(),
    };

    let event = match frame.frame_type.as_str() {
        "events_api" => {
            let payload: RawEventsApiPayload =
                serde_json::from_value(payload).map_err(payload_error)?;
            message_event(payload.event)
        }
        "interactive" => {
            let payload: RawInteractivePayload =
                serde_json::from_value(payload).map_err(payload_error)?;
            block_action_event(payload)
        }
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id, event }))
}

fn message_event(event: RawEvent) -> SlackEvent {
    if event.event_type != "message" {
        return SlackEvent::Unsupported { event_type: event.event_type };
    }
    SlackEvent::Message(MessageEvent {
        channel_id: event.channel.unwrap_or_default(),
        channel_type: event.channel_type,
        user_id: event.user.unwrap_or_default(),
        text: event.text.unwrap_or_default(),
        ts: event.ts.unwrap_or_default(),
        thread_ts: event.thread_ts,
        bot_id: event.bot_id,
        subtype: event.subtype,
    })
}

fn block_action_event(payload: RawInteractivePayload) -> SlackEvent {
    if payload.interaction_type != "block_actions" {
        return SlackEvent::Unsupported { event_type: payload.interaction_type };
    }
    let Some(action) = payload.actions.into_iter().next() else {
        return SlackEvent::Unsupported { event_type: "block_actions".to_owned() };
    };
    let container = payload.container;
    let channel_id = payload
        .channel
        .map(|channel| channel.id)
        .or_else(|| container.as_ref().and_then(|container| container.channel_id.clone()))
        .unwrap_or_default();
    let message_ts = payload
        .message
        .as_ref()
        .map(|message| message.ts.clone())
        .or_else(|| container.as_ref().and_then(|container| container.message_ts.clone()))
        .unwrap_or_default();
    let thread_ts = payload
        .message
        .as_ref()
        .and_then(|message| message.thread_ts.clone())
        .or_else(|| container.and_then(|container| container.thread_ts));

    SlackEvent::BlockAction(BlockActionEvent {
        channel_id,
        message_ts,
        thread_ts,
        user_id: payload.user.id,
        action_id: action.action_id,
        value: action.value,
        message_text: payload.message.and_then(|message| message.text),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// One message the runner should deliver. `update_ts` rewrites an existing
/// message instead of posting a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub update_ts: Option<String>,
    pub message: MessageTemplate,
}

impl OutboundMessage {
    pub fn post(channel_id: impl Into<String>, thread_ts: Option<String>, message: MessageTemplate) -> Self {
        Self { channel_id: channel_id.into(), thread_ts, update_ts: None, message }
    }

    pub fn update(channel_id: impl Into<String>, message_ts: impl Into<String>, message: MessageTemplate) -> Self {
        Self { channel_id: channel_id.into(), thread_ts: None, update_ts: Some(message_ts.into()), message }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(Vec<OutboundMessage>),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("message handler failure: {0}")]
    Message(String),
    #[error("block action handler failure: {0}")]
    BlockAction(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher wired with the message and block-action handlers.
pub fn agent_dispatcher<M, B>(messages: M, actions: B) -> EventDispatcher
where
    M: InboundMessageService + 'static,
    B: BlockActionService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(messages));
    dispatcher.register(BlockActionHandler::new(actions));
    dispatcher
}

#[async_trait]
pub trait InboundMessageService: Send + Sync {
    async fn handle_message(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;
}

pub struct MessageHandler<S> {
    service: S,
}

impl<S> MessageHandler<S>
where
    S: InboundMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: InboundMessageService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !event.is_user_message() {
            return Ok(HandlerResult::Ignored);
        }

        let message = self.service.handle_message(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(vec![OutboundMessage::post(
                event.channel_id.clone(),
                event.reply_thread_ts(),
                message,
            )]),
            None => HandlerResult::Processed,
        })
    }
}

/// Answer to a button press: an optional replacement for the card the button
/// was on, plus an optional follow-up reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockActionResponse {
    pub replace_card: Option<MessageTemplate>,
    pub reply: Option<MessageTemplate>,
}

#[async_trait]
pub trait BlockActionService: Send + Sync {
    async fn handle_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<BlockActionResponse, EventHandlerError>;
}

pub struct BlockActionHandler<S> {
    service: S,
}

impl<S> BlockActionHandler<S>
where
    S: BlockActionService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for BlockActionHandler<S>
where
    S: BlockActionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let response = self.service.handle_block_action(event, ctx).await?;
        let mut outbound = Vec::new();
        if let Some(card) = response.replace_card {
            if !event.message_ts.is_empty() {
                outbound.push(OutboundMessage::update(event.channel_id.clone(), event.message_ts.clone(), card));
            }
        }
        if let Some(reply) = response.reply {
            outbound.push(OutboundMessage::post(event.channel_id.clone(), event.thread_ts.clone(), reply));
        }

        Ok(if outbound.is_empty() { HandlerResult::Processed } else { HandlerResult::Responded(outbound) })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        agent_dispatcher, parse_socket_frame, BlockActionEvent, BlockActionResponse,
        BlockActionService, EventContext, EventDispatcher, EventHandlerError, FrameParseError,
        HandlerResult, InboundMessageService, MessageEvent, SlackEnvelope, SlackEvent, SocketFrame,
    };
    use crate::blocks::{reply_message, resolved_message, MessageTemplate};

    struct Echo;

    #[async_trait]
    impl InboundMessageService for Echo {
        async fn handle_message(
            &self,
            event: &MessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            if event.text == "quiet" {
                return Ok(None);
            }
            Ok(Some(reply_message(&format!("echo: {}", event.text), Vec::new())))
        }
    }

    struct Resolve;

    #[async_trait]
    impl BlockActionService for Resolve {
        async fn handle_block_action(
            &self,
            event: &BlockActionEvent,
            _ctx: &EventContext,
        ) -> Result<BlockActionResponse, EventHandlerError> {
            Ok(BlockActionResponse {
                replace_card: Some(resolved_message("card", &event.action_id)),
                reply: Some(reply_message("done", Vec::new())),
            })
        }
    }

    fn message(text: &str) -> MessageEvent {
        MessageEvent {
            channel_id: "D1".to_owned(),
            channel_type: Some("im".to_owned()),
            user_id: "U1".to_owned(),
            text: text.to_owned(),
            ts: "1730000000.0001".to_owned(),
            ..MessageEvent::default()
        }
    }

    fn envelope(event: SlackEvent) -> SlackEnvelope {
        SlackEnvelope { envelope_id: "env-1".to_owned(), event }
    }

    #[tokio::test]
    async fn dispatcher_routes_messages_to_a_single_reply() {
        let dispatcher = agent_dispatcher(Echo, Resolve);
        let result = dispatcher
            .dispatch(&envelope(SlackEvent::Message(message("hi"))), &EventContext::default())
            .await
            .expect("dispatch");

        let HandlerResult::Responded(outbound) = result else {
            panic!("expected a reply");
        };
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].channel_id, "D1");
        assert_eq!(outbound[0].thread_ts, None);
        assert_eq!(outbound[0].message.fallback_text, "echo: hi");
    }

    #[tokio::test]
    async fn bot_and_edited_messages_are_ignored() {
        let dispatcher = agent_dispatcher(Echo, Resolve);
        let mut from_bot = message("hi");
        from_bot.bot_id = Some("B1".to_owned());
        let mut edited = message("hi");
        edited.subtype = Some("message_changed".to_owned());

        for event in [from_bot, edited, message("   ")] {
            let result = dispatcher
                .dispatch(&envelope(SlackEvent::Message(event)), &EventContext::default())
                .await
                .expect("dispatch");
            assert_eq!(result, HandlerResult::Ignored);
        }
    }

    #[tokio::test]
    async fn silent_service_result_is_processed() {
        let dispatcher = agent_dispatcher(Echo, Resolve);
        let result = dispatcher
            .dispatch(&envelope(SlackEvent::Message(message("quiet"))), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Processed);
    }

    #[tokio::test]
    async fn block_action_updates_card_then_replies_in_thread() {
        let dispatcher = agent_dispatcher(Echo, Resolve);
        let event = BlockActionEvent {
            channel_id: "C1".to_owned(),
            message_ts: "1730000000.6000".to_owned(),
            thread_ts: Some("1730000000.5000".to_owned()),
            user_id: "U6".to_owned(),
            action_id: "pending.confirm".to_owned(),
            value: None,
            message_text: Some("card".to_owned()),
        };

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::BlockAction(event)), &EventContext::default())
            .await
            .expect("dispatch");

        let HandlerResult::Responded(outbound) = result else {
            panic!("expected responses");
        };
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[0].update_ts.as_deref(), Some("1730000000.6000"));
        assert_eq!(outbound[1].update_ts, None);
        assert_eq!(outbound[1].thread_ts.as_deref(), Some("1730000000.5000"));
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(&envelope(SlackEvent::Message(message("hello"))), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
        assert_eq!(agent_dispatcher(Echo, Resolve).handler_count(), 2);
    }

    #[test]
    fn channel_messages_reply_in_a_new_thread() {
        let mut event = message("hi");
        event.channel_id = "C1".to_owned();
        event.channel_type = Some("channel".to_owned());
        assert_eq!(event.reply_thread_ts().as_deref(), Some("1730000000.0001"));

        event.thread_ts = Some("1729999999.0001".to_owned());
        assert_eq!(event.reply_thread_ts().as_deref(), Some("1729999999.0001"));
    }

    #[test]
    fn parses_control_frames() {
        assert_eq!(parse_socket_frame(r#"{"type":"hello","num_connections":1}"#), Ok(SocketFrame::Hello));
        assert_eq!(
            parse_socket_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#),
            Ok(SocketFrame::Disconnect { reason: "refresh_requested".to_owned() })
        );
    }

    #[test]
    fn parses_events_api_message() {
        let raw = r#"{
            "type": "events_api",
            "envelope_id": "env-42",
            "payload": {
                "event": {
                    "type": "message",
                    "channel": "D024BE91L",
                    "channel_type": "im",
                    "user": "U2147483697",
                    "text": "create a task for Acme",
                    "ts": "1355517523.000005"
                }
            }
        }"#;

        let Ok(SocketFrame::Envelope(envelope)) = parse_socket_frame(raw) else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.envelope_id, "env-42");
        let SlackEvent::Message(event) = envelope.event else {
            panic!("expected message event");
        };
        assert_eq!(event.user_id, "U2147483697");
        assert_eq!(event.text, "create a task for Acme");
        assert!(event.is_user_message());
    }

    #[test]
    fn parses_block_action_with_container_fallbacks() {
        let raw = r#"{
            "type": "interactive",
            "envelope_id": "env-43",
            "payload": {
                "type": "block_actions",
                "user": {"id": "U1"},
                "container": {"channel_id": "D1", "message_ts": "1.5"},
                "message": {"ts": "1.5", "text": "Create *Fix feed*?"},
                "actions": [{"action_id": "pending.cancel", "value": "cancel"}]
            }
        }"#;

        let Ok(SocketFrame::Envelope(envelope)) = parse_socket_frame(raw) else {
            panic!("expected envelope");
        };
        let SlackEvent::BlockAction(event) = envelope.event else {
            panic!("expected block action");
        };
        assert_eq!(event.channel_id, "D1");
        assert_eq!(event.message_ts, "1.5");
        assert_eq!(event.action_id, "pending.cancel");
        assert_eq!(event.message_text.as_deref(), Some("Create *Fix feed*?"));
    }

    #[test]
    fn unknown_event_types_still_yield_an_envelope() {
        let raw = r#"{"type":"events_api","envelope_id":"env-44","payload":{"event":{"type":"reaction_added"}}}"#;
        assert_eq!(
            parse_socket_frame(raw),
            Ok(SocketFrame::Envelope(SlackEnvelope {
                envelope_id: "env-44".to_owned(),
                event: SlackEvent::Unsupported { event_type: "reaction_added".to_owned() },
            }))
        );
    }

    #[test]
    fn envelope_without_id_is_rejected() {
        assert_eq!(
            parse_socket_frame(r#"{"type":"events_api","payload":{}}"#),
            Err(FrameParseError::MissingEnvelopeId("events_api".to_owned()))
        );
        assert!(matches!(parse_socket_frame("not json"), Err(FrameParseError::Json(_))));
    }
}

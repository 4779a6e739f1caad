//! Glue between Slack events and the agent runtime.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use taskpilot_agent::runtime::{AgentReply, AgentRuntime, InboundMessage, QuickAction};
use taskpilot_slack::blocks::{error_message, reply_message, resolved_message, ButtonElement, ButtonStyle, MessageTemplate};
use taskpilot_slack::events::{
    BlockActionEvent, BlockActionResponse, BlockActionService, EventContext, EventHandlerError,
    InboundMessageService, MessageEvent,
};

/// Runs every Slack message and button press through the agent. Runtime
/// failures become an apology card carrying the correlation id; they are
/// never surfaced as handler errors.
#[derive(Clone)]
pub struct AgentMessageService {
    runtime: Arc<AgentRuntime>,
}

impl AgentMessageService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    async fn run(&self, message: InboundMessage) -> MessageTemplate {
        match self.runtime.handle_message(&message).await {
            Ok(reply) => render_reply(&reply),
            Err(failure) => {
                error!(
                    event_name = "server.agent.turn_failed",
                    correlation_id = %message.correlation_id,
                    error = %failure,
                    "agent turn failed"
                );
                let interface = failure.into_interface(message.correlation_id.clone());
                error_message(interface.user_message(), interface.correlation_id())
            }
        }
    }
}

pub fn render_reply(reply: &AgentReply) -> MessageTemplate {
    let buttons = reply.quick_actions.iter().map(quick_action_button).collect();
    reply_message(&reply.text, buttons)
}

fn quick_action_button(action: &QuickAction) -> ButtonElement {
    let style = match action {
        QuickAction::ConfirmPending => ButtonStyle::Primary,
        QuickAction::CancelPending => ButtonStyle::Danger,
    };
    ButtonElement::new(action.action_id(), action.label()).style(style).value(action.reply_text())
}

#[async_trait]
impl InboundMessageService for AgentMessageService {
    async fn handle_message(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        let message = InboundMessage {
            external_user_id: event.user_id.clone(),
            channel_id: event.channel_id.clone(),
            surface_hint: event.channel_type.clone(),
            text: event.text.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };
        Ok(Some(self.run(message).await))
    }
}

#[async_trait]
impl BlockActionService for AgentMessageService {
    async fn handle_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<BlockActionResponse, EventHandlerError> {
        let Some(action) = QuickAction::from_action_id(&event.action_id) else {
            info!(
                event_name = "server.block_action.unknown",
                correlation_id = %ctx.correlation_id,
                action_id = %event.action_id,
                "ignoring unknown block action"
            );
            return Ok(BlockActionResponse::default());
        };

        let message = InboundMessage {
            external_user_id: event.user_id.clone(),
            channel_id: event.channel_id.clone(),
            surface_hint: None,
            text: action.reply_text().to_owned(),
            correlation_id: ctx.correlation_id.clone(),
        };
        let reply = self.run(message).await;
        let original = event.message_text.as_deref().unwrap_or("Task request");

        Ok(BlockActionResponse {
            replace_card: Some(resolved_message(
                original,
                &format!("<@{}> chose *{}*", event.user_id, action.label()),
            )),
            reply: Some(reply),
        })
    }
}

//! Slack interface for the task assistant.
//!
//! - **Socket Mode** (`socket`) - WebSocket connection to Slack with reconnect backoff
//! - **Events** (`events`) - frame parsing, messages and button presses, dispatch
//! - **Block Kit** (`blocks`) - reply, confirmation and resolved-card builders
//! - **Web API** (`web`) - `chat.postMessage`, `chat.update`, `apps.connections.open`
//!
//! # Setup
//!
//! 1. Create a Slack app and enable Socket Mode
//! 2. Subscribe to `message.im` and `message.channels`, enable interactivity
//! 3. Set `TASKPILOT_SLACK_APP_TOKEN` (`xapp-`) and `TASKPILOT_SLACK_BOT_TOKEN` (`xoxb-`)
//!
//! ```text
//! Socket frame → parse_socket_frame → ack → EventDispatcher → service → MessagingSurface
//! ```

pub mod blocks;
pub mod events;
pub mod socket;
pub mod web;

pub use events::{agent_dispatcher, BlockActionService, EventDispatcher, InboundMessageService};
pub use socket::{ReconnectPolicy, SlackSocketTransport, SocketModeRunner};
pub use web::{MessagingSurface, SlackWebClient};

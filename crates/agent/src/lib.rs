//! Agent runtime: turns chat messages into whitelisted skill calls.
//!
//! A message first continues any pending task creation (`pending`). Otherwise
//! it is classified (`conversation`) and either dispatched directly or handed
//! to the LLM planner (`planner`), whose plan runs through the executor
//! (`executor`). Every skill call passes the policy gate (`guardrails`)
//! first.
//!
//! The LLM only proposes. Skill ids, arguments, step counts and permissions
//! are all checked here before anything runs.

pub mod conversation;
pub mod drafting;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod pending;
pub mod planner;
pub mod runtime;
pub mod skills;
pub mod tools;

pub use conversation::{IntentClassifier, KnownIntent};
pub use executor::{execute_plan, HandlerMap, SkillContext, SkillError, SkillHandler, SkillOutput};
pub use guardrails::{PolicyDecision, PolicyGate};
pub use llm::{client_from_config, FallbackLlmClient, LlmClient, LlmError};
pub use planner::Planner;
pub use runtime::{AgentReply, AgentRuntime, InboundMessage, QuickAction, RuntimeDeps, RuntimeSettings};
pub use skills::build_handler_map;
pub use tools::SkillRegistry;

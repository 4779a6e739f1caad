use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use taskpilot_core::config::RuntimeConfig;
use taskpilot_core::conversation::{push_exchange, ConversationExchange, HistoryLimits};
use taskpilot_core::domain::client::Brand;
use taskpilot_core::domain::knowledge::RetrievalQuery;
use taskpilot_core::domain::pending::{Awaiting, PendingTaskCreate};
use taskpilot_core::domain::plan::{ExecutionPlan, PlanStep, SkillArgs};
use taskpilot_core::domain::session::{ContextPatch, Patch, Session};
use taskpilot_core::errors::ApplicationError;
use taskpilot_core::knowledge::TieredRetriever;
use taskpilot_core::ports::{ClientDirectory, ProfileDirectory, SessionStore};

use crate::conversation::{IntentClassifier, KnownIntent};
use crate::drafting::{DraftRequest, TaskDrafter};
use crate::executor::{execute_plan, HandlerMap, SkillContext, SkillError, SkillOutput};
use crate::guardrails::{resolve_actor, resolve_surface, PolicyGate};
use crate::pending::{apply_draft, resolve_pending, start_pending, ResolverInput, ResolverOutcome};
use crate::planner::Planner;
use crate::skills::resolve_client;
use crate::tools::{string_arg, CREATE_TASK, LIST_BRANDS, LIST_CLIENTS, SET_ACTIVE_CLIENT};

pub const HELP_TEXT: &str = "Here's what I can do:\n\
- `create task for <client>[ / <brand>]: <title>` starts a new task\n\
- `list clients` or `list brands for <client>`\n\
- `switch to <client>` sets the client I assume by default\n\
- `cancel` drops a task request in progress";

const FALLBACK_TEXT: &str = "I'm not sure how to help with that yet.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub external_user_id: String,
    pub channel_id: String,
    pub surface_hint: Option<String>,
    pub text: String,
    pub correlation_id: String,
}

/// Buttons offered next to a reply. Clicking one is equivalent to typing
/// its reply text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuickAction {
    ConfirmPending,
    CancelPending,
}

impl QuickAction {
    pub fn action_id(&self) -> &'static str {
        match self {
            Self::ConfirmPending => "pending.confirm",
            Self::CancelPending => "pending.cancel",
        }
    }

    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id {
            "pending.confirm" => Some(Self::ConfirmPending),
            "pending.cancel" => Some(Self::CancelPending),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ConfirmPending => "Create",
            Self::CancelPending => "Cancel",
        }
    }

    pub fn reply_text(&self) -> &'static str {
        match self {
            Self::ConfirmPending => "yes",
            Self::CancelPending => "cancel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub quick_actions: Vec<QuickAction>,
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), quick_actions: Vec::new() }
    }

    fn prompt(pending: &PendingTaskCreate, message: String) -> Self {
        let quick_actions = match pending.awaiting {
            Awaiting::ConfirmOrDetails => vec![QuickAction::ConfirmPending, QuickAction::CancelPending],
            Awaiting::Brand | Awaiting::Title | Awaiting::AsinOrPending => {
                vec![QuickAction::CancelPending]
            }
        };
        Self { text: message, quick_actions }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub pending_timeout: Duration,
    pub history_limits: HistoryLimits,
    pub retrieval_max_chars: usize,
}

impl RuntimeSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            pending_timeout: config.pending_timeout(),
            history_limits: config.history_limits(),
            retrieval_max_chars: config.retrieval_max_chars,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

/// Collaborators the runtime is assembled from.
pub struct RuntimeDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub clients: Arc<dyn ClientDirectory>,
    pub gate: PolicyGate,
    pub handlers: HandlerMap,
    pub drafter: TaskDrafter,
    pub retriever: Arc<TieredRetriever>,
    pub planner: Option<Planner>,
    pub settings: RuntimeSettings,
}

/// Per-message orchestration: session, actor and surface resolution, the
/// pending flow, direct dispatch and the planner path.
pub struct AgentRuntime {
    sessions: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileDirectory>,
    clients: Arc<dyn ClientDirectory>,
    gate: PolicyGate,
    handlers: HandlerMap,
    drafter: TaskDrafter,
    retriever: Arc<TieredRetriever>,
    planner: Option<Planner>,
    classifier: IntentClassifier,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(deps: RuntimeDeps) -> Self {
        Self {
            sessions: deps.sessions,
            profiles: deps.profiles,
            clients: deps.clients,
            gate: deps.gate,
            handlers: deps.handlers,
            drafter: deps.drafter,
            retriever: deps.retriever,
            planner: deps.planner,
            classifier: IntentClassifier::new(),
            settings: deps.settings,
        }
    }

    pub async fn handle_message(&self, message: &InboundMessage) -> Result<AgentReply, ApplicationError> {
        let correlation_id = message.correlation_id.as_str();
        let session = self
            .sessions
            .get_or_create(&message.external_user_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        if let Err(error) = self.sessions.touch(&session.id).await {
            warn!(
                event_name = "agent.session.touch_failed",
                correlation_id,
                error = %error,
                "could not refresh session activity"
            );
        }

        let actor = resolve_actor(
            self.profiles.as_ref(),
            session.profile_id.as_deref(),
            &message.external_user_id,
        )
        .await;
        let surface = resolve_surface(&message.channel_id, message.surface_hint.as_deref());
        let intent = self.classifier.classify(&message.text);
        info!(
            event_name = "agent.message.received",
            correlation_id,
            intent = intent.name(),
            actor_role = actor.role.as_str(),
            surface_type = surface.surface_type.as_str(),
            has_pending = session.context.pending_task_create.is_some(),
            "inbound message"
        );

        let mut ctx = SkillContext {
            actor,
            surface,
            session_id: session.id.0.clone(),
            context: session.context.clone(),
            correlation_id: correlation_id.to_string(),
        };
        let (reply, patch) = match session.context.pending_task_create.as_ref() {
            Some(pending) => self.continue_pending(pending, &message.text, &intent, &mut ctx).await,
            None => self.dispatch_intent(&intent, &message.text, &mut ctx).await,
        };

        self.persist_turn(&session, &message.text, &reply, patch, correlation_id).await;
        Ok(reply)
    }

    async fn continue_pending(
        &self,
        pending: &PendingTaskCreate,
        text: &str,
        intent: &KnownIntent,
        ctx: &mut SkillContext,
    ) -> (AgentReply, ContextPatch) {
        let brands = self.load_brands(&pending.client_id, &ctx.correlation_id).await;
        let outcome = resolve_pending(ResolverInput {
            pending,
            text,
            intent,
            brands: &brands,
            now: Utc::now(),
            timeout: self.settings.pending_timeout,
        });
        info!(
            event_name = "agent.pending.resolved",
            correlation_id = %ctx.correlation_id,
            awaiting = pending.awaiting.as_str(),
            action = outcome.action(),
            "pending task continuation resolved"
        );

        if let ResolverOutcome::Interrupt = outcome {
            let cleared = outcome.context_patch();
            ctx.context.apply(&cleared);
            let (reply, patch) = self.dispatch_intent(intent, text, ctx).await;
            return (reply, cleared.merge(patch));
        }
        self.settle(outcome, ctx).await
    }

    /// Turns a resolver outcome into a reply, drafting and creating the task
    /// when the flow calls for it.
    async fn settle(&self, outcome: ResolverOutcome, ctx: &mut SkillContext) -> (AgentReply, ContextPatch) {
        let outcome = match outcome {
            ResolverOutcome::Draft { pending } => {
                let request = DraftRequest {
                    client_id: &pending.client_id,
                    client_name: &pending.client_name,
                    brand_name: pending.brand_name.as_deref(),
                    title: pending.task_title.as_deref().unwrap_or_default(),
                    details: pending.details.as_deref(),
                };
                let draft = self.drafter.draft(&request, &ctx.correlation_id).await;
                apply_draft(pending, draft)
            }
            other => other,
        };

        let patch = outcome.context_patch();
        match outcome {
            ResolverOutcome::Execute { pending, description } => {
                self.create_from_pending(pending, description, ctx).await
            }
            ResolverOutcome::Prompt { pending, message } => (AgentReply::prompt(&pending, message), patch),
            ResolverOutcome::Cancelled => (AgentReply::text("Okay, I dropped that task request."), patch),
            ResolverOutcome::Expired => (
                AgentReply::text(format!(
                    "That task request expired after {} minutes without a reply. Start it again when you're ready.",
                    self.settings.pending_timeout.num_minutes()
                )),
                patch,
            ),
            ResolverOutcome::Failed { message } => (AgentReply::text(message), patch),
            // Interrupts are routed by the caller and drafts were folded in above.
            ResolverOutcome::Interrupt | ResolverOutcome::Draft { .. } => {
                (AgentReply::text(HELP_TEXT), patch)
            }
        }
    }

    async fn create_from_pending(
        &self,
        pending: PendingTaskCreate,
        description: String,
        ctx: &mut SkillContext,
    ) -> (AgentReply, ContextPatch) {
        let decision = self.gate.evaluate(
            &ctx.actor,
            &ctx.surface,
            CREATE_TASK,
            Some(&ctx.session_id),
            &ctx.correlation_id,
        );
        if !decision.allowed {
            return (AgentReply::text(decision.user_message), ContextPatch::clear_pending());
        }

        let mut args = SkillArgs::new();
        args.insert("client_id".to_string(), Value::String(pending.client_id.clone()));
        args.insert(
            "title".to_string(),
            Value::String(pending.task_title.clone().unwrap_or_default()),
        );
        if !description.trim().is_empty() {
            args.insert("description".to_string(), Value::String(description));
        }
        if let Some(brand_id) = &pending.brand_id {
            args.insert("brand_id".to_string(), Value::String(brand_id.clone()));
        }

        match self.run_handler(CREATE_TASK, &args, ctx).await {
            Ok(output) => (AgentReply::text(output.message), ContextPatch::clear_pending().merge(output.patch)),
            // Keep the request so the user can retry without starting over.
            Err(error) => (AgentReply::text(error.user_message()), ContextPatch::pending(pending)),
        }
    }

    async fn dispatch_intent(
        &self,
        intent: &KnownIntent,
        text: &str,
        ctx: &mut SkillContext,
    ) -> (AgentReply, ContextPatch) {
        match intent {
            KnownIntent::Help => (AgentReply::text(HELP_TEXT), ContextPatch::default()),
            KnownIntent::Cancel => {
                (AgentReply::text("There's nothing in progress to cancel."), ContextPatch::default())
            }
            KnownIntent::ListClients => self.run_skill(LIST_CLIENTS, SkillArgs::new(), ctx).await,
            KnownIntent::ListBrands { client_hint } => {
                let client = client_hint.clone().or_else(|| ctx.context.active_client_id.clone());
                let Some(client) = client else {
                    return (
                        AgentReply::text("Which client? Try `list brands for <client>`."),
                        ContextPatch::default(),
                    );
                };
                let mut args = SkillArgs::new();
                args.insert("client_id".to_string(), Value::String(client));
                self.run_skill(LIST_BRANDS, args, ctx).await
            }
            KnownIntent::SwitchClient { client_hint } => {
                let mut args = SkillArgs::new();
                args.insert("client".to_string(), Value::String(client_hint.clone()));
                self.run_skill(SET_ACTIVE_CLIENT, args, ctx).await
            }
            KnownIntent::CreateTask { title, client_hint, brand_hint } => {
                self.start_task_create(title.as_deref(), client_hint.as_deref(), brand_hint.as_deref(), ctx)
                    .await
            }
            KnownIntent::Unknown => self.plan_and_execute(text, ctx).await,
        }
    }

    async fn start_task_create(
        &self,
        title: Option<&str>,
        client_hint: Option<&str>,
        brand_hint: Option<&str>,
        ctx: &mut SkillContext,
    ) -> (AgentReply, ContextPatch) {
        let decision = self.gate.evaluate(
            &ctx.actor,
            &ctx.surface,
            CREATE_TASK,
            Some(&ctx.session_id),
            &ctx.correlation_id,
        );
        if !decision.allowed {
            return (AgentReply::text(decision.user_message), ContextPatch::default());
        }

        let hint = client_hint.map(str::to_string).or_else(|| ctx.context.active_client_id.clone());
        let Some(hint) = hint else {
            return (
                AgentReply::text("Which client is this for? Try `create task for <client>: <title>`."),
                ContextPatch::default(),
            );
        };
        let client = match resolve_client(self.clients.as_ref(), &hint).await {
            Ok(client) => client,
            Err(error) => return (AgentReply::text(error.user_message()), ContextPatch::default()),
        };

        let brands = self.load_brands(&client.id, &ctx.correlation_id).await;
        let mut pending = PendingTaskCreate::new(Awaiting::Brand, client.id, client.name, Utc::now());
        pending.task_title = title.map(str::trim).filter(|title| !title.is_empty()).map(str::to_string);
        info!(
            event_name = "agent.pending.started",
            correlation_id = %ctx.correlation_id,
            client_id = %pending.client_id,
            has_title = pending.task_title.is_some(),
            "task creation flow started"
        );

        self.settle(start_pending(pending, &brands, brand_hint), ctx).await
    }

    async fn plan_and_execute(&self, text: &str, ctx: &mut SkillContext) -> (AgentReply, ContextPatch) {
        let fallback = || (AgentReply::text(format!("{FALLBACK_TEXT}\n\n{HELP_TEXT}")), ContextPatch::default());
        let Some(planner) = &self.planner else {
            return fallback();
        };

        let packs = self.context_packs(text, ctx).await;
        let Some(plan) = planner.generate_plan(text, &ctx.context, &packs, &ctx.correlation_id).await else {
            return fallback();
        };

        // Task creation always goes through the confirmation flow; the other
        // steps run first so a client switch lands before the request starts.
        let (creates, steps): (Vec<PlanStep>, Vec<PlanStep>) =
            plan.steps.iter().cloned().partition(|step| step.skill_id == CREATE_TASK);
        if creates.len() > 1 {
            return (
                AgentReply::text("I can only set up one task at a time. Which one should I start with?"),
                ContextPatch::default(),
            );
        }

        let mut lines = Vec::new();
        let mut patch = ContextPatch::default();
        if !steps.is_empty() {
            let actor = ctx.actor.clone();
            let surface = ctx.surface.clone();
            let session_id = ctx.session_id.clone();
            let correlation_id = ctx.correlation_id.clone();
            let check_policy = |step: &PlanStep| {
                self.gate.evaluate(&actor, &surface, &step.skill_id, Some(&session_id), &correlation_id)
            };
            let plan = ExecutionPlan { steps, ..plan };
            let (result, step_patch) = execute_plan(&plan, &self.handlers, ctx, check_policy).await;
            patch = step_patch;
            let summary = result.summary();
            if !summary.is_empty() {
                lines.push(summary);
            }
            if result.aborted {
                return (AgentReply::text(lines.join("\n\n")), patch);
            }
        }

        let Some(step) = creates.first() else {
            let text = if lines.is_empty() { "Done.".to_string() } else { lines.join("\n\n") };
            return (AgentReply::text(text), patch);
        };
        let title = string_arg(&step.args, "title").map(str::to_string);
        let client = string_arg(&step.args, "client_id").map(str::to_string);
        let brand = string_arg(&step.args, "brand_id").map(str::to_string);
        let (reply, create_patch) =
            self.start_task_create(title.as_deref(), client.as_deref(), brand.as_deref(), ctx).await;
        lines.push(reply.text);
        (
            AgentReply { text: lines.join("\n\n"), quick_actions: reply.quick_actions },
            patch.merge(create_patch),
        )
    }

    async fn context_packs(&self, text: &str, ctx: &SkillContext) -> Vec<String> {
        let query = RetrievalQuery {
            client_id: ctx.context.active_client_id.clone(),
            max_chars: self.settings.retrieval_max_chars,
            ..RetrievalQuery::new(text)
        };
        self.retriever
            .retrieve(&query)
            .await
            .sources
            .into_iter()
            .map(|source| format!("[{}] {}\n{}", source.tier.as_str(), source.title, source.content))
            .collect()
    }

    async fn run_skill(
        &self,
        skill_id: &str,
        args: SkillArgs,
        ctx: &mut SkillContext,
    ) -> (AgentReply, ContextPatch) {
        let decision = self.gate.evaluate(
            &ctx.actor,
            &ctx.surface,
            skill_id,
            Some(&ctx.session_id),
            &ctx.correlation_id,
        );
        if !decision.allowed {
            return (AgentReply::text(decision.user_message), ContextPatch::default());
        }

        match self.run_handler(skill_id, &args, ctx).await {
            Ok(output) => (AgentReply::text(output.message), output.patch),
            Err(error) => (AgentReply::text(error.user_message()), ContextPatch::default()),
        }
    }

    async fn run_handler(
        &self,
        skill_id: &str,
        args: &SkillArgs,
        ctx: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        let Some(handler) = self.handlers.get(skill_id) else {
            return Err(SkillError::Rejected(format!("I can't run `{skill_id}` right now.")));
        };
        let result = handler.handle(ctx, args).await;
        if let Err(error) = &result {
            warn!(
                event_name = "agent.skill.failed",
                correlation_id = %ctx.correlation_id,
                skill_id,
                error = %error,
                "skill handler failed"
            );
        }
        result
    }

    async fn load_brands(&self, client_id: &str, correlation_id: &str) -> Vec<Brand> {
        match self.clients.list_brands(client_id).await {
            Ok(brands) => brands,
            Err(error) => {
                warn!(
                    event_name = "agent.brands.lookup_failed",
                    correlation_id,
                    client_id,
                    error = %error,
                    "brand lookup failed; continuing without brands"
                );
                Vec::new()
            }
        }
    }

    /// Records the exchange and writes every context change in one update.
    /// A failed write is logged; the reply still goes out.
    async fn persist_turn(
        &self,
        session: &Session,
        user_text: &str,
        reply: &AgentReply,
        patch: ContextPatch,
        correlation_id: &str,
    ) {
        let history = push_exchange(
            &session.context.recent_exchanges,
            ConversationExchange::new(user_text.trim(), reply.text.clone()),
            self.settings.history_limits,
        );
        let patch = patch.merge(ContextPatch { recent_exchanges: Patch::Set(history), ..ContextPatch::default() });

        let partial = match patch.to_partial_map() {
            Ok(partial) => partial,
            Err(error) => {
                warn!(
                    event_name = "agent.session.encode_failed",
                    correlation_id,
                    error = %error,
                    "could not encode session update"
                );
                return;
            }
        };
        if let Err(error) = self.sessions.update_context(&session.id, partial).await {
            warn!(
                event_name = "agent.session.update_failed",
                correlation_id,
                error = %error,
                "could not persist session context"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskpilot_core::audit::InMemoryAuditSink;
    use taskpilot_core::domain::actor::{ActorRole, Profile};
    use taskpilot_core::domain::client::{Brand, Client};
    use taskpilot_core::knowledge::TieredRetriever;
    use taskpilot_core::ports::memory::{
        InMemoryClientDirectory, InMemoryKnowledgeBase, InMemoryMutationLedger,
        InMemoryOrphanEvents, InMemoryProfileDirectory, InMemorySessionStore, ScriptedTaskService,
    };
    use taskpilot_core::reliability::ReliableTaskCreator;

    use super::{AgentReply, AgentRuntime, InboundMessage, QuickAction, RuntimeDeps, RuntimeSettings};
    use crate::drafting::TaskDrafter;
    use crate::guardrails::PolicyGate;
    use crate::llm::{LlmClient, ScriptedLlmClient};
    use crate::planner::Planner;
    use crate::skills::build_handler_map;
    use crate::tools::SkillRegistry;

    struct Harness {
        runtime: AgentRuntime,
        sessions: Arc<InMemorySessionStore>,
        service: Arc<ScriptedTaskService>,
        audit: InMemoryAuditSink,
    }

    async fn harness(planner_reply: Option<&str>) -> Harness {
        let sessions = Arc::new(InMemorySessionStore::default());
        let profiles = Arc::new(InMemoryProfileDirectory::default());
        for (id, user, role) in [("p-op", "U-OP", ActorRole::Operator), ("p-view", "U-VIEW", ActorRole::Viewer)] {
            profiles
                .insert(Profile {
                    id: id.to_string(),
                    external_user_id: user.to_string(),
                    display_name: None,
                    role,
                    is_admin: false,
                })
                .await;
            sessions.link_profile(user, id).await;
        }

        let clients = Arc::new(InMemoryClientDirectory::default());
        clients
            .insert_client(Client { id: "c1".to_string(), name: "Acme".to_string(), aliases: Vec::new() })
            .await;
        clients
            .insert_client(Client { id: "c2".to_string(), name: "Zephyr".to_string(), aliases: Vec::new() })
            .await;
        clients
            .insert_brand(Brand { id: "b1".to_string(), client_id: "c1".to_string(), name: "Summit".to_string() })
            .await;

        let ledger = Arc::new(InMemoryMutationLedger::default());
        let service = Arc::new(ScriptedTaskService::new(Vec::new()));
        let creator = Arc::new(ReliableTaskCreator::new(
            service.clone(),
            ledger.clone(),
            Arc::new(InMemoryOrphanEvents::default()),
        ));
        let retriever =
            Arc::new(TieredRetriever::new(Arc::new(InMemoryKnowledgeBase::default()), ledger));
        let drafter = TaskDrafter::new(retriever.clone(), 6_000);
        let registry = Arc::new(SkillRegistry::builtin());
        let audit = InMemoryAuditSink::default();
        let planner = planner_reply.map(|reply| {
            Planner::new(
                Arc::new(ScriptedLlmClient::replying(reply)) as Arc<dyn LlmClient>,
                registry.clone(),
                0.1,
                None,
            )
        });

        let runtime = AgentRuntime::new(RuntimeDeps {
            sessions: sessions.clone(),
            profiles: profiles.clone(),
            clients: clients.clone(),
            gate: PolicyGate::new(registry, Arc::new(audit.clone())),
            handlers: build_handler_map(clients, profiles, drafter.clone(), creator),
            drafter,
            retriever,
            planner,
            settings: RuntimeSettings::default(),
        });
        Harness { runtime, sessions, service, audit }
    }

    fn dm(user: &str, text: &str) -> InboundMessage {
        InboundMessage {
            external_user_id: user.to_string(),
            channel_id: "D100".to_string(),
            surface_hint: None,
            text: text.to_string(),
            correlation_id: "corr-test".to_string(),
        }
    }

    async fn send(harness: &Harness, user: &str, text: &str) -> AgentReply {
        harness.runtime.handle_message(&dm(user, text)).await.expect("reply")
    }

    #[tokio::test]
    async fn create_flow_confirms_then_creates_once() {
        let harness = harness(None).await;

        let prompt = send(&harness, "U-OP", "create task for Acme: Audit PPC spend").await;
        assert!(prompt.text.starts_with("Ready to create *Audit PPC spend* for Acme / Summit."));
        assert_eq!(prompt.quick_actions, vec![QuickAction::ConfirmPending, QuickAction::CancelPending]);

        let created = send(&harness, "U-OP", "yes").await;
        assert!(created.text.starts_with("Created task *Audit PPC spend*"), "{}", created.text);
        assert_eq!(harness.service.calls(), 1);

        let requests = harness.service.requests().await;
        assert_eq!(requests[0].brand_id.as_deref(), Some("b1"));
        assert!(requests[0].description.starts_with("Task: Audit PPC spend"));

        let context = harness.sessions.raw_context("U-OP").await.expect("context");
        assert!(!context.contains_key("pending_task_create"));
        assert_eq!(context["recent_exchanges"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn product_task_asks_for_identifier_before_creating() {
        let harness = harness(None).await;

        send(&harness, "U-OP", "create task for Acme: Rewrite listing bullets").await;
        let asking = send(&harness, "U-OP", "yes").await;
        assert!(asking.text.contains("Which ASIN"), "{}", asking.text);
        assert_eq!(harness.service.calls(), 0);

        let created = send(&harness, "U-OP", "it's B0C1234567").await;
        assert!(created.text.starts_with("Created task"), "{}", created.text);
        let requests = harness.service.requests().await;
        assert!(requests[0].description.ends_with("ASIN: B0C1234567"));
    }

    #[tokio::test]
    async fn viewer_and_unknown_actor_are_denied() {
        let harness = harness(None).await;

        let viewer = send(&harness, "U-VIEW", "create task for Acme: Audit PPC spend").await;
        let stranger = send(&harness, "U-NEW", "list clients").await;

        assert!(viewer.text.contains("read-only"));
        assert!(stranger.text.contains("don't recognize your account"));
        assert_eq!(harness.service.calls(), 0);
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "policy.decision.denied"));
    }

    #[tokio::test]
    async fn new_intent_interrupts_pending_flow() {
        let harness = harness(None).await;

        send(&harness, "U-OP", "create task for Acme: Audit PPC spend").await;
        let listed = send(&harness, "U-OP", "list clients").await;

        assert_eq!(listed.text, "Clients:\n- Acme\n- Zephyr");
        let context = harness.sessions.raw_context("U-OP").await.expect("context");
        assert!(!context.contains_key("pending_task_create"));
    }

    #[tokio::test]
    async fn second_create_request_replaces_the_held_one() {
        let harness = harness(None).await;

        send(&harness, "U-OP", "create task for Acme: Audit PPC spend").await;
        let prompt = send(&harness, "U-OP", "create task for Zephyr: Quarterly review").await;

        assert!(prompt.text.starts_with("Ready to create *Quarterly review* for Zephyr."), "{}", prompt.text);
        assert_eq!(harness.service.calls(), 0);
        let context = harness.sessions.raw_context("U-OP").await.expect("context");
        assert_eq!(context["pending_task_create"]["client_id"], "c2");

        let created = send(&harness, "U-OP", "yes").await;
        assert!(created.text.starts_with("Created task *Quarterly review*"), "{}", created.text);
        let requests = harness.service.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!((requests[0].client_id.as_str(), requests[0].title.as_str()), ("c2", "Quarterly review"));
    }

    #[tokio::test]
    async fn cancel_drops_pending_request() {
        let harness = harness(None).await;

        send(&harness, "U-OP", "create task for Acme").await;
        let cancelled = send(&harness, "U-OP", "cancel").await;

        assert_eq!(cancelled.text, "Okay, I dropped that task request.");
        assert_eq!(harness.service.calls(), 0);
    }

    #[tokio::test]
    async fn switch_client_sets_default_for_later_requests() {
        let harness = harness(None).await;

        send(&harness, "U-OP", "switch to zephyr").await;
        let prompt = send(&harness, "U-OP", "new task: Quarterly review").await;

        assert!(prompt.text.starts_with("Ready to create *Quarterly review* for Zephyr."), "{}", prompt.text);
    }

    #[tokio::test]
    async fn unknown_text_uses_planner_or_falls_back() {
        let without_planner = harness(None).await;
        let fallback = send(&without_planner, "U-OP", "how are things going").await;
        assert!(fallback.text.starts_with("I'm not sure how to help with that yet."));

        let with_planner = harness(Some(
            r#"{"intent":"list","confidence":0.9,"steps":[{"skill_id":"list_clients","args":{}}]}"#,
        ))
        .await;
        let planned = send(&with_planner, "U-OP", "who do we work for").await;
        assert_eq!(planned.text, "Clients:\n- Acme\n- Zephyr");
    }

    #[tokio::test]
    async fn planned_task_creation_waits_for_confirmation() {
        let harness = harness(Some(
            r#"{"intent":"create","confidence":0.8,"steps":[{"skill_id":"create_task","args":{"client_id":"c1","title":"Audit PPC spend"}}]}"#,
        ))
        .await;

        let prompt = send(&harness, "U-OP", "the usual ppc thing please").await;

        assert!(prompt.text.starts_with("Ready to create *Audit PPC spend* for Acme / Summit."), "{}", prompt.text);
        assert_eq!(prompt.quick_actions, vec![QuickAction::ConfirmPending, QuickAction::CancelPending]);
        assert_eq!(harness.service.calls(), 0);
    }

    #[tokio::test]
    async fn planned_steps_run_before_task_creation_starts() {
        let harness = harness(Some(
            r#"{"intent":"create","confidence":0.8,"steps":[
                {"skill_id":"set_active_client","args":{"client":"Zephyr"}},
                {"skill_id":"create_task","args":{"client_id":"c2","title":"Quarterly review"}}
            ]}"#,
        ))
        .await;

        let prompt = send(&harness, "U-OP", "move me over and set up the review").await;

        assert!(prompt.text.starts_with("Now working on Zephyr.\n\nReady to create *Quarterly review* for Zephyr."), "{}", prompt.text);
        let context = harness.sessions.raw_context("U-OP").await.expect("context");
        assert_eq!(context["active_client_id"], "c2");
        assert_eq!(context["pending_task_create"]["client_id"], "c2");
        assert_eq!(harness.service.calls(), 0);
    }

    #[tokio::test]
    async fn denied_planned_step_stops_task_creation_from_starting() {
        let harness = harness(Some(
            r#"{"intent":"admin","confidence":0.8,"steps":[
                {"skill_id":"set_user_role","args":{"external_user_id":"U-VIEW","role":"admin"}},
                {"skill_id":"create_task","args":{"client_id":"c2","title":"Quarterly review"}}
            ]}"#,
        ))
        .await;

        let reply = send(&harness, "U-OP", "promote the viewer and set up the review").await;

        assert_eq!(reply.text, "Only admins can do that.");
        assert!(reply.quick_actions.is_empty());
        let context = harness.sessions.raw_context("U-OP").await.unwrap_or_default();
        assert!(context.get("pending_task_create").is_none());
    }

    #[tokio::test]
    async fn plan_with_two_task_creations_is_refused() {
        let harness = harness(Some(
            r#"{"intent":"create","confidence":0.8,"steps":[
                {"skill_id":"create_task","args":{"client_id":"c1","title":"Audit PPC spend"}},
                {"skill_id":"create_task","args":{"client_id":"c2","title":"Quarterly review"}}
            ]}"#,
        ))
        .await;

        let reply = send(&harness, "U-OP", "set up both of those").await;

        assert!(reply.text.starts_with("I can only set up one task at a time."));
        assert_eq!(harness.service.calls(), 0);
    }

    #[tokio::test]
    async fn channel_messages_are_not_acted_on() {
        let harness = harness(None).await;
        let mut message = dm("U-OP", "list clients");
        message.channel_id = "C200".to_string();

        let reply = harness.runtime.handle_message(&message).await.expect("reply");

        assert!(reply.text.contains("only answer in direct messages"));
    }
}

//! Fail-closed plan execution over a static skill-dispatch map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use taskpilot_core::domain::actor::{ActorContext, SurfaceContext};
use taskpilot_core::domain::plan::{ExecutionPlan, ExecutionResult, PlanStep, SkillArgs, StepResult, StepStatus};
use taskpilot_core::domain::session::{ContextPatch, SessionContext};

use crate::guardrails::PolicyDecision;

/// Everything a handler may read about the request it runs for.
#[derive(Clone, Debug)]
pub struct SkillContext {
    pub actor: ActorContext,
    pub surface: SurfaceContext,
    pub session_id: String,
    pub context: SessionContext,
    pub correlation_id: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkillOutput {
    pub message: String,
    pub patch: ContextPatch,
}

impl SkillOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), patch: ContextPatch::default() }
    }

    pub fn with_patch(mut self, patch: ContextPatch) -> Self {
        self.patch = patch;
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SkillError {
    #[error("invalid skill input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store failure: {0}")]
    Store(String),
    /// The handler already knows what to tell the user.
    #[error("{0}")]
    Rejected(String),
}

impl SkillError {
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(message) | Self::NotFound(message) | Self::Rejected(message) => {
                message.clone()
            }
            Self::Store(_) => "I couldn't reach our records just now. Please try again.".to_string(),
        }
    }
}

#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn handle(&self, ctx: &SkillContext, args: &SkillArgs) -> Result<SkillOutput, SkillError>;
}

pub type HandlerMap = HashMap<&'static str, Arc<dyn SkillHandler>>;

/// Runs `plan` step by step.
///
/// A denied step stops the plan and marks every later step skipped. Missing
/// handlers and handler failures are recorded as errors and execution moves
/// on. Each step sees the context patches of the steps before it.
pub async fn execute_plan<F>(
    plan: &ExecutionPlan,
    handlers: &HandlerMap,
    ctx: &mut SkillContext,
    check_policy: F,
) -> (ExecutionResult, ContextPatch)
where
    F: Fn(&PlanStep) -> PolicyDecision,
{
    let mut result = ExecutionResult::default();
    let mut patch = ContextPatch::default();

    for (index, step) in plan.steps.iter().enumerate() {
        let decision = check_policy(step);
        if !decision.allowed {
            warn!(
                event_name = "executor.step.denied",
                correlation_id = %ctx.correlation_id,
                skill_id = %step.skill_id,
                step = index,
                reason_code = decision.reason_code,
                "plan step denied; aborting remaining steps"
            );
            result.record(StepResult {
                skill_id: step.skill_id.clone(),
                status: StepStatus::Denied,
                reason: decision.reason_code.to_string(),
                user_message: decision.user_message,
            });
            for skipped in &plan.steps[index + 1..] {
                result.record(StepResult {
                    skill_id: skipped.skill_id.clone(),
                    status: StepStatus::Skipped,
                    reason: "previous_step_denied".to_string(),
                    user_message: String::new(),
                });
            }
            result.aborted = true;
            break;
        }

        let Some(handler) = handlers.get(step.skill_id.as_str()) else {
            warn!(
                event_name = "executor.step.no_handler",
                correlation_id = %ctx.correlation_id,
                skill_id = %step.skill_id,
                "no handler registered for skill"
            );
            result.record(StepResult {
                skill_id: step.skill_id.clone(),
                status: StepStatus::Error,
                reason: "handler_missing".to_string(),
                user_message: format!("I can't run `{}` right now.", step.skill_id),
            });
            continue;
        };

        match handler.handle(ctx, &step.args).await {
            Ok(output) => {
                ctx.context.apply(&output.patch);
                patch = patch.merge(output.patch);
                result.record(StepResult {
                    skill_id: step.skill_id.clone(),
                    status: StepStatus::Success,
                    reason: "ok".to_string(),
                    user_message: output.message,
                });
            }
            Err(error) => {
                warn!(
                    event_name = "executor.step.failed",
                    correlation_id = %ctx.correlation_id,
                    skill_id = %step.skill_id,
                    error = %error,
                    "plan step failed; continuing"
                );
                result.record(StepResult {
                    skill_id: step.skill_id.clone(),
                    status: StepStatus::Error,
                    reason: error.to_string(),
                    user_message: error.user_message(),
                });
            }
        }
    }

    info!(
        event_name = "executor.plan.finished",
        correlation_id = %ctx.correlation_id,
        intent = %plan.intent,
        succeeded = result.steps_succeeded,
        failed = result.steps_failed,
        denied = result.steps_denied,
        skipped = result.steps_skipped,
        aborted = result.aborted,
        "plan execution finished"
    );
    (result, patch)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use taskpilot_core::domain::actor::{ActorContext, ActorRole, SurfaceContext, SurfaceType};
    use taskpilot_core::domain::plan::{ExecutionPlan, PlanStep, SkillArgs, StepStatus, TokenUsage};
    use taskpilot_core::domain::session::{ContextPatch, Patch, SessionContext};

    use super::{execute_plan, HandlerMap, SkillContext, SkillError, SkillHandler, SkillOutput};
    use crate::guardrails::PolicyDecision;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SkillHandler for Counting {
        async fn handle(&self, ctx: &SkillContext, _args: &SkillArgs) -> Result<SkillOutput, SkillError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SkillError::NotFound("No client matches \"zzz\".".to_string()));
            }
            let seen = ctx.context.active_client_id.clone().unwrap_or_else(|| "none".to_string());
            Ok(SkillOutput::message(format!("seen {seen}")).with_patch(ContextPatch {
                active_client_id: Patch::Set("c1".to_string()),
                ..ContextPatch::default()
            }))
        }
    }

    fn step(skill_id: &str) -> PlanStep {
        PlanStep {
            skill_id: skill_id.to_string(),
            args: json!({}).as_object().cloned().unwrap_or_default(),
            requires_confirmation: false,
            reason: String::new(),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan { intent: "test".to_string(), steps, confidence: 0.9, usage: TokenUsage::default() }
    }

    fn ctx() -> SkillContext {
        SkillContext {
            actor: ActorContext {
                profile_id: Some("p1".to_string()),
                external_user_id: "U1".to_string(),
                role: ActorRole::Operator,
                is_admin: false,
            },
            surface: SurfaceContext { channel_id: "D1".to_string(), surface_type: SurfaceType::Dm },
            session_id: "s1".to_string(),
            context: SessionContext::default(),
            correlation_id: "corr-1".to_string(),
        }
    }

    fn decision(allowed: bool) -> PolicyDecision {
        PolicyDecision {
            allowed,
            reason_code: if allowed { "allowed" } else { "viewer_mutation_denied" },
            user_message: if allowed { String::new() } else { "read-only".to_string() },
            meta: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn denied_first_step_skips_the_rest() {
        let handler = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let mut handlers = HandlerMap::new();
        handlers.insert("create_task", handler.clone() as Arc<dyn SkillHandler>);
        handlers.insert("list_clients", handler.clone() as Arc<dyn SkillHandler>);
        let mut ctx = ctx();

        let (result, patch) = execute_plan(
            &plan(vec![step("create_task"), step("list_clients")]),
            &handlers,
            &mut ctx,
            |step| decision(step.skill_id != "create_task"),
        )
        .await;

        let statuses = result.steps.iter().map(|step| step.status).collect::<Vec<_>>();
        assert_eq!(statuses, vec![StepStatus::Denied, StepStatus::Skipped]);
        assert_eq!(result.steps_succeeded, 0);
        assert!(result.aborted);
        assert!(patch.is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_and_missing_handlers_do_not_abort() {
        let ok = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let failing = Arc::new(Counting { calls: AtomicUsize::new(0), fail: true });
        let mut handlers = HandlerMap::new();
        handlers.insert("set_active_client", failing as Arc<dyn SkillHandler>);
        handlers.insert("list_clients", ok.clone() as Arc<dyn SkillHandler>);
        let mut ctx = ctx();

        let (result, _) = execute_plan(
            &plan(vec![step("set_active_client"), step("list_brands"), step("list_clients")]),
            &handlers,
            &mut ctx,
            |_| decision(true),
        )
        .await;

        let statuses = result.steps.iter().map(|step| step.status).collect::<Vec<_>>();
        assert_eq!(statuses, vec![StepStatus::Error, StepStatus::Error, StepStatus::Success]);
        assert_eq!(result.steps_failed, 2);
        assert!(!result.aborted);
        assert_eq!(result.steps[0].user_message, "No client matches \"zzz\".");
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_steps_see_earlier_patches() {
        let handler = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let mut handlers = HandlerMap::new();
        handlers.insert("list_clients", handler as Arc<dyn SkillHandler>);
        let mut ctx = ctx();

        let (result, patch) = execute_plan(
            &plan(vec![step("list_clients"), step("list_clients")]),
            &handlers,
            &mut ctx,
            |_| decision(true),
        )
        .await;

        assert_eq!(result.summary(), "seen none\nseen c1");
        assert_eq!(patch.active_client_id, Patch::Set("c1".to_string()));
    }
}

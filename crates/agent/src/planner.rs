//! LLM-backed planner. The model proposes; the registry decides.
//!
//! Every field of the model's answer is re-validated. Anything that does not
//! fit the contract yields no plan at all rather than a partial one.

use std::fmt::Write;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use taskpilot_core::domain::plan::{ExecutionPlan, PlanStep, SkillArgs, TokenUsage, MAX_PLAN_STEPS};
use taskpilot_core::domain::session::SessionContext;

use crate::llm::{ChatMessage, LlmClient};
use crate::tools::{SkillRegistry, SkillValidationError};

const MAX_HISTORY_EXCHANGES: usize = 5;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum PlanRejection {
    #[error("llm call failed: {0}")]
    Llm(String),
    #[error("response is not valid plan json: {0}")]
    InvalidJson(String),
    #[error("plan has no steps")]
    Empty,
    #[error("plan has {0} steps; at most {max} are allowed", max = MAX_PLAN_STEPS)]
    TooManySteps(usize),
    #[error("plan confidence {0} is outside 0..=1")]
    InvalidConfidence(f64),
    #[error(transparent)]
    InvalidStep(#[from] SkillValidationError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlan {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    skill_id: String,
    #[serde(default)]
    args: SkillArgs,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(default)]
    reason: String,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<SkillRegistry>,
    system_prompt: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<SkillRegistry>,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Self {
        let system_prompt = build_system_prompt(&registry);
        Self { llm, registry, system_prompt, temperature, max_tokens }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// One completion, validated against the registry. `None` on any failure.
    pub async fn generate_plan(
        &self,
        text: &str,
        context: &SessionContext,
        context_packs: &[String],
        correlation_id: &str,
    ) -> Option<ExecutionPlan> {
        match self.try_generate(text, context, context_packs).await {
            Ok(plan) => {
                info!(
                    event_name = "planner.plan.accepted",
                    correlation_id,
                    intent = %plan.intent,
                    steps = plan.steps.len(),
                    confidence = plan.confidence,
                    prompt_tokens = plan.usage.prompt_tokens,
                    completion_tokens = plan.usage.completion_tokens,
                    "plan accepted"
                );
                Some(plan)
            }
            Err(rejection) => {
                warn!(
                    event_name = "planner.plan.rejected",
                    correlation_id,
                    model = self.llm.model(),
                    reason = %rejection,
                    "plan rejected"
                );
                None
            }
        }
    }

    async fn try_generate(
        &self,
        text: &str,
        context: &SessionContext,
        context_packs: &[String],
    ) -> Result<ExecutionPlan, PlanRejection> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(build_user_prompt(text, context, context_packs)),
        ];
        let completion = self
            .llm
            .complete(&messages, self.temperature, self.max_tokens)
            .await
            .map_err(|error| PlanRejection::Llm(error.to_string()))?;
        let usage = TokenUsage {
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
        };

        parse_plan(&completion.content, &self.registry, usage)
    }
}

pub fn build_system_prompt(registry: &SkillRegistry) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You plan actions for a task-management assistant. Use only the skills listed below.\n",
    );
    prompt.push_str("\nRules:\n");
    let _ = writeln!(prompt, "1) Return ONLY one JSON object, no prose.");
    let _ = writeln!(prompt, "2) Use at most {MAX_PLAN_STEPS} steps.");
    let _ = writeln!(prompt, "3) Never invent skill ids or argument names.");
    let _ = writeln!(prompt, "4) All argument values are strings.");
    let _ = writeln!(prompt, "5) Set requires_confirmation to true for skills marked mutating.");
    prompt.push_str("\nSkills:\n");
    for skill in registry.iter() {
        let _ = writeln!(prompt, "- id: {}", skill.id);
        let _ = writeln!(prompt, "  description: {}", skill.description);
        let _ = writeln!(prompt, "  mutating: {}", skill.mutating);
        if skill.args.is_empty() {
            let _ = writeln!(prompt, "  args: []");
        } else {
            let _ = writeln!(prompt, "  args:");
            for arg in &skill.args {
                let requirement = if arg.required { "required" } else { "optional" };
                let _ = writeln!(prompt, "    - {} ({requirement}): {}", arg.name, arg.description);
            }
        }
    }
    prompt.push_str("\nResponse shape:\n");
    prompt.push_str(
        r#"{"intent":"...","confidence":0.0,"steps":[{"skill_id":"...","args":{},"requires_confirmation":false,"reason":"..."}]}"#,
    );
    prompt.push('\n');
    prompt
}

fn build_user_prompt(text: &str, context: &SessionContext, context_packs: &[String]) -> String {
    let mut prompt = String::new();
    if let Some(client_id) = context.active_client_id.as_deref() {
        let _ = writeln!(prompt, "Active client id: {client_id}\n");
    }

    let history = &context.recent_exchanges;
    if !history.is_empty() {
        prompt.push_str("Recent conversation:\n");
        let skip = history.len().saturating_sub(MAX_HISTORY_EXCHANGES);
        for exchange in history.iter().skip(skip) {
            let _ = writeln!(prompt, "- user: {}", exchange.user_text);
            let _ = writeln!(prompt, "- assistant: {}", exchange.assistant_text);
        }
        prompt.push('\n');
    }

    if !context_packs.is_empty() {
        prompt.push_str("Reference material:\n");
        for pack in context_packs {
            let _ = writeln!(prompt, "{pack}");
        }
        prompt.push('\n');
    }

    let _ = write!(prompt, "Request:\n{}", text.trim());
    prompt
}

/// Parses and validates a raw model answer.
pub fn parse_plan(
    raw: &str,
    registry: &SkillRegistry,
    usage: TokenUsage,
) -> Result<ExecutionPlan, PlanRejection> {
    let body = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|error| PlanRejection::InvalidJson(error.to_string()))?;
    let plan: RawPlan =
        serde_json::from_value(value).map_err(|error| PlanRejection::InvalidJson(error.to_string()))?;

    if plan.steps.is_empty() {
        return Err(PlanRejection::Empty);
    }
    if plan.steps.len() > MAX_PLAN_STEPS {
        return Err(PlanRejection::TooManySteps(plan.steps.len()));
    }
    let confidence = plan.confidence.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(PlanRejection::InvalidConfidence(confidence));
    }

    let mut steps = Vec::with_capacity(plan.steps.len());
    for step in plan.steps {
        registry.validate_args(&step.skill_id, &step.args)?;
        let mutating = registry.get(&step.skill_id).is_some_and(|skill| skill.mutating);
        steps.push(PlanStep {
            skill_id: step.skill_id,
            args: step.args,
            requires_confirmation: step.requires_confirmation || mutating,
            reason: step.reason,
        });
    }

    Ok(ExecutionPlan { intent: plan.intent, steps, confidence, usage })
}

/// Removes a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskpilot_core::domain::plan::TokenUsage;
    use taskpilot_core::domain::session::SessionContext;

    use super::{build_system_prompt, parse_plan, strip_code_fence, PlanRejection, Planner};
    use crate::llm::{LlmClient, ScriptedLlmClient};
    use crate::tools::{SkillRegistry, SkillValidationError};

    fn parse(raw: &str) -> Result<taskpilot_core::domain::plan::ExecutionPlan, PlanRejection> {
        parse_plan(raw, &SkillRegistry::builtin(), TokenUsage::default())
    }

    #[test]
    fn accepts_fenced_valid_plan_and_forces_confirmation_on_mutations() {
        let raw = "```json\n{\"intent\":\"create\",\"confidence\":0.8,\"steps\":[\
                   {\"skill_id\":\"list_brands\",\"args\":{\"client_id\":\"c1\"}},\
                   {\"skill_id\":\"create_task\",\"args\":{\"client_id\":\"c1\",\"title\":\"Fix images\"}}]}\n```";

        let plan = parse(raw).expect("plan");

        assert_eq!(plan.intent, "create");
        assert_eq!(plan.steps.len(), 2);
        assert!(!plan.steps[0].requires_confirmation);
        assert!(plan.steps[1].requires_confirmation);
    }

    #[test]
    fn rejects_contract_violations() {
        let four_steps = r#"{"intent":"x","steps":[
            {"skill_id":"list_clients"},{"skill_id":"list_clients"},
            {"skill_id":"list_clients"},{"skill_id":"list_clients"}]}"#;
        assert_eq!(parse(four_steps), Err(PlanRejection::TooManySteps(4)));

        let unknown = r#"{"intent":"x","steps":[{"skill_id":"drop_tables"}]}"#;
        assert_eq!(
            parse(unknown),
            Err(PlanRejection::InvalidStep(SkillValidationError::UnknownSkill(
                "drop_tables".to_string()
            )))
        );

        let missing_arg = r#"{"intent":"x","steps":[{"skill_id":"list_brands","args":{}}]}"#;
        assert!(matches!(
            parse(missing_arg),
            Err(PlanRejection::InvalidStep(SkillValidationError::MissingArgument { .. }))
        ));

        assert!(matches!(parse("sure, here is a plan"), Err(PlanRejection::InvalidJson(_))));
        assert!(matches!(
            parse(r#"{"intent":"x","steps":[],"extra":1}"#),
            Err(PlanRejection::InvalidJson(_))
        ));
        assert_eq!(parse(r#"{"intent":"x","steps":[]}"#), Err(PlanRejection::Empty));
        assert_eq!(
            parse(r#"{"intent":"x","confidence":1.5,"steps":[{"skill_id":"list_clients"}]}"#),
            Err(PlanRejection::InvalidConfidence(1.5))
        );
    }

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }

    #[test]
    fn system_prompt_lists_only_registered_skills() {
        let prompt = build_system_prompt(&SkillRegistry::builtin());

        assert!(prompt.contains("- id: create_task"));
        assert!(prompt.contains("title (required)"));
        assert!(prompt.contains("at most 3 steps"));
        assert!(!prompt.contains("drop_tables"));
    }

    #[tokio::test]
    async fn generate_plan_carries_token_usage_and_returns_none_on_garbage() {
        let registry = Arc::new(SkillRegistry::builtin());
        let good = Arc::new(ScriptedLlmClient::replying(
            r#"{"intent":"list","confidence":0.9,"steps":[{"skill_id":"list_clients"}]}"#,
        ));
        let planner = Planner::new(good.clone() as Arc<dyn LlmClient>, registry.clone(), 0.1, None);

        let plan = planner
            .generate_plan("who are our clients", &SessionContext::default(), &["[sop] Intro".to_string()], "c1")
            .await
            .expect("plan");
        let sent = good.requests().await;

        assert_eq!(plan.usage.prompt_tokens, 10);
        assert!(sent[0][1].content.contains("Reference material:\n[sop] Intro"));
        assert!(sent[0][1].content.ends_with("who are our clients"));

        let bad = Planner::new(Arc::new(ScriptedLlmClient::replying("nope")), registry, 0.1, None);
        assert!(bad
            .generate_plan("anything", &SessionContext::default(), &[], "c2")
            .await
            .is_none());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_PLAN_STEPS: usize = 3;

pub type SkillArgs = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub skill_id: String,
    #[serde(default)]
    pub args: SkillArgs,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A plan that has passed registry validation. Built only by the planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub intent: String,
    pub steps: Vec<PlanStep>,
    pub confidence: f64,
    pub usage: TokenUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Denied,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub skill_id: String,
    pub status: StepStatus,
    pub reason: String,
    pub user_message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub steps: Vec<StepResult>,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub steps_denied: usize,
    pub steps_skipped: usize,
    pub aborted: bool,
}

impl ExecutionResult {
    pub fn record(&mut self, result: StepResult) {
        match result.status {
            StepStatus::Success => self.steps_succeeded += 1,
            StepStatus::Error => self.steps_failed += 1,
            StepStatus::Denied => self.steps_denied += 1,
            StepStatus::Skipped => self.steps_skipped += 1,
        }
        self.steps.push(result);
    }

    /// User-facing summary in step order, skipping steps with nothing to say.
    pub fn summary(&self) -> String {
        self.steps
            .iter()
            .map(|step| step.user_message.trim())
            .filter(|message| !message.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionResult, StepResult, StepStatus};

    fn step(status: StepStatus, message: &str) -> StepResult {
        StepResult {
            skill_id: "list_clients".to_string(),
            status,
            reason: status.as_str().to_string(),
            user_message: message.to_string(),
        }
    }

    #[test]
    fn record_updates_counts_per_status() {
        let mut result = ExecutionResult::default();
        result.record(step(StepStatus::Success, "ok"));
        result.record(step(StepStatus::Error, "failed"));
        result.record(step(StepStatus::Skipped, ""));

        assert_eq!(result.steps_succeeded, 1);
        assert_eq!(result.steps_failed, 1);
        assert_eq!(result.steps_skipped, 1);
        assert_eq!(result.steps_denied, 0);
        assert_eq!(result.summary(), "ok\nfailed");
    }
}

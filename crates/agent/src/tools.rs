//! Whitelisted skill catalog and argument validation.
//!
//! Every skill the runtime can dispatch, directly or through a plan, is
//! declared here. Anything outside the catalog is rejected before it reaches
//! the policy gate.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use taskpilot_core::domain::plan::SkillArgs;

pub const LIST_CLIENTS: &str = "list_clients";
pub const LIST_BRANDS: &str = "list_brands";
pub const SET_ACTIVE_CLIENT: &str = "set_active_client";
pub const DRAFT_TASK: &str = "draft_task";
pub const CREATE_TASK: &str = "create_task";
pub const SET_USER_ROLE: &str = "set_user_role";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

impl ArgSpec {
    const fn required(name: &'static str, description: &'static str) -> Self {
        Self { name, required: true, description }
    }

    const fn optional(name: &'static str, description: &'static str) -> Self {
        Self { name, required: false, description }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkillSpec {
    pub id: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
    pub mutating: bool,
    pub admin_only: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SkillValidationError {
    #[error("unknown skill `{0}`")]
    UnknownSkill(String),
    #[error("skill `{skill_id}` is missing required argument `{arg}`")]
    MissingArgument { skill_id: String, arg: String },
    #[error("skill `{skill_id}` does not accept argument `{arg}`")]
    UnexpectedArgument { skill_id: String, arg: String },
    #[error("skill `{skill_id}` argument `{arg}` must be a string")]
    InvalidArgument { skill_id: String, arg: String },
}

/// Static catalog of skills, built once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct SkillRegistry {
    skills: BTreeMap<&'static str, SkillSpec>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SkillRegistry {
    pub fn builtin() -> Self {
        let skills = vec![
            SkillSpec {
                id: LIST_CLIENTS,
                description: "List the clients the team works with.",
                args: Vec::new(),
                mutating: false,
                admin_only: false,
            },
            SkillSpec {
                id: LIST_BRANDS,
                description: "List the brands that belong to a client.",
                args: vec![ArgSpec::required("client_id", "Client id or name")],
                mutating: false,
                admin_only: false,
            },
            SkillSpec {
                id: SET_ACTIVE_CLIENT,
                description: "Switch the conversation to a different client.",
                args: vec![ArgSpec::required("client", "Client id, name or alias")],
                mutating: false,
                admin_only: false,
            },
            SkillSpec {
                id: DRAFT_TASK,
                description: "Draft a task description from SOPs and similar past tasks.",
                args: vec![
                    ArgSpec::required("client_id", "Client id or name"),
                    ArgSpec::required("title", "Task title"),
                    ArgSpec::optional("details", "Extra details from the requester"),
                ],
                mutating: false,
                admin_only: false,
            },
            SkillSpec {
                id: CREATE_TASK,
                description: "Create a task in the task-management system.",
                args: vec![
                    ArgSpec::required("client_id", "Client id or name"),
                    ArgSpec::required("title", "Task title"),
                    ArgSpec::optional("description", "Task description"),
                    ArgSpec::optional("brand_id", "Brand id"),
                ],
                mutating: true,
                admin_only: false,
            },
            SkillSpec {
                id: SET_USER_ROLE,
                description: "Change the role of a chat user.",
                args: vec![
                    ArgSpec::required("external_user_id", "Chat user id"),
                    ArgSpec::required("role", "admin, operator or viewer"),
                ],
                mutating: true,
                admin_only: true,
            },
        ];

        Self { skills: skills.into_iter().map(|skill| (skill.id, skill)).collect() }
    }

    pub fn get(&self, skill_id: &str) -> Option<&SkillSpec> {
        self.skills.get(skill_id)
    }

    pub fn contains(&self, skill_id: &str) -> bool {
        self.skills.contains_key(skill_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillSpec> {
        self.skills.values()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Checks `args` against the skill's schema.
    ///
    /// Required arguments must be non-empty strings. Optional arguments may
    /// be strings or `null`. Unknown argument names are rejected.
    pub fn validate_args(&self, skill_id: &str, args: &SkillArgs) -> Result<(), SkillValidationError> {
        let skill = self
            .get(skill_id)
            .ok_or_else(|| SkillValidationError::UnknownSkill(skill_id.to_string()))?;

        for name in args.keys() {
            if !skill.args.iter().any(|arg| arg.name == name) {
                return Err(SkillValidationError::UnexpectedArgument {
                    skill_id: skill_id.to_string(),
                    arg: name.clone(),
                });
            }
        }

        for arg in &skill.args {
            match args.get(arg.name) {
                Some(Value::String(value)) if !arg.required || !value.trim().is_empty() => {}
                Some(Value::Null) | None if !arg.required => {}
                Some(Value::String(_)) | Some(Value::Null) | None => {
                    return Err(SkillValidationError::MissingArgument {
                        skill_id: skill_id.to_string(),
                        arg: arg.name.to_string(),
                    });
                }
                Some(_) => {
                    return Err(SkillValidationError::InvalidArgument {
                        skill_id: skill_id.to_string(),
                        arg: arg.name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Reads a string argument, treating blanks as absent.
pub fn string_arg<'a>(args: &'a SkillArgs, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

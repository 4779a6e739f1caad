//! Built-in skill handlers and the dispatch map the executor runs against.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use taskpilot_core::domain::actor::ActorRole;
use taskpilot_core::domain::client::Client;
use taskpilot_core::domain::mutation::TaskCreateRequest;
use taskpilot_core::domain::plan::SkillArgs;
use taskpilot_core::domain::session::{ContextPatch, Patch};
use taskpilot_core::ports::{ClientDirectory, ProfileDirectory, StoreError};
use taskpilot_core::reliability::{MutationOutcome, ReliableTaskCreator};

use crate::drafting::{DraftRequest, TaskDrafter};
use crate::executor::{HandlerMap, SkillContext, SkillError, SkillHandler, SkillOutput};
use crate::tools::{
    string_arg, CREATE_TASK, DRAFT_TASK, LIST_BRANDS, LIST_CLIENTS, SET_ACTIVE_CLIENT,
    SET_USER_ROLE,
};

impl From<StoreError> for SkillError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(message) => Self::NotFound(message),
            other => Self::Store(other.to_string()),
        }
    }
}

fn required<'a>(args: &'a SkillArgs, name: &str) -> Result<&'a str, SkillError> {
    string_arg(args, name).ok_or_else(|| SkillError::InvalidInput(format!("`{name}` is required.")))
}

/// Finds a client by id first, then by name or alias.
pub async fn resolve_client(clients: &dyn ClientDirectory, hint: &str) -> Result<Client, SkillError> {
    let hint = hint.trim();
    if let Some(client) = clients.find_client(hint).await? {
        return Ok(client);
    }

    let mut matches = clients
        .list_clients()
        .await?
        .into_iter()
        .filter(|client| client.matches_hint(hint))
        .collect::<Vec<_>>();
    match matches.len() {
        0 => Err(SkillError::NotFound(format!("I couldn't find a client matching \"{hint}\"."))),
        1 => Ok(matches.remove(0)),
        _ => {
            let names = matches.iter().map(|client| client.name.as_str()).collect::<Vec<_>>();
            Err(SkillError::InvalidInput(format!(
                "\"{hint}\" matches several clients: {}. Which one?",
                names.join(", ")
            )))
        }
    }
}

pub struct ListClientsSkill {
    clients: Arc<dyn ClientDirectory>,
}

#[async_trait]
impl SkillHandler for ListClientsSkill {
    async fn handle(&self, _ctx: &SkillContext, _args: &SkillArgs) -> Result<SkillOutput, SkillError> {
        let clients = self.clients.list_clients().await?;
        if clients.is_empty() {
            return Ok(SkillOutput::message("No clients are set up yet."));
        }
        let lines = clients.iter().map(|client| format!("- {}", client.name)).collect::<Vec<_>>();
        Ok(SkillOutput::message(format!("Clients:\n{}", lines.join("\n"))))
    }
}

pub struct ListBrandsSkill {
    clients: Arc<dyn ClientDirectory>,
}

#[async_trait]
impl SkillHandler for ListBrandsSkill {
    async fn handle(&self, _ctx: &SkillContext, args: &SkillArgs) -> Result<SkillOutput, SkillError> {
        let client = resolve_client(self.clients.as_ref(), required(args, "client_id")?).await?;
        let brands = self.clients.list_brands(&client.id).await?;
        if brands.is_empty() {
            return Ok(SkillOutput::message(format!("{} has no brands on file.", client.name)));
        }
        let lines = brands.iter().map(|brand| format!("- {}", brand.name)).collect::<Vec<_>>();
        Ok(SkillOutput::message(format!("Brands for {}:\n{}", client.name, lines.join("\n"))))
    }
}

pub struct SetActiveClientSkill {
    clients: Arc<dyn ClientDirectory>,
}

#[async_trait]
impl SkillHandler for SetActiveClientSkill {
    async fn handle(&self, _ctx: &SkillContext, args: &SkillArgs) -> Result<SkillOutput, SkillError> {
        let client = resolve_client(self.clients.as_ref(), required(args, "client")?).await?;
        let patch = ContextPatch {
            active_client_id: Patch::Set(client.id.clone()),
            ..ContextPatch::default()
        };
        Ok(SkillOutput::message(format!("Now working on {}.", client.name)).with_patch(patch))
    }
}

pub struct DraftTaskSkill {
    clients: Arc<dyn ClientDirectory>,
    drafter: TaskDrafter,
}

#[async_trait]
impl SkillHandler for DraftTaskSkill {
    async fn handle(&self, ctx: &SkillContext, args: &SkillArgs) -> Result<SkillOutput, SkillError> {
        let client = resolve_client(self.clients.as_ref(), required(args, "client_id")?).await?;
        let title = required(args, "title")?;
        let request = DraftRequest {
            client_id: &client.id,
            client_name: &client.name,
            brand_name: None,
            title,
            details: string_arg(args, "details"),
        };

        let draft = self.drafter.draft(&request, &ctx.correlation_id).await;
        let mut message = format!("Draft for *{title}*:\n{}", draft.description);
        if draft.has_open_questions() {
            message.push_str("\n\nOpen questions:\n");
            message.push_str(
                &draft.open_questions.iter().map(|q| format!("- {q}")).collect::<Vec<_>>().join("\n"),
            );
        }
        Ok(SkillOutput::message(message))
    }
}

pub struct CreateTaskSkill {
    clients: Arc<dyn ClientDirectory>,
    creator: Arc<ReliableTaskCreator>,
}

#[async_trait]
impl SkillHandler for CreateTaskSkill {
    async fn handle(&self, ctx: &SkillContext, args: &SkillArgs) -> Result<SkillOutput, SkillError> {
        let client = resolve_client(self.clients.as_ref(), required(args, "client_id")?).await?;
        let title = required(args, "title")?;
        let description = string_arg(args, "description").unwrap_or(title);

        let mut request = TaskCreateRequest::new(client.id, title, description);
        request.brand_id = string_arg(args, "brand_id").map(str::to_string);

        let outcome = self.creator.create(&request, &ctx.correlation_id).await;
        let message = outcome.user_message(title);
        match outcome {
            MutationOutcome::Created { .. } | MutationOutcome::Duplicate { .. } => {
                Ok(SkillOutput::message(message))
            }
            MutationOutcome::Busy
            | MutationOutcome::DedupeUnavailable
            | MutationOutcome::Failed { .. } => Err(SkillError::Rejected(message)),
        }
    }
}

pub struct SetUserRoleSkill {
    profiles: Arc<dyn ProfileDirectory>,
}

#[async_trait]
impl SkillHandler for SetUserRoleSkill {
    async fn handle(&self, ctx: &SkillContext, args: &SkillArgs) -> Result<SkillOutput, SkillError> {
        let external_user_id = required(args, "external_user_id")?;
        let role = ActorRole::parse(required(args, "role")?)
            .filter(ActorRole::is_known)
            .ok_or_else(|| {
                SkillError::InvalidInput("Role must be admin, operator or viewer.".to_string())
            })?;

        let profile =
            self.profiles.set_role(external_user_id, role, role == ActorRole::Admin).await?;
        info!(
            event_name = "agent.profile.role_changed",
            correlation_id = %ctx.correlation_id,
            changed_by = %ctx.actor.external_user_id,
            external_user_id,
            role = role.as_str(),
            "user role updated"
        );
        Ok(SkillOutput::message(format!(
            "<@{}> is now {}.",
            profile.external_user_id,
            role.as_str()
        )))
    }
}

/// Builds the skill-id to handler map once at startup.
pub fn build_handler_map(
    clients: Arc<dyn ClientDirectory>,
    profiles: Arc<dyn ProfileDirectory>,
    drafter: TaskDrafter,
    creator: Arc<ReliableTaskCreator>,
) -> HandlerMap {
    let mut handlers = HandlerMap::new();
    handlers.insert(LIST_CLIENTS, Arc::new(ListClientsSkill { clients: clients.clone() }));
    handlers.insert(LIST_BRANDS, Arc::new(ListBrandsSkill { clients: clients.clone() }));
    handlers.insert(SET_ACTIVE_CLIENT, Arc::new(SetActiveClientSkill { clients: clients.clone() }));
    handlers.insert(DRAFT_TASK, Arc::new(DraftTaskSkill { clients: clients.clone(), drafter }));
    handlers.insert(CREATE_TASK, Arc::new(CreateTaskSkill { clients, creator }));
    handlers.insert(SET_USER_ROLE, Arc::new(SetUserRoleSkill { profiles }));
    handlers
}

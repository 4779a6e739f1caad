use std::sync::Arc;

use taskpilot_agent::{
    client_from_config,
    drafting::TaskDrafter,
    guardrails::PolicyGate,
    llm::{LlmClient, LlmError},
    planner::Planner,
    runtime::{AgentRuntime, RuntimeDeps, RuntimeSettings},
    skills::build_handler_map,
    tools::SkillRegistry,
};
use taskpilot_core::audit::TracingAuditSink;
use taskpilot_core::config::{AppConfig, ConfigError, LlmConfig, LoadOptions};
use taskpilot_core::errors::TaskServiceError;
use taskpilot_core::knowledge::TieredRetriever;
use taskpilot_core::reliability::ReliableTaskCreator;
use taskpilot_db::{
    connect_with_config, migrations, DbPool, SqlClientDirectory, SqlKnowledgeBase,
    SqlMutationLedger, SqlOrphanEvents, SqlProfileDirectory, SqlSessionStore,
};
use taskpilot_slack::{
    agent_dispatcher, web::SlackApiError, ReconnectPolicy, SlackSocketTransport, SlackWebClient,
    SocketModeRunner,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::service::AgentMessageService;
use crate::task_service::HttpTaskService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_runtime: Arc<AgentRuntime>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("task service client setup failed: {0}")]
    TaskService(#[source] TaskServiceError),
    #[error("slack client setup failed: {0}")]
    Slack(#[source] SlackApiError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let agent_runtime = Arc::new(build_runtime(&config, &db_pool)?);

    let web = SlackWebClient::new(&config.slack).map_err(BootstrapError::Slack)?;
    let transport = SlackSocketTransport::new(web.clone(), config.slack.app_token.clone());
    let service = AgentMessageService::new(Arc::clone(&agent_runtime));
    let slack_runner = SocketModeRunner::new(
        Arc::new(transport),
        agent_dispatcher(service.clone(), service),
        Arc::new(web),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, db_pool, agent_runtime, slack_runner })
}

fn build_runtime(config: &AppConfig, db_pool: &DbPool) -> Result<AgentRuntime, BootstrapError> {
    let sessions = Arc::new(SqlSessionStore::new(db_pool.clone()));
    let profiles = Arc::new(SqlProfileDirectory::new(db_pool.clone()));
    let clients = Arc::new(SqlClientDirectory::new(db_pool.clone()));
    let ledger = Arc::new(SqlMutationLedger::new(db_pool.clone()));

    let task_service =
        HttpTaskService::from_config(&config.task_service).map_err(BootstrapError::TaskService)?;
    if !task_service.is_configured() {
        warn!(
            event_name = "system.bootstrap.task_service_unconfigured",
            correlation_id = "bootstrap",
            "task service is not configured; task creation will be refused"
        );
    }
    let creator = ReliableTaskCreator::new(
        Arc::new(task_service),
        ledger.clone(),
        Arc::new(SqlOrphanEvents::new(db_pool.clone())),
    )
    .with_retry_policy(config.runtime.retry_policy())
    .with_dedupe_window(config.runtime.dedupe_window());

    let retriever =
        Arc::new(TieredRetriever::new(Arc::new(SqlKnowledgeBase::new(db_pool.clone())), ledger));
    let drafter = TaskDrafter::new(Arc::clone(&retriever), config.runtime.retrieval_max_chars);
    let registry = Arc::new(SkillRegistry::builtin());

    let planner = match build_planner(&config.llm, Arc::clone(&registry)) {
        Ok(planner) => Some(planner),
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.planner_disabled",
                correlation_id = "bootstrap",
                error = %error,
                "llm client unavailable; free-form requests get the fallback reply"
            );
            None
        }
    };

    Ok(AgentRuntime::new(RuntimeDeps {
        sessions,
        profiles: profiles.clone(),
        clients: clients.clone(),
        gate: PolicyGate::new(Arc::clone(&registry), Arc::new(TracingAuditSink)),
        handlers: build_handler_map(clients, profiles, drafter.clone(), Arc::new(creator)),
        drafter,
        retriever,
        planner,
        settings: RuntimeSettings::from_config(&config.runtime),
    }))
}

fn build_planner(config: &LlmConfig, registry: Arc<SkillRegistry>) -> Result<Planner, LlmError> {
    let client: Arc<dyn LlmClient> = Arc::new(client_from_config(config)?);
    info!(
        event_name = "system.bootstrap.planner_ready",
        correlation_id = "bootstrap",
        model = %config.model,
        "planner llm client configured"
    );
    Ok(Planner::new(client, registry, config.temperature, config.max_tokens))
}

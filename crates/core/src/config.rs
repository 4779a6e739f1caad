use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{HistoryLimits, DEFAULT_MAX_EXCHANGES, DEFAULT_MAX_TOKENS};
use crate::domain::knowledge::DEFAULT_MAX_CHARS;
use crate::domain::pending::PENDING_TIMEOUT_MINUTES;
use crate::reliability::mutation::DEFAULT_DEDUPE_WINDOW_HOURS;
use crate::reliability::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};

const ENV_PREFIX: &str = "TASKPILOT";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub task_service: TaskServiceConfig,
    pub runtime: RuntimeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub fallback_model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// External task-management service. Both fields may be absent; calls then
/// fail with a configuration error instead of blocking startup.
#[derive(Clone, Debug)]
pub struct TaskServiceConfig {
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub dedupe_window_hours: i64,
    pub retrieval_max_chars: usize,
    pub pending_timeout_minutes: i64,
    pub history_max_count: usize,
    pub history_max_tokens: usize,
}

impl RuntimeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, Duration::from_millis(self.retry_base_delay_ms))
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits { max_count: self.history_max_count, max_tokens: self.history_max_tokens }
    }

    pub fn dedupe_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedupe_window_hours)
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_timeout_minutes)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            dedupe_window_hours: DEFAULT_DEDUPE_WINDOW_HOURS,
            retrieval_max_chars: DEFAULT_MAX_CHARS,
            pending_timeout_minutes: PENDING_TIMEOUT_MINUTES,
            history_max_count: DEFAULT_MAX_EXCHANGES,
            history_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub task_service_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://taskpilot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                api_base_url: "https://slack.com/api".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                fallback_model: None,
                timeout_secs: 30,
                temperature: 0.2,
                max_tokens: Some(800),
            },
            task_service: TaskServiceConfig { base_url: None, api_token: None, timeout_secs: 20 },
            runtime: RuntimeConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taskpilot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(slack) = patch.slack {
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = secret_value(app_token);
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            set(&mut self.slack.api_base_url, slack.api_base_url);
        }

        if let Some(llm) = patch.llm {
            set(&mut self.llm.provider, llm.provider);
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            set(&mut self.llm.model, llm.model);
            if let Some(fallback_model) = llm.fallback_model {
                self.llm.fallback_model = Some(fallback_model);
            }
            set(&mut self.llm.timeout_secs, llm.timeout_secs);
            set(&mut self.llm.temperature, llm.temperature);
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = Some(max_tokens);
            }
        }

        if let Some(task_service) = patch.task_service {
            if let Some(base_url) = task_service.base_url {
                self.task_service.base_url = Some(base_url);
            }
            if let Some(api_token) = task_service.api_token {
                self.task_service.api_token = Some(secret_value(api_token));
            }
            set(&mut self.task_service.timeout_secs, task_service.timeout_secs);
        }

        if let Some(runtime) = patch.runtime {
            set(&mut self.runtime.retry_max_attempts, runtime.retry_max_attempts);
            set(&mut self.runtime.retry_base_delay_ms, runtime.retry_base_delay_ms);
            set(&mut self.runtime.dedupe_window_hours, runtime.dedupe_window_hours);
            set(&mut self.runtime.retrieval_max_chars, runtime.retrieval_max_chars);
            set(&mut self.runtime.pending_timeout_minutes, runtime.pending_timeout_minutes);
            set(&mut self.runtime.history_max_count, runtime.history_max_count);
            set(&mut self.runtime.history_max_tokens, runtime.history_max_tokens);
        }

        if let Some(server) = patch.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.health_check_port, server.health_check_port);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env("SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LLM_FALLBACK_MODEL") {
            self.llm.fallback_model = Some(value);
        }
        if let Some(value) = read_env("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("LLM_MAX_TOKENS") {
            self.llm.max_tokens = Some(parse_env("LLM_MAX_TOKENS", &value)?);
        }

        if let Some(value) = read_env("TASK_SERVICE_BASE_URL") {
            self.task_service.base_url = Some(value);
        }
        if let Some(value) = read_env("TASK_SERVICE_API_TOKEN") {
            self.task_service.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("TASK_SERVICE_TIMEOUT_SECS") {
            self.task_service.timeout_secs = parse_env("TASK_SERVICE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RUNTIME_RETRY_MAX_ATTEMPTS") {
            self.runtime.retry_max_attempts = parse_env("RUNTIME_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("RUNTIME_RETRY_BASE_DELAY_MS") {
            self.runtime.retry_base_delay_ms = parse_env("RUNTIME_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("RUNTIME_DEDUPE_WINDOW_HOURS") {
            self.runtime.dedupe_window_hours = parse_env("RUNTIME_DEDUPE_WINDOW_HOURS", &value)?;
        }
        if let Some(value) = read_env("RUNTIME_RETRIEVAL_MAX_CHARS") {
            self.runtime.retrieval_max_chars = parse_env("RUNTIME_RETRIEVAL_MAX_CHARS", &value)?;
        }
        if let Some(value) = read_env("RUNTIME_PENDING_TIMEOUT_MINUTES") {
            self.runtime.pending_timeout_minutes =
                parse_env("RUNTIME_PENDING_TIMEOUT_MINUTES", &value)?;
        }
        if let Some(value) = read_env("RUNTIME_HISTORY_MAX_COUNT") {
            self.runtime.history_max_count = parse_env("RUNTIME_HISTORY_MAX_COUNT", &value)?;
        }
        if let Some(value) = read_env("RUNTIME_HISTORY_MAX_TOKENS") {
            self.runtime.history_max_tokens = parse_env("RUNTIME_HISTORY_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_env("SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LOGGING_LEVEL").or_else(|| read_env("LOG_LEVEL")) {
            self.logging.level = value;
        }
        if let Some(value) = read_env("LOGGING_FORMAT").or_else(|| read_env("LOG_FORMAT")) {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.llm.provider, overrides.llm_provider);
        set(&mut self.llm.model, overrides.llm_model);
        if let Some(app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(app_token);
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(bot_token);
        }
        if let Some(base_url) = overrides.task_service_base_url {
            self.task_service.base_url = Some(base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_task_service(&self.task_service)?;
        validate_runtime(&self.runtime)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("taskpilot.toml"), PathBuf::from("config/taskpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required (Basic Information > App-Level Tokens)".to_string(),
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}"
        )));
    }

    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required (OAuth & Permissions > Bot User OAuth Token)".to_string(),
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}"
        )));
    }

    validate_http_url("slack.api_base_url", &slack.api_base_url)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.fallback_model.as_deref().is_some_and(|model| model.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "llm.fallback_model must not be empty when set".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_task_service(task_service: &TaskServiceConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &task_service.base_url {
        validate_http_url("task_service.base_url", base_url)?;
    }

    if task_service.timeout_secs == 0 || task_service.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "task_service.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.retry_max_attempts == 0 || runtime.retry_max_attempts > 10 {
        return Err(ConfigError::Validation(
            "runtime.retry_max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if runtime.dedupe_window_hours <= 0 {
        return Err(ConfigError::Validation(
            "runtime.dedupe_window_hours must be greater than zero".to_string(),
        ));
    }

    if runtime.pending_timeout_minutes <= 0 {
        return Err(ConfigError::Validation(
            "runtime.pending_timeout_minutes must be greater than zero".to_string(),
        ));
    }

    if runtime.retrieval_max_chars == 0 {
        return Err(ConfigError::Validation(
            "runtime.retrieval_max_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
    }
}

fn read_env(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{suffix}")).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: format!("{ENV_PREFIX}_{suffix}"),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    task_service: Option<TaskServicePatch>,
    runtime: Option<RuntimePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    fallback_model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskServicePatch {
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    dedupe_window_hours: Option<i64>,
    retrieval_max_chars: Option<usize>,
    pending_timeout_minutes: Option<i64>,
    history_max_count: Option<usize>,
    history_max_tokens: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

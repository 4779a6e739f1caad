use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use taskpilot_core::config::TaskServiceConfig;
use taskpilot_core::domain::mutation::{CreatedTask, TaskCreateRequest};
use taskpilot_core::errors::TaskServiceError;
use taskpilot_core::ports::TaskService;

/// REST client for the external task tracker. Missing configuration is not a
/// startup failure: every call then fails with a non-retryable
/// `Configuration` error.
pub struct HttpTaskService {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_token: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    scope: &'a str,
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    brand_id: Option<&'a str>,
    title: &'a str,
    description: &'a str,
    assignees: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    id: String,
    url: String,
}

impl HttpTaskService {
    pub fn from_config(config: &TaskServiceConfig) -> Result<Self, TaskServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| TaskServiceError::Configuration(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: config
                .base_url
                .as_deref()
                .map(|base| format!("{}/tasks", base.trim_end_matches('/'))),
            api_token: config.api_token.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_token.is_some()
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn create(&self, request: &TaskCreateRequest) -> Result<CreatedTask, TaskServiceError> {
        let (Some(endpoint), Some(token)) = (&self.endpoint, &self.api_token) else {
            return Err(TaskServiceError::Configuration(
                "task_service.base_url and task_service.api_token are required".to_owned(),
            ));
        };

        let body = CreateTaskBody {
            scope: request.scope_id(),
            client_id: &request.client_id,
            brand_id: request.brand_id.as_deref(),
            title: &request.title,
            description: &request.description,
            assignees: &request.assignees,
        };
        let response = self
            .client
            .post(endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                warn!(event_name = "task_service.request.failed", error = %error, "task service request failed");
                TaskServiceError::Transient(error.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let created: CreateTaskResponse = response
            .json()
            .await
            .map_err(|error| TaskServiceError::Transient(format!("undecodable response: {error}")))?;
        Ok(CreatedTask { id: created.id, url: created.url })
    }
}

/// Maps a non-success HTTP status onto the retry taxonomy.
pub fn classify_status(status: StatusCode, detail: &str) -> TaskServiceError {
    let message = if detail.is_empty() { status.to_string() } else { format!("{status}: {detail}") };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TaskServiceError::Auth(message),
        StatusCode::NOT_FOUND => TaskServiceError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            TaskServiceError::Validation(message)
        }
        StatusCode::TOO_MANY_REQUESTS => TaskServiceError::RateLimit(message),
        status if status.is_server_error() => TaskServiceError::Transient(message),
        _ => TaskServiceError::Validation(message),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use taskpilot_core::config::TaskServiceConfig;
    use taskpilot_core::domain::mutation::TaskCreateRequest;
    use taskpilot_core::errors::TaskServiceError;
    use taskpilot_core::ports::TaskService;

    use super::{classify_status, HttpTaskService};

    #[test]
    fn status_codes_follow_the_retry_taxonomy() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), TaskServiceError::Auth(_)));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, ""), TaskServiceError::Auth(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, ""), TaskServiceError::NotFound(_)));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "title"),
            TaskServiceError::Validation(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::CONFLICT, "").is_retryable());
    }

    #[test]
    fn error_message_keeps_the_response_detail() {
        let error = classify_status(StatusCode::BAD_REQUEST, "title too long");
        assert_eq!(error, TaskServiceError::Validation("400 Bad Request: title too long".to_owned()));
    }

    #[tokio::test]
    async fn unconfigured_service_fails_without_network() {
        let service = HttpTaskService::from_config(&TaskServiceConfig {
            base_url: None,
            api_token: None,
            timeout_secs: 5,
        })
        .expect("client");

        assert!(!service.is_configured());
        let result = service.create(&TaskCreateRequest::new("c1", "Fix feed", "Fix feed")).await;
        assert!(matches!(result, Err(TaskServiceError::Configuration(_))));
    }
}

//! OpenAI-compatible chat completions transport.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, CompletionService, ServiceError, Usage};
use crate::config::GenerationConfig;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    n: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Map a non-success HTTP response to a [`ServiceError`].
pub fn classify_error(status: StatusCode, body: &str, model: &str) -> ServiceError {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if parsed.error.code.as_deref() == Some("context_length_exceeded") {
            return ServiceError::ContextOverflow {
                model: model.to_string(),
            };
        }
        if status == StatusCode::UNAUTHORIZED {
            return ServiceError::Configuration(parsed.error.message);
        }
        return ServiceError::Transient(format!("{status}: {}", parsed.error.message));
    }
    ServiceError::Transient(format!("{status}: {}", body.trim()))
}

/// Chat completions client for OpenAI and compatible servers.
pub struct OpenAiService {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    organization: Option<String>,
}

impl OpenAiService {
    pub fn new(config: &GenerationConfig) -> Result<Self, ServiceError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ServiceError::Configuration(
                "set OPENAI_SECRET_KEY or OPENAI_API_KEY to call the generation service".into(),
            )
        })?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("specforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            organization: config.organization.clone(),
        })
    }

    fn body<'a>(request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: &request.system,
        }];
        for (user, assistant) in &request.examples {
            messages.push(ChatMessage {
                role: "user",
                content: user,
            });
            messages.push(ChatMessage {
                role: "assistant",
                content: assistant,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        ChatRequest {
            model: &request.model,
            messages,
            n: request.n,
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiService {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ServiceError> {
        debug!(kind = ?request.kind, model = %request.model, n = request.n, "chat completion");
        let mut builder = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::body(request));
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, &request.model));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Transient(format!("malformed response: {e}")))?;
        let usage = parsed.usage.map_or_else(
            || Usage {
                model: parsed.model.clone(),
                ..Usage::default()
            },
            |u| Usage {
                model: parsed.model.clone(),
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            },
        );
        Ok(CompletionResponse {
            choices: parsed
                .choices
                .into_iter()
                .map(|c| c.message.content.unwrap_or_default())
                .collect(),
            usage,
        })
    }
}

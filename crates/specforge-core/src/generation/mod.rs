//! Generation client.
//!
//! [`CompletionService`] is the transport seam to the external service.
//! [`GenerationClient`] adds the retry policy on top of it: bounded tries
//! with exponential backoff, model escalation on context overflow, and
//! usage recording into the [`CostLedger`].

pub mod drafting;
pub mod openai;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GenerationConfig;
use crate::domain::{ForgeError, Result};
use crate::ledger::{CostLedger, Stage};
use crate::obs;

pub use drafting::{draft_candidates, DraftDocument};
pub use openai::OpenAiService;

/// Why a request is made; decides the stage it is billed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    DraftCode,
    DraftTests,
    StaticFix,
    Correction,
}

impl RequestKind {
    pub fn stage(&self) -> Stage {
        match self {
            RequestKind::DraftCode | RequestKind::DraftTests => Stage::Generation,
            RequestKind::StaticFix => Stage::StaticRepair,
            RequestKind::Correction => Stage::DynamicRepair,
        }
    }
}

/// One request to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub kind: RequestKind,
    pub system: String,
    /// `(user, assistant)` example exchanges sent before the prompt.
    pub examples: Vec<(String, String)>,
    pub prompt: String,
    /// Independent completions requested.
    pub n: usize,
    pub model: String,
}

impl CompletionRequest {
    pub fn with_n(mut self, n: usize) -> Self {
        self.n = n.max(1);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Token usage reported for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<String>,
    pub usage: Usage,
}

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("context length exceeded for model {model}")]
    ContextOverflow { model: String },

    #[error("{0}")]
    Transient(String),

    #[error("service misconfigured: {0}")]
    Configuration(String),
}

impl From<ServiceError> for ForgeError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ContextOverflow { model } => ForgeError::ContextOverflow { model },
            ServiceError::Transient(msg) => ForgeError::TransientService(msg),
            ServiceError::Configuration(msg) => ForgeError::Config(msg),
        }
    }
}

/// External generation service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ServiceError>;
}

/// Retrying, usage-recording front of a [`CompletionService`].
pub struct GenerationClient {
    service: Arc<dyn CompletionService>,
    ledger: Arc<CostLedger>,
    config: GenerationConfig,
}

impl GenerationClient {
    pub fn new(
        service: Arc<dyn CompletionService>,
        ledger: Arc<CostLedger>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            service,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Single-completion request on the standard model.
    pub fn request(
        &self,
        kind: RequestKind,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> CompletionRequest {
        CompletionRequest {
            kind,
            system: system.into(),
            examples: Vec::new(),
            prompt: prompt.into(),
            n: 1,
            model: self.config.model.clone(),
        }
    }

    /// Issue `request`, retrying up to `max_tries` times.
    ///
    /// A context overflow switches to the escalated model for the remaining
    /// tries without resetting the count. Configuration errors are not retried.
    pub async fn generate(&self, mut request: CompletionRequest) -> Result<CompletionResponse> {
        let max_tries = self.config.max_tries.max(1);
        let stage = request.kind.stage();
        let mut last_error = String::new();

        for attempt in 1..=max_tries {
            let started = Instant::now();
            match self.service.complete(&request).await {
                Ok(response) => {
                    self.ledger.record_usage(stage, &response.usage);
                    obs::emit_generation_call(
                        stage,
                        &response.usage.model,
                        started.elapsed().as_millis() as u64,
                        response.usage.total_tokens(),
                    );
                    return Ok(response);
                }
                Err(ServiceError::ContextOverflow { model }) => {
                    warn!(
                        attempt,
                        model = %model,
                        escalated = %self.config.escalated_model,
                        "context length exceeded, escalating model"
                    );
                    request.model = self.config.escalated_model.clone();
                    last_error = ForgeError::ContextOverflow { model }.to_string();
                }
                Err(ServiceError::Configuration(msg)) => return Err(ForgeError::Config(msg)),
                Err(err) => {
                    warn!(attempt, error = %err, "generation request failed");
                    last_error = ForgeError::from(err).to_string();
                }
            }

            if attempt < max_tries {
                tokio::time::sleep(backoff_delay(self.config.backoff_base_ms, attempt)).await;
            }
        }

        Err(ForgeError::GenerationExhausted {
            tries: max_tries,
            last_error,
        })
    }
}

/// Delay before retry `attempt + 1`: `base_ms * 2^(attempt - 1)`, saturating.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

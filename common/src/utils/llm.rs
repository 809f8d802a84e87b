use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use tokio::time::timeout;

use crate::error::AppError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// The single seam through which the pipelines talk to a completion model.
/// Production uses [`ChatModel`]; tests script responses.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError>;
}

/// Chat-completions backed implementation. Calls are bounded by a deadline so
/// a wedged backend cannot stall a pipeline stage forever.
pub struct ChatModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    request_timeout: Duration,
}

impl ChatModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(max_tokens)
            .messages([ChatCompletionRequestUserMessage::from(prompt).into()])
            .build()?;

        let response = timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::Llm(format!(
                    "completion request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Llm("No content found in LLM response".into()))?;

        Ok(content)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedModel;

#[cfg(any(test, feature = "test-utils"))]
mod scripted {
    use super::{async_trait, AppError, LanguageModel};

    /// Deterministic stand-in for a completion model: routes on a substring
    /// of the prompt, so concurrent callers get stable answers.
    #[derive(Default)]
    pub struct ScriptedModel {
        routes: Vec<(String, String)>,
        fallback: Option<String>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Respond with `response` whenever the prompt contains `pattern`.
        /// Routes are checked in insertion order.
        #[must_use]
        pub fn route(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
            self.routes.push((pattern.into(), response.into()));
            self
        }

        #[must_use]
        pub fn fallback(mut self, response: impl Into<String>) -> Self {
            self.fallback = Some(response.into());
            self
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String, AppError> {
            for (pattern, response) in &self.routes {
                if prompt.contains(pattern.as_str()) {
                    return Ok(response.clone());
                }
            }
            self.fallback
                .clone()
                .ok_or_else(|| AppError::Llm(format!(
                    "scripted model has no route for prompt prefix: {}",
                    prompt.chars().take(80).collect::<String>()
                )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_routes_on_prompt_content() {
        let model = ScriptedModel::new()
            .route("cognitive map", r#"{"summary": "s"}"#)
            .fallback("[]");

        let routed = model
            .generate("please build a cognitive map for this", 128)
            .await
            .expect("routed response");
        assert_eq!(routed, r#"{"summary": "s"}"#);

        let fallback = model.generate("anything else", 128).await.expect("fallback");
        assert_eq!(fallback, "[]");
    }
}

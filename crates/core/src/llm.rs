use crate::traits::LanguageModel;
use crate::ModelError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Chat-completions client for any endpoint speaking the OpenAI wire format
/// (Groq, Gemini's OpenAI layer, local servers).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl OpenAiCompatibleModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::Request("missing API key".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ModelError::Request(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            temperature,
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let payload = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_failure(status, body));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

fn classify_failure(status: StatusCode, body: String) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("rate_limit") {
        return ModelError::RateLimited(format!("{status}: {body}"));
    }
    ModelError::BackendResponse {
        status: status.as_u16(),
        details: body,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{classify_failure, OpenAiCompatibleModel};
    use crate::ModelError;
    use reqwest::StatusCode;
    use std::time::Duration;

    #[test]
    fn too_many_requests_is_a_rate_limit() {
        let error = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
        assert!(matches!(error, ModelError::RateLimited(_)));
    }

    #[test]
    fn rate_limit_body_is_a_rate_limit_even_without_429() {
        let body = r#"{"error":{"code":"rate_limit_exceeded"}}"#.to_string();
        let error = classify_failure(StatusCode::BAD_REQUEST, body);
        assert!(error.is_rate_limit());
    }

    #[test]
    fn other_failures_keep_status() {
        let error = classify_failure(StatusCode::UNAUTHORIZED, "bad key".to_string());
        assert!(matches!(error, ModelError::BackendResponse { status: 401, .. }));
        assert!(!error.is_rate_limit());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = OpenAiCompatibleModel::new(
            "https://api.groq.com/openai/v1",
            "llama-3.3-70b-versatile",
            "  ",
            0.0,
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }
}

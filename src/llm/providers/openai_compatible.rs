use async_trait::async_trait;

use crate::errors::ModelError;
use crate::llm::provider::ModelProvider;
use crate::llm::types::{CallConfig, ChatMessage, ModelTurn};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &CallConfig,
    ) -> Result<ModelTurn, ModelError> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            messages = messages.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, err_body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Envelope(e.to_string()))?;

        let message = &json["choices"][0]["message"];
        let content = message["content"]
            .as_str()
            .ok_or_else(|| {
                ModelError::Envelope(format!("no choices[0].message.content in: {json}"))
            })?
            .to_string();
        let reasoning = message["reasoning_content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        tracing::info!(
            provider = %self.id,
            content_len = content.len(),
            reasoning_len = reasoning.len(),
            "completion received"
        );

        Ok(ModelTurn { content, reasoning })
    }
}

pub(crate) fn classify_http_failure(status: reqwest::StatusCode, body: String) -> ModelError {
    use reqwest::StatusCode;
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ModelError::Auth(format!("{status}: {body}"))
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ModelError::RateLimit(format!("{status}: {body}"))
    } else {
        ModelError::Transport(format!("{status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_failure_classes() {
        let auth = classify_http_failure(reqwest::StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(!auth.is_retryable());

        let rate = classify_http_failure(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow".into());
        assert!(rate.is_retryable());
        assert!(matches!(rate, ModelError::RateLimit(_)));

        let other = classify_http_failure(reqwest::StatusCode::BAD_GATEWAY, "oops".into());
        assert!(matches!(other, ModelError::Transport(_)));
    }
}

use async_trait::async_trait;

use crate::errors::ModelError;
use crate::llm::provider::ModelProvider;
use crate::llm::providers::openai_compatible::classify_http_failure;
use crate::llm::types::{CallConfig, ChatMessage, ContentPart, MessageContent, ModelTurn};

/// DashScope multimodal-generation backend. Same capability surface as the
/// OpenAI-compatible provider, different request/response envelope.
pub struct DashScopeProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl DashScopeProvider {
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
impl ModelProvider for DashScopeProvider {
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
            "input": { "messages": to_dashscope_messages(&messages) },
            "parameters": { "temperature": cfg.temperature, "result_format": "message" },
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            messages = messages.len(),
            "sending generation request"
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
            return Err(classify_dashscope_failure(status, err_body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Envelope(e.to_string()))?;

        // A 200 can still carry an error envelope.
        if json.get("output").is_none() {
            return Err(classify_error_envelope(&json));
        }

        let message = &json["output"]["choices"][0]["message"];
        let content = extract_text(&message["content"]).ok_or_else(|| {
            ModelError::Envelope(format!("no text content in generation output: {json}"))
        })?;
        let reasoning = message["reasoning_content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        tracing::info!(provider = %self.id, content_len = content.len(), "generation received");

        Ok(ModelTurn { content, reasoning })
    }
}

/// Content arrives as either a plain string or a list of `{"text": …}` parts.
fn extract_text(content: &serde_json::Value) -> Option<String> {
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    let parts = content.as_array()?;
    let joined: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn to_dashscope_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let content: Vec<serde_json::Value> = match &m.content {
                MessageContent::Text(t) => vec![serde_json::json!({ "text": t })],
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => serde_json::json!({ "text": text }),
                        ContentPart::ImageUrl { image_url } => {
                            serde_json::json!({ "image": image_url.url })
                        }
                    })
                    .collect(),
            };
            serde_json::json!({ "role": m.role, "content": content })
        })
        .collect()
}

fn classify_dashscope_failure(status: reqwest::StatusCode, body: String) -> ModelError {
    // Throttling sometimes arrives as a 4xx with a code field rather than 429.
    if body.contains("Throttling") {
        return ModelError::RateLimit(format!("{status}: {body}"));
    }
    if body.contains("InvalidApiKey") || body.contains("InvalidAccessKeyId") {
        return ModelError::Auth(format!("{status}: {body}"));
    }
    classify_http_failure(status, body)
}

fn classify_error_envelope(json: &serde_json::Value) -> ModelError {
    let code = json["code"].as_str().unwrap_or_default();
    let message = json["message"].as_str().unwrap_or_default();
    if code.contains("Throttling") {
        ModelError::RateLimit(format!("{code}: {message}"))
    } else if code.contains("InvalidApiKey") {
        ModelError::Auth(format!("{code}: {message}"))
    } else {
        ModelError::Envelope(format!("{code}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_mapping() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user_with_image("data:image/png;base64,AAAA".into(), "tap it".into()),
        ];
        let mapped = to_dashscope_messages(&messages);
        assert_eq!(mapped[0]["content"][0]["text"], "be brief");
        assert_eq!(mapped[1]["content"][0]["image"], "data:image/png;base64,AAAA");
        assert_eq!(mapped[1]["content"][1]["text"], "tap it");
    }

    #[test]
    fn test_extract_text_variants() {
        assert_eq!(
            extract_text(&serde_json::json!("tap(1, 2)")).as_deref(),
            Some("tap(1, 2)")
        );
        assert_eq!(
            extract_text(&serde_json::json!([{ "text": "tap(" }, { "text": "1, 2)" }])).as_deref(),
            Some("tap(1, 2)")
        );
        assert!(extract_text(&serde_json::json!([{ "image": "x" }])).is_none());
    }

    #[test]
    fn test_error_envelope_classes() {
        let rate = classify_error_envelope(&serde_json::json!({
            "code": "Throttling.RateQuota", "message": "requests throttled"
        }));
        assert!(matches!(rate, ModelError::RateLimit(_)));

        let auth = classify_error_envelope(&serde_json::json!({
            "code": "InvalidApiKey", "message": "invalid key"
        }));
        assert!(!auth.is_retryable());
    }
}

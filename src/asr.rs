//! DashScope asynchronous transcription client. Audio goes in as a URL or
//! base64 payload; plain text comes out and is wrapped into a task.

use base64::Engine as _;
use serde_json::Value;

use crate::config::AsrConfig;
use crate::errors::{DroidPilotError, DroidPilotResult};

const POLL_INTERVAL_MS: u64 = 1000;
const MAX_POLLS: u32 = 120;

pub struct AsrClient {
    api_base: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl AsrClient {
    /// API key comes from the DASHSCOPE_API_KEY env var.
    pub fn from_config(config: &AsrConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var("DASHSCOPE_API_KEY").unwrap_or_default(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn transcribe_url(&self, url: &str) -> DroidPilotResult<String> {
        self.transcribe(vec![url.to_string()]).await
    }

    /// Decodes the payload to a temp file and submits its path, matching how
    /// the transcription service accepts local inputs.
    pub async fn transcribe_base64(
        &self,
        audio_base64: &str,
        format: &str,
    ) -> DroidPilotResult<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(audio_base64)
            .map_err(|e| DroidPilotError::Asr(format!("invalid base64 data: {e}")))?;
        let path = std::env::temp_dir().join(format!(
            "droidpilot_asr_{}.{}",
            uuid::Uuid::new_v4(),
            sanitize_format(format)
        ));
        tokio::fs::write(&path, &bytes).await?;
        let result = self.transcribe(vec![path.to_string_lossy().into_owned()]).await;
        let _ = tokio::fs::remove_file(&path).await;
        result
    }

    async fn transcribe(&self, file_urls: Vec<String>) -> DroidPilotResult<String> {
        let submit_url = format!("{}/api/v1/services/audio/asr/transcription", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "input": { "file_urls": file_urls },
            "parameters": {},
        });

        let response = self
            .client
            .post(&submit_url)
            .bearer_auth(&self.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await?;
        let json: Value = response.json().await?;
        let task_id = json["output"]["task_id"]
            .as_str()
            .ok_or_else(|| {
                DroidPilotError::Asr(format!("no task id in submit response: {json}"))
            })?
            .to_string();
        tracing::info!(task_id = %task_id, files = file_urls.len(), "transcription submitted");

        for _ in 0..MAX_POLLS {
            tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
            let poll = self
                .client
                .get(format!("{}/api/v1/tasks/{task_id}", self.api_base))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let json: Value = poll.json().await?;
            match json["output"]["task_status"].as_str().unwrap_or_default() {
                "SUCCEEDED" => return self.collect_text(&json["output"]).await,
                "FAILED" => {
                    let message = json["output"]["message"].as_str().unwrap_or("unknown");
                    return Err(DroidPilotError::Asr(format!(
                        "transcription failed: {message}"
                    )));
                }
                _ => {}
            }
        }
        Err(DroidPilotError::Asr("transcription timed out".into()))
    }

    async fn collect_text(&self, output: &Value) -> DroidPilotResult<String> {
        let mut text = String::new();
        let results = output["results"].as_array().cloned().unwrap_or_default();

        for result in &results {
            append_sentences(&result["transcription"], &mut text);
        }

        // Some models return a URL to the transcript instead of inlining it.
        if text.trim().is_empty() {
            for result in &results {
                let Some(url) = result["transcription_url"].as_str() else {
                    continue;
                };
                let detail: Value = self.client.get(url).send().await?.json().await?;
                for transcript in detail["transcripts"].as_array().into_iter().flatten() {
                    if let Some(t) = transcript["text"].as_str() {
                        text.push_str(t);
                        text.push(' ');
                    } else {
                        append_sentences(transcript, &mut text);
                    }
                }
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            Err(DroidPilotError::Asr("transcription produced no text".into()))
        } else {
            Ok(text)
        }
    }
}

fn append_sentences(transcription: &Value, out: &mut String) {
    for sentence in transcription["sentences"].as_array().into_iter().flatten() {
        if let Some(t) = sentence["text"].as_str() {
            out.push_str(t);
            out.push(' ');
        }
    }
}

fn sanitize_format(format: &str) -> String {
    let cleaned: String = format
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if cleaned.is_empty() {
        "wav".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_format() {
        assert_eq!(sanitize_format("wav"), "wav");
        assert_eq!(sanitize_format("../etc"), "etc");
        assert_eq!(sanitize_format("!!"), "wav");
    }

    #[test]
    fn test_append_sentences_joins_text() {
        let transcription = serde_json::json!({
            "sentences": [{ "text": "打开" }, { "text": "计算器" }]
        });
        let mut out = String::new();
        append_sentences(&transcription, &mut out);
        assert_eq!(out.trim(), "打开 计算器");
    }
}

//! Extractor backed by an OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::prompt::build_prompt;
use super::transcript::parse_learnings;
use super::{ExtractedLearning, Extractor};
use crate::config::ExtractionConfig;
use crate::error::{DaemonError, Result};
use crate::memory::types::Learning;

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 2000;

pub struct OpenAiExtractor {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiExtractor {
    /// Build from config, reading the API key from `config.api_key_env`.
    /// Returns `Ok(None)` when the key is unset or empty.
    pub fn from_env(config: &ExtractionConfig) -> Result<Option<Self>> {
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Self::new(config, key).map(Some),
            _ => {
                tracing::info!(env = %config.api_key_env, "no API key set, extraction disabled");
                Ok(None)
            }
        }
    }

    pub fn new(config: &ExtractionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DaemonError::Extraction(e.to_string()))?;

        tracing::info!(model = %config.model, api_url = %config.api_url, "extractor initialized");
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.api_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DaemonError::Extraction(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DaemonError::Extraction(format!("API returned {status}: {body}")));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DaemonError::Extraction(format!("invalid response body: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DaemonError::Extraction("empty completion".into()))
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, transcript: &str, existing: &[Learning]) -> Result<Vec<ExtractedLearning>> {
        let prompt = build_prompt(transcript, existing);
        let reply = self.complete(&prompt).await?;
        let learnings = parse_learnings(&reply);
        tracing::debug!(candidates = learnings.len(), "extraction reply parsed");
        Ok(learnings)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_url: String) -> ExtractionConfig {
        ExtractionConfig {
            api_url,
            model: "test-model".into(),
            ..Default::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn sends_chat_request_and_parses_learnings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "temperature": 0.3,
                "max_tokens": 2000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "```json\n[{\"title\": \"Use pnpm\", \"learning\": \"Workspaces need pnpm.\", \"confidence\": \"high\", \"type\": \"rule\"}]\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let extractor = OpenAiExtractor::new(&config(server.uri()), "test-key").unwrap();
        let learnings = extractor.extract("[USER]\nuse pnpm\n", &[]).await.unwrap();
        assert_eq!(learnings.len(), 1);
        assert_eq!(learnings[0].title, "Use pnpm");
        assert_eq!(learnings[0].confidence.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let extractor = OpenAiExtractor::new(&config(server.uri()), "k").unwrap();
        let err = extractor.extract("t", &[]).await.unwrap_err();
        assert!(matches!(err, DaemonError::Extraction(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let extractor = OpenAiExtractor::new(&config(server.uri()), "k").unwrap();
        assert!(extractor.extract("t", &[]).await.is_err());
    }

    #[tokio::test]
    async fn prose_reply_yields_no_learnings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Nothing worth keeping.")))
            .mount(&server)
            .await;

        let extractor = OpenAiExtractor::new(&config(server.uri()), "k").unwrap();
        assert!(extractor.extract("t", &[]).await.unwrap().is_empty());
    }

    #[test]
    fn missing_key_disables_extractor() {
        let mut cfg = config("http://localhost".into());
        cfg.api_key_env = "MEMORYD_TEST_KEY_THAT_IS_NEVER_SET".into();
        assert!(OpenAiExtractor::from_env(&cfg).unwrap().is_none());
    }
}

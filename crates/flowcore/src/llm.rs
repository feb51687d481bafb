//! Language-model client boundary and an OpenAI-compatible implementation.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::core::config::{self, Settings};
use crate::core::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Image attached to the newest user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImageInput {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "image/jpeg".to_string(),
        }
    }

    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Opaque, possibly slow text completion.
///
/// `history` is chronological and already bounded by the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        image: Option<&ImageInput>,
    ) -> Result<String, LlmError>;
}

/// Chat-completions client for OpenAI and compatible endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        temperature: f32,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(config::network::llm_timeout()).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        let key = settings.openai_api_key.clone().ok_or(LlmError::NotConfigured)?;
        Self::new(
            settings.openai_base_url.clone(),
            key,
            settings.llm_model.clone(),
            settings.llm_temperature,
        )
    }

    fn request_body(&self, system_prompt: &str, history: &[ChatTurn], image: Option<&ImageInput>) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        let last_user = history.iter().rposition(|turn| turn.role == ChatRole::User);

        for (idx, turn) in history.iter().enumerate() {
            let content = match image {
                Some(image) if Some(idx) == last_user => json!([
                    { "type": "text", "text": turn.content },
                    { "type": "image_url", "image_url": { "url": image.data_url() } },
                ]),
                _ => json!(turn.content),
            };
            messages.push(json!({ "role": turn.role.as_ref(), "content": content }));
        }

        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        image: Option<&ImageInput>,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        log::debug!("LLM request: model={}, turns={}, image={}", self.model, history.len(), image.is_some());

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(system_prompt, history, image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status(status, body));
        }

        let body: Value = response.json().await?;
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;

        // `content` may be null for refusals or tool calls
        Ok(choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// Stand-in used when no API key is configured. Every call fails.
pub struct UnconfiguredLlm;

#[async_trait]
impl LlmClient for UnconfiguredLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[ChatTurn],
        _image: Option<&ImageInput>,
    ) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured)
    }
}

/// The configured client, or [`UnconfiguredLlm`] when the API key is missing.
pub fn client_from_settings(settings: &Settings) -> Result<Arc<dyn LlmClient>, LlmError> {
    match OpenAiClient::from_settings(settings) {
        Ok(client) => Ok(Arc::new(client)),
        Err(LlmError::NotConfigured) => {
            log::warn!("OPENAI_API_KEY is not set, chat mode will answer with an error");
            Ok(Arc::new(UnconfiguredLlm))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> OpenAiClient {
        OpenAiClient::new(base, SecretString::from("sk-test"), "test-model", 0.5).unwrap()
    }

    #[test]
    fn test_image_goes_on_last_user_turn() {
        let history = vec![
            ChatTurn::user("first"),
            ChatTurn::assistant("answer"),
            ChatTurn::user("what is this"),
        ];
        let image = ImageInput::jpeg(vec![1, 2, 3]);
        let body = client("http://localhost").request_body("sys", &history, Some(&image));

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "first");
        assert_eq!(messages[3]["content"][0]["text"], "what is this");
        assert_eq!(messages[3]["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AQID");
    }

    #[tokio::test]
    async fn test_complete_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "  hello there " } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server.uri())
            .complete("sys", &[ChatTurn::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn test_null_content_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": null } }]
            })))
            .mount(&server)
            .await;

        let reply = client(&server.uri()).complete("sys", &[], None).await.unwrap();
        assert_eq!(reply, "");
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).complete("sys", &[], None).await.unwrap_err();
        assert!(matches!(err, LlmError::Status(status, body) if status.as_u16() == 429 && body == "slow down"));
    }
}

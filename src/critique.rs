//! Builds the two-turn persona prompt and sends it to a chat-completion provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigurationError, CritiqueError};
use crate::normalize::NormalizedImagePayload;

type Result<T> = std::result::Result<T, CritiqueError>;

pub const SPOCK_PERSONA: &str = "You are Spock from the original Star Trek series from the 1960s. \
Your main purpose is to provide art critiques of images from the user. \
Your answers should be logical, concise, and devoid of emotional language. \
Maintain a formal tone, using precise vocabulary and structured sentences. \
Include scientific or analytical explanations where applicable. \
The critique should focus on aspects such as composition, use of color, technique, perspective, and thematic elements. \
You will avoid subjective language; instead, rely on objective observations and logical analysis. \
Ask clarifying questions if additional information is needed to provide a logical response.";

pub const ANALYZE_INSTRUCTION: &str = "Analyze this image.";

// https://platform.openai.com/docs/api-reference/chat/create
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System { content: String },
    User { content: Vec<ContentPart> },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize, Debug)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    message: String,
}

/// Something that can answer a chat request with a single text reply.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` over HTTPS.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
}

impl OpenAiChat {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String> {
        let url = self.endpoint();
        debug!(%url, model = %request.model, "sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CritiqueError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CritiqueError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = provider_message(&body);
            warn!(status = status.as_u16(), %message, "chat completion failed");
            return Err(match status.as_u16() {
                401 | 403 => CritiqueError::Authentication(message),
                429 => CritiqueError::RateLimited(message),
                code => CritiqueError::Api {
                    status: code,
                    message,
                },
            });
        }

        extract_reply(&body)
    }
}

fn provider_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "no details given".to_string(),
        Err(_) => body.chars().take(500).collect(),
    }
}

fn extract_reply(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| CritiqueError::MalformedResponse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CritiqueError::MalformedResponse("response has no choices".into()))?
        .message
        .content
        .ok_or_else(|| CritiqueError::MalformedResponse("first choice has no text".into()))
}

#[derive(Debug, Clone)]
pub struct CritiqueSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

pub struct CritiqueRequestBuilder {
    settings: CritiqueSettings,
    backend: Arc<dyn ChatCompletion>,
}

impl CritiqueRequestBuilder {
    pub fn new(settings: CritiqueSettings, backend: Arc<dyn ChatCompletion>) -> Self {
        Self { settings, backend }
    }

    pub fn request(&self, payload: &NormalizedImagePayload, persona: &str) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            messages: vec![
                ChatMessage::System {
                    content: persona.to_string(),
                },
                ChatMessage::User {
                    content: vec![
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: payload.to_image_url(),
                            },
                        },
                        ContentPart::Text {
                            text: ANALYZE_INSTRUCTION.to_string(),
                        },
                    ],
                },
            ],
        }
    }

    pub async fn critique(
        &self,
        payload: &NormalizedImagePayload,
        persona: &str,
    ) -> Result<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(ConfigurationError::MissingCredential)?;

        let request = self.request(payload, persona);
        let reply = self.backend.complete(api_key, &request).await?;
        info!(chars = reply.len(), "critique received");
        Ok(reply)
    }
}

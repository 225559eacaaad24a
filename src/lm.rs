//! Language-model gateway: OCR text extraction, note summarization and
//! flashcard generation over a chat-completions HTTP API.
//!
//! The provider returns free-form text, so anything expected to be
//! structured (the flashcard list) is validated defensively before it
//! reaches the rest of the system.

use std::time::Duration;

use axum::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::error::AppError;

const CHAT_MODEL: &str = "gpt-4o";

const ALLOWED_IMAGE_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

const SUMMARY_SYSTEM_PROMPT: &str = "You are a professional note summarizer. Create clear, \
concise summaries while maintaining key information. Format the summary as simple HTML \
using headings, paragraphs and lists.";

const FLASHCARD_SYSTEM_PROMPT: &str = "You create study flashcards. Respond with only a \
JSON array where every element is an object with exactly two string fields: \"term\" and \
\"definition\".";

const EXTRACT_PROMPT: &str =
    "Extract all readable text from this image. Return only the extracted text.";

/// Image input for OCR: either a fetchable URL (e.g. a presigned object
/// link) or raw bytes.
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone)]
pub struct SummaryOutput {
    pub html: String,
    pub tokens_used: u32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn extract_text(
        &self,
        image: ImageSource,
        content_type: &str,
    ) -> Result<String, AppError>;

    async fn summarize(&self, text: &str) -> Result<SummaryOutput, AppError>;

    async fn generate_flashcards(&self, text: &str) -> Result<Vec<Flashcard>, AppError>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

pub struct OpenAiModel {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiModel {
    pub fn new(config: &Config, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            endpoint: config.lm_endpoint.trim_end_matches('/').to_string(),
            api_key: config.lm_api_key.clone(),
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<(String, u32), AppError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "language model returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response.json().await?;
        let tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0);
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Upstream("language model returned no choices".to_string()))?;
        Ok((content, tokens))
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn extract_text(
        &self,
        image: ImageSource,
        content_type: &str,
    ) -> Result<String, AppError> {
        ensure_supported_image(content_type)?;

        let image_url = match image {
            ImageSource::Url(url) => url,
            ImageSource::Bytes(bytes) => {
                format!("data:{content_type};base64,{}", STANDARD.encode(bytes))
            }
        };

        let request = ChatRequest {
            model: CHAT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: json!([
                    { "type": "text", "text": EXTRACT_PROMPT },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ]),
            }],
            temperature: None,
            max_tokens: None,
        };

        let (text, _) = self.complete(&request).await?;
        Ok(text)
    }

    async fn summarize(&self, text: &str) -> Result<SummaryOutput, AppError> {
        let request = ChatRequest {
            model: CHAT_MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: json!(SUMMARY_SYSTEM_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: json!(format!(
                        "Please summarize and enhance these notes:\n\n{text}"
                    )),
                },
            ],
            temperature: Some(0.7),
            max_tokens: Some(2000),
        };

        let (html, tokens_used) = self.complete(&request).await?;
        Ok(SummaryOutput { html, tokens_used })
    }

    async fn generate_flashcards(&self, text: &str) -> Result<Vec<Flashcard>, AppError> {
        let request = ChatRequest {
            model: CHAT_MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: json!(FLASHCARD_SYSTEM_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: json!(format!(
                        "Create flashcards from the following study material:\n\n{text}"
                    )),
                },
            ],
            temperature: Some(0.7),
            max_tokens: Some(2000),
        };

        let (content, _) = self.complete(&request).await?;
        parse_flashcards(&content)
    }
}

pub fn ensure_supported_image(content_type: &str) -> Result<(), AppError> {
    if ALLOWED_IMAGE_TYPES.contains(&content_type) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Unsupported image type {content_type}. Only PNG, JPEG, GIF, and WebP are supported."
        )))
    }
}

/// Parses the provider's flashcard answer. Every element must carry both
/// `term` and `definition`; anything else is a malformed upstream response.
pub fn parse_flashcards(content: &str) -> Result<Vec<Flashcard>, AppError> {
    serde_json::from_str(json_payload(content)).map_err(|_| {
        AppError::Upstream("language model returned malformed flashcards".to_string())
    })
}

/// Strips a surrounding markdown code fence, which models routinely add
/// around JSON answers.
fn json_payload(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim().trim_end_matches("```").trim()
}

/// Canned model for tests.
#[cfg(test)]
pub struct ScriptedModel {
    pub extracted_text: String,
    pub summary_html: String,
    pub flashcards_json: String,
}

#[cfg(test)]
impl Default for ScriptedModel {
    fn default() -> Self {
        Self {
            extracted_text: "photosynthesis converts light into chemical energy".to_string(),
            summary_html: "<h1>Photosynthesis</h1><p>Light becomes chemical energy.</p>"
                .to_string(),
            flashcards_json: r#"[{"term":"Photosynthesis","definition":"Light to chemical energy"},{"term":"Chlorophyll","definition":"Green pigment"}]"#
                .to_string(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn extract_text(
        &self,
        _image: ImageSource,
        content_type: &str,
    ) -> Result<String, AppError> {
        ensure_supported_image(content_type)?;
        Ok(self.extracted_text.clone())
    }

    async fn summarize(&self, _text: &str) -> Result<SummaryOutput, AppError> {
        Ok(SummaryOutput {
            html: self.summary_html.clone(),
            tokens_used: 128,
        })
    }

    async fn generate_flashcards(&self, _text: &str) -> Result<Vec<Flashcard>, AppError> {
        parse_flashcards(&self.flashcards_json)
    }
}

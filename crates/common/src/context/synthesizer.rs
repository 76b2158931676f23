//! Answer generation - turns a question and assembled context into text
//!
//! Provides:
//! - The `Generator` seam the RAG service depends on
//! - An OpenAI-compatible chat-completions client for OpenAI and OpenRouter

use crate::config::{GenerationConfig, GenerationProvider};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Produces an answer grounded in the given context
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, question: &str, context: &str) -> Result<String>;

    /// Identifier for logs
    fn model_name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You are a knowledgeable assistant for homeopathic materia medica. \
You answer strictly from the reference excerpts supplied by the user.";

/// Grounding instructions sent with every question
fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using ONLY the excerpts below.\n\n\
        Rules:\n\
        1. Do not use knowledge outside the excerpts.\n\
        2. If the excerpts do not contain the answer, reply exactly: \
        \"Information not found in the provided corpus.\"\n\
        3. Reference every statement with the matching [Source N] label.\n\
        4. When several remedies apply, list each with its specific indications.\n\n\
        EXCERPTS:\n{}\n\n\
        QUESTION: {}\n\n\
        Answer with citations:",
        context, question
    )
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completions client; the provider is fixed at construction
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    provider: GenerationProvider,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionGenerator {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = config.api_key()?.to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint: format!("{}/chat/completions", config.base_url().trim_end_matches('/')),
            api_key,
            model: config.model().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn provider(&self) -> GenerationProvider {
        self.provider
    }
}

#[async_trait]
impl Generator for ChatCompletionGenerator {
    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let prompt = build_prompt(question, context);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request);

        if self.provider == GenerationProvider::OpenRouter {
            builder = builder.header("X-Title", "DR-RAG");
        }

        let response = builder.send().await.map_err(|e| AppError::Generation {
            message: format!("LLM API request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::Generation {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::Generation {
                message: "Empty response from LLM".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

//! External AI collaborators: text generation and audio transcription.
//!
//! Both are thin HTTP proxies behind service traits so tests can
//! substitute fakes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::ai::model::{ChatMessage, ChatRequest, ChatResponse, TranscriptionResponse};
use crate::config::Ai;

pub mod model;

const GENERATION_PROMPT: &str = "You are a social media copywriter. Turn the user's idea into \
an engaging, concise post with a hook, a few short paragraphs or bullet points, and relevant \
hashtags. Answer with the post text only.";

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, idea: &str) -> Result<String>;
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, content_type: &str, audio: Vec<u8>) -> Result<String>;
}

#[derive(Clone)]
pub struct AiClient {
    http: Client,
    generation_url: String,
    generation_model: String,
    transcription_url: String,
    api_key: String,
}

impl AiClient {
    pub fn from_config(cfg: &Ai) -> Self {
        Self::new(
            &cfg.generation_url,
            &cfg.generation_model,
            &cfg.transcription_url,
            &cfg.api_key,
        )
    }

    pub fn new(
        generation_url: &str,
        generation_model: &str,
        transcription_url: &str,
        api_key: &str,
    ) -> Self {
        let http = Client::builder()
            .user_agent("contentgenie/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            generation_url: generation_url.to_string(),
            generation_model: generation_model.to_string(),
            transcription_url: transcription_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl GenerationService for AiClient {
    async fn generate(&self, idea: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.generation_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: GENERATION_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: idea,
                },
            ],
        };

        let response = self
            .http
            .post(&self.generation_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("failed to reach generation service")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("generation service returned {status}: {body}"));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse generation response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("generation response has no choices"))?;
        info!(chars = text.len(), "generated post text");
        Ok(text)
    }
}

#[async_trait]
impl TranscriptionService for AiClient {
    async fn transcribe(&self, content_type: &str, audio: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio")
            .mime_str(content_type)
            .context("invalid audio content type")?;
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let response = self
            .http
            .post(&self.transcription_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("failed to reach transcription service")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("transcription service returned {status}: {body}"));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;
        Ok(parsed.text)
    }
}

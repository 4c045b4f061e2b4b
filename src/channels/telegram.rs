use super::{kind_for_status, ChannelAdapter, ChannelError, PublishContent};
use crate::model::{AccountData, ErrorKind, ServiceKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Telegram Bot API message limit.
const MAX_MESSAGE_CHARS: usize = 4096;

pub struct TelegramChannel {
    http: Client,
    api_base: String,
}

impl TelegramChannel {
    pub fn new(api_base: &str) -> Self {
        let http = Client::builder()
            .user_agent("contentgenie/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    async fn publish(
        &self,
        account: &AccountData,
        content: &PublishContent,
    ) -> Result<String, ChannelError> {
        let token = account.token.as_deref().ok_or_else(|| {
            ChannelError::new(ErrorKind::AuthInvalid, "account has no bot token")
        })?;
        let chat_id = account.chat_id.as_deref().ok_or_else(|| {
            ChannelError::new(ErrorKind::AuthInvalid, "account has no chat_id")
        })?;

        let message = content.caption();
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChannelError::new(
                ErrorKind::PayloadRejected,
                format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
            ));
        }

        // Photo posts go through sendPhoto with the text as caption.
        let (method, payload) = match content.media_urls.first() {
            Some(photo_url) => (
                "sendPhoto",
                json!({
                    "chat_id": chat_id,
                    "photo": photo_url,
                    "caption": message,
                }),
            ),
            None => (
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": message,
                }),
            ),
        };

        let url = format!("{}/bot{}/{}", self.api_base, token, method);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::network(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::new(
                kind_for_status(status),
                format!("telegram returned {status}: {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChannelError::network(&e))?;
        body["result"]["message_id"]
            .as_i64()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                ChannelError::new(ErrorKind::Unknown, "telegram response has no message_id")
            })
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Telegram
    }
}

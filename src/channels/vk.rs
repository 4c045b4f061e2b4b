use super::{ChannelAdapter, ChannelError, PublishContent};
use crate::model::{AccountData, ErrorKind, ServiceKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

pub struct VkChannel {
    http: Client,
    api_base: String,
    api_version: String,
}

impl VkChannel {
    pub fn new(api_base: &str, api_version: &str) -> Self {
        let http = Client::builder()
            .user_agent("contentgenie/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
        }
    }

    /// VK reports failures inside a 200 body; map its error codes onto the
    /// shared classification.
    fn kind_for_vk_code(code: i64) -> ErrorKind {
        match code {
            5 => ErrorKind::AuthInvalid,
            6 | 9 | 29 => ErrorKind::RateLimited,
            100 | 214 => ErrorKind::PayloadRejected,
            _ => ErrorKind::Unknown,
        }
    }
}

#[async_trait]
impl ChannelAdapter for VkChannel {
    async fn publish(
        &self,
        account: &AccountData,
        content: &PublishContent,
    ) -> Result<String, ChannelError> {
        let access_token = account.access_token.as_deref().ok_or_else(|| {
            ChannelError::new(ErrorKind::AuthInvalid, "account has no access token")
        })?;
        let group_id = account.group_id.as_deref().ok_or_else(|| {
            ChannelError::new(ErrorKind::AuthInvalid, "account has no group_id")
        })?;

        // Group walls use negative owner ids.
        let owner_id = format!("-{group_id}");
        let message = content.caption();
        let mut params = vec![
            ("access_token", access_token.to_string()),
            ("v", self.api_version.clone()),
            ("owner_id", owner_id),
            ("from_group", "1".to_string()),
            ("message", message),
        ];
        if !content.media_urls.is_empty() {
            params.push(("attachments", content.media_urls.join(",")));
        }

        let url = format!("{}/method/wall.post", self.api_base);
        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ChannelError::network(&e))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| ChannelError::network(&e))?;

        if let Some(error) = body.get("error") {
            let code = error["error_code"].as_i64().unwrap_or(-1);
            let msg = error["error_msg"].as_str().unwrap_or("unknown VK error");
            return Err(ChannelError::new(
                Self::kind_for_vk_code(code),
                format!("vk error {code}: {msg}"),
            ));
        }

        body["response"]["post_id"]
            .as_i64()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                ChannelError::new(
                    ErrorKind::Unknown,
                    format!("vk returned {status} without a post_id"),
                )
            })
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Vk
    }
}

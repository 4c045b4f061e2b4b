use super::{kind_for_status, ChannelAdapter, ChannelError, PublishContent};
use crate::model::{AccountData, ErrorKind, ServiceKind};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Instagram Graph API adapter. Publishing is a two-step flow: create a
/// media container, then publish it. Both steps count as the adapter's
/// single logical external call for retry purposes.
pub struct InstagramChannel {
    http: Client,
    api_base: String,
}

impl InstagramChannel {
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

    fn kind_for_graph_code(code: i64) -> ErrorKind {
        match code {
            190 => ErrorKind::AuthInvalid,
            4 | 17 | 32 => ErrorKind::RateLimited,
            100 => ErrorKind::PayloadRejected,
            _ => ErrorKind::Unknown,
        }
    }

    async fn graph_call(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, ChannelError> {
        let response = self
            .http
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| ChannelError::network(&e))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| ChannelError::network(&e))?;

        if let Some(error) = body.get("error") {
            let code = error["code"].as_i64().unwrap_or(-1);
            let msg = error["message"].as_str().unwrap_or("unknown Graph error");
            let kind = match Self::kind_for_graph_code(code) {
                ErrorKind::Unknown => kind_for_status(status),
                kind => kind,
            };
            return Err(ChannelError::new(kind, format!("graph error {code}: {msg}")));
        }
        if !status.is_success() {
            return Err(ChannelError::new(
                kind_for_status(status),
                format!("graph returned {status}"),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl ChannelAdapter for InstagramChannel {
    async fn publish(
        &self,
        account: &AccountData,
        content: &PublishContent,
    ) -> Result<String, ChannelError> {
        let access_token = account.access_token.as_deref().ok_or_else(|| {
            ChannelError::new(ErrorKind::AuthInvalid, "account has no access token")
        })?;
        let ig_user_id = account.user_id.as_deref().ok_or_else(|| {
            ChannelError::new(ErrorKind::AuthInvalid, "account has no instagram user id")
        })?;
        let image_url = content.media_urls.first().ok_or_else(|| {
            ChannelError::new(
                ErrorKind::PayloadRejected,
                "instagram requires at least one media url",
            )
        })?;

        let caption = content.caption();
        let container = self
            .graph_call(
                &format!("{}/{}/media", self.api_base, ig_user_id),
                &[
                    ("image_url", image_url.as_str()),
                    ("caption", caption.as_str()),
                    ("access_token", access_token),
                ],
            )
            .await?;
        let creation_id = container["id"].as_str().ok_or_else(|| {
            ChannelError::new(ErrorKind::Unknown, "graph response has no container id")
        })?;

        let published = self
            .graph_call(
                &format!("{}/{}/media_publish", self.api_base, ig_user_id),
                &[("creation_id", creation_id), ("access_token", access_token)],
            )
            .await?;
        published["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChannelError::new(ErrorKind::Unknown, "graph response has no media id"))
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Instagram
    }
}

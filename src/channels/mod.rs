//! Channel adapters: one implementation per social service.
//!
//! An adapter translates generic publish content into a single wire call
//! against its service and reports a normalized outcome. Adapters never
//! retry and never sleep; retry, timeout, and concurrency all belong to
//! the dispatch policy.

use crate::model::{AccountData, ErrorKind, ServiceKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod instagram;
pub mod telegram;
pub mod vk;

pub use instagram::InstagramChannel;
pub use telegram::TelegramChannel;
pub use vk::VkChannel;

/// Normalized adapter failure: a classification plus a human-readable
/// message for the result list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct ChannelError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChannelError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        Self::new(ErrorKind::NetworkError, err.to_string())
    }
}

/// Generic content of one publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishContent {
    pub title: String,
    pub text: String,
    pub media_urls: Vec<String>,
}

impl PublishContent {
    /// Title and body joined the way every adapter renders a caption.
    pub fn caption(&self) -> String {
        if self.title.trim().is_empty() {
            self.text.clone()
        } else {
            format!("{}\n\n{}", self.title, self.text)
        }
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// One external network call; `Ok` carries the external message id.
    async fn publish(
        &self,
        account: &AccountData,
        content: &PublishContent,
    ) -> Result<String, ChannelError>;

    fn service(&self) -> ServiceKind;
}

/// Failure classification for plain HTTP status responses.
pub(crate) fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthInvalid,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::BAD_REQUEST => ErrorKind::PayloadRejected,
        _ => ErrorKind::Unknown,
    }
}

/// Adapters keyed by service kind. Kinds without an entry (twitter, dzen)
/// are unsupported and fail terminally at dispatch.
pub struct ChannelRegistry {
    adapters: HashMap<ServiceKind, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn from_config(services: &crate::config::Services) -> Self {
        let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
            Arc::new(TelegramChannel::new(&services.telegram_api_base)),
            Arc::new(VkChannel::new(&services.vk_api_base, &services.vk_api_version)),
            Arc::new(InstagramChannel::new(&services.instagram_api_base)),
        ];
        Self::from_adapters(adapters)
    }

    pub fn from_adapters(adapters: Vec<Arc<dyn ChannelAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.service(), adapter))
                .collect(),
        }
    }

    pub fn adapter_for(&self, kind: ServiceKind) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_joins_title_and_text() {
        let content = PublishContent {
            title: "Morning routine".into(),
            text: "Stretch for 15 minutes.".into(),
            media_urls: vec![],
        };
        assert_eq!(content.caption(), "Morning routine\n\nStretch for 15 minutes.");

        let untitled = PublishContent {
            text: "just text".into(),
            ..Default::default()
        };
        assert_eq!(untitled.caption(), "just text");
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            kind_for_status(StatusCode::UNAUTHORIZED),
            ErrorKind::AuthInvalid
        );
        assert_eq!(
            kind_for_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::RateLimited
        );
        assert_eq!(
            kind_for_status(StatusCode::BAD_REQUEST),
            ErrorKind::PayloadRejected
        );
        assert_eq!(
            kind_for_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorKind::Unknown
        );
    }
}

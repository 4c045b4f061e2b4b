use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Social services a user can connect. Twitter and Dzen are recognized but
/// have no channel adapter yet; publishing to them fails terminally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Telegram,
    Instagram,
    Vk,
    Twitter,
    Dzen,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Telegram => "telegram",
            ServiceKind::Instagram => "instagram",
            ServiceKind::Vk => "vk",
            ServiceKind::Twitter => "twitter",
            ServiceKind::Dzen => "dzen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram" => Some(ServiceKind::Telegram),
            "instagram" => Some(ServiceKind::Instagram),
            "vk" => Some(ServiceKind::Vk),
            "twitter" => Some(ServiceKind::Twitter),
            "dzen" => Some(ServiceKind::Dzen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Publishing,
    Published,
    PartiallyPublished,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::PartiallyPublished => "partially_published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "publishing" => Some(PostStatus::Publishing),
            "published" => Some(PostStatus::Published),
            "partially_published" => Some(PostStatus::PartiallyPublished),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

/// Lifecycle of a single (post, account) publish attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Pending => "pending",
            AttemptState::InFlight => "in_flight",
            AttemptState::Succeeded => "succeeded",
            AttemptState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttemptState::Pending),
            "in_flight" => Some(AttemptState::InFlight),
            "succeeded" => Some(AttemptState::Succeeded),
            "failed" => Some(AttemptState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed)
    }
}

/// Normalized adapter failure classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthInvalid,
    RateLimited,
    PayloadRejected,
    NetworkError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::PayloadRejected => "payload_rejected",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auth_invalid" => Some(ErrorKind::AuthInvalid),
            "rate_limited" => Some(ErrorKind::RateLimited),
            "payload_rejected" => Some(ErrorKind::PayloadRejected),
            "network_error" => Some(ErrorKind::NetworkError),
            "unknown" => Some(ErrorKind::Unknown),
            _ => None,
        }
    }
}

/// Opaque per-service credential bundle stored on a connected account.
/// Which fields are present depends on the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    pub user_id: String,
    pub service: ServiceKind,
    pub account_name: String,
    pub account_data: AccountData,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub generation_id: Option<String>,
    pub title: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub status: PostStatus,
    pub published_to: Option<Vec<PublishedTo>>,
    pub created_at: DateTime<Utc>,
}

/// Per-account slice of `Post.published_to`, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTo {
    pub account_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub post_id: String,
    pub account_id: String,
    pub state: AttemptState,
    pub message_id: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_text: Option<String>,
    pub retries: i32,
    pub updated_at: DateTime<Utc>,
}

/// Per-account outcome returned to the caller. Derived from the attempt
/// row, never separately persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub account_id: String,
    pub service: ServiceKind,
    pub account_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishResult {
    pub fn to_published_to(&self) -> PublishedTo {
        PublishedTo {
            account_id: self.account_id.clone(),
            success: self.success,
            message_id: self.message_id.clone(),
            error: self.error.clone(),
        }
    }
}

//! Result aggregation: collapse per-account attempt states into one post
//! status, and write it back exactly once per fan-out run.

use crate::db::{self, Pool};
use crate::model::{AttemptState, PostStatus, PublishResult, PublishedTo};
use anyhow::Result;
use tracing::info;

/// Aggregate post status as a pure function of attempt states:
/// `published` iff all succeeded, `failed` iff all failed,
/// `partially_published` for a terminal mix, `publishing` while any
/// attempt has not settled.
pub fn aggregate_status(states: &[AttemptState]) -> PostStatus {
    if states.iter().any(|s| !s.is_terminal()) {
        return PostStatus::Publishing;
    }
    let succeeded = states
        .iter()
        .filter(|s| **s == AttemptState::Succeeded)
        .count();
    if succeeded == states.len() && !states.is_empty() {
        PostStatus::Published
    } else if succeeded == 0 {
        PostStatus::Failed
    } else {
        PostStatus::PartiallyPublished
    }
}

/// Performs the single durable write of a fan-out run. Consumed by its
/// one `finalize` call, so a second write for the same run does not
/// typecheck.
pub struct PersistenceWriter {
    pool: Pool,
}

impl PersistenceWriter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn finalize(
        self,
        post_id: &str,
        user_id: &str,
        results: &[PublishResult],
    ) -> Result<PostStatus> {
        let states: Vec<AttemptState> = results
            .iter()
            .map(|r| {
                if r.success {
                    AttemptState::Succeeded
                } else {
                    AttemptState::Failed
                }
            })
            .collect();
        let status = aggregate_status(&states);
        let published_to: Vec<PublishedTo> =
            results.iter().map(PublishResult::to_published_to).collect();

        let rows = db::update_post_published(&self.pool, post_id, user_id, status, &published_to)
            .await?;
        info!(
            post_id,
            status = status.as_str(),
            accounts = results.len(),
            rows,
            "publish run finalized"
        );
        Ok(status)
    }
}

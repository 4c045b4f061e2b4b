//! Fan-out coordinator: admits (post, account) pairs through the
//! idempotency guard, runs channel adapters concurrently under the
//! dispatch policy, and emits per-account results in completion order.

use crate::aggregate::PersistenceWriter;
use crate::channels::{ChannelRegistry, PublishContent};
use crate::db::{self, Admission, Pool};
use crate::dispatch::DispatchPolicy;
use crate::model::{
    AttemptState, ConnectedAccount, ErrorKind, Post, PostStatus, PublishAttempt, PublishResult,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Orchestrator {
    pool: Pool,
    registry: Arc<ChannelRegistry>,
    policy: DispatchPolicy,
}

impl Orchestrator {
    pub fn new(pool: Pool, registry: Arc<ChannelRegistry>, policy: DispatchPolicy) -> Self {
        Self {
            pool,
            registry,
            policy,
        }
    }

    /// Full publish run: fan out, collect every result, aggregate, and
    /// persist the post status exactly once.
    #[instrument(skip_all, fields(post_id = %post.id))]
    pub async fn publish(
        &self,
        post: &Post,
        accounts: Vec<ConnectedAccount>,
        cancel: CancellationToken,
    ) -> Result<(PostStatus, Vec<PublishResult>)> {
        if accounts.is_empty() {
            // Callers reject empty account sets before dispatch; nothing
            // to run and nothing to write.
            return Ok((post.status, Vec::new()));
        }

        let mut rx = self.dispatch(post, accounts, cancel);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        let writer = PersistenceWriter::new(self.pool.clone());
        let status = writer.finalize(&post.id, &post.user_id, &results).await?;
        Ok((status, results))
    }

    /// Streaming fan-out. Emits one `PublishResult` per account, in
    /// completion order; the channel closes once every account settled.
    pub fn dispatch(
        &self,
        post: &Post,
        accounts: Vec<ConnectedAccount>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PublishResult> {
        let (tx, rx) = mpsc::channel(accounts.len().max(1));
        let content = Arc::new(PublishContent {
            title: post.title.clone(),
            text: post.body.clone(),
            media_urls: post.media_urls.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.policy.max_parallel));

        for account in accounts {
            let tx = tx.clone();
            let pool = self.pool.clone();
            let registry = self.registry.clone();
            let policy = self.policy.clone();
            let content = content.clone();
            let cancel = cancel.clone();
            let post_id = post.id.clone();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                let result = run_account(
                    &pool, &registry, &policy, &content, &post_id, &account, &cancel, semaphore,
                )
                .await
                .unwrap_or_else(|err| {
                    error!(?err, account_id = %account.id, "publish attempt failed internally");
                    PublishResult {
                        account_id: account.id.clone(),
                        service: account.service,
                        account_name: account.account_name.clone(),
                        success: false,
                        message_id: None,
                        error: Some("Internal error".into()),
                    }
                });
                let _ = tx.send(result).await;
            });
        }

        rx
    }
}

/// Drive one (post, account) pair to a terminal result.
#[allow(clippy::too_many_arguments)]
async fn run_account(
    pool: &Pool,
    registry: &ChannelRegistry,
    policy: &DispatchPolicy,
    content: &PublishContent,
    post_id: &str,
    account: &ConnectedAccount,
    cancel: &CancellationToken,
    semaphore: Arc<Semaphore>,
) -> Result<PublishResult> {
    // Cooperative cancellation: stop admitting, let admitted work finish.
    if cancel.is_cancelled() {
        return Ok(failed_result(account, "publish cancelled"));
    }

    match db::admit_attempt(pool, post_id, &account.id).await? {
        Admission::New => {}
        Admission::Existing(attempt) if attempt.state.is_terminal() => {
            info!(post_id, account_id = %account.id, "pair already settled; re-emitting stored result");
            return Ok(result_from_attempt(account, &attempt));
        }
        Admission::Existing(_) => {
            // A concurrent run owns this pair; wait for its outcome.
            return settled_result(pool, policy, post_id, account).await;
        }
    }

    let _permit = semaphore
        .acquire_owned()
        .await
        .expect("fan-out semaphore closed");

    if !db::mark_in_flight(pool, post_id, &account.id).await? {
        // Lost the claim between admission and takeoff.
        return settled_result(pool, policy, post_id, account).await;
    }

    let Some(adapter) = registry.adapter_for(account.service) else {
        let message = format!("unsupported service: {}", account.service.as_str());
        db::record_failure(pool, post_id, &account.id, ErrorKind::Unknown, &message, 0).await?;
        return Ok(failed_result(
            account,
            &format!("{}: {}", ErrorKind::Unknown.as_str(), message),
        ));
    };

    let execution = policy
        .execute(adapter, &account.account_data, content)
        .await;
    match execution.outcome {
        Ok(message_id) => {
            db::record_success(pool, post_id, &account.id, &message_id, execution.retries).await?;
            Ok(PublishResult {
                account_id: account.id.clone(),
                service: account.service,
                account_name: account.account_name.clone(),
                success: true,
                message_id: Some(message_id),
                error: None,
            })
        }
        Err(err) => {
            db::record_failure(
                pool,
                post_id,
                &account.id,
                err.kind,
                &err.message,
                execution.retries,
            )
            .await?;
            Ok(failed_result(account, &err.to_string()))
        }
    }
}

/// Poll the attempt row owned by a concurrent run until it settles, then
/// re-emit the stored result. Bounded by the policy's worst-case
/// execution time.
async fn settled_result(
    pool: &Pool,
    policy: &DispatchPolicy,
    post_id: &str,
    account: &ConnectedAccount,
) -> Result<PublishResult> {
    let deadline = tokio::time::Instant::now() + policy.settle_deadline();
    loop {
        if let Some(attempt) = db::fetch_attempt(pool, post_id, &account.id).await? {
            if attempt.state.is_terminal() {
                return Ok(result_from_attempt(account, &attempt));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(post_id, account_id = %account.id, "attempt owned elsewhere never settled");
            return Ok(failed_result(account, "attempt did not settle"));
        }
        tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
    }
}

fn result_from_attempt(account: &ConnectedAccount, attempt: &PublishAttempt) -> PublishResult {
    let success = attempt.state == AttemptState::Succeeded;
    let error = if success {
        None
    } else {
        let kind = attempt.error_kind.unwrap_or(ErrorKind::Unknown);
        let text = attempt.error_text.as_deref().unwrap_or("publish failed");
        Some(format!("{}: {}", kind.as_str(), text))
    };
    PublishResult {
        account_id: account.id.clone(),
        service: account.service,
        account_name: account.account_name.clone(),
        success,
        message_id: attempt.message_id.clone(),
        error,
    }
}

fn failed_result(account: &ConnectedAccount, error: &str) -> PublishResult {
    PublishResult {
        account_id: account.id.clone(),
        service: account.service,
        account_name: account.account_name.clone(),
        success: false,
        message_id: None,
        error: Some(error.to_string()),
    }
}

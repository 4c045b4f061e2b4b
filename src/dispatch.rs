//! Dispatch policy: how adapter calls are scheduled and retried.
//!
//! Retry semantics live here, not in the adapters, so every service gets
//! the same classification and backoff behavior.

use crate::channels::{ChannelAdapter, ChannelError, PublishContent};
use crate::model::{AccountData, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Concurrent adapter calls across one fan-out run.
    pub max_parallel: usize,
    /// Upper bound for a single adapter call.
    pub attempt_timeout: Duration,
    /// Retries after the first call, for retryable failures only.
    pub max_retries: u32,
    /// Exponential backoff base: base, 2*base, 4*base, ...
    pub backoff_base: Duration,
}

impl DispatchPolicy {
    pub fn from_config(cfg: &crate::config::Dispatch) -> Self {
        Self {
            max_parallel: cfg.max_parallel,
            attempt_timeout: cfg.attempt_timeout(),
            max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base(),
        }
    }

    /// Transient failures retry; broken credentials or payloads do not.
    pub fn is_retryable(kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::RateLimited | ErrorKind::NetworkError)
    }

    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(retry)
    }

    /// Worst-case wall time for one pair to settle: every call times out
    /// and every backoff is taken, plus slack for scheduling.
    pub fn settle_deadline(&self) -> Duration {
        let calls = self.max_retries + 1;
        let mut total = self.attempt_timeout * calls;
        for retry in 0..self.max_retries {
            total += self.backoff_delay(retry);
        }
        total + Duration::from_secs(5)
    }

    /// Run one adapter call to a terminal outcome: timeout enforcement,
    /// retry classification, and backoff. Retries are serialized within
    /// this single future, which keeps at most one call in flight per
    /// (post, account) pair.
    pub async fn execute(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        account: &AccountData,
        content: &PublishContent,
    ) -> Execution {
        let mut retries = 0u32;
        loop {
            let call = adapter.publish(account, content);
            let outcome = match tokio::time::timeout(self.attempt_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::new(
                    ErrorKind::NetworkError,
                    format!("attempt timed out after {:?}", self.attempt_timeout),
                )),
            };

            match outcome {
                Ok(message_id) => {
                    return Execution {
                        outcome: Ok(message_id),
                        retries,
                    }
                }
                Err(err) => {
                    if Self::is_retryable(err.kind) && retries < self.max_retries {
                        let delay = self.backoff_delay(retries);
                        warn!(
                            service = adapter.service().as_str(),
                            kind = err.kind.as_str(),
                            retry = retries + 1,
                            ?delay,
                            "retryable publish failure; backing off"
                        );
                        tokio::time::sleep(delay).await;
                        retries += 1;
                        continue;
                    }
                    return Execution {
                        outcome: Err(err),
                        retries,
                    };
                }
            }
        }
    }
}

/// Terminal result of a policy execution, with the retry count consumed.
#[derive(Debug)]
pub struct Execution {
    pub outcome: Result<String, ChannelError>,
    pub retries: u32,
}

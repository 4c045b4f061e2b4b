use async_trait::async_trait;
use chrono::Utc;
use contentgenie::channels::{ChannelAdapter, ChannelError, ChannelRegistry, PublishContent};
use contentgenie::db;
use contentgenie::dispatch::DispatchPolicy;
use contentgenie::fanout::Orchestrator;
use contentgenie::model::{
    AccountData, AttemptState, ConnectedAccount, ErrorKind, Post, PostStatus, ServiceKind,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

async fn setup_pool() -> sqlx::SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn fast_policy() -> DispatchPolicy {
    DispatchPolicy {
        max_parallel: 4,
        attempt_timeout: Duration::from_millis(500),
        max_retries: 2,
        backoff_base: Duration::from_millis(1),
    }
}

fn make_account(id: &str, user_id: &str, service: ServiceKind) -> ConnectedAccount {
    ConnectedAccount {
        id: id.to_string(),
        user_id: user_id.to_string(),
        service,
        account_name: format!("{} account", service.as_str()),
        account_data: AccountData {
            username: Some(id.to_string()),
            ..Default::default()
        },
        is_active: true,
        created_at: Utc::now(),
    }
}

fn make_post(id: &str, user_id: &str) -> Post {
    Post {
        id: id.to_string(),
        user_id: user_id.to_string(),
        generation_id: None,
        title: "Morning routine".to_string(),
        body: "Stretch for 15 minutes.".to_string(),
        media_urls: vec![],
        status: PostStatus::Draft,
        published_to: None,
        created_at: Utc::now(),
    }
}

/// Fake adapter with a scripted response queue, recording which accounts
/// it was called for.
#[derive(Clone)]
struct ScriptedChannel {
    service: ServiceKind,
    responses: Arc<Mutex<VecDeque<Result<String, ChannelError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedChannel {
    fn new(service: ServiceKind, responses: Vec<Result<String, ChannelError>>) -> Self {
        Self {
            service,
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedChannel {
    async fn publish(
        &self,
        account: &AccountData,
        _content: &PublishContent,
    ) -> Result<String, ChannelError> {
        self.calls
            .lock()
            .await
            .push(account.username.clone().unwrap_or_default());
        let mut responses = self.responses.lock().await;
        responses.pop_front().unwrap_or_else(|| Ok("msg-id".into()))
    }

    fn service(&self) -> ServiceKind {
        self.service
    }
}

/// Adapter that holds every call open for a while before succeeding.
struct SlowChannel {
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChannelAdapter for SlowChannel {
    async fn publish(
        &self,
        account: &AccountData,
        _content: &PublishContent,
    ) -> Result<String, ChannelError> {
        self.calls
            .lock()
            .await
            .push(account.username.clone().unwrap_or_default());
        tokio::time::sleep(self.delay).await;
        Ok("slow-msg".into())
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Telegram
    }
}

fn orchestrator(pool: &sqlx::SqlitePool, adapters: Vec<Arc<dyn ChannelAdapter>>) -> Orchestrator {
    Orchestrator::new(
        pool.clone(),
        Arc::new(ChannelRegistry::from_adapters(adapters)),
        fast_policy(),
    )
}

#[tokio::test]
async fn mixed_outcomes_yield_partially_published() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    let telegram = ScriptedChannel::new(ServiceKind::Telegram, vec![Ok("111".into())]);
    let vk = ScriptedChannel::new(ServiceKind::Vk, vec![Ok("222".into())]);
    let instagram = ScriptedChannel::new(
        ServiceKind::Instagram,
        vec![Err(ChannelError::new(
            ErrorKind::PayloadRejected,
            "media required",
        ))],
    );
    let orch = orchestrator(
        &pool,
        vec![
            Arc::new(telegram.clone()),
            Arc::new(vk.clone()),
            Arc::new(instagram.clone()),
        ],
    );

    let accounts = vec![
        make_account("acc-1", "user-1", ServiceKind::Telegram),
        make_account("acc-2", "user-1", ServiceKind::Vk),
        make_account("acc-3", "user-1", ServiceKind::Instagram),
    ];
    let (status, results) = orch
        .publish(&post, accounts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, PostStatus::PartiallyPublished);
    assert_eq!(results.len(), 3);

    // Every requested account appears exactly once.
    let mut ids: Vec<&str> = results.iter().map(|r| r.account_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["acc-1", "acc-2", "acc-3"]);

    let by_id = |id: &str| results.iter().find(|r| r.account_id == id).unwrap();
    assert!(by_id("acc-1").success);
    assert_eq!(by_id("acc-1").message_id.as_deref(), Some("111"));
    assert!(by_id("acc-2").success);
    assert_eq!(by_id("acc-2").message_id.as_deref(), Some("222"));
    assert!(!by_id("acc-3").success);
    assert!(by_id("acc-3")
        .error
        .as_deref()
        .unwrap()
        .contains("payload_rejected"));

    // The persistence write landed once with the full result set.
    let stored = db::fetch_post(&pool, "post-1", "user-1").await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::PartiallyPublished);
    let published_to = stored.published_to.unwrap();
    assert_eq!(published_to.len(), 3);
    assert!(published_to
        .iter()
        .any(|p| p.account_id == "acc-1" && p.success && p.message_id.as_deref() == Some("111")));
    assert!(published_to.iter().any(|p| p.account_id == "acc-3" && !p.success));
}

#[tokio::test]
async fn duplicate_publish_short_circuits_to_stored_results() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    let telegram = ScriptedChannel::new(
        ServiceKind::Telegram,
        vec![Ok("111".into()), Ok("999".into())],
    );
    let orch = orchestrator(&pool, vec![Arc::new(telegram.clone())]);
    let accounts = vec![make_account("acc-1", "user-1", ServiceKind::Telegram)];

    let (first_status, first) = orch
        .publish(&post, accounts.clone(), CancellationToken::new())
        .await
        .unwrap();
    let (second_status, second) = orch
        .publish(&post, accounts, CancellationToken::new())
        .await
        .unwrap();

    // One external call total; the second run re-emits the stored result.
    assert_eq!(telegram.calls().await.len(), 1);
    assert_eq!(first_status, PostStatus::Published);
    assert_eq!(second_status, PostStatus::Published);
    assert_eq!(first, second);
    assert_eq!(second[0].message_id.as_deref(), Some("111"));
}

#[tokio::test]
async fn concurrent_submissions_admit_one_attempt() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let slow: Arc<dyn ChannelAdapter> = Arc::new(SlowChannel {
        delay: Duration::from_millis(150),
        calls: calls.clone(),
    });
    let orch = Arc::new(orchestrator(&pool, vec![slow]));
    let accounts = vec![make_account("acc-1", "user-1", ServiceKind::Telegram)];

    let a = {
        let orch = orch.clone();
        let post = post.clone();
        let accounts = accounts.clone();
        tokio::spawn(async move { orch.publish(&post, accounts, CancellationToken::new()).await })
    };
    let b = {
        let orch = orch.clone();
        let post = post.clone();
        tokio::spawn(async move { orch.publish(&post, accounts, CancellationToken::new()).await })
    };

    let (_, results_a) = a.await.unwrap().unwrap();
    let (_, results_b) = b.await.unwrap().unwrap();

    assert_eq!(calls.lock().await.len(), 1);
    assert_eq!(results_a, results_b);
    assert!(results_a[0].success);
    assert_eq!(results_a[0].message_id.as_deref(), Some("slow-msg"));

    let attempts = db::list_attempts_for_post(&pool, "post-1").await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].state, AttemptState::Succeeded);
}

#[tokio::test]
async fn cancelled_dispatch_admits_nothing() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    let telegram = ScriptedChannel::new(ServiceKind::Telegram, vec![]);
    let orch = orchestrator(&pool, vec![Arc::new(telegram.clone())]);
    let accounts = vec![
        make_account("acc-1", "user-1", ServiceKind::Telegram),
        make_account("acc-2", "user-1", ServiceKind::Telegram),
    ];

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut rx = orch.dispatch(&post, accounts, cancel);
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.success));
    assert!(results
        .iter()
        .all(|r| r.error.as_deref() == Some("publish cancelled")));
    assert!(telegram.calls().await.is_empty());
    assert!(db::list_attempts_for_post(&pool, "post-1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unsupported_service_fails_terminally() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    // Registry only knows telegram; the twitter account has no adapter.
    let telegram = ScriptedChannel::new(ServiceKind::Telegram, vec![]);
    let orch = orchestrator(&pool, vec![Arc::new(telegram)]);
    let accounts = vec![make_account("acc-1", "user-1", ServiceKind::Twitter)];

    let (status, results) = orch
        .publish(&post, accounts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, PostStatus::Failed);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("unsupported service"));

    let attempts = db::list_attempts_for_post(&pool, "post-1").await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].state, AttemptState::Failed);
    assert_eq!(attempts[0].error_kind, Some(ErrorKind::Unknown));
}

#[tokio::test]
async fn retryable_failures_record_retry_count() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    let telegram = ScriptedChannel::new(
        ServiceKind::Telegram,
        vec![
            Err(ChannelError::new(ErrorKind::NetworkError, "reset")),
            Err(ChannelError::new(ErrorKind::RateLimited, "slow down")),
            Ok("after-retries".into()),
        ],
    );
    let orch = orchestrator(&pool, vec![Arc::new(telegram.clone())]);
    let accounts = vec![make_account("acc-1", "user-1", ServiceKind::Telegram)];

    let (status, results) = orch
        .publish(&post, accounts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, PostStatus::Published);
    assert_eq!(results[0].message_id.as_deref(), Some("after-retries"));
    assert_eq!(telegram.calls().await.len(), 3);

    let attempt = db::fetch_attempt(&pool, "post-1", "acc-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.state, AttemptState::Succeeded);
    assert_eq!(attempt.retries, 2);
}

#[tokio::test]
async fn terminal_failure_skips_retries_and_records_kind() {
    let pool = setup_pool().await;
    let post = make_post("post-1", "user-1");
    db::insert_post(&pool, &post).await.unwrap();

    let telegram = ScriptedChannel::new(
        ServiceKind::Telegram,
        vec![Err(ChannelError::new(ErrorKind::AuthInvalid, "bad token"))],
    );
    let orch = orchestrator(&pool, vec![Arc::new(telegram.clone())]);
    let accounts = vec![make_account("acc-1", "user-1", ServiceKind::Telegram)];

    let (status, _results) = orch
        .publish(&post, accounts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, PostStatus::Failed);
    assert_eq!(telegram.calls().await.len(), 1);

    let attempt = db::fetch_attempt(&pool, "post-1", "acc-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.state, AttemptState::Failed);
    assert_eq!(attempt.error_kind, Some(ErrorKind::AuthInvalid));
    assert_eq!(attempt.retries, 0);
}

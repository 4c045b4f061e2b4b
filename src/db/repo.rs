use super::model::Admission;
use crate::model::{
    AccountData, AttemptState, ConnectedAccount, ErrorKind, Post, PostStatus, PublishAttempt,
    PublishedTo, ServiceKind,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- profiles / credits ----

#[instrument(skip_all)]
pub async fn upsert_profile(pool: &Pool, user_id: &str, daily_credits: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO profiles (id, daily_credits, created_at) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET daily_credits = excluded.daily_credits",
    )
    .bind(user_id)
    .bind(daily_credits)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_daily_credits(pool: &Pool, user_id: &str) -> Result<Option<i64>> {
    let credits = sqlx::query_scalar::<_, i64>("SELECT daily_credits FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(credits)
}

/// Decrement one credit; refuses to go below zero. Returns the remaining
/// balance, or None when the user has no profile or no credits left.
#[instrument(skip_all)]
pub async fn spend_credit(pool: &Pool, user_id: &str) -> Result<Option<i64>> {
    let res = sqlx::query(
        "UPDATE profiles SET daily_credits = daily_credits - 1
         WHERE id = ? AND daily_credits > 0",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(None);
    }
    let left = sqlx::query_scalar::<_, i64>("SELECT daily_credits FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(Some(left))
}

#[instrument(skip_all)]
pub async fn insert_generation(
    pool: &Pool,
    user_id: &str,
    original_idea: &str,
    generated_text: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO generations (id, user_id, original_idea, generated_text, used_credits, created_at)
         VALUES (?, ?, ?, ?, 1, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(original_idea)
    .bind(generated_text)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(id)
}

// ---- connected accounts ----

#[instrument(skip_all)]
pub async fn insert_account(pool: &Pool, account: &ConnectedAccount) -> Result<()> {
    let data = serde_json::to_string(&account.account_data)
        .context("failed to serialize account_data")?;
    sqlx::query(
        "INSERT INTO connected_accounts (id, user_id, service, account_name, account_data, is_active, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&account.id)
    .bind(&account.user_id)
    .bind(account.service.as_str())
    .bind(&account.account_name)
    .bind(data)
    .bind(account.is_active)
    .bind(account.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Active accounts owned by `user_id` among the requested ids. Ids with no
/// matching active row are simply absent from the result.
#[instrument(skip_all)]
pub async fn fetch_active_accounts(
    pool: &Pool,
    user_id: &str,
    account_ids: &[String],
) -> Result<Vec<ConnectedAccount>> {
    if account_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, user_id, service, account_name, account_data, is_active, created_at
         FROM connected_accounts WHERE user_id = ",
    );
    qb.push_bind(user_id);
    qb.push(" AND is_active = 1 AND id IN (");
    let mut separated = qb.separated(", ");
    for id in account_ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(account_from_row).collect()
}

fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ConnectedAccount> {
    let service_str: String = row.get("service");
    let service = ServiceKind::parse(&service_str)
        .ok_or_else(|| anyhow!("account has unknown service {}", service_str))?;
    let data_str: String = row.get("account_data");
    let account_data: AccountData =
        serde_json::from_str(&data_str).context("failed to parse account_data")?;
    Ok(ConnectedAccount {
        id: row.get("id"),
        user_id: row.get("user_id"),
        service,
        account_name: row.get("account_name"),
        account_data,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}

// ---- posts ----

#[instrument(skip_all)]
pub async fn insert_post(pool: &Pool, post: &Post) -> Result<()> {
    let media = serde_json::to_string(&post.media_urls)?;
    sqlx::query(
        "INSERT INTO posts (id, user_id, generation_id, title, body, media_urls, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&post.id)
    .bind(&post.user_id)
    .bind(&post.generation_id)
    .bind(&post.title)
    .bind(&post.body)
    .bind(media)
    .bind(post.status.as_str())
    .bind(post.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_post(pool: &Pool, post_id: &str, user_id: &str) -> Result<Option<Post>> {
    let row = sqlx::query(
        "SELECT id, user_id, generation_id, title, body, media_urls, status, published_to, created_at
         FROM posts WHERE id = ? AND user_id = ?",
    )
    .bind(post_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status_str: String = row.get("status");
    let status = PostStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("post {} has unknown status {}", post_id, status_str))?;
    let media_str: String = row.get("media_urls");
    let media_urls: Vec<String> =
        serde_json::from_str(&media_str).context("failed to parse media_urls")?;
    let published_to: Option<Vec<PublishedTo>> = row
        .try_get::<Option<String>, _>("published_to")?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .context("failed to parse published_to")?;

    Ok(Some(Post {
        id: row.get("id"),
        user_id: row.get("user_id"),
        generation_id: row.try_get("generation_id").ok(),
        title: row.get("title"),
        body: row.get("body"),
        media_urls,
        status,
        published_to,
        created_at: row.get("created_at"),
    }))
}

/// The aggregator's single durable write for a fan-out run. Returns the
/// number of rows touched; zero means the post row does not exist, which
/// is not an error here.
#[instrument(skip_all)]
pub async fn update_post_published(
    pool: &Pool,
    post_id: &str,
    user_id: &str,
    status: PostStatus,
    published_to: &[PublishedTo],
) -> Result<u64> {
    let payload = serde_json::to_string(published_to)?;
    let res = sqlx::query("UPDATE posts SET status = ?, published_to = ? WHERE id = ? AND user_id = ?")
        .bind(status.as_str())
        .bind(payload)
        .bind(post_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ---- publish attempts ----

/// Atomic insert-if-absent for a (post, account) pair. A lost insert means
/// the pair is already admitted: the stored row is returned instead.
#[instrument(skip_all)]
pub async fn admit_attempt(pool: &Pool, post_id: &str, account_id: &str) -> Result<Admission> {
    let res = sqlx::query(
        "INSERT INTO publish_attempts (post_id, account_id, state, retries, updated_at)
         VALUES (?, ?, 'pending', 0, ?)
         ON CONFLICT(post_id, account_id) DO NOTHING",
    )
    .bind(post_id)
    .bind(account_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    if res.rows_affected() == 1 {
        return Ok(Admission::New);
    }
    let attempt = fetch_attempt(pool, post_id, account_id)
        .await?
        .ok_or_else(|| anyhow!("attempt ({post_id}, {account_id}) vanished after admission"))?;
    Ok(Admission::Existing(attempt))
}

/// Compare-and-set `pending -> in_flight`. Returns false when another run
/// already owns the pair.
#[instrument(skip_all)]
pub async fn mark_in_flight(pool: &Pool, post_id: &str, account_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE publish_attempts SET state = 'in_flight', updated_at = ?
         WHERE post_id = ? AND account_id = ? AND state = 'pending'",
    )
    .bind(Utc::now())
    .bind(post_id)
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn record_success(
    pool: &Pool,
    post_id: &str,
    account_id: &str,
    message_id: &str,
    retries: u32,
) -> Result<()> {
    let res = sqlx::query(
        "UPDATE publish_attempts SET state = 'succeeded', message_id = ?, retries = ?, updated_at = ?
         WHERE post_id = ? AND account_id = ? AND state = 'in_flight'",
    )
    .bind(message_id)
    .bind(retries as i64)
    .bind(Utc::now())
    .bind(post_id)
    .bind(account_id)
    .execute(pool)
    .await?;
    if res.rows_affected() != 1 {
        return Err(anyhow!(
            "attempt ({post_id}, {account_id}) was not in_flight on success"
        ));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn record_failure(
    pool: &Pool,
    post_id: &str,
    account_id: &str,
    error_kind: ErrorKind,
    error_text: &str,
    retries: u32,
) -> Result<()> {
    let res = sqlx::query(
        "UPDATE publish_attempts SET state = 'failed', error_kind = ?, error_text = ?, retries = ?, updated_at = ?
         WHERE post_id = ? AND account_id = ? AND state = 'in_flight'",
    )
    .bind(error_kind.as_str())
    .bind(error_text)
    .bind(retries as i64)
    .bind(Utc::now())
    .bind(post_id)
    .bind(account_id)
    .execute(pool)
    .await?;
    if res.rows_affected() != 1 {
        return Err(anyhow!(
            "attempt ({post_id}, {account_id}) was not in_flight on failure"
        ));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_attempt(
    pool: &Pool,
    post_id: &str,
    account_id: &str,
) -> Result<Option<PublishAttempt>> {
    let row = sqlx::query(
        "SELECT post_id, account_id, state, message_id, error_kind, error_text, retries, updated_at
         FROM publish_attempts WHERE post_id = ? AND account_id = ?",
    )
    .bind(post_id)
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(attempt_from_row(&row)?))
}

#[instrument(skip_all)]
pub async fn list_attempts_for_post(pool: &Pool, post_id: &str) -> Result<Vec<PublishAttempt>> {
    let rows = sqlx::query(
        "SELECT post_id, account_id, state, message_id, error_kind, error_text, retries, updated_at
         FROM publish_attempts WHERE post_id = ? ORDER BY account_id",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(attempt_from_row).collect()
}

fn attempt_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PublishAttempt> {
    let state_str: String = row.get("state");
    let state = AttemptState::parse(&state_str)
        .ok_or_else(|| anyhow!("attempt has unknown state {}", state_str))?;
    let error_kind = row
        .try_get::<Option<String>, _>("error_kind")?
        .as_deref()
        .map(|s| ErrorKind::parse(s).ok_or_else(|| anyhow!("attempt has unknown error_kind {s}")))
        .transpose()?;
    let updated_at: DateTime<Utc> = row.get("updated_at");
    Ok(PublishAttempt {
        post_id: row.get("post_id"),
        account_id: row.get("account_id"),
        state,
        message_id: row.try_get("message_id").ok().flatten(),
        error_kind,
        error_text: row.try_get("error_text").ok().flatten(),
        retries: row.get("retries"),
        updated_at,
    })
}

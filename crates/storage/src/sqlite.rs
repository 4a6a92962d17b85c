use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::ChannelName,
    protocol::{ChatMessage, NewChatMessage},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use crate::{InsertSubscription, MessageStore, SubscriptionEvent};

const INSERT_FANOUT_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 64;

/// SQLite-backed message store; realtime delivery covers inserts made through this handle
/// and its clones.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: Pool<Sqlite>,
    inserts: broadcast::Sender<ChatMessage>,
}

impl SqliteMessageStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if database_url.starts_with("sqlite::memory:") {
            // every in-memory connection is its own database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open message database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let (inserts, _) = broadcast::channel(INSERT_FANOUT_CAPACITY);
        Ok(Self { pool, inserts })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn is_available(&self) -> bool {
        sqlx::query("SELECT id FROM messages LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .is_ok()
    }

    async fn insert(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let rec = sqlx::query(
            "INSERT INTO messages (channel, content, sender_id, sender_name, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(message.channel.as_str())
        .bind(&message.content)
        .bind(&message.sender_id)
        .bind(&message.sender_name)
        .bind(message.created_at.timestamp_micros())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert message")?;

        let stored = message.into_stored(Some(rec.get::<i64, _>(0)));
        let _ = self.inserts.send(stored.clone());
        Ok(stored)
    }

    async fn history(&self, channel: &ChannelName, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, channel, content, sender_id, sender_name, created_at
             FROM messages
             WHERE channel = ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )
        .bind(channel.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load history for channel {channel}"))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn subscribe_inserts(&self, channel: &ChannelName) -> Result<InsertSubscription> {
        let mut inserts = BroadcastStream::new(self.inserts.subscribe());
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let filter = channel.clone();

        let task = tokio::spawn(async move {
            let reason = loop {
                match inserts.next().await {
                    Some(Ok(message)) if message.channel == filter => {
                        if tx.send(SubscriptionEvent::Inserted(message)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break format!("insert feed lagged: {err}"),
                    None => break "insert feed closed".to_string(),
                }
            };
            debug!(channel = %filter, %reason, "sqlite store: subscription ended");
            let _ = tx.send(SubscriptionEvent::Closed { reason }).await;
        });

        Ok(InsertSubscription::new(channel.clone(), rx, task))
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let channel: String = row.try_get("channel")?;
    let created_at: i64 = row.try_get("created_at")?;
    Ok(ChatMessage {
        id: Some(row.try_get("id")?),
        channel: ChannelName::parse(&channel)
            .with_context(|| format!("stored message has invalid channel '{channel}'"))?,
        content: row.try_get("content")?,
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        created_at: DateTime::<Utc>::from_timestamp_micros(created_at)
            .ok_or_else(|| anyhow!("stored message has invalid timestamp {created_at}"))?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/sqlite_tests.rs"]
mod tests;

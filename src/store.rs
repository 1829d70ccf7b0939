use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::config::DatabaseConfig;
use crate::models::{PushChannel, StatusEntry, Subscriber, TrackedRecord};
use crate::utils::Result;

/// Whole-record persistence for tracked identifiers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_record(&self, identifier: &str) -> Result<Option<TrackedRecord>>;

    /// Replace the stored record entirely.
    async fn save_record(&self, record: &TrackedRecord) -> Result<()>;

    async fn list_identifiers(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    async fn list_subscribers(&self, identifier: &str) -> Result<Vec<Subscriber>>;

    async fn get_push_channel(&self, subscriber_id: &str) -> Result<Option<PushChannel>>;
}

#[derive(FromRow)]
struct RecordRow {
    identifier: String,
    entries: Json<Vec<StatusEntry>>,
    last_update: DateTime<Utc>,
}

impl From<RecordRow> for TrackedRecord {
    fn from(row: RecordRow) -> Self {
        TrackedRecord {
            identifier: row.identifier,
            entries: row.entries.0,
            last_update: row.last_update,
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply pending migrations.
    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Returns false when the subscription already existed.
    pub async fn add_subscriber(&self, subscriber_id: &str, identifier: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subscribers (subscriber_id, identifier, created_at) VALUES (?, ?, ?)",
        )
        .bind(subscriber_id)
        .bind(identifier)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drops the subscription, and the record once nobody follows the identifier.
    pub async fn remove_subscriber(&self, subscriber_id: &str, identifier: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM subscribers WHERE subscriber_id = ? AND identifier = ?")
            .bind(subscriber_id)
            .bind(identifier)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscribers WHERE identifier = ?")
            .bind(identifier)
            .fetch_one(&mut *tx)
            .await?;
        if remaining == 0 {
            sqlx::query("DELETE FROM records WHERE identifier = ?")
                .bind(identifier)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    pub async fn set_push_channel(&self, subscriber_id: &str, secret: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO push_channels (subscriber_id, secret) VALUES (?, ?)
             ON CONFLICT(subscriber_id) DO UPDATE SET secret = excluded.secret",
        )
        .bind(subscriber_id)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn load_record(&self, identifier: &str) -> Result<Option<TrackedRecord>> {
        let row: Option<RecordRow> =
            sqlx::query_as("SELECT identifier, entries, last_update FROM records WHERE identifier = ?")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(TrackedRecord::from))
    }

    async fn save_record(&self, record: &TrackedRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO records (identifier, entries, last_update) VALUES (?, ?, ?)
             ON CONFLICT(identifier) DO UPDATE SET entries = excluded.entries, last_update = excluded.last_update",
        )
        .bind(&record.identifier)
        .bind(Json(&record.entries))
        .bind(record.last_update)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_identifiers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT identifier FROM records
             UNION
             SELECT identifier FROM subscribers
             ORDER BY identifier",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(identifier,)| identifier).collect())
    }
}

#[async_trait]
impl SubscriberRegistry for SqliteStore {
    async fn list_subscribers(&self, identifier: &str) -> Result<Vec<Subscriber>> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            "SELECT subscriber_id, identifier FROM subscribers WHERE identifier = ? ORDER BY created_at, subscriber_id",
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscribers)
    }

    async fn get_push_channel(&self, subscriber_id: &str) -> Result<Option<PushChannel>> {
        let channel = sqlx::query_as::<_, PushChannel>(
            "SELECT subscriber_id, secret FROM push_channels WHERE subscriber_id = ?",
        )
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }
}

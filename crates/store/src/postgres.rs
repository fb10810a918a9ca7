use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use common::EventId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateStore, ClaimOutcome, DocumentQuery, DocumentWrite, EventLedger,
    ProcessedEventRecord, Result, StoreError, StoredDocument, Version,
};

/// Runs the database migrations shared by every PostgreSQL-backed component.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// PostgreSQL-backed aggregate store.
#[derive(Clone)]
pub struct PostgresAggregateStore {
    pool: PgPool,
}

impl PostgresAggregateStore {
    /// Creates a new PostgreSQL aggregate store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_document(row: PgRow) -> Result<StoredDocument> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            key: row.try_get("key")?,
            version: Version::new(row.try_get("version")?),
            tag: row.try_get("tag")?,
            updated_at: row.try_get("updated_at")?,
            state: row.try_get("state")?,
        })
    }

    async fn current_version(&self, collection: &str, key: &str) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM aggregates WHERE collection = $1 AND key = $2")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }
}

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    async fn load(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            r#"
            SELECT collection, key, version, tag, updated_at, state
            FROM aggregates
            WHERE collection = $1 AND key = $2
            "#,
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn save(&self, write: DocumentWrite, expected: Version) -> Result<Version> {
        let next = expected.next();

        let result = if expected.is_initial() {
            sqlx::query(
                r#"
                INSERT INTO aggregates (collection, key, version, tag, updated_at, state)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (collection, key) DO NOTHING
                "#,
            )
            .bind(&write.collection)
            .bind(&write.key)
            .bind(next.as_i64())
            .bind(&write.tag)
            .bind(write.updated_at)
            .bind(&write.state)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE aggregates
                SET version = $3, tag = $4, updated_at = $5, state = $6
                WHERE collection = $1 AND key = $2 AND version = $7
                "#,
            )
            .bind(&write.collection)
            .bind(&write.key)
            .bind(next.as_i64())
            .bind(&write.tag)
            .bind(write.updated_at)
            .bind(&write.state)
            .bind(expected.as_i64())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self.current_version(&write.collection, &write.key).await?;
            tracing::debug!(
                collection = %write.collection,
                key = %write.key,
                %expected,
                %actual,
                "optimistic write lost"
            );
            metrics::counter!("store_conflicts_total", "collection" => write.collection.clone())
                .increment(1);
            return Err(StoreError::ConcurrencyConflict {
                collection: write.collection,
                key: write.key,
                expected,
                actual,
            });
        }

        Ok(next)
    }

    async fn query(&self, query: DocumentQuery) -> Result<Vec<StoredDocument>> {
        let mut sql = String::from(
            "SELECT collection, key, version, tag, updated_at, state FROM aggregates WHERE collection = $1",
        );
        let mut param_count = 1;

        if query.key_prefix.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND starts_with(key, ${param_count})"));
        }
        if query.tag.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND tag = ${param_count}"));
        }
        if query.updated_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND updated_at < ${param_count}"));
        }

        sql.push_str(" ORDER BY updated_at ASC, key ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql).bind(&query.collection);

        if let Some(ref prefix) = query.key_prefix {
            sqlx_query = sqlx_query.bind(prefix);
        }
        if let Some(ref tag) = query.tag {
            sqlx_query = sqlx_query.bind(tag);
        }
        if let Some(before) = query.updated_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_document).collect()
    }

    async fn delete(&self, collection: &str, key: &str, expected: Version) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM aggregates WHERE collection = $1 AND key = $2 AND version = $3")
                .bind(collection)
                .bind(key)
                .bind(expected.as_i64())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// PostgreSQL-backed event ledger.
///
/// The primary key on `event_id` makes both `insert` and `try_claim` atomic
/// insert-if-absent operations.
#[derive(Clone)]
pub struct PostgresEventLedger {
    pool: PgPool,
}

impl PostgresEventLedger {
    /// Creates a new PostgreSQL event ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventLedger for PostgresEventLedger {
    async fn exists(&self, event_id: EventId) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM processed_events WHERE event_id = $1 AND status = 'processed'",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn get(&self, event_id: EventId) -> Result<Option<ProcessedEventRecord>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, processed_at
            FROM processed_events
            WHERE event_id = $1 AND status = 'processed'
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ProcessedEventRecord {
                event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
                processed_at: row.try_get::<DateTime<Utc>, _>("processed_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn insert(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, status, processed_at)
            VALUES ($1, 'processed', $2)
            ON CONFLICT (event_id) DO UPDATE
                SET status = 'processed', processed_at = EXCLUDED.processed_at
                WHERE processed_events.status = 'claimed'
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(processed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_claim(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        // Stored at microsecond precision; `release` matches on the same value.
        let now = now.trunc_subsecs(6);
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_events (event_id, status, claimed_at)
            VALUES ($1, 'claimed', $2)
            ON CONFLICT (event_id) DO UPDATE
                SET claimed_at = EXCLUDED.claimed_at
                WHERE processed_events.status = 'claimed'
                  AND processed_events.claimed_at <= $3
            RETURNING event_id
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(now)
        .bind(now - lease)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM processed_events WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        let outcome = match status.as_deref() {
            Some("processed") => ClaimOutcome::AlreadyProcessed,
            _ => ClaimOutcome::InFlight,
        };
        tracing::debug!(%event_id, ?outcome, "event already claimed");
        Ok(outcome)
    }

    async fn commit(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<()> {
        self.insert(event_id, processed_at).await?;
        Ok(())
    }

    async fn release(&self, event_id: EventId, claimed_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE event_id = $1 AND status = 'claimed' AND claimed_at = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(claimed_at.trunc_subsecs(6))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            tracing::debug!(%event_id, "claim no longer held, nothing to release");
        }
        Ok(())
    }
}

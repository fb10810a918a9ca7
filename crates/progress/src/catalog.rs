//! Quest catalog trait with in-memory and PostgreSQL implementations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::QuestId;
use domain::{QuestDefinition, QuestType};
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::sync::RwLock;

use crate::error::{ConsumerError, Result};

/// Read access to quest definitions.
#[async_trait]
pub trait QuestCatalog: Send + Sync {
    /// Returns quests of `quest_type` that count events happening at `at`.
    async fn list_active(
        &self,
        quest_type: &QuestType,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestDefinition>>;

    /// Looks up a quest by id, active or not.
    async fn get(&self, id: QuestId) -> Result<Option<QuestDefinition>>;
}

#[async_trait]
impl<T: QuestCatalog + ?Sized> QuestCatalog for Arc<T> {
    async fn list_active(
        &self,
        quest_type: &QuestType,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestDefinition>> {
        (**self).list_active(quest_type, at).await
    }

    async fn get(&self, id: QuestId) -> Result<Option<QuestDefinition>> {
        (**self).get(id).await
    }
}

/// In-memory quest catalog for testing and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryQuestCatalog {
    quests: Arc<RwLock<Vec<QuestDefinition>>>,
    fail_on_list: Arc<AtomicBool>,
}

impl InMemoryQuestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the given quests.
    pub fn with_quests(quests: impl IntoIterator<Item = QuestDefinition>) -> Self {
        Self {
            quests: Arc::new(RwLock::new(quests.into_iter().collect())),
            fail_on_list: Arc::default(),
        }
    }

    /// Adds or replaces a quest.
    pub async fn upsert(&self, quest: QuestDefinition) {
        let mut quests = self.quests.write().await;
        quests.retain(|q| q.id != quest.id);
        quests.push(quest);
    }

    /// Makes `list_active` fail while set.
    pub fn set_fail_on_list(&self, fail: bool) {
        self.fail_on_list.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuestCatalog for InMemoryQuestCatalog {
    async fn list_active(
        &self,
        quest_type: &QuestType,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestDefinition>> {
        if self.fail_on_list.load(Ordering::SeqCst) {
            return Err(ConsumerError::Catalog("catalog unavailable".to_string()));
        }
        let quests = self.quests.read().await;
        Ok(quests
            .iter()
            .filter(|q| &q.quest_type == quest_type && q.is_active_at(at))
            .cloned()
            .collect())
    }

    async fn get(&self, id: QuestId) -> Result<Option<QuestDefinition>> {
        let quests = self.quests.read().await;
        Ok(quests.iter().find(|q| q.id == id).cloned())
    }
}

/// PostgreSQL-backed quest catalog over the `quest_definitions` table.
#[derive(Clone)]
pub struct PostgresQuestCatalog {
    pool: PgPool,
}

impl PostgresQuestCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a quest definition.
    pub async fn upsert(&self, quest: &QuestDefinition) -> Result<()> {
        let target_count = i32::try_from(quest.target_count).map_err(|_| {
            ConsumerError::Catalog(format!("target count too large: {}", quest.target_count))
        })?;

        sqlx::query(
            r#"
            INSERT INTO quest_definitions
                (id, code, title, description, quest_type, target_count, is_active, start_at, end_at, reward)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                code = EXCLUDED.code,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                quest_type = EXCLUDED.quest_type,
                target_count = EXCLUDED.target_count,
                is_active = EXCLUDED.is_active,
                start_at = EXCLUDED.start_at,
                end_at = EXCLUDED.end_at,
                reward = EXCLUDED.reward
            "#,
        )
        .bind(quest.id.as_uuid())
        .bind(&quest.code)
        .bind(&quest.title)
        .bind(&quest.description)
        .bind(quest.quest_type.as_str())
        .bind(target_count)
        .bind(quest.is_active)
        .bind(quest.start_at)
        .bind(quest.end_at)
        .bind(&quest.reward)
        .execute(&self.pool)
        .await
        .map_err(catalog_error)?;
        Ok(())
    }

    fn row_to_quest(row: PgRow) -> Result<QuestDefinition> {
        let read = || -> std::result::Result<QuestDefinition, sqlx::Error> {
            let target_count: i32 = row.try_get("target_count")?;
            Ok(QuestDefinition {
                id: QuestId::from_uuid(row.try_get("id")?),
                code: row.try_get("code")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                quest_type: QuestType::new(row.try_get::<String, _>("quest_type")?),
                target_count: u32::try_from(target_count).unwrap_or(0),
                is_active: row.try_get("is_active")?,
                start_at: row.try_get("start_at")?,
                end_at: row.try_get("end_at")?,
                reward: row.try_get("reward")?,
            })
        };
        read().map_err(catalog_error)
    }
}

fn catalog_error(e: sqlx::Error) -> ConsumerError {
    ConsumerError::Catalog(e.to_string())
}

#[async_trait]
impl QuestCatalog for PostgresQuestCatalog {
    async fn list_active(
        &self,
        quest_type: &QuestType,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, title, description, quest_type, target_count,
                   is_active, start_at, end_at, reward
            FROM quest_definitions
            WHERE quest_type = $1
              AND is_active
              AND (start_at IS NULL OR start_at <= $2)
              AND (end_at IS NULL OR end_at >= $2)
            ORDER BY code
            "#,
        )
        .bind(quest_type.as_str())
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_error)?;

        rows.into_iter().map(Self::row_to_quest).collect()
    }

    async fn get(&self, id: QuestId) -> Result<Option<QuestDefinition>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, title, description, quest_type, target_count,
                   is_active, start_at, end_at, reward
            FROM quest_definitions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(catalog_error)?;

        row.map(Self::row_to_quest).transpose()
    }
}

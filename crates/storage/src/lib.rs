use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use promptly_core::{Intent, PromptRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// Persistence for submitted prompts, keyed by record id and grouped by owner.
pub trait PromptRepository: Send + Sync {
    async fn upsert_prompt(&self, record: &PromptRecord) -> Result<()>;
    async fn load_prompt(&self, id: &str) -> Result<Option<PromptRecord>>;
    /// Newest first: by `created_at`, then by insertion order.
    async fn recent_prompts(&self, owner_id: &str, limit: usize) -> Result<Vec<PromptRecord>>;
    /// Removes all but the newest `keep` records of `owner_id`.
    async fn prune_owner(&self, owner_id: &str, keep: usize) -> Result<u64>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    prompts: Arc<RwLock<Vec<PromptRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_for_owner(&self, owner_id: &str, limit: usize) -> Vec<PromptRecord> {
        let guard = self.prompts.read();
        let mut owned = guard
            .iter()
            .enumerate()
            .filter(|(_, record)| record.owner_id == owner_id)
            .collect::<Vec<_>>();

        owned.sort_by(|(a_idx, a), (b_idx, b)| {
            b.created_at.cmp(&a.created_at).then(b_idx.cmp(a_idx))
        });

        owned
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

impl PromptRepository for MemoryStore {
    async fn upsert_prompt(&self, record: &PromptRecord) -> Result<()> {
        let mut guard = self.prompts.write();
        match guard.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => guard.push(record.clone()),
        }
        Ok(())
    }

    async fn load_prompt(&self, id: &str) -> Result<Option<PromptRecord>> {
        Ok(self
            .prompts
            .read()
            .iter()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn recent_prompts(&self, owner_id: &str, limit: usize) -> Result<Vec<PromptRecord>> {
        Ok(self.newest_for_owner(owner_id, limit))
    }

    async fn prune_owner(&self, owner_id: &str, keep: usize) -> Result<u64> {
        let keep_ids = self
            .newest_for_owner(owner_id, keep)
            .into_iter()
            .map(|record| record.id)
            .collect::<HashSet<_>>();

        let mut removed = 0_u64;
        self.prompts.write().retain(|record| {
            let keep = record.owner_id != owner_id || keep_ids.contains(&record.id);
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url {}", database_url))?
            .create_if_missing(true);

        // Every connection to an in-memory database gets its own empty
        // database, so the pool must hold exactly one and never recycle it.
        let pool_options = if database_url.contains(":memory:") || database_url.contains("mode=memory")
        {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prompts (
              id TEXT PRIMARY KEY,
              owner_id TEXT NOT NULL,
              title TEXT NOT NULL,
              plain_text TEXT NOT NULL,
              markup TEXT NOT NULL,
              explanation TEXT NOT NULL,
              intent TEXT NOT NULL,
              created_at TEXT NOT NULL,
              ai_response TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_prompts_owner_created
            ON prompts (owner_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl PromptRepository for SqliteStore {
    async fn upsert_prompt(&self, record: &PromptRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prompts (id, owner_id, title, plain_text, markup, explanation, intent, created_at, ai_response)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
              owner_id=excluded.owner_id,
              title=excluded.title,
              plain_text=excluded.plain_text,
              markup=excluded.markup,
              explanation=excluded.explanation,
              intent=excluded.intent,
              created_at=excluded.created_at,
              ai_response=excluded.ai_response
            "#,
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.title)
        .bind(&record.plain_text)
        .bind(&record.markup)
        .bind(&record.explanation)
        .bind(record.intent.as_code())
        .bind(encode_timestamp(record.created_at))
        .bind(&record.ai_response)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_prompt(&self, id: &str) -> Result<Option<PromptRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, title, plain_text, markup, explanation, intent, created_at, ai_response
            FROM prompts
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn recent_prompts(&self, owner_id: &str, limit: usize) -> Result<Vec<PromptRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, title, plain_text, markup, explanation, intent, created_at, ai_response
            FROM prompts
            WHERE owner_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn prune_owner(&self, owner_id: &str, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM prompts
            WHERE owner_id = ?1
              AND id NOT IN (
                SELECT id FROM prompts
                WHERE owner_id = ?1
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?2
              )
            "#,
        )
        .bind(owner_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn record_from_row(row: &SqliteRow) -> Result<PromptRecord> {
    let id: String = row.get("id");
    let intent_code: String = row.get("intent");
    let intent = Intent::parse(&intent_code)
        .with_context(|| format!("stored prompt {} has an invalid intent", id))?;
    let created_at_raw: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .with_context(|| format!("stored prompt {} has an invalid timestamp", id))?
        .with_timezone(&Utc);

    Ok(PromptRecord {
        id,
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        plain_text: row.get("plain_text"),
        markup: row.get("markup"),
        explanation: row.get("explanation"),
        intent,
        created_at,
        ai_response: row.get("ai_response"),
    })
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl PromptRepository for Store {
    async fn upsert_prompt(&self, record: &PromptRecord) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_prompt(record).await,
            Store::Sqlite(store) => store.upsert_prompt(record).await,
        }
    }

    async fn load_prompt(&self, id: &str) -> Result<Option<PromptRecord>> {
        match self {
            Store::Memory(store) => store.load_prompt(id).await,
            Store::Sqlite(store) => store.load_prompt(id).await,
        }
    }

    async fn recent_prompts(&self, owner_id: &str, limit: usize) -> Result<Vec<PromptRecord>> {
        match self {
            Store::Memory(store) => store.recent_prompts(owner_id, limit).await,
            Store::Sqlite(store) => store.recent_prompts(owner_id, limit).await,
        }
    }

    async fn prune_owner(&self, owner_id: &str, keep: usize) -> Result<u64> {
        match self {
            Store::Memory(store) => store.prune_owner(owner_id, keep).await,
            Store::Sqlite(store) => store.prune_owner(owner_id, keep).await,
        }
    }
}

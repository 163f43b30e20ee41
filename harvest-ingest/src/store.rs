//! Document persistence keyed by `(collection, id)`.
//!
//! [`SqliteDocumentStore`] keeps every collection in one `documents` table and
//! stores the record as JSON text. Upserts replace the whole body; collections
//! exist as soon as one document is written to them.
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::{collections::HashMap, str::FromStr, sync::Mutex};
use tracing::{debug, info};

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document `id` in `collection`.
    async fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn count(&self, collection: &str) -> Result<u64>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT NOT NULL,
    id          TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    PRIMARY KEY (collection, id)
)
"#;

#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    ///
    /// In-memory URLs are pinned to a single connection that is never recycled,
    /// since every new connection would see an empty database.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url `{url}`"))?
            .create_if_missing(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|| format!("connecting to `{url}`"))?;

        let store = Self::from_pool(pool);
        store.ensure_schema().await?;
        info!(url, in_memory, "store.connected");
        Ok(store)
    }

    /// Wrap an existing pool. Call [`Self::ensure_schema`] before first use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .context("creating documents table")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        let res = sqlx::query(
            r#"INSERT INTO documents (collection, id, body)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(collection, id) DO UPDATE SET
                 body=excluded.body,
                 updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')"#,
        )
        .bind(collection)
        .bind(id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        debug!(
            collection,
            id,
            rows = res.rows_affected(),
            "store.upsert"
        );
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                let doc = serde_json::from_str(&body)
                    .with_context(|| format!("document {collection}/{id} is not valid json"))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

/// In-process store with the same upsert semantics, for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_docs<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, HashMap<String, Value>>) -> T,
    ) -> Result<T> {
        let mut guard = self
            .docs
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut *guard))
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        self.with_docs(|docs| {
            docs.entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc.clone());
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.with_docs(|docs| docs.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.with_docs(|docs| docs.get(collection).map_or(0, |c| c.len() as u64))
    }
}

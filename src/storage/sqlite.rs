use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::info;

use crate::analytics::UtmEvent;
use crate::storage::query::AggregateQuery;
use crate::storage::{Storage, StorageError, StorageResult};

const CREATE_UTM_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS utm (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        page_id TEXT NOT NULL,
        utm_source TEXT,
        utm_medium TEXT,
        utm_campaign TEXT,
        utm_term TEXT,
        utm_content TEXT,
        visited_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        iphash TEXT,
        country_name TEXT,
        city TEXT,
        user_agent TEXT
    )
"#;

/// File-backed event store; the pool is opened on first use
pub struct SqliteStorage {
    path: PathBuf,
    max_connections: u32,
    pool: OnceCell<SqlitePool>,
}

impl SqliteStorage {
    pub fn new(path: impl Into<PathBuf>, max_connections: u32) -> Self {
        Self {
            path: path.into(),
            max_connections,
            pool: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn pool(&self) -> StorageResult<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                self.ensure_schema().await?;

                let options = SqliteConnectOptions::new().filename(&self.path);
                let pool = SqlitePoolOptions::new()
                    .max_connections(self.max_connections)
                    .connect_with(options)
                    .await?;
                Ok::<_, StorageError>(pool)
            })
            .await
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn ensure_schema(&self) -> StorageResult<bool> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut conn = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .connect()
            .await?;

        sqlx::query(CREATE_UTM_TABLE).execute(&mut conn).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_utm_visited_at ON utm(visited_at)")
            .execute(&mut conn)
            .await?;
        conn.close().await?;

        info!(path = %self.path.display(), "created utm event database");
        Ok(true)
    }

    async fn insert(&self, event: &UtmEvent) -> StorageResult<i64> {
        let pool = self.pool().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO utm (page_id, utm_source, utm_medium, utm_campaign, utm_term, utm_content,
                             visited_at, iphash, country_name, city, user_agent)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.page_id)
        .bind(&event.utm_source)
        .bind(&event.utm_medium)
        .bind(&event.utm_campaign)
        .bind(&event.utm_term)
        .bind(&event.utm_content)
        .bind(&event.visited_at)
        .bind(&event.iphash)
        .bind(&event.country_name)
        .bind(&event.city)
        .bind(&event.user_agent)
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn count(&self, query: &AggregateQuery) -> StorageResult<i64> {
        let head = query.sql().trim_start();
        let is_select = head
            .get(..6)
            .map(|word| word.eq_ignore_ascii_case("select"))
            .unwrap_or(false);
        if !is_select {
            return Err(StorageError::InvalidQuery(
                "aggregate queries must start with SELECT".to_string(),
            ));
        }

        let pool = self.pool().await?;

        let mut statement = sqlx::query_scalar::<_, Option<i64>>(query.sql());
        for param in query.params() {
            statement = statement.bind(param.as_str());
        }

        let value = statement.fetch_optional(pool).await?;
        Ok(value.flatten().unwrap_or(0))
    }
}

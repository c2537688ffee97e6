#[cfg(feature = "database")]
use crate::config::DatabaseConfig;
#[cfg(feature = "database")]
use crate::locking::KeyValueStore;
#[cfg(feature = "database")]
use crate::persistence::{RepositoryError, TaskRepository};
#[cfg(feature = "database")]
use crate::tasks::{Task, TaskId, TeamId, UserId};
#[cfg(feature = "database")]
use anyhow::Result;
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, SqlitePool};
#[cfg(feature = "database")]
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::{debug, info};

#[cfg(feature = "database")]
/// SQLite connection pool shared by the lock store and the task repository
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl DatabaseManager {
    /// Initialize database with automatic migrations
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if !sqlx::Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            sqlx::Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn key_value_store(&self) -> SqliteKeyValueStore {
        SqliteKeyValueStore {
            pool: self.pool.clone(),
        }
    }

    pub fn task_repository(&self) -> SqliteTaskRepository {
        SqliteTaskRepository {
            pool: self.pool.clone(),
        }
    }

    /// Remove lock rows whose TTL has passed
    pub async fn purge_expired_locks(&self) -> Result<u64> {
        let purged = sqlx::query("DELETE FROM locks WHERE expires_at <= ?1")
            .bind(now_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if purged > 0 {
            info!("Purged {} expired locks", purged);
        }
        Ok(purged)
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(feature = "database")]
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(feature = "database")]
/// Lock store usable from several processes sharing one database file
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = now_millis();
        let expires_at = now + ttl.as_millis() as i64;
        // The upsert only overwrites a row whose TTL has already run out
        let written = sqlx::query(
            r#"
            INSERT INTO locks (key, value, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            WHERE locks.expires_at <= ?4
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        debug!(key = key, acquired = written == 1, "Conditional lock write");
        Ok(written == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM locks WHERE key = ?1 AND expires_at > ?2")
            .bind(key)
            .bind(now_millis())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM locks WHERE key = ?1 AND value = ?2 AND expires_at > ?3")
            .bind(key)
            .bind(expected)
            .bind(now_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted == 1)
    }
}

#[cfg(feature = "database")]
/// Task repository storing each task as a JSON body next to its indexed columns
#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl SqliteTaskRepository {
    async fn stored_version(&self, id: TaskId) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT version FROM tasks WHERE id = ?1")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<i64, _>("version") as u64))
    }

    async fn query_tasks(&self, sql: &str, key: u64) -> Result<Vec<Task>> {
        let rows = sqlx::query(sql)
            .bind(key as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<Task> { Ok(serde_json::from_str(row.get::<&str, _>("body"))?) })
            .collect()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn next_id(&self) -> Result<TaskId> {
        let id = sqlx::query("INSERT INTO task_sequence DEFAULT VALUES")
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(TaskId(id as u64))
    }

    async fn load(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT body FROM tasks WHERE id = ?1")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Task> { Ok(serde_json::from_str(row.get::<&str, _>("body"))?) })
            .transpose()
    }

    async fn insert(&self, mut task: Task) -> Result<Task, RepositoryError> {
        task.version = 0;
        let body = serde_json::to_string(&task).map_err(anyhow::Error::from)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (id, team_id, assigned_user, deleted, version, body)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
        )
        .bind(task.id.0 as i64)
        .bind(task.team_id.0 as i64)
        .bind(task.assigned_user.map(|user| user.0 as i64))
        .bind(task.deleted)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(task)
    }

    async fn save(&self, mut task: Task) -> Result<Task, RepositoryError> {
        let expected = task.version;
        task.version = expected + 1;
        task.updated_at = chrono::Utc::now();
        let body = serde_json::to_string(&task).map_err(anyhow::Error::from)?;

        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET team_id = ?1, assigned_user = ?2, deleted = ?3, version = ?4, body = ?5
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(task.team_id.0 as i64)
        .bind(task.assigned_user.map(|user| user.0 as i64))
        .bind(task.deleted)
        .bind(task.version as i64)
        .bind(body)
        .bind(task.id.0 as i64)
        .bind(expected as i64)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?
        .rows_affected();

        if updated == 1 {
            return Ok(task);
        }
        match self.stored_version(task.id).await? {
            Some(found) => Err(RepositoryError::VersionConflict {
                task_id: task.id,
                expected,
                found,
            }),
            None => Err(RepositoryError::Missing(task.id)),
        }
    }

    async fn list_by_team(&self, team: TeamId) -> Result<Vec<Task>> {
        self.query_tasks(
            "SELECT body FROM tasks WHERE team_id = ?1 AND deleted = 0 ORDER BY id",
            team.0,
        )
        .await
    }

    async fn list_by_assignee(&self, user: UserId) -> Result<Vec<Task>> {
        self.query_tasks(
            "SELECT body FROM tasks WHERE assigned_user = ?1 AND deleted = 0 ORDER BY id",
            user.0,
        )
        .await
    }
}

#[cfg(feature = "database")]
static DB_MANAGER: std::sync::LazyLock<tokio::sync::RwLock<Option<DatabaseManager>>> =
    std::sync::LazyLock::new(|| tokio::sync::RwLock::new(None));

#[cfg(feature = "database")]
/// Initialize database manager
pub async fn init_database() -> Result<()> {
    let config = crate::config::config()?;

    if let Some(db_config) = &config.database {
        info!("Initializing database at {}", db_config.url);

        let manager = DatabaseManager::new(db_config).await?;

        let mut db_guard = DB_MANAGER.write().await;
        *db_guard = Some(manager);

        info!("Database manager initialized successfully");
    } else {
        info!("Database not configured, skipping initialization");
    }

    Ok(())
}

#[cfg(feature = "database")]
/// The database manager set up by [`init_database`], if any
pub async fn database() -> Option<DatabaseManager> {
    DB_MANAGER.read().await.clone()
}

#[cfg(feature = "database")]
/// Shutdown database connections
pub async fn shutdown_database() {
    let db_guard = DB_MANAGER.read().await;
    if let Some(ref manager) = *db_guard {
        manager.shutdown().await;
    }
}

// Stub implementations for when database feature is not enabled
#[cfg(not(feature = "database"))]
pub async fn init_database() -> anyhow::Result<()> {
    tracing::info!("Database feature not enabled, skipping database initialization");
    Ok(())
}

#[cfg(not(feature = "database"))]
pub async fn shutdown_database() {
    tracing::info!("Database feature not enabled, no database to shutdown");
}

#[cfg(all(test, feature = "database"))]
mod tests {
    use super::*;
    use crate::tasks::{TaskPriority, TaskStatus};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> DatabaseManager {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("tasker.db").display()),
            max_connections: 2,
            auto_migrate: true,
        };
        DatabaseManager::new(&config).await.unwrap()
    }

    fn task(id: TaskId) -> Task {
        let now = chrono::Utc::now();
        Task {
            id,
            team_id: TeamId(1),
            name: "persisted".to_string(),
            description: None,
            assigned_user: Some(UserId(3)),
            status: TaskStatus::Todo,
            priority: TaskPriority::High,
            due_date: None,
            estimated_effort: Some(5),
            labels: BTreeSet::new(),
            watchers: BTreeSet::new(),
            locked: false,
            final_status: false,
            version: 0,
            created_by: UserId(1),
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn test_lock_rows_are_exclusive_until_released() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir).await.key_value_store();
        let ttl = Duration::from_secs(30);

        assert!(store.set_if_absent("task_lock:1", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("task_lock:1", "b", ttl).await.unwrap());
        assert_eq!(store.get("task_lock:1").await.unwrap().as_deref(), Some("a"));

        assert!(!store.delete_if_equals("task_lock:1", "b").await.unwrap());
        assert!(store.delete_if_equals("task_lock:1", "a").await.unwrap());
        assert!(store.set_if_absent("task_lock:1", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_row_can_be_taken_over() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir).await.key_value_store();

        assert!(store.set_if_absent("k", "a", Duration::ZERO).await.unwrap());
        assert!(store.set_if_absent("k", "b", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_repository_compare_and_swap() {
        let dir = TempDir::new().unwrap();
        let repository = manager(&dir).await.task_repository();

        let id = repository.next_id().await.unwrap();
        let stored = repository.insert(task(id)).await.unwrap();
        let saved = repository.save(stored.clone()).await.unwrap();
        assert_eq!(saved.version, 1);

        match repository.save(stored).await {
            Err(RepositoryError::VersionConflict { expected, found, .. }) => {
                assert_eq!((expected, found), (0, 1));
            }
            other => panic!("expected version conflict, got {other:?}"),
        }

        assert_eq!(repository.list_by_team(TeamId(1)).await.unwrap().len(), 1);
        assert_eq!(repository.list_by_assignee(UserId(3)).await.unwrap().len(), 1);
        assert_eq!(repository.load(id).await.unwrap().unwrap().version, 1);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed state store.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, warn};

use crate::error::{Result, StateError};
use crate::model::AggregatedState;
use crate::store::{LeaderToken, StateStore, Versioned};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed state store, one row per application.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
    app_name: String,
}

impl SqliteStateStore {
    /// Create a store from an existing, already migrated pool.
    pub fn new(pool: SqlitePool, app_name: impl Into<String>) -> Self {
        Self {
            pool,
            app_name: app_name.into(),
        }
    }

    /// Apply the embedded migrations to `pool`.
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file if needed, connects,
    /// and runs migrations.
    ///
    /// ```ignore
    /// let store = SqliteStateStore::from_path(".data/state.db", "temporal-k8s").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>, app_name: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self::new(pool, app_name))
    }

    async fn current_revision(&self) -> Result<i64> {
        let revision: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM app_state WHERE app_name = ?")
                .bind(&self.app_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(revision.unwrap_or(0))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn is_ready(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "State database not reachable");
                false
            }
        }
    }

    async fn load(&self) -> Result<Option<Versioned<AggregatedState>>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT revision, data FROM app_state WHERE app_name = ?")
                .bind(&self.app_name)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((revision, data)) => Ok(Some(Versioned {
                revision,
                state: serde_json::from_str(&data)?,
            })),
            None => Ok(None),
        }
    }

    async fn initialize(&self, _token: &LeaderToken) -> Result<()> {
        let data = serde_json::to_string(&AggregatedState::default())?;
        let result = sqlx::query(
            r#"
            INSERT INTO app_state (app_name, revision, data, updated_at)
            VALUES (?, 1, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(app_name) DO NOTHING
            "#,
        )
        .bind(&self.app_name)
        .bind(data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(app_name = %self.app_name, "Initialized default state");
        }
        Ok(())
    }

    async fn store(
        &self,
        _token: &LeaderToken,
        expected_revision: i64,
        state: &AggregatedState,
    ) -> Result<i64> {
        let data = serde_json::to_string(state)?;
        let result = sqlx::query(
            r#"
            UPDATE app_state
            SET data = ?, revision = revision + 1, updated_at = CURRENT_TIMESTAMP
            WHERE app_name = ? AND revision = ?
            "#,
        )
        .bind(data)
        .bind(&self.app_name)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual = self.current_revision().await?;
            return Err(StateError::Conflict {
                expected: expected_revision,
                actual,
            });
        }

        Ok(expected_revision + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseConnection, DatabaseRole};
    use crate::store::update_state;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        pool
    }

    fn connection(name: &str) -> DatabaseConnection {
        DatabaseConnection {
            name: name.to_string(),
            host: "myhost".to_string(),
            port: 5432,
            user: "jean-luc".to_string(),
            password: "inner-light".to_string(),
            tls_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_load_before_initialize_is_none() {
        let store = SqliteStateStore::new(test_pool().await, "temporal-k8s");
        assert!(store.is_ready().await);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_and_store_roundtrip() {
        let store = SqliteStateStore::new(test_pool().await, "temporal-k8s");
        let token = LeaderToken::elected();

        store.initialize(&token).await.unwrap();
        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.state, AggregatedState::default());

        let mut next = snapshot.state.clone();
        next.set_database(DatabaseRole::Primary, Some(connection("temporal-k8s_db")));
        let revision = store.store(&token, 1, &next).await.unwrap();
        assert_eq!(revision, 2);

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.revision, 2);
        assert_eq!(
            loaded.state.database(DatabaseRole::Primary).unwrap().name,
            "temporal-k8s_db"
        );
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = SqliteStateStore::new(test_pool().await, "temporal-k8s");
        let token = LeaderToken::elected();
        store.initialize(&token).await.unwrap();

        let stale = store.load().await.unwrap().unwrap();
        update_state(&store, &token, |s| s.schema_ready = true)
            .await
            .unwrap();

        let err = store
            .store(&token, stale.revision, &stale.state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 1,
                actual: 2
            }
        ));

        // The concurrent write survived.
        assert!(store.load().await.unwrap().unwrap().state.schema_ready);
    }

    #[tokio::test]
    async fn test_applications_are_isolated() {
        let pool = test_pool().await;
        let first = SqliteStateStore::new(pool.clone(), "first");
        let second = SqliteStateStore::new(pool, "second");
        let token = LeaderToken::elected();

        update_state(&first, &token, |s| s.num_shards = Some(8))
            .await
            .unwrap();

        assert!(second.load().await.unwrap().is_none());
        assert_eq!(
            first.load().await.unwrap().unwrap().state.num_shards,
            Some(8)
        );
    }
}

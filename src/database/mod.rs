use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool};

use crate::config::DatabaseConfig;

pub mod configuration;
pub mod mappings;
pub mod rules;

/// Durable store for validation rules, data mappings and the import
/// configuration. Jobs themselves live in the registry; the store only
/// holds the small reference tables read at upload time.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS validation_rules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        field TEXT NOT NULL,
        rule_type TEXT NOT NULL,
        parameters TEXT NOT NULL,
        severity TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_mappings (
        id TEXT PRIMARY KEY,
        source_field TEXT NOT NULL,
        target_field TEXT NOT NULL,
        transformation TEXT NOT NULL,
        parameters TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS import_configuration (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        document TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )
    "#,
];

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        // Create database if it doesn't exist (for SQLite)
        if !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(10))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// An in-memory database, used by tests and available as a zero-setup
    /// default.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema applied");
        Ok(())
    }
}

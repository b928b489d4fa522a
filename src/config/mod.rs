use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub import: ImportRuntimeConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for uploaded import files, keyed by job id.
    pub upload_path: PathBuf,
    /// Directory the downstream sink writes mapped records into.
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRuntimeConfig {
    /// Upper bound on concurrently processing jobs.
    pub max_concurrent_jobs: usize,
    /// Webhook URL for lifecycle events, if any.
    pub event_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Cron expression for the cleanup sweep.
    pub sweep_cron: String,
    /// Terminal jobs older than this many days are removed by the sweep.
    pub max_age_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./land-import.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            storage: StorageConfig {
                upload_path: PathBuf::from("./data/uploads"),
                output_path: PathBuf::from("./data/output"),
            },
            import: ImportRuntimeConfig {
                max_concurrent_jobs: 4,
                event_webhook_url: None,
            },
            retention: RetentionConfig {
                // Hourly sweep
                sweep_cron: "0 0 * * * *".to_string(),
                max_age_days: 30,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all("./data/uploads")?;
            std::fs::create_dir_all("./data/output")?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::errors::AppResult;

/// Downstream write port for mapped records.
///
/// Delivery is at-least-once/best-effort: batches already written stay
/// written when a job is cancelled or fails.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write_batch(&self, job_id: Uuid, records: &[Value]) -> AppResult<()>;

    /// Drop anything written for the job. Called on job delete; best-effort.
    async fn discard(&self, job_id: Uuid) -> AppResult<()>;
}

/// Appends mapped records as JSON lines to a job-scoped file.
pub struct JsonlFileSink {
    output_dir: PathBuf,
}

impl JsonlFileSink {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", job_id))
    }
}

#[async_trait]
impl RecordSink for JsonlFileSink {
    async fn write_batch(&self, job_id: Uuid, records: &[Value]) -> AppResult<()> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(job_id))
            .await?;

        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&record.to_string());
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn discard(&self, job_id: Uuid) -> AppResult<()> {
        match fs::remove_file(self.path_for(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

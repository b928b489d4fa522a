use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{EventSink, ImportEvent};
use crate::models::{ImportJob, ImportJobStatus, ProcessOptions};
use crate::pipeline::{CsvFile, RecordSink, Transformer};
use crate::registry::JobRegistry;
use crate::storage::ImportFileStorage;

/// Asynchronous batched executor for the processing stage.
///
/// `start` transitions the job to `processing` and spawns a worker; the
/// worker runs batches in row order under a concurrency semaphore, reports
/// progress after each batch, and honors cancellation and the job deadline
/// at batch boundaries.
#[derive(Clone)]
pub struct ProcessingEngine {
    registry: Arc<dyn JobRegistry>,
    storage: ImportFileStorage,
    sink: Arc<dyn RecordSink>,
    events: Arc<dyn EventSink>,
    transformer: Arc<Transformer>,
    semaphore: Arc<Semaphore>,
    cancel_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl ProcessingEngine {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        storage: ImportFileStorage,
        sink: Arc<dyn RecordSink>,
        events: Arc<dyn EventSink>,
        transformer: Arc<Transformer>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            registry,
            storage,
            sink,
            events,
            transformer,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start processing a validated job. Returns the job already moved to
    /// `processing`; the actual work runs detached.
    pub async fn start(&self, job_id: Uuid, options: ProcessOptions) -> AppResult<ImportJob> {
        let mut job = self
            .registry
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("import job", job_id))?;

        if job.status != ImportJobStatus::Validated {
            return Err(AppError::invalid_state(
                "job must be validated before processing",
            ));
        }

        job.status = ImportJobStatus::Processing;
        job.processed_rows = 0;
        job.start_time = Utc::now();
        job.end_time = None;
        job.error_message = None;
        let job = self.registry.update(job).await?;

        let token = CancellationToken::new();
        self.cancel_tokens.write().await.insert(job_id, token.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(job_id, options, token).await;
            engine.cancel_tokens.write().await.remove(&job_id);
        });

        Ok(job)
    }

    /// Flip the cancellation token of a running worker. Returns false when
    /// no worker is active for the job.
    pub async fn request_cancel(&self, job_id: Uuid) -> bool {
        match self.cancel_tokens.read().await.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run(&self, job_id: Uuid, options: ProcessOptions, token: CancellationToken) {
        // Queued behind the semaphore; a closed semaphore means shutdown.
        let _permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        match self.process(job_id, &options, &token).await {
            Ok(Outcome::Completed) => {}
            Ok(Outcome::Cancelled) => {}
            Err(e) => {
                error!("Processing of job {} failed: {}", job_id, e);
                if let Err(update_err) = self.fail(job_id, e.to_string()).await {
                    error!(
                        "Could not record failure of job {}: {}",
                        job_id, update_err
                    );
                }
            }
        }
    }

    async fn process(
        &self,
        job_id: Uuid,
        options: &ProcessOptions,
        token: &CancellationToken,
    ) -> AppResult<Outcome> {
        let mut job = self
            .registry
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("import job", job_id))?;

        let batch_size = options
            .batch_size
            .unwrap_or(job.configuration.settings.batch_size)
            .max(1);
        let skip_errors = options.skip_errors.unwrap_or(false);
        let timeout_minutes = options
            .timeout_minutes
            .unwrap_or(job.configuration.settings.timeout_minutes);
        let deadline = job.start_time + Duration::minutes(timeout_minutes as i64);

        let bytes = self.storage.read(&job.filename).await?;
        let file = CsvFile::parse(&bytes)?;
        let total_rows = file.total_rows();
        job.total_rows = total_rows;

        info!(
            "Processing job {}: {} rows in batches of {}",
            job_id, total_rows, batch_size
        );

        let mut offset = 0usize;
        while offset < file.rows.len() {
            if token.is_cancelled() {
                return self.cancelled(job).await;
            }
            if Utc::now() > deadline {
                return Err(AppError::internal(format!(
                    "processing timeout of {timeout_minutes} minutes exceeded"
                )));
            }

            let end = (offset + batch_size).min(file.rows.len());
            let mut records = Vec::with_capacity(end - offset);
            for (index, row) in file.rows[offset..end].iter().enumerate() {
                match self
                    .transformer
                    .apply_mappings(&file.headers, row, &job.configuration.mappings)
                {
                    Ok(record) => records.push(record),
                    Err(message) => {
                        let row_number = offset + index + 1;
                        if skip_errors {
                            warn!(
                                "Skipping row {} of job {}: {}",
                                row_number, job_id, message
                            );
                            job.error_rows += 1;
                            job.valid_rows = job.valid_rows.saturating_sub(1);
                        } else {
                            return Err(AppError::invalid_input(format!(
                                "row {row_number}: {message}"
                            )));
                        }
                    }
                }
            }

            if !records.is_empty() {
                self.sink.write_batch(job_id, &records).await?;
            }

            job.processed_rows = (end as u64).min(total_rows);
            job = self.registry.update(job).await?;
            self.events
                .publish(ImportEvent::Progress {
                    job_id,
                    processed_rows: job.processed_rows,
                    total_rows,
                    progress_percentage: job.progress_percentage(),
                })
                .await;

            offset = end;
            tokio::task::yield_now().await;
        }

        if token.is_cancelled() {
            return self.cancelled(job).await;
        }

        let now = Utc::now();
        let duration_seconds = (now - job.start_time).num_milliseconds() as f64 / 1000.0;
        job.status = ImportJobStatus::Completed;
        job.end_time = Some(now);
        self.registry.update(job).await?;

        info!(
            "Job {} completed: {} rows in {:.1}s",
            job_id, total_rows, duration_seconds
        );
        self.events
            .publish(ImportEvent::Completed {
                job_id,
                total_rows,
                duration_seconds,
            })
            .await;

        Ok(Outcome::Completed)
    }

    async fn cancelled(&self, mut job: ImportJob) -> AppResult<Outcome> {
        let job_id = job.id;
        let processed_rows = job.processed_rows;
        job.status = ImportJobStatus::Cancelled;
        job.end_time = Some(Utc::now());
        self.registry.update(job).await?;

        info!(
            "Job {} cancelled after {} rows",
            job_id, processed_rows
        );
        self.events
            .publish(ImportEvent::Cancelled {
                job_id,
                processed_rows,
            })
            .await;

        Ok(Outcome::Cancelled)
    }

    async fn fail(&self, job_id: Uuid, error: String) -> AppResult<()> {
        if let Some(mut job) = self.registry.get(job_id).await? {
            job.status = ImportJobStatus::ProcessingFailed;
            job.end_time = Some(Utc::now());
            job.error_message = Some(error.clone());
            self.registry.update(job).await?;
        }
        self.events
            .publish(ImportEvent::Failed { job_id, error })
            .await;
        Ok(())
    }
}

enum Outcome {
    Completed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BroadcastEventSink, EventReceiver};
    use crate::models::{
        ImportJobType, JobConfiguration, ImportConfiguration,
    };
    use crate::pipeline::JsonlFileSink;
    use crate::registry::InMemoryJobRegistry;
    use serde_json::json;

    struct Harness {
        engine: Arc<ProcessingEngine>,
        registry: Arc<InMemoryJobRegistry>,
        events: EventReceiver,
        _dir: tempfile::TempDir,
    }

    async fn harness(csv: &[u8], batch_size: usize) -> (Harness, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let storage = ImportFileStorage::new(dir.path().join("uploads"));
        let sink = Arc::new(JsonlFileSink::new(dir.path().join("output")));
        let broadcast = Arc::new(BroadcastEventSink::new());
        let events = broadcast.subscribe();

        let engine = Arc::new(ProcessingEngine::new(
            Arc::clone(&registry) as Arc<dyn JobRegistry>,
            storage.clone(),
            sink,
            broadcast,
            Arc::new(Transformer::new()),
            2,
        ));

        let id = Uuid::new_v4();
        let filename = format!("{id}.csv");
        storage.save(&filename, csv).await.unwrap();

        let file = CsvFile::parse(csv).unwrap();
        let now = Utc::now();
        let mut settings = ImportConfiguration::default();
        settings.batch_size = batch_size;
        let job = ImportJob {
            id,
            filename,
            original_name: "prices.csv".to_string(),
            file_size: csv.len() as u64,
            job_type: ImportJobType::LandRegistry,
            status: ImportJobStatus::Validated,
            total_rows: file.total_rows(),
            processed_rows: 0,
            valid_rows: file.total_rows(),
            error_rows: 0,
            warning_rows: 0,
            start_time: now,
            end_time: None,
            user_id: None,
            configuration: JobConfiguration {
                settings,
                rules: Vec::new(),
                mappings: Vec::new(),
            },
            metadata: json!({}),
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        registry.insert(job).await.unwrap();

        (
            Harness {
                engine,
                registry,
                events,
                _dir: dir,
            },
            id,
        )
    }

    fn csv_with_rows(rows: usize) -> Vec<u8> {
        let mut out = String::from("postcode,price\n");
        for i in 0..rows {
            out.push_str(&format!("LS{} 4AP,{}\n", i, 100000 + i));
        }
        out.into_bytes()
    }

    async fn wait_for_terminal(
        registry: &Arc<InMemoryJobRegistry>,
        id: Uuid,
    ) -> ImportJob {
        for _ in 0..200 {
            let job = registry.get(id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn processes_all_rows_in_batches() {
        let (mut h, id) = harness(&csv_with_rows(250), 100).await;

        let started = h.engine.start(id, ProcessOptions::default()).await.unwrap();
        assert_eq!(started.status, ImportJobStatus::Processing);

        let job = wait_for_terminal(&h.registry, id).await;
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.processed_rows, 250);
        assert!(job.end_time.is_some());

        let mut progress = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let ImportEvent::Progress { processed_rows, .. } = event {
                progress.push(processed_rows);
            }
        }
        assert_eq!(progress, vec![100, 200, 250]);
    }

    #[tokio::test]
    async fn start_rejects_non_validated_job() {
        let (h, id) = harness(&csv_with_rows(5), 100).await;
        let mut job = h.registry.get(id).await.unwrap().unwrap();
        job.status = ImportJobStatus::Uploaded;
        h.registry.update(job).await.unwrap();

        let result = h.engine.start(id, ProcessOptions::default()).await;
        assert!(matches!(result, Err(AppError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn cancel_stops_at_batch_boundary() {
        let (mut h, id) = harness(&csv_with_rows(500), 50).await;

        h.engine.start(id, ProcessOptions::default()).await.unwrap();

        // Cancel as soon as the first progress event lands
        loop {
            match h.events.recv().await.unwrap() {
                ImportEvent::Progress { .. } => break,
                _ => continue,
            }
        }
        assert!(h.engine.request_cancel(id).await);

        let job = wait_for_terminal(&h.registry, id).await;
        assert_eq!(job.status, ImportJobStatus::Cancelled);
        assert!(job.processed_rows < 500);
    }

    #[tokio::test]
    async fn transform_error_fails_job_unless_skipped() {
        let csv = b"price\n100\nnot-a-price\n200\n";
        let mapping = crate::models::DataMapping {
            id: Uuid::new_v4(),
            source_field: "price".to_string(),
            target_field: "price".to_string(),
            transformation: crate::models::Transformation::Currency,
            parameters: serde_json::Value::Null,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // Without skip_errors the job fails on the bad row
        let (h, id) = harness(csv, 10).await;
        let mut job = h.registry.get(id).await.unwrap().unwrap();
        job.configuration.mappings = vec![mapping.clone()];
        h.registry.update(job).await.unwrap();

        h.engine.start(id, ProcessOptions::default()).await.unwrap();
        let job = wait_for_terminal(&h.registry, id).await;
        assert_eq!(job.status, ImportJobStatus::ProcessingFailed);
        assert!(job.error_message.as_deref().unwrap().contains("row 2"));

        // With skip_errors the bad row is counted and skipped
        let (h, id) = harness(csv, 10).await;
        let mut job = h.registry.get(id).await.unwrap().unwrap();
        job.configuration.mappings = vec![mapping];
        h.registry.update(job).await.unwrap();

        h.engine
            .start(
                id,
                ProcessOptions {
                    skip_errors: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let job = wait_for_terminal(&h.registry, id).await;
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.error_rows, 1);
        assert_eq!(job.processed_rows, 3);
    }

    #[tokio::test]
    async fn expired_deadline_fails_the_job() {
        let (h, id) = harness(&csv_with_rows(10), 5).await;

        h.engine
            .start(
                id,
                ProcessOptions {
                    timeout_minutes: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = wait_for_terminal(&h.registry, id).await;
        assert_eq!(job.status, ImportJobStatus::ProcessingFailed);
        assert!(job.error_message.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn retry_after_failure_is_possible_via_status() {
        let (h, id) = harness(&csv_with_rows(3), 10).await;

        h.engine
            .start(
                id,
                ProcessOptions {
                    timeout_minutes: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let job = wait_for_terminal(&h.registry, id).await;
        assert_eq!(job.status, ImportJobStatus::ProcessingFailed);

        // No worker is registered once the job is terminal
        assert!(!h.engine.request_cancel(id).await);
    }
}

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{EventSink, ImportEvent};
use crate::models::{
    DailyStat, ErrorFrequency, ErrorReport, ErrorReportSummary, ImportJob, ImportJobStatus,
    ImportStatistics, ImportTemplate, JobFilter, JobListResponse, JobProgress, Pagination,
    RuleSeverity,
};
use crate::pipeline::{CsvFile, ProcessingEngine, RecordSink};
use crate::registry::JobRegistry;
use crate::storage::ImportFileStorage;

/// Query-side and lifecycle-management operations over import jobs:
/// listing, progress, error reports, cancel/retry/delete, statistics and
/// file-derived views.
pub struct ImportJobService {
    registry: Arc<dyn JobRegistry>,
    storage: ImportFileStorage,
    sink: Arc<dyn RecordSink>,
    processing: Arc<ProcessingEngine>,
    events: Arc<dyn EventSink>,
}

impl ImportJobService {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        storage: ImportFileStorage,
        sink: Arc<dyn RecordSink>,
        processing: Arc<ProcessingEngine>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            storage,
            sink,
            processing,
            events,
        }
    }

    pub async fn list(&self, filter: &JobFilter) -> AppResult<JobListResponse> {
        let (jobs, total) = self.registry.list(filter).await?;
        Ok(JobListResponse {
            pagination: Pagination::new(filter.page.max(1), filter.limit.max(1), total),
            data: jobs,
        })
    }

    pub async fn get(&self, id: Uuid) -> AppResult<ImportJob> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("import job", id))
    }

    pub async fn progress(&self, id: Uuid) -> AppResult<JobProgress> {
        let job = self.get(id).await?;

        let estimated_time_remaining = if job.processed_rows == 0 {
            0.0
        } else {
            let elapsed = (Utc::now() - job.start_time).num_milliseconds() as f64 / 1000.0;
            let rate = job.processed_rows as f64 / elapsed.max(0.001);
            job.total_rows.saturating_sub(job.processed_rows) as f64 / rate
        };

        Ok(JobProgress {
            processed_rows: job.processed_rows,
            total_rows: job.total_rows,
            progress_percentage: job.progress_percentage(),
            estimated_time_remaining,
            current_phase: job.status.as_str().to_string(),
        })
    }

    /// Paginated error report over the job's validation issues, with an
    /// aggregate summary of the five most frequent messages.
    pub async fn errors(&self, id: Uuid, page: u32, limit: u32) -> AppResult<ErrorReport> {
        self.get(id).await?;
        let issues = self.registry.issues(id).await?;

        let critical_errors = issues
            .iter()
            .filter(|i| i.severity == RuleSeverity::Error)
            .count() as u64;
        let warnings = issues.len() as u64 - critical_errors;

        let mut frequency: HashMap<&str, u64> = HashMap::new();
        for issue in &issues {
            *frequency.entry(issue.message.as_str()).or_default() += 1;
        }
        let mut most_common_errors: Vec<ErrorFrequency> = frequency
            .into_iter()
            .map(|(message, count)| ErrorFrequency {
                message: message.to_string(),
                count,
            })
            .collect();
        most_common_errors.sort_by(|a, b| b.count.cmp(&a.count).then(a.message.cmp(&b.message)));
        most_common_errors.truncate(5);

        let page = page.max(1);
        let limit = limit.max(1);
        let start = ((page - 1) * limit) as usize;
        let errors: Vec<_> = issues
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(ErrorReport {
            pagination: Pagination::new(page, limit, issues.len() as u64),
            errors,
            summary: ErrorReportSummary {
                critical_errors,
                warnings,
                most_common_errors,
            },
        })
    }

    /// Cancel a job from any non-terminal state. A running processing
    /// worker is signalled through its token and finishes the transition
    /// itself; all other states are moved directly.
    pub async fn cancel(&self, id: Uuid) -> AppResult<ImportJob> {
        let mut job = self.get(id).await?;

        if job.status.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "job in status '{}' cannot be cancelled",
                job.status.as_str()
            )));
        }

        if job.status == ImportJobStatus::Processing && self.processing.request_cancel(id).await {
            info!("Requested cancellation of running job {}", id);
            return self.get(id).await;
        }

        let processed_rows = job.processed_rows;
        let previous_status = job.status;
        job.status = ImportJobStatus::Cancelled;
        job.end_time = Some(Utc::now());
        // Guarded write: a worker finishing between our read and this
        // commit keeps its terminal state.
        let Some(job) = self
            .registry
            .update_if_status(job, previous_status)
            .await?
        else {
            let current = self.get(id).await?;
            return Err(AppError::invalid_state(format!(
                "job in status '{}' cannot be cancelled",
                current.status.as_str()
            )));
        };

        info!("Cancelled job {}", id);
        self.events
            .publish(ImportEvent::Cancelled {
                job_id: id,
                processed_rows,
            })
            .await;
        Ok(job)
    }

    /// Send a failed job back to `uploaded` for another attempt. Only
    /// `processing_failed` is retryable; the stored file and configuration
    /// snapshot are kept.
    pub async fn retry(&self, id: Uuid) -> AppResult<ImportJob> {
        let mut job = self.get(id).await?;

        if job.status != ImportJobStatus::ProcessingFailed {
            return Err(AppError::invalid_state(format!(
                "only failed jobs can be retried, job is '{}'",
                job.status.as_str()
            )));
        }

        job.status = ImportJobStatus::Uploaded;
        job.processed_rows = 0;
        job.valid_rows = 0;
        job.error_rows = 0;
        job.warning_rows = 0;
        job.start_time = Utc::now();
        job.end_time = None;
        job.error_message = None;
        let job = self.registry.update(job).await?;
        self.registry.set_issues(id, Vec::new()).await?;

        info!("Job {} reset for retry", id);
        Ok(job)
    }

    /// Remove the job, its stored file and any sink output. Running jobs
    /// must be cancelled first.
    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let job = self.get(id).await?;

        if job.status.is_running() {
            return Err(AppError::invalid_state("cannot delete a running job"));
        }

        self.storage.delete(&job.filename).await?;
        if let Err(e) = self.sink.discard(id).await {
            warn!("Could not discard output of job {}: {}", id, e);
        }
        self.registry.delete(id).await?;

        info!("Deleted job {}", id);
        self.events.publish(ImportEvent::Deleted { job_id: id }).await;
        Ok(())
    }

    /// Best-effort bulk delete: jobs that are missing or still running are
    /// skipped, everything else is removed.
    pub async fn bulk_delete(&self, job_ids: &[Uuid]) -> AppResult<u64> {
        let mut deleted = 0;
        for id in job_ids {
            match self.delete(*id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Skipping job {} in bulk delete: {}", id, e),
            }
        }
        Ok(deleted)
    }

    /// Remove terminal jobs older than the cutoff.
    pub async fn cleanup(&self, older_than_days: i64) -> AppResult<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut cleaned = 0;

        for job in self.registry.all().await? {
            if job.status.is_terminal() && job.created_at < cutoff {
                match self.delete(job.id).await {
                    Ok(()) => cleaned += 1,
                    Err(e) => warn!("Skipping job {} in cleanup: {}", job.id, e),
                }
            }
        }

        if cleaned > 0 {
            info!("Cleanup removed {} jobs older than {} days", cleaned, older_than_days);
        }
        Ok(cleaned)
    }

    /// Aggregate statistics over jobs created inside the date window.
    pub async fn statistics(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> AppResult<ImportStatistics> {
        let jobs: Vec<ImportJob> = self
            .registry
            .all()
            .await?
            .into_iter()
            .filter(|job| {
                start_date.map_or(true, |s| job.created_at >= s)
                    && end_date.map_or(true, |e| job.created_at <= e)
            })
            .collect();

        let total_jobs = jobs.len() as u64;
        let completed_jobs = jobs
            .iter()
            .filter(|j| j.status == ImportJobStatus::Completed)
            .count() as u64;
        let failed_jobs = jobs
            .iter()
            .filter(|j| {
                matches!(
                    j.status,
                    ImportJobStatus::ValidationFailed | ImportJobStatus::ProcessingFailed
                )
            })
            .count() as u64;
        let pending_jobs = total_jobs - completed_jobs - failed_jobs;

        let total_rows = jobs.iter().map(|j| j.total_rows).sum();
        let processed_rows = jobs.iter().map(|j| j.processed_rows).sum();

        let success_rate = if total_jobs == 0 {
            0.0
        } else {
            completed_jobs as f64 / total_jobs as f64 * 100.0
        };

        let durations: Vec<f64> = jobs
            .iter()
            .filter(|j| j.status == ImportJobStatus::Completed)
            .filter_map(|j| {
                j.end_time
                    .map(|end| (end - j.start_time).num_milliseconds() as f64 / 1000.0)
            })
            .collect();
        let average_processing_time = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let mut status_breakdown: HashMap<String, u64> = HashMap::new();
        for job in &jobs {
            *status_breakdown
                .entry(job.status.as_str().to_string())
                .or_default() += 1;
        }

        let mut by_day: HashMap<String, (u64, u64)> = HashMap::new();
        for job in &jobs {
            let day = job.created_at.format("%Y-%m-%d").to_string();
            let entry = by_day.entry(day).or_default();
            entry.0 += 1;
            entry.1 += job.processed_rows;
        }
        let mut daily_stats: Vec<DailyStat> = by_day
            .into_iter()
            .map(|(date, (jobs, rows))| DailyStat { date, jobs, rows })
            .collect();
        daily_stats.sort_by(|a, b| a.date.cmp(&b.date));

        Ok(ImportStatistics {
            total_jobs,
            completed_jobs,
            failed_jobs,
            pending_jobs,
            total_rows,
            processed_rows,
            success_rate,
            average_processing_time,
            status_breakdown,
            daily_stats,
        })
    }

    /// Re-reads the stored file and returns the first rows with inferred
    /// column types.
    pub async fn preview(&self, id: Uuid, limit: usize) -> AppResult<crate::models::CsvPreview> {
        let job = self.get(id).await?;
        let bytes = self.storage.read(&job.filename).await?;
        let file = CsvFile::parse(&bytes)?;
        Ok(file.preview(limit))
    }

    /// A downloadable starting point for land-registry uploads.
    pub fn template(&self) -> ImportTemplate {
        ImportTemplate {
            headers: vec![
                "postcode".to_string(),
                "price".to_string(),
                "date_of_transfer".to_string(),
                "property_type".to_string(),
                "town".to_string(),
            ],
            sample_data: vec![
                vec![
                    "LS1 4AP".to_string(),
                    "250000".to_string(),
                    "2024-01-15".to_string(),
                    "terraced".to_string(),
                    "Leeds".to_string(),
                ],
                vec![
                    "YO1 7HH".to_string(),
                    "180000".to_string(),
                    "2024-02-20".to_string(),
                    "flat".to_string(),
                    "York".to_string(),
                ],
            ],
            instructions: vec![
                "Save the file as UTF-8 encoded CSV with a header row.".to_string(),
                "Dates are accepted as YYYY-MM-DD or DD/MM/YYYY.".to_string(),
                "Prices may include a currency symbol and thousands separators.".to_string(),
            ],
        }
    }

    /// Render the job's error report as a download. Supported formats are
    /// `csv` and `json`.
    pub async fn export_errors(&self, id: Uuid, format: &str) -> AppResult<(String, Vec<u8>)> {
        self.get(id).await?;
        let issues = self.registry.issues(id).await?;

        match format {
            "csv" => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer
                    .write_record(["row", "column", "value", "message", "severity", "rule"])
                    .map_err(AppError::from)?;
                for issue in &issues {
                    writer
                        .write_record([
                            issue.row.to_string().as_str(),
                            issue.column.as_str(),
                            issue.value.as_str(),
                            issue.message.as_str(),
                            issue.severity.as_str(),
                            issue.rule.as_str(),
                        ])
                        .map_err(AppError::from)?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| AppError::internal(format!("csv export failed: {e}")))?;
                Ok(("text/csv".to_string(), bytes))
            }
            "json" => {
                let bytes = serde_json::to_vec_pretty(&issues)?;
                Ok(("application/json".to_string(), bytes))
            }
            other => Err(AppError::invalid_input(format!(
                "unsupported export format '{other}' (use csv or json)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastEventSink;
    use crate::models::{
        ImportConfiguration, ImportJobType, JobConfiguration, ValidationIssue,
    };
    use crate::pipeline::{JsonlFileSink, Transformer};
    use crate::registry::InMemoryJobRegistry;
    use serde_json::json;

    fn sample_job(status: ImportJobStatus) -> ImportJob {
        let now = Utc::now();
        let id = Uuid::new_v4();
        ImportJob {
            id,
            filename: format!("{id}.csv"),
            original_name: "prices.csv".to_string(),
            file_size: 100,
            job_type: ImportJobType::LandRegistry,
            status,
            total_rows: 10,
            processed_rows: 0,
            valid_rows: 0,
            error_rows: 0,
            warning_rows: 0,
            start_time: now,
            end_time: None,
            user_id: None,
            configuration: JobConfiguration {
                settings: ImportConfiguration::default(),
                rules: Vec::new(),
                mappings: Vec::new(),
            },
            metadata: json!({}),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    struct Harness {
        service: ImportJobService,
        registry: Arc<InMemoryJobRegistry>,
        storage: ImportFileStorage,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let storage = ImportFileStorage::new(dir.path().join("uploads"));
        let sink: Arc<dyn RecordSink> = Arc::new(JsonlFileSink::new(dir.path().join("output")));
        let events = Arc::new(BroadcastEventSink::new());
        let processing = Arc::new(ProcessingEngine::new(
            Arc::clone(&registry) as Arc<dyn JobRegistry>,
            storage.clone(),
            Arc::clone(&sink),
            events.clone(),
            Arc::new(Transformer::new()),
            2,
        ));
        let service = ImportJobService::new(
            Arc::clone(&registry) as Arc<dyn JobRegistry>,
            storage.clone(),
            sink,
            processing,
            events,
        );
        Harness {
            service,
            registry,
            storage,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn cancel_rules() {
        let h = harness();

        let job = sample_job(ImportJobStatus::Uploaded);
        let id = job.id;
        h.registry.insert(job).await.unwrap();

        let cancelled = h.service.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, ImportJobStatus::Cancelled);
        assert!(cancelled.end_time.is_some());

        // Terminal jobs cannot be cancelled again
        assert!(matches!(
            h.service.cancel(id).await,
            Err(AppError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn retry_only_from_processing_failed() {
        let h = harness();

        let mut failed = sample_job(ImportJobStatus::ProcessingFailed);
        failed.processed_rows = 5;
        failed.error_message = Some("boom".to_string());
        failed.end_time = Some(Utc::now());
        let id = failed.id;
        h.registry.insert(failed).await.unwrap();

        let retried = h.service.retry(id).await.unwrap();
        assert_eq!(retried.status, ImportJobStatus::Uploaded);
        assert_eq!(retried.processed_rows, 0);
        assert!(retried.error_message.is_none());
        assert!(retried.end_time.is_none());

        let completed = sample_job(ImportJobStatus::Completed);
        let completed_id = completed.id;
        h.registry.insert(completed).await.unwrap();
        assert!(matches!(
            h.service.retry(completed_id).await,
            Err(AppError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn delete_refuses_running_jobs() {
        let h = harness();

        let running = sample_job(ImportJobStatus::Processing);
        let running_id = running.id;
        h.registry.insert(running).await.unwrap();
        assert!(matches!(
            h.service.delete(running_id).await,
            Err(AppError::InvalidState { .. })
        ));

        let done = sample_job(ImportJobStatus::Completed);
        let done_id = done.id;
        h.storage
            .save(&done.filename, b"postcode\nLS1 4AP\n")
            .await
            .unwrap();
        h.registry.insert(done).await.unwrap();

        h.service.delete(done_id).await.unwrap();
        assert!(h.registry.get(done_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_jobs() {
        let h = harness();

        let mut old_done = sample_job(ImportJobStatus::Completed);
        old_done.created_at = Utc::now() - Duration::days(60);
        let old_done_id = old_done.id;

        let mut old_running = sample_job(ImportJobStatus::Processing);
        old_running.created_at = Utc::now() - Duration::days(60);
        let old_running_id = old_running.id;

        let fresh = sample_job(ImportJobStatus::Completed);
        let fresh_id = fresh.id;

        h.registry.insert(old_done).await.unwrap();
        h.registry.insert(old_running).await.unwrap();
        h.registry.insert(fresh).await.unwrap();

        let cleaned = h.service.cleanup(30).await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(h.registry.get(old_done_id).await.unwrap().is_none());
        assert!(h.registry.get(old_running_id).await.unwrap().is_some());
        assert!(h.registry.get(fresh_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn statistics_add_up() {
        let h = harness();

        let mut completed = sample_job(ImportJobStatus::Completed);
        completed.end_time = Some(completed.start_time + Duration::seconds(10));
        completed.processed_rows = 10;
        h.registry.insert(completed).await.unwrap();
        h.registry
            .insert(sample_job(ImportJobStatus::ValidationFailed))
            .await
            .unwrap();
        h.registry
            .insert(sample_job(ImportJobStatus::Uploaded))
            .await
            .unwrap();

        let stats = h.service.statistics(None, None).await.unwrap();
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.failed_jobs, 1);
        assert_eq!(stats.pending_jobs, 1);
        assert_eq!(
            stats.total_jobs,
            stats.completed_jobs + stats.failed_jobs + stats.pending_jobs
        );
        assert!((stats.success_rate - 100.0 / 3.0).abs() < 0.01);
        assert!((stats.average_processing_time - 10.0).abs() < 0.01);
        assert_eq!(stats.status_breakdown["completed"], 1);
        assert_eq!(stats.daily_stats.len(), 1);
    }

    #[tokio::test]
    async fn error_report_summarizes_issues() {
        let h = harness();
        let job = sample_job(ImportJobStatus::ValidationFailed);
        let id = job.id;
        h.registry.insert(job).await.unwrap();

        let mut issues = Vec::new();
        for row in 1..=7 {
            issues.push(ValidationIssue {
                row,
                column: "postcode".to_string(),
                value: String::new(),
                message: "'postcode' is required".to_string(),
                severity: RuleSeverity::Error,
                rule: "postcode required".to_string(),
            });
        }
        issues.push(ValidationIssue {
            row: 8,
            column: "price".to_string(),
            value: "90".to_string(),
            message: "90 is below the minimum of 1000".to_string(),
            severity: RuleSeverity::Warning,
            rule: "plausible price".to_string(),
        });
        h.registry.set_issues(id, issues).await.unwrap();

        let report = h.service.errors(id, 1, 5).await.unwrap();
        assert_eq!(report.errors.len(), 5);
        assert_eq!(report.pagination.total, 8);
        assert_eq!(report.pagination.pages, 2);
        assert_eq!(report.summary.critical_errors, 7);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(
            report.summary.most_common_errors[0].message,
            "'postcode' is required"
        );
        assert_eq!(report.summary.most_common_errors[0].count, 7);
    }

    #[tokio::test]
    async fn export_formats() {
        let h = harness();
        let job = sample_job(ImportJobStatus::ValidationFailed);
        let id = job.id;
        h.registry.insert(job).await.unwrap();
        h.registry
            .set_issues(
                id,
                vec![ValidationIssue {
                    row: 1,
                    column: "postcode".to_string(),
                    value: String::new(),
                    message: "'postcode' is required".to_string(),
                    severity: RuleSeverity::Error,
                    rule: "postcode required".to_string(),
                }],
            )
            .await
            .unwrap();

        let (content_type, bytes) = h.service.export_errors(id, "csv").await.unwrap();
        assert_eq!(content_type, "text/csv");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("row,column,value,message,severity,rule"));

        let (content_type, bytes) = h.service.export_errors(id, "json").await.unwrap();
        assert_eq!(content_type, "application/json");
        assert!(serde_json::from_slice::<Vec<ValidationIssue>>(&bytes).is_ok());

        assert!(matches!(
            h.service.export_errors(id, "xlsx").await,
            Err(AppError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn progress_estimates_remaining_time() {
        let h = harness();

        let mut job = sample_job(ImportJobStatus::Processing);
        job.total_rows = 100;
        job.processed_rows = 50;
        job.start_time = Utc::now() - Duration::seconds(10);
        let id = job.id;
        h.registry.insert(job).await.unwrap();

        let progress = h.service.progress(id).await.unwrap();
        assert_eq!(progress.processed_rows, 50);
        assert!((progress.progress_percentage - 50.0).abs() < 0.01);
        // 50 rows in ~10s leaves ~10s for the remaining 50
        assert!(progress.estimated_time_remaining > 5.0);
        assert!(progress.estimated_time_remaining < 15.0);
        assert_eq!(progress.current_phase, "processing");
    }
}

use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::JobRegistry;
use crate::errors::{AppError, AppResult};
use crate::models::{ImportJob, ImportJobStatus, JobFilter, SortOrder, ValidationIssue};

struct StoredJob {
    job: ImportJob,
    issues: Vec<ValidationIssue>,
    /// Insertion sequence; the deterministic tie-break for every sort.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, StoredJob>,
    next_seq: u64,
}

/// In-memory registry backing store.
#[derive(Clone, Default)]
pub struct InMemoryJobRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(job: &ImportJob, filter: &JobFilter) -> bool {
    if let Some(status) = filter.status {
        if job.status != status {
            return false;
        }
    }
    if let Some(job_type) = filter.job_type {
        if job.job_type != job_type {
            return false;
        }
    }
    if let Some(user_id) = &filter.user_id {
        if job.user_id.as_deref() != Some(user_id.as_str()) {
            return false;
        }
    }
    if let Some(start) = filter.start_date {
        if job.created_at < start {
            return false;
        }
    }
    if let Some(end) = filter.end_date {
        if job.created_at > end {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        let haystacks = [
            Some(job.original_name.to_lowercase()),
            Some(job.filename.to_lowercase()),
            job.error_message.as_ref().map(|m| m.to_lowercase()),
            job.user_id.as_ref().map(|u| u.to_lowercase()),
        ];
        if !haystacks
            .iter()
            .flatten()
            .any(|value| value.contains(&needle))
        {
            return false;
        }
    }
    true
}

fn compare_by_field(a: &ImportJob, b: &ImportJob, field: &str) -> Ordering {
    match field {
        "original_name" => a.original_name.cmp(&b.original_name),
        "status" => a.status.as_str().cmp(b.status.as_str()),
        "type" => a.job_type.as_str().cmp(b.job_type.as_str()),
        "file_size" => a.file_size.cmp(&b.file_size),
        "total_rows" => a.total_rows.cmp(&b.total_rows),
        "processed_rows" => a.processed_rows.cmp(&b.processed_rows),
        "error_rows" => a.error_rows.cmp(&b.error_rows),
        "start_time" => a.start_time.cmp(&b.start_time),
        "end_time" => a.end_time.cmp(&b.end_time),
        "updated_at" => a.updated_at.cmp(&b.updated_at),
        // Unknown fields fall back to creation time
        _ => a.created_at.cmp(&b.created_at),
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn insert(&self, job: ImportJob) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            StoredJob {
                job,
                issues: Vec::new(),
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<ImportJob>> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(&id).map(|stored| stored.job.clone()))
    }

    async fn update(&self, mut job: ImportJob) -> AppResult<ImportJob> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| AppError::not_found("import job", job.id))?;
        job.updated_at = Utc::now();
        stored.job = job.clone();
        Ok(job)
    }

    async fn update_if_status(
        &self,
        mut job: ImportJob,
        expected: ImportJobStatus,
    ) -> AppResult<Option<ImportJob>> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| AppError::not_found("import job", job.id))?;
        if stored.job.status != expected {
            return Ok(None);
        }
        job.updated_at = Utc::now();
        stored.job = job.clone();
        Ok(Some(job))
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<(Vec<ImportJob>, u64)> {
        let inner = self.inner.read().await;

        let mut matched: Vec<(&StoredJob, &ImportJob)> = inner
            .jobs
            .values()
            .filter(|stored| matches_filter(&stored.job, filter))
            .map(|stored| (stored, &stored.job))
            .collect();

        let sort_field = filter.sort_by.as_deref().unwrap_or("created_at");
        matched.sort_by(|(sa, ja), (sb, jb)| {
            let ordering = compare_by_field(ja, jb, sort_field);
            let ordering = match filter.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            ordering.then(sa.seq.cmp(&sb.seq))
        });

        let total = matched.len() as u64;
        let page = filter.page.max(1) as usize;
        let limit = filter.limit.max(1) as usize;
        let start = (page - 1) * limit;

        let items = matched
            .into_iter()
            .skip(start)
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect();

        Ok((items, total))
    }

    async fn all(&self) -> AppResult<Vec<ImportJob>> {
        let inner = self.inner.read().await;
        let mut stored: Vec<&StoredJob> = inner.jobs.values().collect();
        stored.sort_by_key(|s| s.seq);
        Ok(stored.into_iter().map(|s| s.job.clone()).collect())
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.jobs.remove(&id).is_some())
    }

    async fn set_issues(&self, id: Uuid, issues: Vec<ValidationIssue>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("import job", id))?;
        stored.issues = issues;
        Ok(())
    }

    async fn issues(&self, id: Uuid) -> AppResult<Vec<ValidationIssue>> {
        let inner = self.inner.read().await;
        let stored = inner
            .jobs
            .get(&id)
            .ok_or_else(|| AppError::not_found("import job", id))?;
        Ok(stored.issues.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ImportConfiguration, ImportJobStatus, ImportJobType, JobConfiguration,
    };
    use serde_json::json;

    fn sample_job(name: &str, status: ImportJobStatus) -> ImportJob {
        let now = Utc::now();
        ImportJob {
            id: Uuid::new_v4(),
            filename: format!("{}.csv", Uuid::new_v4()),
            original_name: name.to_string(),
            file_size: 128,
            job_type: ImportJobType::LandRegistry,
            status,
            total_rows: 10,
            processed_rows: 0,
            valid_rows: 0,
            error_rows: 0,
            warning_rows: 0,
            start_time: now,
            end_time: None,
            user_id: Some("user-1".to_string()),
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

    #[tokio::test]
    async fn insert_get_delete() {
        let registry = InMemoryJobRegistry::new();
        let job = sample_job("a.csv", ImportJobStatus::Uploaded);
        let id = job.id;

        registry.insert(job).await.unwrap();
        assert!(registry.get(id).await.unwrap().is_some());
        assert!(registry.delete(id).await.unwrap());
        assert!(registry.get(id).await.unwrap().is_none());
        assert!(!registry.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn update_bumps_updated_at_and_rejects_unknown() {
        let registry = InMemoryJobRegistry::new();
        let job = sample_job("a.csv", ImportJobStatus::Uploaded);
        let before = job.updated_at;
        registry.insert(job.clone()).await.unwrap();

        let updated = registry.update(job.clone()).await.unwrap();
        assert!(updated.updated_at >= before);

        let ghost = sample_job("ghost.csv", ImportJobStatus::Uploaded);
        assert!(matches!(
            registry.update(ghost).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_if_status_refuses_stale_writes() {
        let registry = InMemoryJobRegistry::new();
        let mut job = sample_job("a.csv", ImportJobStatus::Validating);
        registry.insert(job.clone()).await.unwrap();

        // Concurrent cancel commits first
        let mut cancelled = job.clone();
        cancelled.status = ImportJobStatus::Cancelled;
        cancelled.end_time = Some(Utc::now());
        registry.update(cancelled).await.unwrap();

        job.status = ImportJobStatus::Validated;
        let result = registry
            .update_if_status(job.clone(), ImportJobStatus::Validating)
            .await
            .unwrap();
        assert!(result.is_none());

        let stored = registry.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportJobStatus::Cancelled);
        assert!(stored.end_time.is_some());

        // With the expected status in place the write goes through
        let written = registry
            .update_if_status(job.clone(), ImportJobStatus::Cancelled)
            .await
            .unwrap();
        assert!(written.is_some());
        assert_eq!(
            registry.get(job.id).await.unwrap().unwrap().status,
            ImportJobStatus::Validated
        );
    }

    #[tokio::test]
    async fn list_filters_by_status_and_search() {
        let registry = InMemoryJobRegistry::new();
        registry
            .insert(sample_job("leeds.csv", ImportJobStatus::Completed))
            .await
            .unwrap();
        registry
            .insert(sample_job("york.csv", ImportJobStatus::Uploaded))
            .await
            .unwrap();
        registry
            .insert(sample_job("leeds-2.csv", ImportJobStatus::Uploaded))
            .await
            .unwrap();

        let filter = JobFilter {
            status: Some(ImportJobStatus::Uploaded),
            page: 1,
            limit: 20,
            ..Default::default()
        };
        let (items, total) = registry.list(&filter).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 2);

        let filter = JobFilter {
            search: Some("LEEDS".to_string()),
            page: 1,
            limit: 20,
            ..Default::default()
        };
        let (_, total) = registry.list(&filter).await.unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn list_sorts_with_stable_tie_break() {
        let registry = InMemoryJobRegistry::new();
        let mut first = sample_job("same.csv", ImportJobStatus::Uploaded);
        let mut second = sample_job("same.csv", ImportJobStatus::Uploaded);
        // Identical sort keys; insertion order must decide
        let ts = Utc::now();
        first.created_at = ts;
        second.created_at = ts;
        let (first_id, second_id) = (first.id, second.id);

        registry.insert(first).await.unwrap();
        registry.insert(second).await.unwrap();

        let filter = JobFilter {
            sort_by: Some("original_name".to_string()),
            sort_order: SortOrder::Asc,
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let (items, _) = registry.list(&filter).await.unwrap();
        assert_eq!(items[0].id, first_id);
        assert_eq!(items[1].id, second_id);
    }

    #[tokio::test]
    async fn list_paginates() {
        let registry = InMemoryJobRegistry::new();
        for i in 0..25 {
            registry
                .insert(sample_job(&format!("f{i}.csv"), ImportJobStatus::Uploaded))
                .await
                .unwrap();
        }

        let filter = JobFilter {
            page: 2,
            limit: 10,
            ..Default::default()
        };
        let (items, total) = registry.list(&filter).await.unwrap();
        assert_eq!(total, 25);
        assert_eq!(items.len(), 10);

        let filter = JobFilter {
            page: 3,
            limit: 10,
            ..Default::default()
        };
        let (items, _) = registry.list(&filter).await.unwrap();
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn issues_round_trip() {
        let registry = InMemoryJobRegistry::new();
        let job = sample_job("a.csv", ImportJobStatus::Uploaded);
        let id = job.id;
        registry.insert(job).await.unwrap();

        let issues = vec![ValidationIssue {
            row: 1,
            column: "postcode".to_string(),
            value: String::new(),
            message: "postcode is required".to_string(),
            severity: crate::models::RuleSeverity::Error,
            rule: "postcode required".to_string(),
        }];
        registry.set_issues(id, issues.clone()).await.unwrap();
        assert_eq!(registry.issues(id).await.unwrap().len(), 1);

        assert!(matches!(
            registry.issues(Uuid::new_v4()).await,
            Err(AppError::NotFound { .. })
        ));
    }
}

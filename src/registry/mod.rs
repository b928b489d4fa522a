//! Job registry port.
//!
//! The pipeline talks to the registry through this trait so the backing
//! store can be swapped (in-memory here, durable elsewhere) without
//! touching pipeline logic. Reads may observe a job mid-update: progress
//! queries are eventually-consistent snapshots, not transactional reads.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{ImportJob, ImportJobStatus, JobFilter, ValidationIssue};

pub mod memory;

pub use memory::InMemoryJobRegistry;

#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn insert(&self, job: ImportJob) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<ImportJob>>;

    /// Replace the stored job. Bumps `updated_at`; fails with `NotFound`
    /// for unknown ids.
    async fn update(&self, job: ImportJob) -> AppResult<ImportJob>;

    /// Replace the stored job only if its current status is `expected`;
    /// returns `None` without writing otherwise. Guards stage commits
    /// against a concurrent transition (a cancel landing while the stage
    /// ran) so terminal states are never overwritten.
    async fn update_if_status(
        &self,
        job: ImportJob,
        expected: ImportJobStatus,
    ) -> AppResult<Option<ImportJob>>;

    /// Filtered, sorted, paginated listing. Returns the page of jobs and
    /// the total count matching the filter before pagination.
    async fn list(&self, filter: &JobFilter) -> AppResult<(Vec<ImportJob>, u64)>;

    /// Every job in the registry, in insertion order.
    async fn all(&self) -> AppResult<Vec<ImportJob>>;

    /// Remove the job. Returns false for unknown ids.
    async fn delete(&self, id: Uuid) -> AppResult<bool>;

    /// Persist the validation issues backing the paginated error report.
    async fn set_issues(&self, id: Uuid, issues: Vec<ValidationIssue>) -> AppResult<()>;

    async fn issues(&self, id: Uuid) -> AppResult<Vec<ValidationIssue>>;
}

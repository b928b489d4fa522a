use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::events::{EventSink, ImportEvent};
use crate::models::{
    ImportConfigurationUpdateRequest, ImportJob, ImportJobStatus, ImportJobType, JobConfiguration,
};
use crate::pipeline::CsvFile;
use crate::registry::JobRegistry;
use crate::storage::ImportFileStorage;

pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub job_type: ImportJobType,
    pub user_id: Option<String>,
    /// Per-upload settings overlaid on the stored configuration. Affects
    /// only this job's snapshot, never the store.
    pub configuration: Option<ImportConfigurationUpdateRequest>,
}

/// Upload stage: admission checks, a single parse pass for totals, the
/// configuration snapshot and job creation.
pub struct IntakeService {
    registry: Arc<dyn JobRegistry>,
    storage: ImportFileStorage,
    database: Arc<Database>,
    events: Arc<dyn EventSink>,
}

impl IntakeService {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        storage: ImportFileStorage,
        database: Arc<Database>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            storage,
            database,
            events,
        }
    }

    pub async fn upload(&self, request: UploadRequest) -> AppResult<ImportJob> {
        if request.bytes.is_empty() {
            return Err(AppError::invalid_input("uploaded file is empty"));
        }

        let mut settings = self.database.get_configuration().await?;
        if let Some(overrides) = &request.configuration {
            settings = settings.merged(overrides);
        }

        let extension = request
            .original_name
            .rsplit('.')
            .next()
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        if !settings.allowed_formats.contains(&extension) {
            return Err(AppError::invalid_input(format!(
                "file format '{}' is not allowed (accepted: {})",
                extension,
                settings.allowed_formats.join(", ")
            )));
        }

        if request.bytes.len() as u64 > settings.max_file_size {
            return Err(AppError::invalid_input(format!(
                "file size {} exceeds the maximum of {} bytes",
                request.bytes.len(),
                settings.max_file_size
            )));
        }

        let file = CsvFile::parse(&request.bytes)?;

        // Snapshot rules and mappings now so later store edits cannot
        // change a job already in flight.
        let rules = self
            .database
            .resolve_validation_rules(&settings.validation_rules)
            .await?;
        let mappings = self
            .database
            .resolve_data_mappings(&settings.data_mappings)
            .await?;

        let id = Uuid::new_v4();
        let filename = format!("{id}.{extension}");
        let file_size = self.storage.save(&filename, &request.bytes).await?;

        let now = Utc::now();
        let job = ImportJob {
            id,
            filename,
            original_name: request.original_name,
            file_size,
            job_type: request.job_type,
            status: ImportJobStatus::Uploaded,
            total_rows: file.total_rows(),
            processed_rows: 0,
            valid_rows: 0,
            error_rows: 0,
            warning_rows: 0,
            start_time: now,
            end_time: None,
            user_id: request.user_id,
            configuration: JobConfiguration {
                settings,
                rules,
                mappings,
            },
            metadata: json!({ "headers": file.headers }),
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        self.registry.insert(job.clone()).await?;
        info!(
            "Uploaded '{}' as job {} ({} rows)",
            job.original_name, job.id, job.total_rows
        );
        self.events
            .publish(ImportEvent::Uploaded {
                job_id: job.id,
                original_name: job.original_name.clone(),
                total_rows: job.total_rows,
            })
            .await;

        Ok(job)
    }
}

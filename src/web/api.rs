use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::{
    BulkDeleteRequest, BulkDeleteResponse, CleanupRequest, CleanupResponse, CsvPreview,
    DataMapping, DataMappingCreateRequest, DataMappingUpdateRequest, ErrorReport,
    ImportConfiguration, ImportConfigurationUpdateRequest, ImportJob, ImportJobStatus,
    ImportJobType, ImportStatistics, ImportTemplate, JobFilter, JobListResponse, JobProgress,
    ProcessOptions, SortOrder, ValidationResult, ValidationRule, ValidationRuleCreateRequest,
    ValidationRuleUpdateRequest,
};
use crate::pipeline::UploadRequest;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

// Upload & pipeline stages

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ImportJob>)> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut original_name = String::new();
    let mut job_type = ImportJobType::LandRegistry;
    let mut user_id: Option<String> = None;
    let mut configuration: Option<ImportConfigurationUpdateRequest> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::invalid_input(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                original_name = field.file_name().unwrap_or("upload.csv").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::invalid_input(format!("could not read file: {e}")))?;
                bytes = Some(data.to_vec());
            }
            "type" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::invalid_input(format!("could not read type: {e}")))?;
                job_type = ImportJobType::parse(&text)
                    .ok_or_else(|| AppError::invalid_input(format!("unknown job type '{text}'")))?;
            }
            "user_id" => {
                let text = field.text().await.map_err(|e| {
                    AppError::invalid_input(format!("could not read user_id: {e}"))
                })?;
                user_id = Some(text);
            }
            "configuration" => {
                let text = field.text().await.map_err(|e| {
                    AppError::invalid_input(format!("could not read configuration: {e}"))
                })?;
                configuration = Some(serde_json::from_str(&text).map_err(|e| {
                    AppError::invalid_input(format!("invalid configuration override: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| AppError::invalid_input("missing 'file' field"))?;
    let job = state
        .intake
        .upload(UploadRequest {
            bytes,
            original_name,
            job_type,
            user_id,
            configuration,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn validate_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<ValidationResult>> {
    let result = state.validation.validate(id).await?;
    Ok(Json(result))
}

pub async fn process_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    payload: Option<Json<ProcessOptions>>,
) -> AppResult<Json<ImportJob>> {
    let options = payload.map(|Json(o)| o).unwrap_or_default();
    let job = state
        .processing
        .start(id, options)
        .await
        .map_err(|e| match e {
            // Contract: processing a non-validated job is a bad request
            AppError::InvalidState { message } => AppError::InvalidInput { message },
            other => other,
        })?;
    Ok(Json(job))
}

// Job queries

#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl JobQueryParams {
    fn into_filter(self) -> AppResult<JobFilter> {
        let status = match self.status {
            Some(s) => Some(
                ImportJobStatus::parse(&s)
                    .ok_or_else(|| AppError::invalid_input(format!("unknown status '{s}'")))?,
            ),
            None => None,
        };
        let job_type = match self.job_type {
            Some(t) => Some(
                ImportJobType::parse(&t)
                    .ok_or_else(|| AppError::invalid_input(format!("unknown job type '{t}'")))?,
            ),
            None => None,
        };

        Ok(JobFilter {
            status,
            job_type,
            user_id: self.user_id,
            start_date: self.start_date,
            end_date: self.end_date,
            search: self.search,
            sort_by: self.sort_by,
            sort_order: self.sort_order.unwrap_or_default(),
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(20),
        })
    }
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> AppResult<Json<JobListResponse>> {
    let filter = params.into_filter()?;
    let response = state.jobs.list(&filter).await?;
    Ok(Json(response))
}

pub async fn get_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<ImportJob>> {
    let job = state.jobs.get(id).await?;
    Ok(Json(job))
}

pub async fn job_progress(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<JobProgress>> {
    let progress = state.jobs.progress(id).await?;
    Ok(Json(progress))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn job_errors(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<ErrorReport>> {
    let report = state
        .jobs
        .errors(id, params.page.unwrap_or(1), params.limit.unwrap_or(50))
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub rows: Option<usize>,
}

pub async fn job_preview(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(params): Query<PreviewParams>,
) -> AppResult<Json<CsvPreview>> {
    let preview = state.jobs.preview(id, params.rows.unwrap_or(10)).await?;
    Ok(Json(preview))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
}

pub async fn export_job_errors(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> AppResult<Response> {
    let format = params.format.unwrap_or_else(|| "csv".to_string());
    let (content_type, body) = state.jobs.export_errors(id, &format).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"errors-{id}.{format}\""),
            ),
        ],
        body,
    )
        .into_response())
}

// Job lifecycle management

pub async fn cancel_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<ImportJob>> {
    let job = state.jobs.cancel(id).await?;
    Ok(Json(job))
}

pub async fn retry_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<ImportJob>> {
    let job = state.jobs.retry(id).await?;
    Ok(Json(job))
}

pub async fn delete_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<StatusCode> {
    state.jobs.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete_jobs(
    State(state): State<AppState>,
    Json(payload): Json<BulkDeleteRequest>,
) -> AppResult<Json<BulkDeleteResponse>> {
    let deleted_count = state.jobs.bulk_delete(&payload.job_ids).await?;
    Ok(Json(BulkDeleteResponse { deleted_count }))
}

pub async fn cleanup_jobs(
    State(state): State<AppState>,
    Json(payload): Json<CleanupRequest>,
) -> AppResult<Json<CleanupResponse>> {
    if payload.older_than_days < 0 {
        return Err(AppError::invalid_input("older_than_days must be >= 0"));
    }
    let cleaned_count = state.jobs.cleanup(payload.older_than_days).await?;
    Ok(Json(CleanupResponse { cleaned_count }))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> AppResult<Json<ImportStatistics>> {
    let stats = state
        .jobs
        .statistics(params.start_date, params.end_date)
        .await?;
    Ok(Json(stats))
}

pub async fn template(State(state): State<AppState>) -> Json<ImportTemplate> {
    Json(state.jobs.template())
}

// Validation rules CRUD

pub async fn list_rules(State(state): State<AppState>) -> AppResult<Json<Vec<ValidationRule>>> {
    let rules = state.database.list_validation_rules().await?;
    Ok(Json(rules))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(payload): Json<ValidationRuleCreateRequest>,
) -> AppResult<(StatusCode, Json<ValidationRule>)> {
    let rule = state.database.create_validation_rule(&payload).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_rule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<ValidationRule>> {
    let rule = state
        .database
        .get_validation_rule(id)
        .await?
        .ok_or_else(|| AppError::not_found("validation rule", id))?;
    Ok(Json(rule))
}

pub async fn update_rule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ValidationRuleUpdateRequest>,
) -> AppResult<Json<ValidationRule>> {
    let rule = state
        .database
        .update_validation_rule(id, &payload)
        .await?
        .ok_or_else(|| AppError::not_found("validation rule", id))?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<StatusCode> {
    if state.database.delete_validation_rule(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("validation rule", id))
    }
}

// Data mappings CRUD

pub async fn list_mappings(State(state): State<AppState>) -> AppResult<Json<Vec<DataMapping>>> {
    let mappings = state.database.list_data_mappings().await?;
    Ok(Json(mappings))
}

pub async fn create_mapping(
    State(state): State<AppState>,
    Json(payload): Json<DataMappingCreateRequest>,
) -> AppResult<(StatusCode, Json<DataMapping>)> {
    let mapping = state.database.create_data_mapping(&payload).await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

pub async fn get_mapping(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<DataMapping>> {
    let mapping = state
        .database
        .get_data_mapping(id)
        .await?
        .ok_or_else(|| AppError::not_found("data mapping", id))?;
    Ok(Json(mapping))
}

pub async fn update_mapping(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<DataMappingUpdateRequest>,
) -> AppResult<Json<DataMapping>> {
    let mapping = state
        .database
        .update_data_mapping(id, &payload)
        .await?
        .ok_or_else(|| AppError::not_found("data mapping", id))?;
    Ok(Json(mapping))
}

pub async fn delete_mapping(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<StatusCode> {
    if state.database.delete_data_mapping(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("data mapping", id))
    }
}

// Import configuration

pub async fn get_configuration(
    State(state): State<AppState>,
) -> AppResult<Json<ImportConfiguration>> {
    let configuration = state.database.get_configuration().await?;
    Ok(Json(configuration))
}

pub async fn update_configuration(
    State(state): State<AppState>,
    Json(payload): Json<ImportConfigurationUpdateRequest>,
) -> AppResult<Json<ImportConfiguration>> {
    let configuration = state.database.update_configuration(&payload).await?;
    Ok(Json(configuration))
}

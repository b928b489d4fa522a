use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle states of an import job.
///
/// `uploaded -> validating -> {validated, validation_failed} -> processing
/// -> {completed, processing_failed}`. Any non-terminal state may move to
/// `cancelled` via an explicit cancel; `processing_failed` may move back to
/// `uploaded` via an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportJobStatus {
    Uploaded,
    Validating,
    Validated,
    ValidationFailed,
    Processing,
    Completed,
    ProcessingFailed,
    Cancelled,
}

impl ImportJobStatus {
    /// Terminal states admit no further pipeline-driven mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportJobStatus::Completed
                | ImportJobStatus::ProcessingFailed
                | ImportJobStatus::Cancelled
        )
    }

    /// A job may not be deleted while a worker can still touch it.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ImportJobStatus::Validating | ImportJobStatus::Processing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportJobStatus::Uploaded => "uploaded",
            ImportJobStatus::Validating => "validating",
            ImportJobStatus::Validated => "validated",
            ImportJobStatus::ValidationFailed => "validation_failed",
            ImportJobStatus::Processing => "processing",
            ImportJobStatus::Completed => "completed",
            ImportJobStatus::ProcessingFailed => "processing_failed",
            ImportJobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploaded" => Some(ImportJobStatus::Uploaded),
            "validating" => Some(ImportJobStatus::Validating),
            "validated" => Some(ImportJobStatus::Validated),
            "validation_failed" => Some(ImportJobStatus::ValidationFailed),
            "processing" => Some(ImportJobStatus::Processing),
            "completed" => Some(ImportJobStatus::Completed),
            "processing_failed" => Some(ImportJobStatus::ProcessingFailed),
            "cancelled" => Some(ImportJobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportJobType {
    LandRegistry,
    PropertyData,
    MarketData,
    Custom,
}

impl ImportJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportJobType::LandRegistry => "land_registry",
            ImportJobType::PropertyData => "property_data",
            ImportJobType::MarketData => "market_data",
            ImportJobType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "land_registry" => Some(ImportJobType::LandRegistry),
            "property_data" => Some(ImportJobType::PropertyData),
            "market_data" => Some(ImportJobType::MarketData),
            "custom" => Some(ImportJobType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Required,
    Regex,
    Range,
    Length,
    Format,
    Custom,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Required => "required",
            RuleType::Regex => "regex",
            RuleType::Range => "range",
            RuleType::Length => "length",
            RuleType::Format => "format",
            RuleType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "required" => Some(RuleType::Required),
            "regex" => Some(RuleType::Regex),
            "range" => Some(RuleType::Range),
            "length" => Some(RuleType::Length),
            "format" => Some(RuleType::Format),
            "custom" => Some(RuleType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Error,
    Warning,
    Info,
}

impl RuleSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSeverity::Error => "error",
            RuleSeverity::Warning => "warning",
            RuleSeverity::Info => "info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error" => Some(RuleSeverity::Error),
            "warning" => Some(RuleSeverity::Warning),
            "info" => Some(RuleSeverity::Info),
            _ => None,
        }
    }
}

/// A single per-field validation predicate. `field = "*"` applies the rule
/// to every column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: Uuid,
    pub name: String,
    pub field: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub parameters: Value,
    pub severity: RuleSeverity,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationRuleCreateRequest {
    pub name: String,
    pub field: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub parameters: Value,
    pub severity: RuleSeverity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationRuleUpdateRequest {
    pub name: Option<String>,
    pub field: Option<String>,
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    pub parameters: Option<Value>,
    pub severity: Option<RuleSeverity>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transformation {
    None,
    Uppercase,
    Lowercase,
    Trim,
    Currency,
    Date,
    Concatenate,
    Split,
    Custom,
}

impl Transformation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transformation::None => "none",
            Transformation::Uppercase => "uppercase",
            Transformation::Lowercase => "lowercase",
            Transformation::Trim => "trim",
            Transformation::Currency => "currency",
            Transformation::Date => "date",
            Transformation::Concatenate => "concatenate",
            Transformation::Split => "split",
            Transformation::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Transformation::None),
            "uppercase" => Some(Transformation::Uppercase),
            "lowercase" => Some(Transformation::Lowercase),
            "trim" => Some(Transformation::Trim),
            "currency" => Some(Transformation::Currency),
            "date" => Some(Transformation::Date),
            "concatenate" => Some(Transformation::Concatenate),
            "split" => Some(Transformation::Split),
            "custom" => Some(Transformation::Custom),
            _ => None,
        }
    }
}

/// A per-field projection from a source column to a target record field,
/// applied only during processing (never during validation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMapping {
    pub id: Uuid,
    pub source_field: String,
    pub target_field: String,
    pub transformation: Transformation,
    pub parameters: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataMappingCreateRequest {
    pub source_field: String,
    pub target_field: String,
    #[serde(default = "default_transformation")]
    pub transformation: Transformation,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataMappingUpdateRequest {
    pub source_field: Option<String>,
    pub target_field: Option<String>,
    pub transformation: Option<Transformation>,
    pub parameters: Option<Value>,
    pub enabled: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

fn default_transformation() -> Transformation {
    Transformation::None
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub slack: bool,
    #[serde(default)]
    pub webhook: Option<String>,
}

/// Global import settings. Singleton in spirit: read at upload time and
/// embedded into each job as part of its configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfiguration {
    pub max_file_size: u64,
    pub allowed_formats: Vec<String>,
    pub batch_size: usize,
    pub validation_rules: Vec<Uuid>,
    pub data_mappings: Vec<Uuid>,
    pub notifications: NotificationSettings,
    pub retry_attempts: u32,
    pub timeout_minutes: u64,
}

impl Default for ImportConfiguration {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            allowed_formats: vec!["csv".to_string()],
            batch_size: 100,
            validation_rules: Vec::new(),
            data_mappings: Vec::new(),
            notifications: NotificationSettings::default(),
            retry_attempts: 3,
            timeout_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportConfigurationUpdateRequest {
    pub max_file_size: Option<u64>,
    pub allowed_formats: Option<Vec<String>>,
    pub batch_size: Option<usize>,
    pub validation_rules: Option<Vec<Uuid>>,
    pub data_mappings: Option<Vec<Uuid>>,
    pub notifications: Option<NotificationSettings>,
    pub retry_attempts: Option<u32>,
    pub timeout_minutes: Option<u64>,
}

impl ImportConfiguration {
    /// Overlay the set fields of an update request onto this configuration.
    pub fn merged(mut self, request: &ImportConfigurationUpdateRequest) -> Self {
        if let Some(max_file_size) = request.max_file_size {
            self.max_file_size = max_file_size;
        }
        if let Some(allowed_formats) = &request.allowed_formats {
            self.allowed_formats = allowed_formats.clone();
        }
        if let Some(batch_size) = request.batch_size {
            self.batch_size = batch_size.max(1);
        }
        if let Some(validation_rules) = &request.validation_rules {
            self.validation_rules = validation_rules.clone();
        }
        if let Some(data_mappings) = &request.data_mappings {
            self.data_mappings = data_mappings.clone();
        }
        if let Some(notifications) = &request.notifications {
            self.notifications = notifications.clone();
        }
        if let Some(retry_attempts) = request.retry_attempts {
            self.retry_attempts = retry_attempts;
        }
        if let Some(timeout_minutes) = request.timeout_minutes {
            self.timeout_minutes = timeout_minutes;
        }
        self
    }
}

/// Configuration captured into a job at upload time. Rules and mappings are
/// resolved to full definitions so that later edits to the store cannot
/// change the behavior of a job already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub settings: ImportConfiguration,
    pub rules: Vec<ValidationRule>,
    pub mappings: Vec<DataMapping>,
}

/// The central entity: one run of importing a single uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    /// Storage key of the uploaded bytes.
    pub filename: String,
    pub original_name: String,
    pub file_size: u64,
    #[serde(rename = "type")]
    pub job_type: ImportJobType,
    pub status: ImportJobStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub valid_rows: u64,
    pub error_rows: u64,
    pub warning_rows: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub configuration: JobConfiguration,
    pub metadata: Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn progress_percentage(&self) -> f64 {
        if self.total_rows == 0 {
            if self.status == ImportJobStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.processed_rows as f64 / self.total_rows as f64) * 100.0
        }
    }
}

/// A single rule violation, 1-indexed by data row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub row: u64,
    pub column: String,
    pub value: String,
    pub message: String,
    pub severity: RuleSeverity,
    pub rule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub validation_passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub total_rows: u64,
    pub valid_rows: u64,
    pub error_rows: u64,
    pub warning_rows: u64,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub summary: ValidationSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessOptions {
    pub batch_size: Option<usize>,
    pub skip_errors: Option<bool>,
    pub timeout_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub processed_rows: u64,
    pub total_rows: u64,
    pub progress_percentage: f64,
    /// Seconds, derived from the observed processing rate; 0 until the
    /// first batch lands.
    pub estimated_time_remaining: f64,
    pub current_phase: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

/// Filter and page parameters for job listing.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<ImportJobStatus>,
    pub job_type: Option<ImportJobType>,
    pub user_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let pages = if limit == 0 {
            0
        } else {
            ((total + limit as u64 - 1) / limit as u64) as u32
        };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListResponse {
    pub data: Vec<ImportJob>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrequency {
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReportSummary {
    pub critical_errors: u64,
    pub warnings: u64,
    pub most_common_errors: Vec<ErrorFrequency>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub errors: Vec<ValidationIssue>,
    pub pagination: Pagination,
    pub summary: ErrorReportSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyStat {
    pub date: String,
    pub jobs: u64,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportStatistics {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub pending_jobs: u64,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub success_rate: f64,
    /// Seconds, averaged over jobs that reached `completed`.
    pub average_processing_time: f64,
    pub status_breakdown: HashMap<String, u64>,
    pub daily_stats: Vec<DailyStat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CsvPreview {
    pub headers: Vec<String>,
    pub data: Vec<Vec<String>>,
    pub data_types: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportTemplate {
    pub headers: Vec<String>,
    pub sample_data: Vec<Vec<String>>,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkDeleteRequest {
    pub job_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDeleteResponse {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequest {
    pub older_than_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    pub cleaned_count: u64,
}

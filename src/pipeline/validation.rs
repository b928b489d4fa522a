use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{EventSink, ImportEvent};
use crate::models::{
    ImportJob, ImportJobStatus, RuleSeverity, RuleType, ValidationIssue, ValidationResult,
    ValidationRule, ValidationSummary,
};
use crate::pipeline::CsvFile;
use crate::registry::JobRegistry;
use crate::storage::ImportFileStorage;

type CustomPredicate = Arc<dyn Fn(&str, &Value) -> Result<(), String> + Send + Sync>;

/// Pure rule evaluation over parsed CSV content.
///
/// Compiled regexes are cached per pattern so a rule applied to a million
/// rows compiles once. The engine never touches the registry or storage.
#[derive(Default)]
pub struct ValidationEngine {
    regex_cache: std::sync::Mutex<HashMap<String, Regex>>,
    custom_predicates: HashMap<String, CustomPredicate>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named predicate usable via `type = "custom"` with
    /// `parameters.name` pointing at it.
    pub fn register_custom<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&str, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom_predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Run every enabled rule over every row. Rows are 1-indexed in the
    /// reported issues; a row is valid iff it raised no error-severity
    /// issue.
    pub fn validate(&self, file: &CsvFile, rules: &[ValidationRule]) -> ValidationResult {
        let enabled: Vec<&ValidationRule> = rules.iter().filter(|r| r.enabled).collect();

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut error_row_flags = vec![false; file.rows.len()];
        let mut warning_row_flags = vec![false; file.rows.len()];

        for (row_index, row) in file.rows.iter().enumerate() {
            for rule in &enabled {
                for (column, value) in self.rule_targets(file, row, rule) {
                    if let Err(message) = self.check(rule, value) {
                        let issue = ValidationIssue {
                            row: row_index as u64 + 1,
                            column: column.to_string(),
                            value: value.to_string(),
                            message,
                            severity: rule.severity,
                            rule: rule.name.clone(),
                        };
                        match rule.severity {
                            RuleSeverity::Error => {
                                error_row_flags[row_index] = true;
                                errors.push(issue);
                            }
                            // Info issues surface through the warning
                            // counters and report
                            RuleSeverity::Warning | RuleSeverity::Info => {
                                warning_row_flags[row_index] = true;
                                warnings.push(issue);
                            }
                        }
                    }
                }
            }
        }

        let total_rows = file.total_rows();
        let error_rows = error_row_flags.iter().filter(|f| **f).count() as u64;
        let warning_rows = warning_row_flags.iter().filter(|f| **f).count() as u64;

        ValidationResult {
            total_rows,
            valid_rows: total_rows - error_rows,
            error_rows,
            warning_rows,
            summary: ValidationSummary {
                validation_passed: error_rows == 0,
            },
            errors,
            warnings,
        }
    }

    /// The (column, value) pairs a rule applies to on one row. `field = "*"`
    /// fans out over every column; a named column that is missing from the
    /// header is treated as present with an empty value.
    fn rule_targets<'a>(
        &self,
        file: &'a CsvFile,
        row: &'a [String],
        rule: &'a ValidationRule,
    ) -> Vec<(&'a str, &'a str)> {
        if rule.field == "*" {
            file.headers
                .iter()
                .enumerate()
                .map(|(index, header)| {
                    let value = row.get(index).map(|s| s.as_str()).unwrap_or("");
                    (header.as_str(), value)
                })
                .collect()
        } else {
            let value = file
                .column_index(&rule.field)
                .and_then(|index| row.get(index))
                .map(|s| s.as_str())
                .unwrap_or("");
            vec![(rule.field.as_str(), value)]
        }
    }

    fn check(&self, rule: &ValidationRule, value: &str) -> Result<(), String> {
        match rule.rule_type {
            RuleType::Required => {
                if value.trim().is_empty() {
                    Err(format!("'{}' is required", rule.field))
                } else {
                    Ok(())
                }
            }
            RuleType::Regex => self.check_regex(rule, value),
            RuleType::Range => check_range(rule, value),
            RuleType::Length => check_length(rule, value),
            RuleType::Format => check_format(rule, value),
            RuleType::Custom => {
                let name = rule
                    .parameters
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "custom rule requires parameters.name".to_string())?;
                let predicate = self
                    .custom_predicates
                    .get(name)
                    .ok_or_else(|| format!("unknown custom rule '{name}'"))?;
                predicate(value, &rule.parameters)
            }
        }
    }

    fn check_regex(&self, rule: &ValidationRule, value: &str) -> Result<(), String> {
        let pattern = rule
            .parameters
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| "regex rule requires parameters.pattern".to_string())?;

        let mut cache = self
            .regex_cache
            .lock()
            .map_err(|_| "regex cache poisoned".to_string())?;
        if !cache.contains_key(pattern) {
            let compiled =
                Regex::new(pattern).map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
            cache.insert(pattern.to_string(), compiled);
        }
        let regex = &cache[pattern];

        if regex.is_match(value) {
            Ok(())
        } else {
            Err(format!("value does not match pattern '{pattern}'"))
        }
    }
}

fn check_range(rule: &ValidationRule, value: &str) -> Result<(), String> {
    let number: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;

    if let Some(min) = rule.parameters.get("min").and_then(Value::as_f64) {
        if number < min {
            return Err(format!("{number} is below the minimum of {min}"));
        }
    }
    if let Some(max) = rule.parameters.get("max").and_then(Value::as_f64) {
        if number > max {
            return Err(format!("{number} is above the maximum of {max}"));
        }
    }
    Ok(())
}

fn check_length(rule: &ValidationRule, value: &str) -> Result<(), String> {
    let length = value.chars().count() as u64;
    let min = rule
        .parameters
        .get("min_length")
        .or_else(|| rule.parameters.get("minLength"))
        .and_then(Value::as_u64);
    let max = rule
        .parameters
        .get("max_length")
        .or_else(|| rule.parameters.get("maxLength"))
        .and_then(Value::as_u64);

    if let Some(min) = min {
        if length < min {
            return Err(format!("length {length} is below the minimum of {min}"));
        }
    }
    if let Some(max) = max {
        if length > max {
            return Err(format!("length {length} is above the maximum of {max}"));
        }
    }
    Ok(())
}

// UK postcode shape: outcode, space, incode.
const POSTCODE_PATTERN: &str = r"^[A-Z]{1,2}[0-9][A-Z0-9]?\s*[0-9][A-Z]{2}$";

fn check_format(rule: &ValidationRule, value: &str) -> Result<(), String> {
    let format = rule
        .parameters
        .get("format")
        .and_then(Value::as_str)
        .ok_or_else(|| "format rule requires parameters.format".to_string())?;
    let trimmed = value.trim();

    let ok = match format {
        "date" => {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok()
                || NaiveDate::parse_from_str(trimmed, "%d/%m/%Y").is_ok()
                || NaiveDate::parse_from_str(trimmed, "%d-%m-%Y").is_ok()
        }
        "postcode" => Regex::new(POSTCODE_PATTERN)
            .map(|re| re.is_match(&trimmed.to_uppercase()))
            .unwrap_or(false),
        "email" => {
            let parts: Vec<&str> = trimmed.splitn(2, '@').collect();
            parts.len() == 2 && !parts[0].is_empty() && parts[1].contains('.')
        }
        "number" => trimmed.parse::<f64>().is_ok(),
        other => return Err(format!("unknown format '{other}'")),
    };

    if ok {
        Ok(())
    } else {
        Err(format!("'{value}' is not a valid {format}"))
    }
}

/// Orchestrates the validation stage: state transitions, file reads, issue
/// persistence and the lifecycle event.
pub struct ValidationService {
    registry: Arc<dyn JobRegistry>,
    storage: ImportFileStorage,
    events: Arc<dyn EventSink>,
    engine: Arc<ValidationEngine>,
}

impl ValidationService {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        storage: ImportFileStorage,
        events: Arc<dyn EventSink>,
        engine: Arc<ValidationEngine>,
    ) -> Self {
        Self {
            registry,
            storage,
            events,
            engine,
        }
    }

    /// Run validation for one job. Allowed from `uploaded` and, for a
    /// re-run after fixing rules, from `validation_failed`.
    pub async fn validate(&self, job_id: Uuid) -> AppResult<ValidationResult> {
        let mut job = self
            .registry
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("import job", job_id))?;

        if !matches!(
            job.status,
            ImportJobStatus::Uploaded | ImportJobStatus::ValidationFailed
        ) {
            return Err(AppError::invalid_state(format!(
                "job cannot be validated from status '{}'",
                job.status.as_str()
            )));
        }

        let previous_status = job.status;
        job.status = ImportJobStatus::Validating;
        job = self.registry.update(job).await?;

        match self.run(&job).await {
            Ok(result) => {
                job.total_rows = result.total_rows;
                job.valid_rows = result.valid_rows;
                job.error_rows = result.error_rows;
                job.warning_rows = result.warning_rows;
                job.processed_rows = 0;
                job.status = if result.summary.validation_passed {
                    ImportJobStatus::Validated
                } else {
                    ImportJobStatus::ValidationFailed
                };
                job.error_message = None;
                // Commit only if the job is still ours; a cancel that
                // landed mid-run keeps its terminal state.
                let committed = self
                    .registry
                    .update_if_status(job, ImportJobStatus::Validating)
                    .await?;
                if committed.is_none() {
                    let status = self
                        .registry
                        .get(job_id)
                        .await?
                        .map(|j| j.status.as_str().to_string())
                        .unwrap_or_else(|| "deleted".to_string());
                    warn!(
                        "Discarding validation outcome of job {}: job moved to '{}' mid-run",
                        job_id, status
                    );
                    return Err(AppError::invalid_state(format!(
                        "job was moved to '{status}' while validating"
                    )));
                }

                let mut issues = result.errors.clone();
                issues.extend(result.warnings.iter().cloned());
                self.registry.set_issues(job_id, issues).await?;

                info!(
                    "Validation of job {} finished: {} valid, {} error rows",
                    job_id, result.valid_rows, result.error_rows
                );
                self.events
                    .publish(ImportEvent::Validated {
                        job_id,
                        valid_rows: result.valid_rows,
                        error_rows: result.error_rows,
                        warning_rows: result.warning_rows,
                        validation_passed: result.summary.validation_passed,
                    })
                    .await;

                Ok(result)
            }
            Err(e) => {
                // Validation itself failed (unreadable file, bad rule);
                // put the job back where it was so it can be re-run.
                warn!("Validation of job {} failed: {}", job_id, e);
                job.status = previous_status;
                job.updated_at = Utc::now();
                self.registry
                    .update_if_status(job, ImportJobStatus::Validating)
                    .await?;
                Err(e)
            }
        }
    }

    async fn run(&self, job: &ImportJob) -> AppResult<ValidationResult> {
        let bytes = self.storage.read(&job.filename).await?;
        let file = CsvFile::parse(&bytes)?;
        Ok(self.engine.validate(&file, &job.configuration.rules))
    }
}

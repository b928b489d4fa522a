use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{DataMapping, Transformation};

type CustomTransform = Arc<dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync>;

/// Applies a job's data mappings to one CSV row, producing the mapped JSON
/// record handed to the sink.
///
/// Transformations are pure per-cell functions. A failing transformation
/// reports the offending mapping so the caller can decide between skipping
/// the row and failing the job.
#[derive(Clone, Default)]
pub struct Transformer {
    custom_transforms: HashMap<String, CustomTransform>,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named transform usable via `transformation = "custom"`
    /// with `parameters.name` pointing at it.
    pub fn register_custom<F>(&mut self, name: impl Into<String>, transform: F)
    where
        F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.custom_transforms.insert(name.into(), Arc::new(transform));
    }

    /// Map one row into a JSON record. With no enabled mappings the row is
    /// passed through as-is, keyed by header.
    pub fn apply_mappings(
        &self,
        headers: &[String],
        row: &[String],
        mappings: &[DataMapping],
    ) -> Result<Value, String> {
        let enabled: Vec<&DataMapping> = mappings.iter().filter(|m| m.enabled).collect();

        if enabled.is_empty() {
            let mut record = Map::new();
            for (index, header) in headers.iter().enumerate() {
                let value = row.get(index).map(|s| s.as_str()).unwrap_or("");
                record.insert(header.clone(), Value::String(value.to_string()));
            }
            return Ok(Value::Object(record));
        }

        let mut record = Map::new();
        for mapping in enabled {
            let value = self.apply_one(headers, row, mapping).map_err(|e| {
                format!(
                    "mapping '{}' -> '{}': {}",
                    mapping.source_field, mapping.target_field, e
                )
            })?;
            record.insert(mapping.target_field.clone(), value);
        }
        Ok(Value::Object(record))
    }

    fn apply_one(
        &self,
        headers: &[String],
        row: &[String],
        mapping: &DataMapping,
    ) -> Result<Value, String> {
        let source = lookup(headers, row, &mapping.source_field);

        match mapping.transformation {
            Transformation::None => Ok(Value::String(source.to_string())),
            Transformation::Uppercase => Ok(Value::String(source.to_uppercase())),
            Transformation::Lowercase => Ok(Value::String(source.to_lowercase())),
            Transformation::Trim => Ok(Value::String(source.trim().to_string())),
            Transformation::Currency => transform_currency(source),
            Transformation::Date => transform_date(source, &mapping.parameters),
            Transformation::Concatenate => {
                transform_concatenate(headers, row, &mapping.parameters)
            }
            Transformation::Split => transform_split(source, &mapping.parameters),
            Transformation::Custom => {
                let name = mapping
                    .parameters
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "custom transformation requires parameters.name".to_string())?;
                let transform = self
                    .custom_transforms
                    .get(name)
                    .ok_or_else(|| format!("unknown custom transformation '{name}'"))?;
                transform(source, &mapping.parameters)
            }
        }
    }
}

fn lookup<'a>(headers: &[String], row: &'a [String], field: &str) -> &'a str {
    headers
        .iter()
        .position(|h| h == field)
        .and_then(|index| row.get(index))
        .map(|s| s.as_str())
        .unwrap_or("")
}

/// Strips currency symbols and thousands separators, yields a number
/// rounded to two decimal places.
fn transform_currency(value: &str) -> Result<Value, String> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '£' | '$' | '€' | ',' | ' '))
        .collect();

    if cleaned.is_empty() {
        return Ok(Value::Null);
    }

    let amount: f64 = cleaned
        .parse()
        .map_err(|_| format!("'{value}' is not a currency amount"))?;
    Ok(json!((amount * 100.0).round() / 100.0))
}

const DATE_INPUT_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%m/%d/%Y"];

fn transform_date(value: &str, parameters: &Value) -> Result<Value, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let date = DATE_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| format!("'{value}' is not a recognized date"))?;

    let output_format = parameters
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%d");
    Ok(Value::String(date.format(output_format).to_string()))
}

/// Joins several source columns with a separator. `parameters.fields` names
/// the columns, `parameters.separator` defaults to a single space.
fn transform_concatenate(
    headers: &[String],
    row: &[String],
    parameters: &Value,
) -> Result<Value, String> {
    let fields = parameters
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| "concatenate requires parameters.fields".to_string())?;
    let separator = parameters
        .get("separator")
        .and_then(Value::as_str)
        .unwrap_or(" ");

    let parts: Vec<&str> = fields
        .iter()
        .filter_map(Value::as_str)
        .map(|field| lookup(headers, row, field))
        .collect();
    Ok(Value::String(parts.join(separator)))
}

fn transform_split(value: &str, parameters: &Value) -> Result<Value, String> {
    let separator = parameters
        .get("separator")
        .and_then(Value::as_str)
        .unwrap_or(",");
    let index = parameters
        .get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| "split requires parameters.index".to_string())? as usize;

    let part = value
        .split(separator)
        .nth(index)
        .ok_or_else(|| format!("'{value}' has no segment {index}"))?;
    Ok(Value::String(part.trim().to_string()))
}

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{
    RuleSeverity, RuleType, ValidationRule, ValidationRuleCreateRequest,
    ValidationRuleUpdateRequest,
};

fn rule_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<ValidationRule> {
    let rule_type_str: String = row.try_get("rule_type")?;
    let severity_str: String = row.try_get("severity")?;
    let parameters_str: String = row.try_get("parameters")?;

    Ok(ValidationRule {
        id: row
            .try_get::<String, _>("id")?
            .parse()
            .map_err(|_| AppError::internal("invalid uuid in validation_rules"))?,
        name: row.try_get("name")?,
        field: row.try_get("field")?,
        rule_type: RuleType::parse(&rule_type_str)
            .ok_or_else(|| AppError::internal(format!("unknown rule type '{rule_type_str}'")))?,
        parameters: serde_json::from_str(&parameters_str)?,
        severity: RuleSeverity::parse(&severity_str)
            .ok_or_else(|| AppError::internal(format!("unknown severity '{severity_str}'")))?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl super::Database {
    pub async fn list_validation_rules(&self) -> AppResult<Vec<ValidationRule>> {
        let rows = sqlx::query(
            "SELECT id, name, field, rule_type, parameters, severity, enabled, created_at, updated_at
             FROM validation_rules
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    pub async fn get_validation_rule(&self, id: Uuid) -> AppResult<Option<ValidationRule>> {
        let row = sqlx::query(
            "SELECT id, name, field, rule_type, parameters, severity, enabled, created_at, updated_at
             FROM validation_rules
             WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(rule_from_row).transpose()
    }

    /// Resolve rule ids to full definitions, preserving the given order and
    /// skipping ids that no longer exist.
    pub async fn resolve_validation_rules(&self, ids: &[Uuid]) -> AppResult<Vec<ValidationRule>> {
        let mut rules = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rule) = self.get_validation_rule(*id).await? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    pub async fn create_validation_rule(
        &self,
        request: &ValidationRuleCreateRequest,
    ) -> AppResult<ValidationRule> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let parameters = serde_json::to_string(&request.parameters)?;

        sqlx::query(
            "INSERT INTO validation_rules (id, name, field, rule_type, parameters, severity, enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&request.name)
        .bind(&request.field)
        .bind(request.rule_type.as_str())
        .bind(&parameters)
        .bind(request.severity.as_str())
        .bind(request.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_validation_rule(id)
            .await?
            .ok_or_else(|| AppError::internal("failed to retrieve created validation rule"))
    }

    pub async fn update_validation_rule(
        &self,
        id: Uuid,
        request: &ValidationRuleUpdateRequest,
    ) -> AppResult<Option<ValidationRule>> {
        let existing = match self.get_validation_rule(id).await? {
            Some(rule) => rule,
            None => return Ok(None),
        };

        let name = request.name.clone().unwrap_or(existing.name);
        let field = request.field.clone().unwrap_or(existing.field);
        let rule_type = request.rule_type.unwrap_or(existing.rule_type);
        let parameters = request
            .parameters
            .clone()
            .unwrap_or(existing.parameters);
        let severity = request.severity.unwrap_or(existing.severity);
        let enabled = request.enabled.unwrap_or(existing.enabled);

        sqlx::query(
            "UPDATE validation_rules
             SET name = ?, field = ?, rule_type = ?, parameters = ?, severity = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&name)
        .bind(&field)
        .bind(rule_type.as_str())
        .bind(serde_json::to_string(&parameters)?)
        .bind(severity.as_str())
        .bind(enabled)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_validation_rule(id).await
    }

    pub async fn delete_validation_rule(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM validation_rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{
    DataMapping, DataMappingCreateRequest, DataMappingUpdateRequest, Transformation,
};

fn mapping_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<DataMapping> {
    let transformation_str: String = row.try_get("transformation")?;
    let parameters_str: String = row.try_get("parameters")?;

    Ok(DataMapping {
        id: row
            .try_get::<String, _>("id")?
            .parse()
            .map_err(|_| AppError::internal("invalid uuid in data_mappings"))?,
        source_field: row.try_get("source_field")?,
        target_field: row.try_get("target_field")?,
        transformation: Transformation::parse(&transformation_str).ok_or_else(|| {
            AppError::internal(format!("unknown transformation '{transformation_str}'"))
        })?,
        parameters: serde_json::from_str(&parameters_str)?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl super::Database {
    pub async fn list_data_mappings(&self) -> AppResult<Vec<DataMapping>> {
        let rows = sqlx::query(
            "SELECT id, source_field, target_field, transformation, parameters, enabled, created_at, updated_at
             FROM data_mappings
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mapping_from_row).collect()
    }

    pub async fn get_data_mapping(&self, id: Uuid) -> AppResult<Option<DataMapping>> {
        let row = sqlx::query(
            "SELECT id, source_field, target_field, transformation, parameters, enabled, created_at, updated_at
             FROM data_mappings
             WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mapping_from_row).transpose()
    }

    /// Resolve mapping ids to full definitions, preserving the given order
    /// and skipping ids that no longer exist.
    pub async fn resolve_data_mappings(&self, ids: &[Uuid]) -> AppResult<Vec<DataMapping>> {
        let mut mappings = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mapping) = self.get_data_mapping(*id).await? {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    pub async fn create_data_mapping(
        &self,
        request: &DataMappingCreateRequest,
    ) -> AppResult<DataMapping> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let parameters = serde_json::to_string(&request.parameters)?;

        sqlx::query(
            "INSERT INTO data_mappings (id, source_field, target_field, transformation, parameters, enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&request.source_field)
        .bind(&request.target_field)
        .bind(request.transformation.as_str())
        .bind(&parameters)
        .bind(request.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_data_mapping(id)
            .await?
            .ok_or_else(|| AppError::internal("failed to retrieve created data mapping"))
    }

    pub async fn update_data_mapping(
        &self,
        id: Uuid,
        request: &DataMappingUpdateRequest,
    ) -> AppResult<Option<DataMapping>> {
        let existing = match self.get_data_mapping(id).await? {
            Some(mapping) => mapping,
            None => return Ok(None),
        };

        let source_field = request
            .source_field
            .clone()
            .unwrap_or(existing.source_field);
        let target_field = request
            .target_field
            .clone()
            .unwrap_or(existing.target_field);
        let transformation = request.transformation.unwrap_or(existing.transformation);
        let parameters = request.parameters.clone().unwrap_or(existing.parameters);
        let enabled = request.enabled.unwrap_or(existing.enabled);

        sqlx::query(
            "UPDATE data_mappings
             SET source_field = ?, target_field = ?, transformation = ?, parameters = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&source_field)
        .bind(&target_field)
        .bind(transformation.as_str())
        .bind(serde_json::to_string(&parameters)?)
        .bind(enabled)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_data_mapping(id).await
    }

    pub async fn delete_data_mapping(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM data_mappings WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

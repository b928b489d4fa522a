use chrono::Utc;
use sqlx::Row;

use crate::errors::AppResult;
use crate::models::{ImportConfiguration, ImportConfigurationUpdateRequest};

impl super::Database {
    /// The active import configuration. Falls back to defaults when no row
    /// has been written yet.
    pub async fn get_configuration(&self) -> AppResult<ImportConfiguration> {
        let row = sqlx::query("SELECT document FROM import_configuration WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            }
            None => Ok(ImportConfiguration::default()),
        }
    }

    pub async fn update_configuration(
        &self,
        request: &ImportConfigurationUpdateRequest,
    ) -> AppResult<ImportConfiguration> {
        let configuration = self.get_configuration().await?.merged(request);

        let document = serde_json::to_string(&configuration)?;
        sqlx::query(
            "INSERT INTO import_configuration (id, document, updated_at)
             VALUES (1, ?, ?)
             ON CONFLICT (id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at",
        )
        .bind(&document)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(configuration)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::models::ImportConfigurationUpdateRequest;

    #[tokio::test]
    async fn configuration_defaults_then_persists() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();

        let config = db.get_configuration().await.unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.allowed_formats, vec!["csv".to_string()]);

        let request = ImportConfigurationUpdateRequest {
            max_file_size: None,
            allowed_formats: None,
            batch_size: Some(250),
            validation_rules: None,
            data_mappings: None,
            notifications: None,
            retry_attempts: None,
            timeout_minutes: Some(5),
        };
        let updated = db.update_configuration(&request).await.unwrap();
        assert_eq!(updated.batch_size, 250);
        assert_eq!(updated.timeout_minutes, 5);

        let reread = db.get_configuration().await.unwrap();
        assert_eq!(reread.batch_size, 250);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use flowline_bpmn::TaskConfiguration;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;

use super::{
    IdentityMappingRecord, InstanceState, MappingInsert, NewProcessDefinition, NewProcessImage,
    NewProcessInstance, ProcessDefinitionRecord, ProcessImageRecord, ProcessInstanceRecord, Store,
    TaskConfigRecord, assignee_type_column,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const DEFINITION_COLUMNS: &str = "id, definition_key, engine_definition_id, deployment_id, \
     version, name, description, tags, xml, deployed_by, deployed_at, active";

const TASK_CONFIG_COLUMNS: &str = "id, definition_key, task_id, task_name, assignee_type, \
     assignee_user, assignee_group, assignee_entity, responsible_user, interested_user, \
     priority, duration_value, duration_unit, add_form_resource, notify_on_creation, \
     notify_on_deadline, reminder_before_deadline, entry_conditions, exit_conditions, updated_at";

const INSTANCE_COLUMNS: &str = "id, instance_id, definition_key, engine_definition_id, \
     business_key, started_by, state, variables, started_at, ended_at, created_at, updated_at";

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. The pool's database must
    /// already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file if needed, connects,
    /// and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn upsert_definition(
        &self,
        definition: &NewProcessDefinition,
    ) -> Result<ProcessDefinitionRecord, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_definitions
                (definition_key, engine_definition_id, deployment_id, version,
                 name, description, tags, xml, deployed_by, deployed_at, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, ?)
            ON CONFLICT(definition_key) DO UPDATE SET
                engine_definition_id = excluded.engine_definition_id,
                deployment_id = excluded.deployment_id,
                version = excluded.version,
                name = excluded.name,
                description = excluded.description,
                tags = excluded.tags,
                xml = excluded.xml,
                deployed_by = excluded.deployed_by,
                deployed_at = CURRENT_TIMESTAMP,
                active = excluded.active
            "#,
        )
        .bind(&definition.definition_key)
        .bind(&definition.engine_definition_id)
        .bind(&definition.deployment_id)
        .bind(definition.version)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(&definition.tags)
        .bind(&definition.xml)
        .bind(&definition.deployed_by)
        .bind(definition.active)
        .execute(&self.pool)
        .await?;

        let record = self
            .get_definition(&definition.definition_key)
            .await?
            .ok_or_else(|| CoreError::DatabaseError {
                operation: "upsert_definition".to_string(),
                details: "row missing after upsert".to_string(),
            })?;
        Ok(record)
    }

    async fn get_definition(
        &self,
        key: &str,
    ) -> Result<Option<ProcessDefinitionRecord>, CoreError> {
        let record = sqlx::query_as::<_, ProcessDefinitionRecord>(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM process_definitions WHERE definition_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_definitions(&self) -> Result<Vec<ProcessDefinitionRecord>, CoreError> {
        let records = sqlx::query_as::<_, ProcessDefinitionRecord>(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM process_definitions ORDER BY definition_key"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn replace_images(
        &self,
        definition_key: &str,
        images: &[NewProcessImage],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM process_images WHERE definition_key = ?")
            .bind(definition_key)
            .execute(&mut *tx)
            .await?;

        for image in images {
            sqlx::query(
                r#"
                INSERT INTO process_images
                    (definition_key, file_name, original_file_name, content_type,
                     file_size, data, description, display_order)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(definition_key)
            .bind(&image.file_name)
            .bind(&image.original_file_name)
            .bind(&image.content_type)
            .bind(image.data.len() as i64)
            .bind(&image.data)
            .bind(&image.description)
            .bind(image.display_order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_images(
        &self,
        definition_key: &str,
    ) -> Result<Vec<ProcessImageRecord>, CoreError> {
        let records = sqlx::query_as::<_, ProcessImageRecord>(
            r#"
            SELECT id, definition_key, file_name, original_file_name, content_type,
                   file_size, data, description, display_order, uploaded_at
            FROM process_images
            WHERE definition_key = ?
            ORDER BY display_order, id
            "#,
        )
        .bind(definition_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_task_config(
        &self,
        definition_key: &str,
        config: &TaskConfiguration,
    ) -> Result<(), CoreError> {
        let entry_conditions = serde_json::to_string(&config.entry_conditions)?;
        let exit_conditions = serde_json::to_string(&config.exit_conditions)?;

        sqlx::query(
            r#"
            INSERT INTO task_configurations
                (definition_key, task_id, task_name, assignee_type, assignee_user,
                 assignee_group, assignee_entity, responsible_user, interested_user,
                 priority, duration_value, duration_unit, add_form_resource,
                 notify_on_creation, notify_on_deadline, reminder_before_deadline,
                 entry_conditions, exit_conditions, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(definition_key, task_id) DO UPDATE SET
                task_name = excluded.task_name,
                assignee_type = excluded.assignee_type,
                assignee_user = excluded.assignee_user,
                assignee_group = excluded.assignee_group,
                assignee_entity = excluded.assignee_entity,
                responsible_user = excluded.responsible_user,
                interested_user = excluded.interested_user,
                priority = excluded.priority,
                duration_value = excluded.duration_value,
                duration_unit = excluded.duration_unit,
                add_form_resource = excluded.add_form_resource,
                notify_on_creation = excluded.notify_on_creation,
                notify_on_deadline = excluded.notify_on_deadline,
                reminder_before_deadline = excluded.reminder_before_deadline,
                entry_conditions = excluded.entry_conditions,
                exit_conditions = excluded.exit_conditions,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(definition_key)
        .bind(&config.task_id)
        .bind(&config.task_name)
        .bind(assignee_type_column(config))
        .bind(&config.assignee_user)
        .bind(&config.assignee_group)
        .bind(&config.assignee_entity)
        .bind(&config.responsible_user)
        .bind(&config.interested_user)
        .bind(&config.priority)
        .bind(config.duration_value)
        .bind(&config.duration_unit)
        .bind(config.add_form_resource)
        .bind(config.notify_on_creation)
        .bind(config.notify_on_deadline)
        .bind(config.reminder_before_deadline)
        .bind(entry_conditions)
        .bind(exit_conditions)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_task_config(
        &self,
        definition_key: &str,
        task_id: &str,
    ) -> Result<Option<TaskConfigRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskConfigRecord>(&format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM task_configurations \
             WHERE definition_key = ? AND task_id = ?"
        ))
        .bind(definition_key)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_task_configs(
        &self,
        definition_key: &str,
    ) -> Result<Vec<TaskConfigRecord>, CoreError> {
        let records = sqlx::query_as::<_, TaskConfigRecord>(&format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM task_configurations \
             WHERE definition_key = ? ORDER BY task_id"
        ))
        .bind(definition_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_instance(
        &self,
        instance: &NewProcessInstance,
    ) -> Result<ProcessInstanceRecord, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_instances
                (instance_id, definition_key, engine_definition_id, business_key,
                 started_by, state, variables, started_at)
            VALUES (?, ?, ?, ?, ?, 'ACTIVE', ?, ?)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.definition_key)
        .bind(&instance.engine_definition_id)
        .bind(&instance.business_key)
        .bind(&instance.started_by)
        .bind(&instance.variables)
        .bind(instance.started_at)
        .execute(&self.pool)
        .await?;

        let record = self
            .get_instance(&instance.instance_id)
            .await?
            .ok_or_else(|| CoreError::DatabaseError {
                operation: "insert_instance".to_string(),
                details: "row missing after insert".to_string(),
            })?;
        Ok(record)
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<ProcessInstanceRecord>, CoreError> {
        let record = sqlx::query_as::<_, ProcessInstanceRecord>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM process_instances WHERE instance_id = ?"
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_instance_state(
        &self,
        instance_id: &str,
        state: InstanceState,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE process_instances
            SET state = ?, ended_at = COALESCE(?, ended_at), updated_at = CURRENT_TIMESTAMP
            WHERE instance_id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(ended_at)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_instances_by_state(
        &self,
        state: InstanceState,
    ) -> Result<Vec<ProcessInstanceRecord>, CoreError> {
        let records = sqlx::query_as::<_, ProcessInstanceRecord>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM process_instances WHERE state = ? ORDER BY created_at"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_instances_by_starter(
        &self,
        started_by: &str,
    ) -> Result<Vec<ProcessInstanceRecord>, CoreError> {
        let records = sqlx::query_as::<_, ProcessInstanceRecord>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM process_instances \
             WHERE started_by = ? ORDER BY created_at"
        ))
        .bind(started_by)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_identity_mapping(
        &self,
        original_id: &str,
        engine_id: &str,
        resource_type: &str,
    ) -> Result<MappingInsert, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO identity_mappings (original_id, engine_id, resource_type)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(original_id)
        .bind(engine_id)
        .bind(resource_type)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                let record = self
                    .find_mapping_by_original(original_id)
                    .await?
                    .ok_or_else(|| CoreError::DatabaseError {
                        operation: "insert_identity_mapping".to_string(),
                        details: "row missing after insert".to_string(),
                    })?;
                Ok(MappingInsert::Inserted(record))
            }
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                // Either the original id lost a race (idempotent success) or
                // the generated engine id is taken by someone else.
                match self.find_mapping_by_original(original_id).await? {
                    Some(record) => Ok(MappingInsert::ExistingOriginal(record)),
                    None => Ok(MappingInsert::EngineIdTaken),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_mapping_by_original(
        &self,
        original_id: &str,
    ) -> Result<Option<IdentityMappingRecord>, CoreError> {
        let record = sqlx::query_as::<_, IdentityMappingRecord>(
            r#"
            SELECT id, original_id, engine_id, resource_type, created_at
            FROM identity_mappings
            WHERE original_id = ?
            "#,
        )
        .bind(original_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_mapping_by_engine_id(
        &self,
        engine_id: &str,
    ) -> Result<Option<IdentityMappingRecord>, CoreError> {
        let record = sqlx::query_as::<_, IdentityMappingRecord>(
            r#"
            SELECT id, original_id, engine_id, resource_type, created_at
            FROM identity_mappings
            WHERE engine_id = ?
            "#,
        )
        .bind(engine_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

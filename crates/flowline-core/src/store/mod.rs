// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for flowline-core.
//!
//! This module defines the persistence abstraction and backend
//! implementations. The tables shadow engine state: definitions, their
//! attached images and task configurations, started instances, and the
//! identity mapping table that ties caller-side ids to engine-compliant ids.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use flowline_bpmn::{AssigneeType, TaskConfiguration};

use crate::error::CoreError;

/// Persisted process definition, keyed by its unique definition key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessDefinitionRecord {
    /// Database primary key.
    pub id: i64,
    /// Definition key, unique across the table.
    pub definition_key: String,
    /// Engine-assigned definition id, when deployed to the engine.
    pub engine_definition_id: Option<String>,
    /// Engine deployment id, when deployed to the engine.
    pub deployment_id: Option<String>,
    /// Definition version (engine-assigned, or locally incremented).
    pub version: i32,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Tags as a JSON array, serialized as text.
    pub tags: Option<String>,
    /// The transformed document body.
    pub xml: String,
    /// Original id of the deploying principal.
    pub deployed_by: Option<String>,
    /// When the definition was last deployed.
    pub deployed_at: DateTime<Utc>,
    /// Whether the definition is available for starting instances.
    pub active: bool,
}

/// Input for creating or updating a definition.
#[derive(Debug, Clone)]
pub struct NewProcessDefinition {
    /// Definition key.
    pub definition_key: String,
    /// Engine-assigned definition id, if any.
    pub engine_definition_id: Option<String>,
    /// Engine deployment id, if any.
    pub deployment_id: Option<String>,
    /// Definition version.
    pub version: i32,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Tags as a JSON array, serialized as text.
    pub tags: Option<String>,
    /// The transformed document body.
    pub xml: String,
    /// Original id of the deploying principal.
    pub deployed_by: Option<String>,
    /// Whether the definition is available for starting instances.
    pub active: bool,
}

/// Diagram image attached to a definition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessImageRecord {
    /// Database primary key.
    pub id: i64,
    /// Owning definition key.
    pub definition_key: String,
    /// Stored file name.
    pub file_name: String,
    /// File name as uploaded by the caller.
    pub original_file_name: Option<String>,
    /// MIME type.
    pub content_type: Option<String>,
    /// Size of the stored data in bytes.
    pub file_size: i64,
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Caller-supplied description.
    pub description: Option<String>,
    /// Ordering among a definition's images.
    pub display_order: i32,
    /// When the image was stored.
    pub uploaded_at: DateTime<Utc>,
}

/// Input for attaching an image to a definition.
#[derive(Debug, Clone)]
pub struct NewProcessImage {
    /// Stored file name.
    pub file_name: String,
    /// File name as uploaded by the caller.
    pub original_file_name: Option<String>,
    /// MIME type.
    pub content_type: Option<String>,
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Caller-supplied description.
    pub description: Option<String>,
    /// Ordering among a definition's images.
    pub display_order: i32,
}

/// Persisted per-task configuration row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskConfigRecord {
    /// Database primary key.
    pub id: i64,
    /// Owning definition key.
    pub definition_key: String,
    /// Id of the task element this row targets.
    pub task_id: String,
    /// Display name override.
    pub task_name: Option<String>,
    /// Explicit assignment channel ("user" / "group" / "entity").
    pub assignee_type: Option<String>,
    /// Target for user assignment.
    pub assignee_user: Option<String>,
    /// Target for group assignment.
    pub assignee_group: Option<String>,
    /// Target for entity assignment.
    pub assignee_entity: Option<String>,
    /// User accountable for the task outcome.
    pub responsible_user: Option<String>,
    /// User kept informed about the task.
    pub interested_user: Option<String>,
    /// Task priority.
    pub priority: Option<String>,
    /// Magnitude of the task duration.
    pub duration_value: Option<i64>,
    /// Unit of the task duration.
    pub duration_unit: Option<String>,
    /// Whether to attach an embedded form resource.
    pub add_form_resource: bool,
    /// Whether to notify the assignee on creation.
    pub notify_on_creation: bool,
    /// Whether to notify the assignee when the deadline passes.
    pub notify_on_deadline: bool,
    /// Days before the deadline at which to send a reminder.
    pub reminder_before_deadline: Option<i64>,
    /// Entry conditions as a JSON array, serialized as text.
    pub entry_conditions: String,
    /// Exit conditions as a JSON array, serialized as text.
    pub exit_conditions: String,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl TaskConfigRecord {
    /// Convert the row back into the domain configuration.
    pub fn configuration(&self) -> Result<TaskConfiguration, CoreError> {
        Ok(TaskConfiguration {
            task_id: self.task_id.clone(),
            task_name: self.task_name.clone(),
            assignee_type: match self.assignee_type.as_deref() {
                Some("user") => Some(AssigneeType::User),
                Some("group") => Some(AssigneeType::Group),
                Some("entity") => Some(AssigneeType::Entity),
                _ => None,
            },
            assignee_user: self.assignee_user.clone(),
            assignee_group: self.assignee_group.clone(),
            assignee_entity: self.assignee_entity.clone(),
            responsible_user: self.responsible_user.clone(),
            interested_user: self.interested_user.clone(),
            priority: self.priority.clone(),
            duration_value: self.duration_value,
            duration_unit: self.duration_unit.clone(),
            add_form_resource: self.add_form_resource,
            notify_on_creation: self.notify_on_creation,
            notify_on_deadline: self.notify_on_deadline,
            reminder_before_deadline: self.reminder_before_deadline,
            entry_conditions: serde_json::from_str(&self.entry_conditions)?,
            exit_conditions: serde_json::from_str(&self.exit_conditions)?,
        })
    }
}

/// Column value for a configuration's assignment channel.
pub(crate) fn assignee_type_column(config: &TaskConfiguration) -> Option<&'static str> {
    config.assignee_type.map(|t| match t {
        AssigneeType::User => "user",
        AssigneeType::Group => "group",
        AssigneeType::Entity => "entity",
    })
}

/// Lifecycle state of a persisted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Instance is running.
    Active,
    /// Instance is suspended.
    Suspended,
    /// Instance ran to completion.
    Completed,
    /// Instance was cancelled from outside the engine.
    ExternallyTerminated,
    /// Instance was terminated by the process itself.
    InternallyTerminated,
}

impl InstanceState {
    /// Database column value for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::ExternallyTerminated => "EXTERNALLY_TERMINATED",
            Self::InternallyTerminated => "INTERNALLY_TERMINATED",
        }
    }

    /// Parse a database column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "SUSPENDED" => Some(Self::Suspended),
            "COMPLETED" => Some(Self::Completed),
            "EXTERNALLY_TERMINATED" => Some(Self::ExternallyTerminated),
            "INTERNALLY_TERMINATED" => Some(Self::InternallyTerminated),
            _ => None,
        }
    }
}

/// Persisted process instance.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessInstanceRecord {
    /// Database primary key.
    pub id: i64,
    /// Engine-assigned instance id, unique across the table.
    pub instance_id: String,
    /// Key of the definition this instance runs.
    pub definition_key: String,
    /// Engine id of the definition version that was started.
    pub engine_definition_id: Option<String>,
    /// Caller-supplied business key.
    pub business_key: Option<String>,
    /// Original id of the starting principal.
    pub started_by: Option<String>,
    /// Current lifecycle state (see [`InstanceState`]).
    pub state: String,
    /// Start variables as JSON, serialized as text.
    pub variables: Option<String>,
    /// When the instance started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

/// Input for persisting a started instance.
#[derive(Debug, Clone)]
pub struct NewProcessInstance {
    /// Engine-assigned instance id.
    pub instance_id: String,
    /// Key of the definition this instance runs.
    pub definition_key: String,
    /// Engine id of the definition version that was started.
    pub engine_definition_id: Option<String>,
    /// Caller-supplied business key.
    pub business_key: Option<String>,
    /// Original id of the starting principal.
    pub started_by: Option<String>,
    /// Start variables as JSON, serialized as text.
    pub variables: Option<String>,
    /// When the instance started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Mapping between a caller-side id and an engine-compliant id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdentityMappingRecord {
    /// Database primary key.
    pub id: i64,
    /// Caller-side id, unique across the table.
    pub original_id: String,
    /// Generated engine-compliant id, unique across the table.
    pub engine_id: String,
    /// Resource type ("principal" / "group").
    pub resource_type: String,
    /// When the mapping was created.
    pub created_at: DateTime<Utc>,
}

/// Outcome of an identity mapping insert attempt.
#[derive(Debug, Clone)]
pub enum MappingInsert {
    /// The mapping was created.
    Inserted(IdentityMappingRecord),
    /// The original id was already mapped; the existing row is returned.
    ExistingOriginal(IdentityMappingRecord),
    /// The generated engine id is already taken by a different original id.
    EngineIdTaken,
}

/// Persistence interface used by the orchestration layer.
#[allow(missing_docs)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a definition, or update the existing row for its key in place
    /// (preserving the row's primary identity).
    async fn upsert_definition(
        &self,
        definition: &NewProcessDefinition,
    ) -> Result<ProcessDefinitionRecord, CoreError>;

    async fn get_definition(&self, key: &str)
    -> Result<Option<ProcessDefinitionRecord>, CoreError>;

    async fn list_definitions(&self) -> Result<Vec<ProcessDefinitionRecord>, CoreError>;

    /// Replace a definition's images wholesale (delete-then-insert).
    async fn replace_images(
        &self,
        definition_key: &str,
        images: &[NewProcessImage],
    ) -> Result<(), CoreError>;

    async fn list_images(&self, definition_key: &str)
    -> Result<Vec<ProcessImageRecord>, CoreError>;

    /// Insert a task configuration, or update the existing row matched by
    /// (definition key, task id).
    async fn upsert_task_config(
        &self,
        definition_key: &str,
        config: &TaskConfiguration,
    ) -> Result<(), CoreError>;

    async fn get_task_config(
        &self,
        definition_key: &str,
        task_id: &str,
    ) -> Result<Option<TaskConfigRecord>, CoreError>;

    async fn list_task_configs(
        &self,
        definition_key: &str,
    ) -> Result<Vec<TaskConfigRecord>, CoreError>;

    async fn insert_instance(
        &self,
        instance: &NewProcessInstance,
    ) -> Result<ProcessInstanceRecord, CoreError>;

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<ProcessInstanceRecord>, CoreError>;

    async fn update_instance_state(
        &self,
        instance_id: &str,
        state: InstanceState,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    async fn list_instances_by_state(
        &self,
        state: InstanceState,
    ) -> Result<Vec<ProcessInstanceRecord>, CoreError>;

    async fn list_instances_by_starter(
        &self,
        started_by: &str,
    ) -> Result<Vec<ProcessInstanceRecord>, CoreError>;

    /// Insert an identity mapping, distinguishing an already-mapped original
    /// id (idempotent success) from an engine-id collision (retryable).
    async fn insert_identity_mapping(
        &self,
        original_id: &str,
        engine_id: &str,
        resource_type: &str,
    ) -> Result<MappingInsert, CoreError>;

    async fn find_mapping_by_original(
        &self,
        original_id: &str,
    ) -> Result<Option<IdentityMappingRecord>, CoreError>;

    async fn find_mapping_by_engine_id(
        &self,
        engine_id: &str,
    ) -> Result<Option<IdentityMappingRecord>, CoreError>;

    async fn health_check(&self) -> Result<bool, CoreError>;
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowline Engine - Process Execution Engine Boundary
//!
//! The execution engine is an external collaborator: it runs deployed
//! process definitions, materializes work items from user tasks, and owns
//! the runtime directory of users and groups. This crate defines the
//! [`ProcessEngine`] trait our orchestration layer programs against, plus
//! two implementations:
//!
//! - [`RestEngine`]: speaks a Camunda-style HTTP API with optional basic
//!   auth, for production deployments.
//! - [`InMemoryEngine`]: a mutex-guarded in-process implementation for local
//!   development and tests, with helpers to seed work items directly.
//!
//! All engine-facing ids are engine-compliant ids produced by the identity
//! mapping layer; original caller-side ids never cross this boundary.

#![deny(missing_docs)]

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryEngine;
pub use rest::{EngineConfig, RestEngine};

/// Result type using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from the execution engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport-level failure reaching the engine.
    #[error("engine unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine rejected the request with an error status.
    #[error("engine returned {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Message extracted from the engine's error body.
        message: String,
    },

    /// The addressed engine resource does not exist.
    #[error("engine resource not found: {0}")]
    NotFound(String),

    /// The engine answered with a body we could not interpret.
    #[error("unexpected engine response: {0}")]
    UnexpectedResponse(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of deploying a definition to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDeployment {
    /// Engine-assigned definition id.
    pub engine_id: String,
    /// Definition key as seen by the engine.
    pub key: String,
    /// Definition name as seen by the engine.
    pub name: Option<String>,
    /// Engine-assigned definition version.
    pub version: i32,
    /// Id of the deployment that produced this definition.
    pub deployment_id: String,
}

/// A started process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInstance {
    /// Engine-assigned instance id.
    pub instance_id: String,
    /// Engine id of the definition this instance runs.
    pub definition_id: String,
    /// Whether the instance already ended synchronously.
    pub ended: bool,
}

/// Lifecycle state of a process instance as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineInstanceState {
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

/// Directory record for provisioning an engine user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEngineUser {
    /// Engine-compliant user id.
    pub id: String,
    /// Inferred first name.
    pub first_name: String,
    /// Inferred last name.
    pub last_name: String,
    /// Contact email, when the original id looked like one.
    pub email: Option<String>,
}

/// Directory record for provisioning an engine group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEngineGroup {
    /// Engine-compliant group id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Group classification label.
    #[serde(rename = "type")]
    pub group_type: String,
}

/// A work item materialized by the engine from a user task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineTask {
    /// Engine-assigned task id.
    pub id: String,
    /// Task display name.
    pub name: Option<String>,
    /// Engine id of the assigned user, if claimed or directly assigned.
    pub assignee: Option<String>,
    /// Id of the process instance this task belongs to.
    pub process_instance_id: String,
    /// Id of the task element in the definition.
    pub task_definition_key: Option<String>,
    /// When the task was created.
    pub created: Option<DateTime<Utc>>,
    /// When the task is due.
    pub due: Option<DateTime<Utc>>,
    /// Task priority.
    pub priority: i32,
}

/// The external process-execution engine.
///
/// Implementations must be safe to share across the orchestrator's
/// concurrent callers.
#[async_trait]
pub trait ProcessEngine: Send + Sync {
    /// Deploy a definition document and return the engine's identity for it.
    async fn deploy(
        &self,
        deployment_name: &str,
        resource_name: &str,
        xml: &str,
    ) -> Result<EngineDeployment>;

    /// Start an instance of the latest deployed version of `key`.
    async fn start_instance(
        &self,
        key: &str,
        variables: &serde_json::Value,
    ) -> Result<EngineInstance>;

    /// State of a running instance, or `None` once it left the runtime.
    async fn instance_state(&self, instance_id: &str) -> Result<Option<EngineInstanceState>>;

    /// State of an instance from engine history, or `None` if unknown.
    async fn historic_instance_state(
        &self,
        instance_id: &str,
    ) -> Result<Option<EngineInstanceState>>;

    /// Provision a directory user. Creating an id that already exists is an
    /// engine-side error; callers check [`ProcessEngine::user_exists`] first.
    async fn create_user(&self, user: &NewEngineUser) -> Result<()>;

    /// Whether a directory user exists.
    async fn user_exists(&self, id: &str) -> Result<bool>;

    /// Provision a directory group.
    async fn create_group(&self, group: &NewEngineGroup) -> Result<()>;

    /// Whether a directory group exists.
    async fn group_exists(&self, id: &str) -> Result<bool>;

    /// Add a user to a group.
    async fn create_membership(&self, group_id: &str, user_id: &str) -> Result<()>;

    /// Whether a user is a member of a group.
    async fn membership_exists(&self, group_id: &str, user_id: &str) -> Result<bool>;

    /// Ids of the groups a user belongs to.
    async fn groups_of_user(&self, user_id: &str) -> Result<Vec<String>>;

    /// Open tasks directly assigned to a user.
    async fn tasks_assigned_to(&self, user_id: &str) -> Result<Vec<EngineTask>>;

    /// Open tasks where the user is an individual candidate.
    async fn tasks_with_candidate_user(&self, user_id: &str) -> Result<Vec<EngineTask>>;

    /// Open tasks where any of the given groups is a candidate.
    async fn tasks_with_candidate_groups(&self, group_ids: &[String]) -> Result<Vec<EngineTask>>;

    /// Open tasks belonging to a process instance.
    async fn tasks_in_instance(&self, instance_id: &str) -> Result<Vec<EngineTask>>;

    /// Claim a task for a user.
    async fn claim_task(&self, task_id: &str, user_id: &str) -> Result<()>;

    /// Complete a task, submitting its variables.
    async fn complete_task(&self, task_id: &str, variables: &serde_json::Value) -> Result<()>;
}

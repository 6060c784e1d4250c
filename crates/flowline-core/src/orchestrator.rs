// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment and runtime orchestration.
//!
//! The orchestrator ties the pipeline together: it transforms incoming
//! documents with their task configurations, synchronizes the identities
//! they reference, deploys to the engine, records the result, and serves
//! work-item and instance queries on top of engine state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use flowline_bpmn::{TaskConfiguration, Transformer, process_key, process_name};
use flowline_engine::{EngineError, EngineInstanceState, EngineTask, ProcessEngine};

use crate::error::CoreError;
use crate::identity::IdentityService;
use crate::notify::Notifier;
use crate::store::{
    InstanceState, NewProcessDefinition, NewProcessImage, NewProcessInstance,
    ProcessDefinitionRecord, ProcessInstanceRecord, Store,
};

// ============================================================================
// Request and response types
// ============================================================================

/// Caller-supplied presentation metadata for a deployment.
#[derive(Debug, Clone, Default)]
pub struct ProcessMetadata {
    /// Display name override. Falls back to the document's own name.
    pub process_name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Classification tags.
    pub tags: Vec<String>,
    /// Diagram images to attach, replacing any previous set.
    pub images: Vec<NewProcessImage>,
}

/// A deployment request: the document, its task configurations, and
/// optional presentation metadata.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// The source document.
    pub xml: String,
    /// Per-task configurations applied during transformation.
    pub configurations: Vec<TaskConfiguration>,
    /// Presentation metadata. When absent, the previous deployment's
    /// metadata is carried forward.
    pub metadata: Option<ProcessMetadata>,
    /// Original id of the deploying principal.
    pub deployed_by: Option<String>,
    /// Whether to push the transformed document to the engine. When false
    /// the definition is only recorded locally (draft deployment).
    pub deploy_to_engine: bool,
}

/// A task pending human action, as served to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Engine task id.
    pub id: String,
    /// Task display name.
    pub name: Option<String>,
    /// Engine id of the current assignee, if claimed.
    pub assignee: Option<String>,
    /// Engine id of the owning instance.
    pub instance_id: String,
    /// Id of the task element in the definition.
    pub task_definition_key: Option<String>,
    /// When the task was created.
    pub created: Option<DateTime<Utc>>,
    /// Task deadline.
    pub due: Option<DateTime<Utc>>,
    /// Task priority.
    pub priority: i32,
}

impl From<EngineTask> for WorkItem {
    fn from(task: EngineTask) -> Self {
        Self {
            id: task.id,
            name: task.name,
            assignee: task.assignee,
            instance_id: task.process_instance_id,
            task_definition_key: task.task_definition_key,
            created: task.created,
            due: task.due,
            priority: task.priority,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates transformation, identity synchronization, engine deployment
/// and the local record of definitions and instances.
pub struct Orchestrator<S, E, N> {
    store: Arc<S>,
    engine: Arc<E>,
    identity: IdentityService<S, E>,
    notifier: N,
    history_ttl_days: u32,
}

impl<S: Store, E: ProcessEngine, N: Notifier> Orchestrator<S, E, N> {
    /// Create an orchestrator over the given store, engine and notifier.
    pub fn new(store: Arc<S>, engine: Arc<E>, notifier: N, history_ttl_days: u32) -> Self {
        let identity = IdentityService::new(Arc::clone(&store), Arc::clone(&engine));
        Self {
            store,
            engine,
            identity,
            notifier,
            history_ttl_days,
        }
    }

    /// The identity service backing this orchestrator.
    pub fn identity(&self) -> &IdentityService<S, E> {
        &self.identity
    }

    // ------------------------------------------------------------------
    // Deployment
    // ------------------------------------------------------------------

    /// Transform and deploy a process definition.
    ///
    /// Identities referenced by the task configurations are synchronized
    /// before transformation so the transformer can resolve them with
    /// plain lookups. A configuration naming an identity that still cannot
    /// be resolved fails the deployment.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
    ) -> Result<ProcessDefinitionRecord, CoreError> {
        let key = process_key(&request.xml)?;
        info!(definition_key = %key, "deploying process definition");

        if let Some(deployer) = &request.deployed_by {
            self.identity.ensure_principal(deployer).await?;
        }

        let (principals, groups) = referenced_identities(&request.configurations);
        self.identity
            .synchronize(&principals, &groups, &HashMap::new())
            .await?;
        let resolved = self.identity.prefetch(&principals, &groups).await?;

        let transformer = Transformer::new(&resolved, self.history_ttl_days);
        let transformed = transformer.transform(&request.xml, &request.configurations)?;

        let existing = self.store.get_definition(&key).await?;
        let name = request
            .metadata
            .as_ref()
            .and_then(|m| m.process_name.clone())
            .or_else(|| process_name(&request.xml).ok());

        let (engine_definition_id, deployment_id, version) = if request.deploy_to_engine {
            let deployment = self
                .engine
                .deploy(
                    name.as_deref().unwrap_or(&key),
                    &format!("{key}.bpmn"),
                    &transformed,
                )
                .await?;
            (
                Some(deployment.engine_id),
                Some(deployment.deployment_id),
                deployment.version,
            )
        } else {
            let version = existing.as_ref().map(|d| d.version + 1).unwrap_or(1);
            (None, None, version)
        };

        let (description, tags) = match &request.metadata {
            Some(metadata) => (
                metadata.description.clone(),
                Some(serde_json::to_string(&metadata.tags)?),
            ),
            None => (
                existing.as_ref().and_then(|d| d.description.clone()),
                existing.as_ref().and_then(|d| d.tags.clone()),
            ),
        };

        let record = self
            .store
            .upsert_definition(&NewProcessDefinition {
                definition_key: key.clone(),
                engine_definition_id,
                deployment_id,
                version,
                name,
                description,
                tags,
                xml: transformed,
                deployed_by: request.deployed_by.clone(),
                active: true,
            })
            .await?;

        if let Some(metadata) = &request.metadata {
            self.store.replace_images(&key, &metadata.images).await?;
        }
        for config in &request.configurations {
            self.store.upsert_task_config(&key, config).await?;
        }

        info!(definition_key = %key, version = record.version, "definition deployed");
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Start an instance of a deployed definition.
    ///
    /// Start variables are scanned for identity references, which are
    /// synchronized before the instance starts so the engine can route the
    /// first wave of tasks.
    pub async fn start_process(
        &self,
        definition_key: &str,
        variables: Value,
        started_by: Option<&str>,
    ) -> Result<ProcessInstanceRecord, CoreError> {
        let definition = self
            .store
            .get_definition(definition_key)
            .await?
            .ok_or_else(|| CoreError::DefinitionNotFound {
                key: definition_key.to_string(),
            })?;
        if !definition.active {
            return Err(CoreError::ValidationError {
                field: "definition_key".to_string(),
                message: format!("definition '{definition_key}' is inactive"),
            });
        }

        if let Some(starter) = started_by {
            self.identity.ensure_principal(starter).await?;
        }
        let (principals, groups, memberships) = scan_variables(&variables);
        self.identity
            .synchronize(&principals, &groups, &memberships)
            .await?;

        let instance = self.engine.start_instance(definition_key, &variables).await?;
        let record = self
            .store
            .insert_instance(&NewProcessInstance {
                instance_id: instance.instance_id.clone(),
                definition_key: definition_key.to_string(),
                engine_definition_id: Some(instance.definition_id),
                business_key: None,
                started_by: started_by.map(str::to_string),
                variables: Some(serde_json::to_string(&variables)?),
                started_at: Some(Utc::now()),
            })
            .await?;
        info!(
            definition_key,
            instance_id = %record.instance_id,
            "process instance started"
        );

        self.notify_instance_tasks(&record.instance_id).await;
        Ok(record)
    }

    /// Locally known instances still in the running state, reconciled
    /// against the engine before being served.
    pub async fn active_instances(&self) -> Result<Vec<ProcessInstanceRecord>, CoreError> {
        let mut records = self.store.list_instances_by_state(InstanceState::Active).await?;
        for record in &mut records {
            self.reconcile_instance(record).await;
        }
        records.retain(|r| r.state == InstanceState::Active.as_str());
        Ok(records)
    }

    /// Instances started by a principal, with running ones reconciled
    /// against the engine.
    pub async fn instances_for_user(
        &self,
        principal: &str,
    ) -> Result<Vec<ProcessInstanceRecord>, CoreError> {
        let mut records = self.store.list_instances_by_starter(principal).await?;
        for record in &mut records {
            if record.state == InstanceState::Active.as_str() {
                self.reconcile_instance(record).await;
            }
        }
        Ok(records)
    }

    /// Refresh a locally-active instance from the engine. Engine failures
    /// are tolerated; the local state is served as-is.
    async fn reconcile_instance(&self, record: &mut ProcessInstanceRecord) {
        let state = match self.engine.instance_state(&record.instance_id).await {
            Ok(Some(state)) => Some(state),
            // Gone from the runtime: consult history for the terminal state.
            Ok(None) => match self.engine.historic_instance_state(&record.instance_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(instance_id = %record.instance_id, error = %e, "history lookup failed");
                    None
                }
            },
            Err(e) => {
                warn!(instance_id = %record.instance_id, error = %e, "instance state lookup failed");
                None
            }
        };
        let Some(state) = state else { return };
        let mapped = map_engine_state(state);
        if record.state == mapped.as_str() {
            return;
        }
        let ended_at = match mapped {
            InstanceState::Active | InstanceState::Suspended => None,
            _ => Some(Utc::now()),
        };
        if let Err(e) = self
            .store
            .update_instance_state(&record.instance_id, mapped, ended_at)
            .await
        {
            warn!(instance_id = %record.instance_id, error = %e, "instance state update failed");
            return;
        }
        record.state = mapped.as_str().to_string();
        record.ended_at = ended_at;
    }

    // ------------------------------------------------------------------
    // Work items
    // ------------------------------------------------------------------

    /// Work items visible to a principal: tasks assigned to them, tasks
    /// where they are a candidate, and tasks offered to any group they
    /// belong to. An unmapped principal sees an empty list.
    pub async fn work_items_for(&self, principal: &str) -> Result<Vec<WorkItem>, CoreError> {
        let Some(engine_id) = self.identity.resolve(principal, false).await? else {
            debug!(principal, "no identity mapping, serving empty work list");
            return Ok(Vec::new());
        };

        let mut tasks = self.engine.tasks_assigned_to(&engine_id).await?;
        tasks.extend(self.engine.tasks_with_candidate_user(&engine_id).await?);
        let groups = self.engine.groups_of_user(&engine_id).await?;
        tasks.extend(self.engine.tasks_with_candidate_groups(&groups).await?);

        Ok(dedup_tasks(tasks))
    }

    /// Work items offered to any of the given groups. Unmapped groups are
    /// skipped.
    pub async fn work_items_for_groups(
        &self,
        groups: &[String],
    ) -> Result<Vec<WorkItem>, CoreError> {
        let mut engine_ids = Vec::new();
        for group in groups {
            match self.identity.resolve(group, false).await? {
                Some(engine_id) => engine_ids.push(engine_id),
                None => warn!(group, "no identity mapping for group, skipping"),
            }
        }
        let tasks = self.engine.tasks_with_candidate_groups(&engine_ids).await?;
        Ok(dedup_tasks(tasks))
    }

    /// Claim and complete a work item on behalf of a principal.
    ///
    /// The claim-and-complete pair is the durable part of this operation;
    /// follow-up notifications are best-effort and never fail it.
    pub async fn complete_work_item(
        &self,
        task_id: &str,
        variables: Value,
        principal: &str,
    ) -> Result<(), CoreError> {
        let engine_id = self.identity.ensure_principal(principal).await?.ok_or_else(|| {
            CoreError::ValidationError {
                field: "principal".to_string(),
                message: "principal must not be blank".to_string(),
            }
        })?;

        match self.engine.claim_task(task_id, &engine_id).await {
            Err(EngineError::NotFound(_)) => {
                return Err(CoreError::WorkItemNotFound {
                    task_id: task_id.to_string(),
                });
            }
            other => other?,
        }

        // The claim just succeeded, so the task shows up in the assignee's
        // list; remember its instance for follow-up notifications.
        let instance_id = match self.engine.tasks_assigned_to(&engine_id).await {
            Ok(tasks) => tasks
                .into_iter()
                .find(|t| t.id == task_id)
                .map(|t| t.process_instance_id),
            Err(e) => {
                warn!(task_id, error = %e, "assigned-task lookup failed");
                None
            }
        };

        match self.engine.complete_task(task_id, &variables).await {
            Err(EngineError::NotFound(_)) => {
                return Err(CoreError::WorkItemNotFound {
                    task_id: task_id.to_string(),
                });
            }
            other => other?,
        }
        info!(task_id, principal, "work item completed");

        if let Err(e) = self.notifier.work_item_completed(task_id, principal).await {
            warn!(task_id, error = %e, "completion notification failed");
        }
        if let Some(instance_id) = instance_id {
            self.notify_instance_tasks(&instance_id).await;
        }
        Ok(())
    }

    /// The stored configuration for a task, if one was deployed.
    pub async fn task_configuration(
        &self,
        definition_key: &str,
        task_id: &str,
    ) -> Result<Option<TaskConfiguration>, CoreError> {
        self.store
            .get_task_config(definition_key, task_id)
            .await?
            .map(|record| record.configuration())
            .transpose()
    }

    /// Notify about every open task of an instance. Best-effort: lookup
    /// and delivery failures are logged and swallowed.
    async fn notify_instance_tasks(&self, instance_id: &str) {
        let tasks = match self.engine.tasks_in_instance(instance_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(instance_id, error = %e, "instance task lookup failed");
                return;
            }
        };
        for task in tasks {
            let item = WorkItem::from(task);
            if let Err(e) = self.notifier.work_item_assigned(&item).await {
                warn!(task_id = %item.id, error = %e, "assignment notification failed");
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Principals and groups referenced by a set of task configurations,
/// deduplicated in first-seen order.
fn referenced_identities(configs: &[TaskConfiguration]) -> (Vec<String>, Vec<String>) {
    let mut principals = Vec::new();
    let mut groups = Vec::new();
    for config in configs {
        for value in [
            &config.assignee_user,
            &config.responsible_user,
            &config.interested_user,
        ] {
            push_unique(&mut principals, value.as_deref());
        }
        for value in [&config.assignee_group, &config.assignee_entity] {
            push_unique(&mut groups, value.as_deref());
        }
    }
    (principals, groups)
}

/// Scan start variables for identity references.
///
/// Classification is by key name, membership maps first so a key like
/// `user_groups` is not also counted as a principal reference:
/// - membership maps: key contains `user_group` or `membership`, value is
///   an object of principal to group (or list of groups)
/// - principals: key contains `user`, `assignee`, `utilisateur` or `assigné`
/// - groups: key contains `group` or `entit`
fn scan_variables(
    variables: &Value,
) -> (Vec<String>, Vec<String>, HashMap<String, Vec<String>>) {
    let mut principals = Vec::new();
    let mut groups = Vec::new();
    let mut memberships: HashMap<String, Vec<String>> = HashMap::new();

    let Some(object) = variables.as_object() else {
        return (principals, groups, memberships);
    };
    for (key, value) in object {
        let key = key.to_lowercase();
        if key.contains("user_group") || key.contains("membership") {
            let Some(map) = value.as_object() else { continue };
            for (principal, member_of) in map {
                let entry = memberships.entry(principal.clone()).or_default();
                match member_of {
                    Value::String(group) => entry.push(group.clone()),
                    Value::Array(list) => {
                        entry.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
                    }
                    _ => {}
                }
            }
        } else if key.contains("user")
            || key.contains("assignee")
            || key.contains("utilisateur")
            || key.contains("assigné")
        {
            collect_strings(value, &mut principals);
        } else if key.contains("group") || key.contains("entit") {
            collect_strings(value, &mut groups);
        }
    }
    (principals, groups, memberships)
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => push_unique(out, Some(s)),
        Value::Array(list) => {
            for item in list {
                push_unique(out, item.as_str());
            }
        }
        _ => {}
    }
}

fn push_unique(out: &mut Vec<String>, value: Option<&str>) {
    let Some(value) = value else { return };
    let value = value.trim();
    if value.is_empty() || out.iter().any(|v| v == value) {
        return;
    }
    out.push(value.to_string());
}

fn dedup_tasks(tasks: Vec<EngineTask>) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .map(WorkItem::from)
        .collect()
}

fn map_engine_state(state: EngineInstanceState) -> InstanceState {
    match state {
        EngineInstanceState::Active => InstanceState::Active,
        EngineInstanceState::Suspended => InstanceState::Suspended,
        EngineInstanceState::Completed => InstanceState::Completed,
        EngineInstanceState::ExternallyTerminated => InstanceState::ExternallyTerminated,
        EngineInstanceState::InternallyTerminated => InstanceState::InternallyTerminated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_classifies_principal_and_group_keys() {
        let (principals, groups, memberships) = scan_variables(&json!({
            "approval_user": "alice@example.com",
            "reviewers_users": ["bob@example.com", "carol@example.com"],
            "finance_group": "finance",
            "legal_entity": "legal-dept",
            "amount": 1200
        }));
        assert_eq!(
            principals,
            vec!["alice@example.com", "bob@example.com", "carol@example.com"]
        );
        assert_eq!(groups, vec!["finance", "legal-dept"]);
        assert!(memberships.is_empty());
    }

    #[test]
    fn scan_membership_maps_take_precedence_over_principal_match() {
        let (principals, groups, memberships) = scan_variables(&json!({
            "user_groups": {
                "alice@example.com": "finance",
                "bob@example.com": ["finance", "legal"]
            }
        }));
        assert!(principals.is_empty());
        assert!(groups.is_empty());
        assert_eq!(memberships["alice@example.com"], vec!["finance"]);
        assert_eq!(memberships["bob@example.com"], vec!["finance", "legal"]);
    }

    #[test]
    fn scan_ignores_non_object_variables() {
        let (principals, groups, memberships) = scan_variables(&json!([1, 2, 3]));
        assert!(principals.is_empty());
        assert!(groups.is_empty());
        assert!(memberships.is_empty());
    }

    #[test]
    fn referenced_identities_deduplicates_in_order() {
        let mut a = TaskConfiguration::default();
        a.task_id = "T1".into();
        a.assignee_user = Some("alice@example.com".into());
        a.responsible_user = Some("bob@example.com".into());
        a.assignee_group = Some("finance".into());
        let mut b = TaskConfiguration::default();
        b.task_id = "T2".into();
        b.assignee_user = Some("alice@example.com".into());
        b.assignee_entity = Some("finance".into());

        let (principals, groups) = referenced_identities(&[a, b]);
        assert_eq!(principals, vec!["alice@example.com", "bob@example.com"]);
        assert_eq!(groups, vec!["finance"]);
    }

    #[test]
    fn work_item_carries_engine_task_fields() {
        let item = WorkItem::from(EngineTask {
            id: "task-1".into(),
            name: Some("Approve order".into()),
            assignee: Some("user1a2b3c4d".into()),
            process_instance_id: "inst-9".into(),
            task_definition_key: Some("Task_Approve".into()),
            created: None,
            due: None,
            priority: 50,
        });
        assert_eq!(item.id, "task-1");
        assert_eq!(item.instance_id, "inst-9");
        assert_eq!(item.priority, 50);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process engine for local development and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    EngineDeployment, EngineError, EngineInstance, EngineInstanceState, EngineTask, NewEngineGroup,
    NewEngineUser, ProcessEngine, Result,
};

/// A [`ProcessEngine`] holding all state in memory behind a mutex.
///
/// Deployment versions increment per definition key, instances start ACTIVE,
/// and work items are either created through [`InMemoryEngine::seed_task`] or
/// claimed/completed through the trait. Completed instances move from the
/// runtime view into history, mirroring how the real engine answers runtime
/// versus historic queries.
#[derive(Default)]
pub struct InMemoryEngine {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    versions: HashMap<String, i32>,
    instances: HashMap<String, InstanceSlot>,
    history: HashMap<String, EngineInstanceState>,
    users: HashMap<String, NewEngineUser>,
    groups: HashMap<String, NewEngineGroup>,
    memberships: Vec<(String, String)>,
    tasks: HashMap<String, TaskSlot>,
}

struct InstanceSlot {
    definition_id: String,
    state: EngineInstanceState,
}

struct TaskSlot {
    task: EngineTask,
    candidate_users: Vec<String>,
    candidate_groups: Vec<String>,
    completed: bool,
}

impl InMemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a work item directly, bypassing definition execution.
    pub fn seed_task(
        &self,
        task: EngineTask,
        candidate_users: Vec<String>,
        candidate_groups: Vec<String>,
    ) {
        let mut state = self.lock();
        state.tasks.insert(
            task.id.clone(),
            TaskSlot {
                task,
                candidate_users,
                candidate_groups,
                completed: false,
            },
        );
    }

    /// Move an instance out of the runtime view and record its final state
    /// in history.
    pub fn finish_instance(&self, instance_id: &str, state: EngineInstanceState) {
        let mut guard = self.lock();
        guard.instances.remove(instance_id);
        guard.history.insert(instance_id.to_string(), state);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_tasks<'a>(state: &'a State) -> impl Iterator<Item = &'a TaskSlot> {
        state.tasks.values().filter(|slot| !slot.completed)
    }

    fn sorted(mut tasks: Vec<EngineTask>) -> Vec<EngineTask> {
        // HashMap iteration order is arbitrary; callers get a stable view.
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }
}

#[async_trait]
impl ProcessEngine for InMemoryEngine {
    async fn deploy(
        &self,
        deployment_name: &str,
        resource_name: &str,
        _xml: &str,
    ) -> Result<EngineDeployment> {
        let mut state = self.lock();
        // The key comes from the deployed resource, not the deployment label.
        let key = resource_name
            .strip_suffix(".bpmn")
            .unwrap_or(deployment_name)
            .to_string();
        let version = state
            .versions
            .entry(key.clone())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        Ok(EngineDeployment {
            engine_id: format!("{key}:{version}:{}", Uuid::new_v4().simple()),
            key,
            name: None,
            version: *version,
            deployment_id: Uuid::new_v4().to_string(),
        })
    }

    async fn start_instance(
        &self,
        key: &str,
        _variables: &serde_json::Value,
    ) -> Result<EngineInstance> {
        let mut state = self.lock();
        let version = *state
            .versions
            .get(key)
            .ok_or_else(|| EngineError::NotFound(format!("process definition {key}")))?;
        let instance_id = Uuid::new_v4().to_string();
        let definition_id = format!("{key}:{version}");
        state.instances.insert(
            instance_id.clone(),
            InstanceSlot {
                definition_id: definition_id.clone(),
                state: EngineInstanceState::Active,
            },
        );
        Ok(EngineInstance {
            instance_id,
            definition_id,
            ended: false,
        })
    }

    async fn instance_state(&self, instance_id: &str) -> Result<Option<EngineInstanceState>> {
        Ok(self.lock().instances.get(instance_id).map(|slot| slot.state))
    }

    async fn historic_instance_state(
        &self,
        instance_id: &str,
    ) -> Result<Option<EngineInstanceState>> {
        let state = self.lock();
        Ok(state
            .instances
            .get(instance_id)
            .map(|slot| slot.state)
            .or_else(|| state.history.get(instance_id).copied()))
    }

    async fn create_user(&self, user: &NewEngineUser) -> Result<()> {
        self.lock().users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn user_exists(&self, id: &str) -> Result<bool> {
        Ok(self.lock().users.contains_key(id))
    }

    async fn create_group(&self, group: &NewEngineGroup) -> Result<()> {
        self.lock().groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn group_exists(&self, id: &str) -> Result<bool> {
        Ok(self.lock().groups.contains_key(id))
    }

    async fn create_membership(&self, group_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.lock();
        let pair = (group_id.to_string(), user_id.to_string());
        if !state.memberships.contains(&pair) {
            state.memberships.push(pair);
        }
        Ok(())
    }

    async fn membership_exists(&self, group_id: &str, user_id: &str) -> Result<bool> {
        Ok(self
            .lock()
            .memberships
            .contains(&(group_id.to_string(), user_id.to_string())))
    }

    async fn groups_of_user(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .memberships
            .iter()
            .filter(|(_, member)| member == user_id)
            .map(|(group, _)| group.clone())
            .collect())
    }

    async fn tasks_assigned_to(&self, user_id: &str) -> Result<Vec<EngineTask>> {
        let state = self.lock();
        Ok(Self::sorted(
            Self::open_tasks(&state)
                .filter(|slot| slot.task.assignee.as_deref() == Some(user_id))
                .map(|slot| slot.task.clone())
                .collect(),
        ))
    }

    async fn tasks_with_candidate_user(&self, user_id: &str) -> Result<Vec<EngineTask>> {
        let state = self.lock();
        Ok(Self::sorted(
            Self::open_tasks(&state)
                .filter(|slot| slot.candidate_users.iter().any(|u| u == user_id))
                .map(|slot| slot.task.clone())
                .collect(),
        ))
    }

    async fn tasks_with_candidate_groups(&self, group_ids: &[String]) -> Result<Vec<EngineTask>> {
        let state = self.lock();
        Ok(Self::sorted(
            Self::open_tasks(&state)
                .filter(|slot| {
                    slot.candidate_groups
                        .iter()
                        .any(|g| group_ids.contains(g))
                })
                .map(|slot| slot.task.clone())
                .collect(),
        ))
    }

    async fn tasks_in_instance(&self, instance_id: &str) -> Result<Vec<EngineTask>> {
        let state = self.lock();
        Ok(Self::sorted(
            Self::open_tasks(&state)
                .filter(|slot| slot.task.process_instance_id == instance_id)
                .map(|slot| slot.task.clone())
                .collect(),
        ))
    }

    async fn claim_task(&self, task_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.lock();
        let slot = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(format!("task {task_id}")))?;
        slot.task.assignee = Some(user_id.to_string());
        Ok(())
    }

    async fn complete_task(&self, task_id: &str, _variables: &serde_json::Value) -> Result<()> {
        let mut state = self.lock();
        let slot = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(format!("task {task_id}")))?;
        slot.completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, instance: &str, assignee: Option<&str>) -> EngineTask {
        EngineTask {
            id: id.to_string(),
            name: Some(format!("Task {id}")),
            assignee: assignee.map(str::to_string),
            process_instance_id: instance.to_string(),
            task_definition_key: Some(format!("Def_{id}")),
            created: None,
            due: None,
            priority: 50,
        }
    }

    #[tokio::test]
    async fn redeployment_increments_version() {
        let engine = InMemoryEngine::new();
        let first = engine.deploy("orders", "orders.bpmn", "<x/>").await.unwrap();
        let second = engine.deploy("orders", "orders.bpmn", "<x/>").await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_ne!(first.engine_id, second.engine_id);
    }

    #[tokio::test]
    async fn starting_unknown_definition_fails() {
        let engine = InMemoryEngine::new();
        let err = engine
            .start_instance("ghost", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn finished_instance_leaves_runtime_but_stays_in_history() {
        let engine = InMemoryEngine::new();
        engine.deploy("orders", "orders.bpmn", "<x/>").await.unwrap();
        let instance = engine
            .start_instance("orders", &serde_json::json!({}))
            .await
            .unwrap();
        let id = &instance.instance_id;

        assert_eq!(
            engine.instance_state(id).await.unwrap(),
            Some(EngineInstanceState::Active)
        );
        engine.finish_instance(id, EngineInstanceState::Completed);
        assert_eq!(engine.instance_state(id).await.unwrap(), None);
        assert_eq!(
            engine.historic_instance_state(id).await.unwrap(),
            Some(EngineInstanceState::Completed)
        );
    }

    #[tokio::test]
    async fn task_filters_cover_assignment_and_candidacy() {
        let engine = InMemoryEngine::new();
        engine.seed_task(task("t1", "inst-1", Some("user1")), vec![], vec![]);
        engine.seed_task(
            task("t2", "inst-1", None),
            vec!["user1".to_string()],
            vec![],
        );
        engine.seed_task(
            task("t3", "inst-2", None),
            vec![],
            vec!["group1".to_string()],
        );

        let assigned = engine.tasks_assigned_to("user1").await.unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].id, "t1");

        let candidate = engine.tasks_with_candidate_user("user1").await.unwrap();
        assert_eq!(candidate[0].id, "t2");

        let by_group = engine
            .tasks_with_candidate_groups(&["group1".to_string(), "other".to_string()])
            .await
            .unwrap();
        assert_eq!(by_group[0].id, "t3");

        let in_instance = engine.tasks_in_instance("inst-1").await.unwrap();
        assert_eq!(in_instance.len(), 2);
    }

    #[tokio::test]
    async fn completed_tasks_disappear_from_queries() {
        let engine = InMemoryEngine::new();
        engine.seed_task(task("t1", "inst-1", None), vec![], vec![]);
        engine.claim_task("t1", "user1").await.unwrap();
        let assigned = engine.tasks_assigned_to("user1").await.unwrap();
        assert_eq!(assigned.len(), 1);

        engine
            .complete_task("t1", &serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert!(engine.tasks_assigned_to("user1").await.unwrap().is_empty());
        assert!(matches!(
            engine.claim_task("missing", "user1").await.unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn membership_round_trip() {
        let engine = InMemoryEngine::new();
        engine
            .create_group(&NewEngineGroup {
                id: "group1".to_string(),
                name: "Finance".to_string(),
                group_type: "WORKFLOW".to_string(),
            })
            .await
            .unwrap();
        engine.create_membership("group1", "user1").await.unwrap();
        engine.create_membership("group1", "user1").await.unwrap();

        assert!(engine.membership_exists("group1", "user1").await.unwrap());
        assert_eq!(engine.groups_of_user("user1").await.unwrap(), vec!["group1"]);
    }
}

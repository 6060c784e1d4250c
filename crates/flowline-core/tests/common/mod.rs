// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for flowline-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use flowline_bpmn::TaskConfiguration;
use flowline_core::notify::Notifier;
use flowline_core::orchestrator::{DeployRequest, Orchestrator};
use flowline_core::store::SqliteStore;
use flowline_core::LogNotifier;
use flowline_engine::{EngineTask, InMemoryEngine};

/// A fresh SQLite store on a temp file plus an in-memory engine.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub engine: Arc<InMemoryEngine>,
    _dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::from_path(dir.path().join("flowline.db"))
            .await
            .expect("create sqlite store");
        Self {
            store: Arc::new(store),
            engine: Arc::new(InMemoryEngine::new()),
            _dir: dir,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator<SqliteStore, InMemoryEngine, LogNotifier> {
        self.orchestrator_with(LogNotifier)
    }

    pub fn orchestrator_with<N: Notifier>(
        &self,
        notifier: N,
    ) -> Orchestrator<SqliteStore, InMemoryEngine, N> {
        Orchestrator::new(Arc::clone(&self.store), Arc::clone(&self.engine), notifier, 30)
    }
}

/// A minimal two-task process with an approval task eligible for promotion.
pub fn order_process_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"
                  id="Definitions_1"
                  targetNamespace="http://example.com/orders">
  <bpmn:process id="ORDER_PROCESS" name="Order Handling" isExecutable="false">
    <bpmn:startEvent id="Start_1">
      <bpmn:outgoing>Flow_1</bpmn:outgoing>
    </bpmn:startEvent>
    <bpmn:task id="Task_Approve" name="Approve order">
      <bpmn:incoming>Flow_1</bpmn:incoming>
      <bpmn:outgoing>Flow_2</bpmn:outgoing>
    </bpmn:task>
    <bpmn:endEvent id="End_1">
      <bpmn:incoming>Flow_2</bpmn:incoming>
    </bpmn:endEvent>
    <bpmn:sequenceFlow id="Flow_1" sourceRef="Start_1" targetRef="Task_Approve"/>
    <bpmn:sequenceFlow id="Flow_2" sourceRef="Task_Approve" targetRef="End_1"/>
  </bpmn:process>
</bpmn:definitions>
"#
    .to_string()
}

pub fn user_config(task_id: &str, user: &str) -> TaskConfiguration {
    let mut config = TaskConfiguration::default();
    config.task_id = task_id.to_string();
    config.assignee_user = Some(user.to_string());
    config
}

pub fn deploy_request(configs: Vec<TaskConfiguration>) -> DeployRequest {
    DeployRequest {
        xml: order_process_xml(),
        configurations: configs,
        metadata: None,
        deployed_by: Some("deployer@example.com".to_string()),
        deploy_to_engine: true,
    }
}

pub fn engine_task(id: &str, instance: &str, assignee: Option<&str>) -> EngineTask {
    EngineTask {
        id: id.to_string(),
        name: Some(format!("Task {id}")),
        assignee: assignee.map(str::to_string),
        process_instance_id: instance.to_string(),
        task_definition_key: None,
        created: None,
        due: None,
        priority: 50,
    }
}

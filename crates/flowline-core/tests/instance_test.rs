// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for instance start and state reconciliation.

mod common;

use common::*;
use flowline_core::error::CoreError;
use flowline_core::store::{NewProcessDefinition, Store};
use flowline_engine::{EngineInstanceState, ProcessEngine};
use serde_json::json;

#[tokio::test]
async fn starting_unknown_definition_fails() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    let err = orchestrator
        .start_process("GHOST", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DefinitionNotFound { .. }));
}

#[tokio::test]
async fn starting_inactive_definition_is_rejected() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    ctx.store
        .upsert_definition(&NewProcessDefinition {
            definition_key: "RETIRED".to_string(),
            engine_definition_id: None,
            deployment_id: None,
            version: 3,
            name: None,
            description: None,
            tags: None,
            xml: "<definitions/>".to_string(),
            deployed_by: None,
            active: false,
        })
        .await
        .unwrap();

    let err = orchestrator
        .start_process("RETIRED", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError { .. }));
}

#[tokio::test]
async fn start_synchronizes_identities_from_variables() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();
    orchestrator.deploy(&deploy_request(vec![])).await.unwrap();

    let record = orchestrator
        .start_process(
            "ORDER_PROCESS",
            json!({
                "approver_user": "bob@example.com",
                "finance_group": "finance",
                "user_groups": {"carol@example.com": ["finance"]},
                "amount": 1200
            }),
            Some("alice@example.com"),
        )
        .await
        .unwrap();

    assert_eq!(record.definition_key, "ORDER_PROCESS");
    assert_eq!(record.state, "ACTIVE");
    assert_eq!(record.started_by.as_deref(), Some("alice@example.com"));

    let identity = orchestrator.identity();
    let carol = identity
        .resolve("carol@example.com", false)
        .await
        .unwrap()
        .expect("membership map principal mapped");
    let finance = identity
        .resolve("finance", false)
        .await
        .unwrap()
        .expect("group mapped");
    assert!(identity
        .resolve("bob@example.com", false)
        .await
        .unwrap()
        .is_some());
    assert!(ctx.engine.membership_exists(&finance, &carol).await.unwrap());
}

#[tokio::test]
async fn finished_instances_are_reconciled_from_history() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();
    orchestrator.deploy(&deploy_request(vec![])).await.unwrap();

    let record = orchestrator
        .start_process("ORDER_PROCESS", json!({}), Some("alice@example.com"))
        .await
        .unwrap();
    assert_eq!(orchestrator.active_instances().await.unwrap().len(), 1);

    // The engine finishes the instance; it leaves the runtime view and only
    // history still knows its terminal state.
    ctx.engine
        .finish_instance(&record.instance_id, EngineInstanceState::Completed);

    assert!(orchestrator.active_instances().await.unwrap().is_empty());
    let stored = ctx
        .store
        .get_instance(&record.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, "COMPLETED");
    assert!(stored.ended_at.is_some());
}

#[tokio::test]
async fn instances_for_user_serve_reconciled_state() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();
    orchestrator.deploy(&deploy_request(vec![])).await.unwrap();

    let first = orchestrator
        .start_process("ORDER_PROCESS", json!({}), Some("alice@example.com"))
        .await
        .unwrap();
    orchestrator
        .start_process("ORDER_PROCESS", json!({}), Some("bob@example.com"))
        .await
        .unwrap();
    ctx.engine
        .finish_instance(&first.instance_id, EngineInstanceState::InternallyTerminated);

    let instances = orchestrator
        .instances_for_user("alice@example.com")
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].state, "INTERNALLY_TERMINATED");
}

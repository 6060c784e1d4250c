// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for work-item queries and completion.

mod common;

use async_trait::async_trait;
use common::*;
use flowline_core::error::CoreError;
use flowline_core::notify::Notifier;
use flowline_core::orchestrator::WorkItem;
use flowline_engine::ProcessEngine;
use serde_json::json;

/// Notifier whose deliveries always fail.
struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn work_item_assigned(&self, _item: &WorkItem) -> Result<(), CoreError> {
        Err(CoreError::EngineUnavailable {
            details: "notification channel down".to_string(),
        })
    }

    async fn work_item_completed(&self, _task_id: &str, _principal: &str) -> Result<(), CoreError> {
        Err(CoreError::EngineUnavailable {
            details: "notification channel down".to_string(),
        })
    }
}

#[tokio::test]
async fn unmapped_principal_sees_empty_list() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    ctx.engine
        .seed_task(engine_task("t1", "inst-1", Some("somebody")), vec![], vec![]);
    let items = orchestrator.work_items_for("ghost@example.com").await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn work_items_union_assignment_candidacy_and_groups() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    let identity = orchestrator.identity();
    identity
        .ensure_membership("alice@example.com", "finance")
        .await
        .unwrap();
    let user_id = identity
        .resolve("alice@example.com", false)
        .await
        .unwrap()
        .unwrap();
    let group_id = identity.resolve("finance", false).await.unwrap().unwrap();

    // Direct assignment, candidate user, candidate group, and one task that
    // matches on two channels at once.
    ctx.engine
        .seed_task(engine_task("t1", "inst-1", Some(&user_id)), vec![], vec![]);
    ctx.engine
        .seed_task(engine_task("t2", "inst-1", None), vec![user_id.clone()], vec![]);
    ctx.engine
        .seed_task(engine_task("t3", "inst-2", None), vec![], vec![group_id.clone()]);
    ctx.engine.seed_task(
        engine_task("t4", "inst-2", Some(&user_id)),
        vec![user_id.clone()],
        vec![],
    );
    ctx.engine
        .seed_task(engine_task("t5", "inst-3", Some("someone-else")), vec![], vec![]);

    let items = orchestrator.work_items_for("alice@example.com").await.unwrap();
    let mut ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["t1", "t2", "t3", "t4"]);
}

#[tokio::test]
async fn group_queries_skip_unmapped_groups() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    let group_id = orchestrator
        .identity()
        .ensure_group("finance")
        .await
        .unwrap()
        .unwrap();
    ctx.engine
        .seed_task(engine_task("t1", "inst-1", None), vec![], vec![group_id]);

    let items = orchestrator
        .work_items_for_groups(&["finance".to_string(), "never-seen".to_string()])
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "t1");
}

#[tokio::test]
async fn complete_claims_then_finishes_the_task() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    ctx.engine
        .seed_task(engine_task("t1", "inst-1", None), vec![], vec![]);
    orchestrator
        .complete_work_item("t1", json!({"approved": true}), "alice@example.com")
        .await
        .unwrap();

    let user_id = orchestrator
        .identity()
        .resolve("alice@example.com", false)
        .await
        .unwrap()
        .unwrap();
    assert!(ctx.engine.tasks_assigned_to(&user_id).await.unwrap().is_empty());
    assert!(ctx.engine.tasks_in_instance("inst-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn completing_unknown_task_reports_work_item_not_found() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator();

    let err = orchestrator
        .complete_work_item("ghost", json!({}), "alice@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::WorkItemNotFound { .. }));
}

#[tokio::test]
async fn notification_failure_does_not_fail_completion() {
    let ctx = TestContext::new().await;
    let orchestrator = ctx.orchestrator_with(FailingNotifier);

    ctx.engine
        .seed_task(engine_task("t1", "inst-1", None), vec![], vec![]);
    ctx.engine
        .seed_task(engine_task("t2", "inst-1", None), vec![], vec![]);

    orchestrator
        .complete_work_item("t1", json!({}), "alice@example.com")
        .await
        .expect("completion must not depend on notification delivery");

    // The engine state moved on even though every delivery failed.
    let remaining = ctx.engine.tasks_in_instance("inst-1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "t2");
}

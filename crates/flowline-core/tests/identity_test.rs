// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for identity mapping and directory provisioning.

mod common;

use std::sync::Arc;

use common::*;
use flowline_core::identity::IdentityService;
use flowline_core::store::Store;
use flowline_engine::ProcessEngine;

#[tokio::test]
async fn resolve_without_create_never_creates() {
    let ctx = TestContext::new().await;
    let identity = IdentityService::new(Arc::clone(&ctx.store), Arc::clone(&ctx.engine));

    assert!(identity
        .resolve("alice@example.com", false)
        .await
        .unwrap()
        .is_none());
    assert!(ctx
        .store
        .find_mapping_by_original("alice@example.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn ensure_is_stable_across_calls() {
    let ctx = TestContext::new().await;
    let identity = IdentityService::new(Arc::clone(&ctx.store), Arc::clone(&ctx.engine));

    let first = identity
        .ensure_principal("alice.smith@example.com")
        .await
        .unwrap()
        .expect("mapping created");
    assert!(first.starts_with("user"));
    assert!(first.len() <= 64);

    let second = identity
        .ensure_principal("alice.smith@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        identity.resolve("alice.smith@example.com", false).await.unwrap(),
        Some(first.clone())
    );

    // Directory provisioning happened alongside the mapping.
    assert!(ctx.engine.user_exists(&first).await.unwrap());
}

#[tokio::test]
async fn blank_references_are_skipped() {
    let ctx = TestContext::new().await;
    let identity = IdentityService::new(Arc::clone(&ctx.store), Arc::clone(&ctx.engine));

    assert!(identity.ensure_principal("   ").await.unwrap().is_none());
    assert!(identity.ensure_group("").await.unwrap().is_none());
}

#[tokio::test]
async fn membership_links_principal_to_group() {
    let ctx = TestContext::new().await;
    let identity = IdentityService::new(Arc::clone(&ctx.store), Arc::clone(&ctx.engine));

    identity
        .ensure_membership("alice@example.com", "finance")
        .await
        .unwrap();

    let user_id = identity
        .resolve("alice@example.com", false)
        .await
        .unwrap()
        .expect("principal mapped");
    let group_id = identity
        .resolve("finance", false)
        .await
        .unwrap()
        .expect("group mapped");
    assert!(group_id.starts_with("group"));
    assert!(ctx.engine.group_exists(&group_id).await.unwrap());
    assert!(ctx
        .engine
        .membership_exists(&group_id, &user_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn concurrent_first_references_yield_one_mapping() {
    let ctx = TestContext::new().await;
    let identity = IdentityService::new(Arc::clone(&ctx.store), Arc::clone(&ctx.engine));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let identity = identity.clone();
            tokio::spawn(async move { identity.ensure_group("finance").await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let id = handle.await.unwrap().unwrap().expect("mapping created");
        ids.push(id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "all callers must see the same engine id");

    let record = ctx
        .store
        .find_mapping_by_original("finance")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.engine_id, ids[0]);
    assert_eq!(record.resource_type, "group");
}

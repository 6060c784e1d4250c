// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work-item notification boundary.
//!
//! Notification delivery (mail, chat, webhooks) lives outside this crate.
//! The orchestrator reports work-item events through [`Notifier`] and treats
//! every failure as non-fatal: engine state is never rolled back because a
//! notification could not be delivered.

use async_trait::async_trait;
use tracing::info;

use crate::error::CoreError;
use crate::orchestrator::WorkItem;

/// Receives work-item lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A work item became available or was assigned.
    async fn work_item_assigned(&self, item: &WorkItem) -> Result<(), CoreError>;

    /// A work item was completed by a principal.
    async fn work_item_completed(&self, task_id: &str, principal: &str) -> Result<(), CoreError>;
}

/// Default notifier that only logs events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn work_item_assigned(&self, item: &WorkItem) -> Result<(), CoreError> {
        info!(
            task_id = %item.id,
            instance_id = %item.instance_id,
            assignee = item.assignee.as_deref().unwrap_or("<unassigned>"),
            "work item available"
        );
        Ok(())
    }

    async fn work_item_completed(&self, task_id: &str, principal: &str) -> Result<(), CoreError> {
        info!(task_id, principal, "work item completed");
        Ok(())
    }
}

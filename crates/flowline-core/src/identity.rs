// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity mapping between caller-side ids and engine-compliant ids.
//!
//! Caller-side principal and group ids (usually emails, directory DNs or
//! free-form labels) are not valid engine ids. On first reference this
//! service generates an engine-compliant id, persists the mapping, and
//! lazily provisions the corresponding directory record in the engine.
//! Subsequent references always return the same generated id.
//!
//! The mapping table is authoritative; engine directory provisioning is
//! best-effort and never blocks mapping creation.

use std::collections::HashMap;
use std::sync::Arc;

use flowline_bpmn::IdentityResolver;
use flowline_engine::{NewEngineGroup, NewEngineUser, ProcessEngine};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::store::{MappingInsert, Store};

/// Resource type column value for principals.
pub const RESOURCE_PRINCIPAL: &str = "principal";
/// Resource type column value for groups.
pub const RESOURCE_GROUP: &str = "group";

const MAX_ENGINE_ID_LEN: usize = 64;

/// Maps caller-side ids to engine ids, creating mappings and directory
/// records on first reference.
pub struct IdentityService<S, E> {
    store: Arc<S>,
    engine: Arc<E>,
}

impl<S, E> Clone for IdentityService<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S: Store, E: ProcessEngine> IdentityService<S, E> {
    /// Create a service over the given store and engine.
    pub fn new(store: Arc<S>, engine: Arc<E>) -> Self {
        Self { store, engine }
    }

    /// Ensure a principal mapping exists and return its engine id.
    ///
    /// Empty or whitespace-only input is skipped (`None`), so bulk callers
    /// never fail a whole batch on a blank entry.
    pub async fn ensure_principal(&self, original: &str) -> Result<Option<String>> {
        self.ensure(original, RESOURCE_PRINCIPAL).await
    }

    /// Ensure a group mapping exists and return its engine id.
    pub async fn ensure_group(&self, original: &str) -> Result<Option<String>> {
        self.ensure(original, RESOURCE_GROUP).await
    }

    /// Ensure both sides of a membership exist, then best-effort create the
    /// membership in the engine directory.
    pub async fn ensure_membership(&self, principal: &str, group: &str) -> Result<()> {
        let Some(user_id) = self.ensure_principal(principal).await? else {
            return Ok(());
        };
        let Some(group_id) = self.ensure_group(group).await? else {
            return Ok(());
        };

        let result = async {
            if self.engine.membership_exists(&group_id, &user_id).await? {
                return Ok(());
            }
            self.engine.create_membership(&group_id, &user_id).await
        }
        .await;
        if let Err(e) = result {
            warn!(principal, group, error = %e, "engine membership creation failed, continuing");
        }
        Ok(())
    }

    /// Look up the engine id for an original id.
    ///
    /// With `create_if_absent` the id is ensured as a principal; without it
    /// this is a pure query that never fabricates a mapping, which read
    /// paths rely on.
    pub async fn resolve(&self, original: &str, create_if_absent: bool) -> Result<Option<String>> {
        if create_if_absent {
            return self.ensure_principal(original).await;
        }
        let original = original.trim();
        if original.is_empty() {
            return Ok(None);
        }
        Ok(self
            .store
            .find_mapping_by_original(original)
            .await?
            .map(|record| record.engine_id))
    }

    /// Bulk-ensure principals, groups and memberships. Entries are processed
    /// independently; blank entries are skipped without failing the batch.
    pub async fn synchronize(
        &self,
        principals: &[String],
        groups: &[String],
        memberships: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        for principal in principals {
            self.ensure_principal(principal).await?;
        }
        for group in groups {
            self.ensure_group(group).await?;
        }
        for (principal, member_of) in memberships {
            for group in member_of {
                self.ensure_membership(principal, group).await?;
            }
        }
        Ok(())
    }

    /// Prefetch mappings into a synchronous resolver for the transformer.
    /// Callers synchronize the same ids beforehand, so lookups here are
    /// plain reads.
    pub async fn prefetch(
        &self,
        principals: &[String],
        groups: &[String],
    ) -> Result<ResolvedIdentities> {
        let mut resolved = ResolvedIdentities::default();
        for principal in principals {
            if let Some(record) = self.store.find_mapping_by_original(principal.trim()).await? {
                resolved
                    .principals
                    .insert(principal.clone(), record.engine_id);
            }
        }
        for group in groups {
            if let Some(record) = self.store.find_mapping_by_original(group.trim()).await? {
                resolved.groups.insert(group.clone(), record.engine_id);
            }
        }
        Ok(resolved)
    }

    async fn ensure(&self, original: &str, resource_type: &str) -> Result<Option<String>> {
        let original = original.trim();
        if original.is_empty() {
            return Ok(None);
        }

        if let Some(existing) = self.store.find_mapping_by_original(original).await? {
            return Ok(Some(existing.engine_id));
        }

        // Insert-or-fetch keyed on original_id makes concurrent first
        // references converge on one row. An engine-id collision gets one
        // regeneration before giving up.
        for attempt in 0..2 {
            let engine_id = generate_engine_id(resource_type);
            match self
                .store
                .insert_identity_mapping(original, &engine_id, resource_type)
                .await?
            {
                MappingInsert::Inserted(record) => {
                    debug!(original, engine_id = %record.engine_id, resource_type, "created identity mapping");
                    self.provision(original, &record.engine_id, resource_type)
                        .await;
                    return Ok(Some(record.engine_id));
                }
                MappingInsert::ExistingOriginal(record) => {
                    return Ok(Some(record.engine_id));
                }
                MappingInsert::EngineIdTaken => {
                    warn!(original, engine_id, attempt, "generated engine id collided, regenerating");
                }
            }
        }
        Err(CoreError::IdentityConflict {
            original_id: original.to_string(),
        })
    }

    /// Best-effort engine directory provisioning. Failures are logged and
    /// swallowed; the mapping row is already authoritative.
    async fn provision(&self, original: &str, engine_id: &str, resource_type: &str) {
        let result = if resource_type == RESOURCE_PRINCIPAL {
            self.provision_user(original, engine_id).await
        } else {
            self.provision_group(original, engine_id).await
        };
        if let Err(e) = result {
            warn!(original, engine_id, error = %e, "engine directory provisioning failed, continuing");
        }
    }

    async fn provision_user(
        &self,
        original: &str,
        engine_id: &str,
    ) -> std::result::Result<(), flowline_engine::EngineError> {
        if self.engine.user_exists(engine_id).await? {
            return Ok(());
        }
        let (first_name, last_name, email) = infer_user_profile(original);
        self.engine
            .create_user(&NewEngineUser {
                id: engine_id.to_string(),
                first_name,
                last_name,
                email,
            })
            .await
    }

    async fn provision_group(
        &self,
        original: &str,
        engine_id: &str,
    ) -> std::result::Result<(), flowline_engine::EngineError> {
        if self.engine.group_exists(engine_id).await? {
            return Ok(());
        }
        self.engine
            .create_group(&NewEngineGroup {
                id: engine_id.to_string(),
                name: original.to_string(),
                group_type: "WORKFLOW".to_string(),
            })
            .await
    }
}

/// Synchronous identity lookups prefetched for one transformation run.
#[derive(Debug, Default)]
pub struct ResolvedIdentities {
    principals: HashMap<String, String>,
    groups: HashMap<String, String>,
}

impl IdentityResolver for ResolvedIdentities {
    fn resolve_principal(&self, original: &str) -> Option<String> {
        self.principals.get(original).cloned()
    }

    fn resolve_group(&self, original: &str) -> Option<String> {
        self.groups.get(original).cloned()
    }
}

/// Generate an engine-compliant id: resource prefix plus an 8-character
/// hyphen-stripped random suffix, alphanumeric, bounded to 64 characters.
fn generate_engine_id(resource_type: &str) -> String {
    let prefix = if resource_type == RESOURCE_GROUP {
        "group"
    } else {
        "user"
    };
    let suffix = Uuid::new_v4().simple().to_string();
    let mut id = format!("{prefix}{}", &suffix[..8]);
    id.truncate(MAX_ENGINE_ID_LEN);
    id
}

/// Cosmetic display-name inference from the original id. An email's local
/// part is split on "." with each segment capitalized; anything else becomes
/// the first name as-is.
fn infer_user_profile(original: &str) -> (String, String, Option<String>) {
    match original.split_once('@') {
        Some((local, _domain)) => {
            let mut segments = local.split('.').filter(|s| !s.is_empty());
            let first = segments.next().map(capitalize).unwrap_or_default();
            let last = segments.map(capitalize).collect::<Vec<_>>().join(" ");
            (first, last, Some(original.to_string()))
        }
        None => (original.to_string(), String::new(), None),
    }
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_ids_are_prefixed_alphanumeric_and_bounded() {
        let user_id = generate_engine_id(RESOURCE_PRINCIPAL);
        let group_id = generate_engine_id(RESOURCE_GROUP);
        assert!(user_id.starts_with("user"));
        assert!(group_id.starts_with("group"));
        assert_eq!(user_id.len(), 12);
        assert_eq!(group_id.len(), 13);
        assert!(user_id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(group_id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn email_local_part_becomes_display_name() {
        let (first, last, email) = infer_user_profile("jane.van.dyke@corp.example");
        assert_eq!(first, "Jane");
        assert_eq!(last, "Van Dyke");
        assert_eq!(email.as_deref(), Some("jane.van.dyke@corp.example"));
    }

    #[test]
    fn plain_id_is_used_verbatim() {
        let (first, last, email) = infer_user_profile("operations-lead");
        assert_eq!(first, "operations-lead");
        assert_eq!(last, "");
        assert!(email.is_none());
    }

    #[test]
    fn resolved_identities_look_up_both_channels() {
        let mut resolved = ResolvedIdentities::default();
        resolved
            .principals
            .insert("alice".to_string(), "user1111".to_string());
        resolved
            .groups
            .insert("finance".to_string(), "group2222".to_string());
        assert_eq!(resolved.resolve_principal("alice").as_deref(), Some("user1111"));
        assert_eq!(resolved.resolve_group("finance").as_deref(), Some("group2222"));
        assert!(resolved.resolve_principal("bob").is_none());
    }
}

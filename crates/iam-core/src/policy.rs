// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! The access policy itself: the right-resolution algorithm (§4.1.1) and
//! the transactional backup/restore mutation wrapper (§4.1.2).

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use iam_shared::{GroupId, PolicyId, Rights, Subject, UserId};

use crate::{
    error::{Error, Result},
    group_manager::GroupManager,
    policy_manager::PolicyManager,
    roster::RightsRoster,
};

/// A record controlling access to one protected object or a named
/// capability.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub id: PolicyId,
    pub parent_id: PolicyId,
    pub owner_id: UserId,
    pub name: String,
    pub object_type: String,
    pub object_id: String,
    pub is_inherited: bool,
    pub is_extended: bool,
    pub roster: RightsRoster,
    backup: Option<Box<AccessPolicy>>,
}

impl AccessPolicy {
    pub fn new(
        id: PolicyId,
        parent_id: PolicyId,
        owner_id: UserId,
        name: String,
        object_type: String,
        object_id: String,
        is_inherited: bool,
        is_extended: bool,
        roster: RightsRoster,
    ) -> Self {
        Self {
            id,
            parent_id,
            owner_id,
            name: name.trim().to_lowercase(),
            object_type,
            object_id,
            is_inherited,
            is_extended,
            roster,
            backup: None,
        }
    }

    /// Derived hash of every identity/designator field, recomputed on
    /// every structural change and persisted alongside the row.
    pub fn checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.get().hash(&mut hasher);
        self.parent_id.get().hash(&mut hasher);
        self.owner_id.get().hash(&mut hasher);
        self.name.hash(&mut hasher);
        self.object_type.hash(&mut hasher);
        self.object_id.hash(&mut hasher);
        self.is_inherited.hash(&mut hasher);
        self.is_extended.hash(&mut hasher);
        hasher.finish()
    }

    /// Structural invariants from §3.1, checkable without consulting the
    /// store or the cache. Cross-policy uniqueness (`NameTaken`,
    /// `ObjectKindAndIdTaken`) is the manager's responsibility.
    pub fn validate(&self) -> Result<()> {
        let has_name = !self.name.is_empty();
        let has_object = !self.object_type.is_empty() || !self.object_id.is_empty();

        if self.object_type.is_empty() != self.object_id.is_empty() {
            return Err(Error::PartialObjectDesignator);
        }
        if !has_name && !has_object {
            return Err(Error::EmptyDesignators);
        }
        if self.is_inherited && self.is_extended {
            return Err(Error::InvalidParentCombination);
        }
        if (self.is_inherited || self.is_extended) && self.parent_id.is_none() {
            return Err(Error::InvalidParentCombination);
        }
        Ok(())
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        !self.owner_id.is_none() && user_id == self.owner_id
    }

    /// The right-resolution algorithm, §4.1.1, evaluated in order:
    /// ownership short-circuits to full access; an inherited policy
    /// delegates entirely to its parent; an extended policy starts from
    /// the parent's summarized rights; either way the policy's own roster
    /// is OR-ed in last.
    ///
    /// Boxed because an inherited policy recurses into its parent and
    /// `async fn`s can't be directly self-referential.
    pub fn has_rights<'a>(
        &'a self,
        user_id: UserId,
        rights: Rights,
        policies: &'a PolicyManager,
        groups: &'a GroupManager,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            if self.is_owner(user_id) {
                return Ok(true);
            }

            let mut computed = Rights::NO_ACCESS;

            if !self.parent_id.is_none() {
                if let Some(parent) = policies.policy_by_id(self.parent_id).await? {
                    if self.is_inherited {
                        return parent.has_rights(user_id, rights, policies, groups).await;
                    }
                    if self.is_extended {
                        computed = parent.roster.summarize(user_id, groups).await?;
                    }
                }
                // A missing parent contributes NoAccess rather than failing
                // the whole resolution — consistent with the ancestor-group
                // fallback's treatment of a dangling reference.
            }

            computed |= self.roster.summarize(user_id, groups).await?;

            Ok(computed.satisfies(rights))
        }
        .boxed()
    }

    /// Ancestor-fallback lookup for a single group, independent of the
    /// policy hierarchy (§4.1.1 `GroupRights`).
    pub async fn has_group_rights(
        &self,
        group_id: GroupId,
        rights: Rights,
        groups: &GroupManager,
    ) -> Result<bool> {
        let computed = self.roster.group_rights(group_id, groups).await?;
        Ok(computed.satisfies(rights))
    }

    /// `SetPublicRights`: requires the assignor to currently hold at
    /// least `rights`.
    pub async fn set_public_rights(
        &mut self,
        assignor: UserId,
        rights: Rights,
        policies: &PolicyManager,
        groups: &GroupManager,
    ) -> Result<()> {
        if !self.has_rights(assignor, rights, policies, groups).await? {
            return Err(Error::ExcessOfRights);
        }
        self.roster.set_public_rights(rights);
        Ok(())
    }

    /// `SetUserRights`: requires `ManageRights | rights`.
    pub async fn set_user_rights(
        &mut self,
        assignor: UserId,
        assignee: UserId,
        rights: Rights,
        policies: &PolicyManager,
        groups: &GroupManager,
    ) -> Result<()> {
        self.require_manage_and(assignor, rights, policies, groups)
            .await?;
        self.roster.set_user_rights(assignee, rights);
        Ok(())
    }

    /// `SetGroupRights`: requires `ManageRights | rights`.
    pub async fn set_group_rights(
        &mut self,
        assignor: UserId,
        group_id: GroupId,
        rights: Rights,
        policies: &PolicyManager,
        groups: &GroupManager,
    ) -> Result<()> {
        self.require_manage_and(assignor, rights, policies, groups)
            .await?;
        self.roster.set_group_rights(group_id, rights);
        Ok(())
    }

    /// `SetRoleRights`: requires `ManageRights | rights`.
    pub async fn set_role_rights(
        &mut self,
        assignor: UserId,
        role_id: GroupId,
        rights: Rights,
        policies: &PolicyManager,
        groups: &GroupManager,
    ) -> Result<()> {
        self.require_manage_and(assignor, rights, policies, groups)
            .await?;
        self.roster.set_role_rights(role_id, rights);
        Ok(())
    }

    /// `UnsetRights`: requires `ManageRights` only (no excess-of-rights
    /// check, since unsetting never grants anything).
    pub async fn unset_rights(
        &mut self,
        assignor: UserId,
        subject: Subject,
        policies: &PolicyManager,
        groups: &GroupManager,
    ) -> Result<()> {
        if !self
            .has_rights(assignor, Rights::MANAGE_RIGHTS, policies, groups)
            .await?
        {
            return Err(Error::AccessDenied);
        }
        self.roster.unset_rights(subject);
        Ok(())
    }

    async fn require_manage_and(
        &self,
        assignor: UserId,
        rights: Rights,
        policies: &PolicyManager,
        groups: &GroupManager,
    ) -> Result<()> {
        if !self
            .has_rights(assignor, Rights::MANAGE_RIGHTS | rights, policies, groups)
            .await?
        {
            return Err(Error::ExcessOfRights);
        }
        Ok(())
    }

    /// Snapshots the policy (minus any existing backup, to avoid nesting)
    /// for later `restore_backup`. A no-op if a backup already exists —
    /// the first mutating call after load/persist creates it, subsequent
    /// mutations must not overwrite it (§4.1.2).
    pub fn create_backup(&mut self) {
        if self.backup.is_some() {
            return;
        }
        let mut snapshot = self.clone();
        snapshot.backup = None;
        self.backup = Some(Box::new(snapshot));
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Restores every field from the backup snapshot and clears it. A
    /// second call without an intervening `create_backup` fails with
    /// `BackupNotFound`.
    pub fn restore_backup(&mut self) -> Result<()> {
        let backup = self.backup.take().ok_or(Error::BackupNotFound)?;
        *self = *backup;
        self.backup = None;
        Ok(())
    }

    /// Clears the backup and the roster's pending changelist — called by
    /// the manager after a successful persist.
    pub fn clear_transaction_state(&mut self) {
        self.backup = None;
        self.roster.clear_changes();
    }

    pub fn pending_changes(&self) -> &[crate::roster::Change] {
        &self.roster.changes
    }
}

/// Persists policy + roster records; transactional upsert/delete.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn create_policy(&self, policy: &AccessPolicy) -> Result<()>;
    async fn update_policy(&self, policy: &AccessPolicy) -> Result<()>;
    async fn fetch_policy_by_id(&self, id: PolicyId) -> Result<Option<AccessPolicy>>;
    async fn fetch_policy_by_name(&self, name: &str) -> Result<Option<AccessPolicy>>;
    async fn fetch_policy_by_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<AccessPolicy>>;
    async fn delete_policy(&self, id: PolicyId) -> Result<()>;
}

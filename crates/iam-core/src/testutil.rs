// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! In-memory store doubles, used by unit tests in place of the live
//! diesel-backed stores. The store traits exist precisely to make this
//! substitution possible (see §10 on the deliberate deviation from
//! database-backed integration tests).

#![cfg(test)]

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use iam_shared::{GroupId, PolicyId, UserId};
use tokio::sync::Mutex;

use crate::{
    error::Result,
    group::{Group, GroupStore},
    group_manager::GroupManager,
    policy::{AccessPolicy, PolicyStore},
    policy_manager::PolicyManager,
    settings::CoreSettings,
    token::{Token, TokenHash, TokenStore},
};

#[derive(Default)]
pub struct InMemoryPolicyStore {
    by_id: Mutex<HashMap<PolicyId, AccessPolicy>>,
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn create_policy(&self, policy: &AccessPolicy) -> Result<()> {
        self.by_id.lock().await.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn update_policy(&self, policy: &AccessPolicy) -> Result<()> {
        self.by_id.lock().await.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn fetch_policy_by_id(&self, id: PolicyId) -> Result<Option<AccessPolicy>> {
        Ok(self.by_id.lock().await.get(&id).cloned())
    }

    async fn fetch_policy_by_name(&self, name: &str) -> Result<Option<AccessPolicy>> {
        Ok(self
            .by_id
            .lock()
            .await
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn fetch_policy_by_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<AccessPolicy>> {
        Ok(self
            .by_id
            .lock()
            .await
            .values()
            .find(|p| p.object_type == object_type && p.object_id == object_id)
            .cloned())
    }

    async fn delete_policy(&self, id: PolicyId) -> Result<()> {
        self.by_id.lock().await.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryGroupStore {
    groups: Mutex<HashMap<GroupId, Group>>,
    relations: Mutex<HashSet<(GroupId, UserId)>>,
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn upsert_group(&self, group: &Group) -> Result<()> {
        self.groups.lock().await.insert(group.id, group.clone());
        Ok(())
    }

    async fn fetch_group_by_id(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.groups.lock().await.get(&id).cloned())
    }

    async fn fetch_group_by_key(&self, key: &str) -> Result<Option<Group>> {
        Ok(self
            .groups
            .lock()
            .await
            .values()
            .find(|g| g.key == key)
            .cloned())
    }

    async fn fetch_all_groups(&self) -> Result<Vec<Group>> {
        Ok(self.groups.lock().await.values().cloned().collect())
    }

    async fn delete_by_id(&self, id: GroupId) -> Result<()> {
        self.groups.lock().await.remove(&id);
        self.relations.lock().await.retain(|(g, _)| *g != id);
        Ok(())
    }

    async fn put_relation(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.relations.lock().await.insert((group_id, user_id));
        Ok(())
    }

    async fn delete_relation(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.relations.lock().await.remove(&(group_id, user_id));
        Ok(())
    }

    async fn has_relation(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.relations.lock().await.contains(&(group_id, user_id)))
    }

    async fn fetch_all_relations(&self) -> Result<Vec<(UserId, GroupId)>> {
        Ok(self
            .relations
            .lock()
            .await
            .iter()
            .map(|(g, u)| (*u, *g))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    by_hash: Mutex<HashMap<TokenHash, Token>>,
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, token: &Token) -> Result<()> {
        self.by_hash.lock().await.insert(token.hash, token.clone());
        Ok(())
    }

    async fn fetch_by_hash(&self, hash: TokenHash) -> Result<Option<Token>> {
        Ok(self.by_hash.lock().await.get(&hash).cloned())
    }

    async fn update(&self, token: &Token) -> Result<()> {
        self.by_hash.lock().await.insert(token.hash, token.clone());
        Ok(())
    }

    async fn delete(&self, hash: TokenHash) -> Result<()> {
        self.by_hash.lock().await.remove(&hash);
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Token>> {
        Ok(self.by_hash.lock().await.values().cloned().collect())
    }
}

/// A `PolicyManager`/`GroupManager` pair backed by fresh, empty in-memory
/// stores, for tests that don't care about group hierarchy.
pub fn empty_manager_pair() -> (PolicyManager, GroupManager) {
    let policies = PolicyManager::new(Arc::new(InMemoryPolicyStore::default()), CoreSettings::default());
    let groups = GroupManager::new(Arc::new(InMemoryGroupStore::default()), CoreSettings::default());
    (policies, groups)
}

// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! A caller-held handle bundling the three engines, so request handlers
//! pass one value instead of three. Mirrors `kustos::Authz` being the one
//! thing a controller handler actually holds.

use std::sync::Arc;

use iam_database::Db;

use crate::{
    db::{PgGroupStore, PgPolicyStore, PgTokenStore},
    group_manager::GroupManager,
    policy_manager::PolicyManager,
    settings::CoreSettings,
    token_manager::TokenManager,
};

/// Owns the three managers and is cheap to clone (every field is an
/// `Arc`).
#[derive(Clone)]
pub struct Context {
    pub policies: Arc<PolicyManager>,
    pub groups: Arc<GroupManager>,
    pub tokens: Arc<TokenManager>,
}

impl Context {
    /// Builds a context wired to diesel-backed stores sharing `db`'s
    /// connection pool, and preloads the group cache (§5: the group cache
    /// is populated once at startup, policies and tokens lazily).
    pub async fn connect(db: Arc<Db>, settings: CoreSettings) -> crate::error::Result<Self> {
        let groups = Arc::new(GroupManager::new(
            Arc::new(PgGroupStore::new(db.clone())),
            settings.clone(),
        ));
        groups.init().await?;

        let policies = Arc::new(PolicyManager::new(
            Arc::new(PgPolicyStore::new(db.clone())),
            settings.clone(),
        ));
        policies.init().await?;

        let tokens = Arc::new(TokenManager::new(
            Arc::new(PgTokenStore::new(db)),
            settings,
        ));

        Ok(Self {
            policies,
            groups,
            tokens,
        })
    }

    pub fn new(
        policies: Arc<PolicyManager>,
        groups: Arc<GroupManager>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            policies,
            groups,
            tokens,
        }
    }
}

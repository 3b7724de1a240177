// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! The per-policy rights roster: a mapping from subject-kind+id to a
//! rights bitmask, plus a pending changelist used for transactional
//! mutation (see `policy::AccessPolicy`).

use std::collections::HashMap;

use iam_shared::{GroupId, Rights, Subject, UserId};
use serde::{Deserialize, Serialize};

use crate::{error::Result, group_manager::GroupManager};

/// One entry in the append-only changelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Set,
    Unset,
}

/// A single pending mutation, replayed by the store during `Update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub action: Action,
    pub subject: Subject,
    pub rights: Rights,
}

/// In-memory mapping from subject-kind+id to a rights bitmask, with a
/// pending changelist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RightsRoster {
    pub everyone: Rights,
    pub by_role: HashMap<GroupId, Rights>,
    pub by_group: HashMap<GroupId, Rights>,
    pub by_user: HashMap<UserId, Rights>,
    pub changes: Vec<Change>,
}

impl RightsRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty entries across every sub-map plus `everyone`,
    /// used by the store to know how many roster rows to persist on
    /// `Create`.
    pub fn entry_count(&self) -> usize {
        usize::from(!self.everyone.is_empty())
            + self.by_role.values().filter(|r| !r.is_empty()).count()
            + self.by_group.values().filter(|r| !r.is_empty()).count()
            + self.by_user.values().filter(|r| !r.is_empty()).count()
    }

    fn record(&mut self, action: Action, subject: Subject, rights: Rights) {
        self.changes.push(Change {
            action,
            subject,
            rights,
        });
    }

    /// Sets `everyone` and records a `Set` change. Idempotent: calling
    /// with the same rights twice leaves the roster in the same state and
    /// still appends a `Set` entry each time (matching the spec's
    /// append-only changelist, replayed as an upsert by the store).
    pub fn set_public_rights(&mut self, rights: Rights) {
        self.everyone = rights;
        self.record(Action::Set, Subject::Public, rights);
    }

    pub fn set_user_rights(&mut self, user_id: UserId, rights: Rights) {
        self.by_user.insert(user_id, rights);
        self.record(Action::Set, Subject::User(user_id), rights);
    }

    pub fn set_group_rights(&mut self, group_id: GroupId, rights: Rights) {
        self.by_group.insert(group_id, rights);
        self.record(
            Action::Set,
            Subject::Group(group_id, iam_shared::GroupKind::Group),
            rights,
        );
    }

    pub fn set_role_rights(&mut self, role_id: GroupId, rights: Rights) {
        self.by_role.insert(role_id, rights);
        self.record(
            Action::Set,
            Subject::Group(role_id, iam_shared::GroupKind::Role),
            rights,
        );
    }

    /// Deletes the subject's entry; for `Public` this resets to `NoAccess`
    /// rather than removing the row (there is always exactly one public
    /// entry, empty or not).
    pub fn unset_rights(&mut self, subject: Subject) {
        match subject {
            Subject::Public => self.everyone = Rights::NO_ACCESS,
            Subject::User(id) => {
                self.by_user.remove(&id);
            }
            Subject::Group(id, iam_shared::GroupKind::Group) => {
                self.by_group.remove(&id);
            }
            Subject::Group(id, iam_shared::GroupKind::Role) => {
                self.by_role.remove(&id);
            }
        }
        self.record(Action::Unset, subject, Rights::NO_ACCESS);
    }

    /// The ancestor-fallback lookup described in §4.1.1: an explicit entry
    /// on `group_id` wins outright; otherwise the lookup walks up the
    /// *group* hierarchy (not the policy hierarchy) looking for the
    /// nearest ancestor with an explicit entry in this same roster. A
    /// descendant with its own entry overrides rather than unions with an
    /// ancestor's.
    pub async fn group_rights(
        &self,
        group_id: GroupId,
        groups: &GroupManager,
    ) -> Result<Rights> {
        let mut current = group_id;
        loop {
            let Some(group) = groups.group_by_id(current).await? else {
                // Open question in the spec: a group not found during the
                // walk (e.g. evicted mid-traversal) yields NoAccess rather
                // than propagating NotFound, since the walk is best-effort
                // ancestor resolution, not a direct lookup.
                return Ok(Rights::NO_ACCESS);
            };

            let map = match group.kind {
                iam_shared::GroupKind::Role => &self.by_role,
                iam_shared::GroupKind::Group => &self.by_group,
            };

            if let Some(rights) = map.get(&current) {
                return Ok(*rights);
            }

            if group.parent_id.is_none() {
                return Ok(Rights::NO_ACCESS);
            }
            current = group.parent_id;
        }
    }

    /// `Summarize(user_id)`: `everyone`, OR-ed with `GroupRights` for
    /// every group the user directly belongs to, OR-ed with the user's
    /// own explicit entry.
    pub async fn summarize(&self, user_id: UserId, groups: &GroupManager) -> Result<Rights> {
        let mut computed = self.everyone;

        let mask = iam_shared::SubjectKind::GROUP | iam_shared::SubjectKind::ROLE_GROUP;
        for membership in groups.groups_by_user_id(user_id, mask).await? {
            computed |= self.group_rights(membership.id, groups).await?;
        }

        if let Some(rights) = self.by_user.get(&user_id) {
            computed |= *rights;
        }

        Ok(computed)
    }

    /// Clears the changelist, called by the manager after a successful
    /// persist.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }
}

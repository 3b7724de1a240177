// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, RunQueryDsl};
use iam_database::{Db, OptionalExt};
use iam_shared::{GroupId, GroupKind, PolicyId, Rights, Subject, SubjectKind, UserId};

use crate::{
    error::Result,
    policy::{AccessPolicy, PolicyStore},
    roster::{Action, RightsRoster},
    schema::{accesspolicy, accesspolicy_rights_roster},
};

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = accesspolicy)]
struct PolicyRow {
    id: i64,
    parent_id: i64,
    owner_id: i64,
    name: String,
    object_type: String,
    object_id: String,
    is_inherited: bool,
    is_extended: bool,
    checksum: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = accesspolicy_rights_roster)]
struct RosterRow {
    policy_id: i64,
    subject_kind: i16,
    subject_id: i64,
    rights: i64,
}

fn roster_rows(policy: &AccessPolicy) -> Vec<RosterRow> {
    let mut rows = Vec::with_capacity(policy.roster.entry_count());
    let id = policy.id.get();

    if !policy.roster.everyone.is_empty() {
        rows.push(RosterRow {
            policy_id: id,
            subject_kind: SubjectKind::EVERYONE.bits() as i16,
            subject_id: 0,
            rights: policy.roster.everyone.bits() as i64,
        });
    }
    for (user_id, rights) in &policy.roster.by_user {
        if rights.is_empty() {
            continue;
        }
        rows.push(RosterRow {
            policy_id: id,
            subject_kind: SubjectKind::USER.bits() as i16,
            subject_id: user_id.get(),
            rights: rights.bits() as i64,
        });
    }
    for (group_id, rights) in &policy.roster.by_group {
        if rights.is_empty() {
            continue;
        }
        rows.push(RosterRow {
            policy_id: id,
            subject_kind: SubjectKind::GROUP.bits() as i16,
            subject_id: group_id.get(),
            rights: rights.bits() as i64,
        });
    }
    for (role_id, rights) in &policy.roster.by_role {
        if rights.is_empty() {
            continue;
        }
        rows.push(RosterRow {
            policy_id: id,
            subject_kind: SubjectKind::ROLE_GROUP.bits() as i16,
            subject_id: role_id.get(),
            rights: rights.bits() as i64,
        });
    }

    rows
}

fn roster_from_rows(rows: Vec<RosterRow>) -> RightsRoster {
    let mut roster = RightsRoster::new();
    for row in rows {
        let Some(kind) = SubjectKind::from_bits(row.subject_kind as u8) else {
            continue;
        };
        let rights = Rights::from_bits_truncate(row.rights as u64);
        match kind {
            SubjectKind::EVERYONE => roster.everyone = rights,
            SubjectKind::USER => {
                roster.by_user.insert(UserId::new(row.subject_id), rights);
            }
            SubjectKind::GROUP => {
                roster.by_group.insert(GroupId::new(row.subject_id), rights);
            }
            SubjectKind::ROLE_GROUP => {
                roster.by_role.insert(GroupId::new(row.subject_id), rights);
            }
            _ => {}
        }
    }
    roster
}

/// The `(subject_kind, subject_id)` a roster row is keyed on, matching the
/// encoding `roster_rows` uses for a full rebuild.
fn subject_key(subject: Subject) -> (i16, i64) {
    match subject {
        Subject::Public => (SubjectKind::EVERYONE.bits() as i16, 0),
        Subject::User(id) => (SubjectKind::USER.bits() as i16, id.get()),
        Subject::Group(id, GroupKind::Group) => (SubjectKind::GROUP.bits() as i16, id.get()),
        Subject::Group(id, GroupKind::Role) => (SubjectKind::ROLE_GROUP.bits() as i16, id.get()),
    }
}

fn row_from_policy(policy: &AccessPolicy) -> PolicyRow {
    PolicyRow {
        id: policy.id.get(),
        parent_id: policy.parent_id.get(),
        owner_id: policy.owner_id.get(),
        name: policy.name.clone(),
        object_type: policy.object_type.clone(),
        object_id: policy.object_id.clone(),
        is_inherited: policy.is_inherited,
        is_extended: policy.is_extended,
        checksum: policy.checksum() as i64,
    }
}

fn policy_from_row(row: PolicyRow, roster: RightsRoster) -> AccessPolicy {
    AccessPolicy::new(
        PolicyId::new(row.id),
        PolicyId::new(row.parent_id),
        UserId::new(row.owner_id),
        row.name,
        row.object_type,
        row.object_id,
        row.is_inherited,
        row.is_extended,
        roster,
    )
}

/// Diesel-backed [`PolicyStore`], persisting the policy row and its rights
/// roster rows within a single transaction on every write.
pub struct PgPolicyStore {
    db: Arc<Db>,
}

impl PgPolicyStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    async fn load(&self, row: PolicyRow) -> Result<AccessPolicy> {
        let mut conn = self.db.get_conn().await?;
        let rows: Vec<RosterRow> = accesspolicy_rights_roster::table
            .filter(accesspolicy_rights_roster::policy_id.eq(row.id))
            .load(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(policy_from_row(row, roster_from_rows(rows)))
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    #[tracing::instrument(err, skip_all)]
    async fn create_policy(&self, policy: &AccessPolicy) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        let row = row_from_policy(policy);
        let rows = roster_rows(policy);

        conn.transaction(|conn| {
            async move {
                diesel::insert_into(accesspolicy::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                if !rows.is_empty() {
                    diesel::insert_into(accesspolicy_rights_roster::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;
                }
                Ok::<_, diesel::result::Error>(())
            }
            .scope_boxed()
        })
        .await
        .map_err(iam_database::DatabaseError::from)?;

        Ok(())
    }

    /// Replays the roster's pending changelist (§4.3 Update: for each
    /// pending change, upsert on `Set` or delete on `Unset`), in the order
    /// the changes were recorded.
    #[tracing::instrument(err, skip_all)]
    async fn update_policy(&self, policy: &AccessPolicy) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        let row = row_from_policy(policy);
        let id = policy.id.get();
        let changes = policy.pending_changes().to_vec();

        conn.transaction(|conn| {
            async move {
                diesel::update(accesspolicy::table.find(id))
                    .set(&row)
                    .execute(conn)
                    .await?;

                for change in &changes {
                    let (subject_kind, subject_id) = subject_key(change.subject);
                    match change.action {
                        Action::Set => {
                            let roster_row = RosterRow {
                                policy_id: id,
                                subject_kind,
                                subject_id,
                                rights: change.rights.bits() as i64,
                            };
                            diesel::insert_into(accesspolicy_rights_roster::table)
                                .values(&roster_row)
                                .on_conflict((
                                    accesspolicy_rights_roster::policy_id,
                                    accesspolicy_rights_roster::subject_kind,
                                    accesspolicy_rights_roster::subject_id,
                                ))
                                .do_update()
                                .set(accesspolicy_rights_roster::rights.eq(roster_row.rights))
                                .execute(conn)
                                .await?;
                        }
                        Action::Unset => {
                            diesel::delete(
                                accesspolicy_rights_roster::table
                                    .filter(accesspolicy_rights_roster::policy_id.eq(id))
                                    .filter(accesspolicy_rights_roster::subject_kind.eq(subject_kind))
                                    .filter(accesspolicy_rights_roster::subject_id.eq(subject_id)),
                            )
                            .execute(conn)
                            .await?;
                        }
                    }
                }

                Ok::<_, diesel::result::Error>(())
            }
            .scope_boxed()
        })
        .await
        .map_err(iam_database::DatabaseError::from)?;

        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_policy_by_id(&self, id: PolicyId) -> Result<Option<AccessPolicy>> {
        let mut conn = self.db.get_conn().await?;
        let row: Option<PolicyRow> = accesspolicy::table
            .find(id.get())
            .first(&mut conn)
            .await
            .optional()
            .map_err(iam_database::DatabaseError::from)?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_policy_by_name(&self, name: &str) -> Result<Option<AccessPolicy>> {
        let mut conn = self.db.get_conn().await?;
        let row: Option<PolicyRow> = accesspolicy::table
            .filter(accesspolicy::name.eq(name))
            .first(&mut conn)
            .await
            .optional()
            .map_err(iam_database::DatabaseError::from)?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_policy_by_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<AccessPolicy>> {
        let mut conn = self.db.get_conn().await?;
        let row: Option<PolicyRow> = accesspolicy::table
            .filter(accesspolicy::object_type.eq(object_type))
            .filter(accesspolicy::object_id.eq(object_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(iam_database::DatabaseError::from)?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(err, skip_all)]
    async fn delete_policy(&self, id: PolicyId) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        diesel::delete(accesspolicy::table.find(id.get()))
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> AccessPolicy {
        let mut roster = RightsRoster::new();
        roster.set_public_rights(Rights::VIEW);
        roster.set_user_rights(UserId::new(7), Rights::VIEW | Rights::CHANGE);
        roster.set_group_rights(GroupId::new(3), Rights::VIEW);
        roster.clear_changes();

        AccessPolicy::new(
            PolicyId::new(1),
            PolicyId::NONE,
            UserId::new(7),
            "room-42".into(),
            "room".into(),
            "42".into(),
            false,
            false,
            roster,
        )
    }

    #[test]
    fn roster_rows_round_trip_through_policy_row() {
        let policy = sample_policy();
        let rows = roster_rows(&policy);
        assert_eq!(rows.len(), policy.roster.entry_count());

        let rebuilt = roster_from_rows(rows);
        assert_eq!(rebuilt.everyone, policy.roster.everyone);
        assert_eq!(rebuilt.by_user, policy.roster.by_user);
        assert_eq!(rebuilt.by_group, policy.roster.by_group);
    }

    #[test]
    fn policy_row_round_trip_preserves_identity_fields() {
        let policy = sample_policy();
        let row = row_from_policy(&policy);
        let rebuilt = policy_from_row(row, RightsRoster::new());

        assert_eq!(rebuilt.id, policy.id);
        assert_eq!(rebuilt.owner_id, policy.owner_id);
        assert_eq!(rebuilt.name, policy.name);
        assert_eq!(rebuilt.object_type, policy.object_type);
        assert_eq!(rebuilt.object_id, policy.object_id);
        assert_eq!(rebuilt.checksum(), policy.checksum());
    }

    #[test]
    fn empty_roster_produces_no_rows_except_a_nonempty_everyone() {
        let policy = AccessPolicy::new(
            PolicyId::new(1),
            PolicyId::NONE,
            UserId::new(1),
            "empty".into(),
            String::new(),
            String::new(),
            false,
            false,
            RightsRoster::new(),
        );
        assert!(roster_rows(&policy).is_empty());
    }

    #[test]
    fn subject_key_matches_the_roster_rows_encoding() {
        assert_eq!(subject_key(Subject::Public), (SubjectKind::EVERYONE.bits() as i16, 0));
        assert_eq!(
            subject_key(Subject::User(UserId::new(7))),
            (SubjectKind::USER.bits() as i16, 7)
        );
        assert_eq!(
            subject_key(Subject::Group(GroupId::new(3), GroupKind::Group)),
            (SubjectKind::GROUP.bits() as i16, 3)
        );
        assert_eq!(
            subject_key(Subject::Group(GroupId::new(3), GroupKind::Role)),
            (SubjectKind::ROLE_GROUP.bits() as i16, 3)
        );
    }

    #[test]
    fn update_changelist_set_then_unset_is_replayed_in_order() {
        let mut roster = RightsRoster::new();
        roster.set_user_rights(UserId::new(7), Rights::VIEW);
        roster.unset_rights(Subject::User(UserId::new(7)));

        let changes = roster.changes.clone();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, Action::Set);
        assert_eq!(changes[1].action, Action::Unset);
        assert_eq!(subject_key(changes[0].subject), subject_key(changes[1].subject));
    }
}

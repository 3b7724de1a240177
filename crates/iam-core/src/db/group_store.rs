// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use iam_database::{Db, OptionalExt};
use iam_shared::{GroupId, GroupKind, UserId};

use crate::{
    error::Result,
    group::{Group, GroupStore},
    schema::{group_, group_users},
};

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = group_)]
struct GroupRow {
    id: i64,
    kind: i16,
    key: String,
    name: String,
    description: String,
    parent_id: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = group_users)]
struct RelationRow {
    group_id: i64,
    user_id: i64,
}

fn row_from_group(group: &Group) -> GroupRow {
    GroupRow {
        id: group.id.get(),
        kind: group.kind.subject_kind_bit() as i16,
        key: group.key.clone(),
        name: group.name.clone(),
        description: group.description.clone(),
        parent_id: group.parent_id.get(),
    }
}

fn group_from_row(row: GroupRow, members: HashSet<UserId>) -> Option<Group> {
    let kind = if row.kind as u8 == GroupKind::Group.subject_kind_bit() {
        GroupKind::Group
    } else if row.kind as u8 == GroupKind::Role.subject_kind_bit() {
        GroupKind::Role
    } else {
        return None;
    };

    Some(Group {
        id: GroupId::new(row.id),
        kind,
        key: row.key,
        name: row.name,
        description: row.description,
        parent_id: GroupId::new(row.parent_id),
        members,
    })
}

/// Diesel-backed [`GroupStore`].
pub struct PgGroupStore {
    db: Arc<Db>,
}

impl PgGroupStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    async fn members_of(&self, group_id: GroupId) -> Result<HashSet<UserId>> {
        let mut conn = self.db.get_conn().await?;
        let rows: Vec<RelationRow> = group_users::table
            .filter(group_users::group_id.eq(group_id.get()))
            .load(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(rows.into_iter().map(|r| UserId::new(r.user_id)).collect())
    }
}

#[async_trait]
impl GroupStore for PgGroupStore {
    #[tracing::instrument(err, skip_all)]
    async fn upsert_group(&self, group: &Group) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        let row = row_from_group(group);
        diesel::insert_into(group_::table)
            .values(&row)
            .on_conflict(group_::id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_group_by_id(&self, id: GroupId) -> Result<Option<Group>> {
        let mut conn = self.db.get_conn().await?;
        let row: Option<GroupRow> = group_::table
            .find(id.get())
            .first(&mut conn)
            .await
            .optional()
            .map_err(iam_database::DatabaseError::from)?;

        match row {
            Some(row) => Ok(group_from_row(row, self.members_of(id).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_group_by_key(&self, key: &str) -> Result<Option<Group>> {
        let mut conn = self.db.get_conn().await?;
        let row: Option<GroupRow> = group_::table
            .filter(group_::key.eq(key))
            .first(&mut conn)
            .await
            .optional()
            .map_err(iam_database::DatabaseError::from)?;

        match row {
            Some(row) => {
                let id = GroupId::new(row.id);
                Ok(group_from_row(row, self.members_of(id).await?))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_all_groups(&self) -> Result<Vec<Group>> {
        let mut conn = self.db.get_conn().await?;
        let rows: Vec<GroupRow> = group_::table
            .load(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        drop(conn);

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let id = GroupId::new(row.id);
            let members = self.members_of(id).await?;
            if let Some(group) = group_from_row(row, members) {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    #[tracing::instrument(err, skip_all)]
    async fn delete_by_id(&self, id: GroupId) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        diesel::delete(group_::table.find(id.get()))
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn put_relation(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        diesel::insert_into(group_users::table)
            .values(&RelationRow {
                group_id: group_id.get(),
                user_id: user_id.get(),
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn delete_relation(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        diesel::delete(
            group_users::table
                .filter(group_users::group_id.eq(group_id.get()))
                .filter(group_users::user_id.eq(user_id.get())),
        )
        .execute(&mut conn)
        .await
        .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn has_relation(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let mut conn = self.db.get_conn().await?;
        let count: i64 = group_users::table
            .filter(group_users::group_id.eq(group_id.get()))
            .filter(group_users::user_id.eq(user_id.get()))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(count > 0)
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_all_relations(&self) -> Result<Vec<(UserId, GroupId)>> {
        let mut conn = self.db.get_conn().await?;
        let rows: Vec<RelationRow> = group_users::table
            .load(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(rows
            .into_iter()
            .map(|r| (UserId::new(r.user_id), GroupId::new(r.group_id)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group(kind: GroupKind) -> Group {
        Group {
            id: GroupId::new(9),
            kind,
            key: "eng".into(),
            name: "Engineering".into(),
            description: "core engineering".into(),
            parent_id: GroupId::NONE,
            members: HashSet::from([UserId::new(1), UserId::new(2)]),
        }
    }

    #[test]
    fn group_row_round_trips_for_both_kinds() {
        for kind in [GroupKind::Group, GroupKind::Role] {
            let group = sample_group(kind);
            let row = row_from_group(&group);
            let rebuilt = group_from_row(row, group.members.clone()).unwrap();

            assert_eq!(rebuilt.id, group.id);
            assert_eq!(rebuilt.kind, group.kind);
            assert_eq!(rebuilt.key, group.key);
            assert_eq!(rebuilt.name, group.name);
            assert_eq!(rebuilt.parent_id, group.parent_id);
            assert_eq!(rebuilt.members, group.members);
        }
    }

    #[test]
    fn group_from_row_rejects_an_unknown_kind_bit() {
        let row = GroupRow {
            id: 1,
            kind: 99,
            key: "x".into(),
            name: "x".into(),
            description: String::new(),
            parent_id: 0,
        };
        assert!(group_from_row(row, HashSet::new()).is_none());
    }
}

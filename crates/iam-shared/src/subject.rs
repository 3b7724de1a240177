// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Subject polymorphism, modeled as a tagged union per DESIGN NOTES in the
//! specification, dispatching on the tag rather than on runtime type.

use serde::{Deserialize, Serialize};

use crate::{error::ParsingError, group::GroupKind, ids::UserId, ids::GroupId};

/// The entity whose rights are being inquired about or assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// Anyone, including unauthenticated callers.
    Public,
    /// A single user.
    User(UserId),
    /// A group or role, tagged with its kind.
    Group(GroupId, GroupKind),
}

impl Subject {
    pub fn kind(self) -> SubjectKind {
        match self {
            Subject::Public => SubjectKind::EVERYONE,
            Subject::User(_) => SubjectKind::USER,
            Subject::Group(_, GroupKind::Group) => SubjectKind::GROUP,
            Subject::Group(_, GroupKind::Role) => SubjectKind::ROLE_GROUP,
        }
    }
}

bitflags::bitflags! {
    /// `subject_kind` bit encoding from the persisted schema (§6.1):
    /// `1 = Everyone, 2 = User, 4 = Group, 8 = RoleGroup`. Bit values, not
    /// enumerant ordinals, so combined queries can `subject_kind & mask`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SubjectKind: u8 {
        const EVERYONE = 1;
        const USER = 2;
        const GROUP = 4;
        const ROLE_GROUP = 8;
    }
}

impl SubjectKind {
    pub fn from_bit(bit: u8) -> Result<Self, ParsingError> {
        SubjectKind::from_bits(bit).ok_or(ParsingError::InvalidSubjectKind(bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_kind_matches_schema_encoding() {
        assert_eq!(SubjectKind::EVERYONE.bits(), 1);
        assert_eq!(SubjectKind::USER.bits(), 2);
        assert_eq!(SubjectKind::GROUP.bits(), 4);
        assert_eq!(SubjectKind::ROLE_GROUP.bits(), 8);
    }

    #[test]
    fn subject_kind_follows_tag() {
        assert_eq!(Subject::Public.kind(), SubjectKind::EVERYONE);
        assert_eq!(Subject::User(UserId::new(1)).kind(), SubjectKind::USER);
        assert_eq!(
            Subject::Group(GroupId::new(1), GroupKind::Group).kind(),
            SubjectKind::GROUP
        );
        assert_eq!(
            Subject::Group(GroupId::new(1), GroupKind::Role).kind(),
            SubjectKind::ROLE_GROUP
        );
    }
}

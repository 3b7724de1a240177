// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Group kind: the disjoint classification of nodes in the group hierarchy.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParsingError;

/// Disjoint classification of a [`Group`](crate) node.
///
/// A group's parent, if any, must share its kind (the Kind invariant in
/// the data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    /// A regular, user-facing group.
    Group,
    /// An internal role, e.g. `administrator`.
    Role,
}

impl GroupKind {
    /// The `subject_kind` bit this group kind contributes when it appears
    /// as a rights-roster subject (see §6.1: `4 = Group, 8 = RoleGroup`).
    pub const fn subject_kind_bit(self) -> u8 {
        match self {
            GroupKind::Group => 0b0100,
            GroupKind::Role => 0b1000,
        }
    }
}

impl Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GroupKind::Group => "group",
            GroupKind::Role => "role",
        })
    }
}

impl FromStr for GroupKind {
    type Err = ParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(GroupKind::Group),
            "role" => Ok(GroupKind::Role),
            other => Err(ParsingError::InvalidGroupKind(other.to_owned())),
        }
    }
}

// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! The 64-bit rights bitmask shared by the access-policy engine.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// A set of rights a subject may hold on a policy-protected object.
    ///
    /// `Rights::all()` is the all-ones value denoting full access,
    /// `Rights::empty()` is `NoAccess`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Rights: u64 {
        const VIEW = 1 << 0;
        const CREATE = 1 << 1;
        const CHANGE = 1 << 2;
        const DELETE = 1 << 3;
        const COPY = 1 << 4;
        const MOVE = 1 << 5;
        const MANAGE_RIGHTS = 1 << 6;
    }
}

impl Rights {
    /// `NoAccess`: the empty rights set.
    pub const NO_ACCESS: Rights = Rights::empty();

    /// `FullAccess`: the all-ones value.
    pub const FULL_ACCESS: Rights = Rights::all();

    /// True iff `self` carries at least every bit set in `required`.
    pub fn satisfies(self, required: Rights) -> bool {
        (self & required) == required
    }
}

impl Default for Rights {
    fn default() -> Self {
        Rights::NO_ACCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfies_is_a_subset_check() {
        let granted = Rights::VIEW | Rights::CHANGE;
        assert!(granted.satisfies(Rights::VIEW));
        assert!(granted.satisfies(Rights::VIEW | Rights::CHANGE));
        assert!(!granted.satisfies(Rights::DELETE));
    }

    #[test]
    fn full_access_satisfies_everything() {
        assert!(Rights::FULL_ACCESS.satisfies(Rights::MANAGE_RIGHTS | Rights::DELETE));
    }

    #[test]
    fn no_access_satisfies_only_itself() {
        assert!(Rights::NO_ACCESS.satisfies(Rights::NO_ACCESS));
        assert!(!Rights::NO_ACCESS.satisfies(Rights::VIEW));
    }
}

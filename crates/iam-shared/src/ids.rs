// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Plain integer identifiers shared across the core.
//!
//! Kept free of any storage-layer dependency, the same way
//! `kustos_shared::subject::PolicyUser` wraps a bare [`uuid::Uuid`] without
//! depending on diesel. The `0` value is the documented "none"/"unowned"
//! sentinel for `parent_id` and `owner_id` throughout the data model.

use derive_more::{AsRef, Display, From, Into};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            AsRef,
            Display,
            From,
            Into,
            Serialize,
            Deserialize,
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// The sentinel meaning "no id" (`parent_id = 0`, `owner_id = 0`, ...).
            pub const NONE: $name = $name(0);

            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> i64 {
                self.0
            }

            pub const fn is_none(self) -> bool {
                self.0 == 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NONE
            }
        }
    };
}

id_newtype!(PolicyId);
id_newtype!(GroupId);
id_newtype!(UserId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_none() {
        assert!(PolicyId::NONE.is_none());
        assert!(!PolicyId::new(1).is_none());
    }
}

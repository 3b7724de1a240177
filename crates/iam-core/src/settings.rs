// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Typed settings the embedding application constructs and hands to the
//! managers. The core never sources these from the environment or a file
//! itself — config *sourcing* is out of scope, the typed surface is not.

use std::time::Duration;

/// Settings shared by the three engines.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    /// Used by [`crate::token_manager::TokenManager::create`] when the
    /// caller passes a non-positive ttl.
    pub default_token_ttl: Duration,
    /// Hard deadline for the group-hierarchy acyclicity traversal.
    pub acyclicity_deadline: Duration,
    /// Pre-sizing hint for manager caches. `0` means "no hint".
    pub cache_capacity_hint: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            default_token_ttl: Duration::from_secs(24 * 60 * 60),
            acyclicity_deadline: Duration::from_millis(5),
            cache_capacity_hint: 0,
        }
    }
}

// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Token kind: a 16-bit flag set. Multiple flags may combine in a single
//! token and callbacks are registered against a mask of kinds.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ParsingError;

bitflags! {
    /// Flags describing what a token may be redeemed for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TokenKind: u16 {
        const EMAIL_CONFIRMATION = 1 << 0;
        const EMAIL_CHANGE = 1 << 1;
        const PASSWORD_RESET = 1 << 2;
        const INVITE = 1 << 3;
        const API_ACCESS = 1 << 4;
    }
}

impl TokenKind {
    /// True iff `self` and `mask` share at least one bit — the matching
    /// rule used both for callback lookup and for `List(kind_mask)`.
    pub fn matches(self, mask: TokenKind) -> bool {
        !(self & mask).is_empty()
    }

    pub fn from_bits_checked(bits: u16) -> Result<Self, ParsingError> {
        TokenKind::from_bits(bits).ok_or(ParsingError::InvalidTokenKind(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_is_bitwise_and_non_zero() {
        let combined = TokenKind::EMAIL_CONFIRMATION | TokenKind::INVITE;
        assert!(combined.matches(TokenKind::INVITE));
        assert!(!combined.matches(TokenKind::PASSWORD_RESET));
    }
}

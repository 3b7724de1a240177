// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Opaque, short-lived tokens and the store trait persisting them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iam_shared::TokenKind;

use crate::error::Result;

/// A 32-byte CSPRNG token hash, used both as the value handed to the
/// caller and as the store's primary key.
pub type TokenHash = [u8; 32];

/// An opaque, short-lived, single- or multi-use token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub hash: TokenHash,
    pub kind: TokenKind,
    pub checkin_total: i32,
    pub checkin_remainder: i32,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

/// `-1` denotes unlimited checkins.
pub const UNLIMITED_CHECKINS: i32 = -1;

impl Token {
    /// Usable iff not expired and (unlimited or at least one checkin
    /// remains). `now >= expire_at` is expired — the spec explicitly
    /// calls out the inverted comparison as a bug to avoid.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && (self.checkin_remainder == UNLIMITED_CHECKINS || self.checkin_remainder > 0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.checkin_remainder == 0
    }

    /// Decrements the remainder by one unless it is unlimited, returning
    /// the updated token. Saturates at zero.
    pub fn decrement(mut self) -> Self {
        if self.checkin_remainder > 0 {
            self.checkin_remainder -= 1;
        }
        self
    }
}

/// Persists tokens by hash.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<()>;
    async fn fetch_by_hash(&self, hash: TokenHash) -> Result<Option<Token>>;
    async fn update(&self, token: &Token) -> Result<()>;
    async fn delete(&self, hash: TokenHash) -> Result<()>;
    async fn fetch_all(&self) -> Result<Vec<Token>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(remainder: i32, expire_in_secs: i64) -> Token {
        Token {
            hash: [0u8; 32],
            kind: TokenKind::EMAIL_CONFIRMATION,
            checkin_total: remainder.max(1),
            checkin_remainder: remainder,
            created_at: Utc::now(),
            expire_at: Utc::now() + chrono::Duration::seconds(expire_in_secs),
        }
    }

    #[test]
    fn valid_while_not_expired_and_has_checkins() {
        assert!(token(1, 60).is_valid(Utc::now()));
    }

    #[test]
    fn unlimited_checkins_never_exhaust() {
        let t = token(UNLIMITED_CHECKINS, 60);
        assert!(t.is_valid(Utc::now()));
        assert!(t.decrement().is_valid(Utc::now()));
    }

    #[test]
    fn expired_token_is_invalid_even_with_checkins_left() {
        let t = token(5, -1);
        assert!(t.is_expired(Utc::now()));
        assert!(!t.is_valid(Utc::now()));
    }

    #[test]
    fn zero_remainder_is_exhausted_and_invalid() {
        let t = token(0, 60);
        assert!(t.is_exhausted());
        assert!(!t.is_valid(Utc::now()));
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let t = token(1, 60).decrement();
        assert_eq!(t.checkin_remainder, 0);
        let t = t.decrement();
        assert_eq!(t.checkin_remainder, 0);
    }
}

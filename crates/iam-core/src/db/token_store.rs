// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use iam_database::{Db, OptionalExt};
use iam_shared::TokenKind;

use crate::{
    error::Result,
    schema::token,
    token::{Token, TokenHash, TokenStore},
};

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = token, primary_key(hash))]
struct TokenRow {
    hash: Vec<u8>,
    kind: i16,
    checkin_total: i32,
    checkin_remainder: i32,
    created_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
}

fn row_from_token(token: &Token) -> TokenRow {
    TokenRow {
        hash: token.hash.to_vec(),
        kind: token.kind.bits() as i16,
        checkin_total: token.checkin_total,
        checkin_remainder: token.checkin_remainder,
        created_at: token.created_at,
        expire_at: token.expire_at,
    }
}

fn token_from_row(row: TokenRow) -> Option<Token> {
    let hash: TokenHash = row.hash.try_into().ok()?;
    Some(Token {
        hash,
        kind: TokenKind::from_bits_truncate(row.kind as u16),
        checkin_total: row.checkin_total,
        checkin_remainder: row.checkin_remainder,
        created_at: row.created_at,
        expire_at: row.expire_at,
    })
}

/// Diesel-backed [`TokenStore`].
pub struct PgTokenStore {
    db: Arc<Db>,
}

impl PgTokenStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    #[tracing::instrument(err, skip_all)]
    async fn insert(&self, token_value: &Token) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        diesel::insert_into(token::table)
            .values(&row_from_token(token_value))
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_by_hash(&self, hash: TokenHash) -> Result<Option<Token>> {
        let mut conn = self.db.get_conn().await?;
        let row: Option<TokenRow> = token::table
            .find(hash.to_vec())
            .first(&mut conn)
            .await
            .optional()
            .map_err(iam_database::DatabaseError::from)?;
        Ok(row.and_then(token_from_row))
    }

    #[tracing::instrument(err, skip_all)]
    async fn update(&self, token_value: &Token) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        let row = row_from_token(token_value);
        diesel::update(token::table.find(row.hash.clone()))
            .set(&row)
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn delete(&self, hash: TokenHash) -> Result<()> {
        let mut conn = self.db.get_conn().await?;
        diesel::delete(token::table.find(hash.to_vec()))
            .execute(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(())
    }

    #[tracing::instrument(err, skip_all)]
    async fn fetch_all(&self) -> Result<Vec<Token>> {
        let mut conn = self.db.get_conn().await?;
        let rows: Vec<TokenRow> = token::table
            .load(&mut conn)
            .await
            .map_err(iam_database::DatabaseError::from)?;
        Ok(rows.into_iter().filter_map(token_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> Token {
        let now = Utc::now();
        Token {
            hash: [7u8; 32],
            kind: TokenKind::PASSWORD_RESET,
            checkin_total: 1,
            checkin_remainder: 1,
            created_at: now,
            expire_at: now + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn token_row_round_trips() {
        let token = sample_token();
        let row = row_from_token(&token);
        let rebuilt = token_from_row(row).unwrap();
        assert_eq!(rebuilt, token);
    }

    #[test]
    fn token_from_row_rejects_a_malformed_hash() {
        let row = TokenRow {
            hash: vec![0u8; 31],
            kind: TokenKind::INVITE.bits() as i16,
            checkin_total: 1,
            checkin_remainder: 1,
            created_at: Utc::now(),
            expire_at: Utc::now(),
        };
        assert!(token_from_row(row).is_none());
    }
}

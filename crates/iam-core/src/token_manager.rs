// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! In-memory registry and checkin state machine for tokens.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use iam_shared::TokenKind;
use rand::RngCore;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{check_cancelled, Error, Result},
    settings::CoreSettings,
    token::{Token, TokenHash, TokenStore, UNLIMITED_CHECKINS},
};

/// A single redemption callback, modeled as a trait object per the
/// specification's DESIGN NOTES (closures with captured state become an
/// interface with one method).
#[async_trait]
pub trait TokenCallback: Send + Sync {
    async fn apply(&self, token: &Token) -> Result<()>;
}

#[derive(Clone)]
struct CallbackRecord {
    name: String,
    kind: TokenKind,
    callback: Arc<dyn TokenCallback>,
}

/// In-memory token registry plus a callback dispatch table, shared by many
/// parallel request handlers.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    tokens: RwLock<HashMap<TokenHash, Token>>,
    // A Vec, not a map, because checkin dispatch must run callbacks in
    // registration order (§5 ordering guarantees).
    callbacks: RwLock<Vec<CallbackRecord>>,
    settings: CoreSettings,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, settings: CoreSettings) -> Self {
        Self {
            store,
            tokens: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
            settings,
        }
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn create(
        &self,
        kind: TokenKind,
        ttl: Duration,
        checkins: i32,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        check_cancelled(cancel)?;
        if checkins == 0 {
            return Err(Error::InvalidCheckinCount);
        }

        let ttl = if ttl.is_zero() {
            self.settings.default_token_ttl
        } else {
            ttl
        };

        let mut hash = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut hash);

        if self.store.fetch_by_hash(hash).await?.is_some() {
            return Err(Error::TokenHashCollision);
        }

        let now = Utc::now();
        let token = Token {
            hash,
            kind,
            checkin_total: checkins,
            checkin_remainder: checkins,
            created_at: now,
            expire_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        };

        self.store.insert(&token).await?;
        self.tokens.write().await.insert(hash, token.clone());

        Ok(token)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, hash: TokenHash) -> Result<Option<Token>> {
        if let Some(token) = self.tokens.read().await.get(&hash) {
            return Ok(Some(token.clone()));
        }

        let Some(token) = self.store.fetch_by_hash(hash).await? else {
            return Ok(None);
        };
        self.tokens.write().await.insert(hash, token.clone());
        Ok(Some(token))
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn delete(&self, token: &Token, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        self.store.delete(token.hash).await?;
        self.tokens.write().await.remove(&token.hash);
        Ok(())
    }

    /// The checkin state machine (§4.5): fetch, validate, dispatch
    /// callbacks in registration order, decrement only after every
    /// callback succeeds, and delete the token if the decrement exhausted
    /// it.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn checkin(&self, hash: TokenHash, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let token = self.get(hash).await?.ok_or(Error::TokenNotFound)?;

        let now = Utc::now();
        if token.is_expired(now) {
            return Err(Error::TokenExpired);
        }
        if !token.is_valid(now) {
            return Err(Error::TokenUsedUp);
        }

        let applicable: Vec<CallbackRecord> = self
            .callbacks
            .read()
            .await
            .iter()
            .filter(|c| c.kind.matches(token.kind))
            .cloned()
            .collect();

        if applicable.is_empty() {
            return Err(Error::CallbackNotFound {
                name: format!("<none registered for kind {:?}>", token.kind),
            });
        }

        for record in &applicable {
            record.callback.apply(&token).await?;
        }

        let updated = token.decrement();

        if !updated.is_valid(Utc::now()) {
            self.delete(&updated, cancel).await?;
        } else {
            self.store.update(&updated).await?;
            self.tokens.write().await.insert(updated.hash, updated);
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, callback))]
    pub async fn add_callback(
        &self,
        kind: TokenKind,
        name: String,
        callback: Arc<dyn TokenCallback>,
    ) -> Result<()> {
        let name = name.trim().to_lowercase();
        let mut callbacks = self.callbacks.write().await;
        if callbacks.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateCallback { name });
        }
        callbacks.push(CallbackRecord {
            name,
            kind,
            callback,
        });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_callback(&self, name: &str) -> Result<()> {
        let name = name.trim().to_lowercase();
        let mut callbacks = self.callbacks.write().await;
        let before = callbacks.len();
        callbacks.retain(|c| c.name != name);
        if callbacks.len() == before {
            return Err(Error::CallbackNotFound { name });
        }
        Ok(())
    }

    /// Returns every registered callback name whose kind overlaps `mask`,
    /// in registration order. Names only: callbacks are never exposed by
    /// reference to callers.
    pub async fn get_callbacks(&self, mask: TokenKind) -> Vec<String> {
        self.callbacks
            .read()
            .await
            .iter()
            .filter(|c| c.kind.matches(mask))
            .map(|c| c.name.clone())
            .collect()
    }

    pub async fn get_callback(&self, name: &str) -> Result<TokenKind> {
        let name = name.trim().to_lowercase();
        self.callbacks
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.kind)
            .ok_or(Error::CallbackNotFound { name })
    }

    /// Deletes every cached token failing validation. Failures are logged,
    /// not surfaced, matching the spec's non-critical cleanup semantics.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let stale: Vec<TokenHash> = self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| !t.is_valid(now))
            .map(|t| t.hash)
            .collect();

        let no_cancel = CancellationToken::new();
        for hash in stale {
            if let Some(token) = self.tokens.read().await.get(&hash).cloned() {
                if let Err(err) = self.delete(&token, &no_cancel).await {
                    tracing::warn!(%err, "failed to clean up an invalid token");
                }
            }
        }
    }

    /// Tokens whose `kind` overlaps `kind_mask`, queried in-memory only
    /// (`List` in §6.3).
    pub async fn list(&self, kind_mask: TokenKind) -> Vec<Token> {
        self.tokens
            .read()
            .await
            .values()
            .filter(|t| t.kind.matches(kind_mask))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testutil::InMemoryTokenStore;

    struct FlagCallback(Arc<AtomicUsize>);

    #[async_trait]
    impl TokenCallback for FlagCallback {
        async fn apply(&self, _token: &Token) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingCallback;

    #[async_trait]
    impl TokenCallback for FailingCallback {
        async fn apply(&self, _token: &Token) -> Result<()> {
            Err(Error::TokenNotFound)
        }
    }

    fn manager() -> TokenManager {
        TokenManager::new(Arc::new(InMemoryTokenStore::default()), CoreSettings::default())
    }

    #[tokio::test]
    async fn one_shot_token_checkin_consumes_and_deletes() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        let token = mgr
            .create(TokenKind::EMAIL_CONFIRMATION, Duration::from_secs(10), 1, &cancel)
            .await
            .unwrap();

        let flag = Arc::new(AtomicUsize::new(0));
        mgr.add_callback(
            TokenKind::EMAIL_CONFIRMATION,
            "confirm".into(),
            Arc::new(FlagCallback(flag.clone())),
        )
        .await
        .unwrap();

        mgr.checkin(token.hash, &cancel).await.unwrap();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
        assert!(mgr.get(token.hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn callback_error_leaves_token_intact() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        let token = mgr
            .create(TokenKind::EMAIL_CONFIRMATION, Duration::from_secs(10), 1, &cancel)
            .await
            .unwrap();

        mgr.add_callback(
            TokenKind::EMAIL_CONFIRMATION,
            "confirm".into(),
            Arc::new(FailingCallback),
        )
        .await
        .unwrap();

        let result = mgr.checkin(token.hash, &cancel).await;
        assert!(result.is_err());

        let still_there = mgr.get(token.hash).await.unwrap().unwrap();
        assert_eq!(still_there.checkin_remainder, 1);
    }

    #[tokio::test]
    async fn checkin_without_callback_does_not_consume() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        let token = mgr
            .create(TokenKind::INVITE, Duration::from_secs(10), 3, &cancel)
            .await
            .unwrap();

        let result = mgr.checkin(token.hash, &cancel).await;
        assert!(matches!(result, Err(Error::CallbackNotFound { .. })));

        let still_there = mgr.get(token.hash).await.unwrap().unwrap();
        assert_eq!(still_there.checkin_remainder, 3);
    }

    #[tokio::test]
    async fn zero_checkins_is_rejected() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        let result = mgr
            .create(TokenKind::INVITE, Duration::from_secs(10), 0, &cancel)
            .await;
        assert!(matches!(result, Err(Error::InvalidCheckinCount)));
    }

    #[tokio::test]
    async fn duplicate_callback_name_is_rejected() {
        let mgr = manager();
        mgr.add_callback(TokenKind::INVITE, "x".into(), Arc::new(FailingCallback))
            .await
            .unwrap();
        let result = mgr
            .add_callback(TokenKind::INVITE, "X".into(), Arc::new(FailingCallback))
            .await;
        assert!(matches!(result, Err(Error::DuplicateCallback { .. })));
    }

    #[tokio::test]
    async fn cancelled_token_rejects_create() {
        let mgr = manager();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = mgr
            .create(TokenKind::INVITE, Duration::from_secs(10), 1, &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}

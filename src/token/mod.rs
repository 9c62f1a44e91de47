//! Access token lifecycle cache with single-flight refresh.
//!
//! Tokens are cached per [`ScopeKey`]. When the cached token is missing or
//! inside the safety buffer, exactly one refresh runs per scope; concurrent
//! callers join it and all observe the same token or the same error.
//!
//! # Architecture
//!
//! ```text
//! get_token(scope)
//!      ↓
//! ┌─────────────────────────────────────────┐
//! │  DashMap<ScopeKey, ScopeSlot>  (entry)   │
//! │  1. cached & valid?     → return         │
//! │  2. refresh in flight?  → join it        │
//! │  3. else spawn refresh  → register it    │
//! └─────────────────────────────────────────┘
//!      ↓ (spawned, survives caller cancel)
//! ┌─────────────────────────────────────────┐
//! │  TokenSource::issue                      │
//! │  settle: store token, clear marker       │
//! │  (skipped if invalidated meanwhile)      │
//! └─────────────────────────────────────────┘
//! ```

mod source;


pub use source::HttpTokenSource;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{CredentialScope, ScopeKey};
use crate::error::TokenError;

/// Tokens are treated as expired this long before the server says so
pub const SAFETY_BUFFER_SECS: i64 = 5 * 60;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

/// Token as returned by the issuing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Option<i64>,
}

/// Issues access tokens for a scope (usually the platform's `gettoken`).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn issue(&self, scope: &CredentialScope) -> Result<IssuedToken, TokenError>;
}

/// A cached bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    fn from_issued(issued: IssuedToken, fetched_at: DateTime<Utc>) -> Self {
        let lifetime = issued.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Self {
            token: issued.access_token,
            expires_at: fetched_at + Duration::seconds(lifetime),
        }
    }

    /// Valid iff `now + safety buffer < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(SAFETY_BUFFER_SECS) < self.expires_at
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<CachedToken, TokenError>>>;

/// Per-scope state. `generation` is bumped on every invalidation so a refresh
/// started earlier cannot write back a token the caller asked to discard.
#[derive(Default)]
struct ScopeSlot {
    cached: Option<CachedToken>,
    in_flight: Option<RefreshFuture>,
    generation: u64,
}

/// Access token cache owned by one gateway instance.
pub struct TokenStore {
    slots: Arc<DashMap<ScopeKey, ScopeSlot>>,
    source: Arc<dyn TokenSource>,
}

impl TokenStore {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            source,
        }
    }

    /// Return a valid token for `scope`, refreshing it if needed.
    ///
    /// # Errors
    /// The refresh's [`TokenError`], shared by every caller that joined it.
    /// The cache is left empty so the next call starts over.
    pub async fn get_token(&self, scope: &CredentialScope) -> Result<String, TokenError> {
        let refresh = {
            // Entry lock makes check-cache / check-in-flight / start atomic per scope
            let mut slot = self.slots.entry(scope.cache_key()).or_default();

            if let Some(cached) = slot.cached.as_ref() {
                if cached.is_valid_at(Utc::now()) {
                    return Ok(cached.token.clone());
                }
            }

            match slot.in_flight.as_ref() {
                Some(refresh) => {
                    debug!(corp_id = %scope.corp_id, agent_id = scope.agent_id, "Joining in-flight token refresh");
                    refresh.clone()
                }
                None => {
                    let refresh = self.spawn_refresh(scope, slot.generation);
                    slot.cached = None;
                    slot.in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await.map(|cached| cached.token)
    }

    fn spawn_refresh(&self, scope: &CredentialScope, generation: u64) -> RefreshFuture {
        let source = Arc::clone(&self.source);
        let slots = Arc::clone(&self.slots);
        let scope = scope.clone();

        debug!(corp_id = %scope.corp_id, agent_id = scope.agent_id, "Starting token refresh");

        let handle = tokio::spawn(async move {
            let fetched_at = Utc::now();
            let result = source
                .issue(&scope)
                .await
                .map(|issued| CachedToken::from_issued(issued, fetched_at));

            if let Some(mut slot) = slots.get_mut(&scope.cache_key()) {
                if slot.generation == generation {
                    slot.in_flight = None;
                    if let Ok(token) = &result {
                        slot.cached = Some(token.clone());
                    }
                }
            }

            match &result {
                Ok(token) => info!(
                    corp_id = %scope.corp_id,
                    agent_id = scope.agent_id,
                    expires_at = %token.expires_at,
                    "Access token refreshed"
                ),
                Err(e) => warn!(
                    corp_id = %scope.corp_id,
                    agent_id = scope.agent_id,
                    error = %e,
                    "Access token refresh failed"
                ),
            }

            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(TokenError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    /// Drop the cached token and any in-flight refresh marker for `scope`.
    pub fn invalidate(&self, scope: &CredentialScope) {
        if let Some(mut slot) = self.slots.get_mut(&scope.cache_key()) {
            slot.cached = None;
            slot.in_flight = None;
            slot.generation += 1;
        }
        debug!(corp_id = %scope.corp_id, agent_id = scope.agent_id, "Access token invalidated");
    }

    /// Cached token for `scope`, without refreshing or checking validity.
    pub fn cached(&self, scope: &CredentialScope) -> Option<CachedToken> {
        self.slots
            .get(&scope.cache_key())
            .and_then(|slot| slot.cached.clone())
    }

    /// Forget every scope.
    pub fn clear(&self) {
        for mut slot in self.slots.iter_mut() {
            slot.cached = None;
            slot.in_flight = None;
            slot.generation += 1;
        }
    }
}

//! OAuth state tracking and provider-token cache.
//!
//! Third-party authentication itself is an external collaborator; this
//! module only keeps the short-lived state nonces used during an OAuth
//! handshake and caches the opaque tokens the collaborator issues. Both
//! maps are write-locked and swept by background tasks.

use crate::ctx::OpContext;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const STATE_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct StateEntry {
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub redirect_uri: Option<String>,
}

/// Pending OAuth states, swept every `timeout / 2`.
pub struct OAuthStateStore {
    states: Arc<RwLock<HashMap<String, StateEntry>>>,
    timeout: Duration,
}

impl OAuthStateStore {
    pub fn new(timeout: Duration) -> Self {
        Self { states: Arc::new(RwLock::new(HashMap::new())), timeout }
    }

    /// Issue a fresh state nonce for a provider handshake.
    pub async fn issue(&self, provider: &str, redirect_uri: Option<String>) -> String {
        let state: String =
            rand::thread_rng().sample_iter(&Alphanumeric).take(STATE_LEN).map(char::from).collect();
        self.states.write().await.insert(
            state.clone(),
            StateEntry { provider: provider.to_string(), created_at: Utc::now(), redirect_uri },
        );
        state
    }

    /// Validate and consume a state. Returns `None` for unknown or expired
    /// states; a state can be consumed at most once.
    pub async fn consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states.write().await.remove(state)?;
        let age = Utc::now() - entry.created_at;
        if age > ChronoDuration::from_std(self.timeout).unwrap_or(ChronoDuration::MAX) {
            return None;
        }
        Some(entry)
    }

    /// Remove expired entries; returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let ttl = ChronoDuration::from_std(self.timeout).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now().checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, entry| entry.created_at > cutoff);
        before - states.len()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }

    /// Spawn the sweeper loop; exits when `ctx` is cancelled. The lock is
    /// only held inside `sweep`, never across a tick.
    pub fn spawn_sweeper(self: &Arc<Self>, ctx: OpContext) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = self.timeout / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep().await;
                        if removed > 0 {
                            debug!(removed, "swept expired oauth states");
                        }
                    }
                    _ = ctx.done() => {
                        info!("oauth state sweeper stopping");
                        return;
                    }
                }
            }
        })
    }
}

/// An opaque token issued by the external auth collaborator.
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl ProviderToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Cached provider tokens, keyed by provider name.
pub struct TokenCache {
    tokens: Arc<RwLock<HashMap<String, ProviderToken>>>,
    refresh_buffer: Duration,
}

impl TokenCache {
    pub fn new(refresh_buffer: Duration) -> Self {
        Self { tokens: Arc::new(RwLock::new(HashMap::new())), refresh_buffer }
    }

    pub async fn put(&self, provider: &str, token: ProviderToken) {
        self.tokens.write().await.insert(provider.to_string(), token);
    }

    /// A token that is still valid, or `None` when absent/expired.
    pub async fn get(&self, provider: &str) -> Option<ProviderToken> {
        let tokens = self.tokens.read().await;
        tokens.get(provider).filter(|t| !t.is_expired()).cloned()
    }

    /// Providers whose token expires within the refresh buffer; the caller
    /// drives the refresh against the auth collaborator.
    pub async fn due_for_refresh(&self) -> Vec<String> {
        let buffer = ChronoDuration::from_std(self.refresh_buffer).unwrap_or(ChronoDuration::MAX);
        let horizon = Utc::now().checked_add_signed(buffer).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.tokens
            .read()
            .await
            .iter()
            .filter(|(_, t)| t.expires_at <= horizon)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drop tokens that are already expired; returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired());
        before - tokens.len()
    }

    /// Spawn the expired-token cleanup loop; exits on cancellation.
    pub fn spawn_cleanup(self: &Arc<Self>, ctx: OpContext, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.cleanup_expired().await;
                        if removed > 0 {
                            debug!(removed, "dropped expired provider tokens");
                        }
                    }
                    _ = ctx.done() => {
                        info!("token cleanup stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_is_single_use() {
        let store = OAuthStateStore::new(Duration::from_secs(600));
        let state = store.issue("clickup", None).await;
        assert!(store.consume(&state).await.is_some());
        assert!(store.consume(&state).await.is_none());
    }

    #[tokio::test]
    async fn expired_state_is_rejected_and_swept() {
        let store = OAuthStateStore::new(Duration::ZERO);
        let state = store.issue("sheets", None).await;
        assert!(store.consume(&state).await.is_none());

        store.issue("sheets", None).await;
        assert_eq!(store.sweep().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn expired_tokens_are_invisible_and_cleaned() {
        let cache = TokenCache::new(Duration::from_secs(300));
        cache
            .put(
                "slack",
                ProviderToken {
                    access_token: "tok".to_string(),
                    refresh_token: None,
                    expires_at: Utc::now() - ChronoDuration::seconds(5),
                },
            )
            .await;
        assert!(cache.get("slack").await.is_none());
        assert_eq!(cache.cleanup_expired().await, 1);
    }

    #[tokio::test]
    async fn refresh_buffer_flags_tokens_early() {
        let cache = TokenCache::new(Duration::from_secs(300));
        cache
            .put(
                "sheets",
                ProviderToken {
                    access_token: "tok".to_string(),
                    refresh_token: Some("refresh".to_string()),
                    expires_at: Utc::now() + ChronoDuration::seconds(60),
                },
            )
            .await;
        // Valid now, but inside the 300s refresh window.
        assert!(cache.get("sheets").await.is_some());
        assert_eq!(cache.due_for_refresh().await, vec!["sheets".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancellation() {
        let store = Arc::new(OAuthStateStore::new(Duration::from_secs(10)));
        let (handle, ctx) = OpContext::cancellable();
        let task = store.spawn_sweeper(ctx);
        handle.cancel();
        task.await.expect("sweeper exits cleanly");
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Browser contexts.
//!
//! Each browser context (identified by a cookie) gets its own backend client
//! and session store, mounted on first use. A "full reload" throws the store
//! away and mounts a fresh one over the same backend client, so the session
//! survives but every piece of derived state is rebuilt.

use super::session_store::{SessionStore, Subscription};
use crate::backend::{BackendFactory, IdentityBackend};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One mounted auth core.
pub struct AuthContext {
    backend: Arc<dyn IdentityBackend>,
    store: SessionStore,
    _subscription: Subscription,
    /// Last verification email per address
    resends: DashMap<String, Instant>,
    /// Unix seconds of the last request
    last_seen: AtomicI64,
}

impl AuthContext {
    /// Mount a store over `backend`: subscribe first, then initialize.
    pub async fn mount(backend: Arc<dyn IdentityBackend>) -> Self {
        let store = SessionStore::new(backend.clone());
        let subscription = store.attach();
        store.initialize().await;

        Self {
            backend,
            store,
            _subscription: subscription,
            resends: DashMap::new(),
            last_seen: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn touch(&self) {
        self.last_seen.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let idle = Utc::now().timestamp() - self.last_seen.load(Ordering::Relaxed);
        Duration::from_secs(idle.max(0) as u64)
    }

    /// Note that a verification code just went to `email`.
    pub fn record_send(&self, email: &str) {
        self.resends
            .insert(email.trim().to_ascii_lowercase(), Instant::now());
    }

    /// Record a verification-code send for `email`.
    ///
    /// Returns the seconds left to wait if one was sent within `cooldown`.
    pub fn check_resend(&self, email: &str, cooldown: Duration) -> Result<(), u64> {
        let key = email.trim().to_ascii_lowercase();
        let now = Instant::now();

        match self.resends.entry(key) {
            Entry::Occupied(mut last) => {
                let elapsed = now.saturating_duration_since(*last.get());
                if elapsed < cooldown {
                    return Err((cooldown - elapsed).as_secs().max(1));
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }
}

/// All live browser contexts, keyed by context ID.
pub struct ContextRegistry {
    contexts: DashMap<String, Arc<AuthContext>>,
    factory: BackendFactory,
}

impl ContextRegistry {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            contexts: DashMap::new(),
            factory,
        }
    }

    /// Look up the context for `id`, mounting a new one under a fresh ID when
    /// `id` is missing or unknown.
    pub async fn get_or_mount(&self, id: Option<&str>) -> anyhow::Result<(String, Arc<AuthContext>)> {
        if let Some(id) = id {
            // Touch under the shard lock so a concurrent sweep sees it. Clone
            // out so the lock is not held across an await.
            let existing = self.contexts.get(id).map(|ctx| {
                ctx.touch();
                ctx.clone()
            });
            if let Some(ctx) = existing {
                return Ok((id.to_string(), ctx));
            }
        }

        let id = new_context_id()?;
        let ctx = Arc::new(AuthContext::mount((self.factory)()).await);
        self.contexts.insert(id.clone(), ctx.clone());
        tracing::debug!(contexts = self.contexts.len(), "Mounted browser context");
        Ok((id, ctx))
    }

    /// Full reload: replace the store for `id`, keeping its backend client.
    pub async fn reload(&self, id: &str) -> Option<Arc<AuthContext>> {
        let backend = self.contexts.get(id).map(|ctx| ctx.backend.clone())?;
        let ctx = Arc::new(AuthContext::mount(backend).await);
        // Dropping the old context ends its event pump.
        self.contexts.insert(id.to_string(), ctx.clone());
        tracing::debug!("Reloaded browser context");
        Some(ctx)
    }

    pub fn remove(&self, id: &str) {
        self.contexts.remove(id);
    }

    /// Drop contexts idle longer than `max_idle`; returns how many went.
    ///
    /// A request that outlives `max_idle` keeps its `Arc` and finishes on the
    /// evicted store; the browser gets a fresh context on its next visit.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|_, ctx| ctx.idle_for() <= max_idle);
        before.saturating_sub(self.contexts.len())
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// 256-bit random context ID, base64url.
pub fn new_context_id() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate context ID"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryIdentityServer;

    fn registry() -> ContextRegistry {
        let server = MemoryIdentityServer::new();
        ContextRegistry::new(Arc::new(move || server.client() as Arc<dyn IdentityBackend>))
    }

    #[test]
    fn test_context_ids_are_unique() {
        let a = new_context_id().unwrap();
        let b = new_context_id().unwrap();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_unknown_id_gets_fresh_context() {
        let registry = registry();
        let (id, _) = registry.get_or_mount(Some("forged")).await.unwrap();
        assert_ne!(id, "forged");

        let (same, _) = registry.get_or_mount(Some(&id)).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_resend_cooldown() {
        let registry = registry();
        let (_, ctx) = registry.get_or_mount(None).await.unwrap();
        let cooldown = Duration::from_secs(60);

        assert!(ctx.check_resend("a@x.com", cooldown).is_ok());
        let wait = ctx.check_resend("A@X.com", cooldown).unwrap_err();
        assert!(wait > 0 && wait <= 60);
        assert!(ctx.check_resend("b@x.com", cooldown).is_ok());

        ctx.record_send("c@x.com");
        assert!(ctx.check_resend("c@x.com", cooldown).is_err());
    }

    #[tokio::test]
    async fn test_lookup_refreshes_idle_clock() {
        let registry = registry();
        let (id, ctx) = registry.get_or_mount(None).await.unwrap();
        let stale = Utc::now().timestamp() - 600;

        ctx.last_seen.store(stale, Ordering::Relaxed);
        registry.get_or_mount(Some(&id)).await.unwrap();
        assert_eq!(registry.evict_idle(Duration::from_secs(60)), 0);

        ctx.last_seen.store(stale, Ordering::Relaxed);
        assert_eq!(registry.evict_idle(Duration::from_secs(60)), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_recent() {
        let registry = registry();
        registry.get_or_mount(None).await.unwrap();
        assert_eq!(registry.evict_idle(Duration::from_secs(60)), 0);
        assert_eq!(registry.len(), 1);
    }
}

//! Process-wide bearer token cache with single-flight refresh.
//!
//! Readers take a short `RwLock` read of the cached token. Network exchanges
//! happen only while holding `refresh_lock`, so at most one is in flight.
//! The tokio mutex guard is released when its future is dropped, which keeps
//! cancellation from wedging the store.

use crate::auth::{AccessToken, AuthClient};
use ragbot_core::error::AuthError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub struct TokenStore {
    auth: Arc<dyn AuthClient>,
    current: RwLock<Option<AccessToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped after every successful exchange.
    generation: AtomicU64,
}

impl TokenStore {
    pub fn new(auth: Arc<dyn AuthClient>) -> Self {
        Self {
            auth,
            current: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The cached token, if any.
    pub fn cached(&self) -> Option<AccessToken> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Return the cached token, exchanging credentials only when none exists.
    ///
    /// Concurrent callers that find the cache empty share one exchange.
    pub async fn get_or_refresh(&self) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.cached() {
            debug!("Token obtained by a concurrent caller");
            return Ok(token);
        }

        self.exchange_locked().await
    }

    /// Replace the cached token with a freshly exchanged one.
    ///
    /// A caller that queued behind an exchange which completed after the
    /// caller arrived reuses that result instead of issuing another one.
    /// On failure the previous token stays cached.
    pub async fn force_refresh(&self) -> Result<AccessToken, AuthError> {
        let seen = self.generation.load(Ordering::Acquire);

        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen
            && let Some(token) = self.cached()
        {
            debug!("Reusing token refreshed while waiting");
            return Ok(token);
        }

        self.exchange_locked().await
    }

    /// Caller must hold `refresh_lock`.
    async fn exchange_locked(&self) -> Result<AccessToken, AuthError> {
        match self.auth.exchange().await {
            Ok(token) => {
                *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                info!(generation, "Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Access token refresh failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Hands out `token-1`, `token-2`, … after a short delay.
    struct CountingAuth {
        calls: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl CountingAuth {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_after: None,
            })
        }

        fn failing_after(n: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_after: Some(n),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthClient for CountingAuth {
        async fn exchange(&self) -> Result<AccessToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_after.is_some_and(|limit| n > limit) {
                return Err(AuthError::new("status 500: unavailable"));
            }
            Ok(AccessToken::new(format!("token-{n}")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_use_exchanges_once() {
        let auth = CountingAuth::new();
        let store = TokenStore::new(auth.clone());

        let results =
            futures::future::join_all((0..16).map(|_| store.get_or_refresh())).await;

        assert_eq!(auth.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().expose(), "token-1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_use_across_tasks_exchanges_once() {
        let auth = CountingAuth::new();
        let store = Arc::new(TokenStore::new(auth.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_refresh().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_token_is_reused() {
        let auth = CountingAuth::new();
        let store = TokenStore::new(auth.clone());

        store.get_or_refresh().await.unwrap();
        store.get_or_refresh().await.unwrap();
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_always_exchanges() {
        let auth = CountingAuth::new();
        let store = TokenStore::new(auth.clone());

        store.get_or_refresh().await.unwrap();
        let token = store.force_refresh().await.unwrap();
        assert_eq!(token.expose(), "token-2");
        assert_eq!(store.cached().unwrap().expose(), "token-2");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_force_refreshes_share_one_exchange() {
        let auth = CountingAuth::new();
        let store = TokenStore::new(auth.clone());
        store.get_or_refresh().await.unwrap();

        let (a, b) = tokio::join!(store.force_refresh(), store.force_refresh());
        assert_eq!(a.unwrap().expose(), "token-2");
        assert_eq!(b.unwrap().expose(), "token-2");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_token() {
        let auth = CountingAuth::failing_after(1);
        let store = TokenStore::new(auth.clone());

        store.get_or_refresh().await.unwrap();
        let err = store.force_refresh().await.unwrap_err();
        assert!(err.cause.contains("500"));
        assert_eq!(store.cached().unwrap().expose(), "token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_exchange_caches_nothing() {
        let auth = CountingAuth::failing_after(0);
        let store = TokenStore::new(auth.clone());

        assert!(store.get_or_refresh().await.is_err());
        assert!(store.cached().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_refresh_releases_lock() {
        let auth = CountingAuth::new();
        let store = TokenStore::new(auth.clone());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), store.get_or_refresh()).await;
        assert!(cancelled.is_err());
        assert!(store.cached().is_none());

        let token = store.get_or_refresh().await.unwrap();
        assert_eq!(token.expose(), "token-2");
    }
}

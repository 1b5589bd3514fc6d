//! Access token lifecycle
//!
//! `TokenManager` owns the live credential set. A token is either valid
//! (now <= expires_at) or expired (now > expires_at); the only way back from
//! expired is a successful refresh round trip:
//!
//! 1. POST the refresh token to the token endpoint
//! 2. Merge the response with the unchanged client ID/secret
//! 3. Save the merged set through the store
//! 4. Reload the in-memory set from the store
//!
//! Reloading instead of assigning keeps the persisted and in-memory views
//! from drifting apart. The merged set is validated before anything is
//! written, and a failure before or during the save leaves the in-memory set
//! as it was, so the next `get_access_token()` retries the refresh. If the
//! save succeeds but the reload fails, the in-memory set takes the value that
//! was just saved, since that is what the store now holds.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::TOKEN_ENDPOINT;
use crate::credentials::{CredentialSet, CredentialStore};
use crate::error::{Error, Result};
use crate::token;

/// Holds the credential set and refreshes the access token on demand.
///
/// The set sits behind an async mutex that stays locked for the whole
/// refresh round trip, so concurrent callers within one process wait for a
/// single refresh instead of racing the token endpoint. Separate processes
/// sharing one credential file are not coordinated.
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    http_client: reqwest::Client,
    token_endpoint: String,
    credentials: Mutex<CredentialSet>,
}

impl TokenManager {
    /// Load the credential set from `store`.
    ///
    /// Fails with `Error::Configuration` if the store has no usable record;
    /// no manager is created in that case. Timeouts for the refresh call are
    /// whatever `http_client` was built with.
    pub async fn load(
        store: Arc<dyn CredentialStore>,
        http_client: reqwest::Client,
    ) -> Result<Self> {
        let credentials = store.load().await?;
        let expired = credentials.is_expired_at(now_secs());
        info!(
            client_id = credentials.client_id,
            expires_at = credentials.expires_at,
            expired,
            "token manager initialized"
        );
        Ok(Self {
            store,
            http_client,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            credentials: Mutex::new(credentials),
        })
    }

    /// Send refresh requests to `endpoint` instead of the Strava default.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Whether the cached access token has lapsed.
    pub async fn is_expired(&self) -> bool {
        self.credentials.lock().await.is_expired_at(now_secs())
    }

    /// Snapshot of the current credential set.
    pub async fn credentials(&self) -> CredentialSet {
        self.credentials.lock().await.clone()
    }

    /// Run a refresh round trip regardless of the current expiry.
    pub async fn refresh_access_token(&self) -> Result<()> {
        let mut credentials = self.credentials.lock().await;
        self.refresh_locked(&mut credentials).await
    }

    /// Return a valid access token, refreshing first if the cached one expired.
    ///
    /// Call this once per outbound request. Refresh failures propagate; the
    /// stale token is never handed out.
    pub async fn get_access_token(&self) -> Result<String> {
        let mut credentials = self.credentials.lock().await;
        if credentials.is_expired_at(now_secs()) {
            debug!(
                expires_at = credentials.expires_at,
                "access token expired, refreshing"
            );
            self.refresh_locked(&mut credentials).await?;
        }
        Ok(credentials.access_token.expose().clone())
    }

    async fn refresh_locked(&self, current: &mut CredentialSet) -> Result<()> {
        info!(client_id = current.client_id, "refreshing access token");

        let response =
            match token::refresh_token(&self.http_client, &self.token_endpoint, current).await {
                Ok(response) => response,
                Err(e) => {
                    record_refresh(refresh_outcome(&e));
                    warn!(error = %e, "token refresh failed, keeping previous credentials");
                    return Err(e);
                }
            };

        let merged = current.with_refreshed_tokens(response);
        if let Err(e) = merged.validate() {
            record_refresh("rejected");
            warn!(error = %e, "token endpoint returned unusable credentials");
            return Err(e);
        }

        if let Err(e) = self.store.save(&merged).await {
            record_refresh("persist");
            warn!(error = %e, "failed to persist refreshed credentials");
            return Err(e);
        }

        let reloaded = match self.store.load().await {
            Ok(reloaded) => reloaded,
            Err(e) => {
                record_refresh("persist");
                warn!(error = %e, "failed to reload refreshed credentials, keeping saved set");
                *current = merged;
                return Err(e);
            }
        };

        *current = reloaded;
        record_refresh("success");
        info!(expires_at = current.expires_at, "access token refreshed");
        Ok(())
    }
}

fn refresh_outcome(error: &Error) -> &'static str {
    match error {
        Error::TokenRefresh { .. } | Error::InvalidResponse(_) => "rejected",
        Error::Network(_) => "network",
        Error::Configuration(_) | Error::Io(_) => "persist",
    }
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("strava_token_refresh_total", "outcome" => outcome).increment(1);
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{EnvFileStore, MemoryStore, StoreFuture};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use mockito::Matcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that loads once successfully, then fails saves or later loads.
    struct FailingStore {
        inner: MemoryStore,
        fail_save: bool,
        fail_reload: bool,
        loads: AtomicUsize,
    }

    impl FailingStore {
        fn new(credentials: CredentialSet, fail_save: bool, fail_reload: bool) -> Self {
            Self {
                inner: MemoryStore::new(credentials),
                fail_save,
                fail_reload,
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl CredentialStore for FailingStore {
        fn load(&self) -> StoreFuture<'_, CredentialSet> {
            let first = self.loads.fetch_add(1, Ordering::SeqCst) == 0;
            if self.fail_reload && !first {
                return Box::pin(async {
                    Err::<CredentialSet, Error>(Error::Configuration("store unreadable".into()))
                });
            }
            self.inner.load()
        }

        fn save<'a>(&'a self, credentials: &'a CredentialSet) -> StoreFuture<'a, ()> {
            if self.fail_save {
                return Box::pin(async { Err::<(), Error>(Error::Io("disk full".into())) });
            }
            self.inner.save(credentials)
        }
    }

    async fn mock_refresh(server: &mut mockito::ServerGuard, expect: usize) -> mockito::Mock {
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(REFRESHED_BODY)
            .expect(expect)
            .create_async()
            .await
    }

    async fn failing_manager(
        server: &mockito::ServerGuard,
        store: Arc<FailingStore>,
    ) -> TokenManager {
        TokenManager::load(store, reqwest::Client::new())
            .await
            .unwrap()
            .with_token_endpoint(format!("{}/oauth/token", server.url()))
    }

    const FAR_FUTURE: u64 = 9999999999;
    const REFRESHED_BODY: &str =
        r#"{"access_token":"new","refresh_token":"new_r","expires_at":9999999999}"#;

    fn test_credentials(expires_at: u64) -> CredentialSet {
        CredentialSet {
            client_id: 123,
            client_secret: "secret".into(),
            access_token: "access123".into(),
            refresh_token: "refresh123".into(),
            expires_at,
        }
    }

    async fn memory_manager(
        server: &mockito::ServerGuard,
        expires_at: u64,
    ) -> (TokenManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(test_credentials(expires_at)));
        let manager = TokenManager::load(store.clone(), reqwest::Client::new())
            .await
            .unwrap()
            .with_token_endpoint(format!("{}/oauth/token", server.url()));
        (manager, store)
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .expect(0)
            .create_async()
            .await;

        let (manager, store) = memory_manager(&server, FAR_FUTURE).await;
        assert!(!manager.is_expired().await);
        assert_eq!(manager.get_access_token().await.unwrap(), "access123");

        mock.assert_async().await;
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_exactly_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(REFRESHED_BODY)
            .expect(1)
            .create_async()
            .await;

        let (manager, store) = memory_manager(&server, 1).await;
        assert!(manager.is_expired().await);

        assert_eq!(manager.get_access_token().await.unwrap(), "new");
        // The refreshed token is far in the future, so no second round trip
        assert_eq!(manager.get_access_token().await.unwrap(), "new");

        mock.assert_async().await;
        assert_eq!(store.save_count(), 1);
        assert!(!manager.is_expired().await);
    }

    #[tokio::test]
    async fn refresh_keeps_client_credentials_and_adopts_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded(
                "refresh_token".into(),
                "refresh123".into(),
            ))
            .with_status(200)
            .with_body(REFRESHED_BODY)
            .create_async()
            .await;

        let (manager, _store) = memory_manager(&server, 1).await;
        let before = manager.credentials().await;
        manager.refresh_access_token().await.unwrap();
        let after = manager.credentials().await;

        assert_eq!(after.client_id, before.client_id);
        assert_eq!(after.client_secret, before.client_secret);
        assert_eq!(after.access_token.expose(), "new");
        assert_eq!(after.refresh_token.expose(), "new_r");
        assert_eq!(after.expires_at, FAR_FUTURE);
    }

    #[tokio::test]
    async fn refreshed_credentials_round_trip_through_env_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(REFRESHED_BODY)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "CLIENT_ID=123\nCLIENT_SECRET=secret\nACCESS_TOKEN=access123\n\
             REFRESH_TOKEN=refresh123\nEXPIRES_AT=1\n",
        )
        .unwrap();

        let manager = TokenManager::load(
            Arc::new(EnvFileStore::new(path.clone())),
            reqwest::Client::new(),
        )
        .await
        .unwrap()
        .with_token_endpoint(format!("{}/oauth/token", server.url()));

        assert_eq!(manager.get_access_token().await.unwrap(), "new");

        let reloaded = EnvFileStore::new(path.clone()).load().await.unwrap();
        assert_eq!(reloaded, manager.credentials().await);
        assert_eq!(reloaded.expires_at, FAR_FUTURE);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("EXPIRES_AT=\"9999999999\"\n"), "got: {contents}");
        assert!(contents.contains("CLIENT_SECRET=\"secret\"\n"), "got: {contents}");
    }

    #[tokio::test]
    async fn far_future_env_file_needs_no_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "CLIENT_ID=123\nCLIENT_SECRET=secret\nACCESS_TOKEN=access123\n\
             REFRESH_TOKEN=refresh123\nEXPIRES_AT=9999999999\n",
        )
        .unwrap();

        let manager =
            TokenManager::load(Arc::new(EnvFileStore::new(path)), reqwest::Client::new())
                .await
                .unwrap()
                .with_token_endpoint(format!("{}/oauth/token", server.url()));

        assert_eq!(manager.get_access_token().await.unwrap(), "access123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_state_untouched() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"message":"Bad Request"}"#)
            .create_async()
            .await;

        let (manager, store) = memory_manager(&server, 1).await;
        let before = manager.credentials().await;

        let err = manager.get_access_token().await.unwrap_err();
        assert!(
            matches!(err, Error::TokenRefresh { status: 400, ref body } if body.contains("Bad Request")),
            "got {err:?}"
        );
        assert!(!err.is_fatal());

        assert_eq!(manager.credentials().await, before);
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.load().await.unwrap(), before);
    }

    #[tokio::test]
    async fn failed_refresh_is_retried_on_next_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let (manager, _store) = memory_manager(&server, 1).await;
        assert!(manager.get_access_token().await.is_err());
        assert!(manager.get_access_token().await.is_err());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn network_failure_surfaces_as_network_error() {
        let store = Arc::new(MemoryStore::new(test_credentials(1)));
        let manager = TokenManager::load(store.clone(), reqwest::Client::new())
            .await
            .unwrap()
            .with_token_endpoint("http://127.0.0.1:1/oauth/token");

        let err = manager.get_access_token().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
        assert_eq!(manager.credentials().await, test_credentials(1));
    }

    #[tokio::test]
    async fn load_fails_fast_without_credentials() {
        let result =
            TokenManager::load(Arc::new(MemoryStore::default()), reqwest::Client::new()).await;
        match result {
            Err(err) => assert!(err.is_fatal()),
            Ok(_) => panic!("manager must not be created without credentials"),
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(REFRESHED_BODY)
            .expect(1)
            .create_async()
            .await;

        let (manager, _store) = memory_manager(&server, 1).await;
        let manager = Arc::new(manager);

        let mut handles = vec![];
        for _ in 0..5 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.get_access_token().await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "new");
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn save_failure_keeps_previous_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = mock_refresh(&mut server, 2).await;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let store = Arc::new(FailingStore::new(test_credentials(1), true, false));
        let manager = failing_manager(&server, store.clone()).await;

        let err = manager.get_access_token().await.unwrap_err();
        assert!(matches!(err, Error::Io(ref m) if m.contains("disk full")), "got {err:?}");
        assert_eq!(manager.credentials().await, test_credentials(1));
        assert!(manager.is_expired().await);
        assert_eq!(store.inner.load().await.unwrap(), test_credentials(1));

        // Still expired, so the next call refreshes again
        assert!(manager.get_access_token().await.is_err());
        mock.assert_async().await;

        let output = handle.render();
        assert!(
            output.contains("strava_token_refresh_total{outcome=\"persist\"} 2"),
            "got: {output}"
        );
    }

    #[tokio::test]
    async fn reload_failure_adopts_saved_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = mock_refresh(&mut server, 1).await;

        let store = Arc::new(FailingStore::new(test_credentials(1), false, true));
        let manager = failing_manager(&server, store.clone()).await;

        let err = manager.get_access_token().await.unwrap_err();
        assert!(err.is_fatal(), "got {err:?}");

        let saved = store.inner.load().await.unwrap();
        assert_eq!(saved.access_token.expose(), "new");
        assert_eq!(manager.credentials().await, saved);

        // Memory matches the store, and the new token is valid
        assert_eq!(manager.get_access_token().await.unwrap(), "new");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unusable_token_response_is_never_saved() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token":"","refresh_token":"new_r","expires_at":9999999999}"#)
            .create_async()
            .await;

        let (manager, store) = memory_manager(&server, 1).await;
        let err = manager.get_access_token().await.unwrap_err();

        assert!(matches!(err, Error::InvalidResponse(ref m) if m.contains("ACCESS_TOKEN")), "got {err:?}");
        assert_eq!(store.save_count(), 0);
        assert_eq!(manager.credentials().await, test_credentials(1));
    }

    #[tokio::test]
    async fn refresh_outcomes_are_counted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .create_async()
            .await;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let (manager, _store) = memory_manager(&server, 1).await;
        let _ = manager.get_access_token().await;

        let output = handle.render();
        assert!(
            output.contains("strava_token_refresh_total{outcome=\"rejected\"} 1"),
            "got: {output}"
        );
    }
}

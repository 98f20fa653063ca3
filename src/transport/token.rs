//! Single-slot bearer token cache.
//!
//! The slot moves through `Empty -> Published(generation n) -> Published(n + 1)`.
//! Readers load the published value without locking. Refreshes are
//! serialised by `refresh_lock`, so at most one fetch is in flight; a caller
//! that waited on the lock and finds a newer generation than the one it saw
//! uses that instead of fetching again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OAuthCredentials;
use crate::error::TransportError;

use super::{
    CORRELATION_HEADER, HttpReply, HttpTransport, body_preview, correlation_id, endpoint_url,
};

/// Placeholder token used until a real one has been fetched.
pub const NO_TOKEN: &str = "NO_TOKEN";

/// Service URL plus the bearer token valid for it. Replaced wholesale on
/// refresh, never mutated.
#[derive(Clone)]
pub struct EndpointInfo {
    pub endpoint: String,
    pub token: SecretString,
}

impl EndpointInfo {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: SecretString::from(token.into()),
        }
    }
}

impl fmt::Debug for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointInfo")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Obtain a fresh endpoint/token pair.
    ///
    /// A rejected credential must surface as
    /// [`TransportError::AuthFailure`] so callers can tell it apart from a
    /// network problem.
    async fn fetch(&self) -> Result<EndpointInfo, TransportError>;
}

/// OAuth password grant against `{auth_endpoint}/services/oauth2/token`.
pub struct PasswordGrant {
    transport: HttpTransport,
    token_url: Url,
    credentials: OAuthCredentials,
}

#[derive(Deserialize)]
struct TokenResponse {
    instance_url: String,
    access_token: String,
}

impl PasswordGrant {
    /// # Errors
    ///
    /// Returns an error when the token URL cannot be derived from
    /// `auth_endpoint`.
    pub fn new(
        transport: HttpTransport,
        auth_endpoint: &Url,
        credentials: OAuthCredentials,
    ) -> Result<Self, TransportError> {
        let token_url = endpoint_url(auth_endpoint, "services/oauth2/token")?;
        Ok(Self {
            transport,
            token_url,
            credentials,
        })
    }
}

#[async_trait]
impl TokenFetcher for PasswordGrant {
    async fn fetch(&self) -> Result<EndpointInfo, TransportError> {
        let correlation_id = correlation_id();
        let form = [
            ("grant_type", "password"),
            ("client_id", self.credentials.client_id.as_str()),
            (
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            ),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.expose_secret()),
        ];
        let response = self
            .transport
            .client()
            .post(self.token_url.clone())
            .header(CORRELATION_HEADER, &correlation_id)
            .form(&form)
            .send()
            .await?;
        let reply = HttpReply::read(response).await?;
        if reply.status != reqwest::StatusCode::OK {
            return Err(TransportError::AuthFailure {
                status: reply.status,
                body: reply.preview(),
            });
        }
        let parsed: TokenResponse =
            serde_json::from_str(&reply.body).map_err(|err| TransportError::Json {
                message: format!("{err}; body preview: {}", body_preview(&reply.body)),
            })?;
        debug!(
            provider = self.transport.provider(),
            %correlation_id,
            instance_url = %parsed.instance_url,
            "fetched access token"
        );
        Ok(EndpointInfo::new(parsed.instance_url, parsed.access_token))
    }
}

struct Published {
    info: Arc<EndpointInfo>,
    fetched_at: Instant,
    generation: u64,
}

pub struct TokenCache {
    fetcher: Box<dyn TokenFetcher>,
    slot: ArcSwapOption<Published>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    fallback: Option<Arc<EndpointInfo>>,
    refresh_period: Duration,
    fetch_timeout: Duration,
}

impl TokenCache {
    /// `fallback` is served when no fetch has succeeded yet and the current
    /// one fails. A cached token older than `refresh_period` is refreshed on
    /// the next read.
    pub fn new(
        fetcher: Box<dyn TokenFetcher>,
        fallback: Option<EndpointInfo>,
        refresh_period: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            slot: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            fallback: fallback.map(Arc::new),
            refresh_period,
            fetch_timeout,
        }
    }

    /// Current endpoint info; with `refresh` a new token is fetched first.
    ///
    /// On fetch failure the last published value is returned, then the
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns the fetch error only when there is nothing to fall back to.
    pub async fn endpoint_info(&self, refresh: bool) -> Result<Arc<EndpointInfo>, TransportError> {
        let seen = self.slot.load_full();
        if let Some(current) = &seen {
            if !refresh && current.fetched_at.elapsed() < self.refresh_period {
                return Ok(Arc::clone(&current.info));
            }
        }

        let _guard = match (&seen, refresh) {
            // Stale but usable: if someone else is already refreshing, keep
            // serving the old token rather than waiting.
            (Some(current), false) => match self.refresh_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => return Ok(Arc::clone(&current.info)),
            },
            _ => self.refresh_lock.lock().await,
        };

        let seen_generation = seen.as_ref().map(|published| published.generation);
        if let Some(current) = self.slot.load_full() {
            if Some(current.generation) != seen_generation {
                return Ok(Arc::clone(&current.info));
            }
        }

        match self.fetch_with_timeout().await {
            Ok(info) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let info = Arc::new(info);
                self.slot.store(Some(Arc::new(Published {
                    info: Arc::clone(&info),
                    fetched_at: Instant::now(),
                    generation,
                })));
                info!(generation, endpoint = %info.endpoint, "token refreshed");
                Ok(info)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, falling back");
                self.slot
                    .load_full()
                    .map(|published| Arc::clone(&published.info))
                    .or_else(|| self.fallback.clone())
                    .ok_or(err)
            }
        }
    }

    async fn fetch_with_timeout(&self) -> Result<EndpointInfo, TransportError> {
        let started = Instant::now();
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TokenTimeout {
                elapsed_ms: started.elapsed().as_millis(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use secrecy::ExposeSecret;

    use super::{EndpointInfo, NO_TOKEN, TokenCache, TokenFetcher};
    use crate::error::TransportError;

    struct Sequence {
        calls: Arc<AtomicUsize>,
        fail_after: usize,
        delay: Duration,
    }

    #[async_trait]
    impl TokenFetcher for Sequence {
        async fn fetch(&self) -> Result<EndpointInfo, TransportError> {
            tokio::time::sleep(self.delay).await;
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.fail_after {
                return Err(TransportError::AuthFailure {
                    status: StatusCode::BAD_REQUEST,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(EndpointInfo::new("https://instance", format!("token-{call}")))
        }
    }

    fn cache(fail_after: usize, delay: Duration, calls: &Arc<AtomicUsize>) -> TokenCache {
        TokenCache::new(
            Box::new(Sequence {
                calls: Arc::clone(calls),
                fail_after,
                delay,
            }),
            Some(EndpointInfo::new("https://fallback", NO_TOKEN)),
            Duration::from_secs(300),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn caches_until_refresh_is_forced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache(10, Duration::ZERO, &calls);
        let first = cache.endpoint_info(false).await.unwrap();
        let again = cache.endpoint_info(false).await.unwrap();
        assert_eq!(first.token.expose_secret(), "token-1");
        assert_eq!(again.token.expose_secret(), "token-1");

        let refreshed = cache.endpoint_info(true).await.unwrap();
        assert_eq!(refreshed.token.expose_secret(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_good_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache(1, Duration::ZERO, &calls);
        assert_eq!(
            cache.endpoint_info(false).await.unwrap().token.expose_secret(),
            "token-1"
        );
        let after_failure = cache.endpoint_info(true).await.unwrap();
        assert_eq!(after_failure.token.expose_secret(), "token-1");
    }

    #[tokio::test]
    async fn falls_back_to_default_before_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache(0, Duration::ZERO, &calls);
        let info = cache.endpoint_info(false).await.unwrap();
        assert_eq!(info.token.expose_secret(), NO_TOKEN);
        assert_eq!(info.endpoint, "https://fallback");
    }

    #[tokio::test]
    async fn surfaces_auth_failure_without_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = TokenCache::new(
            Box::new(Sequence {
                calls,
                fail_after: 0,
                delay: Duration::ZERO,
            }),
            None,
            Duration::from_secs(300),
            Duration::from_secs(1),
        );
        match cache.endpoint_info(false).await {
            Err(TransportError::AuthFailure { status, .. }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_fetch_times_out_to_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = TokenCache::new(
            Box::new(Sequence {
                calls,
                fail_after: 10,
                delay: Duration::from_millis(500),
            }),
            Some(EndpointInfo::new("https://fallback", NO_TOKEN)),
            Duration::from_secs(300),
            Duration::from_millis(20),
        );
        let info = cache.endpoint_info(true).await.unwrap();
        assert_eq!(info.token.expose_secret(), NO_TOKEN);
    }

    #[tokio::test]
    async fn concurrent_forced_refreshes_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(cache(10, Duration::from_millis(50), &calls));
        cache.endpoint_info(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.endpoint_info(true).await })
            })
            .collect();
        for handle in handles {
            let info = handle.await.unwrap().unwrap();
            assert_eq!(info.token.expose_secret(), "token-2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

use std::path::Path;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Certificate, Identity, Proxy, StatusCode};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{ProxySettings, TlsSettings};
use crate::error::TransportError;

pub mod token;

pub use token::{EndpointInfo, PasswordGrant, TokenCache, TokenFetcher};

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const BODY_PREVIEW_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub proxy: Option<ProxySettings>,
    pub tls: TlsSettings,
}

/// Shared, connection-pooled HTTPS client for one provider.
///
/// Cloning is cheap; all clones share the same pool.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    provider: &'static str,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build the pooled client for `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy address is unusable, the TLS material
    /// cannot be read or parsed, or the client fails to build.
    pub fn new(provider: &'static str, settings: &TransportSettings) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(concat!("argus-notify/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(30));

        if let Some(proxy) = &settings.proxy {
            let address = format!("http://{}:{}", proxy.host, proxy.port);
            let proxy = Proxy::all(&address).map_err(|err| TransportError::InvalidUrl {
                url: address.clone(),
                message: err.to_string(),
            })?;
            debug!(provider, proxy = %address, "routing requests through proxy");
            builder = builder.proxy(proxy);
        }

        let tls = &settings.tls;
        if let Some(path) = &tls.ca_bundle {
            let pem = read_pem(path)?;
            let certificate = Certificate::from_pem(&pem).map_err(|err| TransportError::Tls {
                path: path.clone(),
                message: err.to_string(),
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        if let Some(path) = &tls.identity_pem {
            let pem = read_pem(path)?;
            let identity = Identity::from_pem(&pem).map_err(|err| TransportError::Tls {
                path: path.clone(),
                message: err.to_string(),
            })?;
            builder = builder.identity(identity);
        }
        if tls.ca_bundle.is_none() && tls.trust_all {
            // No trust store configured: accept any certificate.
            warn!(
                provider,
                "TLS certificate verification is disabled; configure tls.ca_bundle or set tls.trust_all = false"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|source| TransportError::Client { source })?;
        Ok(Self { provider, http })
    }

    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|err| TransportError::Tls {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// `{base}/{path}`. Unlike [`Url::join`], a path prefix on `base` is kept
/// whether or not it ends with a slash.
///
/// # Errors
///
/// Returns an error when the combined string is not a valid URL.
pub fn endpoint_url(base: &Url, path: &str) -> Result<Url, TransportError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|err| TransportError::InvalidUrl {
        message: err.to_string(),
        url: joined,
    })
}

/// Fresh id for the `x-correlation-id` header of one attempt.
#[must_use]
pub fn correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Status and body of a completed HTTP exchange.
#[derive(Clone, Debug)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

impl HttpReply {
    /// Drain the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the body fails or times out.
    pub async fn read(response: reqwest::Response) -> Result<Self, TransportError> {
        let status = response.status();
        let body = response.text().await?;
        Ok(Self { status, body })
    }

    #[must_use]
    pub fn preview(&self) -> String {
        body_preview(&self.body)
    }
}

pub(crate) fn body_preview(body: &str) -> String {
    if body.is_empty() {
        return "<empty>".to_string();
    }
    let mut preview: String = body.chars().take(BODY_PREVIEW_LIMIT).collect();
    if body.chars().count() > BODY_PREVIEW_LIMIT {
        preview.push_str("...");
    }
    preview.replace('\n', "\\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use url::Url;

    use super::{HttpTransport, TransportSettings, body_preview, endpoint_url};
    use crate::config::{ProxySettings, TlsSettings};
    use crate::error::TransportError;

    fn settings(tls: TlsSettings) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            pool_max_idle_per_host: 2,
            proxy: Some(ProxySettings {
                host: "proxy.internal".to_string(),
                port: 3128,
            }),
            tls,
        }
    }

    #[test]
    fn preview_truncates_and_escapes() {
        assert_eq!(body_preview(""), "<empty>");
        assert_eq!(body_preview("a\nb"), "a\\nb");
        let long = "x".repeat(300);
        let preview = body_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), 259);
    }

    #[test]
    fn endpoint_url_keeps_path_prefix() {
        let cases = [
            ("http://refocus.internal", "http://refocus.internal/v1/samples/upsert/bulk"),
            ("http://refocus.internal/", "http://refocus.internal/v1/samples/upsert/bulk"),
            ("http://gw.internal/refocus", "http://gw.internal/refocus/v1/samples/upsert/bulk"),
            ("http://gw.internal/refocus/", "http://gw.internal/refocus/v1/samples/upsert/bulk"),
        ];
        for (base, expected) in cases {
            let base = Url::parse(base).unwrap();
            let url = endpoint_url(&base, "v1/samples/upsert/bulk").unwrap();
            assert_eq!(url.as_str(), expected);
        }
    }

    #[test]
    fn builds_with_proxy_and_trust_all() {
        let tls = TlsSettings {
            trust_all: true,
            ..TlsSettings::default()
        };
        assert!(HttpTransport::new("test", &settings(tls)).is_ok());
    }

    #[test]
    fn missing_ca_bundle_is_reported() {
        let tls = TlsSettings {
            ca_bundle: Some(PathBuf::from("/nonexistent/argus-notify/ca.pem")),
            ..TlsSettings::default()
        };
        match HttpTransport::new("test", &settings(tls)) {
            Err(TransportError::Tls { path, .. }) => {
                assert!(path.ends_with("ca.pem"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

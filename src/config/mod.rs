use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::Result;
use crate::delivery::RetrySettings;
use crate::transport::TransportSettings;

mod defaults;
mod env;
mod raw;
mod serde;

pub(crate) use self::serde::HumantimeDuration;

/// Resolved configuration for every provider. Loaded once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpSettings,
    pub audit: AuditSettings,
    pub pagerduty: PagerDutySettings,
    pub goc: GocSettings,
    pub gus: GusSettings,
    pub refocus: RefocusSettings,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// Contains `$alertid$`.
    pub alert_url_template: String,
    /// Contains `$expression$`.
    pub metric_url_template: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub ca_bundle: Option<PathBuf>,
    pub identity_pem: Option<PathBuf>,
    /// Accept any server certificate when no CA bundle is configured.
    pub trust_all: bool,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct PagerDutySettings {
    pub enabled: bool,
    pub endpoint: Url,
    pub token: SecretString,
    pub max_attempts: u32,
    pub rate_limited_delay: Duration,
    pub pool_max_per_host: usize,
    pub proxy: Option<ProxySettings>,
}

#[derive(Debug, Clone)]
pub struct GocSettings {
    pub enabled: bool,
    pub auth_endpoint: Url,
    pub credentials: OAuthCredentials,
    pub max_attempts: u32,
    pub token_refresh_period: Duration,
    pub token_fetch_timeout: Duration,
    pub rate_limited_delay: Duration,
    pub pool_max_per_host: usize,
    pub proxy: Option<ProxySettings>,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone)]
pub struct GusSettings {
    pub enabled: bool,
    pub auth_endpoint: Url,
    pub post_endpoint: Url,
    pub credentials: OAuthCredentials,
    pub max_attempts: u32,
    pub token_refresh_period: Duration,
    pub token_fetch_timeout: Duration,
    pub rate_limited_delay: Duration,
    pub pool_max_per_host: usize,
    pub proxy: Option<ProxySettings>,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone)]
pub struct RefocusSettings {
    pub enabled: bool,
    pub endpoint: Url,
    pub token: SecretString,
    pub max_samples_to_send: usize,
    pub send_interval: Duration,
    /// Values `<= 0` fall back to the default; values above 6000 disable
    /// the limiter.
    pub max_requests_per_minute: i64,
    pub refresh_max_times: u32,
    pub rate_limited_delay: Duration,
    pub status_interval: Duration,
    pub poll_interval: Duration,
    pub detailed_logging: bool,
    pub detailed_history: bool,
    pub pool_max_per_host: usize,
    pub proxy: Option<ProxySettings>,
    pub tls: TlsSettings,
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be read, parsed,
    /// when environment overrides are invalid, or when the resulting values
    /// fail validation.
    pub fn from_env_and_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut raw = raw::load(path)?;
        raw.apply_env_overrides()?;
        raw.validate_and_build()
    }

    /// Parse a TOML document without consulting the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the document does not parse or fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        raw::from_toml_str(source)?.validate_and_build()
    }
}

impl HttpSettings {
    fn transport(
        &self,
        pool_max_per_host: usize,
        proxy: Option<&ProxySettings>,
        tls: TlsSettings,
    ) -> TransportSettings {
        TransportSettings {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            pool_max_idle_per_host: pool_max_per_host,
            proxy: proxy.cloned(),
            tls,
        }
    }

    fn retry(&self, max_attempts: u32, rate_limited_delay: Duration) -> RetrySettings {
        RetrySettings {
            max_attempts,
            rate_limited_delay,
            initial_backoff: self.retry_initial_backoff,
            max_backoff: self.retry_max_backoff,
        }
    }
}

impl PagerDutySettings {
    #[must_use]
    pub fn transport(&self, http: &HttpSettings) -> TransportSettings {
        // PagerDuty is a public endpoint; always verify its certificate.
        http.transport(self.pool_max_per_host, self.proxy.as_ref(), TlsSettings::default())
    }

    #[must_use]
    pub fn retry(&self, http: &HttpSettings) -> RetrySettings {
        http.retry(self.max_attempts, self.rate_limited_delay)
    }
}

impl GocSettings {
    #[must_use]
    pub fn transport(&self, http: &HttpSettings) -> TransportSettings {
        http.transport(self.pool_max_per_host, self.proxy.as_ref(), self.tls.clone())
    }

    #[must_use]
    pub fn retry(&self, http: &HttpSettings) -> RetrySettings {
        http.retry(self.max_attempts, self.rate_limited_delay)
    }
}

impl GusSettings {
    #[must_use]
    pub fn transport(&self, http: &HttpSettings) -> TransportSettings {
        http.transport(self.pool_max_per_host, self.proxy.as_ref(), self.tls.clone())
    }

    #[must_use]
    pub fn retry(&self, http: &HttpSettings) -> RetrySettings {
        http.retry(self.max_attempts, self.rate_limited_delay)
    }
}

impl RefocusSettings {
    #[must_use]
    pub fn transport(&self, http: &HttpSettings) -> TransportSettings {
        http.transport(self.pool_max_per_host, self.proxy.as_ref(), self.tls.clone())
    }

    /// One initial attempt plus `refresh_max_times` retries.
    #[must_use]
    pub fn retry(&self, http: &HttpSettings) -> RetrySettings {
        http.retry(
            self.refresh_max_times.saturating_add(1),
            self.rate_limited_delay,
        )
    }

    /// Minimum spacing between bulk requests. Zero above 6000 requests per
    /// minute; non-positive limits fall back to the default.
    #[must_use]
    pub fn rate_limit_interval(&self) -> Duration {
        let per_minute = if self.max_requests_per_minute <= 0 {
            defaults::default_max_requests_per_minute()
        } else {
            self.max_requests_per_minute
        };
        if per_minute > 6000 {
            return Duration::ZERO;
        }
        Duration::from_millis(u64::try_from(60_000 / per_minute).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use super::Config;

    #[test]
    fn empty_document_yields_defaults_with_providers_disabled() {
        let config = match Config::from_toml_str("") {
            Ok(config) => config,
            Err(err) => panic!("defaults should validate: {err}"),
        };
        assert!(!config.pagerduty.enabled);
        assert!(!config.refocus.enabled);
        assert_eq!(config.pagerduty.max_attempts, 3);
        assert_eq!(config.refocus.max_samples_to_send, 50);
        assert_eq!(config.refocus.max_requests_per_minute, 500);
        assert_eq!(config.goc.token_refresh_period, Duration::from_secs(300));
        assert_eq!(config.http.connect_timeout, Duration::from_secs(10));
        assert!(config.goc.tls.trust_all);
    }

    #[test]
    fn enabled_provider_requires_credentials() {
        let err = Config::from_toml_str("[pagerduty]\nenabled = true\n");
        assert!(err.is_err());

        let config = match Config::from_toml_str(
            "[pagerduty]\nenabled = true\ntoken = \"pd-token\"\nrate_limited_delay = \"250ms\"\n",
        ) {
            Ok(config) => config,
            Err(err) => panic!("valid pagerduty section rejected: {err}"),
        };
        assert_eq!(config.pagerduty.token.expose_secret(), "pd-token");
        assert_eq!(
            config.pagerduty.rate_limited_delay,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn proxy_needs_host_and_valid_port() {
        let config = match Config::from_toml_str(
            "[goc.proxy]\nhost = \"proxy.local\"\nport = \"8080\"\n[gus.proxy]\nhost = \"proxy.local\"\n",
        ) {
            Ok(config) => config,
            Err(err) => panic!("proxy sections rejected: {err}"),
        };
        assert_eq!(
            config.goc.proxy.as_ref().map(|proxy| proxy.port),
            Some(8080)
        );
        assert!(config.gus.proxy.is_none());

        let config = match Config::from_toml_str("[refocus.proxy]\nhost = \"p\"\nport = \"http\"\n") {
            Ok(config) => config,
            Err(err) => panic!("unparseable port should be ignored: {err}"),
        };
        assert!(config.refocus.proxy.is_none());
    }

    #[test]
    fn rate_limit_interval_follows_requests_per_minute() {
        let mut config = match Config::from_toml_str("[refocus]\nmax_requests_per_minute = 600\n") {
            Ok(config) => config,
            Err(err) => panic!("refocus section rejected: {err}"),
        };
        assert_eq!(
            config.refocus.rate_limit_interval(),
            Duration::from_millis(100)
        );
        config.refocus.max_requests_per_minute = 0;
        assert_eq!(
            config.refocus.rate_limit_interval(),
            Duration::from_millis(120)
        );
        config.refocus.max_requests_per_minute = 6001;
        assert_eq!(config.refocus.rate_limit_interval(), Duration::ZERO);
        assert_eq!(config.refocus.retry(&config.http).max_attempts, 4);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(Config::from_toml_str("[refocus]\nmax_samples_to_send = 0\n").is_err());
    }
}

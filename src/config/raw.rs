use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use serde_with::serde_as;
use url::Url;

use crate::Result;
use crate::error::ConfigError;

use super::defaults::{
    default_alert_url_template, default_connect_timeout, default_gus_post_endpoint,
    default_max_attempts, default_max_requests_per_minute, default_max_samples_to_send,
    default_metric_url_template, default_pagerduty_endpoint, default_poll_interval,
    default_pool_max_per_host, default_rate_limited_delay, default_refocus_endpoint,
    default_refresh_max_times, default_request_timeout, default_retry_initial_backoff,
    default_retry_max_backoff, default_salesforce_auth_endpoint, default_send_interval,
    default_status_interval, default_token_fetch_timeout, default_token_refresh_period,
    default_true, default_trust_all,
};
use super::env::Overrides;
use super::{
    AuditSettings, Config, GocSettings, GusSettings, HttpSettings, HumantimeDuration,
    OAuthCredentials, PagerDutySettings, ProxySettings, RefocusSettings, TlsSettings,
};

const ENV_PREFIX: &str = "ARGUS_NOTIFY";

pub(super) fn load(path: impl AsRef<Path>) -> std::result::Result<RawConfig, ConfigError> {
    let path = path.as_ref();
    let builder = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    builder
        .build()
        .map_err(|err| ConfigError::Other(err.to_string()))?
        .try_deserialize()
        .map_err(|err| ConfigError::Parse(err.to_string()))
}

pub(super) fn from_toml_str(source: &str) -> std::result::Result<RawConfig, ConfigError> {
    ::config::Config::builder()
        .add_source(::config::File::from_str(source, ::config::FileFormat::Toml))
        .build()
        .map_err(|err| ConfigError::Other(err.to_string()))?
        .try_deserialize()
        .map_err(|err| ConfigError::Parse(err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub(super) http: RawHttp,
    #[serde(default)]
    pub(super) audit: RawAudit,
    #[serde(default)]
    pub(super) pagerduty: RawPagerDuty,
    #[serde(default)]
    pub(super) goc: RawSalesforce,
    #[serde(default)]
    pub(super) gus: RawSalesforce,
    #[serde(default)]
    pub(super) refocus: RawRefocus,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawHttp {
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) connect_timeout: Duration,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) request_timeout: Duration,
    #[serde(default = "default_retry_initial_backoff")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) retry_initial_backoff: Duration,
    #[serde(default = "default_retry_max_backoff")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) retry_max_backoff: Duration,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawAudit {
    #[serde(default = "default_alert_url_template")]
    pub(super) alert_url_template: String,
    #[serde(default = "default_metric_url_template")]
    pub(super) metric_url_template: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawProxy {
    pub(super) host: Option<String>,
    pub(super) port: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTls {
    #[serde(default)]
    pub(super) ca_bundle: Option<PathBuf>,
    #[serde(default)]
    pub(super) identity_pem: Option<PathBuf>,
    #[serde(default = "default_trust_all")]
    pub(super) trust_all: bool,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawPagerDuty {
    #[serde(default)]
    pub(super) enabled: bool,
    #[serde(default = "default_pagerduty_endpoint")]
    pub(super) endpoint: String,
    pub(super) token: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub(super) max_attempts: u32,
    #[serde(default = "default_rate_limited_delay")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) rate_limited_delay: Duration,
    #[serde(default = "default_pool_max_per_host")]
    pub(super) pool_max_per_host: usize,
    #[serde(default)]
    pub(super) proxy: Option<RawProxy>,
}

/// Shared shape of the GOC and GUS sections; both authenticate with a
/// password grant against a Salesforce login endpoint.
#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawSalesforce {
    #[serde(default)]
    pub(super) enabled: bool,
    #[serde(default = "default_salesforce_auth_endpoint")]
    pub(super) auth_endpoint: String,
    #[serde(default)]
    pub(super) post_endpoint: Option<String>,
    #[serde(default)]
    pub(super) client_id: Option<String>,
    #[serde(default)]
    pub(super) client_secret: Option<String>,
    #[serde(default)]
    pub(super) username: Option<String>,
    #[serde(default)]
    pub(super) password: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub(super) max_attempts: u32,
    #[serde(default = "default_token_refresh_period")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) token_refresh_period: Duration,
    #[serde(default = "default_token_fetch_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) token_fetch_timeout: Duration,
    #[serde(default = "default_rate_limited_delay")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) rate_limited_delay: Duration,
    #[serde(default = "default_pool_max_per_host")]
    pub(super) pool_max_per_host: usize,
    #[serde(default)]
    pub(super) proxy: Option<RawProxy>,
    #[serde(default)]
    pub(super) tls: RawTls,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawRefocus {
    #[serde(default)]
    pub(super) enabled: bool,
    #[serde(default = "default_refocus_endpoint")]
    pub(super) endpoint: String,
    pub(super) token: Option<String>,
    #[serde(default = "default_max_samples_to_send")]
    pub(super) max_samples_to_send: usize,
    #[serde(default = "default_send_interval")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) send_interval: Duration,
    #[serde(default = "default_max_requests_per_minute")]
    pub(super) max_requests_per_minute: i64,
    #[serde(default = "default_refresh_max_times")]
    pub(super) refresh_max_times: u32,
    #[serde(default = "default_rate_limited_delay")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) rate_limited_delay: Duration,
    #[serde(default = "default_status_interval")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) status_interval: Duration,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) poll_interval: Duration,
    #[serde(default = "default_true")]
    pub(super) detailed_logging: bool,
    #[serde(default = "default_true")]
    pub(super) detailed_history: bool,
    #[serde(default = "default_pool_max_per_host")]
    pub(super) pool_max_per_host: usize,
    #[serde(default)]
    pub(super) proxy: Option<RawProxy>,
    #[serde(default)]
    pub(super) tls: RawTls,
}

impl RawConfig {
    pub(super) fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_overrides(&Overrides::from_process())
    }

    fn apply_overrides<F>(&mut self, env: &Overrides<F>) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> std::result::Result<Option<String>, ConfigError>,
    {
        if let Some(token) = env.string("PAGERDUTY_TOKEN")? {
            self.pagerduty.token = Some(token);
        }
        if let Some(enabled) = env.flag("PAGERDUTY_ENABLED")? {
            self.pagerduty.enabled = enabled;
        }
        if let Some(secret) = env.string("GOC_CLIENT_SECRET")? {
            self.goc.client_secret = Some(secret);
        }
        if let Some(password) = env.string("GOC_PASSWORD")? {
            self.goc.password = Some(password);
        }
        if let Some(secret) = env.string("GUS_CLIENT_SECRET")? {
            self.gus.client_secret = Some(secret);
        }
        if let Some(password) = env.string("GUS_PASSWORD")? {
            self.gus.password = Some(password);
        }
        if let Some(token) = env.string("REFOCUS_TOKEN")? {
            self.refocus.token = Some(token);
        }
        if let Some(endpoint) = env.string("REFOCUS_ENDPOINT")? {
            self.refocus.endpoint = endpoint;
        }
        if let Some(enabled) = env.flag("REFOCUS_ENABLED")? {
            self.refocus.enabled = enabled;
        }
        if let Some(max) = env.parse::<usize>("REFOCUS_MAX_SAMPLES")? {
            self.refocus.max_samples_to_send = max;
        }
        if let Some(interval) = env.duration("REFOCUS_SEND_INTERVAL")? {
            self.refocus.send_interval = interval;
        }
        if let Some(rpm) = env.parse::<i64>("REFOCUS_MAX_REQUESTS_PER_MINUTE")? {
            self.refocus.max_requests_per_minute = rpm;
        }
        Ok(())
    }

    pub(super) fn validate_and_build(self) -> Result<Config> {
        let http = self.http.build()?;
        let audit = self.audit.build()?;
        let pagerduty = self.pagerduty.build()?;
        let goc = self.goc.build_goc()?;
        let gus = self.gus.build_gus()?;
        let refocus = self.refocus.build()?;
        Ok(Config {
            http,
            audit,
            pagerduty,
            goc,
            gus,
            refocus,
        })
    }
}

impl RawHttp {
    fn build(self) -> std::result::Result<HttpSettings, ConfigError> {
        non_zero("http.connect_timeout", self.connect_timeout)?;
        non_zero("http.request_timeout", self.request_timeout)?;
        if self.retry_max_backoff < self.retry_initial_backoff {
            return Err(ConfigError::InvalidField {
                field: "http.retry_max_backoff",
                message: "must not be shorter than http.retry_initial_backoff".to_string(),
            });
        }
        Ok(HttpSettings {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            retry_initial_backoff: self.retry_initial_backoff,
            retry_max_backoff: self.retry_max_backoff,
        })
    }
}

impl RawAudit {
    fn build(self) -> std::result::Result<AuditSettings, ConfigError> {
        if !self.alert_url_template.contains("$alertid$") {
            return Err(ConfigError::InvalidField {
                field: "audit.alert_url_template",
                message: "template must contain $alertid$".to_string(),
            });
        }
        if !self.metric_url_template.contains("$expression$") {
            return Err(ConfigError::InvalidField {
                field: "audit.metric_url_template",
                message: "template must contain $expression$".to_string(),
            });
        }
        Ok(AuditSettings {
            alert_url_template: self.alert_url_template,
            metric_url_template: self.metric_url_template,
        })
    }
}

impl RawProxy {
    /// A proxy is only usable with a host and a port that parses.
    fn build(self) -> Option<ProxySettings> {
        let host = self.host.filter(|host| !host.trim().is_empty())?;
        let port = self.port?.trim().parse::<u16>().ok()?;
        Some(ProxySettings { host, port })
    }
}

impl RawTls {
    fn build(self) -> TlsSettings {
        TlsSettings {
            ca_bundle: self.ca_bundle,
            identity_pem: self.identity_pem,
            trust_all: self.trust_all,
        }
    }
}

impl RawPagerDuty {
    fn build(self) -> std::result::Result<PagerDutySettings, ConfigError> {
        let token = secret_when_enabled(self.enabled, "pagerduty.token", self.token)?;
        attempts("pagerduty.max_attempts", self.max_attempts)?;
        Ok(PagerDutySettings {
            enabled: self.enabled,
            endpoint: parse_url("pagerduty.endpoint", &self.endpoint)?,
            token,
            max_attempts: self.max_attempts,
            rate_limited_delay: self.rate_limited_delay,
            pool_max_per_host: self.pool_max_per_host.max(1),
            proxy: self.proxy.and_then(RawProxy::build),
        })
    }
}

impl RawSalesforce {
    fn credentials(
        &mut self,
        prefix: &'static [&'static str; 4],
    ) -> std::result::Result<OAuthCredentials, ConfigError> {
        let [client_id_field, client_secret_field, username_field, password_field] = *prefix;
        let client_id = plain_when_enabled(self.enabled, client_id_field, self.client_id.take())?;
        let client_secret =
            secret_when_enabled(self.enabled, client_secret_field, self.client_secret.take())?;
        let username = plain_when_enabled(self.enabled, username_field, self.username.take())?;
        let password = secret_when_enabled(self.enabled, password_field, self.password.take())?;
        Ok(OAuthCredentials {
            client_id,
            client_secret,
            username,
            password,
        })
    }

    fn build_goc(mut self) -> std::result::Result<GocSettings, ConfigError> {
        let credentials = self.credentials(&[
            "goc.client_id",
            "goc.client_secret",
            "goc.username",
            "goc.password",
        ])?;
        attempts("goc.max_attempts", self.max_attempts)?;
        Ok(GocSettings {
            enabled: self.enabled,
            auth_endpoint: parse_url("goc.auth_endpoint", &self.auth_endpoint)?,
            credentials,
            max_attempts: self.max_attempts,
            token_refresh_period: self.token_refresh_period,
            token_fetch_timeout: non_zero("goc.token_fetch_timeout", self.token_fetch_timeout)?,
            rate_limited_delay: self.rate_limited_delay,
            pool_max_per_host: self.pool_max_per_host.max(1),
            proxy: self.proxy.and_then(RawProxy::build),
            tls: self.tls.build(),
        })
    }

    fn build_gus(mut self) -> std::result::Result<GusSettings, ConfigError> {
        let credentials = self.credentials(&[
            "gus.client_id",
            "gus.client_secret",
            "gus.username",
            "gus.password",
        ])?;
        attempts("gus.max_attempts", self.max_attempts)?;
        let post_endpoint = self
            .post_endpoint
            .take()
            .unwrap_or_else(default_gus_post_endpoint);
        Ok(GusSettings {
            enabled: self.enabled,
            auth_endpoint: parse_url("gus.auth_endpoint", &self.auth_endpoint)?,
            post_endpoint: parse_url("gus.post_endpoint", &post_endpoint)?,
            credentials,
            max_attempts: self.max_attempts,
            token_refresh_period: self.token_refresh_period,
            token_fetch_timeout: non_zero("gus.token_fetch_timeout", self.token_fetch_timeout)?,
            rate_limited_delay: self.rate_limited_delay,
            pool_max_per_host: self.pool_max_per_host.max(1),
            proxy: self.proxy.and_then(RawProxy::build),
            tls: self.tls.build(),
        })
    }
}

impl RawRefocus {
    fn build(self) -> std::result::Result<RefocusSettings, ConfigError> {
        let token = secret_when_enabled(self.enabled, "refocus.token", self.token)?;
        if self.max_samples_to_send == 0 {
            return Err(ConfigError::InvalidField {
                field: "refocus.max_samples_to_send",
                message: "batch size must be greater than zero".to_string(),
            });
        }
        Ok(RefocusSettings {
            enabled: self.enabled,
            endpoint: parse_url("refocus.endpoint", &self.endpoint)?,
            token,
            max_samples_to_send: self.max_samples_to_send,
            send_interval: self.send_interval,
            max_requests_per_minute: self.max_requests_per_minute,
            refresh_max_times: self.refresh_max_times,
            rate_limited_delay: self.rate_limited_delay,
            status_interval: non_zero("refocus.status_interval", self.status_interval)?,
            poll_interval: non_zero("refocus.poll_interval", self.poll_interval)?,
            detailed_logging: self.detailed_logging,
            detailed_history: self.detailed_history,
            pool_max_per_host: self.pool_max_per_host.max(1),
            proxy: self.proxy.and_then(RawProxy::build),
            tls: self.tls.build(),
        })
    }
}

fn parse_url(field: &'static str, value: &str) -> std::result::Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::InvalidField {
        field,
        message: err.to_string(),
    })
}

fn non_zero(field: &'static str, value: Duration) -> std::result::Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidField {
            field,
            message: "duration must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn attempts(field: &'static str, value: u32) -> std::result::Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidField {
            field,
            message: "at least one attempt is required".to_string(),
        });
    }
    Ok(())
}

fn plain_when_enabled(
    enabled: bool,
    field: &'static str,
    value: Option<String>,
) -> std::result::Result<String, ConfigError> {
    match value.filter(|value| !value.trim().is_empty()) {
        Some(value) => Ok(value),
        None if enabled => Err(ConfigError::MissingField { field }),
        None => Ok(String::new()),
    }
}

fn secret_when_enabled(
    enabled: bool,
    field: &'static str,
    value: Option<String>,
) -> std::result::Result<SecretString, ConfigError> {
    plain_when_enabled(enabled, field, value).map(SecretString::from)
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            retry_initial_backoff: default_retry_initial_backoff(),
            retry_max_backoff: default_retry_max_backoff(),
        }
    }
}

impl Default for RawAudit {
    fn default() -> Self {
        Self {
            alert_url_template: default_alert_url_template(),
            metric_url_template: default_metric_url_template(),
        }
    }
}

impl Default for RawTls {
    fn default() -> Self {
        Self {
            ca_bundle: None,
            identity_pem: None,
            trust_all: default_trust_all(),
        }
    }
}

impl Default for RawPagerDuty {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_pagerduty_endpoint(),
            token: None,
            max_attempts: default_max_attempts(),
            rate_limited_delay: default_rate_limited_delay(),
            pool_max_per_host: default_pool_max_per_host(),
            proxy: None,
        }
    }
}

impl Default for RawSalesforce {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_endpoint: default_salesforce_auth_endpoint(),
            post_endpoint: None,
            client_id: None,
            client_secret: None,
            username: None,
            password: None,
            max_attempts: default_max_attempts(),
            token_refresh_period: default_token_refresh_period(),
            token_fetch_timeout: default_token_fetch_timeout(),
            rate_limited_delay: default_rate_limited_delay(),
            pool_max_per_host: default_pool_max_per_host(),
            proxy: None,
            tls: RawTls::default(),
        }
    }
}

impl Default for RawRefocus {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_refocus_endpoint(),
            token: None,
            max_samples_to_send: default_max_samples_to_send(),
            send_interval: default_send_interval(),
            max_requests_per_minute: default_max_requests_per_minute(),
            refresh_max_times: default_refresh_max_times(),
            rate_limited_delay: default_rate_limited_delay(),
            status_interval: default_status_interval(),
            poll_interval: default_poll_interval(),
            detailed_logging: true,
            detailed_history: true,
            pool_max_per_host: default_pool_max_per_host(),
            proxy: None,
            tls: RawTls::default(),
        }
    }
}

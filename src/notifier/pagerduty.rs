use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::Result;
use crate::audit::{AuditUrls, format_gmt};
use crate::config::Config;
use crate::delivery::{DeliveryCounters, ResponsePolicy, RetryEngine};
use crate::dispatch::{ProviderNotifier, Resolved};
use crate::error::NotifyError;
use crate::transport::{CORRELATION_HEADER, HttpReply, HttpTransport, endpoint_url};
use crate::types::{Metric, NotificationStatus};

use super::{now_millis, skip_disabled, truncate_with_ellipsis};

const PROVIDER: &str = "PagerDuty";
const SUMMARY_LIMIT: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Trigger,
    Resolve,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

impl Severity {
    #[must_use]
    pub const fn of_level(level: i32) -> Self {
        match level {
            1 => Self::Critical,
            2 => Self::Error,
            3 => Self::Warning,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Link {
    pub href: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EventPayload {
    pub summary: String,
    pub source: &'static str,
    pub severity: Severity,
    pub timestamp: String,
    pub custom_details: BTreeMap<&'static str, String>,
}

/// Events API v2 body.
#[derive(Debug, Serialize)]
pub struct PagerDutyEvent {
    pub routing_key: String,
    pub event_action: EventAction,
    pub dedup_key: String,
    pub client: &'static str,
    pub client_url: String,
    pub links: Vec<Link>,
    pub payload: EventPayload,
}

pub struct PagerDutyNotifier {
    enabled: bool,
    endpoint: Url,
    token: SecretString,
    transport: HttpTransport,
    engine: RetryEngine,
    urls: AuditUrls,
}

impl PagerDutyNotifier {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = &config.pagerduty;
        Ok(Self {
            enabled: settings.enabled,
            endpoint: settings.endpoint.clone(),
            token: settings.token.clone(),
            transport: HttpTransport::new(PROVIDER, &settings.transport(&config.http))?,
            engine: RetryEngine::new(
                PROVIDER,
                settings.retry(&config.http),
                ResponsePolicy::PAGERDUTY,
            ),
            urls: AuditUrls::new(&config.audit),
        })
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DeliveryCounters> {
        self.engine.counters()
    }

    /// Build the event for `target`. Only the first routing key is used.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when there is no routing key or the
    /// notification has no id.
    pub fn build_event(
        &self,
        target: &Resolved<'_>,
        status: NotificationStatus,
    ) -> Result<PagerDutyEvent> {
        let context = target.context;
        let routing_keys = &context.notification.subscriptions;
        let routing_key = routing_keys.first().ok_or_else(|| {
            NotifyError::Precondition(
                "PagerDuty routing keys (subscriptions) cannot be empty".to_string(),
            )
        })?;
        if routing_keys.len() > 1 {
            let message = format!(
                "Only one PagerDuty integration key is supported, thus only {routing_key} will be used"
            );
            warn!(provider = PROVIDER, "{message}");
            context.history.append_message_and_update(&message, None, 0);
        }

        let notification_id = target.notification.id.ok_or_else(|| {
            NotifyError::Precondition("notification id cannot be null".to_string())
        })?;
        let dedup_key = dedup_key(notification_id, target.trigger.id, &context.triggered_metric);

        let summary = format!(
            "[Argus] Notification for Alert: {} Notification: {} Trigger: {}",
            context.alert.name, context.notification.name, context.trigger.name
        );
        let now = now_millis();
        let mut links = vec![Link {
            href: self.urls.expression_url(&context.alert.expression),
            text: "Argus metric expression".to_string(),
        }];
        links.extend(target.notification.metrics_to_annotate.iter().map(|series| Link {
            href: self.urls.metric_url(series, context.trigger_fired_time, now),
            text: "Argus triggered metrics".to_string(),
        }));

        let mut details = BTreeMap::new();
        details.insert("Evaluated Metric Expression", context.alert.expression.clone());
        details.insert(
            "Trigger Evaluation Time",
            format_gmt(context.trigger_fired_time),
        );
        details.insert("Cooldown till", format_gmt(context.cooldown_expiration));
        details.insert("Triggered on Metric", context.triggered_metric.identifier());
        details.insert("Triggered Details", target.trigger.details());
        details.insert(
            "Triggering Event Value",
            format!("{:?}", context.trigger_event_value),
        );
        if let Some(text) = &context.notification.custom_text {
            details.insert("Customer Text", text.clone());
        }
        if !context.notification.metrics_to_annotate.is_empty() {
            details.insert(
                "Metrics to annotate",
                context.notification.metrics_to_annotate.join(", "),
            );
        }

        Ok(PagerDutyEvent {
            routing_key: routing_key.clone(),
            event_action: match status {
                NotificationStatus::Triggered => EventAction::Trigger,
                NotificationStatus::Cleared => EventAction::Resolve,
            },
            dedup_key,
            client: "Argus Alert",
            client_url: self.urls.alert_url(context.alert.id),
            links,
            payload: EventPayload {
                summary: truncate_with_ellipsis(&summary, SUMMARY_LIMIT),
                source: "Argus",
                severity: Severity::of_level(target.notification.severity_level),
                timestamp: Utc::now().format("%Y-%m-%dT%H:%MZ").to_string(),
                custom_details: details,
            },
        })
    }

    async fn notify(&self, target: &Resolved<'_>, status: NotificationStatus) -> Result<bool> {
        let event = self.build_event(target, status)?;
        let label = format!(
            "routing key {} ({:?} incident, dedup key {})",
            event.routing_key, event.event_action, event.dedup_key
        );
        let history = target.context.history.as_ref();
        if !self.enabled {
            skip_disabled(PROVIDER, &label, history);
            return Ok(false);
        }

        let url = endpoint_url(&self.endpoint, "v2/enqueue")?;
        let authorization = format!("Token token={}", self.token.expose_secret());
        let event = &event;
        let url = &url;
        let authorization = authorization.as_str();
        let client = self.transport.client();

        let report = self
            .engine
            .deliver(&label, history, |attempt| async move {
                let response = client
                    .post(url.clone())
                    .header(reqwest::header::AUTHORIZATION, authorization)
                    .header(CORRELATION_HEADER, attempt.correlation_id.as_str())
                    .json(event)
                    .send()
                    .await?;
                HttpReply::read(response).await
            })
            .await;
        Ok(report.delivered)
    }
}

/// `{notification}$${trigger or 0}$${hash of the metric identity}`.
#[must_use]
pub fn dedup_key(notification_id: u64, trigger_id: Option<u64>, metric: &Metric) -> String {
    format!(
        "{notification_id}$${}$${}",
        trigger_id.unwrap_or(0),
        stable_hash(&metric.identifier())
    )
}

/// 31-multiplier hash over UTF-16 code units. Open incidents are keyed by
/// it, so it must never change between releases.
fn stable_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[async_trait]
impl ProviderNotifier for PagerDutyNotifier {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn send_additional(&self, target: &Resolved<'_>) -> Result<bool> {
        self.notify(target, NotificationStatus::Triggered).await
    }

    async fn clear_additional(&self, target: &Resolved<'_>) -> Result<bool> {
        self.notify(target, NotificationStatus::Cleared).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Severity, dedup_key, stable_hash};
    use crate::types::Metric;

    #[test]
    fn hash_is_stable() {
        assert_eq!(stable_hash(""), 0);
        assert_eq!(stable_hash("a"), 97);
        assert_eq!(stable_hash("hello"), 99_162_322);
    }

    #[test]
    fn dedup_key_defaults_missing_trigger_id() {
        let metric = Metric {
            namespace: None,
            scope: "s".to_string(),
            metric: "m".to_string(),
            tags: BTreeMap::new(),
        };
        assert_eq!(dedup_key(12, None, &metric), "12$$0$$1008998442");
    }

    #[test]
    fn dedup_key_matches_previously_issued_keys() {
        let metric: Metric = "system.host1:cpu.user{dc=sfo}".parse().unwrap();
        assert_eq!(dedup_key(12, Some(7), &metric), "12$$7$$-429230510");
    }

    #[test]
    fn namespaces_keep_incidents_apart() {
        let in_namespace = |namespace: &str| Metric {
            namespace: Some(namespace.to_string()),
            scope: "s".to_string(),
            metric: "m".to_string(),
            tags: BTreeMap::new(),
        };
        let first = dedup_key(12, Some(7), &in_namespace("ns1"));
        let second = dedup_key(12, Some(7), &in_namespace("ns2"));
        assert_eq!(first, "12$$7$$-1120805435");
        assert_eq!(second, "12$$7$$-1092176284");
    }

    #[test]
    fn severity_levels_map_to_event_severity() {
        assert_eq!(Severity::of_level(1), Severity::Critical);
        assert_eq!(Severity::of_level(3), Severity::Warning);
        assert_eq!(Severity::of_level(9), Severity::Info);
    }
}

//! GOC++ alert records, upserted through the Salesforce REST API.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use url::form_urlencoded;

use crate::Result;
use crate::audit::{AuditUrls, format_gmt};
use crate::config::Config;
use crate::delivery::{DeliveryCounters, ResponsePolicy, RetryEngine};
use crate::dispatch::{ProviderNotifier, Resolved};
use crate::error::NotifyError;
use crate::transport::token::NO_TOKEN;
use crate::transport::{
    CORRELATION_HEADER, EndpointInfo, HttpReply, HttpTransport, PasswordGrant, TokenCache,
};
use crate::types::NotificationStatus;

use super::{now_millis, skip_disabled, truncate_with_ellipsis};

const PROVIDER: &str = "GOC";
const SOURCE_DOMAIN: &str = "Argus";

const CLASS_NAME_LIMIT: usize = 50;
const ELEMENT_NAME_LIMIT: usize = 100;
const EVENT_NAME_LIMIT: usize = 50;
const EVENT_TEXT_LIMIT: usize = 32_000;

const SEVERITY_ERROR: u8 = 5;
const SEVERITY_OK: u8 = 0;

/// One `SM_Alert__c` upsert. The alert id travels in the URL, not the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GocRecord {
    #[serde(skip)]
    pub alert_id: String,
    #[serde(rename = "SM_Active__c")]
    pub active: bool,
    #[serde(rename = "SM_ClassName__c")]
    pub class_name: String,
    #[serde(rename = "SM_ClearedAt__c", skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<i64>,
    #[serde(rename = "SM_CreatedAt__c", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(rename = "SM_ElementName__c")]
    pub element_name: String,
    #[serde(rename = "SM_EventName__c")]
    pub event_name: String,
    #[serde(rename = "SM_EventText__c")]
    pub event_text: String,
    #[serde(rename = "SM_LastNotifiedAt__c")]
    pub last_notified_at: i64,
    #[serde(rename = "SM_Severity__c")]
    pub severity: u8,
    #[serde(rename = "SM_SourceDomain__c")]
    pub source_domain: &'static str,
}

impl GocRecord {
    /// Truncates every bounded field and derives the alert id from the
    /// truncated element and event names.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the element or event name is empty.
    pub fn new(
        status: NotificationStatus,
        class_name: &str,
        element_name: &str,
        event_name: &str,
        event_text: &str,
        last_notified_at: i64,
    ) -> Result<Self> {
        if element_name.is_empty() {
            return Err(NotifyError::Precondition("ElementName cannot be empty".to_string()).into());
        }
        if event_name.is_empty() {
            return Err(NotifyError::Precondition("EventName cannot be empty".to_string()).into());
        }
        let element_name = truncate_with_ellipsis(element_name, ELEMENT_NAME_LIMIT);
        let event_name = truncate_with_ellipsis(event_name, EVENT_NAME_LIMIT);
        let cleared = status == NotificationStatus::Cleared;
        Ok(Self {
            alert_id: format!("{element_name}.{event_name}"),
            active: !cleared,
            class_name: truncate_with_ellipsis(class_name, CLASS_NAME_LIMIT),
            cleared_at: cleared.then_some(last_notified_at),
            created_at: (!cleared).then_some(last_notified_at),
            element_name,
            event_name,
            event_text: truncate_with_ellipsis(event_text, EVENT_TEXT_LIMIT),
            last_notified_at,
            severity: if cleared { SEVERITY_OK } else { SEVERITY_ERROR },
            source_domain: SOURCE_DOMAIN,
        })
    }
}

pub struct GocNotifier {
    enabled: bool,
    transport: HttpTransport,
    tokens: TokenCache,
    engine: RetryEngine,
    urls: AuditUrls,
}

impl GocNotifier {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built or the token
    /// URL cannot be derived from the auth endpoint.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = &config.goc;
        let transport = HttpTransport::new(PROVIDER, &settings.transport(&config.http))?;
        let grant = PasswordGrant::new(
            transport.clone(),
            &settings.auth_endpoint,
            settings.credentials.clone(),
        )?;
        let tokens = TokenCache::new(
            Box::new(grant),
            Some(EndpointInfo::new(settings.auth_endpoint.as_str(), NO_TOKEN)),
            settings.token_refresh_period,
            settings.token_fetch_timeout,
        );
        Ok(Self {
            enabled: settings.enabled,
            transport,
            tokens,
            engine: RetryEngine::new(
                PROVIDER,
                settings.retry(&config.http),
                ResponsePolicy::SALESFORCE,
            ),
            urls: AuditUrls::new(&config.audit),
        })
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DeliveryCounters> {
        self.engine.counters()
    }

    /// Plain-text event body.
    #[must_use]
    pub fn message_body(&self, target: &Resolved<'_>) -> String {
        let context = target.context;
        let mut body = format!(
            "Alert {}  was triggered at {}\n\
             Notification:  {}\n\
             Triggered by:  {}\n\
             Notification is on cooldown until:  {}\n\
             Evaluated metric expression:  {}\n\
             Trigger details: {}\n\
             Triggering event value:  {}\n\n",
            context.alert.name,
            format_gmt(context.trigger_fired_time),
            target.notification.name,
            target.trigger.name,
            format_gmt(context.cooldown_expiration),
            context.alert.expression,
            target.trigger.details(),
            context.trigger_event_value,
        );
        let now = now_millis();
        for series in &target.notification.metrics_to_annotate {
            body.push_str(&format!(
                "Annotated series for {series}: {}\n",
                self.urls.metric_url(series, context.trigger_fired_time, now)
            ));
        }
        body.push_str(&format!(
            "\nAlert definition:  {}\n",
            self.urls.alert_url(context.alert.id)
        ));
        body
    }

    async fn notify(&self, target: &Resolved<'_>, status: NotificationStatus) -> Result<bool> {
        let context = target.context;
        let record = GocRecord::new(
            status,
            &context.notification.name,
            &context.alert.name,
            &context.trigger.name,
            &self.message_body(target),
            context.trigger_fired_time,
        )?;
        let label = format!(
            "element '{}' event '{}' severity {}",
            record.element_name, record.event_name, record.severity
        );
        let history = context.history.as_ref();
        if !self.enabled {
            skip_disabled(PROVIDER, &label, history);
            return Ok(false);
        }

        let encoded_id: String = form_urlencoded::byte_serialize(record.alert_id.as_bytes()).collect();
        let record = &record;
        let encoded_id = encoded_id.as_str();
        let client = self.transport.client();
        let tokens = &self.tokens;

        let report = self
            .engine
            .deliver(&label, history, |attempt| async move {
                let info = tokens.endpoint_info(attempt.refresh_token).await?;
                let url = format!(
                    "{}/services/data/v25.0/sobjects/SM_Alert__c/SM_Alert_Id__c/{encoded_id}",
                    info.endpoint.trim_end_matches('/')
                );
                let response = client
                    .patch(url)
                    .bearer_auth(info.token.expose_secret())
                    .header(CORRELATION_HEADER, attempt.correlation_id.as_str())
                    .json(record)
                    .send()
                    .await?;
                HttpReply::read(response).await
            })
            .await;
        Ok(report.delivered)
    }
}

#[async_trait]
impl ProviderNotifier for GocNotifier {
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
    use super::GocRecord;
    use crate::types::NotificationStatus;

    #[test]
    fn long_class_name_is_truncated() {
        let class_name = "c".repeat(60);
        let record = GocRecord::new(
            NotificationStatus::Triggered,
            &class_name,
            "alert",
            "trigger",
            "body",
            1,
        )
        .unwrap();
        assert_eq!(record.class_name.chars().count(), 50);
        assert_eq!(record.class_name, format!("{}...", "c".repeat(47)));
    }

    #[test]
    fn cleared_record_is_inactive_with_ok_severity() {
        let record =
            GocRecord::new(NotificationStatus::Cleared, "n", "alert", "trigger", "body", 42)
                .unwrap();
        assert!(!record.active);
        assert_eq!(record.severity, 0);
        assert_eq!(record.cleared_at, Some(42));
        assert_eq!(record.created_at, None);
        assert_eq!(record.alert_id, "alert.trigger");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["SM_ClearedAt__c"], 42);
        assert!(json.get("SM_CreatedAt__c").is_none());
        assert!(json.get("alert_id").is_none());
        assert_eq!(json["SM_SourceDomain__c"], "Argus");
    }

    #[test]
    fn alert_id_uses_truncated_names() {
        let element = "e".repeat(120);
        let record = GocRecord::new(
            NotificationStatus::Triggered,
            "n",
            &element,
            "trigger",
            "body",
            1,
        )
        .unwrap();
        assert_eq!(record.severity, 5);
        assert_eq!(record.element_name.chars().count(), 100);
        assert_eq!(record.alert_id, format!("{}.trigger", record.element_name));
    }

    #[test]
    fn empty_event_name_is_rejected() {
        let result = GocRecord::new(NotificationStatus::Triggered, "n", "alert", "", "body", 1);
        assert!(result.is_err());
    }
}

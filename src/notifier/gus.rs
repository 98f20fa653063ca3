//! Chatter feed posts to a GUS group.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::warn;
use url::Url;

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

use super::{now_millis, skip_disabled};

const PROVIDER: &str = "GUS";

pub struct GusNotifier {
    enabled: bool,
    post_endpoint: Url,
    transport: HttpTransport,
    tokens: TokenCache,
    engine: RetryEngine,
    urls: AuditUrls,
}

impl GusNotifier {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built or the token
    /// URL cannot be derived from the auth endpoint.
    pub fn new(config: &Config) -> Result<Self> {
        let settings = &config.gus;
        let transport = HttpTransport::new(PROVIDER, &settings.transport(&config.http))?;
        let grant = PasswordGrant::new(
            transport.clone(),
            &settings.auth_endpoint,
            settings.credentials.clone(),
        )?;
        Ok(Self {
            enabled: settings.enabled,
            post_endpoint: settings.post_endpoint.clone(),
            transport,
            tokens: TokenCache::new(
                Box::new(grant),
                Some(EndpointInfo::new(settings.auth_endpoint.as_str(), NO_TOKEN)),
                settings.token_refresh_period,
                settings.token_fetch_timeout,
            ),
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

    #[must_use]
    pub fn feed(&self, target: &Resolved<'_>) -> String {
        let context = target.context;
        let notification = &context.notification.name;
        let mut feed = format!(
            "Alert Notification {notification} is triggered, more info as following:\n\
             Alert {}  was triggered at {}\n\
             Notification:   {notification}\n\
             Triggered by:   {}\n\
             Notification is on cooldown until:   {}\n\
             Evaluated metric expression:   {}\n\
             Trigger details:  {}\n\
             Triggering event value:   {}\n\n",
            context.alert.name,
            format_gmt(context.trigger_fired_time),
            target.trigger.name,
            format_gmt(context.cooldown_expiration),
            context.alert.expression,
            target.trigger.details(),
            context.trigger_event_value,
        );
        let now = now_millis();
        for series in &target.notification.metrics_to_annotate {
            feed.push_str(&format!(
                "Click here to view the annotated series for\n{}\n",
                self.urls.metric_url(series, context.trigger_fired_time, now)
            ));
        }
        feed.push_str(&format!(
            "Click here to view alert definition.\n{}\n",
            self.urls.alert_url(context.alert.id)
        ));
        feed
    }

    async fn post(&self, target: &Resolved<'_>) -> Result<bool> {
        let subscriptions = &target.notification.subscriptions;
        let group = subscriptions.first().ok_or_else(|| {
            NotifyError::Precondition("GUS subscriptions cannot be empty".to_string())
        })?;
        if subscriptions.len() > 1 {
            warn!(
                provider = PROVIDER,
                group = %group,
                ignored = subscriptions.len() - 1,
                "only the first GUS group receives the post"
            );
        }

        let label = format!("group {group}");
        let history = target.context.history.as_ref();
        if !self.enabled {
            skip_disabled(PROVIDER, &label, history);
            return Ok(false);
        }

        let feed = self.feed(target);
        let form = [("subjectId", group.as_str()), ("text", feed.as_str())];
        let form = &form;
        let url = &self.post_endpoint;
        let client = self.transport.client();
        let tokens = &self.tokens;

        let report = self
            .engine
            .deliver(&label, history, |attempt| async move {
                let info = tokens.endpoint_info(attempt.refresh_token).await?;
                let response = client
                    .post(url.clone())
                    .bearer_auth(info.token.expose_secret())
                    .header(CORRELATION_HEADER, attempt.correlation_id.as_str())
                    .form(form)
                    .send()
                    .await?;
                HttpReply::read(response).await
            })
            .await;
        Ok(report.delivered)
    }
}

#[async_trait]
impl ProviderNotifier for GusNotifier {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn send_additional(&self, target: &Resolved<'_>) -> Result<bool> {
        self.post(target).await
    }

    /// Chatter has nothing to resolve; the audit trail records the clear.
    async fn clear_additional(&self, target: &Resolved<'_>) -> Result<bool> {
        tracing::debug!(
            provider = PROVIDER,
            alert = %target.context.alert.name,
            status = NotificationStatus::Cleared.label(),
            "no GUS post for cleared notification"
        );
        Ok(true)
    }
}

//! The notifier contract and the audit wrapper every provider runs behind.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::Result;
use crate::audit::{AuditEntry, AuditSink, annotation_for, audit_body};
use crate::error::NotifyError;
use crate::types::{Metric, Notification, NotificationContext, NotificationStatus, Trigger};

/// Entry points called by alert evaluation.
///
/// Provider failures are reported as `Ok(false)`; `Err` is reserved for
/// contract violations such as a context naming a notification the alert
/// does not have.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_notification(&self, context: &NotificationContext) -> Result<bool>;

    async fn clear_notification(&self, context: &NotificationContext) -> Result<bool>;
}

/// Context with its notification and trigger resolved against the alert.
#[derive(Clone, Copy, Debug)]
pub struct Resolved<'a> {
    pub context: &'a NotificationContext,
    pub notification: &'a Notification,
    pub trigger: &'a Trigger,
}

impl<'a> Resolved<'a> {
    /// Look the context's notification and trigger up on its alert by
    /// case-insensitive name.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when either is missing.
    pub fn from_context(context: &'a NotificationContext) -> Result<Self> {
        let alert = context.alert.as_ref();
        let notification = alert
            .notifications
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(&context.notification.name))
            .ok_or_else(|| {
                NotifyError::Precondition(format!(
                    "notification {} is not defined on alert {}",
                    context.notification.name, alert.name
                ))
            })?;
        let trigger = alert
            .triggers
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(&context.trigger.name))
            .ok_or_else(|| {
                NotifyError::Precondition(format!(
                    "trigger {} is not defined on alert {}",
                    context.trigger.name, alert.name
                ))
            })?;
        Ok(Self {
            context,
            notification,
            trigger,
        })
    }
}

/// Provider-specific half of a notifier.
#[async_trait]
pub trait ProviderNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_additional(&self, target: &Resolved<'_>) -> Result<bool>;

    async fn clear_additional(&self, target: &Resolved<'_>) -> Result<bool>;
}

/// Writes annotations and an audit entry, then hands over to the provider.
pub struct AuditedNotifier<P> {
    provider: P,
    sink: Arc<dyn AuditSink>,
    hostname: String,
}

impl<P: ProviderNotifier> AuditedNotifier<P> {
    pub fn new(provider: P, sink: Arc<dyn AuditSink>) -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self {
            provider,
            sink,
            hostname,
        }
    }

    pub const fn provider(&self) -> &P {
        &self.provider
    }

    fn record(&self, target: &Resolved<'_>, status: NotificationStatus) {
        let context = target.context;
        for series in &target.notification.metrics_to_annotate {
            match series.parse::<Metric>() {
                Ok(metric) => {
                    let annotation = annotation_for(context, &metric, status);
                    self.sink.update_annotation(&context.alert.owner, annotation);
                }
                Err(err) => {
                    warn!(
                        notifier = self.provider.name(),
                        series = %series,
                        error = %err,
                        "skipping annotation for unparseable series"
                    );
                }
            }
        }

        self.sink.create_audit(AuditEntry {
            body: audit_body(context, target.notification, target.trigger, status),
            hostname: self.hostname.clone(),
            alert_id: context.alert.id,
        });
        debug!(
            notifier = self.provider.name(),
            alert = %context.alert.name,
            status = status.label(),
            "audit entry recorded"
        );
    }
}

#[async_trait]
impl<P: ProviderNotifier> Notifier for AuditedNotifier<P> {
    fn name(&self) -> &'static str {
        self.provider.name()
    }

    async fn send_notification(&self, context: &NotificationContext) -> Result<bool> {
        let target = Resolved::from_context(context)?;
        self.record(&target, NotificationStatus::Triggered);
        self.provider.send_additional(&target).await
    }

    async fn clear_notification(&self, context: &NotificationContext) -> Result<bool> {
        let target = Resolved::from_context(context)?;
        self.record(&target, NotificationStatus::Cleared);
        self.provider.clear_additional(&target).await
    }
}

/// Provider that stops after the audit trail.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditOnly;

#[async_trait]
impl ProviderNotifier for AuditOnly {
    fn name(&self) -> &'static str {
        "Audit"
    }

    async fn send_additional(&self, _target: &Resolved<'_>) -> Result<bool> {
        Ok(true)
    }

    async fn clear_additional(&self, _target: &Resolved<'_>) -> Result<bool> {
        Ok(true)
    }
}

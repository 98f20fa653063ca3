use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use url::form_urlencoded;

use crate::config::AuditSettings;
use crate::types::{Metric, Notification, NotificationContext, NotificationStatus, Trigger};

pub const ANNOTATION_SOURCE: &str = "ARGUS-ALERTS";
pub const ANNOTATION_TYPE: &str = "ALERT";
const ANNOTATION_ID: &str = "ID";
const METRIC_WINDOW_MS: i64 = 6 * 60 * 60 * 1000;

const DISCLAIMER: &str = "<p><small>Disclaimer:  This alert was evaluated using the time series data as it existed at the time of evaluation.  \
If the data source has inherent lag or a large aggregation window is used during data collection, it is possible \
for the time series data to be updated such that the alert condition is no longer met.  This may be avoided by \
ensuring the time window used in alert expression is outside the range of the datasource lag.</small>";

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub source: String,
    pub id: String,
    pub annotation_type: String,
    pub scope: String,
    pub metric: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEntry {
    pub body: String,
    pub hostname: String,
    pub alert_id: Option<u64>,
}

/// Destination for annotations and audit entries.
pub trait AuditSink: Send + Sync {
    fn update_annotation(&self, owner: &str, annotation: Annotation);
    fn create_audit(&self, entry: AuditEntry);
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    annotations: Mutex<Vec<(String, Annotation)>>,
    audits: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn annotations(&self) -> Vec<(String, Annotation)> {
        self.annotations
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn audits(&self) -> Vec<AuditEntry> {
        self.audits
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn update_annotation(&self, owner: &str, annotation: Annotation) {
        if let Ok(mut items) = self.annotations.lock() {
            items.push((owner.to_string(), annotation));
        }
    }

    fn create_audit(&self, entry: AuditEntry) {
        if let Ok(mut items) = self.audits.lock() {
            items.push(entry);
        }
    }
}

/// Builds one annotation for an annotated series.
#[must_use]
pub fn annotation_for(
    context: &NotificationContext,
    series: &Metric,
    status: NotificationStatus,
) -> Annotation {
    let status_line = match status {
        NotificationStatus::Triggered => "Notification created.",
        NotificationStatus::Cleared => "Notification cleared.",
    };
    let mut fields = BTreeMap::new();
    fields.insert("Notification status".to_string(), status_line.to_string());
    fields.insert("Alert Name".to_string(), context.alert.name.clone());
    fields.insert(
        "Notification Name".to_string(),
        context.notification.name.clone(),
    );
    fields.insert("Trigger Name".to_string(), context.trigger.name.clone());
    fields.insert("Tags".to_string(), format_tags(&series.tags));

    Annotation {
        source: ANNOTATION_SOURCE.to_string(),
        id: ANNOTATION_ID.to_string(),
        annotation_type: ANNOTATION_TYPE.to_string(),
        scope: series.scope.clone(),
        metric: series.metric.clone(),
        timestamp: context.trigger_fired_time,
        tags: series.tags.clone(),
        fields,
    }
}

fn format_tags(tags: &BTreeMap<String, String>) -> String {
    let inner = tags
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{inner}}}")
}

/// `MM/dd/yyyy HH:mm:ss GMT` for an epoch-millisecond timestamp.
#[must_use]
pub fn format_gmt(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms).map_or_else(
        || epoch_ms.to_string(),
        |at| at.format("%m/%d/%Y %H:%M:%S GMT").to_string(),
    )
}

/// Links from notification bodies back into the Argus UI.
#[derive(Clone, Debug)]
pub struct AuditUrls {
    alert_template: String,
    metric_template: String,
}

impl AuditUrls {
    #[must_use]
    pub fn new(settings: &AuditSettings) -> Self {
        Self {
            alert_template: settings.alert_url_template.clone(),
            metric_template: settings.metric_url_template.clone(),
        }
    }

    #[must_use]
    pub fn alert_url(&self, alert_id: Option<u64>) -> String {
        let id = alert_id.map_or_else(|| "null".to_string(), |id| id.to_string());
        self.alert_template.replace("$alertid$", &id)
    }

    #[must_use]
    pub fn expression_url(&self, expression: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(expression.as_bytes()).collect();
        self.metric_template.replace("$expression$", &encoded)
    }

    /// Metric explorer link covering six hours either side of the fire time,
    /// never extending past `now_ms`.
    #[must_use]
    pub fn metric_url(&self, metric_to_annotate: &str, fired_at_ms: i64, now_ms: i64) -> String {
        let start = fired_at_ms - METRIC_WINDOW_MS;
        let end = now_ms.min(fired_at_ms + METRIC_WINDOW_MS);
        let expression = format!("{start}:{end}:{metric_to_annotate}");
        let encoded: String = form_urlencoded::byte_serialize(expression.as_bytes()).collect();
        self.metric_template.replace("$expression$", &encoded)
    }
}

/// HTML body of the audit entry written for every notification.
#[must_use]
pub fn audit_body(
    context: &NotificationContext,
    notification: &Notification,
    trigger: &Trigger,
    status: NotificationStatus,
) -> String {
    let mut body = format!(
        "<b>Alert {} was {} at {}</b><br/>\
         <b>Notification:  </b> {}<br/>\
         <b>Triggered by:  </b> {}<br/>\
         <b>Notification is on cooldown until:  </b> {}<br/>\
         <b>Evaluated metric expression:  </b> {}<br/>\
         <b>Trigger details: </b> {}<br/>\
         <b>Triggering event value:  </b> {}<br/>",
        context.alert.name,
        status.label(),
        format_gmt(context.trigger_fired_time),
        notification.name,
        trigger.name,
        format_gmt(context.cooldown_expiration),
        context.alert.expression,
        trigger.details(),
        context.trigger_event_value,
    );
    body.push_str(DISCLAIMER);
    body
}

#[cfg(test)]
mod tests {
    use super::{AuditUrls, format_gmt};
    use crate::config::AuditSettings;

    fn urls() -> AuditUrls {
        AuditUrls::new(&AuditSettings {
            alert_url_template: "https://argus/#/alerts/$alertid$".to_string(),
            metric_url_template: "https://argus/#/viewmetrics?expression=$expression$".to_string(),
        })
    }

    #[test]
    fn formats_gmt_timestamps() {
        assert_eq!(format_gmt(0), "01/01/1970 00:00:00 GMT");
        assert_eq!(format_gmt(1_700_000_000_000), "11/14/2023 22:13:20 GMT");
    }

    #[test]
    fn alert_url_substitutes_id() {
        assert_eq!(urls().alert_url(Some(42)), "https://argus/#/alerts/42");
    }

    #[test]
    fn metric_url_clamps_end_to_now() {
        let hour = 60 * 60 * 1000;
        let fired = 10 * hour;
        let url = urls().metric_url("scope:metric{a=b}", fired, fired + hour);
        let expected_start = (4 * hour).to_string();
        let expected_end = (11 * hour).to_string();
        assert_eq!(
            url,
            format!(
                "https://argus/#/viewmetrics?expression={expected_start}%3A{expected_end}%3Ascope%3Ametric%7Ba%3Db%7D"
            )
        );
    }
}

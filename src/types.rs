use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::history::History;

/// Alert definition as seen by the notifiers. Persistence lives elsewhere.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Alert {
    pub id: Option<u64>,
    pub name: String,
    pub owner: String,
    pub expression: String,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Notification {
    pub id: Option<u64>,
    pub name: String,
    /// Routing keys, group ids or aspect paths depending on the provider.
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub metrics_to_annotate: Vec<String>,
    #[serde(default)]
    pub custom_text: Option<String>,
    #[serde(default)]
    pub severity_level: i32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
    Equal,
    NotEqual,
    Between,
    NotBetween,
    NoData,
}

impl TriggerType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanOrEq => "GREATER_THAN_OR_EQ",
            Self::LessThan => "LESS_THAN",
            Self::LessThanOrEq => "LESS_THAN_OR_EQ",
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::Between => "BETWEEN",
            Self::NotBetween => "NOT_BETWEEN",
            Self::NoData => "NO_DATA",
        }
    }
}

impl Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Trigger {
    pub id: Option<u64>,
    pub name: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub threshold: f64,
    #[serde(default)]
    pub secondary_threshold: Option<f64>,
    #[serde(default)]
    pub inertia_millis: u64,
}

impl Trigger {
    /// Short human readable description used in audit bodies and provider
    /// payloads.
    #[must_use]
    pub fn details(&self) -> String {
        let secondary = self
            .secondary_threshold
            .map_or_else(|| "null".to_string(), |value| value.to_string());
        format!(
            "type={}, name={}, threshold={}, secondaryThreshold={}, inertia={}",
            self.trigger_type, self.name, self.threshold, secondary, self.inertia_millis
        )
    }
}

/// A time series. Displays and parses as `scope:metric{tag=value,...}`;
/// the namespace only shows up in [`Metric::identifier`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Metric {
    #[serde(default)]
    pub namespace: Option<String>,
    pub scope: String,
    pub metric: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Metric {
    /// `namespace:scope:metric{tag=value,...}`, the key PagerDuty incidents
    /// are deduplicated on. A missing namespace renders as `null` and an
    /// empty tag set as a lone `}`; keys already issued depend on both.
    #[must_use]
    pub fn identifier(&self) -> String {
        let tags = self
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        let tags = if tags.is_empty() {
            "}".to_string()
        } else {
            format!("{{{tags}}}")
        };
        format!(
            "{}:{}:{}{tags}",
            self.namespace.as_deref().unwrap_or("null"),
            self.scope,
            self.metric
        )
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.metric)?;
        if !self.tags.is_empty() {
            f.write_str("{")?;
            for (idx, (key, value)) in self.tags.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (series, tags_src) = match trimmed.find('{') {
            Some(open) => {
                if !trimmed.ends_with('}') {
                    return Err(format!("unterminated tag block in {trimmed}"));
                }
                (&trimmed[..open], Some(&trimmed[open + 1..trimmed.len() - 1]))
            }
            None => (trimmed, None),
        };
        let (scope, metric) = series
            .split_once(':')
            .ok_or_else(|| format!("expected scope:metric, got {trimmed}"))?;
        if scope.is_empty() || metric.is_empty() {
            return Err(format!("expected scope:metric, got {trimmed}"));
        }

        let mut tags = BTreeMap::new();
        for pair in tags_src.into_iter().flat_map(|src| src.split(',')) {
            if pair.trim().is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("invalid tag {pair} in {trimmed}"))?;
            tags.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self {
            namespace: None,
            scope: scope.to_string(),
            metric: metric.to_string(),
            tags,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotificationStatus {
    Triggered,
    Cleared,
}

impl NotificationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Triggered => "Triggered",
            Self::Cleared => "Cleared",
        }
    }
}

/// Everything a notifier needs for one trigger evaluation.
///
/// `notification` and `trigger` identify the firing pair by name; the
/// authoritative instances are resolved against `alert` before dispatch.
#[derive(Clone)]
pub struct NotificationContext {
    pub alert: Arc<Alert>,
    pub notification: Notification,
    pub trigger: Trigger,
    pub triggered_metric: Metric,
    /// Epoch milliseconds.
    pub trigger_fired_time: i64,
    /// Epoch milliseconds.
    pub cooldown_expiration: i64,
    pub trigger_event_value: f64,
    pub retry_count: u32,
    pub history: Arc<dyn History>,
}

impl fmt::Debug for NotificationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationContext")
            .field("alert", &self.alert.name)
            .field("notification", &self.notification.name)
            .field("trigger", &self.trigger.name)
            .field("triggered_metric", &self.triggered_metric.identifier())
            .field("trigger_fired_time", &self.trigger_fired_time)
            .field("trigger_event_value", &self.trigger_event_value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Metric, Trigger, TriggerType};

    #[test]
    fn metric_identifier_round_trips_through_parser() {
        let metric: Metric = match "system.host1:cpu.user{dc=sfo,pod=na1}".parse() {
            Ok(metric) => metric,
            Err(err) => panic!("unexpected parse failure: {err}"),
        };
        assert_eq!(metric.scope, "system.host1");
        assert_eq!(metric.metric, "cpu.user");
        assert_eq!(metric.tags.get("pod").map(String::as_str), Some("na1"));
        assert_eq!(metric.to_string(), "system.host1:cpu.user{dc=sfo,pod=na1}");
    }

    #[test]
    fn identifier_carries_namespace_and_tag_block() {
        let mut metric: Metric = match "s:m".parse() {
            Ok(metric) => metric,
            Err(err) => panic!("unexpected parse failure: {err}"),
        };
        assert_eq!(metric.identifier(), "null:s:m}");

        metric.namespace = Some("ns1".to_string());
        metric.tags.insert("dc".to_string(), "sfo".to_string());
        metric.tags.insert("app".to_string(), "web".to_string());
        assert_eq!(metric.identifier(), "ns1:s:m{app=web,dc=sfo}");
    }

    #[test]
    fn metric_without_scope_is_rejected() {
        assert!("cpu.user".parse::<Metric>().is_err());
        assert!("scope:metric{dc=sfo".parse::<Metric>().is_err());
    }

    #[test]
    fn trigger_details_lists_thresholds() {
        let trigger = Trigger {
            id: Some(7),
            name: "high cpu".to_string(),
            trigger_type: TriggerType::GreaterThan,
            threshold: 90.0,
            secondary_threshold: None,
            inertia_millis: 0,
        };
        assert_eq!(
            trigger.details(),
            "type=GREATER_THAN, name=high cpu, threshold=90, secondaryThreshold=null, inertia=0"
        );
    }
}

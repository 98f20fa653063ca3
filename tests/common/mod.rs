#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use argus_notify::config::Config;
use argus_notify::history::{History, MemoryHistory};
use argus_notify::types::{
    Alert, Metric, Notification, NotificationContext, Trigger, TriggerType,
};

pub const FIRED_AT: i64 = 1_700_000_000_000;

/// Fast HTTP timings so retry tests stay quick.
pub const FAST_HTTP: &str = r#"
[http]
connect_timeout = "1s"
request_timeout = "2s"
retry_initial_backoff = "5ms"
retry_max_backoff = "10ms"
"#;

pub fn config(sections: &str) -> Config {
    Config::from_toml_str(&format!("{FAST_HTTP}\n{sections}")).expect("test config")
}

/// Like [`config`] but with a shorter per-request timeout.
pub fn config_with_request_timeout(timeout: &str, sections: &str) -> Config {
    let http = FAST_HTTP.replace(
        "request_timeout = \"2s\"",
        &format!("request_timeout = \"{timeout}\""),
    );
    Config::from_toml_str(&format!("{http}\n{sections}")).expect("test config")
}

pub fn notification(name: &str, subscriptions: &[&str]) -> Notification {
    Notification {
        id: Some(12),
        name: name.to_string(),
        subscriptions: subscriptions.iter().map(|s| (*s).to_string()).collect(),
        metrics_to_annotate: vec!["system.host1:cpu.user{dc=sfo}".to_string()],
        custom_text: Some("check the host".to_string()),
        severity_level: 2,
    }
}

pub fn trigger(name: &str) -> Trigger {
    Trigger {
        id: Some(7),
        name: name.to_string(),
        trigger_type: TriggerType::GreaterThan,
        threshold: 90.0,
        secondary_threshold: None,
        inertia_millis: 0,
    }
}

pub fn alert(notification: Notification, trigger: Trigger) -> Arc<Alert> {
    Arc::new(Alert {
        id: Some(42),
        name: "cpu-high".to_string(),
        owner: "ops-team".to_string(),
        expression: "-1h:system.host1:cpu.user:avg".to_string(),
        notifications: vec![notification],
        triggers: vec![trigger],
    })
}

/// Context for the alert's only notification and trigger.
pub fn context(alert: &Arc<Alert>, history: &Arc<MemoryHistory>) -> NotificationContext {
    let history: Arc<dyn History> = history.clone();
    NotificationContext {
        alert: Arc::clone(alert),
        notification: alert.notifications[0].clone(),
        trigger: alert.triggers[0].clone(),
        triggered_metric: "system.host1:cpu.user{dc=sfo}".parse::<Metric>().unwrap(),
        trigger_fired_time: FIRED_AT,
        cooldown_expiration: FIRED_AT + 600_000,
        trigger_event_value: 95.5,
        retry_count: 0,
        history,
    }
}

//! Provider notifiers. Each one plugs into [`crate::dispatch::AuditedNotifier`].

use chrono::Utc;
use tracing::warn;

use crate::history::History;

pub mod goc;
pub mod gus;
pub mod pagerduty;
pub mod refocus;

pub use goc::GocNotifier;
pub use gus::GusNotifier;
pub use pagerduty::PagerDutyNotifier;
pub use refocus::RefocusNotifier;

/// Keep at most `max` characters, marking the cut with `...`.
pub(crate) fn truncate_with_ellipsis(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Record that a provider switched off by configuration skipped a
/// notification. Not a failure.
pub(crate) fn skip_disabled(provider: &'static str, target: &str, history: &dyn History) {
    let message = format!(
        "Sending {provider} notification is disabled. Not sending message for {target}."
    );
    warn!(provider, recipient = target, "{message}");
    history.append_message_and_update(&message, None, 0);
}

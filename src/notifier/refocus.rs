use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::Result;
use crate::dispatch::{ProviderNotifier, Resolved};
use crate::error::NotifyError;
use crate::forwarder::RefocusForwarder;
use crate::types::NotificationStatus;

use super::now_millis;

const PROVIDER: &str = "Refocus";
const CLEARED_VALUE: &str = "0.000000";

/// Sends the triggering value to every subscribed aspect path through the
/// forwarder queue. Nothing is posted synchronously.
pub struct RefocusNotifier {
    forwarder: Arc<RefocusForwarder>,
}

impl RefocusNotifier {
    #[must_use]
    pub const fn new(forwarder: Arc<RefocusForwarder>) -> Self {
        Self { forwarder }
    }

    fn fan_out(&self, target: &Resolved<'_>, status: NotificationStatus) -> Result<bool> {
        let context = target.context;
        let aspect_paths = &context.notification.subscriptions;
        if aspect_paths.is_empty() {
            return Err(NotifyError::Precondition(
                "aspect paths (subscriptions) cannot be empty".to_string(),
            )
            .into());
        }

        let value = match status {
            NotificationStatus::Triggered => format!("{:.6}", context.trigger_event_value),
            NotificationStatus::Cleared => CLEARED_VALUE.to_string(),
        };
        let next_fire_time = now_millis();
        let mut all_enqueued = true;
        for aspect in aspect_paths {
            info!(provider = PROVIDER, %aspect, %value, "queueing aspect value");
            all_enqueued &= self.forwarder.send_refocus_notification(
                aspect,
                &value,
                &context.alert.owner,
                "",
                Arc::clone(&context.history),
                next_fire_time,
            );
        }
        Ok(all_enqueued)
    }
}

#[async_trait]
impl ProviderNotifier for RefocusNotifier {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn send_additional(&self, target: &Resolved<'_>) -> Result<bool> {
        self.fan_out(target, NotificationStatus::Triggered)
    }

    async fn clear_additional(&self, target: &Resolved<'_>) -> Result<bool> {
        self.fan_out(target, NotificationStatus::Cleared)
    }
}

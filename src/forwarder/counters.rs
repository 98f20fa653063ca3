use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};

const ENQUEUED: &str = "argus_notify_refocus_enqueued_total";
const DELIVERED: &str = "argus_notify_refocus_delivered_total";
const DISCARDED: &str = "argus_notify_refocus_discarded_total";
const QUEUE_LENGTH: &str = "argus_notify_refocus_queue_length";

pub(crate) fn describe_metrics() {
    describe_counter!(ENQUEUED, "Refocus samples accepted into the queue");
    describe_counter!(DELIVERED, "Refocus samples included in an accepted bulk upsert");
    describe_counter!(DISCARDED, "Refocus samples dropped with a failed or disabled batch");
    describe_gauge!(QUEUE_LENGTH, "Refocus samples waiting at the last forwarding cycle");
}

/// Forwarder totals. Each counter only grows; they are not updated
/// together.
#[derive(Debug, Default)]
pub struct ForwarderCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    discarded: AtomicU64,
    max_queue_length: AtomicU64,
}

impl ForwarderCounters {
    pub(crate) fn add_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        counter!(ENQUEUED).increment(1);
    }

    pub(crate) fn add_delivered(&self, count: u64) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
        counter!(DELIVERED).increment(count);
    }

    pub(crate) fn add_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
        counter!(DISCARDED).increment(count);
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn observe_queue_length(&self, length: u64) {
        self.max_queue_length.fetch_max(length, Ordering::Relaxed);
        gauge!(QUEUE_LENGTH).set(length as f64);
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// `delivered + discarded`.
    pub fn processed(&self) -> u64 {
        self.delivered() + self.discarded()
    }

    pub fn max_queue_length(&self) -> u64 {
        self.max_queue_length.load(Ordering::Relaxed)
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter};

use super::DeliveryReport;

const CALLS: &str = "argus_notify_delivery_calls_total";
const RETRIES: &str = "argus_notify_delivery_retries_total";
const FAILURES: &str = "argus_notify_delivery_failures_total";

/// Register descriptions with whatever recorder the host installed.
pub fn describe_metrics() {
    describe_counter!(CALLS, "Synchronous provider deliveries attempted");
    describe_counter!(RETRIES, "Retries spent across provider deliveries");
    describe_counter!(FAILURES, "Provider deliveries that ultimately failed");
}

/// Per-notifier totals. Updated once per delivery call, never per attempt.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    calls: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl DeliveryCounters {
    pub(crate) fn record(&self, provider: &'static str, report: &DeliveryReport) {
        let retries = u64::from(report.retries());
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.retries.fetch_add(retries, Ordering::Relaxed);
        counter!(CALLS, "provider" => provider).increment(1);
        counter!(RETRIES, "provider" => provider).increment(retries);
        if !report.delivered {
            self.failures.fetch_add(1, Ordering::Relaxed);
            counter!(FAILURES, "provider" => provider).increment(1);
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

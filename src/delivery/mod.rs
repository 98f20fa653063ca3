//! Bounded, status-driven retry loop shared by the synchronous notifiers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{FailureKind, TransportError};
use crate::history::History;
use crate::transport::{HttpReply, correlation_id};

mod counters;
mod policy;

pub use counters::{DeliveryCounters, describe_metrics};
pub use policy::{ResponsePolicy, Verdict, classify_error};

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Pause after a 429 before the next attempt.
    pub rate_limited_delay: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Handed to the request closure on every attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: u32,
    /// The previous attempt reported an expired token.
    pub refresh_token: bool,
    pub correlation_id: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempts: u32,
    pub status: Option<u16>,
    pub failure: Option<FailureKind>,
    /// Last HTTP reply received, if any.
    pub reply: Option<HttpReply>,
}

impl DeliveryReport {
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub struct RetryEngine {
    provider: &'static str,
    settings: RetrySettings,
    policy: ResponsePolicy,
    counters: Arc<DeliveryCounters>,
}

impl RetryEngine {
    #[must_use]
    pub fn new(provider: &'static str, settings: RetrySettings, policy: ResponsePolicy) -> Self {
        Self {
            provider,
            settings,
            policy,
            counters: Arc::new(DeliveryCounters::default()),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DeliveryCounters> {
        Arc::clone(&self.counters)
    }

    /// Run the attempt loop, then record exactly one history line and one
    /// counter update for the call.
    pub async fn deliver<F, Fut>(&self, target: &str, history: &dyn History, send: F) -> DeliveryReport
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<HttpReply, TransportError>>,
    {
        let report = self.run(target, send).await;
        self.counters.record(self.provider, &report);

        let code = report.status.map_or(-1, i32::from);
        if report.delivered {
            info!(
                provider = self.provider,
                recipient = target,
                status = code,
                retries = report.retries(),
                "notification delivered"
            );
            history.append_message_and_update(
                &format!(
                    "Success - {} notification to {target} delivered with response code {code} after {} retries.",
                    self.provider,
                    report.retries()
                ),
                None,
                0,
            );
        } else {
            let failure = report.failure.unwrap_or(FailureKind::Transport);
            warn!(
                provider = self.provider,
                recipient = target,
                status = code,
                retries = report.retries(),
                %failure,
                "notification delivery failed"
            );
            let cause = report.reply.as_ref().map(HttpReply::preview);
            history.append_message_and_update(
                &format!(
                    "Failure - {} notification to {target} failed ({failure}) with response code {code} after {} retries.",
                    self.provider,
                    report.retries()
                ),
                cause.as_deref(),
                code,
            );
        }
        report
    }

    /// The bare attempt loop with no bookkeeping.
    ///
    /// Stops on success, on a fatal verdict, or after `max_attempts`.
    pub async fn run<F, Fut>(&self, target: &str, mut send: F) -> DeliveryReport
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<HttpReply, TransportError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.settings.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.25)
            .with_max_interval(self.settings.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut report = DeliveryReport {
            delivered: false,
            attempts: 0,
            status: None,
            failure: None,
            reply: None,
        };
        let mut refresh_token = false;

        for number in 1..=max_attempts {
            let attempt = Attempt {
                number,
                refresh_token,
                correlation_id: correlation_id(),
            };
            let correlation_id = attempt.correlation_id.clone();
            let started = Instant::now();
            report.attempts = number;

            let verdict = match send(attempt).await {
                Ok(reply) => {
                    let verdict = self.policy.classify(&reply);
                    report.status = Some(reply.status.as_u16());
                    report.reply = Some(reply);
                    verdict
                }
                Err(err) => {
                    let verdict = classify_error(&err);
                    report.status = None;
                    report.reply = None;
                    debug!(
                        provider = self.provider,
                        recipient = target,
                        %correlation_id,
                        attempt = number,
                        error = %err,
                        "attempt produced no response"
                    );
                    verdict
                }
            };

            match verdict {
                Verdict::Delivered => {
                    debug!(
                        provider = self.provider,
                        recipient = target,
                        %correlation_id,
                        attempt = number,
                        latency_ms = started.elapsed().as_millis(),
                        "attempt succeeded"
                    );
                    report.delivered = true;
                    report.failure = None;
                    return report;
                }
                Verdict::Fatal(kind) => {
                    report.failure = Some(kind);
                    return report;
                }
                Verdict::Retry {
                    kind,
                    refresh_token: refresh,
                } => {
                    report.failure = Some(kind);
                    if number == max_attempts {
                        break;
                    }
                    refresh_token = refresh;
                    let delay = match kind {
                        FailureKind::RateLimited => self.settings.rate_limited_delay,
                        FailureKind::AuthExpired => Duration::ZERO,
                        _ => backoff
                            .next_backoff()
                            .unwrap_or(self.settings.max_backoff),
                    };
                    warn!(
                        provider = self.provider,
                        recipient = target,
                        %correlation_id,
                        attempt = number,
                        delay_ms = delay.as_millis(),
                        refresh_token,
                        failure = %kind,
                        "retrying delivery"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
        report
    }
}

//! Asynchronous Refocus path: producers enqueue samples, a single consumer
//! drains them in batches and upserts each batch with one bulk request.
//!
//! Delivery is at most once. A batch that still fails after the retry bound
//! is counted as discarded and never re-queued.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TrySendError, unbounded};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::Result;
use crate::config::{Config, RefocusSettings};
use crate::delivery::{DeliveryReport, ResponsePolicy, RetryEngine};
use crate::error::FailureKind;
use crate::history::History;
use crate::transport::{CORRELATION_HEADER, HttpReply, HttpTransport, endpoint_url};

mod counters;
mod sample;

pub use counters::ForwarderCounters;
pub(crate) use counters::describe_metrics;
pub use sample::{RefocusSample, bulk_body};

const PROVIDER: &str = "Refocus";

#[derive(Debug, Deserialize)]
struct UpsertReply {
    status: Option<String>,
    #[serde(rename = "jobId")]
    job_id: Option<i64>,
}

/// Outcome of posting one drained batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Delivered { job_id: Option<i64> },
    Discarded { failure: FailureKind },
}

struct Cycle {
    last_send: Instant,
    last_status: Instant,
}

pub struct RefocusForwarder {
    enabled: bool,
    bulk_url: Url,
    token: SecretString,
    max_samples: usize,
    send_interval: Duration,
    status_interval: Duration,
    poll_interval: Duration,
    rate_limit_interval: Duration,
    detailed_logging: bool,
    detailed_history: bool,
    transport: HttpTransport,
    engine: RetryEngine,
    tx: Sender<RefocusSample>,
    rx: Receiver<RefocusSample>,
    counters: Arc<ForwarderCounters>,
    cycle: Mutex<Cycle>,
}

impl RefocusForwarder {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built or the bulk
    /// URL cannot be derived from the endpoint.
    pub fn new(config: &Config) -> Result<Self> {
        let settings: &RefocusSettings = &config.refocus;
        let bulk_url = endpoint_url(&settings.endpoint, "v1/samples/upsert/bulk")?;
        let (tx, rx) = unbounded();
        let now = Instant::now();
        Ok(Self {
            enabled: settings.enabled,
            bulk_url,
            token: settings.token.clone(),
            max_samples: settings.max_samples_to_send,
            send_interval: settings.send_interval,
            status_interval: settings.status_interval,
            poll_interval: settings.poll_interval,
            rate_limit_interval: settings.rate_limit_interval(),
            detailed_logging: settings.detailed_logging,
            detailed_history: settings.detailed_history,
            transport: HttpTransport::new(PROVIDER, &settings.transport(&config.http))?,
            engine: RetryEngine::new(
                PROVIDER,
                settings.retry(&config.http),
                ResponsePolicy::REFOCUS,
            ),
            tx,
            rx,
            counters: Arc::new(ForwarderCounters::default()),
            cycle: Mutex::new(Cycle {
                last_send: now,
                last_status: now,
            }),
        })
    }

    #[must_use]
    pub fn counters(&self) -> Arc<ForwarderCounters> {
        Arc::clone(&self.counters)
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.rx.len()
    }

    /// Stop accepting samples. Already queued samples can still be drained.
    pub fn close(&self) {
        self.tx.close();
    }

    /// Put a sample on the queue without waiting.
    ///
    /// Only fails once the queue is closed; the sample is then dropped and
    /// not counted.
    pub fn enqueue(&self, sample: RefocusSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => {
                self.counters.add_enqueued();
                true
            }
            Err(TrySendError::Closed(sample) | TrySendError::Full(sample)) => {
                error!(sample = %sample.describe(), "Refocus sample not enqueued, queue is closed");
                false
            }
        }
    }

    /// Build a sample, enqueue it and note that in the alert history.
    pub fn send_refocus_notification(
        &self,
        aspect_path: &str,
        value: &str,
        user_name: &str,
        token_id: &str,
        history: Arc<dyn History>,
        next_fire_time: i64,
    ) -> bool {
        let sample = RefocusSample::new(
            aspect_path,
            value,
            user_name,
            token_id,
            Arc::clone(&history),
            next_fire_time,
        );
        let message = format!("Refocus sample {} enqueued.", sample.describe());
        if !self.enqueue(sample) {
            return false;
        }
        debug!("{message}");
        history.append_message_and_update(&message, None, 0);
        true
    }

    /// One consumer cycle.
    ///
    /// A batch is drained when the queue is non-empty and `send_interval`
    /// has passed since the last send, or when more than a full batch is
    /// waiting. Returns the number of samples delivered by this cycle.
    pub async fn forward_notifications(&self) -> usize {
        self.forward_cycle(false).await
    }

    /// Forward until the queue is empty, ignoring `send_interval`.
    /// Returns the number of samples delivered.
    pub async fn flush(&self) -> usize {
        let mut delivered = 0;
        while !self.rx.is_empty() {
            delivered += self.forward_cycle(true).await;
        }
        delivered
    }

    async fn forward_cycle(&self, force: bool) -> usize {
        let mut cycle = self.cycle.lock().await;
        let queued = self.rx.len();
        self.counters
            .observe_queue_length(u64::try_from(queued).unwrap_or(u64::MAX));

        let since_last = cycle.last_send.elapsed();
        let mut forward_duration = Duration::ZERO;
        let mut delivered = 0;

        let due = since_last >= self.send_interval || force;
        if (queued > 0 && due) || queued > self.max_samples {
            info!(
                queued,
                since_last_ms = since_last.as_millis(),
                "forwarding queued Refocus samples"
            );
            let started = Instant::now();
            let batch = self.drain();
            if !batch.is_empty() {
                cycle.last_send = Instant::now();
                let count = batch.len();
                let count_u64 = u64::try_from(count).unwrap_or(u64::MAX);
                match self.send_batch(&batch).await {
                    BatchOutcome::Delivered { job_id } => {
                        self.counters.add_delivered(count_u64);
                        delivered = count;
                        info!(
                            count,
                            job_id,
                            total_delivered = self.counters.delivered(),
                            "Refocus samples forwarded"
                        );
                    }
                    BatchOutcome::Discarded { failure } => {
                        self.counters.add_discarded(count_u64);
                        warn!(
                            count,
                            %failure,
                            total_discarded = self.counters.discarded(),
                            "Refocus samples dropped"
                        );
                    }
                }
                forward_duration = started.elapsed();
            }
        }

        self.log_status(&mut cycle);
        drop(cycle);
        self.rate_limit(forward_duration).await;
        delivered
    }

    /// Drive [`Self::forward_notifications`] every `poll_interval` until
    /// `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Refocus forwarder stopping");
                    break;
                }
                _ = self.forward_notifications() => {}
            }
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Refocus forwarder stopping");
                    break;
                }
                () = sleep(self.poll_interval) => {}
            }
        }
    }

    fn drain(&self) -> Vec<RefocusSample> {
        let mut batch = Vec::with_capacity(self.max_samples.min(self.rx.len()));
        while batch.len() < self.max_samples {
            match self.rx.try_recv() {
                Ok(sample) => batch.push(sample),
                Err(_) => break,
            }
        }
        batch
    }

    /// Post one batch with the bounded retry loop.
    pub async fn send_batch(&self, batch: &[RefocusSample]) -> BatchOutcome {
        let count = batch.len();
        if !self.enabled {
            info!(count, "Refocus notification is disabled");
            self.per_sample(batch, false, |json| {
                format!("Unable to send {json}. Refocus notification is disabled.")
            });
            return BatchOutcome::Discarded {
                failure: FailureKind::Disabled,
            };
        }

        let body = bulk_body(batch);
        let body = &body;
        let url = &self.bulk_url;
        let token = self.token.expose_secret();
        let client = self.transport.client();
        let label = format!("bulk upsert of {count} samples");
        let started = Instant::now();

        let report = self
            .engine
            .run(&label, |attempt| async move {
                if attempt.number > 1 {
                    info!(attempt = attempt.number, "retrying Refocus bulk upsert");
                }
                let response = client
                    .post(url.clone())
                    .header(reqwest::header::AUTHORIZATION, token)
                    .header(CORRELATION_HEADER, attempt.correlation_id.as_str())
                    .json(body)
                    .send()
                    .await?;
                HttpReply::read(response).await
            })
            .await;

        if report.delivered {
            let parsed = report
                .reply
                .as_ref()
                .and_then(|reply| serde_json::from_str::<UpsertReply>(&reply.body).ok());
            let job_id = parsed.as_ref().and_then(|reply| reply.job_id);
            info!(
                job_id,
                upsert_status = parsed.as_ref().and_then(|reply| reply.status.as_deref()),
                count,
                elapsed_ms = started.elapsed().as_millis(),
                retries = report.retries(),
                "Refocus bulk upsert accepted"
            );
            self.per_sample(batch, true, |json| format!("Refocus sample {json} sent."));
            return BatchOutcome::Delivered { job_id };
        }

        let failure = report.failure.unwrap_or(FailureKind::Transport);
        error!(
            count,
            status = report.status,
            %failure,
            attempts = report.attempts,
            "failed to forward Refocus samples"
        );
        self.per_sample(batch, false, |json| failure_line(json, &report));
        BatchOutcome::Discarded { failure }
    }

    fn per_sample(&self, batch: &[RefocusSample], success: bool, line: impl Fn(&str) -> String) {
        if !self.detailed_logging && !self.detailed_history {
            return;
        }
        for sample in batch {
            let message = line(&sample.describe());
            if self.detailed_logging {
                if success {
                    info!("{message}");
                } else {
                    warn!("{message}");
                }
            }
            if self.detailed_history {
                sample.history.append_message_and_update(&message, None, 0);
            }
        }
    }

    fn log_status(&self, cycle: &mut Cycle) {
        if cycle.last_status.elapsed() <= self.status_interval {
            return;
        }
        info!(
            enqueued = self.counters.enqueued(),
            delivered = self.counters.delivered(),
            discarded = self.counters.discarded(),
            processed = self.counters.processed(),
            queue_length = self.rx.len(),
            max_queue_length = self.counters.max_queue_length(),
            "Refocus forwarder status"
        );
        cycle.last_status = Instant::now();
    }

    async fn rate_limit(&self, spent: Duration) {
        if let Some(pause) = self.rate_limit_interval.checked_sub(spent) {
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }
    }
}

fn failure_line(json: &str, report: &DeliveryReport) -> String {
    match report.failure {
        Some(FailureKind::NetworkTimeout) => {
            format!("Failed to forward {json} due to session time out.")
        }
        Some(FailureKind::RateLimited) => {
            format!("Failed to forward {json} due to refocus throttling.")
        }
        Some(FailureKind::ServerError(code)) => {
            format!("Failed to forward {json} due to http error {code}.")
        }
        _ => {
            let code = report.status.map_or(-1, i32::from);
            let body = report.reply.as_ref().map(HttpReply::preview).unwrap_or_default();
            format!("Failed to forward {json} Refocus samples. Response code {code} response: {body}")
        }
    }
}

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod audit;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod history;
pub mod notifier;
pub mod telemetry;
pub mod transport;
pub mod types;

pub type Result<T> = std::result::Result<T, error::Error>;

/// Register descriptions for every metric the crate emits.
pub fn describe_metrics() {
    delivery::describe_metrics();
    forwarder::describe_metrics();
}

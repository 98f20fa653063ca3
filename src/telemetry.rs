use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

use crate::Result;
use crate::error::Error;

/// Install the global tracing subscriber.
///
/// The filter is resolved from `explicit_filter`, then `RUST_LOG`, then
/// `info`; the first candidate that parses wins.
///
/// # Errors
///
/// Returns an error if no filter candidate parses, if JSON output is
/// requested but the `json-logs` feature was not compiled in, or if a global
/// subscriber is already installed.
pub fn init_tracing(explicit_filter: Option<&str>, use_json: bool) -> Result<()> {
    let filter = resolve_filter(explicit_filter, std::env::var("RUST_LOG").ok())?;

    #[cfg(feature = "json-logs")]
    if use_json {
        let subscriber = Registry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true),
        );
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| Error::Telemetry(err.to_string()))?;
        return Ok(());
    }

    #[cfg(not(feature = "json-logs"))]
    if use_json {
        return Err(Error::Telemetry(
            "binary was built without the `json-logs` feature".to_string(),
        ));
    }

    let subscriber = Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true),
    );
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| Error::Telemetry(err.to_string()))
}

fn resolve_filter(explicit: Option<&str>, from_env: Option<String>) -> Result<EnvFilter> {
    explicit
        .map(str::to_string)
        .into_iter()
        .chain(from_env)
        .chain(std::iter::once("info".to_string()))
        .find_map(|candidate| EnvFilter::try_new(candidate).ok())
        .ok_or_else(|| Error::Telemetry("invalid log filter".to_string()))
}

#[cfg(test)]
mod tests {
    use super::resolve_filter;

    #[test]
    fn falls_back_past_unparseable_filters() {
        let filter = resolve_filter(Some("argus_notify=[bad"), Some("warn".to_string()));
        match filter {
            Ok(filter) => assert_eq!(filter.to_string(), "warn"),
            Err(err) => panic!("expected a filter: {err}"),
        }
    }

    #[test]
    fn explicit_filter_wins() {
        let filter = resolve_filter(Some("argus_notify=debug"), Some("warn".to_string()));
        match filter {
            Ok(filter) => assert_eq!(filter.to_string(), "argus_notify=debug"),
            Err(err) => panic!("expected a filter: {err}"),
        }
    }
}

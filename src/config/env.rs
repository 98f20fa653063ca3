use std::time::Duration;

use humantime::parse_duration;

use crate::error::ConfigError;

/// Typed reads over a flat key/value source, normally the process
/// environment.
pub(super) struct Overrides<F> {
    lookup: F,
}

impl Overrides<fn(&str) -> Result<Option<String>, ConfigError>> {
    pub(super) fn from_process() -> Self {
        Self {
            lookup: process_var,
        }
    }
}

fn process_var(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(ConfigError::Other(format!("{key}: {err}"))),
    }
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Result<Option<String>, ConfigError>,
{
    #[cfg(test)]
    pub(super) const fn new(lookup: F) -> Self {
        Self { lookup }
    }

    pub(super) fn string(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        Ok((self.lookup)(key)?.filter(|value| !value.trim().is_empty()))
    }

    pub(super) fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)?
            .map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .map_err(|err| ConfigError::InvalidField {
                        field: key,
                        message: err.to_string(),
                    })
            })
            .transpose()
    }

    pub(super) fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.parse::<bool>(key)
    }

    pub(super) fn duration(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        self.string(key)?
            .map(|value| {
                parse_duration(value.trim()).map_err(|err| ConfigError::InvalidField {
                    field: key,
                    message: err.to_string(),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Overrides;
    use crate::error::ConfigError;

    fn source(key: &str) -> Result<Option<String>, ConfigError> {
        Ok(match key {
            "REFOCUS_SEND_INTERVAL" => Some("15s".to_string()),
            "REFOCUS_ENABLED" => Some("true".to_string()),
            "REFOCUS_MAX_SAMPLES" => Some("nope".to_string()),
            "BLANK" => Some("   ".to_string()),
            _ => None,
        })
    }

    #[test]
    fn reads_typed_values() {
        let overrides = Overrides::new(source);
        assert!(matches!(
            overrides.duration("REFOCUS_SEND_INTERVAL"),
            Ok(Some(d)) if d == Duration::from_secs(15)
        ));
        assert!(matches!(overrides.flag("REFOCUS_ENABLED"), Ok(Some(true))));
        assert!(matches!(overrides.string("MISSING"), Ok(None)));
        assert!(matches!(overrides.string("BLANK"), Ok(None)));
    }

    #[test]
    fn reports_the_offending_key() {
        let overrides = Overrides::new(source);
        match overrides.parse::<usize>("REFOCUS_MAX_SAMPLES") {
            Err(ConfigError::InvalidField { field, .. }) => {
                assert_eq!(field, "REFOCUS_MAX_SAMPLES");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use humantime::parse_duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Refocus sample forwarder for Argus notifications", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Run a single forwarding cycle, then exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub once: bool,

    /// Override the forwarder poll interval (e.g. "500ms").
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Queue an aspect value before forwarding starts; repeatable.
    #[arg(long, value_name = "NAME=VALUE", value_parser = parse_sample)]
    pub enqueue: Vec<(String, String)>,

    /// Emit JSON logs (needs `--features json-logs`).
    #[arg(long, action = ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Explicit log filter (e.g. "argus_notify=debug").
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

fn parse_sample(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    if name.trim().is_empty() {
        return Err("sample name cannot be empty".to_string());
    }
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_sample;

    #[test]
    fn parses_name_value_pairs() {
        assert_eq!(
            parse_sample("subject|aspect=1.5"),
            Ok(("subject|aspect".to_string(), "1.5".to_string()))
        );
        assert!(parse_sample("no-separator").is_err());
        assert!(parse_sample("=3").is_err());
    }
}

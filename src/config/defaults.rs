use std::time::Duration;

pub(super) const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(super) const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(super) const fn default_retry_initial_backoff() -> Duration {
    Duration::from_millis(200)
}

pub(super) const fn default_retry_max_backoff() -> Duration {
    Duration::from_secs(2)
}

pub(super) fn default_alert_url_template() -> String {
    "http://localhost:8080/argus/#/alerts/$alertid$".to_string()
}

pub(super) fn default_metric_url_template() -> String {
    "http://localhost:8080/argus/#/viewmetrics?expression=$expression$".to_string()
}

pub(super) fn default_pagerduty_endpoint() -> String {
    "https://events.pagerduty.com".to_string()
}

pub(super) fn default_salesforce_auth_endpoint() -> String {
    "https://login.salesforce.com".to_string()
}

pub(super) fn default_gus_post_endpoint() -> String {
    "https://gus.my.salesforce.com/services/data/v35.0/chatter/feed-elements".to_string()
}

pub(super) fn default_refocus_endpoint() -> String {
    "https://refocus.example.com".to_string()
}

pub(super) const fn default_max_attempts() -> u32 {
    3
}

pub(super) const fn default_rate_limited_delay() -> Duration {
    Duration::from_secs(1)
}

pub(super) const fn default_pool_max_per_host() -> usize {
    10
}

pub(super) const fn default_token_refresh_period() -> Duration {
    Duration::from_secs(5 * 60)
}

pub(super) const fn default_token_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(super) const fn default_trust_all() -> bool {
    true
}

pub(super) const fn default_max_samples_to_send() -> usize {
    50
}

pub(super) const fn default_send_interval() -> Duration {
    Duration::from_secs(10)
}

pub(super) const fn default_max_requests_per_minute() -> i64 {
    500
}

pub(super) const fn default_refresh_max_times() -> u32 {
    3
}

pub(super) const fn default_status_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

pub(super) const fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

pub(super) const fn default_true() -> bool {
    true
}

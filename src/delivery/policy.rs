use crate::error::{FailureKind, TransportError};
use crate::transport::HttpReply;

/// What to do after one attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Delivered,
    Retry {
        kind: FailureKind,
        refresh_token: bool,
    },
    Fatal(FailureKind),
}

/// Status-code table for one provider.
#[derive(Clone, Copy, Debug)]
pub struct ResponsePolicy {
    pub success: &'static [u16],
    pub retry: &'static [u16],
    /// Treat 401, and 400 bodies containing one of `auth_error_markers`, as
    /// an expired token.
    pub refresh_on_unauthorized: bool,
    pub auth_error_markers: &'static [&'static str],
}

const SERVER_ERRORS: &[u16] = &[500, 502, 503, 504];

impl ResponsePolicy {
    /// Events API v2: accepted events answer 202; the routing token is
    /// static so there is nothing to refresh.
    pub const PAGERDUTY: Self = Self {
        success: &[202],
        retry: SERVER_ERRORS,
        refresh_on_unauthorized: false,
        auth_error_markers: &[],
    };

    /// Salesforce REST endpoints (GOC++ and GUS chatter).
    pub const SALESFORCE: Self = Self {
        success: &[200, 201, 204],
        retry: SERVER_ERRORS,
        refresh_on_unauthorized: true,
        auth_error_markers: &["INVALID_AUTH_HEADER"],
    };

    /// Refocus bulk upsert. A plain 500 means the batch was rejected.
    pub const REFOCUS: Self = Self {
        success: &[200, 201, 204],
        retry: &[408, 502, 503, 504],
        refresh_on_unauthorized: false,
        auth_error_markers: &[],
    };

    #[must_use]
    pub fn classify(&self, reply: &HttpReply) -> Verdict {
        let code = reply.status.as_u16();
        if self.success.contains(&code) {
            return Verdict::Delivered;
        }
        if self.refresh_on_unauthorized && self.is_stale_token(code, &reply.body) {
            return Verdict::Retry {
                kind: FailureKind::AuthExpired,
                refresh_token: true,
            };
        }
        if code == 429 {
            return Verdict::Retry {
                kind: FailureKind::RateLimited,
                refresh_token: false,
            };
        }
        if self.retry.contains(&code) {
            let kind = if code >= 500 {
                FailureKind::ServerError(code)
            } else {
                FailureKind::NetworkTimeout
            };
            return Verdict::Retry {
                kind,
                refresh_token: false,
            };
        }
        Verdict::Fatal(FailureKind::Rejected(code))
    }

    fn is_stale_token(&self, code: u16, body: &str) -> bool {
        code == 401
            || (code == 400
                && self
                    .auth_error_markers
                    .iter()
                    .any(|marker| body.contains(marker)))
    }
}

/// Classify a failure that produced no HTTP response.
#[must_use]
pub fn classify_error(err: &TransportError) -> Verdict {
    if err.is_timeout() {
        return Verdict::Retry {
            kind: FailureKind::NetworkTimeout,
            refresh_token: false,
        };
    }
    match err {
        TransportError::AuthFailure { .. } => Verdict::Fatal(FailureKind::AuthFailure),
        TransportError::Json { .. } => Verdict::Fatal(FailureKind::MalformedResponse),
        _ => Verdict::Fatal(FailureKind::Transport),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{ResponsePolicy, Verdict, classify_error};
    use crate::error::{FailureKind, TransportError};
    use crate::transport::HttpReply;

    fn reply(code: u16, body: &str) -> HttpReply {
        HttpReply {
            status: StatusCode::from_u16(code).unwrap_or(StatusCode::IM_A_TEAPOT),
            body: body.to_string(),
        }
    }

    #[test]
    fn salesforce_refreshes_on_unauthorized() {
        let policy = ResponsePolicy::SALESFORCE;
        assert_eq!(policy.classify(&reply(204, "")), Verdict::Delivered);
        assert_eq!(
            policy.classify(&reply(401, "")),
            Verdict::Retry {
                kind: FailureKind::AuthExpired,
                refresh_token: true
            }
        );
        let stale = r#"[{"message":"INVALID_HEADER_TYPE","errorCode":"INVALID_AUTH_HEADER"}]"#;
        assert_eq!(
            policy.classify(&reply(400, stale)),
            Verdict::Retry {
                kind: FailureKind::AuthExpired,
                refresh_token: true
            }
        );
        assert_eq!(
            policy.classify(&reply(400, r#"[{"errorCode":"MALFORMED_ID"}]"#)),
            Verdict::Fatal(FailureKind::Rejected(400))
        );
        assert_eq!(
            policy.classify(&reply(404, "")),
            Verdict::Fatal(FailureKind::Rejected(404))
        );
    }

    #[test]
    fn pagerduty_treats_unauthorized_as_fatal() {
        let policy = ResponsePolicy::PAGERDUTY;
        assert_eq!(policy.classify(&reply(202, "")), Verdict::Delivered);
        assert_eq!(policy.classify(&reply(200, "")), Verdict::Fatal(FailureKind::Rejected(200)));
        assert_eq!(policy.classify(&reply(401, "")), Verdict::Fatal(FailureKind::Rejected(401)));
        assert_eq!(
            policy.classify(&reply(429, "")),
            Verdict::Retry {
                kind: FailureKind::RateLimited,
                refresh_token: false
            }
        );
        assert_eq!(
            policy.classify(&reply(502, "")),
            Verdict::Retry {
                kind: FailureKind::ServerError(502),
                refresh_token: false
            }
        );
    }

    #[test]
    fn refocus_retries_request_timeout_but_not_internal_error() {
        let policy = ResponsePolicy::REFOCUS;
        assert_eq!(
            policy.classify(&reply(408, "")),
            Verdict::Retry {
                kind: FailureKind::NetworkTimeout,
                refresh_token: false
            }
        );
        assert_eq!(
            policy.classify(&reply(500, "")),
            Verdict::Fatal(FailureKind::Rejected(500))
        );
    }

    #[test]
    fn token_errors_are_fatal_unless_timed_out() {
        let rejected = TransportError::AuthFailure {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        assert_eq!(classify_error(&rejected), Verdict::Fatal(FailureKind::AuthFailure));
        let slow = TransportError::TokenTimeout { elapsed_ms: 10_000 };
        assert!(matches!(classify_error(&slow), Verdict::Retry { .. }));
    }
}

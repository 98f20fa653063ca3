use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::history::History;

/// One aspect value waiting to be upserted into Refocus.
#[derive(Clone)]
pub struct RefocusSample {
    /// `subject|aspect` path.
    pub name: String,
    pub value: String,
    pub user_name: String,
    pub token_id: String,
    /// Epoch milliseconds.
    pub next_fire_time: i64,
    pub enqueued_at: Instant,
    pub history: Arc<dyn History>,
}

impl RefocusSample {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        user_name: impl Into<String>,
        token_id: impl Into<String>,
        history: Arc<dyn History>,
        next_fire_time: i64,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            user_name: user_name.into(),
            token_id: token_id.into(),
            next_fire_time,
            enqueued_at: Instant::now(),
            history,
        }
    }

    /// Bulk-upsert element: name and value only.
    #[must_use]
    pub fn wire(&self) -> Value {
        json!({ "name": self.name, "value": self.value })
    }

    /// Form used in log and history lines.
    #[must_use]
    pub fn describe(&self) -> String {
        json!({
            "name": self.name,
            "value": self.value,
            "user": self.user_name,
            "token_id": self.token_id,
        })
        .to_string()
    }
}

impl fmt::Debug for RefocusSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefocusSample")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("user_name", &self.user_name)
            .field("next_fire_time", &self.next_fire_time)
            .finish_non_exhaustive()
    }
}

/// JSON array body for `POST /v1/samples/upsert/bulk`.
#[must_use]
pub fn bulk_body(samples: &[RefocusSample]) -> Value {
    Value::Array(samples.iter().map(RefocusSample::wire).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{RefocusSample, bulk_body};
    use crate::history::NoopHistory;

    #[test]
    fn bulk_body_carries_only_name_and_value() {
        let samples = vec![
            RefocusSample::new("a|b", "1.000000", "owner", "tok", Arc::new(NoopHistory), 0),
            RefocusSample::new("c|d", "0.000000", "owner", "tok", Arc::new(NoopHistory), 0),
        ];
        let body = bulk_body(&samples).to_string();
        assert_eq!(
            body,
            r#"[{"name":"a|b","value":"1.000000"},{"name":"c|d","value":"0.000000"}]"#
        );
        assert!(samples[0].describe().contains("\"user\":\"owner\""));
    }
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use argus_notify::audit::{ANNOTATION_SOURCE, MemoryAuditSink};
use argus_notify::dispatch::{AuditOnly, AuditedNotifier, Notifier};
use argus_notify::forwarder::RefocusForwarder;
use argus_notify::history::MemoryHistory;
use argus_notify::notifier::RefocusNotifier;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{alert, config, context, notification, trigger};

#[tokio::test]
async fn audit_only_records_annotation_and_audit() {
    let sink = Arc::new(MemoryAuditSink::new());
    let notifier = AuditedNotifier::new(AuditOnly, sink.clone());
    let alert = alert(notification("audit", &[]), trigger("cpu"));
    let history = Arc::new(MemoryHistory::new());

    assert!(
        notifier
            .send_notification(&context(&alert, &history))
            .await
            .unwrap()
    );

    let annotations = sink.annotations();
    assert_eq!(annotations.len(), 1);
    let (owner, annotation) = &annotations[0];
    assert_eq!(owner, "ops-team");
    assert_eq!(annotation.source, ANNOTATION_SOURCE);
    assert_eq!(annotation.scope, "system.host1");
    assert_eq!(annotation.metric, "cpu.user");
    assert_eq!(annotation.timestamp, common::FIRED_AT);
    assert_eq!(annotation.tags.get("dc").map(String::as_str), Some("sfo"));
    assert_eq!(
        annotation.fields.get("Notification status").map(String::as_str),
        Some("Notification created.")
    );

    let audits = sink.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].alert_id, Some(42));
    assert!(audits[0].body.starts_with("<b>Alert cpu-high was Triggered at 11/14/2023 22:13:20 GMT</b>"));
    assert!(
        audits[0]
            .body
            .contains("<br/><b>Notification:  </b> audit<br/><b>Triggered by:  </b> cpu<br/>")
    );
    assert!(
        audits[0]
            .body
            .contains("<b>Evaluated metric expression:  </b> -1h:system.host1:cpu.user:avg<br/>")
    );
}

#[tokio::test]
async fn clearing_marks_annotation_cleared() {
    let sink = Arc::new(MemoryAuditSink::new());
    let notifier = AuditedNotifier::new(AuditOnly, sink.clone());
    let alert = alert(notification("audit", &[]), trigger("cpu"));
    let history = Arc::new(MemoryHistory::new());

    notifier
        .clear_notification(&context(&alert, &history))
        .await
        .unwrap();

    let annotations = sink.annotations();
    assert_eq!(
        annotations[0].1.fields.get("Notification status").map(String::as_str),
        Some("Notification cleared.")
    );
    assert!(sink.audits()[0].body.contains("was Cleared at"));
}

#[tokio::test]
async fn unknown_trigger_is_a_precondition_failure() {
    let sink = Arc::new(MemoryAuditSink::new());
    let notifier = AuditedNotifier::new(AuditOnly, sink.clone());
    let alert = alert(notification("audit", &[]), trigger("cpu"));
    let history = Arc::new(MemoryHistory::new());
    let mut context = context(&alert, &history);
    context.trigger = trigger("memory");

    let err = notifier.send_notification(&context).await.unwrap_err();
    assert!(err.is_precondition());
    assert!(sink.audits().is_empty());
    assert!(sink.annotations().is_empty());
}

#[tokio::test]
async fn names_resolve_case_insensitively() {
    let sink = Arc::new(MemoryAuditSink::new());
    let notifier = AuditedNotifier::new(AuditOnly, sink.clone());
    let alert = alert(notification("Audit", &[]), trigger("CPU"));
    let history = Arc::new(MemoryHistory::new());
    let mut context = context(&alert, &history);
    context.notification.name = "audit".to_string();
    context.trigger.name = "cpu".to_string();

    assert!(notifier.send_notification(&context).await.unwrap());
    assert_eq!(sink.audits().len(), 1);
}

#[tokio::test]
async fn refocus_notifier_fans_out_through_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/samples/upsert/bulk"))
        .and(body_json(json!([
            { "name": "host1|cpu", "value": "95.500000" },
            { "name": "host2|cpu", "value": "95.500000" },
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": 5 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/samples/upsert/bulk"))
        .and(body_json(json!([
            { "name": "host1|cpu", "value": "0.000000" },
            { "name": "host2|cpu", "value": "0.000000" },
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": 6 })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&format!(
        "[refocus]\nenabled = true\nendpoint = \"{}\"\ntoken = \"t\"\nsend_interval = \"0s\"\nmax_requests_per_minute = 6001\n",
        server.uri()
    ));
    let forwarder = Arc::new(RefocusForwarder::new(&config).unwrap());
    let notifier = AuditedNotifier::new(
        RefocusNotifier::new(Arc::clone(&forwarder)),
        Arc::new(MemoryAuditSink::new()),
    );
    let alert = alert(notification("refocus", &["host1|cpu", "host2|cpu"]), trigger("cpu"));
    let history = Arc::new(MemoryHistory::new());
    let context = context(&alert, &history);

    assert!(notifier.send_notification(&context).await.unwrap());
    assert_eq!(forwarder.queue_len(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
    assert_eq!(forwarder.flush().await, 2);

    assert!(notifier.clear_notification(&context).await.unwrap());
    assert_eq!(forwarder.flush().await, 2);
    assert_eq!(forwarder.counters().delivered(), 4);
}

#[tokio::test]
async fn refocus_notifier_requires_aspect_paths() {
    let config = config("");
    let forwarder = Arc::new(RefocusForwarder::new(&config).unwrap());
    let notifier = AuditedNotifier::new(
        RefocusNotifier::new(Arc::clone(&forwarder)),
        Arc::new(MemoryAuditSink::new()),
    );
    let alert = alert(notification("refocus", &[]), trigger("cpu"));
    let history = Arc::new(MemoryHistory::new());

    let err = notifier
        .send_notification(&context(&alert, &history))
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(forwarder.counters().enqueued(), 0);
}

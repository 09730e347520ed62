use domain::ChannelKind;
use hms_telemetry::{TelemetryMetrics, new_request_ids};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
    assert_ne!(ids.request_id, ids.trace_id);
}

#[test]
fn metrics_are_scoped_per_instance() {
    let first = TelemetryMetrics::new();
    let second = TelemetryMetrics::new();
    first.record_event_received();
    first.record_delivered(ChannelKind::Sms);
    first.record_failed(ChannelKind::Push);
    first.record_delivery_attempt(false);

    let snapshot = first.snapshot();
    assert_eq!(snapshot.events_received, 1);
    assert_eq!(snapshot.delivered_for(ChannelKind::Sms), 1);
    assert_eq!(snapshot.failed_for(ChannelKind::Push), 1);
    assert_eq!(snapshot.delivery_attempt_failures, 1);
    assert_eq!(second.snapshot().events_received, 0);
}

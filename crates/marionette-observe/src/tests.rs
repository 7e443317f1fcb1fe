//! Unit tests for the observability event log.

use crate::event::{EventDomain, EventPayload};
use crate::store::{EventFilter, EventLog, EventSink};

fn playback(position: f64, interrupted: bool) -> EventPayload {
    EventPayload::PlaybackFinished {
        playback_position: position,
        interrupted,
    }
}

// ── emit_event tests ─────────────────────────────────────────────────

#[test]
fn emit_event_records_domain_and_type() {
    let log = EventLog::new();

    let event = log
        .emit_event(
            "demo",
            &EventPayload::AudioRouted {
                destination_identity: "avatar_worker".to_string(),
            },
        )
        .expect("emit should succeed");

    assert_eq!(event.seq, 1);
    assert_eq!(event.domain, EventDomain::Routing);
    assert_eq!(event.event_type, "AUDIO_ROUTED");
    assert_eq!(event.entity_id, "demo");
    assert_eq!(log.len(), 1);
}

#[test]
fn payload_serializes_with_event_tag() {
    let value = serde_json::to_value(playback(3.2, true)).unwrap();
    assert_eq!(value["event"], "PLAYBACK_FINISHED");
    assert_eq!(value["playback_position"], 3.2);
    assert_eq!(value["interrupted"], true);
}

// ── Sequence number tests ────────────────────────────────────────────

#[test]
fn next_seq_starts_at_one_and_increments() {
    let log = EventLog::new();
    assert_eq!(log.next_seq(), 1);

    log.emit_event("demo", &playback(1.0, false)).unwrap();
    log.emit_event("demo", &playback(2.0, false)).unwrap();

    assert_eq!(log.next_seq(), 3);
    let seqs: Vec<u64> = log
        .query_events(&EventFilter::default())
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn capacity_drops_oldest_events() {
    let log = EventLog::with_capacity(2);
    for i in 0..3 {
        log.emit_event("demo", &playback(f64::from(i), false)).unwrap();
    }

    let events = log.query_events(&EventFilter::default()).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 2);
    assert_eq!(events[1].seq, 3);
}

// ── query_events tests ───────────────────────────────────────────────

#[test]
fn query_filters_by_domain_type_and_room() {
    let log = EventLog::new();
    log.emit_event(
        "room-a",
        &EventPayload::AvatarJoined {
            avatar_identity: "avatar_worker".to_string(),
        },
    )
    .unwrap();
    log.emit_event("room-a", &playback(1.5, false)).unwrap();
    log.emit_event("room-b", &playback(0.5, true)).unwrap();

    let by_domain = log
        .query_events(&EventFilter {
            domain: Some(EventDomain::Playback),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_domain.len(), 2);

    let by_room = log
        .query_events(&EventFilter {
            entity_id: Some("room-a".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_room.len(), 2);

    let by_type = log
        .query_events(&EventFilter {
            event_type: Some("AVATAR_JOINED".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].entity_id, "room-a");
}

#[test]
fn query_respects_limit() {
    let log = EventLog::new();
    for _ in 0..5 {
        log.emit_event("demo", &playback(1.0, false)).unwrap();
    }
    let events = log
        .query_events(&EventFilter {
            limit: Some(3),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2].seq, 3);
}

#[test]
fn domain_round_trips_through_str() {
    for domain in [EventDomain::Handoff, EventDomain::Routing, EventDomain::Playback] {
        assert_eq!(domain.as_str().parse::<EventDomain>().unwrap(), domain);
    }
    assert!("IDENTITY".parse::<EventDomain>().is_err());
}

// ── Sink tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_receive_new_events() {
    let log = EventLog::new();
    let mut rx = log.subscribe();

    log.emit_event(
        "demo",
        &EventPayload::JobTerminated {
            reason: "session_ended".to_string(),
        },
    )
    .unwrap();

    let received = rx.recv().await.expect("should receive event");
    assert_eq!(received.event_type, "JOB_TERMINATED");
}


// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{sync::Arc, time::Duration};

use opcua::types::{DataValue, NodeId, StatusCode, UAString, Variant};
use serde_json::json;
use tokio::{sync::oneshot, time::timeout};

use super::mock::{MockSession, RecordingHost};
use crate::{
    events::{dump_event, EventDispatcher, EventNotification, UNKNOWN_BROWSE_NAME},
    message::Message,
    provider::{read_browse_name, Session},
};

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn node(id: u32) -> Variant {
    Variant::NodeId(Box::new(NodeId::new(0, id)))
}

#[tokio::test]
async fn browse_name_lookup() {
    let session = MockSession::new();
    session.set_browse_name(NodeId::new(0, 2041u32), "BaseEventType", Duration::ZERO);
    let mut bad = DataValue::value_only(Variant::Empty);
    bad.value = None;
    bad.status = Some(StatusCode::BadAttributeIdInvalid);
    session.set_browse_name_result(NodeId::new(0, 85u32), Ok(bad));

    assert_eq!(
        read_browse_name(&session, &NodeId::new(0, 2041u32)).await,
        Ok(Some("BaseEventType".to_string()))
    );
    assert_eq!(read_browse_name(&session, &NodeId::new(0, 85u32)).await, Ok(None));
    assert_eq!(
        read_browse_name(&session, &NodeId::new(0, 1u32)).await,
        Err(StatusCode::BadNodeIdUnknown)
    );
}

#[tokio::test]
async fn one_message_per_field() {
    let host = RecordingHost::new();
    let session = MockSession::new();
    session.set_browse_name(NodeId::new(0, 2041u32), "BaseEventType", Duration::ZERO);

    dump_event(
        host.as_ref(),
        &session,
        &names(&["EventType", "Message", "Severity", "Retain"]),
        &[
            node(2041),
            Variant::String(UAString::from("Level high")),
            Variant::UInt16(700),
            Variant::Empty,
        ],
    )
    .await;

    assert_eq!(
        host.sent(),
        vec![
            Message::new(
                "BaseEventType",
                "BaseEventType:EventType:NodeId:BaseEventType:i=2041"
            ),
            Message::from_payload("Message:String:Level high"),
            Message::from_payload("Severity:UInt16:700"),
        ]
    );
}

#[tokio::test]
async fn unreadable_browse_names() {
    let host = RecordingHost::new();
    let session = MockSession::new();
    let mut bad = DataValue::value_only(Variant::Empty);
    bad.value = None;
    bad.status = Some(StatusCode::BadUserAccessDenied);
    session.set_browse_name_result(NodeId::new(0, 85u32), Ok(bad));

    // i=1 has no answer at all, so its field is skipped
    dump_event(
        host.as_ref(),
        &session,
        &names(&["SourceNode", "EventType", "Severity"]),
        &[node(85), node(1), Variant::UInt16(1)],
    )
    .await;

    let sent = host.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].topic(), Some(UNKNOWN_BROWSE_NAME));
    assert_eq!(sent[0].payload, json!("<??>:SourceNode:NodeId:<??>:i=85"));
    assert_eq!(sent[1].payload, json!("Severity:UInt16:1"));
}

#[tokio::test]
async fn notifications_are_dispatched_in_order() {
    let host = RecordingHost::new();
    let session = Arc::new(MockSession::new());
    // The first event's lookup is slow, its messages must still all come first
    session.set_browse_name(NodeId::new(0, 2041u32), "BaseEventType", Duration::from_millis(50));
    session.set_browse_name(NodeId::new(0, 2915u32), "AlarmConditionType", Duration::ZERO);

    let dispatcher = EventDispatcher::spawn(host.clone());
    let (first_done, first_rx) = oneshot::channel();
    let (second_done, second_rx) = oneshot::channel();
    let session_ref: Arc<dyn Session> = session.clone();
    assert!(dispatcher.dispatch(EventNotification {
        session: session_ref.clone(),
        field_names: names(&["EventType", "Severity"]),
        fields: vec![node(2041), Variant::UInt16(100)],
        done: Some(first_done),
    }));
    assert!(dispatcher.dispatch(EventNotification {
        session: session_ref,
        field_names: names(&["EventType", "Severity"]),
        fields: vec![node(2915), Variant::UInt16(900)],
        done: Some(second_done),
    }));

    timeout(Duration::from_secs(1), first_rx).await.unwrap().unwrap();
    timeout(Duration::from_secs(1), second_rx).await.unwrap().unwrap();
    dispatcher.shutdown().await;

    let payloads: Vec<_> = host.sent().into_iter().map(|m| m.payload).collect();
    assert_eq!(
        payloads,
        vec![
            json!("BaseEventType:EventType:NodeId:BaseEventType:i=2041"),
            json!("Severity:UInt16:100"),
            json!("AlarmConditionType:EventType:NodeId:AlarmConditionType:i=2915"),
            json!("Severity:UInt16:900"),
        ]
    );
}

#[tokio::test]
async fn shutdown_drains_the_queue() {
    let host = RecordingHost::new();
    let session: Arc<dyn Session> = Arc::new(MockSession::new());
    let dispatcher = EventDispatcher::spawn(host.clone());
    for severity in 0..3u16 {
        dispatcher.dispatch(EventNotification {
            session: session.clone(),
            field_names: names(&["Severity"]),
            fields: vec![Variant::UInt16(severity)],
            done: None,
        });
    }
    timeout(Duration::from_secs(1), dispatcher.shutdown())
        .await
        .unwrap();
    assert_eq!(host.sent().len(), 3);
}

// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{sync::Arc, time::Duration};

use opcua::types::{DataValue, NodeId, StatusCode, Variant};
use serde_json::json;
use tokio::time::timeout;

use super::mock::{eventually, Call, MockSession, MockTransport, RecordingHost};
use crate::{
    actions::WriteTarget,
    browse::BrowseNode,
    client::ClientNode,
    config::ClientNodeConfig,
    message::{Action, Message},
    provider::{ItemEvent, Notification, SubscriptionEvent},
};

const ENDPOINT: &str = "opc.tcp://localhost:4855/";

fn start(action: Option<Action>, transport: MockTransport) -> (ClientNode, Arc<RecordingHost>) {
    let host = RecordingHost::new();
    let mut config = ClientNodeConfig::new(ENDPOINT, action);
    config.name = "Boiler".to_string();
    let node = ClientNode::start(config, Box::new(transport), host.clone());
    (node, host)
}

/// Starts a node and waits for its session.
async fn start_active(action: Action) -> (ClientNode, Arc<RecordingHost>, Arc<MockSession>) {
    let session = Arc::new(MockSession::new());
    let transport = MockTransport::new(session.clone());
    let (node, host) = start(Some(action), transport);
    eventually(|| host.has_label("session active")).await;
    (node, host, session)
}

async fn close(node: ClientNode) {
    timeout(Duration::from_secs(1), node.close()).await.unwrap();
}

#[test]
fn write_target_from_topic() {
    let target = WriteTarget::parse("ns=2;s=1:PST-007-Alarm-Level@Training?SETPOINT").unwrap();
    assert_eq!(target.namespace, "2");
    assert_eq!(target.identifier, "1:PST-007-Alarm-Level@Training?SETPOINT");
    assert_eq!(
        target.node_id().unwrap(),
        NodeId::new(2, "1:PST-007-Alarm-Level@Training?SETPOINT")
    );

    assert_eq!(WriteTarget::parse("ns=2"), Err(StatusCode::BadNodeIdInvalid));
    // Fixed offsets, a two digit namespace isn't understood
    let target = WriteTarget::parse("ns=12;s=Valve").unwrap();
    assert_eq!(target.namespace, "1");
    assert_eq!(target.identifier, "=Valve");
    let target = WriteTarget::parse("i=x;s=abc").unwrap();
    assert_eq!(target.node_id(), Err(StatusCode::BadNodeIdInvalid));
}

#[tokio::test]
async fn lifecycle_statuses() {
    let (node, host, session) = start_active(Action::Read).await;
    assert_eq!(
        host.labels(),
        vec!["create client", "connecting", "session active"]
    );
    assert_eq!(
        session.calls(),
        vec![Call::Connect(ENDPOINT.to_string()), Call::CreateSession]
    );

    close(node).await;
    let calls = session.calls();
    assert!(calls.contains(&Call::Close));
    assert_eq!(calls.last(), Some(&Call::Disconnect));
    let labels = host.labels();
    assert!(labels.contains(&"session closed".to_string()));
    assert_eq!(labels.last().map(String::as_str), Some("closed"));
    assert!(host.logs().iter().any(|l| l == "Boiler closed"));
}

#[tokio::test]
async fn connect_failure() {
    let session = Arc::new(MockSession::new());
    let mut transport = MockTransport::new(session.clone());
    transport.connect_result = Err(StatusCode::BadTimeout);
    let (node, host) = start(Some(Action::Read), transport);

    eventually(|| host.has_label("connection error")).await;
    assert!(!host.has_label("session error"));
    assert!(host.errors()[0].starts_with("Boiler OPC UA connection error:"));
    assert_eq!(session.calls(), vec![Call::Connect(ENDPOINT.to_string())]);

    // Without a session messages just pass through
    let msg = Message::new("ns=1;s=Temp", "x");
    node.input(msg.clone());
    eventually(|| host.sent().contains(&msg)).await;
    close(node).await;
    assert!(!session.calls().contains(&Call::Close));
}

#[tokio::test]
async fn session_failure() {
    let session = Arc::new(MockSession::new());
    let mut transport = MockTransport::new(session.clone());
    transport.session_result = Err(StatusCode::BadSessionIdInvalid);
    let (node, host) = start(Some(Action::Read), transport);

    eventually(|| host.has_label("connection error")).await;
    let labels = host.labels();
    let session_error = labels.iter().position(|l| l == "session error").unwrap();
    let connection_error = labels.iter().position(|l| l == "connection error").unwrap();
    assert!(session_error < connection_error);
    close(node).await;
}

#[tokio::test]
async fn no_topic_passes_through() {
    let (node, host, session) = start_active(Action::Read).await;
    let msg = Message::from_payload("no topic");
    node.input(msg.clone());
    eventually(|| host.sent().contains(&msg)).await;
    assert!(!session
        .calls()
        .iter()
        .any(|c| matches!(c, Call::ReadValue(_))));
    close(node).await;
}

#[tokio::test]
async fn no_action_passes_through() {
    let session = Arc::new(MockSession::new());
    let transport = MockTransport::new(session.clone());
    let (node, host) = start(None, transport);
    eventually(|| host.has_label("session active")).await;
    let msg = Message::new("ns=1;s=Temp", 1);
    node.input(msg.clone());
    eventually(|| host.sent().contains(&msg)).await;
    assert_eq!(session.calls().len(), 2);
    close(node).await;
}

#[tokio::test]
async fn read_sends_value() {
    let (node, host, session) = start_active(Action::Read).await;
    *session.read_result.lock().unwrap() = Ok(vec![
        DataValue::value_only(Variant::UInt16(65535)),
        DataValue::value_only(Variant::UInt16(1)),
    ]);
    let msg = Message::new("ns=1;s=Temp", "");
    node.input(msg.clone());

    eventually(|| host.sent().len() == 2).await;
    let sent = host.sent();
    // The input is forwarded too
    assert!(sent.contains(&msg));
    assert!(sent.contains(&Message::new("ns=1;s=Temp", 65535)));
    assert!(session
        .calls()
        .contains(&Call::ReadValue(vec![NodeId::new(1, "Temp")])));
    assert!(host.has_label("active reading"));
    close(node).await;
}

#[tokio::test]
async fn read_error() {
    let (node, host, session) = start_active(Action::Read).await;
    *session.read_result.lock().unwrap() = Err(StatusCode::BadNotConnected);
    node.input(Message::new("ns=1;s=Temp", ""));
    eventually(|| host.has_label("error")).await;
    assert_eq!(host.errors().len(), 1);
    close(node).await;
}

#[tokio::test]
async fn write_typed_value() {
    let (node, host, session) = start_active(Action::Write).await;
    let mut msg = Message::new("ns=2;s=1:PST-007-Alarm-Level@Training?SETPOINT", "42.5");
    msg.datatype = Some("Double".to_string());
    node.input(msg);

    eventually(|| host.has_label("active writing")).await;
    assert!(session.calls().contains(&Call::Write(
        NodeId::new(2, "1:PST-007-Alarm-Level@Training?SETPOINT"),
        Variant::Double(42.5)
    )));
    close(node).await;
}

#[tokio::test]
async fn write_rejected() {
    let (node, host, session) = start_active(Action::Write).await;
    *session.write_result.lock().unwrap() = Ok(StatusCode::BadUserAccessDenied);
    let mut msg = Message::new("ns=2;s=Valve", 1);
    msg.datatype = Some("Boolean".to_string());
    node.input(msg);

    eventually(|| !host.errors().is_empty()).await;
    assert!(host.has_label("error"));
    let errors = host.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Boiler Cannot write value (1) to msg.topic:ns=2;s=Valve error:"));
    close(node).await;
}

#[tokio::test]
async fn browse_sends_a_message_per_node() {
    let (node, host, session) = start_active(Action::Browse).await;
    *session.crawl_result.lock().unwrap() = Ok(BrowseNode::new("i=85", "Objects", "Object")
        .type_definition("FolderType")
        .reference(
            "organizes",
            vec![BrowseNode::new("ns=1;s=Boiler", "Boiler", "Object")
                .type_definition("BaseObjectType")],
        ));
    node.input(Message::new("i=85", ""));

    eventually(|| host.has_label("browse done")).await;
    let browsed: Vec<_> = host
        .sent()
        .into_iter()
        .filter(|m| m.type_definition.is_some())
        .collect();
    assert_eq!(browsed.len(), 2);
    assert_eq!(browsed[1].node_id.as_deref(), Some("ns=1;s=Boiler"));
    assert!(host.has_label("active browsing"));
    close(node).await;
}

#[tokio::test]
async fn browse_error() {
    let (node, host, _session) = start_active(Action::Browse).await;
    node.input(Message::new("i=85", ""));
    eventually(|| host.has_label("error browsing")).await;
    close(node).await;
}

#[tokio::test]
async fn subscribe_and_receive_changes() {
    let (node, host, session) = start_active(Action::Subscribe).await;
    let msg = Message::new("ns=1;s=Temp", "");
    node.input(msg.clone());
    eventually(|| session.monitored_item_requests().len() == 1).await;

    // Subscribing to the same topic again doesn't add an item
    node.input(msg.clone());
    eventually(|| host.sent().iter().filter(|m| **m == msg).count() == 2).await;
    assert_eq!(session.monitored_item_requests().len(), 1);

    let (_, handle, request) = session.monitored_item_requests()[0].clone();
    assert_eq!(request.node_id, NodeId::new(1, "Temp"));
    session.notify(Notification::MonitoredItem {
        handle,
        event: ItemEvent::Changed(DataValue::value_only(Variant::Double(19.5))),
    });
    let changed = Message::new("ns=1;s=Temp", 19.5);
    eventually(|| host.sent().contains(&changed)).await;
    assert!(host.has_label("subscribed"));
    assert!(host.has_label("active subscribed"));

    close(node).await;
    assert!(session
        .calls()
        .iter()
        .any(|c| matches!(c, Call::TerminateSubscription(_))));
    assert!(host.has_label("terminated"));
}

#[tokio::test]
async fn events_are_dispatched() {
    let (node, host, session) = start_active(Action::Events).await;
    session.set_browse_name(NodeId::new(0, 2041u32), "BaseEventType", Duration::ZERO);
    let mut msg = Message::new("i=2253", "");
    msg.event_fields = Some(vec!["EventType".to_string(), "Severity".to_string()]);
    node.input(msg);
    eventually(|| session.monitored_item_requests().len() == 1).await;

    let (_, handle, _) = session.monitored_item_requests()[0].clone();
    session.notify(Notification::MonitoredItem {
        handle,
        event: ItemEvent::Event(vec![
            Variant::NodeId(Box::new(NodeId::new(0, 2041u32))),
            Variant::UInt16(500),
        ]),
    });
    eventually(|| host.sent().iter().any(|m| m.payload == json!("Severity:UInt16:500"))).await;
    let sent = host.sent();
    let event_type = sent
        .iter()
        .position(|m| m.topic() == Some("BaseEventType"))
        .unwrap();
    let severity = sent
        .iter()
        .position(|m| m.payload == json!("Severity:UInt16:500"))
        .unwrap();
    assert!(event_type < severity);
    assert!(host.has_label("active event"));
    close(node).await;
}

#[tokio::test]
async fn error_tears_down_the_session() {
    let (node, host, session) = start_active(Action::Read).await;
    node.error();
    eventually(|| host.has_label("node error")).await;
    assert!(session.calls().contains(&Call::Close));
    assert!(session.calls().contains(&Call::Disconnect));
    assert!(!host.logs().iter().any(|l| l == "Boiler closed"));

    // Still passing messages through
    let msg = Message::new("ns=1;s=Temp", "after");
    node.input(msg.clone());
    eventually(|| host.sent().contains(&msg)).await;
    close(node).await;
}

#[tokio::test]
async fn subscribe_while_initializing_waits_for_start() {
    let mut session = MockSession::new();
    session.auto_start = false;
    let session = Arc::new(session);
    let (node, host) = start(
        Some(Action::Subscribe),
        MockTransport::new(session.clone()),
    );
    eventually(|| host.has_label("session active")).await;

    let temperature = Message::new("ns=1;s=Temp", "");
    let pressure = Message::new("ns=1;s=Pressure", 500);
    node.input(temperature.clone());
    node.input(pressure.clone());
    eventually(|| host.sent().contains(&temperature) && host.sent().contains(&pressure)).await;

    let subscriptions: Vec<_> = session
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CreateSubscription(handle, _) => Some(handle),
            _ => None,
        })
        .collect();
    assert_eq!(subscriptions.len(), 1);
    assert!(session.monitored_item_requests().is_empty());
    assert!(host.has_label("active subscribing"));

    session.notify(Notification::Subscription {
        handle: subscriptions[0],
        event: SubscriptionEvent::Started {
            subscription_id: 500,
        },
    });
    eventually(|| session.monitored_item_requests().len() == 2).await;
    let requests = session.monitored_item_requests();
    assert!(requests.iter().all(|(id, _, _)| *id == 500));
    assert_eq!(requests[0].2.node_id, NodeId::new(1, "Temp"));
    assert_eq!(requests[1].2.node_id, NodeId::new(1, "Pressure"));
    assert_eq!(requests[1].2.sampling_interval, 500.0);
    assert!(host.has_label("subscribed"));
    close(node).await;
}

// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The collaborators a client node works with: the transport and session that speak OPC UA
//! to the server, and the flow host that feeds messages in and receives outputs.
//!
//! Server pushed activity (subscription lifecycle, data changes, events) is not returned from
//! calls. A session raises it as [`Notification`]s on the channel handed to it when the
//! session was created, tagged with the client handle of the subscription or monitored item
//! it belongs to.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use opcua::types::{
    AttributeId, DataValue, NodeId, QualifiedName, ReadValueId, StatusCode, UAString, Variant,
};
use tokio::sync::mpsc;

use crate::{
    browse::BrowseNode, message::EventFilter, message::Message, status::NodeStatus,
    subscription::SubscriptionParameters,
};

/// Lifecycle activity of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Initialized,
    /// The server accepted the subscription and assigned it an id.
    Started { subscription_id: u32 },
    KeepAlive,
    Terminated,
    Error(StatusCode),
}

/// Activity of a single monitored item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    Initialized,
    /// A data change on a monitored value.
    Changed(DataValue),
    /// An event notification, its fields in the order of the filter's select clauses.
    Event(Vec<Variant>),
    KeepAlive,
    Terminated,
    Error(StatusCode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Subscription { handle: u32, event: SubscriptionEvent },
    MonitoredItem { handle: u32, event: ItemEvent },
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// What a monitored item watches and how the server should sample it.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRequest {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub filter: Option<EventFilter>,
}

/// The connection to a server endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection to the endpoint.
    async fn connect(&mut self, endpoint_url: &str) -> Result<(), StatusCode>;

    /// Creates and activates a session on the open connection. Subscription and monitored
    /// item activity of the session is reported on `notifications`.
    async fn create_session(
        &mut self,
        session_timeout: Duration,
        notifications: NotificationSender,
    ) -> Result<Arc<dyn Session>, StatusCode>;

    /// Closes the connection.
    async fn disconnect(&mut self);
}

/// An active session on a server.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier used to tag log lines.
    fn session_id(&self) -> String;

    /// Reads the value attribute of each node.
    async fn read_variable_value(&self, node_ids: &[NodeId]) -> Result<Vec<DataValue>, StatusCode>;

    /// Writes the value attribute of a single node, returning the status of the write.
    async fn write_single_node(&self, node_id: &NodeId, value: Variant)
        -> Result<StatusCode, StatusCode>;

    /// Reads arbitrary attributes.
    async fn read(&self, nodes_to_read: &[ReadValueId]) -> Result<Vec<DataValue>, StatusCode>;

    /// Recursively browses the address space below `root`.
    async fn crawl(&self, root: &NodeId) -> Result<BrowseNode, StatusCode>;

    /// Requests a subscription. Its progress is reported as [`SubscriptionEvent`]s for `handle`.
    async fn create_subscription(
        &self,
        handle: u32,
        parameters: &SubscriptionParameters,
    ) -> Result<(), StatusCode>;

    /// Requests a monitored item on a started subscription. Its activity is reported as
    /// [`ItemEvent`]s for `handle`.
    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        handle: u32,
        request: &MonitorRequest,
    ) -> Result<(), StatusCode>;

    /// Requests the termination of a subscription. The session raises
    /// [`SubscriptionEvent::Terminated`] once it is gone.
    async fn terminate_subscription(&self, subscription_id: u32) -> Result<(), StatusCode>;

    /// Closes the session.
    async fn close(&self) -> Result<(), StatusCode>;
}

/// The flow runtime hosting a client node. These are sinks, nothing is read back.
pub trait Host: Send + Sync {
    /// Sends a message to the node's output.
    fn send(&self, message: Message);

    /// Updates the node's status indicator.
    fn status(&self, status: NodeStatus);

    /// Reports an error.
    fn error(&self, text: &str);

    fn warn(&self, _text: &str) {}

    fn log(&self, _text: &str) {}
}

/// Reads the browse name of a node. Returns `Ok(None)` when the server answered with a bad
/// status for the attribute.
pub async fn read_browse_name(
    session: &dyn Session,
    node_id: &NodeId,
) -> Result<Option<String>, StatusCode> {
    let nodes_to_read = [ReadValueId {
        node_id: node_id.clone(),
        attribute_id: AttributeId::BrowseName as u32,
        index_range: UAString::null(),
        data_encoding: QualifiedName::null(),
    }];
    let values = session.read(&nodes_to_read).await?;
    let name = values.into_iter().next().and_then(|value| {
        let good = value.status.map_or(true, |status| status.is_good());
        match value.value {
            Some(Variant::QualifiedName(name)) if good => Some(name.name.as_ref().to_string()),
            _ => None,
        }
    });
    Ok(name)
}

// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Messages exchanged with the flow host and the actions a client node performs on them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node id of `BaseEventType`, the event type used when a filter doesn't name one.
pub const BASE_EVENT_TYPE_ID: &str = "i=2041";

/// Field names selected by default when an events request names none.
pub fn basic_event_fields() -> Vec<String> {
    [
        // Common fields
        "EventId",
        "EventType",
        "SourceNode",
        "SourceName",
        "Time",
        "ReceiveTime",
        "Message",
        "Severity",
        // ConditionType
        "ConditionClassId",
        "ConditionClassName",
        "ConditionName",
        "BranchId",
        "Retain",
        "EnabledState",
        "Quality",
        "LastSeverity",
        "Comment",
        "ClientUserId",
        // AcknowledgeConditionType
        "AckedState",
        "ConfirmedState",
        // AlarmConditionType
        "ActiveState",
        "InputNode",
        "SuppressedState",
        "HighLimit",
        "LowLimit",
        "HighHighLimit",
        "LowLowLimit",
        "Value",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The action a client node performs on each inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Read,
    Write,
    Subscribe,
    Browse,
    Events,
    /// Any other configured name. Messages pass through untouched.
    Other(String),
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        match value {
            "read" => Action::Read,
            "write" => Action::Write,
            "subscribe" => Action::Subscribe,
            "browse" => Action::Browse,
            "events" => Action::Events,
            other => Action::Other(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        Action::from(value.as_str())
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Write => write!(f, "write"),
            Action::Subscribe => write!(f, "subscribe"),
            Action::Browse => write!(f, "browse"),
            Action::Events => write!(f, "events"),
            Action::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Which events an `events` request monitors and which of their fields are selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default = "EventFilter::default_event_type")]
    pub event_type_id: String,
    #[serde(default = "basic_event_fields")]
    pub select: Vec<String>,
}

impl Default for EventFilter {
    fn default() -> Self {
        EventFilter {
            event_type_id: Self::default_event_type(),
            select: basic_event_fields(),
        }
    }
}

impl EventFilter {
    fn default_event_type() -> String {
        BASE_EVENT_TYPE_ID.to_string()
    }
}

/// A message travelling through the flow. Properties this crate doesn't know about are kept
/// in `extra` so a forwarded message leaves exactly as it arrived.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Type tag for the value of a write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_filter: Option<EventFilter>,
    /// Names of the selected event fields, positionally aligned with notification fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_class_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_definition: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new<T, V>(topic: T, payload: V) -> Message
    where
        T: Into<String>,
        V: Into<Value>,
    {
        Message {
            topic: Some(topic.into()),
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// A message without a topic.
    pub fn from_payload<V>(payload: V) -> Message
    where
        V: Into<Value>,
    {
        Message {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// A copy of this message carrying a different payload.
    pub fn with_payload(&self, payload: Value) -> Message {
        Message {
            payload,
            ..self.clone()
        }
    }

    /// Field names to pair with the fields of event notifications raised for this request.
    pub fn selected_event_fields(&self) -> Vec<String> {
        if let Some(ref fields) = self.event_fields {
            fields.clone()
        } else if let Some(ref filter) = self.event_filter {
            filter.select.clone()
        } else {
            basic_event_fields()
        }
    }
}

// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Projection of the client's lifecycle state onto the status indicator shown by the host.

use serde::{Deserialize, Serialize};

/// Label shown while there is no state to report.
pub const WAITING_LABEL: &str = "waiting ...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    Red,
    Green,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Dot,
    Ring,
}

/// The presentation tuple of a status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub fill: Fill,
    pub shape: Shape,
    #[serde(rename = "text")]
    pub label: String,
}

impl NodeStatus {
    pub fn new<T>(fill: Fill, shape: Shape, label: T) -> NodeStatus
    where
        T: Into<String>,
    {
        NodeStatus {
            fill,
            shape,
            label: label.into(),
        }
    }
}

/// Maps a state name onto its status indicator. Names may be written with spaces
/// (`active reading`) or hyphens (`active-reading`), the label is echoed verbatim. Anything
/// unknown is a red dot and an empty state shows a blue "waiting" dot.
pub fn project(state: Option<&str>) -> NodeStatus {
    let state = match state {
        Some(state) if !state.is_empty() => state,
        _ => return NodeStatus::new(Fill::Blue, Shape::Dot, WAITING_LABEL),
    };
    let (fill, shape) = match state.replace('-', " ").as_str() {
        "create client" | "connecting" | "connected" | "initialized" | "keepalive" => {
            (Fill::Green, Shape::Ring)
        }
        "active"
        | "active reading"
        | "active writing"
        | "active subscribing"
        | "active subscribed"
        | "active browsing"
        | "active alarm"
        | "active event"
        | "session active"
        | "subscribed"
        | "browse done"
        | "changed" => (Fill::Green, Shape::Dot),
        "disconnected" | "terminated" => (Fill::Red, Shape::Ring),
        _ => (Fill::Red, Shape::Dot),
    };
    NodeStatus::new(fill, shape, state)
}

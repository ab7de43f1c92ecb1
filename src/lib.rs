// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A client node for flow based runtimes that talks to an OPC UA server.
//!
//! A [`ClientNode`](client::ClientNode) connects to one endpoint, opens a session and then
//! carries out the configured [`Action`](message::Action) for every message the host feeds it:
//! reading or writing the node named by the message topic, browsing from it, or subscribing to
//! its data changes or events. Results go back to the host as messages and status updates
//! through the [`Host`](provider::Host) trait.
//!
//! The OPC UA stack itself sits behind the [`Transport`](provider::Transport) and
//! [`Session`](provider::Session) traits. The crate uses the `opcua` types for node ids,
//! variants, data values and status codes.

#[macro_use]
extern crate log;

mod actions;
pub mod browse;
pub mod client;
pub mod config;
#[cfg(feature = "console-logging")]
pub mod console_logging;
pub mod events;
mod handle;
pub mod message;
pub mod provider;
pub mod registry;
pub mod status;
pub mod subscription;
pub mod variant;

#[cfg(test)]
mod tests;

pub use crate::{
    actions::WriteTarget,
    client::{ClientNode, LifecycleState},
    config::{ClientNodeConfig, Config},
    message::{Action, Message},
    provider::{Host, Session, Transport},
    status::NodeStatus,
};

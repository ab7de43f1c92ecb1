// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The read, write and browse actions. Each runs to completion on its own task so results
//! come back in whatever order the server answers, interleaved with later inputs.

use std::{str::FromStr, sync::Arc};

use opcua::types::{NodeId, StatusCode, Variant};

use crate::{
    browse::BrowseCollector,
    client::Reporter,
    message::Message,
    provider::Session,
    variant::{self, to_signed_16},
};

/// Where a write goes, recovered from the message topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub namespace: String,
    pub identifier: String,
}

impl WriteTarget {
    /// Picks a write target out of a topic such as `ns=2;s=1:PST-007-Alarm-Level@Training?SETPOINT`.
    ///
    /// The topic is cut at fixed positions: the namespace is the single character at offset 3
    /// and the string identifier is everything from offset 7. Topics with a multi digit
    /// namespace or a non string identifier are not understood.
    pub fn parse(topic: &str) -> Result<WriteTarget, StatusCode> {
        let namespace = topic.get(3..4).ok_or(StatusCode::BadNodeIdInvalid)?;
        let identifier = topic.get(7..).ok_or(StatusCode::BadNodeIdInvalid)?;
        Ok(WriteTarget {
            namespace: namespace.to_string(),
            identifier: identifier.to_string(),
        })
    }

    /// The string node id of the target.
    pub fn node_id(&self) -> Result<NodeId, StatusCode> {
        let namespace = self
            .namespace
            .parse::<u16>()
            .map_err(|_| StatusCode::BadNodeIdInvalid)?;
        Ok(NodeId::new(namespace, self.identifier.clone()))
    }
}

/// Reads the value of the node named by the topic and sends it on as the payload.
pub(crate) async fn read(session: Arc<dyn Session>, reporter: Reporter, msg: Message) {
    reporter.verbose("reading");
    let topic = msg.topic().unwrap_or_default();
    let node_id = match NodeId::from_str(topic) {
        Ok(node_id) => node_id,
        Err(status) => {
            reporter.error(&format!("Cannot read msg.topic:{} error:{}", topic, status));
            reporter.status("error");
            return;
        }
    };
    // Only a single item is read per message
    let data_values = match session.read_variable_value(&[node_id]).await {
        Ok(data_values) => data_values,
        Err(status) => {
            reporter.error(&status.to_string());
            reporter.status("error");
            return;
        }
    };
    reporter.status("active reading");
    for data_value in data_values.iter().take(1) {
        reporter.verbose(&format!("\tNode : {}", topic));
        let status = data_value.status.unwrap_or(StatusCode::Good);
        match data_value.value {
            Some(ref value) => {
                reporter.verbose(&format!("\tValue : {}", value));
                reporter.verbose(&format!("\tDataType: {}", variant::type_name(value)));
                if let Variant::UInt16(v) = value {
                    reporter.verbose(&format!("UInt16:{} -> Int32:{}", v, to_signed_16(*v)));
                }
                reporter.send(msg.with_payload(variant::decode(value)));
            }
            None => reporter.error(&format!("\tBad read: {}", status)),
        }
        reporter.verbose(&format!("\tStatus-Code:{}", status));
    }
}

/// Writes the payload, typed by the message's `datatype`, to the node named by the topic.
pub(crate) async fn write(session: Arc<dyn Session>, reporter: Reporter, msg: Message) {
    reporter.verbose("writing");
    let topic = msg.topic().unwrap_or_default();
    let node_id = match WriteTarget::parse(topic).and_then(|target| {
        reporter.verbose(&format!("namespace={}", target.namespace));
        reporter.verbose(&format!("string={}", target.identifier));
        target.node_id()
    }) {
        Ok(node_id) => node_id,
        Err(status) => {
            reporter.status("error");
            reporter.error(&format!(
                "{} Cannot write value ({}) to msg.topic:{} error:{}",
                reporter.name(),
                msg.payload,
                topic,
                status
            ));
            return;
        }
    };
    reporter.verbose(&format!("value={}", msg.payload));
    reporter.verbose(&node_id.to_string());

    let value = variant::encode(msg.datatype.as_deref(), &msg.payload);
    let result = match session.write_single_node(&node_id, value).await {
        Ok(status) if status.is_good() => Ok(()),
        Ok(status) | Err(status) => Err(status),
    };
    match result {
        Ok(()) => {
            reporter.status("active writing");
            reporter.verbose("Value written!");
        }
        Err(status) => {
            reporter.status("error");
            reporter.error(&format!(
                "{} Cannot write value ({}) to msg.topic:{} error:{}",
                reporter.name(),
                msg.payload,
                topic,
                status
            ));
        }
    }
}

/// Crawls the address space from the node named by the topic, sending a message for every
/// node found.
pub(crate) async fn browse(session: Arc<dyn Session>, reporter: Reporter, msg: Message) {
    reporter.verbose("browsing");
    let topic = msg.topic().unwrap_or_default();
    let result = match NodeId::from_str(topic) {
        Ok(root) => session.crawl(&root).await,
        Err(status) => Err(status),
    };
    match result {
        Ok(tree) => {
            reporter.status("active browsing");
            let mut collector = BrowseCollector::new(topic);
            for line in tree.lines() {
                reporter.verbose(&line);
                if let Some(message) = collector.feed(&line) {
                    reporter.send(message);
                }
            }
            reporter.status("browse done");
        }
        Err(status) => {
            reporter.error(&status.to_string());
            reporter.status("error browsing");
        }
    }
}

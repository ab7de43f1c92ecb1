// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Browse results. A crawl of the address space is flattened into a text tree, one property
//! per line, and browse messages are collected from those lines.

use serde_json::Value;

use crate::message::Message;

const BROWSE_NAME: &str = "browseName";
const NODE_ID: &str = "nodeId";
const NODE_CLASS: &str = "nodeClass";
const TYPE_DEFINITION: &str = "typeDefinition";

/// Escaped form of `/` some servers and crawlers put into node ids.
const ESCAPED_SLASH: &str = "&#x2F;";

/// A node found while crawling, with the nodes reached from it grouped by reference type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseNode {
    pub node_id: String,
    pub browse_name: String,
    pub node_class: String,
    pub type_definition: Option<String>,
    pub references: Vec<(String, Vec<BrowseNode>)>,
}

impl BrowseNode {
    pub fn new<T>(node_id: T, browse_name: T, node_class: T) -> BrowseNode
    where
        T: Into<String>,
    {
        BrowseNode {
            node_id: node_id.into(),
            browse_name: browse_name.into(),
            node_class: node_class.into(),
            type_definition: None,
            references: Vec::new(),
        }
    }

    pub fn type_definition<T>(mut self, type_definition: T) -> Self
    where
        T: Into<String>,
    {
        self.type_definition = Some(type_definition.into());
        self
    }

    pub fn reference<T>(mut self, reference_type: T, nodes: Vec<BrowseNode>) -> Self
    where
        T: Into<String>,
    {
        self.references.push((reference_type.into(), nodes));
        self
    }

    /// Renders the node and everything below it as a text tree, e.g.
    ///
    /// ```text
    /// ├─ nodeId: i=85
    /// ├─ browseName: Objects
    /// ├─ nodeClass: Object
    /// ├─ typeDefinition: FolderType
    /// └─ organizes
    ///    └─ 0
    ///       ├─ nodeId: i=2253
    /// ```
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.write_lines("", &mut lines);
        lines
    }

    fn write_lines(&self, indent: &str, lines: &mut Vec<String>) {
        let mut properties = vec![
            (NODE_ID, self.node_id.as_str()),
            (BROWSE_NAME, self.browse_name.as_str()),
            (NODE_CLASS, self.node_class.as_str()),
        ];
        if let Some(ref type_definition) = self.type_definition {
            properties.push((TYPE_DEFINITION, type_definition.as_str()));
        }
        let total = properties.len() + self.references.len();
        let mut position = 0;
        for (key, value) in properties {
            position += 1;
            lines.push(format!("{}{}{}: {}", indent, branch(position == total), key, value));
        }
        for (reference_type, nodes) in &self.references {
            position += 1;
            let last = position == total;
            lines.push(format!("{}{}{}", indent, branch(last), reference_type));
            let indent = format!("{}{}", indent, continuation(last));
            for (index, node) in nodes.iter().enumerate() {
                let last = index + 1 == nodes.len();
                lines.push(format!("{}{}{}", indent, branch(last), index));
                node.write_lines(&format!("{}{}", indent, continuation(last)), lines);
            }
        }
    }
}

fn branch(last: bool) -> &'static str {
    if last {
        "└─ "
    } else {
        "├─ "
    }
}

fn continuation(last: bool) -> &'static str {
    if last {
        "   "
    } else {
        "│  "
    }
}

/// Collects browse messages from the lines of a crawl.
///
/// Properties are picked up as they are seen and a message is emitted each time a
/// `typeDefinition` line arrives, carrying whatever was most recently seen for the other
/// properties. Nothing is reset between messages.
#[derive(Debug)]
pub struct BrowseCollector {
    current: Message,
}

impl BrowseCollector {
    pub fn new(topic: &str) -> BrowseCollector {
        BrowseCollector {
            current: Message {
                topic: Some(topic.to_string()),
                payload: Value::String(String::new()),
                node_id: Some(String::new()),
                browse_name: Some(String::new()),
                node_class_type: Some(String::new()),
                type_definition: Some(String::new()),
                ..Default::default()
            },
        }
    }

    /// Takes the next line, returning a message when the line completes one.
    pub fn feed(&mut self, line: &str) -> Option<Message> {
        if let Some(value) = property_value(line, BROWSE_NAME) {
            self.current.browse_name = Some(value.to_string());
        }
        if let Some(value) = property_value(line, NODE_ID) {
            self.current.node_id = Some(value.replace(ESCAPED_SLASH, "/"));
        }
        if let Some(value) = property_value(line, NODE_CLASS) {
            self.current.node_class_type = Some(value.to_string());
        }
        if let Some(value) = property_value(line, TYPE_DEFINITION) {
            self.current.type_definition = Some(value.to_string());
            self.current.payload = Value::from(chrono::Utc::now().timestamp_millis());
            return Some(self.current.clone());
        }
        None
    }
}

/// The text following `key: ` on a line. The key only counts when something precedes it on
/// the line, as every tree line starts with a branch marker.
fn property_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    match line.find(key) {
        Some(pos) if pos > 0 => Some(line.get(pos + key.len() + 2..).unwrap_or("")),
        _ => None,
    }
}

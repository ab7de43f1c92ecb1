// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Registry of the data change monitored items of a client, one per topic.

use std::collections::HashMap;

use crate::message::Message;

/// Queue size requested for data change monitored items.
pub const DATA_CHANGE_QUEUE_SIZE: u32 = 10;
/// Sampling interval used unless the subscribe request carries a numeric payload.
pub const DEFAULT_SAMPLING_INTERVAL: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredItemState {
    /// Requested from the server, not yet confirmed.
    Created,
    Initialized,
    /// At least one data change has been delivered.
    Changed,
    Terminated,
}

/// A server side watch on the value of the node named by a topic.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    topic: String,
    handle: u32,
    sampling_interval: f64,
    queue_size: u32,
    discard_oldest: bool,
    state: MonitoredItemState,
    /// The subscribe request. Data changes go out as copies of it.
    request: Message,
}

impl MonitoredItem {
    pub fn new(topic: &str, handle: u32, sampling_interval: f64, request: Message) -> MonitoredItem {
        MonitoredItem {
            topic: topic.to_string(),
            handle,
            sampling_interval,
            queue_size: DATA_CHANGE_QUEUE_SIZE,
            discard_oldest: true,
            state: MonitoredItemState::Created,
            request,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Client assigned handle the session reports the item's activity under.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn queue_size(&self) -> u32 {
        self.queue_size
    }

    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    pub fn state(&self) -> MonitoredItemState {
        self.state
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    pub(crate) fn set_state(&mut self, state: MonitoredItemState) {
        self.state = state;
    }
}

/// Live monitored items keyed by topic. The first registration for a topic wins, a later one
/// for the same topic is rejected.
#[derive(Debug, Default)]
pub struct MonitoredItemRegistry {
    items: HashMap<String, MonitoredItem>,
}

impl MonitoredItemRegistry {
    pub fn new() -> MonitoredItemRegistry {
        MonitoredItemRegistry::default()
    }

    pub fn get(&self, topic: &str) -> Option<&MonitoredItem> {
        self.items.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.items.contains_key(topic)
    }

    /// Adds an item unless its topic is already registered. Returns `true` if it was added.
    pub fn add(&mut self, item: MonitoredItem) -> bool {
        if self.items.contains_key(item.topic()) {
            false
        } else {
            self.items.insert(item.topic().to_string(), item);
            true
        }
    }

    pub fn delete(&mut self, topic: &str) -> Option<MonitoredItem> {
        self.items.remove(topic)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_by_handle(&self, handle: u32) -> Option<&MonitoredItem> {
        self.items.values().find(|item| item.handle == handle)
    }

    pub(crate) fn find_by_handle_mut(&mut self, handle: u32) -> Option<&mut MonitoredItem> {
        self.items.values_mut().find(|item| item.handle == handle)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(|k| k.as_str())
    }
}

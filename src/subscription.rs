// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Subscriptions of a client node.
//!
//! A client keeps at most one data change subscription and one event subscription, both made
//! on first use. The [`SubscriptionManager`] holds their state and the monitored items made
//! on them. It does no I/O itself: requests and notifications go in, and the [`Effect`]s the
//! client has to carry out on the session and the host come out.

use std::{collections::HashMap, str::FromStr};

use opcua::types::{AttributeId, NodeId, StatusCode, Variant};
use serde_json::Value;

use crate::{
    handle::Handle,
    message::Message,
    provider::{ItemEvent, MonitorRequest, Notification, SubscriptionEvent},
    registry::{MonitoredItem, MonitoredItemRegistry, MonitoredItemState, DEFAULT_SAMPLING_INTERVAL},
    variant,
};

/// Queue size requested for event monitored items.
pub const EVENT_QUEUE_SIZE: u32 = 100_000;

/// Parameters a subscription is requested with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionParameters {
    /// Requested publishing interval in milliseconds
    pub publishing_interval: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

impl SubscriptionParameters {
    /// Parameters of the data change subscription.
    pub fn data_change(publishing_interval: f64) -> SubscriptionParameters {
        SubscriptionParameters {
            publishing_interval,
            lifetime_count: 10,
            max_keep_alive_count: 2,
            max_notifications_per_publish: 10,
            publishing_enabled: true,
            priority: 10,
        }
    }

    /// Parameters of the event subscription.
    pub fn events() -> SubscriptionParameters {
        SubscriptionParameters {
            publishing_interval: 100.0,
            lifetime_count: 1000,
            max_keep_alive_count: 12,
            max_notifications_per_publish: 10,
            publishing_enabled: true,
            priority: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    DataChange,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Uninitialized,
    /// Creation has been requested.
    Initializing,
    Started { subscription_id: u32 },
    /// Absorbing, nothing leaves this state.
    Terminated,
}

impl SubscriptionState {
    /// The state a subscription moves to on an event.
    pub fn next(self, event: &SubscriptionEvent) -> SubscriptionState {
        match (self, event) {
            (SubscriptionState::Terminated, _) => SubscriptionState::Terminated,
            (_, SubscriptionEvent::Terminated) | (_, SubscriptionEvent::Error(_)) => {
                SubscriptionState::Terminated
            }
            (SubscriptionState::Uninitialized, SubscriptionEvent::Initialized) => {
                SubscriptionState::Initializing
            }
            (
                SubscriptionState::Uninitialized | SubscriptionState::Initializing,
                SubscriptionEvent::Started { subscription_id },
            ) => SubscriptionState::Started {
                subscription_id: *subscription_id,
            },
            (state, _) => state,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, SubscriptionState::Terminated)
    }
}

/// A subscription and the requests waiting for it to start.
#[derive(Debug)]
pub struct Subscription {
    kind: SubscriptionKind,
    handle: u32,
    parameters: SubscriptionParameters,
    state: SubscriptionState,
    pending: Vec<Message>,
}

impl Subscription {
    pub fn new(kind: SubscriptionKind, handle: u32, parameters: SubscriptionParameters) -> Subscription {
        Subscription {
            kind,
            handle,
            parameters,
            state: SubscriptionState::Uninitialized,
            pending: Vec::new(),
        }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn parameters(&self) -> &SubscriptionParameters {
        &self.parameters
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// The server assigned id, once started.
    pub fn subscription_id(&self) -> Option<u32> {
        match self.state {
            SubscriptionState::Started { subscription_id } => Some(subscription_id),
            _ => None,
        }
    }

    /// Number of requests waiting for the subscription to start.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// An event monitored item. Unlike data change items these are not shared by topic, every
/// events request gets its own.
#[derive(Debug, Clone)]
pub struct EventItem {
    pub topic: String,
    pub field_names: Vec<String>,
}

/// Work the client has to carry out for the subscription manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreateSubscription {
        handle: u32,
        parameters: SubscriptionParameters,
    },
    CreateMonitoredItem {
        subscription_id: u32,
        handle: u32,
        request: MonitorRequest,
    },
    TerminateSubscription {
        subscription_id: u32,
    },
    /// Update the status indicator with this state.
    Status(&'static str),
    Send(Message),
    /// Hand the fields of an event notification to the event dispatcher.
    DispatchEvent {
        field_names: Vec<String>,
        fields: Vec<Variant>,
    },
    /// Report an error to the host.
    Error(String),
}

pub struct SubscriptionManager {
    publishing_interval: f64,
    handles: Handle,
    subscription: Option<Subscription>,
    event_subscription: Option<Subscription>,
    monitored_items: MonitoredItemRegistry,
    event_items: HashMap<u32, EventItem>,
}

impl SubscriptionManager {
    /// `publishing_interval` is the interval in milliseconds requested for the data change
    /// subscription.
    pub fn new(publishing_interval: f64) -> SubscriptionManager {
        SubscriptionManager {
            publishing_interval,
            handles: Handle::new(1),
            subscription: None,
            event_subscription: None,
            monitored_items: MonitoredItemRegistry::new(),
            event_items: HashMap::new(),
        }
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    pub fn event_subscription(&self) -> Option<&Subscription> {
        self.event_subscription.as_ref()
    }

    pub fn monitored_items(&self) -> &MonitoredItemRegistry {
        &self.monitored_items
    }

    pub fn event_items(&self) -> &HashMap<u32, EventItem> {
        &self.event_items
    }

    /// Subscribes to data changes of the message's topic.
    ///
    /// The subscription is made if there is none yet, and the topic is monitored once it has
    /// started. On a started subscription a topic that is already monitored keeps its item. A
    /// subscription found terminated is dropped along with its items, and a new one is only
    /// made by the next request.
    pub fn subscribe(&mut self, msg: &Message) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.subscription.as_ref().map(|s| s.state) {
            None => {
                let handle = self.handles.next();
                let parameters = SubscriptionParameters::data_change(self.publishing_interval);
                let mut subscription =
                    Subscription::new(SubscriptionKind::DataChange, handle, parameters);
                subscription.state = SubscriptionState::Initializing;
                subscription.pending.push(msg.clone());
                self.subscription = Some(subscription);
                effects.push(Effect::CreateSubscription { handle, parameters });
            }
            Some(SubscriptionState::Terminated) => {
                self.drop_subscription();
                effects.push(Effect::Status("terminated"));
            }
            Some(SubscriptionState::Started { subscription_id }) => {
                effects.push(Effect::Status("active subscribing"));
                self.monitor_topic(subscription_id, msg, &mut effects);
            }
            Some(SubscriptionState::Uninitialized | SubscriptionState::Initializing) => {
                effects.push(Effect::Status("active subscribing"));
                if let Some(subscription) = self.subscription.as_mut() {
                    subscription.pending.push(msg.clone());
                }
            }
        }
        effects
    }

    /// Subscribes to events of the message's topic, using the message's event filter.
    pub fn subscribe_events(&mut self, msg: &Message) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.event_subscription.as_ref().map(|s| s.state) {
            None => {
                let handle = self.handles.next();
                let parameters = SubscriptionParameters::events();
                let mut subscription = Subscription::new(SubscriptionKind::Event, handle, parameters);
                subscription.state = SubscriptionState::Initializing;
                subscription.pending.push(msg.clone());
                self.event_subscription = Some(subscription);
                effects.push(Effect::CreateSubscription { handle, parameters });
            }
            Some(SubscriptionState::Terminated) => {
                self.drop_event_subscription();
                effects.push(Effect::Status("terminated"));
            }
            Some(SubscriptionState::Started { subscription_id }) => {
                self.monitor_events(subscription_id, msg, &mut effects);
            }
            Some(SubscriptionState::Uninitialized | SubscriptionState::Initializing) => {
                if let Some(subscription) = self.event_subscription.as_mut() {
                    subscription.pending.push(msg.clone());
                }
            }
        }
        effects
    }

    /// Applies a notification raised by the session.
    pub fn on_notification(&mut self, notification: Notification) -> Vec<Effect> {
        let mut effects = Vec::new();
        match notification {
            Notification::Subscription { handle, event } => {
                if self.subscription.as_ref().map(|s| s.handle) == Some(handle) {
                    self.on_subscription_event(event, &mut effects);
                } else if self.event_subscription.as_ref().map(|s| s.handle) == Some(handle) {
                    self.on_event_subscription_event(event, &mut effects);
                } else {
                    debug!("Ignoring {:?} for unknown subscription handle {}", event, handle);
                }
            }
            Notification::MonitoredItem { handle, event } => {
                if self.monitored_items.find_by_handle(handle).is_some() {
                    self.on_monitored_item_event(handle, event, &mut effects);
                } else if self.event_items.contains_key(&handle) {
                    self.on_event_item_event(handle, event, &mut effects);
                } else {
                    debug!("Ignoring {:?} for unknown monitored item handle {}", event, handle);
                }
            }
        }
        effects
    }

    /// Requests the termination of the subscriptions for a teardown. Subscriptions the server
    /// never started are dropped straight away.
    pub fn terminate(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.subscription.as_ref().map(|s| s.subscription_id()) {
            Some(Some(subscription_id)) => {
                effects.push(Effect::TerminateSubscription { subscription_id })
            }
            Some(None) => self.drop_subscription(),
            None => {}
        }
        match self.event_subscription.as_ref().map(|s| s.subscription_id()) {
            Some(Some(subscription_id)) => {
                effects.push(Effect::TerminateSubscription { subscription_id })
            }
            Some(None) => self.drop_event_subscription(),
            None => {}
        }
        effects
    }

    fn drop_subscription(&mut self) {
        self.subscription = None;
        self.monitored_items.clear();
    }

    fn drop_event_subscription(&mut self) {
        self.event_subscription = None;
        self.event_items.clear();
    }

    fn on_subscription_event(&mut self, event: SubscriptionEvent, effects: &mut Vec<Effect>) {
        let (state, pending) = match self.subscription.as_mut() {
            Some(subscription) => {
                subscription.state = subscription.state.next(&event);
                let pending = match event {
                    SubscriptionEvent::Started { .. } | SubscriptionEvent::Error(_) => {
                        std::mem::take(&mut subscription.pending)
                    }
                    _ => Vec::new(),
                };
                (subscription.state, pending)
            }
            None => return,
        };
        match event {
            SubscriptionEvent::Initialized => {
                debug!("Subscription initialized");
                effects.push(Effect::Status("initialized"));
            }
            SubscriptionEvent::Started { subscription_id } => {
                debug!("Subscription subscribed ID: {}", subscription_id);
                effects.push(Effect::Status("subscribed"));
                if let SubscriptionState::Started { subscription_id } = state {
                    for msg in pending {
                        self.monitor_topic(subscription_id, &msg, effects);
                    }
                }
            }
            SubscriptionEvent::KeepAlive => {
                debug!("Subscription keepalive, state {:?}", state);
                effects.push(Effect::Status("keepalive"));
            }
            SubscriptionEvent::Terminated => {
                debug!("Subscription terminated");
                effects.push(Effect::Status("terminated"));
                self.drop_subscription();
            }
            SubscriptionEvent::Error(status) => {
                effects.push(Effect::Error(format!("Subscription error: {}", status)));
                if !pending.is_empty() {
                    effects.push(Effect::Error(format!(
                        "{} subscribe request(s) dropped, subscription failed",
                        pending.len()
                    )));
                }
                // The subscription itself is dropped by the next subscribe request
                self.monitored_items.clear();
            }
        }
    }

    fn on_event_subscription_event(&mut self, event: SubscriptionEvent, effects: &mut Vec<Effect>) {
        let (state, pending) = match self.event_subscription.as_mut() {
            Some(subscription) => {
                subscription.state = subscription.state.next(&event);
                let pending = match event {
                    SubscriptionEvent::Started { .. } | SubscriptionEvent::Error(_) => {
                        std::mem::take(&mut subscription.pending)
                    }
                    _ => Vec::new(),
                };
                (subscription.state, pending)
            }
            None => return,
        };
        match event {
            SubscriptionEvent::Started { subscription_id } => {
                debug!("Event subscription subscribed ID: {}", subscription_id);
                if let SubscriptionState::Started { subscription_id } = state {
                    for msg in pending {
                        self.monitor_events(subscription_id, &msg, effects);
                    }
                }
            }
            SubscriptionEvent::Terminated => {
                debug!("Event subscription terminated");
                effects.push(Effect::Status("terminated"));
                self.drop_event_subscription();
            }
            SubscriptionEvent::Error(status) => {
                effects.push(Effect::Error(format!("Event subscription error: {}", status)));
                if !pending.is_empty() {
                    effects.push(Effect::Error(format!(
                        "{} events request(s) dropped, subscription failed",
                        pending.len()
                    )));
                }
                self.event_items.clear();
            }
            SubscriptionEvent::Initialized | SubscriptionEvent::KeepAlive => {
                trace!("Event subscription {:?}", event);
            }
        }
    }

    fn on_monitored_item_event(&mut self, handle: u32, event: ItemEvent, effects: &mut Vec<Effect>) {
        let Some(item) = self.monitored_items.find_by_handle_mut(handle) else {
            return;
        };
        match event {
            ItemEvent::Initialized => {
                debug!("initialized monitoredItem on {}", item.topic());
                item.set_state(MonitoredItemState::Initialized);
            }
            ItemEvent::Changed(data_value) => {
                item.set_state(MonitoredItemState::Changed);
                let payload = data_value.value.as_ref().map_or(Value::Null, variant::decode);
                debug!("{} value has changed to {}", item.topic(), payload);
                match data_value.status {
                    Some(status) if !status.is_good() => debug!("\tStatus-Code: {}", status),
                    _ => debug!("\tStatus-Code: {}", StatusCode::Good),
                }
                effects.push(Effect::Status("active subscribed"));
                effects.push(Effect::Send(item.request().with_payload(payload)));
            }
            ItemEvent::KeepAlive => {
                debug!("keepalive monitoredItem on {}", item.topic());
            }
            ItemEvent::Terminated => {
                debug!("terminated monitoredItem on {}", item.topic());
                item.set_state(MonitoredItemState::Terminated);
                let topic = item.topic().to_string();
                self.monitored_items.delete(&topic);
            }
            ItemEvent::Error(status) => {
                let topic = item.topic().to_string();
                effects.push(Effect::Error(format!(
                    "monitoredItem on {} error: {}",
                    topic, status
                )));
                // An item the server never created is forgotten so the topic can be retried
                if item.state() == MonitoredItemState::Created {
                    self.monitored_items.delete(&topic);
                }
            }
            ItemEvent::Event(_) => {
                warn!("Event notification on data change item {}", item.topic());
            }
        }
    }

    fn on_event_item_event(&mut self, handle: u32, event: ItemEvent, effects: &mut Vec<Effect>) {
        match event {
            ItemEvent::Event(fields) => {
                if let Some(item) = self.event_items.get(&handle) {
                    effects.push(Effect::Status("active event"));
                    effects.push(Effect::DispatchEvent {
                        field_names: item.field_names.clone(),
                        fields,
                    });
                }
            }
            ItemEvent::Initialized => debug!("event monitored item {} initialized", handle),
            ItemEvent::Terminated => {
                debug!("event monitored item {} terminated", handle);
                self.event_items.remove(&handle);
            }
            ItemEvent::Error(status) => {
                let topic = self
                    .event_items
                    .get(&handle)
                    .map(|item| item.topic.as_str())
                    .unwrap_or_default();
                effects.push(Effect::Error(format!(
                    "event monitored item on {} error: {}",
                    topic, status
                )));
            }
            ItemEvent::Changed(_) | ItemEvent::KeepAlive => {}
        }
    }

    /// Monitors the value of the message's topic unless an item for the topic exists.
    fn monitor_topic(&mut self, subscription_id: u32, msg: &Message, effects: &mut Vec<Effect>) {
        let Some(topic) = msg.topic() else {
            return;
        };
        if self.monitored_items.contains(topic) {
            trace!("{} is already monitored", topic);
            return;
        }
        let node_id = match NodeId::from_str(topic) {
            Ok(node_id) => node_id,
            Err(status) => {
                effects.push(Effect::Error(format!(
                    "Cannot monitor msg.topic:{} error:{}",
                    topic, status
                )));
                return;
            }
        };
        let sampling_interval = match msg.payload {
            Value::Number(ref n) => n.as_f64().unwrap_or(DEFAULT_SAMPLING_INTERVAL),
            _ => DEFAULT_SAMPLING_INTERVAL,
        };
        debug!("{} samplingInterval {}", topic, sampling_interval);
        let handle = self.handles.next();
        let item = MonitoredItem::new(topic, handle, sampling_interval, msg.clone());
        let request = MonitorRequest {
            node_id,
            attribute_id: AttributeId::Value as u32,
            sampling_interval,
            queue_size: item.queue_size(),
            discard_oldest: item.discard_oldest(),
            filter: None,
        };
        self.monitored_items.add(item);
        effects.push(Effect::CreateMonitoredItem {
            subscription_id,
            handle,
            request,
        });
    }

    /// Monitors the events of the message's topic with a new item.
    fn monitor_events(&mut self, subscription_id: u32, msg: &Message, effects: &mut Vec<Effect>) {
        let Some(topic) = msg.topic() else {
            return;
        };
        let node_id = match NodeId::from_str(topic) {
            Ok(node_id) => node_id,
            Err(status) => {
                effects.push(Effect::Error(format!(
                    "Cannot monitor events of msg.topic:{} error:{}",
                    topic, status
                )));
                return;
            }
        };
        let handle = self.handles.next();
        self.event_items.insert(
            handle,
            EventItem {
                topic: topic.to_string(),
                field_names: msg.selected_event_fields(),
            },
        );
        effects.push(Effect::CreateMonitoredItem {
            subscription_id,
            handle,
            request: MonitorRequest {
                node_id,
                attribute_id: AttributeId::EventNotifier as u32,
                sampling_interval: 0.0,
                queue_size: EVENT_QUEUE_SIZE,
                discard_oldest: true,
                filter: msg.event_filter.clone(),
            },
        });
    }
}

// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Dispatch of event notifications.
//!
//! Each event notification is broken up into one message per field. Fields holding a node id
//! are resolved to the node's browse name with a read on the session first. Notifications are
//! handled by a single worker strictly one after another, in the order they arrived, so the
//! messages of one event are all out before the next event is looked at.

use std::sync::Arc;

use opcua::types::Variant;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    message::Message,
    provider::{read_browse_name, Host, Session},
    variant,
};

/// Name used when a node's browse name could not be read.
pub const UNKNOWN_BROWSE_NAME: &str = "<??>";

/// One event notification waiting to be dispatched.
pub struct EventNotification {
    /// The session node id fields are resolved against.
    pub session: Arc<dyn Session>,
    /// Field names, positionally aligned with `fields`.
    pub field_names: Vec<String>,
    pub fields: Vec<Variant>,
    /// Fired once every field of the notification has been handled.
    pub done: Option<oneshot::Sender<()>>,
}

/// A single worker draining a FIFO of event notifications.
pub struct EventDispatcher {
    queue: mpsc::UnboundedSender<EventNotification>,
    worker: JoinHandle<()>,
}

impl EventDispatcher {
    /// Starts the worker. Must be called from within a tokio runtime.
    pub fn spawn(host: Arc<dyn Host>) -> EventDispatcher {
        let (queue, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(receiver, host));
        EventDispatcher { queue, worker }
    }

    /// Queues a notification behind those already waiting. Returns `false` if the worker has
    /// gone away.
    pub fn dispatch(&self, notification: EventNotification) -> bool {
        self.queue.send(notification).is_ok()
    }

    /// Stops accepting notifications and waits for the queued ones to be dispatched.
    pub async fn shutdown(self) {
        let EventDispatcher { queue, worker } = self;
        drop(queue);
        if let Err(err) = worker.await {
            error!("Event dispatcher worker ended abnormally: {}", err);
        }
    }

    async fn run(mut receiver: mpsc::UnboundedReceiver<EventNotification>, host: Arc<dyn Host>) {
        while let Some(notification) = receiver.recv().await {
            let EventNotification {
                session,
                field_names,
                fields,
                done,
            } = notification;
            dump_event(host.as_ref(), session.as_ref(), &field_names, &fields).await;
            if let Some(done) = done {
                let _ = done.send(());
            }
        }
        debug!("Event dispatcher queue closed");
    }
}

/// Sends one message per non-empty field of an event.
///
/// A node id field goes out under the node's browse name as its topic. If reading the browse
/// name fails outright the field is skipped, the remaining fields are still dispatched.
pub async fn dump_event(
    host: &dyn Host,
    session: &dyn Session,
    field_names: &[String],
    fields: &[Variant],
) {
    for (index, field) in fields.iter().enumerate() {
        let field_name = field_names
            .get(index)
            .map(String::as_str)
            .unwrap_or_default();
        match field {
            Variant::Empty => {}
            Variant::NodeId(node_id) => match read_browse_name(session, node_id).await {
                Ok(name) => {
                    let name = name.unwrap_or_else(|| UNKNOWN_BROWSE_NAME.to_string());
                    let payload = format!(
                        "{}:{}:{}:{}:{}",
                        name,
                        field_name,
                        variant::type_name(field),
                        name,
                        node_id
                    );
                    host.send(Message::new(name, payload));
                }
                Err(status) => {
                    debug!(
                        "Cannot read browse name of {} for event field {}, status {}",
                        node_id, field_name, status
                    );
                }
            },
            field => {
                // Let other work run between fields so a large event can't hog the runtime
                tokio::task::yield_now().await;
                let payload = format!(
                    "{}:{}:{}",
                    field_name,
                    variant::type_name(field),
                    variant::display_value(field)
                );
                host.send(Message::from_payload(payload));
            }
        }
    }
}

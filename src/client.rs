// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The client node: connection and session lifecycle plus dispatch of inbound messages.
//!
//! A [`ClientNode`] is a handle to a task that exclusively owns the transport, the session,
//! the subscriptions and the monitored items of one configured endpoint. The task connects,
//! creates a session and from then on handles, one at a time, the messages fed in by the
//! host and the notifications raised by the session. There is no reconnection. A failed
//! connect leaves the node disconnected until it is started again.

use std::{sync::Arc, time::Duration};

use opcua::types::StatusCode;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    actions,
    config::ClientNodeConfig,
    events::{EventDispatcher, EventNotification},
    message::{Action, Message},
    provider::{
        Host, ItemEvent, Notification, NotificationReceiver, NotificationSender, Session,
        SubscriptionEvent, Transport,
    },
    status::{self, NodeStatus},
    subscription::{Effect, SubscriptionManager},
};

/// Timeout requested for the session.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    CreateClient,
    Connecting,
    SessionActive,
    /// The connect sequence failed or the node was torn down.
    Disconnected,
}

/// Reporting towards the host, shared by the node task and the action tasks it spawns.
#[derive(Clone)]
pub(crate) struct Reporter {
    host: Arc<dyn Host>,
    name: String,
    verbose: bool,
}

impl Reporter {
    fn new(host: Arc<dyn Host>, config: &ClientNodeConfig) -> Reporter {
        Reporter {
            host,
            name: config.name.clone(),
            verbose: config.verbose,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, message: Message) {
        self.host.send(message);
    }

    /// Projects the state onto the host's status indicator.
    pub fn status(&self, state: &str) {
        self.verbose(&format!("Client status: {}", state));
        self.host.status(status::project(Some(state)));
    }

    pub fn error(&self, text: &str) {
        error!("{}", text);
        self.host.error(text);
    }

    pub fn verbose(&self, text: &str) {
        debug!("{}", text);
        if self.verbose {
            self.host.log(text);
        }
    }

    pub fn verbose_warn(&self, text: &str) {
        warn!("{}", text);
        if self.verbose {
            let name = if self.name.is_empty() {
                "OpcUaClientNode"
            } else {
                &self.name
            };
            self.host.warn(&format!("{}: {}", name, text));
        }
    }
}

enum Command {
    Input(Message),
    Error,
    Close(oneshot::Sender<()>),
}

/// Handle to a running client node.
pub struct ClientNode {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ClientNode {
    /// Starts the node, beginning with the connection to the configured endpoint. Must be
    /// called from within a tokio runtime.
    pub fn start(
        config: ClientNodeConfig,
        transport: Box<dyn Transport>,
        host: Arc<dyn Host>,
    ) -> ClientNode {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let instance = ClientInstance::new(config, host, notifications);
        let task = tokio::spawn(instance.run(transport, commands_rx, notifications_rx));
        ClientNode { commands, task }
    }

    /// Feeds an inbound message to the node.
    pub fn input(&self, msg: Message) {
        if self.commands.send(Command::Input(msg)).is_err() {
            warn!("Client node has stopped, input message dropped");
        }
    }

    /// Signals an error raised by the host. The node tears down its session and stays
    /// disconnected but keeps passing messages through.
    pub fn error(&self) {
        let _ = self.commands.send(Command::Error);
    }

    /// Closes the node, waiting for the teardown to finish.
    pub async fn close(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Err(err) = self.task.await {
            error!("Client node task ended abnormally: {}", err);
        }
    }
}

enum ConnectError {
    Connect(StatusCode),
    Session(StatusCode),
}

struct Connected {
    transport: Box<dyn Transport>,
    session: Arc<dyn Session>,
}

/// Connects the transport, then creates a session on it. Each step only starts once the
/// previous one succeeded.
async fn connect(
    mut transport: Box<dyn Transport>,
    endpoint: String,
    notifications: NotificationSender,
) -> Result<Connected, ConnectError> {
    debug!("connecting to {}", endpoint);
    transport
        .connect(&endpoint)
        .await
        .map_err(ConnectError::Connect)?;
    debug!("create session ...");
    let session = transport
        .create_session(SESSION_TIMEOUT, notifications)
        .await
        .map_err(ConnectError::Session)?;
    Ok(Connected { transport, session })
}

struct ClientInstance {
    config: ClientNodeConfig,
    reporter: Reporter,
    state: LifecycleState,
    transport: Option<Box<dyn Transport>>,
    session: Option<Arc<dyn Session>>,
    subscriptions: SubscriptionManager,
    dispatcher: Option<EventDispatcher>,
    notifications: NotificationSender,
}

impl ClientInstance {
    fn new(
        config: ClientNodeConfig,
        host: Arc<dyn Host>,
        notifications: NotificationSender,
    ) -> ClientInstance {
        let reporter = Reporter::new(host, &config);
        let subscriptions = SubscriptionManager::new(config.time);
        ClientInstance {
            config,
            reporter,
            state: LifecycleState::CreateClient,
            transport: None,
            session: None,
            subscriptions,
            dispatcher: None,
            notifications,
        }
    }

    async fn run(
        mut self,
        transport: Box<dyn Transport>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notifications: NotificationReceiver,
    ) {
        self.reporter.verbose_warn("create Client ...");
        self.reporter.status("create client");
        self.dispatcher = Some(EventDispatcher::spawn(self.reporter.host.clone()));

        self.state = LifecycleState::Connecting;
        self.reporter.status("connecting");
        let connecting = connect(
            transport,
            self.config.endpoint.clone(),
            self.notifications.clone(),
        );
        tokio::pin!(connecting);
        let mut pending_connect = true;

        loop {
            tokio::select! {
                result = &mut connecting, if pending_connect => {
                    pending_connect = false;
                    self.on_connect_result(result);
                }
                command = commands.recv() => match command {
                    Some(Command::Input(msg)) => self.on_input(msg),
                    Some(Command::Error) => {
                        pending_connect = false;
                        self.teardown(false, &mut notifications).await;
                    }
                    Some(Command::Close(done)) => {
                        self.teardown(true, &mut notifications).await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.teardown(true, &mut notifications).await;
                        break;
                    }
                },
                Some(notification) = notifications.recv() => self.on_notification(notification),
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }
    }

    fn on_connect_result(&mut self, result: Result<Connected, ConnectError>) {
        match result {
            Ok(Connected { transport, session }) => {
                self.reporter.verbose("session active");
                info!(
                    "Session {} active on {}",
                    session.session_id(),
                    self.config.endpoint
                );
                self.transport = Some(transport);
                self.session = Some(session);
                self.state = LifecycleState::SessionActive;
                self.reporter.status("session active");
            }
            Err(err) => {
                let status = match err {
                    ConnectError::Connect(status) => status,
                    ConnectError::Session(status) => {
                        self.reporter.status("session error");
                        status
                    }
                };
                self.reporter.error(&format!(
                    "{} OPC UA connection error: {}",
                    self.config.name, status
                ));
                self.reporter.status("connection error");
                self.session = None;
                self.transport = None;
                self.state = LifecycleState::Disconnected;
            }
        }
    }

    fn on_input(&mut self, msg: Message) {
        let (session, action) = match (self.session.clone(), self.config.action.clone()) {
            (Some(session), Some(action)) => (session, action),
            _ => {
                self.reporter.send(msg);
                return;
            }
        };
        let Some(topic) = msg.topic() else {
            self.reporter
                .verbose_warn("can't work without OPC UA NodeId - msg.topic");
            self.reporter.send(msg);
            return;
        };
        self.reporter.verbose(&format!(
            "Action on input:{} Item from Topic: {} session Id: {} state: {:?}",
            action,
            topic,
            session.session_id(),
            self.state
        ));

        match action {
            Action::Read => {
                tokio::spawn(actions::read(session, self.reporter.clone(), msg.clone()));
            }
            Action::Write => {
                tokio::spawn(actions::write(session, self.reporter.clone(), msg.clone()));
            }
            Action::Browse => {
                tokio::spawn(actions::browse(session, self.reporter.clone(), msg.clone()));
            }
            Action::Subscribe => {
                self.reporter.verbose("subscribing");
                let effects = self.subscriptions.subscribe(&msg);
                self.apply(effects);
            }
            Action::Events => {
                self.reporter.verbose("subscribing events");
                let effects = self.subscriptions.subscribe_events(&msg);
                self.apply(effects);
            }
            Action::Other(_) => {}
        }

        self.reporter.send(msg);
    }

    fn on_notification(&mut self, notification: Notification) {
        trace!("Notification {:?}", notification);
        let effects = self.subscriptions.on_notification(notification);
        self.apply(effects);
    }

    /// Carries out the effects of the subscription manager. Session calls run on their own
    /// tasks, a failed request comes back as an error notification for its handle.
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Status(state) => self.reporter.status(state),
                Effect::Send(message) => self.reporter.send(message),
                Effect::Error(text) => self.reporter.error(&text),
                Effect::CreateSubscription { handle, parameters } => {
                    let Some(session) = self.session.clone() else {
                        debug!("Subscription {} not requested, no session", handle);
                        continue;
                    };
                    let notifications = self.notifications.clone();
                    tokio::spawn(async move {
                        if let Err(status) = session.create_subscription(handle, &parameters).await
                        {
                            let _ = notifications.send(Notification::Subscription {
                                handle,
                                event: SubscriptionEvent::Error(status),
                            });
                        }
                    });
                }
                Effect::CreateMonitoredItem {
                    subscription_id,
                    handle,
                    request,
                } => {
                    let Some(session) = self.session.clone() else {
                        debug!("Monitored item {} not requested, no session", handle);
                        continue;
                    };
                    let notifications = self.notifications.clone();
                    tokio::spawn(async move {
                        if let Err(status) = session
                            .create_monitored_item(subscription_id, handle, &request)
                            .await
                        {
                            let _ = notifications.send(Notification::MonitoredItem {
                                handle,
                                event: ItemEvent::Error(status),
                            });
                        }
                    });
                }
                Effect::TerminateSubscription { subscription_id } => {
                    let Some(session) = self.session.clone() else {
                        continue;
                    };
                    let reporter = self.reporter.clone();
                    tokio::spawn(async move {
                        if let Err(status) = session.terminate_subscription(subscription_id).await {
                            reporter.error(&format!("{} {}", reporter.name(), status));
                        }
                    });
                }
                Effect::DispatchEvent {
                    field_names,
                    fields,
                } => {
                    let (Some(session), Some(dispatcher)) =
                        (self.session.clone(), self.dispatcher.as_ref())
                    else {
                        continue;
                    };
                    dispatcher.dispatch(EventNotification {
                        session,
                        field_names,
                        fields,
                        done: None,
                    });
                }
            }
        }
    }

    /// Terminates the subscriptions, closes the session and then disconnects the transport.
    /// Each step is attempted whatever happened to the one before.
    async fn teardown(&mut self, closing: bool, notifications: &mut NotificationReceiver) {
        if let Some(session) = self.session.take() {
            for effect in self.subscriptions.terminate() {
                if let Effect::TerminateSubscription { subscription_id } = effect {
                    // The subscription is dropped when its terminated notification arrives
                    if let Err(status) = session.terminate_subscription(subscription_id).await {
                        self.reporter
                            .error(&format!("{} {}", self.config.name, status));
                    }
                }
            }

            let result = session.close().await;
            self.reporter.verbose(if closing {
                "Session closed"
            } else {
                "Session closed on error emit"
            });
            if let Err(status) = result {
                self.reporter
                    .error(&format!("{} {}", self.config.name, status));
            }
            self.reporter.status("session closed");

            if let Some(mut transport) = self.transport.take() {
                transport.disconnect().await;
                self.reporter.verbose("Client disconnected!");
            }
        }
        self.transport = None;
        self.state = LifecycleState::Disconnected;

        // Apply whatever the session raised while shutting down, terminations in particular
        while let Ok(notification) = notifications.try_recv() {
            self.on_notification(notification);
        }

        if closing {
            info!("Client node {} closed", self.config.name);
            self.reporter.host.log(&format!("{} closed", self.config.name));
            self.reporter.status("closed");
        } else {
            self.reporter.status("node error");
        }
    }
}

impl NodeStatus {
    /// Status for a lifecycle state.
    pub fn for_state(state: LifecycleState) -> NodeStatus {
        let label = match state {
            LifecycleState::CreateClient => "create client",
            LifecycleState::Connecting => "connecting",
            LifecycleState::SessionActive => "session active",
            LifecycleState::Disconnected => "disconnected",
        };
        status::project(Some(label))
    }
}

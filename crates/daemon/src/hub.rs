//! The connection hub: a serialized registry of live connection handlers.
//!
//! Exactly one task (the hub event loop) mutates the registry; every other
//! component interacts through the cloneable [`HubHandle`] capability. The
//! four conceptual endpoints (register, unregister, change, list request)
//! travel over one typed event queue, which serializes them by construction.
//! Fan-out to individual clients is non-blocking so one stuck consumer
//! cannot stall a broadcast.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Identifier assigned to a connection on registration. Never reused within
/// a server lifetime.
pub type ClientId = u64;

/// Capacity of the hub event queue.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Out-of-band notification delivered to a connection handler's notify
/// queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The store changed (a client finished an upload).
    Update,
    /// The current set of connected client IDs.
    ConnectedUsers(Vec<String>),
}

/// The per-client endpoints a hub keeps for a registered connection.
#[derive(Debug)]
pub struct ClientHandle {
    notify: mpsc::Sender<Notification>,
}

impl ClientHandle {
    #[must_use]
    pub fn new(notify: mpsc::Sender<Notification>) -> Self {
        Self { notify }
    }
}

/// Errors talking to the hub.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub event loop has terminated.
    #[error("the hub is no longer running")]
    Closed,
}

enum HubEvent {
    Register {
        handle: ClientHandle,
        reply: oneshot::Sender<ClientId>,
    },
    Unregister(ClientId),
    Change,
    ListRequest(ClientId),
    SubscribeList(ClientId),
    Shutdown,
}

/// Cloneable capability for talking to the hub event loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Registers a connection and returns its assigned ID.
    pub async fn register(&self, handle: ClientHandle) -> Result<ClientId, HubError> {
        let (reply, id) = oneshot::channel();
        self.send(HubEvent::Register { handle, reply }).await?;
        id.await.map_err(|_| HubError::Closed)
    }

    /// Removes a connection from the registry.
    pub async fn unregister(&self, id: ClientId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Broadcasts a store-change notification to every live connection.
    pub async fn change(&self) -> Result<(), HubError> {
        self.send(HubEvent::Change).await
    }

    /// Requests a one-shot connected-user list for the given connection.
    pub async fn list_request(&self, id: ClientId) -> Result<(), HubError> {
        self.send(HubEvent::ListRequest(id)).await
    }

    /// Subscribes the given connection to a list on every membership change.
    pub async fn subscribe_list(&self, id: ClientId) -> Result<(), HubError> {
        self.send(HubEvent::SubscribeList(id)).await
    }

    /// Stops the event loop, unregistering everyone.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubEvent::Shutdown).await
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

struct Registered {
    notify: mpsc::Sender<Notification>,
    wants_list: bool,
}

/// The hub event loop state. Constructed with [`Hub::new`] and consumed by
/// [`Hub::run`], which is spawned once per server.
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    clients: HashMap<ClientId, Registered>,
    next_id: ClientId,
}

impl Hub {
    #[must_use]
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (
            Self {
                events: rx,
                clients: HashMap::new(),
                next_id: 1,
            },
            HubHandle { events: tx },
        )
    }

    /// Serves hub events until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("hub event loop started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register { handle, reply } => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.clients.insert(
                        id,
                        Registered {
                            notify: handle.notify,
                            wants_list: false,
                        },
                    );
                    info!(client = id, connected = self.clients.len(), "client registered");
                    let _ = reply.send(id);
                    self.notify_list_subscribers();
                }
                HubEvent::Unregister(id) => {
                    if self.clients.remove(&id).is_some() {
                        info!(client = id, connected = self.clients.len(), "client unregistered");
                        self.notify_list_subscribers();
                    }
                }
                HubEvent::Change => self.broadcast(Notification::Update),
                HubEvent::ListRequest(id) => {
                    let users = self.connected_users();
                    if let Some(client) = self.clients.get(&id) {
                        if client
                            .notify
                            .try_send(Notification::ConnectedUsers(users))
                            .is_err()
                        {
                            debug!(client = id, "fail to deliver connected-user list");
                        }
                    }
                }
                HubEvent::SubscribeList(id) => {
                    let users = self.connected_users();
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.wants_list = true;
                        let _ = client.notify.try_send(Notification::ConnectedUsers(users));
                    }
                }
                HubEvent::Shutdown => break,
            }
        }
        self.clients.clear();
        debug!("hub event loop stopped");
    }

    /// Sends `notification` to every live client without blocking. Stale
    /// entries (closed receivers) are dropped from the registry afterwards.
    fn broadcast(&mut self, notification: Notification) {
        let mut stale = Vec::new();
        for (&id, client) in &self.clients {
            match client.notify.try_send(notification.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(client = id, "notify queue full, dropping notification");
                }
                Err(TrySendError::Closed(_)) => stale.push(id),
            }
        }
        if !stale.is_empty() {
            for id in stale {
                self.clients.remove(&id);
            }
            self.notify_list_subscribers();
        }
    }

    fn notify_list_subscribers(&self) {
        let users = self.connected_users();
        for (&id, client) in &self.clients {
            if client.wants_list
                && client
                    .notify
                    .try_send(Notification::ConnectedUsers(users.clone()))
                    .is_err()
            {
                debug!(client = id, "fail to deliver connected-user list");
            }
        }
    }

    fn connected_users(&self) -> Vec<String> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids.iter().map(ClientId::to_string).collect()
    }
}

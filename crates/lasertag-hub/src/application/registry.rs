//! Device registry: the hub's view of every device in a session.
//!
//! The registry owns one [`LinkHandle`] per device and the latest
//! [`DeviceState`] snapshot for each.  Links report through a single event
//! channel; a fold task applies those events one at a time, replaces the
//! affected snapshot with a new `Arc<DeviceState>` and fans the result out to
//! subscribers.  Consumers only ever see immutable snapshots.
//!
//! # Event folding
//!
//! - Connection events touch only connection metadata.  A failure arrives
//!   as one event and is published as one snapshot carrying both the
//!   `error` state and its reason.
//! - A message updates only the blocks it carries; absent fields keep their
//!   previous value and later values overwrite earlier ones.
//! - Events from a link that has since been replaced (see [`Registry::rebuild`])
//!   are recognised by their generation and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use lasertag_core::{ConnectionState, DeviceId, DeviceState, InboundMessage};

use crate::application::link::{spawn_link, LinkConfig, LinkEvent, LinkEventKind, LinkHandle, LinkSpec};
use crate::application::transport::Connector;
use crate::application::unix_millis;
use crate::domain::{select_transport, SelectorError, TransportDescriptor, TransportMode};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("device {0} is already registered")]
    DuplicateDevice(DeviceId),

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error(transparent)]
    InvalidMode(#[from] SelectorError),
}

/// Construction options.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryOptions {
    pub link: LinkConfig,
    /// Connect every link as soon as its device is added.
    pub auto_connect: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            auto_connect: true,
        }
    }
}

/// One change delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceUpdate {
    Changed {
        device_id: DeviceId,
        state: Arc<DeviceState>,
    },
    Removed {
        device_id: DeviceId,
    },
}

impl DeviceUpdate {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceUpdate::Changed { device_id, .. } | DeviceUpdate::Removed { device_id } => {
                device_id
            }
        }
    }

    /// The new snapshot, unless the device was removed.
    pub fn state(&self) -> Option<&Arc<DeviceState>> {
        match self {
            DeviceUpdate::Changed { state, .. } => Some(state),
            DeviceUpdate::Removed { .. } => None,
        }
    }
}

/// A stream of [`DeviceUpdate`]s.  Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<DeviceUpdate>,
}

impl Subscription {
    /// Waits for the next update.  `None` once the registry is gone.
    pub async fn recv(&mut self) -> Option<DeviceUpdate> {
        self.rx.recv().await
    }

    /// Returns an update if one is already queued.
    pub fn try_recv(&mut self) -> Option<DeviceUpdate> {
        self.rx.try_recv().ok()
    }
}

struct DeviceEntry {
    address: String,
    link: LinkHandle,
    state: Arc<DeviceState>,
}

struct Session {
    mode: TransportMode,
    descriptor: TransportDescriptor,
}

struct Inner {
    // Lock order: `devices` before `session`.
    devices: RwLock<HashMap<DeviceId, DeviceEntry>>,
    session: RwLock<Session>,
    connector: Arc<dyn Connector>,
    options: RegistryOptions,
    events: mpsc::UnboundedSender<LinkEvent>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DeviceUpdate>>>,
    next_generation: AtomicU64,
}

/// Registry of device links and snapshots.  Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Creates an empty registry and starts its fold task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidMode`] if `mode` selects no transport.
    pub fn new(
        connector: Arc<dyn Connector>,
        mode: TransportMode,
        options: RegistryOptions,
    ) -> Result<Self, RegistryError> {
        let descriptor = select_transport(&mode)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        info!(%mode, "device registry started");

        let inner = Arc::new(Inner {
            devices: RwLock::new(HashMap::new()),
            session: RwLock::new(Session { mode, descriptor }),
            connector,
            options,
            events: events_tx,
            subscribers: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
        });
        tokio::spawn(fold_events(Arc::downgrade(&inner), events_rx));

        Ok(Self { inner })
    }

    pub fn link_config(&self) -> &LinkConfig {
        &self.inner.options.link
    }

    pub async fn mode(&self) -> TransportMode {
        self.inner.session.read().await.mode.clone()
    }

    /// Registers a device with a fresh link and a default snapshot.
    ///
    /// The link starts `disconnected` and is told to connect right away when
    /// `auto_connect` is set.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateDevice`] if `device_id` is known.
    pub async fn add_device(
        &self,
        device_id: impl Into<DeviceId>,
        address: impl Into<String>,
    ) -> Result<Arc<DeviceState>, RegistryError> {
        let device_id = device_id.into();
        let address = address.into();

        let mut devices = self.inner.devices.write().await;
        if devices.contains_key(&device_id) {
            return Err(RegistryError::DuplicateDevice(device_id));
        }
        let link = self.inner.spawn_link(&device_id, &address).await;
        let state = Arc::new(DeviceState::new(device_id.clone(), address.clone()));
        devices.insert(
            device_id.clone(),
            DeviceEntry {
                address,
                link: link.clone(),
                state: Arc::clone(&state),
            },
        );
        drop(devices);

        info!(device = %device_id, generation = link.generation(), "device added");
        self.inner.publish(DeviceUpdate::Changed {
            device_id,
            state: Arc::clone(&state),
        });
        if self.inner.options.auto_connect {
            link.connect();
        }
        Ok(state)
    }

    /// Stops a device's link and forgets the device.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDevice`] if `device_id` is not registered.
    pub async fn remove_device(&self, device_id: &str) -> Result<(), RegistryError> {
        let entry = self
            .inner
            .devices
            .write()
            .await
            .remove(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.to_string()))?;
        entry.link.stop().await;

        info!(device = %device_id, "device removed");
        self.inner.publish(DeviceUpdate::Removed {
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    pub async fn get_state(&self, device_id: &str) -> Option<Arc<DeviceState>> {
        self.inner
            .devices
            .read()
            .await
            .get(device_id)
            .map(|entry| Arc::clone(&entry.state))
    }

    /// Snapshot of every device.
    pub async fn states(&self) -> HashMap<DeviceId, Arc<DeviceState>> {
        self.inner
            .devices
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.state)))
            .collect()
    }

    /// Registered device ids, sorted.
    pub async fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.inner.devices.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle to the current link of `device_id`.
    pub async fn link(&self, device_id: &str) -> Option<LinkHandle> {
        self.inner
            .devices
            .read()
            .await
            .get(device_id)
            .map(|entry| entry.link.clone())
    }

    /// Subscribes to every subsequent update.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription { rx }
    }

    /// Asks every link to connect (no-op for links already up).
    pub async fn connect_all(&self) {
        for entry in self.inner.devices.read().await.values() {
            entry.link.connect();
        }
    }

    /// Switches transport mode by tearing down and recreating every link.
    ///
    /// Snapshots survive with their connection state reset to
    /// `disconnected`; live connections are not migrated.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidMode`] and leaves everything untouched
    /// if `mode` selects no transport.
    pub async fn rebuild(&self, mode: TransportMode) -> Result<(), RegistryError> {
        let descriptor = select_transport(&mode)?;

        let mut devices = self.inner.devices.write().await;
        join_all(devices.values().map(|entry| entry.link.stop())).await;
        {
            let mut session = self.inner.session.write().await;
            session.mode = mode.clone();
            session.descriptor = descriptor;
        }

        let now = unix_millis();
        let mut updates = Vec::with_capacity(devices.len());
        for (device_id, entry) in devices.iter_mut() {
            // Replacing the handle drops the old link's last reference.
            entry.link = self.inner.spawn_link(device_id, &entry.address).await;
            entry.state = Arc::new(
                entry
                    .state
                    .with_connection_state(ConnectionState::Disconnected, now),
            );
            updates.push(DeviceUpdate::Changed {
                device_id: device_id.clone(),
                state: Arc::clone(&entry.state),
            });
        }
        let links: Vec<LinkHandle> = devices.values().map(|entry| entry.link.clone()).collect();
        drop(devices);

        info!(%mode, devices = links.len(), "registry rebuilt");
        for update in updates {
            self.inner.publish(update);
        }
        if self.inner.options.auto_connect {
            for link in &links {
                link.connect();
            }
        }
        Ok(())
    }

    /// Stops every link and empties the registry.
    pub async fn shutdown(&self) {
        let entries: Vec<(DeviceId, DeviceEntry)> =
            self.inner.devices.write().await.drain().collect();
        join_all(entries.iter().map(|(_, entry)| entry.link.stop())).await;

        for (device_id, _) in &entries {
            self.inner.publish(DeviceUpdate::Removed {
                device_id: device_id.clone(),
            });
        }
        info!(devices = entries.len(), "registry shut down");
    }
}

impl Inner {
    async fn spawn_link(&self, device_id: &str, address: &str) -> LinkHandle {
        let endpoint = self
            .session
            .read()
            .await
            .descriptor
            .endpoint(device_id, address);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        spawn_link(
            LinkSpec {
                device_id: device_id.to_string(),
                endpoint,
                generation,
            },
            Arc::clone(&self.connector),
            self.options.link.clone(),
            self.events.clone(),
        )
    }

    async fn apply(&self, event: LinkEvent) {
        let LinkEvent {
            device_id,
            generation,
            kind,
        } = event;

        let update = {
            let mut devices = self.devices.write().await;
            let Some(entry) = devices.get_mut(&device_id) else {
                debug!(device = %device_id, "event for unregistered device dropped");
                return;
            };
            if entry.link.generation() != generation {
                debug!(device = %device_id, generation, "event from replaced link dropped");
                return;
            }

            let now = unix_millis();
            let next = match &kind {
                LinkEventKind::StateChanged(state) => {
                    Some(entry.state.with_connection_state(*state, now))
                }
                LinkEventKind::Failed(reason) => Some(
                    entry
                        .state
                        .with_connection_state(ConnectionState::Error, now)
                        .with_error(reason.clone()),
                ),
                LinkEventKind::Message(message) => {
                    let next = entry.state.with_message(message, now);
                    if let (InboundMessage::Status(status), Some(next)) = (message, &next) {
                        // Statuses with a config echo were already checked while decoding.
                        if status.config.is_none() && status.state.is_some() {
                            for warning in next.range_warnings() {
                                warn!(device = %device_id, %warning, "device reported an out-of-range value");
                            }
                        }
                    }
                    next
                }
                LinkEventKind::Warning(warning) => {
                    debug!(device = %device_id, %warning, "link warning");
                    None
                }
            };
            let Some(next) = next else {
                return;
            };
            entry.state = Arc::new(next);
            DeviceUpdate::Changed {
                device_id,
                state: Arc::clone(&entry.state),
            }
        };
        self.publish(update);
    }

    fn publish(&self, update: DeviceUpdate) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

async fn fold_events(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.apply(event).await;
    }
    debug!("registry fold task finished");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{Color, OVERFLOW_COLOR, PALETTE};

/// Hard cap on held slots, negotiating sessions included.
pub const MAX_SESSIONS: usize = 8;

pub type ConnectionId = Uuid;

/// Framed wire text queued for a session's writer task.
pub type Outbound = mpsc::UnboundedSender<Arc<str>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is full ({0} sessions)")]
    Full(usize),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// Table of connected sessions shared by every connection task.
///
/// All access goes through one mutex. It is only held for table operations,
/// never across an `.await`.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    capacity: usize,
    slots: Mutex<HashMap<ConnectionId, Slot>>,
}

struct Slot {
    color: Color,
    active: Option<ActivePeer>,
}

struct ActivePeer {
    nickname: Arc<str>,
    outbound: Outbound,
}

/// A session that receives broadcasts, as captured by [`Registry::snapshot`].
#[derive(Clone, Debug)]
pub struct Recipient {
    pub connection_id: ConnectionId,
    pub nickname: Arc<str>,
    pub color: Color,
    outbound: Outbound,
}

impl Recipient {
    /// Hands `framed` to the session's writer. Returns false once the writer
    /// has gone away.
    pub fn deliver(&self, framed: Arc<str>) -> bool {
        self.outbound.send(framed).is_ok()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                capacity,
                slots: Mutex::new(HashMap::with_capacity(capacity)),
            }),
        }
    }

    /// Reserves a slot for `connection_id` and picks its color.
    ///
    /// The first palette color no slot holds wins; once the palette is
    /// exhausted everyone gets [`OVERFLOW_COLOR`]. Admitting an id twice
    /// returns the color it already holds.
    pub fn admit(&self, connection_id: ConnectionId) -> Result<Color, RegistryError> {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get(&connection_id) {
            return Ok(slot.color);
        }
        if slots.len() >= self.inner.capacity {
            return Err(RegistryError::Full(slots.len()));
        }

        let color = PALETTE
            .iter()
            .copied()
            .find(|candidate| slots.values().all(|slot| slot.color != *candidate))
            .unwrap_or(OVERFLOW_COLOR);
        slots.insert(
            connection_id,
            Slot {
                color,
                active: None,
            },
        );
        Ok(color)
    }

    /// Attaches a negotiated nickname and the writer channel to an admitted
    /// slot. From here on the session shows up in snapshots.
    pub fn activate(
        &self,
        connection_id: ConnectionId,
        nickname: Arc<str>,
        outbound: Outbound,
    ) -> Result<Recipient, RegistryError> {
        let mut slots = self.inner.slots.lock();
        let slot = slots
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;
        slot.active = Some(ActivePeer {
            nickname: Arc::clone(&nickname),
            outbound: outbound.clone(),
        });
        Ok(Recipient {
            connection_id,
            nickname,
            color: slot.color,
            outbound,
        })
    }

    /// Drops the slot. Returns whether anything was removed.
    pub fn remove(&self, connection_id: ConnectionId) -> bool {
        self.inner.slots.lock().remove(&connection_id).is_some()
    }

    /// Owned copy of the active sessions. Changes to the table after this
    /// returns are not reflected in the copy.
    pub fn snapshot(&self) -> Vec<Recipient> {
        let slots = self.inner.slots.lock();
        slots
            .iter()
            .filter_map(|(id, slot)| {
                slot.active.as_ref().map(|peer| Recipient {
                    connection_id: *id,
                    nickname: Arc::clone(&peer.nickname),
                    color: slot.color,
                    outbound: peer.outbound.clone(),
                })
            })
            .collect()
    }

    /// Held slots, negotiating sessions included.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        let slots = self.inner.slots.lock();
        slots.values().filter(|slot| slot.active.is_some()).count()
    }
}

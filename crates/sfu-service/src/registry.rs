//! Session Registry.
//!
//! Process-wide map from connection id to the media resources that connection
//! owns. Each connection actor only writes its own key, so per-key atomicity
//! from the map is the only synchronization needed.

use crate::engine::MediaHandle;
use crate::errors::SfuError;
use common::types::{ConnectionId, ConsumerId, ProducerId, TransportId};
use dashmap::DashMap;

/// Resources held by one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEntry {
    pub transport: Option<TransportId>,
    pub producer: Option<ProducerId>,
    pub consumer: Option<ConsumerId>,
    /// Producers/consumers displaced by a later produce/consume. Still live in
    /// the engine until the session is released.
    pub retired: Vec<MediaHandle>,
}

impl SessionEntry {
    /// Handles to close, children before the transport.
    #[must_use]
    pub fn release_order(&self) -> Vec<MediaHandle> {
        let mut handles = self.dependents();
        if let Some(transport) = self.transport {
            handles.push(MediaHandle::Transport(transport));
        }
        handles
    }

    fn dependents(&self) -> Vec<MediaHandle> {
        let mut handles = Vec::with_capacity(self.retired.len() + 2);
        if let Some(producer) = self.producer {
            handles.push(MediaHandle::Producer(producer));
        }
        if let Some(consumer) = self.consumer {
            handles.push(MediaHandle::Consumer(consumer));
        }
        handles.extend(self.retired.iter().copied());
        handles
    }
}

/// A transport displaced by a repeated create-transport, along with the
/// producers/consumers that were created on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedTransport {
    pub transport: TransportId,
    pub dependents: Vec<MediaHandle>,
}

impl ReplacedTransport {
    #[must_use]
    pub fn release_order(&self) -> Vec<MediaHandle> {
        let mut handles = self.dependents.clone();
        handles.push(MediaHandle::Transport(self.transport));
        handles
    }
}

/// Concurrent connection-id keyed session store.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SessionEntry>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty entry for a newly connected client.
    ///
    /// Returns `false` if the connection was already registered.
    pub fn register(&self, connection_id: ConnectionId) -> bool {
        match self.sessions.entry(connection_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(SessionEntry::default());
                true
            }
        }
    }

    /// Store the connection's transport.
    ///
    /// If a transport was already stored, it is returned together with its
    /// producers/consumers so the caller can close them. Fails with
    /// [`SfuError::SessionClosed`] if the session has been released.
    pub fn set_transport(
        &self,
        connection_id: ConnectionId,
        transport: TransportId,
    ) -> Result<Option<ReplacedTransport>, SfuError> {
        let mut entry = self
            .sessions
            .get_mut(&connection_id)
            .ok_or(SfuError::SessionClosed)?;

        let replaced = entry.transport.replace(transport).map(|old| {
            let dependents = entry.dependents();
            entry.producer = None;
            entry.consumer = None;
            entry.retired.clear();
            ReplacedTransport {
                transport: old,
                dependents,
            }
        });
        Ok(replaced)
    }

    /// Store the connection's producer. A previous producer moves to `retired`.
    pub fn set_producer(
        &self,
        connection_id: ConnectionId,
        producer: ProducerId,
    ) -> Result<(), SfuError> {
        let mut entry = self
            .sessions
            .get_mut(&connection_id)
            .ok_or(SfuError::SessionClosed)?;

        if let Some(previous) = entry.producer.replace(producer) {
            entry.retired.push(MediaHandle::Producer(previous));
        }
        Ok(())
    }

    /// Store the connection's consumer. A previous consumer moves to `retired`.
    pub fn set_consumer(
        &self,
        connection_id: ConnectionId,
        consumer: ConsumerId,
    ) -> Result<(), SfuError> {
        let mut entry = self
            .sessions
            .get_mut(&connection_id)
            .ok_or(SfuError::SessionClosed)?;

        if let Some(previous) = entry.consumer.replace(consumer) {
            entry.retired.push(MediaHandle::Consumer(previous));
        }
        Ok(())
    }

    /// Remove the connection's entry. Only the first call gets the entry.
    pub fn remove(&self, connection_id: ConnectionId) -> Option<SessionEntry> {
        self.sessions.remove(&connection_id).map(|(_, entry)| entry)
    }

    #[must_use]
    pub fn transport(&self, connection_id: ConnectionId) -> Option<TransportId> {
        self.sessions.get(&connection_id).and_then(|e| e.transport)
    }

    #[must_use]
    pub fn producer(&self, connection_id: ConnectionId) -> Option<ProducerId> {
        self.sessions.get(&connection_id).and_then(|e| e.producer)
    }

    #[must_use]
    pub fn consumer(&self, connection_id: ConnectionId) -> Option<ConsumerId> {
        self.sessions.get(&connection_id).and_then(|e| e.consumer)
    }

    /// Snapshot of a connection's entry.
    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<SessionEntry> {
        self.sessions.get(&connection_id).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions currently holding a producer.
    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.value().producer.is_some())
            .count()
    }
}

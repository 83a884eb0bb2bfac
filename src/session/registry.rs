//! Stream registry.
//!
//! Maps stream IDs to the sending half of each stream's delivery queue and
//! tracks the highest ID accepted so far. Only the session reader inserts;
//! stream tasks remove their own entry once they have drained their queue.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::frame::Frame;

/// Sending half of a stream's delivery queue.
pub type Endpoint = mpsc::Sender<Frame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("stream {0} is already registered")]
    Duplicate(u32),

    #[error("stream {id} does not exceed previous stream {high_water}")]
    NotIncreasing { id: u32, high_water: u32 },

    /// The session announced it will accept no new streams.
    #[error("registry is sealed, stream {0} refused")]
    Sealed(u32),
}

#[derive(Debug, Default)]
struct Entry {
    /// `None` once the session has closed the stream's endpoint.
    endpoint: Option<Endpoint>,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<u32, Entry>,
    high_water: u32,
    sealed: bool,
}

impl Inner {
    fn check_new(&self, id: u32) -> Result<(), RegistryError> {
        if self.streams.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        if id <= self.high_water {
            return Err(RegistryError::NotIncreasing {
                id,
                high_water: self.high_water,
            });
        }
        Ok(())
    }
}

/// Concurrency-safe stream table.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    inner: RwLock<Inner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stream. IDs must be new and strictly increasing.
    ///
    /// An invalid ID is reported as such even when the registry is sealed.
    pub fn register(&self, id: u32, endpoint: Endpoint) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        inner.check_new(id)?;
        if inner.sealed {
            return Err(RegistryError::Sealed(id));
        }
        inner.high_water = id;
        inner.streams.insert(
            id,
            Entry {
                endpoint: Some(endpoint),
            },
        );
        Ok(())
    }

    /// Whether `id` could name a new stream, ignoring the seal.
    pub fn validate_new(&self, id: u32) -> Result<(), RegistryError> {
        self.inner.read().check_new(id)
    }

    /// Endpoint of an open stream.
    pub fn lookup(&self, id: u32) -> Option<Endpoint> {
        self.inner
            .read()
            .streams
            .get(&id)
            .and_then(|entry| entry.endpoint.clone())
    }

    /// Drop the session's sender so the stream task drains and exits.
    ///
    /// The entry stays until the stream task deregisters.
    pub fn close_endpoint(&self, id: u32) -> bool {
        self.inner
            .write()
            .streams
            .get_mut(&id)
            .and_then(|entry| entry.endpoint.take())
            .is_some()
    }

    /// Close every endpoint.
    pub fn close_all(&self) {
        let mut inner = self.inner.write();
        for entry in inner.streams.values_mut() {
            entry.endpoint = None;
        }
    }

    /// Remove a stream. Called by its task on exit.
    pub fn deregister(&self, id: u32) -> bool {
        self.inner.write().streams.remove(&id).is_some()
    }

    /// Refuse all further registrations and return the high-water mark.
    ///
    /// Every stream up to the returned ID was either accepted or will never be.
    pub fn seal(&self) -> u32 {
        let mut inner = self.inner.write();
        inner.sealed = true;
        inner.high_water
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    pub fn contains(&self, id: u32) -> bool {
        self.inner.read().streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().streams.is_empty()
    }

    pub fn high_water_mark(&self) -> u32 {
        self.inner.read().high_water
    }

    /// Registered IDs in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.inner.read().streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

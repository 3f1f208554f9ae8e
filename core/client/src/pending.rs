//! Requests parked awaiting an authentication redirect.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use filerelay_common::{Error, RequestId};

/// One registry entry.
struct PendingSlot<T> {
    request_id: RequestId,
    parked_at: DateTime<Utc>,
    generation: u64,
    /// Cancelled once the slot stops being parked (claimed or removed).
    released: CancellationToken,
    /// Cancels the chain itself, wherever it is.
    cancel: CancellationToken,
    /// `None` while a resumption is re-executing the request.
    chain: Option<T>,
}

/// Receipt for a park; identifies this particular parking of a slot.
#[derive(Debug, Clone)]
pub struct Parked {
    pub generation: u64,
    /// Fires when the slot is claimed or removed.
    pub released: CancellationToken,
}

/// What withdrawing a request from the registry found.
#[derive(Debug)]
pub enum Withdrawn<T> {
    /// The chain was parked and has been removed.
    Parked(T),
    /// The chain is being re-executed; it has been cancelled and settles itself.
    InFlight,
}

/// Diagnostic view of a registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub redirect_url: String,
    pub request_id: RequestId,
    pub parked_at: DateTime<Utc>,
    pub in_flight: bool,
}

/// Table mapping redirect URLs to the request chains waiting on them.
///
/// Keys are unique. Lookup picks the longest key that prefixes the incoming
/// URL; if that entry is already being resumed, the lookup misses, so a
/// repeated signal never re-drives a request twice.
pub struct PendingRequestRegistry<T> {
    slots: HashMap<String, PendingSlot<T>>,
    next_generation: u64,
}

impl<T> PendingRequestRegistry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_generation: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Park a chain under `key`.
    ///
    /// `cancel` is the chain's own token, fired when the chain is withdrawn
    /// while a resumption is re-executing it.
    ///
    /// # Errors
    /// - `key` is already registered (the chain is handed back)
    pub fn insert(
        &mut self,
        key: String,
        request_id: RequestId,
        cancel: CancellationToken,
        chain: T,
    ) -> std::result::Result<Parked, (Error, T)> {
        if self.slots.contains_key(&key) {
            return Err((
                Error::AlreadyExists(format!("Redirect {} is already pending", key)),
                chain,
            ));
        }

        let generation = self.bump();
        let released = CancellationToken::new();
        self.slots.insert(
            key,
            PendingSlot {
                request_id,
                parked_at: Utc::now(),
                generation,
                released: released.clone(),
                cancel,
                chain: Some(chain),
            },
        );

        Ok(Parked {
            generation,
            released,
        })
    }

    /// Longest registered key that prefixes `url`, in flight or not.
    fn longest_match(&self, url: &str) -> Option<&str> {
        self.slots
            .keys()
            .filter(|key| url.starts_with(key.as_str()))
            .max_by_key(|key| key.len())
            .map(String::as_str)
    }

    /// Take the chain matching `url` out for re-execution.
    ///
    /// The slot stays registered (in flight) until it is restored or removed.
    pub fn claim(&mut self, url: &str) -> Option<(String, T)> {
        let key = self.longest_match(url)?.to_string();
        let slot = self.slots.get_mut(&key)?;
        let chain = slot.chain.take()?;
        slot.released.cancel();
        Some((key, chain))
    }

    /// Park a claimed chain again under its existing key.
    ///
    /// # Errors
    /// - No slot for `key`, or the slot is not in flight
    pub fn restore(&mut self, key: &str, chain: T) -> std::result::Result<Parked, (Error, T)> {
        let generation = self.bump();
        let Some(slot) = self.slots.get_mut(key) else {
            return Err((Error::NotFound(format!("No pending slot for {}", key)), chain));
        };
        if slot.chain.is_some() {
            return Err((
                Error::AlreadyExists(format!("Slot {} is already parked", key)),
                chain,
            ));
        }

        let released = CancellationToken::new();
        slot.generation = generation;
        slot.parked_at = Utc::now();
        slot.released = released.clone();
        slot.chain = Some(chain);

        Ok(Parked {
            generation,
            released,
        })
    }

    /// Remove a slot, returning its chain if it was parked.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let slot = self.slots.remove(key)?;
        slot.released.cancel();
        slot.chain
    }

    /// Remove a slot only if it is still parked under `generation`.
    pub fn evict(&mut self, key: &str, generation: u64) -> Option<T> {
        let slot = self.slots.get(key)?;
        if slot.generation != generation || slot.chain.is_none() {
            return None;
        }
        self.remove(key)
    }

    /// Remove every parked slot, returning its chain.
    ///
    /// In-flight chains are cancelled instead; their slots stay until the
    /// resumption settles them.
    pub fn drain(&mut self) -> Vec<T> {
        let parked: Vec<String> = self
            .slots
            .iter()
            .filter_map(|(key, slot)| {
                if slot.chain.is_none() {
                    slot.cancel.cancel();
                    None
                } else {
                    Some(key.clone())
                }
            })
            .collect();

        parked.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Withdraw the chain of `request_id`.
    ///
    /// A parked chain is removed and returned. An in-flight chain is
    /// cancelled and its slot left for the resumption to release.
    pub fn withdraw(&mut self, request_id: RequestId) -> Option<Withdrawn<T>> {
        let key = self.key_for(request_id)?.to_string();
        let slot = self.slots.get(&key)?;
        if slot.chain.is_none() {
            slot.cancel.cancel();
            return Some(Withdrawn::InFlight);
        }
        self.remove(&key).map(Withdrawn::Parked)
    }

    /// Key under which `request_id` is registered.
    pub fn key_for(&self, request_id: RequestId) -> Option<&str> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.request_id == request_id)
            .map(|(key, _)| key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot of every entry.
    pub fn snapshot(&self) -> Vec<PendingInfo> {
        let mut entries: Vec<PendingInfo> = self
            .slots
            .iter()
            .map(|(key, slot)| PendingInfo {
                redirect_url: key.clone(),
                request_id: slot.request_id,
                parked_at: slot.parked_at,
                in_flight: slot.chain.is_none(),
            })
            .collect();
        entries.sort_by_key(|info| info.parked_at);
        entries
    }
}

impl<T> Default for PendingRequestRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

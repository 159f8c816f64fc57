//! Short-lived correlation of `geoip:` reports with the next connect.
//!
//! The server prints a client's location before its `connect:` line. The
//! location is held here until that connect (or a disconnect) consumes it.
//! Entries for clients that never connect are evicted by age and capacity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::common::types::ClientId;

#[derive(Debug, Clone)]
struct GeoEntry {
    location: String,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct GeoIpCache {
    entries: HashMap<ClientId, GeoEntry>,
    /// `None` keeps entries until consumed or pushed out by capacity.
    ttl: Option<Duration>,
    capacity: usize,
}

impl GeoIpCache {
    pub fn new(ttl: Option<Duration>, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Remember a client's location, replacing any earlier report.
    pub fn insert(&mut self, client_id: ClientId, location: String) {
        self.insert_at(client_id, location, Instant::now());
    }

    /// Consume the location for a client, if one is cached and not expired.
    pub fn take(&mut self, client_id: ClientId) -> Option<String> {
        self.take_at(client_id, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.entries.contains_key(&client_id)
    }

    fn insert_at(&mut self, client_id: ClientId, location: String, now: Instant) {
        self.evict_expired(now);

        if !self.entries.contains_key(&client_id) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(id, _)| *id)
            {
                debug!("GeoIP cache full, evicting client {}", oldest);
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            client_id,
            GeoEntry {
                location,
                inserted_at: now,
            },
        );
    }

    fn take_at(&mut self, client_id: ClientId, now: Instant) -> Option<String> {
        let entry = self.entries.remove(&client_id)?;
        if self.is_expired(&entry, now) {
            debug!("GeoIP entry for client {} expired", client_id);
            return None;
        }
        Some(entry.location)
    }

    fn is_expired(&self, entry: &GeoEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.inserted_at) > ttl)
    }

    fn evict_expired(&mut self, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.inserted_at) <= ttl);
    }
}

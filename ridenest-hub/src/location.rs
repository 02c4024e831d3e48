use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Most recent vehicle position for one ride.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveLocation {
    pub lat: f64,
    pub lng: f64,
    pub updated_at: DateTime<Utc>,
}

/// Bounded ride id -> last position table.
///
/// When full, inserting a new ride evicts the entry that has gone longest without
/// a sample. Entries older than `ttl` are removed by [`LocationCache::sweep_stale`].
#[derive(Debug)]
pub struct LocationCache {
    entries: HashMap<Uuid, LiveLocation>,
    capacity: usize,
    ttl: Duration,
}

impl LocationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Overwrite the position for `ride_id`. Returns the ride evicted to make room, if any.
    pub fn upsert(&mut self, ride_id: Uuid, lat: f64, lng: f64, now: DateTime<Utc>) -> Option<Uuid> {
        let mut evicted = None;
        if !self.entries.contains_key(&ride_id) && self.entries.len() >= self.capacity {
            evicted = self
                .entries
                .iter()
                .min_by_key(|(_, loc)| loc.updated_at)
                .map(|(id, _)| *id);
            if let Some(id) = evicted {
                self.entries.remove(&id);
            }
        }

        self.entries.insert(ride_id, LiveLocation { lat, lng, updated_at: now });
        evicted
    }

    pub fn get(&self, ride_id: &Uuid) -> Option<LiveLocation> {
        self.entries.get(ride_id).copied()
    }

    pub fn evict(&mut self, ride_id: &Uuid) -> Option<LiveLocation> {
        self.entries.remove(ride_id)
    }

    /// Drop every entry not refreshed within the TTL. Returns the rides dropped.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let cutoff = now - self.ttl;
        let stale: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, loc)| loc.updated_at < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

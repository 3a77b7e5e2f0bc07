//! Per-map shared refresh state.
//!
//! One [`MapSessionState`] exists per map view and is shared by every layer
//! attached to it. It records, per [`RefreshKey`], when that layer's content
//! last changed. Layers compare this timestamp with the one they last
//! rendered to detect staleness.
//!
//! Writes are published on a broadcast channel so attached layers can
//! re-evaluate without polling.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::features::DataSourceKey;

/// Wall-clock time of a content change.
pub type Timestamp = DateTime<Utc>;

/// Capacity of the session change channel.
pub const SESSION_EVENT_CAPACITY: usize = 64;

const REFRESH_KEY_SUFFIX: &str = "MapDateUpdated";

/// Slot in the session that records one layer's last change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshKey(String);

impl RefreshKey {
    /// Key for a data source: `"<dataSourceKey>MapDateUpdated"`.
    pub fn for_data_source(key: &DataSourceKey) -> Self {
        Self(format!("{}{}", key.as_str(), REFRESH_KEY_SUFFIX))
    }

    /// Custom key, for layers that share or rename their slot.
    pub fn custom(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefreshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recorded change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChange {
    pub key: RefreshKey,
    pub changed_at: Timestamp,
}

/// Shared refresh timestamps for one map view.
pub struct MapSessionState {
    changes: DashMap<RefreshKey, Timestamp>,
    events: broadcast::Sender<SessionChange>,
}

impl fmt::Debug for MapSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapSessionState")
            .field("tracked_keys", &self.changes.len())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl Default for MapSessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl MapSessionState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            changes: DashMap::new(),
            events,
        }
    }

    /// Last recorded change for a key.
    pub fn last_change(&self, key: &RefreshKey) -> Option<Timestamp> {
        self.changes.get(key).map(|entry| *entry.value())
    }

    /// Record a change at an explicit time and notify subscribers.
    pub fn record_change(&self, key: RefreshKey, changed_at: Timestamp) {
        self.changes.insert(key.clone(), changed_at);
        // No subscribers is fine: nobody needs to re-evaluate.
        let _ = self.events.send(SessionChange { key, changed_at });
    }

    /// Record a change "now" and notify subscribers.
    ///
    /// The stored time is strictly later than the previous one for the key,
    /// so two touches in the same clock tick still read as two changes.
    pub fn touch(&self, key: &RefreshKey) -> Timestamp {
        let changed_at = {
            let mut entry = self.changes.entry(key.clone()).or_insert_with(Utc::now);
            let now = Utc::now();
            let next = if now > *entry {
                now
            } else {
                *entry + ChronoDuration::nanoseconds(1)
            };
            *entry = next;
            next
        };
        let _ = self.events.send(SessionChange {
            key: key.clone(),
            changed_at,
        });
        changed_at
    }

    /// Seed a key that has never been recorded.
    ///
    /// Returns the stored timestamp: `at` when the key was absent, the
    /// existing value otherwise. Seeding does not notify subscribers because
    /// the seeding layer already observed the value.
    pub fn seed(&self, key: &RefreshKey, at: Timestamp) -> Timestamp {
        *self.changes.entry(key.clone()).or_insert(at).value()
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }

    /// Number of keys with a recorded change.
    pub fn tracked_keys(&self) -> usize {
        self.changes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RefreshKey {
        RefreshKey::for_data_source(&DataSourceKey::new("obs"))
    }

    #[test]
    fn test_refresh_key_derivation() {
        assert_eq!(key().as_str(), "obsMapDateUpdated");
        assert_eq!(
            RefreshKey::custom("ObservationMapDateUpdated").to_string(),
            "ObservationMapDateUpdated"
        );
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        let session = MapSessionState::new();
        let first = session.touch(&key());
        let second = session.touch(&key());
        assert!(second > first);
        assert_eq!(session.last_change(&key()), Some(second));
    }

    #[test]
    fn test_seed_keeps_existing_value() {
        let session = MapSessionState::new();
        let recorded = session.touch(&key());
        let seeded = session.seed(&key(), recorded - ChronoDuration::seconds(5));
        assert_eq!(seeded, recorded);
    }

    #[test]
    fn test_seed_absent_key() {
        let session = MapSessionState::new();
        let at = Utc::now();
        assert_eq!(session.seed(&key(), at), at);
        assert_eq!(session.last_change(&key()), Some(at));
        assert_eq!(session.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let session = MapSessionState::new();
        let mut rx = session.subscribe();

        let at = session.touch(&key());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, key());
        assert_eq!(change.changed_at, at);
    }

    #[tokio::test]
    async fn test_record_change_stores_and_notifies() {
        let session = MapSessionState::new();
        let mut rx = session.subscribe();
        let synced_at = Utc::now() + ChronoDuration::seconds(30);

        session.record_change(key(), synced_at);
        assert_eq!(session.last_change(&key()), Some(synced_at));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, key());
        assert_eq!(change.changed_at, synced_at);

        // A touch after a future-dated record still moves forward.
        assert!(session.touch(&key()) > synced_at);
    }

    #[tokio::test]
    async fn test_seed_is_silent() {
        let session = MapSessionState::new();
        let mut rx = session.subscribe();
        session.seed(&key(), Utc::now());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}

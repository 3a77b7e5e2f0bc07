//! Application-wide "data changed" broadcasts.
//!
//! Anything that alters what a data source would return (a new filter, a
//! completed sync) publishes a [`DataChangeNotification`]. Layers listening on
//! the bus react to notifications for their own key by invalidating their
//! repository cache and refreshing immediately.

use tokio::sync::broadcast;

use crate::features::DataSourceKey;

/// Capacity of the notification channel.
pub const DATA_CHANGE_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChangeNotification {
    pub data_source: DataSourceKey,
    /// Free-form cause, for logging (e.g. `"filter"`, `"sync"`).
    pub reason: String,
}

impl DataChangeNotification {
    pub fn new(data_source: DataSourceKey, reason: impl Into<String>) -> Self {
        Self {
            data_source,
            reason: reason.into(),
        }
    }
}

/// Broadcast bus for [`DataChangeNotification`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DataChangeBus {
    tx: broadcast::Sender<DataChangeNotification>,
}

impl Default for DataChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DataChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DATA_CHANGE_CAPACITY);
        Self { tx }
    }

    /// Publish a notification. Returns how many listeners received it.
    pub fn publish(&self, notification: DataChangeNotification) -> usize {
        self.tx.send(notification).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataChangeNotification> {
        self.tx.subscribe()
    }
}

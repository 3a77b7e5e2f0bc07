//! Per-layer preference subscription.
//!
//! A [`SettingsSubscription`] watches one layer's two keys in a store and
//! forwards [`PreferenceChange`]s to a callback. The current values are
//! delivered once on start; afterwards only values that differ from the last
//! delivered one are forwarded.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{order_key, visibility_key, SettingValue, SettingsStore};
use crate::features::DataSourceKey;

/// A deduplicated preference update for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceChange {
    Visibility(bool),
    Order(i64),
}

/// Suppresses consecutive duplicate preference values.
#[derive(Debug, Default, Clone)]
pub struct PreferenceFilter {
    last_visibility: Option<bool>,
    last_order: Option<i64>,
}

impl PreferenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the change differs from the last accepted value of
    /// the same kind, and records it.
    pub fn accept(&mut self, change: PreferenceChange) -> bool {
        match change {
            PreferenceChange::Visibility(v) => replace_if_changed(&mut self.last_visibility, v),
            PreferenceChange::Order(v) => replace_if_changed(&mut self.last_order, v),
        }
    }
}

fn replace_if_changed<T: PartialEq + Copy>(slot: &mut Option<T>, value: T) -> bool {
    if *slot == Some(value) {
        return false;
    }
    *slot = Some(value);
    true
}

/// Running subscription. Cancelled on [`cancel`](Self::cancel) or drop.
#[derive(Debug)]
pub struct SettingsSubscription {
    cancellation: CancellationToken,
}

impl SettingsSubscription {
    /// Start watching `data_source`'s preferences on `runtime`.
    ///
    /// `on_change` runs on the subscription task, never concurrently with
    /// itself.
    pub fn spawn<F>(
        store: Arc<dyn SettingsStore>,
        data_source: DataSourceKey,
        runtime: &Handle,
        cancellation: CancellationToken,
        on_change: F,
    ) -> Self
    where
        F: Fn(PreferenceChange) + Send + Sync + 'static,
    {
        let show_key = visibility_key(&data_source);
        let order_key = order_key(&data_source);
        // Subscribe before reading the initial values so no write is missed.
        let mut rx = store.subscribe();
        let token = cancellation.clone();

        runtime.spawn(async move {
            let mut filter = PreferenceFilter::new();
            let mut deliver = |change: PreferenceChange| {
                if filter.accept(change) {
                    debug!(data_source = %data_source, change = ?change, "Preference changed");
                    on_change(change);
                } else {
                    trace!(data_source = %data_source, change = ?change, "Duplicate preference suppressed");
                }
            };

            deliver(PreferenceChange::Visibility(store.visibility(&data_source)));
            deliver(PreferenceChange::Order(store.order(&data_source)));

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    result = rx.recv() => match result {
                        Ok(change) => {
                            let preference = match change.value {
                                SettingValue::Bool(v) if change.key == show_key => {
                                    PreferenceChange::Visibility(v)
                                }
                                SettingValue::Int(v) if change.key == order_key => {
                                    PreferenceChange::Order(v)
                                }
                                _ => continue,
                            };
                            deliver(preference);
                        }
                        Err(RecvError::Lagged(missed)) => {
                            // Re-read the store; the filter drops anything unchanged.
                            trace!(data_source = %data_source, missed, "Settings subscription lagged");
                            deliver(PreferenceChange::Visibility(store.visibility(&data_source)));
                            deliver(PreferenceChange::Order(store.order(&data_source)));
                        }
                        Err(RecvError::Closed) => {
                            debug!(data_source = %data_source, "Settings store closed");
                            break;
                        }
                    }
                }
            }
        });

        Self { cancellation }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Drop for SettingsSubscription {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_filter_suppresses_duplicates() {
        let mut filter = PreferenceFilter::new();
        assert!(filter.accept(PreferenceChange::Visibility(true)));
        assert!(!filter.accept(PreferenceChange::Visibility(true)));
        assert!(filter.accept(PreferenceChange::Visibility(false)));
    }

    #[test]
    fn test_filter_tracks_kinds_independently() {
        let mut filter = PreferenceFilter::new();
        assert!(filter.accept(PreferenceChange::Order(1)));
        assert!(filter.accept(PreferenceChange::Visibility(false)));
        assert!(!filter.accept(PreferenceChange::Order(1)));
        assert!(filter.accept(PreferenceChange::Order(2)));
    }

    fn collect(
        store: Arc<dyn SettingsStore>,
    ) -> (SettingsSubscription, Arc<Mutex<Vec<PreferenceChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = SettingsSubscription::spawn(
            store,
            DataSourceKey::new("obs"),
            &Handle::current(),
            CancellationToken::new(),
            move |change| sink.lock().push(change),
        );
        (subscription, seen)
    }

    #[tokio::test]
    async fn test_initial_values_delivered() {
        let store = Arc::new(MemorySettingsStore::new());
        store.set("order_obs", SettingValue::Int(4));

        let (_subscription, seen) = collect(store);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            *seen.lock(),
            vec![
                PreferenceChange::Visibility(false),
                PreferenceChange::Order(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_identical_writes_forwarded_once() {
        let store = Arc::new(MemorySettingsStore::new());
        let (_subscription, seen) = collect(store.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.set("show_obs", SettingValue::Bool(true));
        store.set("show_obs", SettingValue::Bool(true));
        store.set("show_other", SettingValue::Bool(true));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let visibility: Vec<_> = seen
            .lock()
            .iter()
            .filter(|c| matches!(c, PreferenceChange::Visibility(_)))
            .copied()
            .collect();
        assert_eq!(
            visibility,
            vec![
                PreferenceChange::Visibility(false),
                PreferenceChange::Visibility(true)
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let store = Arc::new(MemorySettingsStore::new());
        let (subscription, seen) = collect(store.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        subscription.cancel();
        assert!(subscription.is_cancelled());
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.set("show_obs", SettingValue::Bool(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 2);
    }
}

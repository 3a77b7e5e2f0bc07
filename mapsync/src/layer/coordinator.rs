//! Refresh coalescing policy.
//!
//! Two triggers refresh a layer, and they want opposite things from the
//! removal of stale visuals:
//!
//! ```text
//! NewData  --> touch session --> update --> commit --> (delay) --> clear previous
//! Settings --> touch session --> update --> clear previous (same call)
//! ```
//!
//! New data keeps the old visuals on screen until the new ones have had a
//! chance to draw, so nothing flashes. A settings change is a user action and
//! the old visuals go at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::session::{MapSessionState, RefreshKey, Timestamp};

/// What caused a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// The backend reported new content for this data source.
    NewData,
    /// Visibility, order, filter, or any other query change.
    Settings,
}

/// How previous visuals leave the map after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Removed synchronously with the update.
    Immediate,
    /// Removed once, this long after the new visuals are committed.
    Deferred(Duration),
}

/// Per-layer refresh state machine.
#[derive(Debug)]
pub struct RefreshCoordinator {
    refresh_key: RefreshKey,
    cleanup_delay: Duration,
    due_to_new_data: AtomicBool,
}

impl RefreshCoordinator {
    pub fn new(refresh_key: RefreshKey, cleanup_delay: Duration) -> Self {
        Self {
            refresh_key,
            cleanup_delay,
            due_to_new_data: AtomicBool::new(false),
        }
    }

    pub fn refresh_key(&self) -> &RefreshKey {
        &self.refresh_key
    }

    /// Mark the layer stale in the session.
    ///
    /// Every layer watching this key re-evaluates on the session change.
    pub fn request_refresh(&self, session: &MapSessionState, trigger: RefreshTrigger) -> Timestamp {
        if trigger == RefreshTrigger::NewData {
            self.due_to_new_data.store(true, Ordering::SeqCst);
        }
        let at = session.touch(&self.refresh_key);
        debug!(refresh_key = %self.refresh_key, trigger = ?trigger, "Refresh requested");
        at
    }

    /// Removal policy for the update cycle now starting. Resets the trigger.
    pub fn take_removal_policy(&self) -> RemovalPolicy {
        if self.due_to_new_data.swap(false, Ordering::SeqCst) {
            RemovalPolicy::Deferred(self.cleanup_delay)
        } else {
            RemovalPolicy::Immediate
        }
    }

    /// Whether a data-arrived refresh is waiting to be consumed.
    pub fn is_new_data_pending(&self) -> bool {
        self.due_to_new_data.load(Ordering::SeqCst)
    }
}

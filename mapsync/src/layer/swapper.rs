//! Flicker-free feature swap.
//!
//! The swapper holds two feature sets for a layer:
//!
//! - `current`: what the latest committed fetch put on the map
//! - `previous`: what was current before the running update cycle, still on
//!   the map until the removal policy says it may go
//!
//! New visuals are always added before old ones are removed. When a cycle is
//! superseded before it commits, its `previous` is still the last thing drawn
//! and is handed on to the newer cycle instead of being removed. All methods
//! touch the map view and must run on the rendering context.

use std::mem;

use tracing::trace;

use crate::features::AnnotationsAndOverlays;
use crate::map_view::MapView;

#[derive(Debug, Default)]
pub struct FeatureSwapper {
    current: AnnotationsAndOverlays,
    previous: AnnotationsAndOverlays,
    /// Update cycle that retired `previous`.
    previous_generation: Option<u64>,
    /// A cycle retired `current` and has not committed yet.
    awaiting_commit: bool,
}

impl FeatureSwapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &AnnotationsAndOverlays {
        &self.current
    }

    pub fn previous(&self) -> &AnnotationsAndOverlays {
        &self.previous
    }

    /// Generation that owns the pending `previous` set, if any.
    pub fn previous_generation(&self) -> Option<u64> {
        self.previous_generation
    }

    /// Start a swap: `current` becomes `previous` and `current` is emptied.
    ///
    /// A `previous` left by a committed cycle is removed first. If the last
    /// cycle never committed, `current` is empty and `previous` is what the
    /// map still shows, so it stays and is retagged to `generation`.
    pub fn retire_current(&mut self, view: &dyn MapView, generation: u64) {
        if self.awaiting_commit && self.current.is_empty() {
            if !self.previous.is_empty() {
                trace!(
                    generation,
                    carried = self.previous.len(),
                    "Carrying uncommitted cycle's previous forward"
                );
                self.previous_generation = Some(generation);
            }
            return;
        }

        let lingering = self.clear_previous(view);
        if lingering > 0 {
            trace!(generation, lingering, "Superseded pending cleanup");
        }
        self.previous = mem::take(&mut self.current);
        self.previous_generation = Some(generation);
        self.awaiting_commit = true;
    }

    /// Put features on the map and bring the annotations into view.
    /// Never removes anything.
    pub fn add_features(features: &AnnotationsAndOverlays, view: &dyn MapView, z_order: i64) {
        view.add_annotations(features.annotations());
        view.show_annotations(features.annotations());
        view.add_overlays(features.overlays(), z_order);
    }

    /// Add `features` and make them current.
    ///
    /// If something is already current (an overlapping fetch committed
    /// first), it is removed after the new features are added. Returns how
    /// many displaced features were removed.
    pub fn commit(
        &mut self,
        features: AnnotationsAndOverlays,
        view: &dyn MapView,
        z_order: i64,
    ) -> usize {
        Self::add_features(&features, view, z_order);
        self.awaiting_commit = false;
        let displaced = mem::replace(&mut self.current, features);
        let count = displaced.len();
        if count > 0 {
            remove_from(view, &displaced);
        }
        count
    }

    /// Remove every feature in `previous` from the map and empty it.
    /// Returns the number removed; a second call removes nothing.
    pub fn clear_previous(&mut self, view: &dyn MapView) -> usize {
        self.previous_generation = None;
        if self.previous.is_empty() {
            return 0;
        }
        let previous = mem::take(&mut self.previous);
        remove_from(view, &previous);
        previous.len()
    }

    /// Clear `previous` only if it still belongs to `generation`.
    ///
    /// A deferred cleanup from an older cycle becomes a no-op once a newer
    /// cycle has already cleared and replaced `previous`.
    pub fn clear_previous_for(&mut self, view: &dyn MapView, generation: u64) -> bool {
        if self.previous_generation != Some(generation) {
            return false;
        }
        self.clear_previous(view);
        true
    }

    /// Remove both sets from the map. Returns the number removed.
    pub fn remove_all(&mut self, view: &dyn MapView) -> usize {
        self.awaiting_commit = false;
        let previous = self.clear_previous(view);
        let current = mem::take(&mut self.current);
        remove_from(view, &current);
        previous + current.len()
    }
}

fn remove_from(view: &dyn MapView, features: &AnnotationsAndOverlays) {
    view.remove_overlays(features.overlays());
    view.remove_annotations(features.annotations());
}

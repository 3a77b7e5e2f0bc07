//! In-memory map view.
//!
//! Keeps the overlay and annotation collections a native view would hold,
//! without drawing anything. Used by hosts that render elsewhere (server-side
//! snapshots, tests) and as the reference for [`MapView`] semantics.

use parking_lot::RwLock;

use super::MapView;
use crate::features::{Annotation, FeatureId, Overlay};
use crate::geo::{Coordinate, CoordinateSpan, Region, ScreenSize, Viewport};

#[derive(Debug)]
struct HeadlessState {
    overlays: Vec<(Overlay, i64)>,
    annotations: Vec<Annotation>,
    shown: Vec<FeatureId>,
    viewport: Viewport,
    zoom_level: f64,
}

/// Map view that only records state.
#[derive(Debug)]
pub struct HeadlessMapView {
    state: RwLock<HeadlessState>,
}

impl Default for HeadlessMapView {
    fn default() -> Self {
        let viewport = Viewport::new(
            Region::new(Coordinate::new(0.0, 0.0), CoordinateSpan::new(10.0, 10.0)),
            ScreenSize::new(1024.0, 1024.0),
        );
        Self::new(viewport, 5.0)
    }
}

impl HeadlessMapView {
    pub fn new(viewport: Viewport, zoom_level: f64) -> Self {
        Self {
            state: RwLock::new(HeadlessState {
                overlays: Vec::new(),
                annotations: Vec::new(),
                shown: Vec::new(),
                viewport,
                zoom_level,
            }),
        }
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.state.write().viewport = viewport;
    }

    pub fn set_zoom_level(&self, zoom_level: f64) {
        self.state.write().zoom_level = zoom_level;
    }

    /// Overlays on the map, in draw order.
    pub fn overlays(&self) -> Vec<Overlay> {
        let state = self.state.read();
        let mut ordered: Vec<_> = state.overlays.iter().collect();
        // Stable: same z-order keeps insertion order.
        ordered.sort_by_key(|(_, z)| *z);
        ordered.into_iter().map(|(overlay, _)| overlay.clone()).collect()
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.state.read().annotations.clone()
    }

    /// Annotations most recently brought into view.
    pub fn shown_annotations(&self) -> Vec<FeatureId> {
        self.state.read().shown.clone()
    }

    pub fn has_overlay(&self, id: FeatureId) -> bool {
        self.state.read().overlays.iter().any(|(o, _)| o.id == id)
    }

    /// Z-order an overlay was added at.
    pub fn z_order_of(&self, id: FeatureId) -> Option<i64> {
        self.state
            .read()
            .overlays
            .iter()
            .find(|(o, _)| o.id == id)
            .map(|(_, z)| *z)
    }

    pub fn has_annotation(&self, id: FeatureId) -> bool {
        self.state.read().annotations.iter().any(|a| a.id == id)
    }

    /// Total overlays plus annotations currently on the map.
    pub fn feature_count(&self) -> usize {
        let state = self.state.read();
        state.overlays.len() + state.annotations.len()
    }
}

impl MapView for HeadlessMapView {
    fn add_overlays(&self, overlays: &[Overlay], z_order: i64) {
        let mut state = self.state.write();
        for overlay in overlays {
            if !state.overlays.iter().any(|(o, _)| o.id == overlay.id) {
                state.overlays.push((overlay.clone(), z_order));
            }
        }
    }

    fn remove_overlays(&self, overlays: &[Overlay]) {
        let mut state = self.state.write();
        state
            .overlays
            .retain(|(o, _)| !overlays.iter().any(|r| r.id == o.id));
    }

    fn add_annotations(&self, annotations: &[Annotation]) {
        let mut state = self.state.write();
        for annotation in annotations {
            if !state.annotations.iter().any(|a| a.id == annotation.id) {
                state.annotations.push(annotation.clone());
            }
        }
    }

    fn remove_annotations(&self, annotations: &[Annotation]) {
        let mut state = self.state.write();
        state
            .annotations
            .retain(|a| !annotations.iter().any(|r| r.id == a.id));
    }

    fn show_annotations(&self, annotations: &[Annotation]) {
        self.state.write().shown = annotations.iter().map(|a| a.id).collect();
    }

    fn viewport(&self) -> Viewport {
        self.state.read().viewport
    }

    fn zoom_level(&self) -> f64 {
        self.state.read().zoom_level
    }
}

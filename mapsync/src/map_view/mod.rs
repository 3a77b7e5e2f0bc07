//! Map host boundary.
//!
//! The host owns the native map view and exposes it through [`MapView`].
//! Mutating calls are only made from the rendering context: code running
//! elsewhere (fetch tasks, timers, subscription tasks) marshals its work
//! through [`RenderContext::dispatch`].
//!
//! # Architecture
//!
//! ```text
//!  fetch task ──┐
//!  cleanup timer├──► RenderContext ──► RenderLoop ──► MapView
//!  subscription ┘      (queue)          (drains)      (host)
//! ```

mod dispatch;
mod headless;

pub use dispatch::{RenderContext, RenderJob, RenderLoop};
pub use headless::HeadlessMapView;

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::features::{Annotation, Overlay};
use crate::geo::Viewport;

/// Operations a map host provides.
///
/// Removing a feature that is not on the map must be a no-op.
pub trait MapView: Send + Sync {
    /// Add overlays above existing ones at the given z-order.
    fn add_overlays(&self, overlays: &[Overlay], z_order: i64);

    fn remove_overlays(&self, overlays: &[Overlay]);

    fn add_annotations(&self, annotations: &[Annotation]);

    fn remove_annotations(&self, annotations: &[Annotation]);

    /// Ask the map to bring the annotations into view.
    fn show_annotations(&self, annotations: &[Annotation]);

    fn viewport(&self) -> Viewport;

    fn zoom_level(&self) -> f64;
}

/// Everything a layer needs to reach a map: the view, its rendering context,
/// and the runtime that async work is spawned on.
#[derive(Clone)]
pub struct MapHandle {
    view: Arc<dyn MapView>,
    render: RenderContext,
    runtime: Handle,
}

impl fmt::Debug for MapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapHandle")
            .field("render", &self.render)
            .finish_non_exhaustive()
    }
}

impl MapHandle {
    pub fn new(view: Arc<dyn MapView>, render: RenderContext, runtime: Handle) -> Self {
        Self {
            view,
            render,
            runtime,
        }
    }

    /// Build a handle on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn on_current_runtime(view: Arc<dyn MapView>, render: RenderContext) -> Self {
        Self::new(view, render, Handle::current())
    }

    pub fn view(&self) -> &dyn MapView {
        self.view.as_ref()
    }

    pub fn render(&self) -> &RenderContext {
        &self.render
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

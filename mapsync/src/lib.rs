//! MapSync - live data layers for interactive maps
//!
//! This library keeps map overlays and annotations in sync with data
//! sources that change underneath them: user preferences toggle layers,
//! backends announce new data, and taps resolve to the items under them.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │     MapSessionState      │  one per map view
//!                  └────────────▲─────────────┘
//!                               │ touch / subscribe
//!   ┌──────────────┐   ┌────────┴────────┐   ┌────────────────┐
//!   │ SettingsStore├──►│ LayerController │◄──┤ DataChangeBus  │
//!   └──────────────┘   │  (per source)   │   └────────────────┘
//!                      └───┬─────────┬───┘
//!              fetch       │         │ dispatch
//!   ┌──────────────────────▼─┐   ┌───▼──────────────────────┐
//!   │ Tile/FeatureRepository │   │ RenderContext ─► MapView │
//!   └────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mapsync::map_view::{HeadlessMapView, MapHandle, RenderContext};
//! use mapsync::observation::{observation_layer, InMemoryObservationDataSource, ObservationRepository};
//! use mapsync::session::MapSessionState;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let (render, render_loop) = RenderContext::new();
//! tokio::spawn(render_loop.run(CancellationToken::new()));
//!
//! let map = MapHandle::on_current_runtime(Arc::new(HeadlessMapView::default()), render);
//! let session = Arc::new(MapSessionState::new());
//!
//! let source = Arc::new(InMemoryObservationDataSource::new());
//! let repository = Arc::new(ObservationRepository::new(source));
//! let layer = observation_layer(repository).build();
//!
//! layer.apply_preferences(true, 0);
//! layer.setup(&map, &session);
//! # }
//! ```

pub mod config;
pub mod features;
pub mod geo;
pub mod layer;
pub mod logging;
pub mod map_view;
pub mod notifications;
pub mod observation;
pub mod repository;
pub mod session;
pub mod settings;

pub use config::{FetchOrdering, LayerConfig};
pub use features::{Annotation, AnnotationsAndOverlays, DataSourceKey, Overlay};
pub use layer::{hit_test_all, LayerController, LayerControllerBuilder, TapQuery, UpdateOutcome};
pub use map_view::{MapHandle, MapView};
pub use repository::{FeatureRepository, RepositoryError, TileRepository};
pub use session::{MapSessionState, RefreshKey};

//! Observation repository and layer wiring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{ObservationFilter, ObservationLocalDataSource, ObservationMapItem};
use crate::features::{
    Annotation, AnnotationsAndOverlays, DataSourceKey, Overlay, OverlayKind, OverlayTag, Renderer,
    RendererRegistry, RendererStyle,
};
use crate::layer::LayerControllerBuilder;
use crate::repository::{
    BoxFuture, FeatureRepository, MapItem, RepositoryError, TileQuery, TileRepository,
};
use crate::session::{RefreshKey, Timestamp};

/// Data source key of the observation layer.
pub const OBSERVATION_DATA_SOURCE: &str = "observations";

/// Session slot shared by everything that shows observations.
pub const OBSERVATION_REFRESH_KEY: &str = "ObservationMapDateUpdated";

/// Screen-space slop around a tap, roughly half an observation icon.
pub const DEFAULT_ICON_TOLERANCE_PIXELS: f64 = 24.0;

const REFRESH_EVENT_CAPACITY: usize = 16;

/// Serves observations to a layer, for drawing and for hit testing.
pub struct ObservationRepository {
    data_source: DataSourceKey,
    local: Arc<dyn ObservationLocalDataSource>,
    filter: RwLock<ObservationFilter>,
    icon_tolerance_pixels: f64,
    /// Items of the last unbounded fetch.
    cache: Mutex<Option<Vec<ObservationMapItem>>>,
    /// Bumped on every invalidation so a fetch racing a clear does not
    /// repopulate the cache with old data.
    cache_epoch: AtomicU64,
    refresh_tx: broadcast::Sender<Timestamp>,
}

impl std::fmt::Debug for ObservationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationRepository")
            .field("data_source", &self.data_source)
            .field("filter", &*self.filter.read())
            .field("icon_tolerance_pixels", &self.icon_tolerance_pixels)
            .field("cached", &self.cache.lock().is_some())
            .finish()
    }
}

impl ObservationRepository {
    pub fn new(local: Arc<dyn ObservationLocalDataSource>) -> Self {
        let (refresh_tx, _) = broadcast::channel(REFRESH_EVENT_CAPACITY);
        Self {
            data_source: DataSourceKey::new(OBSERVATION_DATA_SOURCE),
            local,
            filter: RwLock::new(ObservationFilter::default()),
            icon_tolerance_pixels: DEFAULT_ICON_TOLERANCE_PIXELS,
            cache: Mutex::new(None),
            cache_epoch: AtomicU64::new(0),
            refresh_tx,
        }
    }

    pub fn with_data_source(mut self, data_source: DataSourceKey) -> Self {
        self.data_source = data_source;
        self
    }

    pub fn with_icon_tolerance(mut self, pixels: f64) -> Self {
        self.icon_tolerance_pixels = pixels;
        self
    }

    pub fn with_filter(self, filter: ObservationFilter) -> Self {
        *self.filter.write() = filter;
        self
    }

    pub fn filter(&self) -> ObservationFilter {
        self.filter.read().clone()
    }

    /// Replace the active filter and drop cached results.
    ///
    /// Layers pick the change up from a data-change notification; publish
    /// one on the application's bus after calling this.
    pub fn set_filter(&self, filter: ObservationFilter) {
        debug!(data_source = %self.data_source, filter = ?filter, "Observation filter changed");
        *self.filter.write() = filter;
        self.invalidate();
    }

    /// Announce new observations: drops cached results and emits a refresh
    /// event. Returns how many layers were listening.
    pub fn notify_data_changed(&self) -> usize {
        self.invalidate();
        self.refresh_tx.send(Utc::now()).unwrap_or(0)
    }

    fn invalidate(&self) {
        self.cache_epoch.fetch_add(1, Ordering::SeqCst);
        *self.cache.lock() = None;
    }

    async fn all_items(&self) -> Result<Vec<ObservationMapItem>, RepositoryError> {
        if let Some(items) = self.cache.lock().as_ref() {
            trace!(data_source = %self.data_source, items = items.len(), "Observation cache hit");
            return Ok(items.clone());
        }

        let epoch = self.cache_epoch.load(Ordering::SeqCst);
        let filter = self.filter();
        let items = self.local.map_items(None, &filter).await?;

        let mut cache = self.cache.lock();
        if self.cache_epoch.load(Ordering::SeqCst) == epoch {
            *cache = Some(items.clone());
        }
        Ok(items)
    }

    fn to_map_item(&self, item: &ObservationMapItem) -> Option<MapItem> {
        Some(MapItem {
            data_source: self.data_source.clone(),
            item_key: item.id.clone(),
            bounds: item.bounds()?,
            title: item.accuracy_display(),
        })
    }
}

impl TileRepository for ObservationRepository {
    fn data_source_key(&self) -> DataSourceKey {
        self.data_source.clone()
    }

    fn tileable_items(
        &self,
        query: TileQuery,
    ) -> BoxFuture<'_, Result<Vec<MapItem>, RepositoryError>> {
        Box::pin(async move {
            let bounds = if query.precise {
                let (lat, lon) = query.scale.margin(self.icon_tolerance_pixels);
                query.bounds.inflated(lat, lon)
            } else {
                query.bounds
            };
            let filter = self.filter();
            let items = self.local.map_items(Some(bounds), &filter).await?;
            Ok(items.iter().filter_map(|item| self.to_map_item(item)).collect())
        })
    }

    fn item_keys(&self, query: TileQuery) -> BoxFuture<'_, Result<Vec<String>, RepositoryError>> {
        Box::pin(async move {
            let items = self.tileable_items(query).await?;
            Ok(items.into_iter().map(|item| item.item_key).collect())
        })
    }

    fn clear_cache(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.invalidate();
            trace!(data_source = %self.data_source, "Observation cache cleared");
        })
    }

    fn refresh_events(&self) -> Option<broadcast::Receiver<Timestamp>> {
        Some(self.refresh_tx.subscribe())
    }
}

impl FeatureRepository for ObservationRepository {
    fn data_source_key(&self) -> DataSourceKey {
        self.data_source.clone()
    }

    /// One annotation per located item, plus an accuracy ring where the
    /// provider reported one. Features are built fresh on every call.
    fn annotations_and_overlays(
        &self,
    ) -> BoxFuture<'_, Result<AnnotationsAndOverlays, RepositoryError>> {
        Box::pin(async move {
            let items = self.all_items().await?;
            let mut annotations = Vec::with_capacity(items.len());
            let mut overlays = Vec::new();

            for item in &items {
                let Some(coordinate) = item.coordinate() else {
                    continue;
                };
                let mut annotation =
                    Annotation::new(self.data_source.clone(), item.id.clone(), coordinate);
                if let Some(icon_path) = &item.icon_path {
                    annotation = annotation.with_icon_path(icon_path.clone());
                }
                if let Some(title) = item.accuracy_display() {
                    annotation = annotation.with_title(title);
                }
                annotations.push(annotation);

                if let (true, Some(radius_meters)) = (item.has_accuracy_ring(), item.accuracy) {
                    overlays.push(Overlay::new(
                        self.data_source.clone(),
                        OverlayKind::AccuracyCircle {
                            center: coordinate,
                            radius_meters,
                        },
                    ));
                }
            }

            debug!(
                data_source = %self.data_source,
                annotations = annotations.len(),
                overlays = overlays.len(),
                "Observation features built"
            );
            Ok(AnnotationsAndOverlays::new(annotations, overlays))
        })
    }
}

/// Translucent fill for accuracy rings.
pub fn accuracy_renderer(overlay: &Overlay) -> Renderer {
    Renderer {
        overlay: overlay.id,
        style: RendererStyle::Fill {
            fill_alpha: 0.1,
            line_width: 0.5,
            stroke_alpha: 0.5,
        },
    }
}

/// Layer drawing observations from `repository`: tiles and hit testing from
/// its tile side, annotations and accuracy rings from its feature side.
pub fn observation_layer(repository: Arc<ObservationRepository>) -> LayerControllerBuilder {
    LayerControllerBuilder::new()
        .tile_repository(repository.clone())
        .feature_repository(repository)
        .refresh_key(RefreshKey::custom(OBSERVATION_REFRESH_KEY))
        .renderers(RendererRegistry::new().with(OverlayTag::AccuracyCircle, accuracy_renderer))
}

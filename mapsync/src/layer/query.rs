//! Tap-to-item resolution.
//!
//! A tap arrives as a geographic location plus the touched screen point. It
//! becomes a degenerate [`GeoBounds`] at the location and a
//! [`PixelScale`](crate::geo::PixelScale) from the current viewport; the
//! repository applies its own screen-space tolerance with that scale.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::features::DataSourceKey;
use crate::geo::{Coordinate, GeoBounds, ScreenPoint, Viewport};
use crate::map_view::MapView;
use crate::repository::{MapItem, TileQuery, TileRepository};

/// A tap on the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapQuery {
    /// Geographic location under the finger.
    pub location: Coordinate,
    /// Screen position of the tap.
    pub touch_point: ScreenPoint,
}

impl TapQuery {
    pub fn new(location: Coordinate, touch_point: ScreenPoint) -> Self {
        Self {
            location,
            touch_point,
        }
    }
}

/// Point query at `location` for the given viewport and zoom.
pub fn point_query(location: Coordinate, viewport: Viewport, zoom: f64) -> TileQuery {
    TileQuery {
        bounds: GeoBounds::from_point(location),
        scale: viewport.pixel_scale(),
        zoom,
        precise: true,
    }
}

/// Hit testing against one layer's tile repository.
#[derive(Clone)]
pub struct SpatialQueryEngine {
    repository: Option<Arc<dyn TileRepository>>,
    data_source: DataSourceKey,
    min_zoom: u8,
}

impl std::fmt::Debug for SpatialQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialQueryEngine")
            .field("data_source", &self.data_source)
            .field("has_repository", &self.repository.is_some())
            .field("min_zoom", &self.min_zoom)
            .finish()
    }
}

impl SpatialQueryEngine {
    pub fn new(
        repository: Option<Arc<dyn TileRepository>>,
        data_source: DataSourceKey,
        min_zoom: u8,
    ) -> Self {
        Self {
            repository,
            data_source,
            min_zoom,
        }
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    /// Whether taps at `zoom` are considered at all.
    pub fn zoom_allows(&self, zoom: f64) -> bool {
        zoom >= f64::from(self.min_zoom)
    }

    /// Every repository item under the tap, regardless of visibility or zoom.
    ///
    /// A repository failure yields no items.
    pub async fn items(&self, tap: TapQuery, view: &dyn MapView) -> Vec<MapItem> {
        let Some(repository) = &self.repository else {
            return Vec::new();
        };
        let query = point_query(tap.location, view.viewport(), view.zoom_level());
        trace!(
            data_source = %self.data_source,
            location = %tap.location,
            x = tap.touch_point.x,
            y = tap.touch_point.y,
            "Item query"
        );

        match repository.tileable_items(query).await {
            Ok(items) => items,
            Err(e) => {
                warn!(data_source = %self.data_source, error = %e, "Item query failed");
                Vec::new()
            }
        }
    }

    /// Keys of the items under the tap, grouped by data source.
    ///
    /// Empty when the map is zoomed out past the minimum zoom or when the
    /// layer is not `visible`, so taps only select what is drawn. Once the
    /// gate passes, the layer's key is always present, possibly with no
    /// items.
    pub async fn item_keys(
        &self,
        tap: TapQuery,
        view: &dyn MapView,
        visible: bool,
    ) -> HashMap<DataSourceKey, Vec<String>> {
        let zoom = view.zoom_level();
        if !self.zoom_allows(zoom) || !visible {
            trace!(
                data_source = %self.data_source,
                zoom,
                min_zoom = self.min_zoom,
                visible,
                "Hit test gated"
            );
            return HashMap::new();
        }

        let keys = match &self.repository {
            Some(repository) => {
                let query = point_query(tap.location, view.viewport(), zoom);
                match repository.item_keys(query).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!(data_source = %self.data_source, error = %e, "Hit test failed");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };
        trace!(data_source = %self.data_source, hits = keys.len(), "Hit test");

        HashMap::from([(self.data_source.clone(), keys)])
    }
}

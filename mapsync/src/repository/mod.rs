//! Repository capability traits.
//!
//! Layers never own their data. They query a [`TileRepository`] (raster
//! layers with spatial hit testing) and/or a [`FeatureRepository`] (vector
//! annotation and overlay sets). Both traits are dyn-compatible: async methods
//! return a boxed future so layers can hold `Arc<dyn TileRepository>`.
//!
//! # Failure
//!
//! Every query returns `Result<_, RepositoryError>`. Layers treat an error as
//! an empty result for that repository only; nothing here is fatal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::features::{AnnotationsAndOverlays, DataSourceKey};
use crate::geo::{GeoBounds, PixelScale};
use crate::session::Timestamp;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Backing store cannot be reached.
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The repository is shutting down.
    #[error("repository is shutting down")]
    ShuttingDown,
}

/// Spatial query issued for hit testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileQuery {
    /// Area to search. Degenerate for a tap.
    pub bounds: GeoBounds,
    /// Degrees per screen pixel, for screen-space tolerance.
    pub scale: PixelScale,
    /// Current map zoom level.
    pub zoom: f64,
    /// Whether the repository should test actual geometry rather than tiles.
    pub precise: bool,
}

/// A repository item returned by a spatial query.
#[derive(Debug, Clone, PartialEq)]
pub struct MapItem {
    pub data_source: DataSourceKey,
    pub item_key: String,
    pub bounds: GeoBounds,
    pub title: Option<String>,
}

/// Raster tile source that can also answer spatial queries.
pub trait TileRepository: Send + Sync {
    /// Stable key of the data source behind this repository.
    fn data_source_key(&self) -> DataSourceKey;

    /// Whether the layer is drawn regardless of the user's visibility setting.
    fn always_show(&self) -> bool {
        false
    }

    /// Items intersecting the query.
    fn tileable_items(&self, query: TileQuery)
        -> BoxFuture<'_, Result<Vec<MapItem>, RepositoryError>>;

    /// Stable keys of items intersecting the query.
    fn item_keys(&self, query: TileQuery) -> BoxFuture<'_, Result<Vec<String>, RepositoryError>>;

    /// Drop cached tiles/items. Resolves once invalidation is complete.
    fn clear_cache(&self) -> BoxFuture<'_, ()>;

    /// Stream of "backing data changed" timestamps, if the repository has one.
    fn refresh_events(&self) -> Option<broadcast::Receiver<Timestamp>> {
        None
    }
}

/// Vector feature source.
pub trait FeatureRepository: Send + Sync {
    /// Stable key of the data source behind this repository.
    fn data_source_key(&self) -> DataSourceKey;

    /// Whether the layer is drawn regardless of the user's visibility setting.
    fn always_show(&self) -> bool {
        false
    }

    /// Fetch the current annotation and overlay set.
    fn annotations_and_overlays(
        &self,
    ) -> BoxFuture<'_, Result<AnnotationsAndOverlays, RepositoryError>>;
}

/// The repositories attached to one layer.
///
/// Identity and the always-show policy come from the tile repository when
/// present, otherwise from the feature repository.
#[derive(Clone, Default)]
pub struct LayerSources {
    pub tiles: Option<Arc<dyn TileRepository>>,
    pub features: Option<Arc<dyn FeatureRepository>>,
}

impl std::fmt::Debug for LayerSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerSources")
            .field("data_source", &self.data_source_key())
            .field("has_tiles", &self.tiles.is_some())
            .field("has_features", &self.features.is_some())
            .finish()
    }
}

impl LayerSources {
    /// Data source key, or an empty key when nothing is attached.
    pub fn data_source_key(&self) -> DataSourceKey {
        if let Some(tiles) = &self.tiles {
            return tiles.data_source_key();
        }
        if let Some(features) = &self.features {
            return features.data_source_key();
        }
        DataSourceKey::default()
    }

    pub fn always_show(&self) -> bool {
        if let Some(tiles) = &self.tiles {
            return tiles.always_show();
        }
        self.features
            .as_ref()
            .map(|features| features.always_show())
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_none() && self.features.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysShownFeatures;

    impl FeatureRepository for AlwaysShownFeatures {
        fn data_source_key(&self) -> DataSourceKey {
            DataSourceKey::new("feeds")
        }

        fn always_show(&self) -> bool {
            true
        }

        fn annotations_and_overlays(
            &self,
        ) -> BoxFuture<'_, Result<AnnotationsAndOverlays, RepositoryError>> {
            Box::pin(async { Ok(AnnotationsAndOverlays::empty()) })
        }
    }

    #[test]
    fn test_empty_sources() {
        let sources = LayerSources::default();
        assert!(sources.is_empty());
        assert_eq!(sources.data_source_key().as_str(), "");
        assert!(!sources.always_show());
    }

    #[test]
    fn test_feature_only_sources() {
        let sources = LayerSources {
            tiles: None,
            features: Some(Arc::new(AlwaysShownFeatures)),
        };
        assert_eq!(sources.data_source_key().as_str(), "feeds");
        assert!(sources.always_show());
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("bad predicate".to_string());
        assert!(err.to_string().contains("bad predicate"));
    }
}

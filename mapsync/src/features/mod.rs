//! Map feature descriptors.
//!
//! Annotations and overlays are descriptors, not rendered objects: the map
//! host turns them into native visuals. Every descriptor carries a
//! process-unique [`FeatureId`] so a host can match add/remove calls, and two
//! fetch cycles never produce the same feature even for identical content.

mod renderer;

pub use renderer::{standard_renderer, Renderer, RendererFactory, RendererRegistry, RendererStyle};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::geo::{Coordinate, GeoBounds};

static NEXT_FEATURE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a data source (e.g. `"observations"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DataSourceKey(String);

impl DataSourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataSourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Process-unique identity of a single annotation or overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(u64);

impl FeatureId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_FEATURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A point marker on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: FeatureId,
    pub data_source: DataSourceKey,
    /// Identifier of the underlying data item (observation id, etc.).
    pub item_key: String,
    pub coordinate: Coordinate,
    pub title: Option<String>,
    pub icon_path: Option<String>,
}

impl Annotation {
    pub fn new(
        data_source: DataSourceKey,
        item_key: impl Into<String>,
        coordinate: Coordinate,
    ) -> Self {
        Self {
            id: FeatureId::next(),
            data_source,
            item_key: item_key.into(),
            coordinate,
            title: None,
            icon_path: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_icon_path(mut self, icon_path: impl Into<String>) -> Self {
        self.icon_path = Some(icon_path.into());
        self
    }
}

/// Raster tile layer drawn from a tile repository.
#[derive(Debug, Clone, PartialEq)]
pub struct TileOverlay {
    pub data_source: DataSourceKey,
    /// Edge length of one tile in pixels.
    pub tile_size: u32,
    /// Tiles below this zoom level are not requested.
    pub minimum_z: u8,
}

/// Shape of an overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayKind {
    Tile(TileOverlay),
    /// Location accuracy ring around a point.
    AccuracyCircle {
        center: Coordinate,
        radius_meters: f64,
    },
    Polygon(Vec<Coordinate>),
    Polyline(Vec<Coordinate>),
}

/// Variant tag of [`OverlayKind`], used to key renderer factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayTag {
    Tile,
    AccuracyCircle,
    Polygon,
    Polyline,
}

/// A shape or raster layer on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub id: FeatureId,
    pub data_source: DataSourceKey,
    pub kind: OverlayKind,
}

impl Overlay {
    pub fn new(data_source: DataSourceKey, kind: OverlayKind) -> Self {
        Self {
            id: FeatureId::next(),
            data_source,
            kind,
        }
    }

    /// Tile overlay for a data source.
    pub fn tile(data_source: DataSourceKey, tile_size: u32, minimum_z: u8) -> Self {
        let tile = TileOverlay {
            data_source: data_source.clone(),
            tile_size,
            minimum_z,
        };
        Self::new(data_source, OverlayKind::Tile(tile))
    }

    pub fn tag(&self) -> OverlayTag {
        match self.kind {
            OverlayKind::Tile(_) => OverlayTag::Tile,
            OverlayKind::AccuracyCircle { .. } => OverlayTag::AccuracyCircle,
            OverlayKind::Polygon(_) => OverlayTag::Polygon,
            OverlayKind::Polyline(_) => OverlayTag::Polyline,
        }
    }

    /// Geographic extent, if the overlay has a finite one.
    ///
    /// Tile overlays cover the whole map and return `None`.
    pub fn bounds(&self) -> Option<GeoBounds> {
        match &self.kind {
            OverlayKind::Tile(_) => None,
            OverlayKind::AccuracyCircle {
                center,
                radius_meters,
            } => {
                let lat_margin = radius_meters / METERS_PER_DEGREE_LAT;
                let lon_margin = lat_margin / center.latitude.to_radians().cos().abs().max(1e-6);
                Some(GeoBounds::from_point(*center).inflated(lat_margin, lon_margin))
            }
            OverlayKind::Polygon(points) | OverlayKind::Polyline(points) => {
                GeoBounds::from_coordinates(points)
            }
        }
    }
}

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// The features produced by one fetch cycle.
///
/// Immutable once built: combining two bundles yields a new bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationsAndOverlays {
    annotations: Vec<Annotation>,
    overlays: Vec<Overlay>,
}

impl AnnotationsAndOverlays {
    pub fn new(annotations: Vec<Annotation>, overlays: Vec<Overlay>) -> Self {
        Self {
            annotations,
            overlays,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty() && self.overlays.is_empty()
    }

    /// Total number of annotations and overlays.
    pub fn len(&self) -> usize {
        self.annotations.len() + self.overlays.len()
    }

    /// Concatenate two bundles, `self` first.
    pub fn merged(self, other: AnnotationsAndOverlays) -> Self {
        let mut annotations = self.annotations;
        annotations.extend(other.annotations);
        let mut overlays = self.overlays;
        overlays.extend(other.overlays);
        Self {
            annotations,
            overlays,
        }
    }

    pub fn into_parts(self) -> (Vec<Annotation>, Vec<Overlay>) {
        (self.annotations, self.overlays)
    }
}

//! Observation data source.
//!
//! Field observations are stored with a geometry and a little display
//! metadata. This module provides the item model, a local store query
//! interface with an in-memory implementation, and
//! [`ObservationRepository`], which serves observations to a layer as both
//! hit-testable items and map features.

mod repository;

pub use repository::{
    accuracy_renderer, observation_layer, ObservationRepository, DEFAULT_ICON_TOLERANCE_PIXELS,
    OBSERVATION_DATA_SOURCE, OBSERVATION_REFRESH_KEY,
};

use parking_lot::RwLock;

use crate::geo::{Coordinate, GeoBounds};
use crate::repository::{BoxFuture, RepositoryError};
use crate::session::Timestamp;

/// Provider value for hand-placed locations.
pub const MANUAL_PROVIDER: &str = "manual";

/// Shape of an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    Polygon(Vec<Coordinate>),
}

impl Geometry {
    /// Representative point: the point itself, or the mean of the vertices.
    pub fn centroid(&self) -> Option<Coordinate> {
        match self {
            Geometry::Point(point) => Some(*point),
            Geometry::LineString(points) | Geometry::Polygon(points) => {
                if points.is_empty() {
                    return None;
                }
                let n = points.len() as f64;
                let (lat, lon) = points.iter().fold((0.0, 0.0), |(lat, lon), p| {
                    (lat + p.latitude, lon + p.longitude)
                });
                Some(Coordinate::new(lat / n, lon / n))
            }
        }
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        match self {
            Geometry::Point(point) => Some(GeoBounds::from_point(*point)),
            Geometry::LineString(points) | Geometry::Polygon(points) => {
                GeoBounds::from_coordinates(points)
            }
        }
    }
}

/// One observation location as drawn on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationMapItem {
    /// Stable observation identifier.
    pub id: String,
    pub geometry: Option<Geometry>,
    pub icon_path: Option<String>,
    pub form_id: Option<i64>,
    pub field_name: Option<String>,
    pub event_id: Option<i64>,
    /// Location accuracy in meters.
    pub accuracy: Option<f64>,
    /// Location provider (`"gps"`, `"network"`, `"manual"`, ...).
    pub provider: Option<String>,
    pub important: bool,
    pub timestamp: Option<Timestamp>,
}

impl ObservationMapItem {
    /// Item with only an identity and a geometry.
    pub fn new(id: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            geometry: Some(geometry),
            icon_path: None,
            form_id: None,
            field_name: None,
            event_id: None,
            accuracy: None,
            provider: None,
            important: false,
            timestamp: None,
        }
    }

    pub fn with_event(mut self, event_id: i64) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_accuracy(mut self, provider: impl Into<String>, accuracy: f64) -> Self {
        self.provider = Some(provider.into());
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_icon_path(mut self, icon_path: impl Into<String>) -> Self {
        self.icon_path = Some(icon_path.into());
        self
    }

    pub fn with_important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Where the annotation goes: the geometry's centroid.
    pub fn coordinate(&self) -> Option<Coordinate> {
        self.geometry.as_ref().and_then(Geometry::centroid)
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        self.geometry.as_ref().and_then(Geometry::bounds)
    }

    /// Accuracy line for a callout, e.g. `"GPS ± 3.25m"`.
    ///
    /// `None` for manually placed locations and when either the provider
    /// or the accuracy is unknown.
    pub fn accuracy_display(&self) -> Option<String> {
        let provider = self.provider.as_deref()?;
        if provider == MANUAL_PROVIDER {
            return None;
        }
        let accuracy = self.accuracy?;
        let provider = if provider == "gps" {
            provider.to_uppercase()
        } else {
            capitalize_words(provider)
        };
        Some(format!("{provider} ± {accuracy:.2}m"))
    }

    /// Whether an accuracy ring should be drawn for this item.
    pub fn has_accuracy_ring(&self) -> bool {
        self.provider.as_deref() != Some(MANUAL_PROVIDER)
            && self.accuracy.is_some_and(|a| a > 0.0)
    }
}

fn capitalize_words(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which observations a layer shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    /// Only this event's observations.
    pub event_id: Option<i64>,
    /// Only observations flagged important.
    pub important_only: bool,
    /// Only observations at or after this time.
    pub since: Option<Timestamp>,
}

impl ObservationFilter {
    pub fn for_event(event_id: i64) -> Self {
        Self {
            event_id: Some(event_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, item: &ObservationMapItem) -> bool {
        if let Some(event_id) = self.event_id {
            if item.event_id != Some(event_id) {
                return false;
            }
        }
        if self.important_only && !item.important {
            return false;
        }
        if let Some(since) = self.since {
            // Undated observations fall outside any time window.
            if !item.timestamp.is_some_and(|t| t >= since) {
                return false;
            }
        }
        true
    }
}

/// Local store of observation locations.
pub trait ObservationLocalDataSource: Send + Sync {
    /// Items passing `filter` whose bounds intersect `bounds`, or every
    /// passing item when `bounds` is `None`.
    ///
    /// Intersection is inclusive: an item touching the query box matches.
    fn map_items(
        &self,
        bounds: Option<GeoBounds>,
        filter: &ObservationFilter,
    ) -> BoxFuture<'_, Result<Vec<ObservationMapItem>, RepositoryError>>;
}

/// Observation store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryObservationDataSource {
    items: RwLock<Vec<ObservationMapItem>>,
}

impl InMemoryObservationDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<ObservationMapItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Insert or replace by id.
    pub fn upsert(&self, item: ObservationMapItem) {
        let mut items = self.items.write();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|item| item.id != id);
        items.len() != before
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl ObservationLocalDataSource for InMemoryObservationDataSource {
    fn map_items(
        &self,
        bounds: Option<GeoBounds>,
        filter: &ObservationFilter,
    ) -> BoxFuture<'_, Result<Vec<ObservationMapItem>, RepositoryError>> {
        let matching = self
            .items
            .read()
            .iter()
            .filter(|item| filter.matches(item))
            .filter(|item| match bounds {
                Some(query) => item.bounds().is_some_and(|b| b.intersects(&query)),
                None => true,
            })
            .cloned()
            .collect();
        Box::pin(async move { Ok(matching) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn point(id: &str, lat: f64, lon: f64) -> ObservationMapItem {
        ObservationMapItem::new(id, Geometry::Point(Coordinate::new(lat, lon)))
    }

    mod geometry {
        use super::*;

        #[test]
        fn test_point_centroid() {
            let g = Geometry::Point(Coordinate::new(1.0, 2.0));
            assert_eq!(g.centroid(), Some(Coordinate::new(1.0, 2.0)));
        }

        #[test]
        fn test_polygon_centroid_and_bounds() {
            let g = Geometry::Polygon(vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 2.0),
                Coordinate::new(2.0, 2.0),
                Coordinate::new(2.0, 0.0),
            ]);
            assert_eq!(g.centroid(), Some(Coordinate::new(1.0, 1.0)));
            assert_eq!(g.bounds(), Some(GeoBounds::new(0.0, 2.0, 0.0, 2.0)));
        }

        #[test]
        fn test_empty_line_has_no_centroid() {
            assert_eq!(Geometry::LineString(Vec::new()).centroid(), None);
            assert_eq!(Geometry::LineString(Vec::new()).bounds(), None);
        }
    }

    mod accuracy {
        use super::*;

        #[test]
        fn test_gps_is_upper_cased() {
            let item = point("1", 0.0, 0.0).with_accuracy("gps", 3.254);
            assert_eq!(item.accuracy_display().as_deref(), Some("GPS ± 3.25m"));
        }

        #[test]
        fn test_other_providers_are_capitalized() {
            let item = point("1", 0.0, 0.0).with_accuracy("network", 12.0);
            assert_eq!(item.accuracy_display().as_deref(), Some("Network ± 12.00m"));
        }

        #[test]
        fn test_manual_has_no_display_or_ring() {
            let item = point("1", 0.0, 0.0).with_accuracy("manual", 5.0);
            assert_eq!(item.accuracy_display(), None);
            assert!(!item.has_accuracy_ring());
        }

        #[test]
        fn test_missing_accuracy() {
            let mut item = point("1", 0.0, 0.0);
            item.provider = Some("gps".into());
            assert_eq!(item.accuracy_display(), None);
            assert!(!item.has_accuracy_ring());
        }
    }

    mod filter {
        use super::*;

        #[test]
        fn test_default_matches_everything() {
            assert!(ObservationFilter::default().matches(&point("1", 0.0, 0.0)));
        }

        #[test]
        fn test_event_and_importance() {
            let filter = ObservationFilter {
                event_id: Some(7),
                important_only: true,
                since: None,
            };
            assert!(filter.matches(&point("1", 0.0, 0.0).with_event(7).with_important(true)));
            assert!(!filter.matches(&point("2", 0.0, 0.0).with_event(7)));
            assert!(!filter.matches(&point("3", 0.0, 0.0).with_event(8).with_important(true)));
        }

        #[test]
        fn test_time_window() {
            let now = Utc::now();
            let filter = ObservationFilter {
                since: Some(now - Duration::hours(1)),
                ..Default::default()
            };
            assert!(filter.matches(&point("1", 0.0, 0.0).with_timestamp(now)));
            assert!(!filter.matches(&point("2", 0.0, 0.0).with_timestamp(now - Duration::days(1))));
            assert!(!filter.matches(&point("3", 0.0, 0.0)));
        }
    }

    mod in_memory {
        use super::*;

        #[tokio::test]
        async fn test_bounds_intersection_is_inclusive() {
            let source = InMemoryObservationDataSource::with_items(vec![
                point("inside", 1.0, 1.0),
                point("edge", 2.0, 2.0),
                point("outside", 5.0, 5.0),
            ]);
            let query = GeoBounds::new(0.0, 2.0, 0.0, 2.0);

            let items = source
                .map_items(Some(query), &ObservationFilter::default())
                .await
                .unwrap();
            let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
            assert_eq!(ids, vec!["inside", "edge"]);
        }

        #[tokio::test]
        async fn test_no_bounds_returns_all_matching() {
            let source = InMemoryObservationDataSource::with_items(vec![
                point("a", 1.0, 1.0).with_event(1),
                point("b", 50.0, 50.0).with_event(2),
            ]);
            let items = source
                .map_items(None, &ObservationFilter::for_event(2))
                .await
                .unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].id, "b");
        }

        #[test]
        fn test_upsert_and_remove() {
            let source = InMemoryObservationDataSource::new();
            source.upsert(point("a", 1.0, 1.0));
            source.upsert(point("a", 2.0, 2.0));
            assert_eq!(source.len(), 1);
            assert!(source.remove("a"));
            assert!(!source.remove("a"));
            assert!(source.is_empty());
        }
    }
}

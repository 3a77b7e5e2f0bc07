//! Geographic and screen-space value types.
//!
//! Everything here is a plain `Copy` value. The map host reports its viewport
//! with these types and the spatial query path converts a tap into a
//! [`GeoBounds`] plus a [`PixelScale`] that repositories use for tolerance.

use std::fmt;

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude in degrees (positive north).
    pub latitude: f64,
    /// Longitude in degrees (positive east).
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Extent of a map region in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateSpan {
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl CoordinateSpan {
    pub fn new(latitude_delta: f64, longitude_delta: f64) -> Self {
        Self {
            latitude_delta,
            longitude_delta,
        }
    }
}

/// The visible geographic region of a map view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub center: Coordinate,
    pub span: CoordinateSpan,
}

impl Region {
    pub fn new(center: Coordinate, span: CoordinateSpan) -> Self {
        Self { center, span }
    }

    /// Bounding box covered by this region.
    pub fn bounds(&self) -> GeoBounds {
        let half_lat = self.span.latitude_delta / 2.0;
        let half_lon = self.span.longitude_delta / 2.0;
        GeoBounds::new(
            self.center.latitude - half_lat,
            self.center.latitude + half_lat,
            self.center.longitude - half_lon,
            self.center.longitude + half_lon,
        )
    }
}

/// A point in view coordinates (pixels, origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Size of the map view in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl ScreenSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Snapshot of what the map view currently displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Geographic region on screen.
    pub region: Region,
    /// Pixel size of the view.
    pub size: ScreenSize,
}

impl Viewport {
    pub fn new(region: Region, size: ScreenSize) -> Self {
        Self { region, size }
    }

    /// Degrees covered by a single pixel in each axis.
    ///
    /// A collapsed view (zero or negative pixel extent) has no meaningful
    /// scale and yields `0.0` for that axis, so repositories apply no
    /// screen-space tolerance.
    pub fn pixel_scale(&self) -> PixelScale {
        let latitude_per_pixel = if self.size.height > 0.0 {
            self.region.span.latitude_delta / self.size.height
        } else {
            0.0
        };
        let longitude_per_pixel = if self.size.width > 0.0 {
            self.region.span.longitude_delta / self.size.width
        } else {
            0.0
        };
        PixelScale {
            latitude_per_pixel,
            longitude_per_pixel,
        }
    }
}

/// Degrees-per-pixel conversion for the current viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelScale {
    pub latitude_per_pixel: f64,
    pub longitude_per_pixel: f64,
}

impl PixelScale {
    /// Degree margins covering `pixels` screen pixels, as (lat, lon).
    pub fn margin(&self, pixels: f64) -> (f64, f64) {
        (
            self.latitude_per_pixel * pixels,
            self.longitude_per_pixel * pixels,
        )
    }
}

/// Geographic bounding box.
///
/// A box built from a single point is degenerate (zero area); it still
/// intersects any box that contains that point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    /// Minimum (southernmost) latitude
    pub min_lat: f64,
    /// Maximum (northernmost) latitude
    pub max_lat: f64,
    /// Minimum (westernmost) longitude
    pub min_lon: f64,
    /// Maximum (easternmost) longitude
    pub max_lon: f64,
}

impl GeoBounds {
    /// Create a new bounding box.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Create a degenerate bounding box at a single coordinate.
    pub fn from_point(coordinate: Coordinate) -> Self {
        Self {
            min_lat: coordinate.latitude,
            max_lat: coordinate.latitude,
            min_lon: coordinate.longitude,
            max_lon: coordinate.longitude,
        }
    }

    /// Smallest box containing all coordinates, or `None` for an empty slice.
    pub fn from_coordinates(coordinates: &[Coordinate]) -> Option<Self> {
        let (first, rest) = coordinates.split_first()?;
        let mut bounds = Self::from_point(*first);
        for coordinate in rest {
            bounds.expand(*coordinate);
        }
        Some(bounds)
    }

    /// Expand this bounding box to include a point.
    pub fn expand(&mut self, coordinate: Coordinate) {
        self.min_lat = self.min_lat.min(coordinate.latitude);
        self.max_lat = self.max_lat.max(coordinate.latitude);
        self.min_lon = self.min_lon.min(coordinate.longitude);
        self.max_lon = self.max_lon.max(coordinate.longitude);
    }

    /// Copy of this box grown by the given margins on every side.
    pub fn inflated(&self, lat_margin: f64, lon_margin: f64) -> Self {
        Self {
            min_lat: self.min_lat - lat_margin,
            max_lat: self.max_lat + lat_margin,
            min_lon: self.min_lon - lon_margin,
            max_lon: self.max_lon + lon_margin,
        }
    }

    /// Whether the two boxes overlap (touching edges count).
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.max_lat >= other.min_lat
            && self.min_lat <= other.max_lat
            && self.max_lon >= other.min_lon
            && self.min_lon <= other.max_lon
    }

    /// Whether the coordinate lies inside or on the edge of the box.
    pub fn contains(&self, coordinate: Coordinate) -> bool {
        self.intersects(&Self::from_point(coordinate))
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(lat_delta: f64, lon_delta: f64, width: f64, height: f64) -> Viewport {
        Viewport::new(
            Region::new(
                Coordinate::new(40.0, -105.0),
                CoordinateSpan::new(lat_delta, lon_delta),
            ),
            ScreenSize::new(width, height),
        )
    }

    mod pixel_scale {
        use super::*;

        #[test]
        fn test_pixel_scale_divides_span_by_pixels() {
            let scale = viewport(10.0, 20.0, 400.0, 200.0).pixel_scale();
            assert!((scale.latitude_per_pixel - 0.05).abs() < 1e-12);
            assert!((scale.longitude_per_pixel - 0.05).abs() < 1e-12);
        }

        #[test]
        fn test_pixel_scale_collapsed_view_is_zero() {
            let scale = viewport(10.0, 20.0, 0.0, 0.0).pixel_scale();
            assert_eq!(scale, PixelScale::default());
        }

        #[test]
        fn test_margin_scales_by_pixels() {
            let scale = PixelScale {
                latitude_per_pixel: 0.01,
                longitude_per_pixel: 0.02,
            };
            let (lat, lon) = scale.margin(8.0);
            assert!((lat - 0.08).abs() < 1e-12);
            assert!((lon - 0.16).abs() < 1e-12);
        }
    }

    mod bounds {
        use super::*;

        #[test]
        fn test_point_bounds_intersects_containing_box() {
            let point = GeoBounds::from_point(Coordinate::new(10.0, 20.0));
            let area = GeoBounds::new(9.0, 11.0, 19.0, 21.0);
            assert!(point.intersects(&area));
            assert!(area.intersects(&point));
        }

        #[test]
        fn test_disjoint_boxes_do_not_intersect() {
            let a = GeoBounds::new(0.0, 1.0, 0.0, 1.0);
            let b = GeoBounds::new(2.0, 3.0, 0.0, 1.0);
            assert!(!a.intersects(&b));
        }

        #[test]
        fn test_touching_edges_intersect() {
            let a = GeoBounds::new(0.0, 1.0, 0.0, 1.0);
            let b = GeoBounds::new(1.0, 2.0, 1.0, 2.0);
            assert!(a.intersects(&b));
        }

        #[test]
        fn test_from_coordinates() {
            let bounds = GeoBounds::from_coordinates(&[
                Coordinate::new(1.0, 5.0),
                Coordinate::new(-2.0, 7.0),
                Coordinate::new(3.0, 6.0),
            ])
            .unwrap();
            assert_eq!(bounds, GeoBounds::new(-2.0, 3.0, 5.0, 7.0));
            assert!(GeoBounds::from_coordinates(&[]).is_none());
        }

        #[test]
        fn test_region_bounds() {
            let region = Region::new(Coordinate::new(0.0, 0.0), CoordinateSpan::new(2.0, 4.0));
            assert_eq!(region.bounds(), GeoBounds::new(-1.0, 1.0, -2.0, 2.0));
        }
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_inflated_point_contains_nearby_point(
                lat in -80.0..80.0_f64,
                lon in -170.0..170.0_f64,
                dlat in -0.5..0.5_f64,
                dlon in -0.5..0.5_f64,
            ) {
                let query = GeoBounds::from_point(Coordinate::new(lat, lon)).inflated(0.5, 0.5);
                prop_assert!(query.contains(Coordinate::new(lat + dlat, lon + dlon)));
            }

            #[test]
            fn test_pixel_scale_recovers_span(
                lat_delta in 0.001..90.0_f64,
                lon_delta in 0.001..180.0_f64,
                width in 1.0..4096.0_f64,
                height in 1.0..4096.0_f64,
            ) {
                let scale = viewport(lat_delta, lon_delta, width, height).pixel_scale();
                prop_assert!((scale.latitude_per_pixel * height - lat_delta).abs() < 1e-9);
                prop_assert!((scale.longitude_per_pixel * width - lon_delta).abs() < 1e-9);
            }

            #[test]
            fn test_intersects_is_symmetric(
                a_lat in -80.0..80.0_f64,
                a_lon in -170.0..170.0_f64,
                b_lat in -80.0..80.0_f64,
                b_lon in -170.0..170.0_f64,
                size in 0.0..5.0_f64,
            ) {
                let a = GeoBounds::from_point(Coordinate::new(a_lat, a_lon)).inflated(size, size);
                let b = GeoBounds::from_point(Coordinate::new(b_lat, b_lon));
                prop_assert_eq!(a.intersects(&b), b.intersects(&a));
            }
        }
    }
}

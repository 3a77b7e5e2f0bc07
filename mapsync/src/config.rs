//! Layer configuration.

use std::time::Duration;

/// Default minimum zoom level for hit testing and tile requests.
pub const DEFAULT_MIN_ZOOM: u8 = 2;

/// Default delay before stale visuals are removed after new data arrives.
///
/// Long enough for the map to draw one frame of the new visuals.
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(100);

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Which fetch result wins when update cycles overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchOrdering {
    /// Only the result of the most recently issued update is committed;
    /// results of superseded cycles are discarded.
    #[default]
    LatestIssued,
    /// Whichever result completes last is committed, even if a newer cycle
    /// was issued after it. Kept for hosts that depend on the old behavior.
    LatestCompleted,
}

/// Per-layer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    /// Below this zoom level the layer ignores taps and requests no tiles.
    pub min_zoom: u8,
    /// Delay before previous visuals are removed on a data-arrived refresh.
    pub cleanup_delay: Duration,
    /// Tile edge length in pixels for tile overlays.
    pub tile_size: u32,
    /// Handling of overlapping fetches.
    pub fetch_ordering: FetchOrdering,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            min_zoom: DEFAULT_MIN_ZOOM,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            tile_size: DEFAULT_TILE_SIZE,
            fetch_ordering: FetchOrdering::default(),
        }
    }
}

impl LayerConfig {
    pub fn with_min_zoom(mut self, min_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_fetch_ordering(mut self, ordering: FetchOrdering) -> Self {
        self.fetch_ordering = ordering;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LayerConfig::default();
        assert_eq!(config.min_zoom, 2);
        assert_eq!(config.cleanup_delay, Duration::from_millis(100));
        assert_eq!(config.tile_size, 512);
        assert_eq!(config.fetch_ordering, FetchOrdering::LatestIssued);
    }

    #[test]
    fn test_builders() {
        let config = LayerConfig::default()
            .with_min_zoom(6)
            .with_cleanup_delay(Duration::from_millis(250))
            .with_tile_size(256)
            .with_fetch_ordering(FetchOrdering::LatestCompleted);
        assert_eq!(config.min_zoom, 6);
        assert_eq!(config.cleanup_delay, Duration::from_millis(250));
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.fetch_ordering, FetchOrdering::LatestCompleted);
    }
}

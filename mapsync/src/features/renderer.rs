//! Overlay renderer registry.
//!
//! Hosts ask a layer how to draw each overlay. Layers answer through a
//! [`RendererRegistry`]: a factory per [`OverlayTag`], falling back to
//! [`standard_renderer`] for tags nobody registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{FeatureId, Overlay, OverlayKind, OverlayTag};

/// How an overlay should be drawn.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererStyle {
    /// Raster tiles of the given pixel size.
    Tile { tile_size: u32 },
    /// Outlined shape.
    Stroke { line_width: f32, alpha: f32 },
    /// Filled shape with an outline.
    Fill {
        fill_alpha: f32,
        line_width: f32,
        stroke_alpha: f32,
    },
}

/// Renderer description for a single overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderer {
    pub overlay: FeatureId,
    pub style: RendererStyle,
}

/// Builds a renderer for an overlay.
pub type RendererFactory = Arc<dyn Fn(&Overlay) -> Renderer + Send + Sync>;

/// Default renderer for any overlay.
pub fn standard_renderer(overlay: &Overlay) -> Renderer {
    let style = match &overlay.kind {
        OverlayKind::Tile(tile) => RendererStyle::Tile {
            tile_size: tile.tile_size,
        },
        OverlayKind::Polyline(_) => RendererStyle::Stroke {
            line_width: 1.0,
            alpha: 1.0,
        },
        OverlayKind::Polygon(_) | OverlayKind::AccuracyCircle { .. } => RendererStyle::Fill {
            fill_alpha: 0.2,
            line_width: 1.0,
            stroke_alpha: 1.0,
        },
    };
    Renderer {
        overlay: overlay.id,
        style,
    }
}

/// Maps overlay tags to renderer factories.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    factories: HashMap<OverlayTag, RendererFactory>,
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererRegistry")
            .field("registered", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a tag, replacing any previous one.
    pub fn register<F>(&mut self, tag: OverlayTag, factory: F)
    where
        F: Fn(&Overlay) -> Renderer + Send + Sync + 'static,
    {
        self.factories.insert(tag, Arc::new(factory));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, tag: OverlayTag, factory: F) -> Self
    where
        F: Fn(&Overlay) -> Renderer + Send + Sync + 'static,
    {
        self.register(tag, factory);
        self
    }

    pub fn renderer_for(&self, overlay: &Overlay) -> Renderer {
        match self.factories.get(&overlay.tag()) {
            Some(factory) => factory(overlay),
            None => standard_renderer(overlay),
        }
    }
}

//! Map system with tile compositing, caching, and the position overlay

pub mod cache;
pub mod camera;
pub mod framebuffer;
pub mod overlay;
pub mod renderer;
pub mod store;
pub mod tile;

use std::sync::Arc;

use anyhow::Context;

use crate::config::MapConfig;
use crate::error::Result;
use cache::TileCache;
use camera::MapCamera;
use renderer::{Compositor, CompositorStats, DisplaySink, FrameInput, RenderOutcome};
use store::{FsTileStore, TileStore};

/// Integrated map system
pub struct MapSystem<S: TileStore = FsTileStore> {
    compositor: Compositor<S>,
}

impl MapSystem<FsTileStore> {
    /// Map system reading tiles from the configured maps directory
    pub fn from_config(config: MapConfig) -> anyhow::Result<Self> {
        let store = FsTileStore::new(config.maps_root.clone(), config.layer.clone());
        Self::new(config, store)
    }
}

impl<S: TileStore> MapSystem<S> {
    /// Create a map system with a fresh tile cache
    pub fn new(config: MapConfig, store: S) -> anyhow::Result<Self> {
        let cache = Arc::new(TileCache::new(config.cache_capacity_bytes));
        Self::with_cache(config, store, cache)
    }

    /// Create a map system sharing an existing tile cache
    pub fn with_cache(config: MapConfig, store: S, cache: Arc<TileCache>) -> anyhow::Result<Self> {
        let compositor = Compositor::new(config, store, cache).context("Invalid map configuration")?;
        Ok(Self { compositor })
    }

    /// Composite one frame and flush it if anything visible changed
    pub fn render(&mut self, input: &FrameInput, sink: &mut dyn DisplaySink) -> Result<RenderOutcome> {
        self.compositor.render(input, sink)
    }

    /// Drop the previous frame so the next render is a full redraw
    pub fn invalidate(&mut self) {
        self.compositor.invalidate();
    }

    pub fn camera(&self) -> &MapCamera {
        self.compositor.camera()
    }

    /// Side length of the tile grid
    pub fn grid_dimension(&self) -> u32 {
        self.compositor.camera().grid_dimension
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> cache::CacheStats {
        self.compositor.cache().stats()
    }

    pub fn render_stats(&self) -> CompositorStats {
        self.compositor.stats()
    }

    pub fn compositor(&self) -> &Compositor<S> {
        &self.compositor
    }
}

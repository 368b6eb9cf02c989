use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use log::{debug, info};

use super::{
  coordinates::{Tile, WGS84Coordinate, viewport_tiles},
  data_source::{DataSourceKind, DefaultDataSources},
  job::Job,
  rendering_context::SourceSwap,
  theme::{JsonThemeParser, ThemeDescriptor},
  tile_renderer::RasterRenderers,
  worker::TileEvent,
  worker_pool::{PoolError, PoolSettings, WorkerPool},
};

pub const DEFAULT_START_ZOOM_LEVEL: u8 = 16;
pub const MAX_ZOOM_LEVEL: u8 = 20;

/// Center and zoom level of the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPosition {
  pub center: WGS84Coordinate,
  pub zoom: u8,
}

impl Default for MapPosition {
  fn default() -> Self {
    Self {
      center: WGS84Coordinate::default(),
      zoom: DEFAULT_START_ZOOM_LEVEL,
    }
  }
}

/// Owns the worker pool and decides which tiles to render.
///
/// The host feeds tile events back through [`MapView::tile_loaded`] so tiles are not requested
/// twice.
#[derive(Debug)]
pub struct MapView {
  pool: WorkerPool,
  position: MapPosition,
  zoom_min: u8,
  loaded: HashSet<Tile>,
  /// Tiles handed to the pool and not reported back yet.
  requested: HashSet<Tile>,
  /// Generation `requested` belongs to.
  requested_generation: u64,
}

impl MapView {
  /// Creates a view rendering with the built in data sources, the raster renderer and json
  /// themes.
  ///
  /// # Errors
  /// See [`WorkerPool::new`].
  pub fn with_defaults(settings: PoolSettings, sink: Sender<TileEvent>) -> Result<Self, PoolError> {
    let pool = WorkerPool::new(
      settings,
      Arc::new(DefaultDataSources),
      &RasterRenderers,
      Box::new(JsonThemeParser),
      sink,
    )?;
    Ok(Self::new(pool))
  }

  /// Wraps a pool and starts at the position the map data suggests.
  #[must_use]
  pub fn new(pool: WorkerPool) -> Self {
    let mut view = Self {
      pool,
      position: MapPosition::default(),
      zoom_min: 0,
      loaded: HashSet::new(),
      requested: HashSet::new(),
      requested_generation: 0,
    };
    view.init_start_position();
    view
  }

  fn init_start_position(&mut self) {
    let Some(info) = self.pool.map_info() else {
      return;
    };
    self.position.center = info
      .start_position
      .unwrap_or_else(|| info.bounding_box.center());
    self.zoom_min = info.min_zoom.min(MAX_ZOOM_LEVEL);
    let zoom = info.start_zoom.unwrap_or(DEFAULT_START_ZOOM_LEVEL);
    self.position.zoom = self.limit_zoom_level(zoom);
  }

  #[must_use]
  pub fn pool(&self) -> &WorkerPool {
    &self.pool
  }

  #[must_use]
  pub fn position(&self) -> MapPosition {
    self.position
  }

  #[must_use]
  pub fn max_zoom_level(&self) -> u8 {
    self
      .pool
      .map_info()
      .map_or(MAX_ZOOM_LEVEL, |info| info.max_zoom.min(MAX_ZOOM_LEVEL))
  }

  #[must_use]
  pub fn limit_zoom_level(&self, zoom: u8) -> u8 {
    zoom.clamp(self.zoom_min, self.max_zoom_level().max(self.zoom_min))
  }

  /// Zooms in or out by `diff` levels. Returns false if the zoom level would leave the allowed
  /// range.
  pub fn zoom(&mut self, diff: i8) -> bool {
    let zoom = i16::from(self.position.zoom) + i16::from(diff);
    if zoom < i16::from(self.zoom_min) || zoom > i16::from(self.max_zoom_level()) {
      return false;
    }
    self.position.zoom = u8::try_from(zoom).unwrap_or(self.position.zoom);
    self.redraw_tiles();
    true
  }

  pub fn set_center(&mut self, center: WGS84Coordinate) -> usize {
    self.set_center_and_zoom(center, self.position.zoom)
  }

  /// Moves the view and requests its tiles. Returns the number of queued jobs.
  pub fn set_center_and_zoom(&mut self, center: WGS84Coordinate, zoom: u8) -> usize {
    self.position = MapPosition {
      center,
      zoom: self.limit_zoom_level(zoom),
    };
    self.redraw_tiles()
  }

  /// Queues every tile of the viewport that is neither loaded nor being rendered, nearest to the
  /// center first. Returns the number of queued jobs.
  pub fn redraw_tiles(&mut self) -> usize {
    let context = self.pool.context();
    if context.viewport.is_empty() {
      return 0;
    }
    if self.requested_generation != context.generation {
      // Every render of an older generation finished before the reconfiguration.
      self.requested.clear();
      self.requested_generation = context.generation;
    }

    // Requested tiles that left the queue are in flight. Queued ones are replaced below.
    let queued = self.pool.queued_tiles();
    let in_flight = |tile: &Tile| self.requested.contains(tile) && !queued.contains(tile);

    let jobs: Vec<Job> = viewport_tiles(
      self.position.center,
      self.position.zoom,
      context.viewport.width,
      context.viewport.height,
      context.tile_size,
    )
    .into_iter()
    .filter(|(tile, _)| !self.loaded.contains(tile) && !in_flight(tile))
    .map(|(tile, distance)| Job::new(tile, context.source_id).with_priority(distance))
    .collect();

    self.requested.retain(|tile| !queued.contains(tile));
    self.requested.extend(jobs.iter().map(|job| job.tile));
    let count = jobs.len();
    debug!("Requesting {count} tiles around {:?}", self.position);
    self.pool.add_jobs(Some(jobs));
    count
  }

  /// Forgets all loaded tiles and requests the viewport again.
  pub fn clear_and_redraw(&mut self) -> usize {
    self.loaded.clear();
    self.requested.clear();
    self.redraw_tiles()
  }

  /// Records a published tile. Only tiles rendered with the current context count, returns
  /// whether this one did. A failed tile is requested again by the next redraw.
  pub fn tile_loaded(&mut self, event: &TileEvent) -> bool {
    let context = self.pool.context();
    let job = event.job();
    if event.generation() != context.generation || job.source != context.source_id {
      return false;
    }
    if event.generation() == self.requested_generation {
      self.requested.remove(&job.tile);
    }
    event.is_rendered() && self.loaded.insert(job.tile)
  }

  /// Number of tiles handed to the pool and not reported back yet.
  #[must_use]
  pub fn pending_tiles(&self) -> usize {
    self.requested.len()
  }

  #[must_use]
  pub fn loaded_tiles(&self) -> usize {
    self.loaded.len()
  }

  /// Opens another map file.
  ///
  /// # Errors
  /// `PoolError::SourceUnavailable` if no worker could open it.
  pub fn set_map_file(&mut self, map_file: PathBuf) -> Result<SourceSwap, PoolError> {
    info!("Set map file {}", map_file.display());
    let swap = self.pool.set_map_target(Some(map_file))?;
    if swap != SourceSwap::Unchanged {
      self.init_start_position();
      self.clear_and_redraw();
    }
    Ok(swap)
  }

  /// Switches the kind of data source.
  ///
  /// # Errors
  /// `PoolError::SourceUnavailable` if no worker could open the current target with it.
  pub fn set_data_source(&mut self, kind: DataSourceKind) -> Result<SourceSwap, PoolError> {
    let swap = self.pool.set_data_source(kind)?;
    if swap != SourceSwap::Unchanged {
      self.clear_and_redraw();
    }
    Ok(swap)
  }

  /// Loads a render theme and redraws everything with it.
  ///
  /// # Errors
  /// `PoolError::Theme` if the theme cannot be loaded. The old theme stays active.
  pub fn set_render_theme(&mut self, theme: ThemeDescriptor) -> Result<(), PoolError> {
    self.pool.set_theme(theme)?;
    self.clear_and_redraw();
    Ok(())
  }

  /// The view got a new size.
  ///
  /// # Errors
  /// `PoolError::PauseTimeout` if the workers could not be paused.
  pub fn on_size_changed(&mut self, width: u32, height: u32) -> Result<(), PoolError> {
    if self.pool.on_viewport_resize(width, height)? {
      self.redraw_tiles();
    }
    Ok(())
  }

  /// True if a map is open and contains the current center.
  #[must_use]
  pub fn has_valid_center(&self) -> bool {
    if !self.position.center.is_valid() {
      return false;
    }
    self
      .pool
      .map_info()
      .is_some_and(|info| info.bounding_box.contains(self.position.center))
  }

  pub fn on_pause(&mut self) {
    self.pool.pause();
  }

  pub fn on_resume(&mut self) {
    self.pool.resume();
  }

  /// Tears down the workers. Also happens on drop.
  pub fn destroy(&mut self) {
    self.pool.shutdown();
  }
}

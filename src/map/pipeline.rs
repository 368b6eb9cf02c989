use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use log::debug;

use super::{
  cancel::CancelToken,
  data_source::{DataSourceKind, DataSourceProvider, MapDatabase, MapInfo, OpenError},
  job::{DataSourceId, Job},
  theme::RenderTheme,
  tile_renderer::{RenderParams, TileRenderError, TileRenderer},
};

/// The state of a worker's connection to the map data.
pub enum SourceHandle {
  /// Nothing opened yet, or closed on teardown.
  Closed,
  /// The last open attempt failed. Jobs fail fast until the next successful swap.
  Failed { reason: String },
  Open(Box<dyn MapDatabase>),
}

impl std::fmt::Debug for SourceHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SourceHandle::Closed => write!(f, "Closed"),
      SourceHandle::Failed { reason } => write!(f, "Failed({reason})"),
      SourceHandle::Open(_) => write!(f, "Open"),
    }
  }
}

impl SourceHandle {
  #[must_use]
  pub fn has_open_file(&self) -> bool {
    matches!(self, SourceHandle::Open(_))
  }

  #[must_use]
  pub fn info(&self) -> Option<&MapInfo> {
    match self {
      SourceHandle::Open(db) => Some(db.info()),
      _ => None,
    }
  }

  /// Closes an open database. Safe to call repeatedly.
  pub fn close(&mut self) {
    if let SourceHandle::Open(mut db) = std::mem::replace(self, SourceHandle::Closed) {
      db.close();
    }
  }
}

/// Everything one worker needs to turn a job into an image. Never shared between workers.
pub struct RenderPipeline {
  provider: Box<dyn DataSourceProvider>,
  handle: SourceHandle,
  source_id: DataSourceId,
  renderer: Box<dyn TileRenderer>,
  theme: Arc<RenderTheme>,
}

impl std::fmt::Debug for RenderPipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RenderPipeline")
      .field("kind", &self.provider.kind())
      .field("handle", &self.handle)
      .field("source_id", &self.source_id)
      .field("renderer", &self.renderer.name())
      .field("theme", &self.theme.name)
      .finish()
  }
}

impl RenderPipeline {
  #[must_use]
  pub fn new(
    provider: Box<dyn DataSourceProvider>,
    renderer: Box<dyn TileRenderer>,
    theme: Arc<RenderTheme>,
  ) -> Self {
    Self {
      provider,
      handle: SourceHandle::Closed,
      source_id: DataSourceId::default(),
      renderer,
      theme,
    }
  }

  /// Closes the current handle and opens `target` as source `id`.
  ///
  /// On failure the handle is left in the failed state and jobs fail until the next successful
  /// open.
  ///
  /// # Errors
  /// Whatever the provider reports.
  pub fn open(&mut self, target: Option<&Path>, id: DataSourceId) -> Result<(), OpenError> {
    self.handle.close();
    self.source_id = id;
    match self.provider.open(target) {
      Ok(db) => {
        self.handle = SourceHandle::Open(db);
        Ok(())
      }
      Err(e) => {
        self.handle = SourceHandle::Failed {
          reason: e.to_string(),
        };
        Err(e)
      }
    }
  }

  pub fn close(&mut self) {
    self.handle.close();
  }

  /// Replaces the provider. The current handle belongs to the old provider and is closed.
  pub fn set_provider(&mut self, provider: Box<dyn DataSourceProvider>) {
    debug!("Switching data source {} -> {}", self.provider.kind(), provider.kind());
    self.handle.close();
    self.provider = provider;
  }

  pub fn set_theme(&mut self, theme: Arc<RenderTheme>) {
    self.theme = theme;
  }

  #[must_use]
  pub fn theme(&self) -> &Arc<RenderTheme> {
    &self.theme
  }

  #[must_use]
  pub fn kind(&self) -> DataSourceKind {
    self.provider.kind()
  }

  #[must_use]
  pub fn handle(&self) -> &SourceHandle {
    &self.handle
  }

  #[must_use]
  pub fn source_id(&self) -> DataSourceId {
    self.source_id
  }

  /// Reads and renders the tile of `job`.
  ///
  /// # Errors
  /// Fails fast if the job was issued for another data source or no source is open, otherwise
  /// reports the read or render failure.
  pub fn render(
    &mut self,
    job: &Job,
    tile_size: u32,
    cancel: &CancelToken,
  ) -> Result<RgbaImage, TileRenderError> {
    if job.source != self.source_id {
      return Err(TileRenderError::StaleSource {
        job: job.source,
        current: self.source_id,
      });
    }
    let SourceHandle::Open(db) = &mut self.handle else {
      return Err(TileRenderError::SourceClosed);
    };
    let data = db.read_tile(&job.tile)?;
    let params = RenderParams {
      theme: &self.theme,
      tile_size,
      cancel,
    };
    self.renderer.render(&job.tile, &data, &params)
  }
}

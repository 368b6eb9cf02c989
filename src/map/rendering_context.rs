//! The configuration shared by all workers of a pool and the operations that change it.
//!
//! A [`Reconfiguration`] only exists while every worker of the pool is paused, which is what
//! makes it safe to reach into the pipelines of the workers.

use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{
  coordinates::viewport_tile_capacity,
  data_source::{DataSourceFactory, DataSourceKind, MapInfo, OpenError},
  job::DataSourceId,
  job_queue::JobQueue,
  pipeline::RenderPipeline,
  theme::{RenderTheme, ThemeDescriptor, ThemeError, ThemeParser},
  worker_pool::PoolError,
};

/// Size of the map view in pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
  pub width: u32,
  pub height: u32,
}

impl Viewport {
  #[must_use]
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  #[must_use]
  pub fn tile_capacity(&self, tile_size: u32) -> usize {
    viewport_tile_capacity(self.width, self.height, tile_size)
  }
}

/// What all workers render with.
#[derive(Debug, Clone)]
pub struct RenderingContext {
  pub source_kind: DataSourceKind,
  pub map_target: Option<PathBuf>,
  pub source_id: DataSourceId,
  /// Info of the first worker that opened the current source.
  pub map_info: Option<MapInfo>,
  pub theme: Arc<RenderTheme>,
  pub theme_descriptor: ThemeDescriptor,
  pub viewport: Viewport,
  pub tile_size: u32,
  /// Number of completed reconfigurations.
  pub generation: u64,
}

/// Outcome of a data source swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSwap {
  /// The request matched the current state, nothing was paused.
  Unchanged,
  /// At least one worker opened the new source. Workers counted in `failed` keep a failed handle,
  /// so the pool runs degraded until the next successful swap.
  Opened { opened: usize, failed: usize },
}

/// Mutable access to the rendering context and all pipelines while the pool is paused.
pub struct Reconfiguration<'a> {
  pub(crate) context: &'a mut RenderingContext,
  pub(crate) pipelines: Vec<MutexGuard<'a, RenderPipeline>>,
  pub(crate) queue: &'a JobQueue,
  pub(crate) sources: &'a dyn DataSourceFactory,
  pub(crate) theme_parser: &'a dyn ThemeParser,
}

impl Reconfiguration<'_> {
  #[must_use]
  pub fn context(&self) -> &RenderingContext {
    self.context
  }

  pub fn pipelines(&mut self) -> impl Iterator<Item = &mut RenderPipeline> {
    self.pipelines.iter_mut().map(|p| &mut **p)
  }

  /// Points every worker at `target`, optionally switching to a new kind of data source first.
  ///
  /// Each worker closes its handle and opens the target on its own. The swap succeeds if any of
  /// them managed to open it.
  ///
  /// # Errors
  /// `PoolError::SourceUnavailable` if no worker could open the target. The target is reset in
  /// that case.
  pub fn swap_source(
    &mut self,
    target: Option<PathBuf>,
    kind: Option<DataSourceKind>,
  ) -> Result<SourceSwap, PoolError> {
    let id = self.context.source_id.next();
    self.context.source_id = id;

    if let Some(kind) = kind {
      let sources = self.sources;
      for pipeline in self.pipelines() {
        pipeline.set_provider(sources.create(kind));
      }
      self.context.source_kind = kind;
    }

    let mut opened = 0;
    let mut last_error = None;
    let mut map_info = None;
    for (worker, pipeline) in self.pipelines().enumerate() {
      match pipeline.open(target.as_deref(), id) {
        Ok(()) => {
          opened += 1;
          if map_info.is_none() {
            map_info = pipeline.handle().info().cloned();
          }
        }
        Err(e) => {
          warn!("Worker {worker} failed to open the map data: {e}");
          last_error = Some(e);
        }
      }
    }
    let failed = self.pipelines.len() - opened;
    self.context.map_info = map_info;

    let target_name = target
      .as_ref()
      .map_or_else(|| "<none>".to_string(), |p| p.display().to_string());
    if opened > 0 {
      info!("{} map data {target_name} opened as {id} by {opened} workers", self.context.source_kind);
      self.context.map_target = target;
      Ok(SourceSwap::Opened { opened, failed })
    } else {
      self.context.map_target = None;
      Err(PoolError::SourceUnavailable {
        target: target_name,
        source: last_error.unwrap_or(OpenError::NoTarget),
      })
    }
  }

  /// Parses the theme once and hands it to every pipeline. Nothing changes if parsing fails.
  ///
  /// # Errors
  /// The theme could not be read or parsed.
  pub fn swap_theme(&mut self, descriptor: ThemeDescriptor) -> Result<(), ThemeError> {
    let mut stream = descriptor.open()?;
    let theme = Arc::new(self.theme_parser.parse(&mut stream)?);
    for pipeline in self.pipelines() {
      pipeline.set_theme(theme.clone());
    }
    info!("Render theme {descriptor} ({}) set", theme.name);
    self.context.theme = theme;
    self.context.theme_descriptor = descriptor;
    Ok(())
  }

  pub fn resize(&mut self, viewport: Viewport) {
    self.context.viewport = viewport;
    self
      .queue
      .set_capacity(viewport.tile_capacity(self.context.tile_size));
  }
}

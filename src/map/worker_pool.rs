//! The coordinator owning the render threads of one map view.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use super::{
  coordinates::Tile,
  data_source::{DataSourceFactory, DataSourceKind, MapInfo, OpenError},
  job::{DataSourceId, Job},
  job_queue::JobQueue,
  pipeline::RenderPipeline,
  rendering_context::{Reconfiguration, RenderingContext, SourceSwap, Viewport},
  theme::{ThemeDescriptor, ThemeError, ThemeParser},
  tile_renderer::RendererFactory,
  worker::{TileEvent, Worker, WorkerState, WorkerStats},
};

#[derive(Error, Debug)]
pub enum PoolError {
  #[error("Worker {worker} did not pause within {timeout:?}")]
  PauseTimeout { worker: usize, timeout: Duration },
  #[error("No worker could open {target}: {source}")]
  SourceUnavailable { target: String, source: OpenError },
  #[error(transparent)]
  Theme(#[from] ThemeError),
  #[error("Failed to start render thread: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("The worker pool has been shut down")]
  ShutDown,
}

/// How to set up a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
  pub worker_count: usize,
  pub tile_size: u32,
  /// How long [`WorkerPool::pause_all`] waits for a single worker.
  pub pause_timeout: Duration,
  pub viewport: Viewport,
  pub data_source: DataSourceKind,
  pub map_target: Option<PathBuf>,
  pub theme: ThemeDescriptor,
}

impl Default for PoolSettings {
  fn default() -> Self {
    Self {
      worker_count: 4,
      tile_size: 256,
      pause_timeout: Duration::from_secs(5),
      viewport: Viewport::default(),
      data_source: DataSourceKind::default(),
      map_target: None,
      theme: ThemeDescriptor::default(),
    }
  }
}

/// A fixed set of render threads consuming a shared [`JobQueue`].
///
/// The rendering context is only ever changed through [`WorkerPool::reconfigure`], which pauses
/// every worker first. Methods changing it take `&mut self`, so there is a single writer.
pub struct WorkerPool {
  workers: Vec<Worker>,
  queue: Arc<JobQueue>,
  context: Arc<RwLock<RenderingContext>>,
  sources: Arc<dyn DataSourceFactory>,
  theme_parser: Box<dyn ThemeParser>,
  pause_timeout: Duration,
  /// Paused by the host application, reconfigurations must not resume the workers.
  host_paused: bool,
  shut_down: bool,
}

impl std::fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerPool")
      .field("workers", &self.workers)
      .field("queue", &self.queue)
      .field("context", &self.context)
      .field("host_paused", &self.host_paused)
      .field("shut_down", &self.shut_down)
      .finish_non_exhaustive()
  }
}

impl WorkerPool {
  /// Builds the pipelines, opens the configured map data and starts the workers.
  ///
  /// Failing to open the map data is not fatal, the pool starts without a source.
  ///
  /// # Errors
  /// Fails if the theme cannot be loaded or a thread cannot be started.
  pub fn new(
    settings: PoolSettings,
    sources: Arc<dyn DataSourceFactory>,
    renderers: &dyn RendererFactory,
    theme_parser: Box<dyn ThemeParser>,
    sink: Sender<TileEvent>,
  ) -> Result<Self, PoolError> {
    let worker_count = settings.worker_count.max(1);
    let tile_size = settings.tile_size.max(1);
    let theme = Arc::new(theme_parser.parse(&mut settings.theme.open()?)?);
    let queue = Arc::new(JobQueue::with_capacity(
      settings.viewport.tile_capacity(tile_size),
    ));

    let source_id = DataSourceId::default().next();
    let mut map_info = None;
    let mut pipelines = Vec::with_capacity(worker_count);
    for worker in 0..worker_count {
      let mut pipeline = RenderPipeline::new(
        sources.create(settings.data_source),
        renderers.create(),
        theme.clone(),
      );
      match pipeline.open(settings.map_target.as_deref(), source_id) {
        Ok(()) if map_info.is_none() => map_info = pipeline.handle().info().cloned(),
        Ok(()) => {}
        Err(e) => warn!("Worker {worker} failed to open the map data: {e}"),
      }
      pipelines.push(pipeline);
    }

    let context = Arc::new(RwLock::new(RenderingContext {
      source_kind: settings.data_source,
      map_target: map_info.as_ref().and(settings.map_target),
      source_id,
      map_info,
      theme,
      theme_descriptor: settings.theme,
      viewport: settings.viewport,
      tile_size,
      generation: 0,
    }));

    let mut workers = Vec::with_capacity(worker_count);
    for (id, pipeline) in pipelines.into_iter().enumerate() {
      let worker = Worker::spawn(
        id,
        pipeline,
        Arc::downgrade(&queue),
        Arc::downgrade(&context),
        sink.clone(),
      );
      match worker {
        Ok(worker) => workers.push(worker),
        Err(e) => {
          // Dropping the pool stops the workers started so far.
          drop(Self::assemble(
            workers,
            queue,
            context,
            sources,
            theme_parser,
            settings.pause_timeout,
          ));
          return Err(e.into());
        }
      }
    }
    info!("Started {worker_count} render workers");

    Ok(Self::assemble(
      workers,
      queue,
      context,
      sources,
      theme_parser,
      settings.pause_timeout,
    ))
  }

  fn assemble(
    workers: Vec<Worker>,
    queue: Arc<JobQueue>,
    context: Arc<RwLock<RenderingContext>>,
    sources: Arc<dyn DataSourceFactory>,
    theme_parser: Box<dyn ThemeParser>,
    pause_timeout: Duration,
  ) -> Self {
    Self {
      workers,
      queue,
      context,
      sources,
      theme_parser,
      pause_timeout,
      host_paused: false,
      shut_down: false,
    }
  }

  fn ensure_running(&self) -> Result<(), PoolError> {
    if self.shut_down {
      Err(PoolError::ShutDown)
    } else {
      Ok(())
    }
  }

  /// Replaces the queued jobs and wakes every worker. `None` or no jobs just clears the queue.
  pub fn add_jobs(&self, jobs: Option<Vec<Job>>) {
    match jobs {
      Some(jobs) if !jobs.is_empty() => self.queue.set_jobs(jobs),
      _ => self.queue.clear(),
    }
    for worker in &self.workers {
      worker.wake();
    }
  }

  /// Requests every worker to pause. With `wait` this is a barrier: on success no worker renders
  /// anymore.
  ///
  /// # Errors
  /// `PoolError::PauseTimeout` if a worker is stuck in a render.
  pub fn pause_all(&self, wait: bool) -> Result<(), PoolError> {
    for worker in &self.workers {
      if !worker.is_pausing() {
        worker.pause();
      }
    }
    if wait {
      for worker in &self.workers {
        worker.await_pausing(self.pause_timeout)?;
      }
    }
    Ok(())
  }

  pub fn resume_all(&self) {
    for worker in &self.workers {
      worker.proceed();
    }
  }

  /// Clears the queue, pauses all workers, applies `mutation` and resumes them.
  ///
  /// This is the only way to change the rendering context of a running pool.
  ///
  /// # Errors
  /// Nothing is changed if the workers could not be paused, the cleared jobs are queued again.
  pub fn reconfigure<R>(
    &mut self,
    mutation: impl FnOnce(&mut Reconfiguration<'_>) -> R,
  ) -> Result<R, PoolError> {
    self.ensure_running()?;
    let pending = self.queue.take();
    if let Err(e) = self.pause_all(true) {
      warn!("Reconfiguration aborted: {e}");
      self.queue.restore(pending);
      self.resume_workers();
      for worker in &self.workers {
        worker.wake();
      }
      return Err(e);
    }

    let result = {
      let mut context = self.context.write().unwrap_or_else(PoisonError::into_inner);
      let mut reconfiguration = Reconfiguration {
        context: &mut *context,
        pipelines: self.workers.iter().map(Worker::pipeline).collect(),
        queue: &self.queue,
        sources: &*self.sources,
        theme_parser: &*self.theme_parser,
      };
      let result = mutation(&mut reconfiguration);
      drop(reconfiguration);
      context.generation += 1;
      debug!("Rendering context at generation {}", context.generation);
      result
    };

    self.resume_workers();
    Ok(result)
  }

  fn resume_workers(&self) {
    if self.host_paused {
      debug!("Host paused, workers stay paused");
    } else {
      self.resume_all();
    }
  }

  /// Switches all workers to another kind of data source and reopens the current target.
  ///
  /// # Errors
  /// See [`WorkerPool::set_map_target`].
  pub fn set_data_source(&mut self, kind: DataSourceKind) -> Result<SourceSwap, PoolError> {
    let (current_kind, target) = {
      let context = self.read_context();
      (context.source_kind, context.map_target.clone())
    };
    if current_kind == kind {
      return Ok(SourceSwap::Unchanged);
    }
    info!("Switching data source to {kind}");
    self.reconfigure(|r| r.swap_source(target, Some(kind)))?
  }

  /// Opens `target` on every worker.
  ///
  /// Succeeds as soon as one worker opened it. The other workers keep failing their jobs until
  /// the next successful swap.
  ///
  /// # Errors
  /// `PoolError::SourceUnavailable` if no worker could open the target.
  pub fn set_map_target(&mut self, target: Option<PathBuf>) -> Result<SourceSwap, PoolError> {
    if self.read_context().map_target == target {
      return Ok(SourceSwap::Unchanged);
    }
    self.reconfigure(|r| r.swap_source(target, None))?
  }

  /// Loads a new render theme. The previous theme stays active if loading fails.
  ///
  /// # Errors
  /// `PoolError::Theme` if the theme cannot be read or parsed.
  pub fn set_theme(&mut self, descriptor: ThemeDescriptor) -> Result<(), PoolError> {
    Ok(self.reconfigure(|r| r.swap_theme(descriptor))??)
  }

  /// Applies a new viewport size. Returns false if the size did not change.
  ///
  /// # Errors
  /// `PoolError::PauseTimeout` if the workers could not be paused.
  pub fn on_viewport_resize(&mut self, width: u32, height: u32) -> Result<bool, PoolError> {
    let viewport = Viewport::new(width, height);
    if self.read_context().viewport == viewport {
      return Ok(false);
    }
    self.reconfigure(|r| r.resize(viewport))?;
    Ok(true)
  }

  /// The host application went to the background.
  pub fn pause(&mut self) {
    self.host_paused = true;
    // Without waiting this cannot time out.
    let _ = self.pause_all(false);
  }

  /// The host application is back in the foreground.
  pub fn resume(&mut self) {
    self.host_paused = false;
    if !self.shut_down {
      self.resume_all();
    }
  }

  /// Stops and joins every worker and closes their data sources. The pool is unusable afterwards.
  pub fn shutdown(&mut self) {
    if self.shut_down {
      return;
    }
    self.shut_down = true;
    self.queue.clear();
    for worker in &self.workers {
      worker.pause();
      worker.stop();
    }
    for worker in &mut self.workers {
      worker.join();
      worker.pipeline().close();
    }
    info!("Render workers shut down");
  }

  fn read_context(&self) -> std::sync::RwLockReadGuard<'_, RenderingContext> {
    self.context.read().unwrap_or_else(PoisonError::into_inner)
  }

  /// A snapshot of the rendering context.
  #[must_use]
  pub fn context(&self) -> RenderingContext {
    self.read_context().clone()
  }

  /// The id new jobs have to carry.
  #[must_use]
  pub fn data_source_id(&self) -> DataSourceId {
    self.read_context().source_id
  }

  #[must_use]
  pub fn map_info(&self) -> Option<MapInfo> {
    self.read_context().map_info.clone()
  }

  #[must_use]
  pub fn worker_count(&self) -> usize {
    self.workers.len()
  }

  #[must_use]
  pub fn worker_states(&self) -> Vec<WorkerState> {
    self.workers.iter().map(Worker::state).collect()
  }

  #[must_use]
  pub fn worker_stats(&self) -> Vec<WorkerStats> {
    self.workers.iter().map(Worker::stats).collect()
  }

  /// True once every worker thread has terminated.
  #[must_use]
  pub fn all_finished(&self) -> bool {
    self.workers.iter().all(Worker::is_finished)
  }

  /// Number of workers with an open data source. Waits for running renders.
  #[must_use]
  pub fn open_handles(&self) -> usize {
    self
      .workers
      .iter()
      .filter(|w| w.pipeline().handle().has_open_file())
      .count()
  }

  /// Tiles not taken by a worker yet.
  #[must_use]
  pub fn queued_tiles(&self) -> HashSet<Tile> {
    self.queue.tiles()
  }

  #[must_use]
  pub fn queued_jobs(&self) -> usize {
    self.queue.len()
  }

  #[must_use]
  pub fn is_shut_down(&self) -> bool {
    self.shut_down
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.shutdown();
  }
}

//! A render thread and its lifecycle.
//!
//! ```text
//! Running --pause--> Pausing --render done--> Paused --proceed--> Running
//!    any state --stop--> Stopped
//! ```
//!
//! The lifecycle state lives behind a mutex so the coordinator can wait for a worker to reach
//! `Paused`. Every transition the coordinator requests is also sent as a [`Signal`] over the
//! worker's channel. That channel is the only place a worker ever blocks, so no wake up is lost.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use image::RgbaImage;
use log::{debug, error, trace, warn};

use super::{
  cancel::CancelToken,
  job::Job,
  job_queue::JobQueue,
  pipeline::RenderPipeline,
  rendering_context::RenderingContext,
  tile_renderer::TileRenderError,
  worker_pool::PoolError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
  Running,
  /// Pause requested, the current render still finishes.
  Pausing,
  Paused,
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
  /// New jobs are queued.
  Wake,
  Pause,
  Proceed,
  Stop,
}

/// Published for every job a worker took from the queue.
#[derive(Debug)]
pub enum TileEvent {
  Rendered {
    job: Job,
    worker: usize,
    /// Generation of the rendering context the tile was rendered with.
    generation: u64,
    image: RgbaImage,
  },
  Failed {
    job: Job,
    worker: usize,
    generation: u64,
    error: TileRenderError,
  },
}

impl TileEvent {
  #[must_use]
  pub fn job(&self) -> &Job {
    match self {
      TileEvent::Rendered { job, .. } | TileEvent::Failed { job, .. } => job,
    }
  }

  #[must_use]
  pub fn worker(&self) -> usize {
    match self {
      TileEvent::Rendered { worker, .. } | TileEvent::Failed { worker, .. } => *worker,
    }
  }

  #[must_use]
  pub fn generation(&self) -> u64 {
    match self {
      TileEvent::Rendered { generation, .. } | TileEvent::Failed { generation, .. } => *generation,
    }
  }

  #[must_use]
  pub fn is_rendered(&self) -> bool {
    matches!(self, TileEvent::Rendered { .. })
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
  pub rendered: u64,
  pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
  rendered: AtomicU64,
  failed: AtomicU64,
}

#[derive(Debug)]
struct Lifecycle {
  state: Mutex<WorkerState>,
  changed: Condvar,
}

impl Lifecycle {
  fn lock(&self) -> MutexGuard<'_, WorkerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set(&self, state: WorkerState) {
    *self.lock() = state;
    self.changed.notify_all();
  }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one render thread, held by the pool.
#[derive(Debug)]
pub struct Worker {
  id: usize,
  lifecycle: Arc<Lifecycle>,
  signals: Sender<Signal>,
  pipeline: Arc<Mutex<RenderPipeline>>,
  counters: Arc<Counters>,
  cancel: CancelToken,
  thread: Option<JoinHandle<()>>,
}

impl Worker {
  /// Starts the render thread `render-{id}`.
  ///
  /// The worker only keeps weak references to the queue and the context, so it stops by itself
  /// once the pool is gone.
  pub(crate) fn spawn(
    id: usize,
    pipeline: RenderPipeline,
    queue: Weak<JobQueue>,
    context: Weak<RwLock<RenderingContext>>,
    sink: Sender<TileEvent>,
  ) -> std::io::Result<Self> {
    let (signals, receiver) = std::sync::mpsc::channel();
    let lifecycle = Arc::new(Lifecycle {
      state: Mutex::new(WorkerState::Running),
      changed: Condvar::new(),
    });
    let pipeline = Arc::new(Mutex::new(pipeline));
    let counters = Arc::new(Counters::default());
    let cancel = CancelToken::new();

    let worker_loop = WorkerLoop {
      id,
      lifecycle: lifecycle.clone(),
      receiver,
      pipeline: pipeline.clone(),
      queue,
      context,
      sink,
      counters: counters.clone(),
      cancel: cancel.clone(),
    };
    let thread = std::thread::Builder::new()
      .name(format!("render-{id}"))
      .spawn(move || worker_loop.run())?;

    Ok(Self {
      id,
      lifecycle,
      signals,
      pipeline,
      counters,
      cancel,
      thread: Some(thread),
    })
  }

  fn signal(&self, signal: Signal) {
    if self.signals.send(signal).is_err() {
      trace!("Worker {} is gone, dropping {signal:?}", self.id);
    }
  }

  #[must_use]
  pub fn id(&self) -> usize {
    self.id
  }

  #[must_use]
  pub fn state(&self) -> WorkerState {
    *self.lifecycle.lock()
  }

  /// True once a pause was requested, whether or not it was acknowledged yet.
  #[must_use]
  pub fn is_pausing(&self) -> bool {
    matches!(self.state(), WorkerState::Pausing | WorkerState::Paused)
  }

  /// Requests a pause. Does not wait. Has no effect unless the worker is running.
  pub fn pause(&self) {
    let mut state = self.lifecycle.lock();
    if *state == WorkerState::Running {
      *state = WorkerState::Pausing;
      drop(state);
      self.signal(Signal::Pause);
    }
  }

  /// Blocks until the worker acknowledged a pause or stopped.
  ///
  /// # Errors
  /// `PoolError::PauseTimeout` if that does not happen within `timeout`, which means a render is
  /// stuck.
  pub fn await_pausing(&self, timeout: Duration) -> Result<(), PoolError> {
    let state = self.lifecycle.lock();
    let (state, _) = self
      .lifecycle
      .changed
      .wait_timeout_while(state, timeout, |s| {
        matches!(s, WorkerState::Running | WorkerState::Pausing)
      })
      .unwrap_or_else(PoisonError::into_inner);
    match *state {
      WorkerState::Paused | WorkerState::Stopped => Ok(()),
      WorkerState::Running | WorkerState::Pausing => Err(PoolError::PauseTimeout {
        worker: self.id,
        timeout,
      }),
    }
  }

  /// Lets a paused (or pausing) worker continue.
  pub fn proceed(&self) {
    let mut state = self.lifecycle.lock();
    if matches!(*state, WorkerState::Pausing | WorkerState::Paused) {
      *state = WorkerState::Running;
      drop(state);
      self.lifecycle.changed.notify_all();
      self.signal(Signal::Proceed);
    }
  }

  /// Tells the worker there is new work. A paused worker ignores it until it proceeds.
  pub fn wake(&self) {
    self.signal(Signal::Wake);
  }

  /// Asks the thread to terminate and cancels its current render.
  pub(crate) fn stop(&self) {
    self.lifecycle.set(WorkerState::Stopped);
    self.cancel.cancel();
    self.signal(Signal::Stop);
  }

  /// Waits for the thread to terminate. A panicked thread is logged, not propagated.
  pub(crate) fn join(&mut self) {
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      error!("Worker {} terminated with a panic", self.id);
    }
  }

  #[must_use]
  pub fn is_finished(&self) -> bool {
    self.thread.as_ref().is_none_or(JoinHandle::is_finished)
  }

  #[must_use]
  pub fn stats(&self) -> WorkerStats {
    WorkerStats {
      rendered: self.counters.rendered.load(Ordering::Relaxed),
      failed: self.counters.failed.load(Ordering::Relaxed),
    }
  }

  /// Locks the pipeline. Blocks while the worker renders, so only use it on a paused worker.
  pub(crate) fn pipeline(&self) -> MutexGuard<'_, RenderPipeline> {
    lock(&self.pipeline)
  }
}

/// The part of a worker that lives on its thread.
struct WorkerLoop {
  id: usize,
  lifecycle: Arc<Lifecycle>,
  receiver: Receiver<Signal>,
  pipeline: Arc<Mutex<RenderPipeline>>,
  queue: Weak<JobQueue>,
  context: Weak<RwLock<RenderingContext>>,
  sink: Sender<TileEvent>,
  counters: Arc<Counters>,
  cancel: CancelToken,
}

impl WorkerLoop {
  fn run(self) {
    debug!("Worker {} started", self.id);
    while self.step() {}
    self.lifecycle.set(WorkerState::Stopped);
    debug!("Worker {} stopped", self.id);
  }

  /// One iteration of the main loop. Returns false once the worker has to terminate.
  fn step(&self) -> bool {
    if !self.drain_signals() {
      return false;
    }
    match self.acknowledge_pause() {
      WorkerState::Stopped => false,
      WorkerState::Paused => self.wait_for_signal(),
      WorkerState::Running | WorkerState::Pausing => {
        let Some(queue) = self.queue.upgrade() else {
          return false;
        };
        let job = queue.dequeue();
        drop(queue);
        match job {
          Some(job) => {
            self.process(job);
            true
          }
          None => self.wait_for_signal(),
        }
      }
    }
  }

  /// Signals only wake the worker, the lifecycle state carries the truth. Returns false if the
  /// pool side of the channel is gone.
  fn drain_signals(&self) -> bool {
    loop {
      match self.receiver.try_recv() {
        Ok(signal) => trace!("Worker {} got {signal:?}", self.id),
        Err(TryRecvError::Empty) => return true,
        Err(TryRecvError::Disconnected) => return false,
      }
    }
  }

  fn wait_for_signal(&self) -> bool {
    match self.receiver.recv() {
      Ok(signal) => {
        trace!("Worker {} woken by {signal:?}", self.id);
        true
      }
      Err(_) => false,
    }
  }

  /// Turns a requested pause into an acknowledged one. Only ever called between renders.
  fn acknowledge_pause(&self) -> WorkerState {
    let mut state = self.lifecycle.lock();
    if *state == WorkerState::Pausing {
      *state = WorkerState::Paused;
      self.lifecycle.changed.notify_all();
      trace!("Worker {} paused", self.id);
    }
    *state
  }

  fn process(&self, job: Job) {
    // Captured once per job. The context can only change while this worker is paused.
    let Some((generation, tile_size)) = self.context.upgrade().map(|context| {
      let context = context.read().unwrap_or_else(PoisonError::into_inner);
      (context.generation, context.tile_size)
    }) else {
      return;
    };

    let result = {
      let mut pipeline = lock(&self.pipeline);
      catch_unwind(AssertUnwindSafe(|| {
        pipeline.render(&job, tile_size, &self.cancel)
      }))
      .unwrap_or_else(|panic| Err(TileRenderError::Panicked(panic_message(panic.as_ref()))))
    };

    let event = match result {
      Ok(image) => {
        self.counters.rendered.fetch_add(1, Ordering::Relaxed);
        trace!("Worker {} rendered {}", self.id, job.tile);
        TileEvent::Rendered {
          job,
          worker: self.id,
          generation,
          image,
        }
      }
      Err(error) => {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        match &error {
          TileRenderError::Cancelled | TileRenderError::StaleSource { .. } => {
            debug!("Worker {} dropped {}: {error}", self.id, job.tile);
          }
          _ => warn!("Worker {} failed to render {}: {error}", self.id, job.tile),
        }
        TileEvent::Failed {
          job,
          worker: self.id,
          generation,
          error,
        }
      }
    };

    if self.sink.send(event).is_err() {
      trace!("Nobody listens for tiles anymore");
    }
  }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  panic
    .downcast_ref::<&str>()
    .map(ToString::to_string)
    .or_else(|| panic.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_string())
}

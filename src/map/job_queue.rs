use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use super::{coordinates::Tile, job::Job};

#[derive(Debug)]
struct Inner {
  /// Farthest job first, so the nearest one can be popped off the end.
  jobs: Vec<Job>,
  capacity: usize,
}

/// The pending tile jobs shared by all workers of a pool.
///
/// The content is only ever replaced as a whole, never appended to, so jobs for a viewport the
/// user already left are never picked up by a worker.
#[derive(Debug)]
pub struct JobQueue {
  inner: Mutex<Inner>,
}

impl JobQueue {
  #[must_use]
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(Inner {
        jobs: Vec::with_capacity(capacity),
        capacity,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Replaces the queue content with `jobs`.
  ///
  /// Jobs for the same tile are collapsed with the last one winning. If there are more jobs than
  /// the capacity allows the ones farthest from the viewport center are dropped.
  pub fn set_jobs(&self, jobs: impl IntoIterator<Item = Job>) {
    let jobs: Vec<Job> = jobs.into_iter().collect();
    let mut seen = HashSet::with_capacity(jobs.len());
    let mut unique: Vec<Job> = jobs.into_iter().rev().filter(|job| seen.insert(job.tile)).collect();
    unique.sort_by(|a, b| a.priority.total_cmp(&b.priority));

    let mut inner = self.lock();
    if unique.len() > inner.capacity {
      debug!(
        "Dropping {} jobs exceeding the queue capacity of {}.",
        unique.len() - inner.capacity,
        inner.capacity
      );
      unique.truncate(inner.capacity);
    }
    unique.reverse();
    trace!("Job queue replaced with {} jobs.", unique.len());
    inner.jobs = unique;
  }

  /// Takes the job nearest to the viewport center.
  pub fn dequeue(&self) -> Option<Job> {
    self.lock().jobs.pop()
  }

  pub fn clear(&self) {
    self.lock().jobs.clear();
  }

  /// Empties the queue and returns what was in it, farthest job first.
  pub fn take(&self) -> Vec<Job> {
    std::mem::take(&mut self.lock().jobs)
  }

  /// Puts back jobs returned by [`JobQueue::take`]. Ignored if new jobs were set meanwhile.
  pub fn restore(&self, jobs: Vec<Job>) {
    let mut inner = self.lock();
    if inner.jobs.is_empty() {
      trace!("Restoring {} jobs.", jobs.len());
      inner.jobs = jobs;
    }
  }

  /// The tiles currently waiting for a worker.
  #[must_use]
  pub fn tiles(&self) -> HashSet<Tile> {
    self.lock().jobs.iter().map(|job| job.tile).collect()
  }

  /// Changes the capacity. Already queued jobs are kept until the next [`JobQueue::set_jobs`].
  pub fn set_capacity(&self, capacity: usize) {
    self.lock().capacity = capacity;
  }

  #[must_use]
  pub fn capacity(&self) -> usize {
    self.lock().capacity
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.lock().jobs.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.lock().jobs.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::map::job::DataSourceId;

  fn job(x: u32, priority: f32) -> Job {
    Job::new(Tile { x, y: 0, zoom: 10 }, DataSourceId(0)).with_priority(priority)
  }

  fn drain(queue: &JobQueue) -> Vec<Job> {
    std::iter::from_fn(|| queue.dequeue()).collect()
  }

  #[test]
  fn set_jobs_replaces_content() {
    let queue = JobQueue::with_capacity(16);
    queue.set_jobs([job(1, 1.), job(2, 2.), job(3, 3.)]);
    queue.set_jobs([job(4, 1.), job(5, 2.)]);

    let tiles: Vec<u32> = drain(&queue).iter().map(|j| j.tile.x).collect();
    assert_eq!(tiles, vec![4, 5]);
  }

  #[test]
  fn dequeue_nearest_first() {
    let queue = JobQueue::with_capacity(16);
    queue.set_jobs([job(1, 5.), job(2, 0.), job(3, 2.)]);

    let tiles: Vec<u32> = drain(&queue).iter().map(|j| j.tile.x).collect();
    assert_eq!(tiles, vec![2, 3, 1]);
    assert!(queue.dequeue().is_none());
  }

  #[test]
  fn duplicates_newest_wins() {
    let queue = JobQueue::with_capacity(16);
    let newer = Job::new(Tile { x: 1, y: 0, zoom: 10 }, DataSourceId(9)).with_priority(0.5);
    queue.set_jobs([job(1, 3.), job(2, 1.), newer]);

    assert_eq!(queue.len(), 2);
    let first = queue.dequeue().unwrap();
    assert_eq!(first.source, DataSourceId(9));
    assert_eq!(first.tile.x, 1);
  }

  #[test]
  fn capacity_drops_farthest() {
    let queue = JobQueue::with_capacity(4);
    queue.set_capacity(2);
    assert_eq!(queue.capacity(), 2);
    queue.set_jobs([job(1, 3.), job(2, 1.), job(3, 2.)]);

    let tiles: Vec<u32> = drain(&queue).iter().map(|j| j.tile.x).collect();
    assert_eq!(tiles, vec![2, 3]);
  }

  #[test]
  fn take_and_restore_keep_order() {
    let queue = JobQueue::with_capacity(8);
    queue.set_jobs([job(1, 3.), job(2, 1.), job(3, 2.)]);
    assert_eq!(queue.tiles().len(), 3);

    let taken = queue.take();
    assert!(queue.is_empty());
    queue.restore(taken);

    let tiles: Vec<u32> = drain(&queue).iter().map(|j| j.tile.x).collect();
    assert_eq!(tiles, vec![2, 3, 1]);
  }

  #[test]
  fn restore_does_not_overwrite_newer_jobs() {
    let queue = JobQueue::with_capacity(8);
    queue.set_jobs([job(1, 1.)]);
    let taken = queue.take();
    queue.set_jobs([job(2, 1.)]);
    queue.restore(taken);

    let tiles: Vec<u32> = drain(&queue).iter().map(|j| j.tile.x).collect();
    assert_eq!(tiles, vec![2]);
  }

  #[test]
  fn clear_empties() {
    let queue = JobQueue::with_capacity(4);
    queue.set_jobs([job(1, 1.)]);
    assert!(!queue.is_empty());
    queue.clear();
    assert!(queue.is_empty());
  }

  #[test]
  fn concurrent_consumers_take_every_job_once() {
    let queue = Arc::new(JobQueue::with_capacity(1000));
    queue.set_jobs((0..1000).map(|x| job(x, 0.)));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let queue = queue.clone();
        std::thread::spawn(move || drain(&queue).len())
      })
      .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 1000);
  }
}

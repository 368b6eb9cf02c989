use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::coordinates::Tile;

/// Identifies one opened incarnation of the data source. Every swap of the map file or the
/// data source kind hands out a new id.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSourceId(pub u64);

impl DataSourceId {
  #[must_use]
  pub fn next(self) -> Self {
    Self(self.0 + 1)
  }
}

impl std::fmt::Display for DataSourceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "source#{}", self.0)
  }
}

/// A request to render one tile.
///
/// Two jobs are equal if they are for the same tile, regardless of source or priority.
#[derive(Debug, Clone, Copy)]
pub struct Job {
  pub tile: Tile,
  pub source: DataSourceId,
  /// Squared distance to the viewport center in tiles. Smaller is rendered first.
  pub priority: f32,
}

impl Job {
  #[must_use]
  pub fn new(tile: Tile, source: DataSourceId) -> Self {
    Self {
      tile,
      source,
      priority: 0.,
    }
  }

  #[must_use]
  pub fn with_priority(mut self, priority: f32) -> Self {
    self.priority = priority;
    self
  }
}

impl PartialEq for Job {
  fn eq(&self, other: &Self) -> bool {
    self.tile == other.tile
  }
}

impl Eq for Job {}

impl Hash for Job {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.tile.hash(state);
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  #[test]
  fn equality_is_by_tile() {
    let tile = Tile { x: 1, y: 2, zoom: 3 };
    let a = Job::new(tile, DataSourceId(1)).with_priority(1.);
    let b = Job::new(tile, DataSourceId(2)).with_priority(7.);
    assert_eq!(a, b);
    assert_eq!(HashSet::from([a, b]).len(), 1);
    assert_ne!(a, Job::new(Tile { x: 2, y: 2, zoom: 3 }, DataSourceId(1)));
  }
}

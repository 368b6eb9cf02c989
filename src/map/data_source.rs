//! Access to the map data the workers render from.
//!
//! Every worker owns its own provider and its own open handle, so implementations never have to
//! be shared between threads.

mod map_file;
mod test_source;

pub use map_file::{METADATA_FILE, MapFileSource};
pub use test_source::TestSource;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
  coordinates::{BoundingBox, Tile, WGS84Coordinate},
  tile_renderer::TileRenderError,
};

/// The raw (encoded) data of a tile.
pub type TileData = Vec<u8>;

#[derive(Error, Debug)]
pub enum OpenError {
  #[error("No map file given")]
  NoTarget,
  #[error("Map file {0} does not exist")]
  NotFound(PathBuf),
  #[error("Invalid map file {path}: {reason}")]
  InvalidFormat { path: PathBuf, reason: String },
  #[error("Failed to open map file: {0}")]
  Io(#[from] std::io::Error),
}

/// Kinds of map data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataSourceKind {
  /// An offline tile directory.
  #[default]
  MapFile,
  /// Synthetic tiles, no map file needed.
  Test,
}

impl DataSourceKind {
  #[must_use]
  pub fn name(&self) -> &'static str {
    match self {
      DataSourceKind::MapFile => "MapFile",
      DataSourceKind::Test => "Test",
    }
  }
}

impl Display for DataSourceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name())
  }
}

/// Metadata of an opened map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
  #[serde(default)]
  pub bounding_box: BoundingBox,
  #[serde(default)]
  pub start_position: Option<WGS84Coordinate>,
  #[serde(default)]
  pub start_zoom: Option<u8>,
  #[serde(default)]
  pub min_zoom: u8,
  #[serde(default = "default_max_zoom")]
  pub max_zoom: u8,
}

fn default_max_zoom() -> u8 {
  20
}

impl Default for MapInfo {
  fn default() -> Self {
    Self {
      bounding_box: BoundingBox::world(),
      start_position: None,
      start_zoom: None,
      min_zoom: 0,
      max_zoom: default_max_zoom(),
    }
  }
}

/// An opened map.
pub trait MapDatabase: Send {
  fn info(&self) -> &MapInfo;

  /// Reads the encoded data of a tile.
  ///
  /// # Errors
  /// Returns `TileRenderError::NotAvailable` if the map has no data for the tile.
  fn read_tile(&mut self, tile: &Tile) -> Result<TileData, TileRenderError>;

  /// Releases whatever the handle holds. Called exactly once before the handle is dropped.
  fn close(&mut self) {}
}

/// Opens maps of one [`DataSourceKind`].
pub trait DataSourceProvider: Send {
  fn kind(&self) -> DataSourceKind;

  /// # Errors
  /// Returns an [`OpenError`] if the target is missing or not a valid map.
  fn open(&self, target: Option<&Path>) -> Result<Box<dyn MapDatabase>, OpenError>;
}

/// Creates a provider per worker.
pub trait DataSourceFactory: Send + Sync {
  fn create(&self, kind: DataSourceKind) -> Box<dyn DataSourceProvider>;
}

/// The built in data sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDataSources;

impl DataSourceFactory for DefaultDataSources {
  fn create(&self, kind: DataSourceKind) -> Box<dyn DataSourceProvider> {
    match kind {
      DataSourceKind::MapFile => Box::new(MapFileSource),
      DataSourceKind::Test => Box::new(TestSource),
    }
  }
}

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use super::{DataSourceKind, DataSourceProvider, MapDatabase, MapInfo, OpenError, TileData};
use crate::map::{coordinates::Tile, tile_renderer::TileRenderError};

/// Name of the optional metadata file inside a map directory.
pub const METADATA_FILE: &str = "metadata.json";

/// An offline map stored as a directory of `{zoom}_{x}_{y}.png` tiles, the same layout the tile
/// cache uses, plus an optional `metadata.json` with a serialized [`MapInfo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MapFileSource;

impl DataSourceProvider for MapFileSource {
  fn kind(&self) -> DataSourceKind {
    DataSourceKind::MapFile
  }

  fn open(&self, target: Option<&Path>) -> Result<Box<dyn MapDatabase>, OpenError> {
    let base_path = target.ok_or(OpenError::NoTarget)?;
    if !base_path.exists() {
      return Err(OpenError::NotFound(base_path.to_path_buf()));
    }
    if !base_path.is_dir() {
      return Err(OpenError::InvalidFormat {
        path: base_path.to_path_buf(),
        reason: "not a tile directory".to_string(),
      });
    }

    let metadata = base_path.join(METADATA_FILE);
    let info = if metadata.exists() {
      let content = fs::read_to_string(&metadata)?;
      let info: MapInfo = serde_json::from_str(&content).map_err(|e| OpenError::InvalidFormat {
        path: metadata.clone(),
        reason: e.to_string(),
      })?;
      if !info.bounding_box.is_valid() {
        return Err(OpenError::InvalidFormat {
          path: metadata,
          reason: "empty bounding box".to_string(),
        });
      }
      info
    } else {
      debug!("No {METADATA_FILE} in {}, assuming world coverage.", base_path.display());
      MapInfo::default()
    };

    Ok(Box::new(MapFile {
      base_path: base_path.to_path_buf(),
      info,
    }))
  }
}

#[derive(Debug)]
struct MapFile {
  base_path: PathBuf,
  info: MapInfo,
}

impl MapFile {
  fn path(&self, tile: &Tile) -> PathBuf {
    self
      .base_path
      .join(format!("{}_{}_{}.png", tile.zoom, tile.x, tile.y))
  }
}

impl MapDatabase for MapFile {
  fn info(&self) -> &MapInfo {
    &self.info
  }

  fn read_tile(&mut self, tile: &Tile) -> Result<TileData, TileRenderError> {
    trace!("Loading tile from file {tile}");
    let path = self.path(tile);
    if !path.exists() {
      return Err(TileRenderError::NotAvailable { tile: *tile });
    }
    Ok(fs::read(path)?)
  }

  fn close(&mut self) {
    debug!("Closing map file {}", self.base_path.display());
  }
}

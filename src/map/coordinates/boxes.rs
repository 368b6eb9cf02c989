use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{TileCoordinate, WGS84Coordinate};

/// A tile in the Web Mercator projection.
#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq, Serialize, Deserialize)]
pub struct Tile {
  pub x: u32,
  pub y: u32,
  pub zoom: u8,
}

impl Tile {
  /// Checks existence of the tile.
  #[must_use]
  pub fn exists(&self) -> bool {
    1u32
      .checked_shl(self.zoom.into())
      .is_some_and(|tiles| self.x < tiles && self.y < tiles)
  }

  /// The center of the tile as fractional tile coordinate.
  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub fn center(&self) -> TileCoordinate {
    TileCoordinate {
      x: self.x as f32 + 0.5,
      y: self.y as f32 + 0.5,
      zoom: self.zoom,
    }
  }
}

impl std::fmt::Display for Tile {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
  }
}

impl From<TileCoordinate> for Tile {
  #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
  fn from(tile_coord: TileCoordinate) -> Self {
    Self {
      x: tile_coord.x.max(0.).floor() as u32,
      y: tile_coord.y.max(0.).floor() as u32,
      zoom: tile_coord.zoom,
    }
  }
}

/// A function to create a tile iterator for a given bounding box.
pub fn tiles_in_box(nw: TileCoordinate, se: TileCoordinate) -> impl Iterator<Item = Tile> {
  let nw_tile = Tile::from(nw);
  let se_tile = Tile::from(se);
  (nw_tile.x..=se_tile.x)
    .cartesian_product(nw_tile.y..=se_tile.y)
    .map(move |(x, y)| Tile {
      x,
      y,
      zoom: nw_tile.zoom,
    })
    .filter(Tile::exists)
}

/// All tiles needed to fill a viewport of `width` x `height` pixels around `center`, paired with
/// their squared distance (in tiles) to the center and sorted nearest first.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn viewport_tiles(
  center: WGS84Coordinate,
  zoom: u8,
  width: u32,
  height: u32,
  tile_size: u32,
) -> Vec<(Tile, f32)> {
  let tile_size = tile_size.max(1);
  let center = TileCoordinate::from_coordinate(center, zoom);
  let half_w = width as f32 / tile_size as f32 / 2.;
  let half_h = height as f32 / tile_size as f32 / 2.;
  // The south east corner is exclusive.
  let epsilon = 0.000_1;
  tiles_in_box(
    center.offset(-half_w, -half_h),
    center.offset(half_w - epsilon, half_h - epsilon),
  )
  .map(|tile| (tile, tile.center().sq_dist(&center)))
  .sorted_by(|a, b| a.1.total_cmp(&b.1))
  .collect()
}

/// Upper bound of the number of tiles a viewport can show at once.
#[must_use]
pub fn viewport_tile_capacity(width: u32, height: u32, tile_size: u32) -> usize {
  let tile_size = tile_size.max(1);
  let columns = width.div_ceil(tile_size) + 1;
  let rows = height.div_ceil(tile_size) + 1;
  (columns * rows) as usize
}

/// A geographic bounding box as stored in map metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub min_lat: f32,
  pub min_lon: f32,
  pub max_lat: f32,
  pub max_lon: f32,
}

impl Default for BoundingBox {
  fn default() -> Self {
    Self::world()
  }
}

impl BoundingBox {
  /// Everything Web Mercator can show.
  #[must_use]
  pub fn world() -> Self {
    Self {
      min_lat: -85.0511,
      min_lon: -180.,
      max_lat: 85.0511,
      max_lon: 180.,
    }
  }

  #[must_use]
  pub fn contains(&self, coord: WGS84Coordinate) -> bool {
    (self.min_lat..=self.max_lat).contains(&coord.lat)
      && (self.min_lon..=self.max_lon).contains(&coord.lon)
  }

  #[must_use]
  pub fn center(&self) -> WGS84Coordinate {
    WGS84Coordinate {
      lat: f32::midpoint(self.min_lat, self.max_lat),
      lon: f32::midpoint(self.min_lon, self.max_lon),
    }
  }

  #[must_use]
  pub fn is_valid(&self) -> bool {
    self.min_lat <= self.max_lat && self.min_lon <= self.max_lon
  }
}

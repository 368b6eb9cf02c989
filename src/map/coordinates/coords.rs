use serde::{Deserialize, Serialize};

const PI: f32 = std::f32::consts::PI;

/// A position in degrees.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WGS84Coordinate {
  pub lat: f32,
  pub lon: f32,
}

impl WGS84Coordinate {
  #[must_use]
  pub fn new(lat: f32, lon: f32) -> Self {
    Self { lat, lon }
  }

  /// Web Mercator can only represent latitudes up to roughly 85.0511 degrees.
  #[must_use]
  pub fn is_valid(&self) -> bool {
    self.lat.abs() <= 85.0511 && self.lon.abs() <= 180.
  }
}

/// A fractional tile position at a zoom level. The integer part is the tile, the fractional part
/// the offset within the tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCoordinate {
  pub x: f32,
  pub y: f32,
  pub zoom: u8,
}

impl TileCoordinate {
  #[must_use]
  pub fn from_coordinate(coord: WGS84Coordinate, zoom: u8) -> Self {
    let n = 2f32.powi(zoom.into());
    let lat = coord.lat.to_radians();
    let x = (coord.lon + 180.) / 360. * n;
    let y = (1. - (lat.tan() + 1. / lat.cos()).ln() / PI) * n / 2.;
    Self { x, y, zoom }
  }

  /// Moves the coordinate by a number of tiles.
  #[must_use]
  pub fn offset(&self, dx: f32, dy: f32) -> Self {
    Self {
      x: self.x + dx,
      y: self.y + dy,
      zoom: self.zoom,
    }
  }

  #[must_use]
  pub fn sq_dist(&self, other: &Self) -> f32 {
    let dx = other.x - self.x;
    let dy = other.y - self.y;
    dx * dx + dy * dy
  }
}

impl From<TileCoordinate> for WGS84Coordinate {
  fn from(tile_coord: TileCoordinate) -> Self {
    let n = 2f32.powi(tile_coord.zoom.into());
    WGS84Coordinate {
      lat: f32::atan(f32::sinh(PI - tile_coord.y / n * 2. * PI)).to_degrees(),
      lon: tile_coord.x / n * 360. - 180.,
    }
  }
}

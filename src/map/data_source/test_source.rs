use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use super::{DataSourceKind, DataSourceProvider, MapDatabase, MapInfo, OpenError, TileData};
use crate::map::{coordinates::Tile, tile_renderer::TileRenderError};

const TEST_TILE_SIZE: u32 = 64;

/// Produces checkerboard tiles for every tile of the world. Ignores the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestSource;

impl DataSourceProvider for TestSource {
  fn kind(&self) -> DataSourceKind {
    DataSourceKind::Test
  }

  fn open(&self, _target: Option<&Path>) -> Result<Box<dyn MapDatabase>, OpenError> {
    Ok(Box::new(TestDatabase {
      info: MapInfo::default(),
    }))
  }
}

#[derive(Debug)]
struct TestDatabase {
  info: MapInfo,
}

impl MapDatabase for TestDatabase {
  fn info(&self) -> &MapInfo {
    &self.info
  }

  fn read_tile(&mut self, tile: &Tile) -> Result<TileData, TileRenderError> {
    if !tile.exists() {
      return Err(TileRenderError::NotAvailable { tile: *tile });
    }
    let is_even_tile = (tile.x + tile.y).is_multiple_of(2);
    let (light, dark) = if is_even_tile {
      ([255, 240, 240, 255], [200, 180, 180, 255])
    } else {
      ([240, 240, 255, 255], [180, 180, 200, 255])
    };
    let cell = TEST_TILE_SIZE / 8;
    let img = RgbaImage::from_fn(TEST_TILE_SIZE, TEST_TILE_SIZE, |x, y| {
      if (x / cell + y / cell).is_multiple_of(2) {
        Rgba(light)
      } else {
        Rgba(dark)
      }
    });

    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
      .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
      .map_err(|e| TileRenderError::ImageEncode(e.to_string()))?;
    Ok(buf)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn produces_png() {
    let mut db = TestSource.open(None).unwrap();
    let data = db.read_tile(&Tile { x: 1, y: 1, zoom: 2 }).unwrap();
    assert_eq!(&data[1..4], b"PNG");
    assert!(db.read_tile(&Tile { x: 9, y: 1, zoom: 2 }).is_err());
  }

  #[test]
  fn zoom_beyond_tile_range_is_not_available() {
    let mut db = TestSource.open(None).unwrap();
    assert!(matches!(
      db.read_tile(&Tile { x: 0, y: 0, zoom: 40 }),
      Err(TileRenderError::NotAvailable { .. })
    ));
  }
}

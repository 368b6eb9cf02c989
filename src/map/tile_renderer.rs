mod raster;

pub use raster::{RasterRenderers, RasterTileRenderer};

use image::RgbaImage;
use thiserror::Error;

use super::{cancel::CancelToken, coordinates::Tile, job::DataSourceId, theme::RenderTheme};

#[derive(Error, Debug)]
pub enum TileRenderError {
  #[error("No map data source is open")]
  SourceClosed,
  #[error("Job was issued for {job} but the worker serves {current}")]
  StaleSource {
    job: DataSourceId,
    current: DataSourceId,
  },
  #[error("Tile {tile} not available")]
  NotAvailable { tile: Tile },
  #[error("Failed to read tile data: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to decode image: {0}")]
  ImageDecode(String),
  #[error("Failed to encode image: {0}")]
  ImageEncode(String),
  #[error("Rendering was cancelled")]
  Cancelled,
  #[error("Renderer panicked: {0}")]
  Panicked(String),
}

/// Everything a renderer needs besides the tile data.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams<'a> {
  pub theme: &'a RenderTheme,
  /// Edge length of the produced image in pixels.
  pub tile_size: u32,
  pub cancel: &'a CancelToken,
}

/// Trait for rendering tile data into an RGBA image.
///
/// Each worker owns its own renderer, so implementations may keep mutable decoder state or
/// buffers around between calls.
pub trait TileRenderer: Send {
  /// Render raw tile data into an image of `params.tile_size` pixels.
  ///
  /// # Errors
  /// Returns `TileRenderError` if the tile data cannot be decoded or rendered, or
  /// `TileRenderError::Cancelled` when `params.cancel` was raised.
  fn render(
    &mut self,
    tile: &Tile,
    data: &[u8],
    params: &RenderParams<'_>,
  ) -> Result<RgbaImage, TileRenderError>;

  /// Returns the name of this renderer for display purposes.
  fn name(&self) -> &'static str;
}

/// Creates one renderer per worker.
pub trait RendererFactory: Send + Sync {
  fn create(&self) -> Box<dyn TileRenderer>;
}

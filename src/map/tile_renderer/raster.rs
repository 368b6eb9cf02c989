use image::{Rgba, RgbaImage, imageops};

use super::{RenderParams, RendererFactory, TileRenderError, TileRenderer};
use crate::map::coordinates::Tile;

/// Raster tile renderer that decodes PNG/JPEG images and applies the render theme.
#[derive(Debug, Clone, Default)]
pub struct RasterTileRenderer;

impl RasterTileRenderer {
  #[must_use]
  pub fn new() -> Self {
    Self
  }

  fn decode(tile: &Tile, data: &[u8]) -> Result<RgbaImage, TileRenderError> {
    let img_reader = image::ImageReader::new(std::io::Cursor::new(data))
      .with_guessed_format()
      .map_err(|e| {
        TileRenderError::ImageDecode(format!("Failed to create image reader for {tile}: {e}"))
      })?;

    let img = img_reader
      .decode()
      .map_err(|e| TileRenderError::ImageDecode(format!("Failed to decode image for {tile}: {e}")))?;
    Ok(img.to_rgba8())
  }
}

fn check_cancelled(params: &RenderParams<'_>) -> Result<(), TileRenderError> {
  if params.cancel.is_cancelled() {
    Err(TileRenderError::Cancelled)
  } else {
    Ok(())
  }
}

fn multiply(channel: u8, factor: u8) -> u8 {
  // Both operands are at most 255, so the result fits.
  u8::try_from(u16::from(channel) * u16::from(factor) / 255).unwrap_or(u8::MAX)
}

impl TileRenderer for RasterTileRenderer {
  fn render(
    &mut self,
    tile: &Tile,
    data: &[u8],
    params: &RenderParams<'_>,
  ) -> Result<RgbaImage, TileRenderError> {
    let start = std::time::Instant::now();
    let theme = params.theme;
    let size = params.tile_size;

    let mut img = Self::decode(tile, data)?;
    check_cancelled(params)?;

    if img.dimensions() != (size, size) {
      img = imageops::resize(&img, size, size, theme.resampling.into());
      check_cancelled(params)?;
    }

    let mut canvas = RgbaImage::from_pixel(size, size, Rgba(theme.background));
    imageops::overlay(&mut canvas, &img, 0, 0);

    if let Some(tint) = theme.tint {
      for pixel in canvas.pixels_mut() {
        for (channel, factor) in pixel.0.iter_mut().zip(tint).take(3) {
          *channel = multiply(*channel, factor);
        }
      }
    }

    if let Some(frame) = theme.tile_frame
      && size > 0
    {
      let last = size - 1;
      for i in 0..size {
        canvas.put_pixel(i, 0, Rgba(frame));
        canvas.put_pixel(i, last, Rgba(frame));
        canvas.put_pixel(0, i, Rgba(frame));
        canvas.put_pixel(last, i, Rgba(frame));
      }
    }

    log::debug!("Tile {tile} (raster) rendered in {:?}", start.elapsed());
    Ok(canvas)
  }

  fn name(&self) -> &'static str {
    "Raster"
  }
}

/// Hands every worker its own [`RasterTileRenderer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterRenderers;

impl RendererFactory for RasterRenderers {
  fn create(&self) -> Box<dyn TileRenderer> {
    Box::new(RasterTileRenderer::new())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use image::{DynamicImage, ImageFormat};

  use super::*;
  use crate::map::{
    cancel::CancelToken,
    theme::{RenderTheme, Resampling},
  };

  fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
      .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
      .unwrap();
    buf
  }

  const TILE: Tile = Tile { x: 0, y: 0, zoom: 0 };

  #[test]
  fn test_raster_renderer_name() {
    let renderer = RasterTileRenderer::new();
    assert_eq!(renderer.name(), "Raster");
  }

  #[test]
  fn test_raster_renderer_invalid_data() {
    let mut renderer = RasterTileRenderer::new();
    let theme = RenderTheme::default();
    let cancel = CancelToken::new();
    let params = RenderParams {
      theme: &theme,
      tile_size: 16,
      cancel: &cancel,
    };
    let result = renderer.render(&TILE, &[0, 1, 2, 3], &params);
    assert!(matches!(result, Err(TileRenderError::ImageDecode(_))));
  }

  #[test]
  fn resizes_to_tile_size() {
    let mut renderer = RasterTileRenderer::new();
    let theme = RenderTheme {
      resampling: Resampling::Nearest,
      ..RenderTheme::default()
    };
    let cancel = CancelToken::new();
    let params = RenderParams {
      theme: &theme,
      tile_size: 32,
      cancel: &cancel,
    };
    let img = renderer.render(&TILE, &png(8, 8, [10, 20, 30, 255]), &params).unwrap();
    assert_eq!(img.dimensions(), (32, 32));
    assert_eq!(img.get_pixel(5, 5).0, [10, 20, 30, 255]);
  }

  #[test]
  fn transparent_data_shows_background_and_frame() {
    let mut renderer = RasterTileRenderer::new();
    let theme = RenderTheme {
      background: [1, 2, 3, 255],
      tile_frame: Some([255, 0, 0, 255]),
      ..RenderTheme::default()
    };
    let cancel = CancelToken::new();
    let params = RenderParams {
      theme: &theme,
      tile_size: 8,
      cancel: &cancel,
    };
    let img = renderer.render(&TILE, &png(8, 8, [0, 0, 0, 0]), &params).unwrap();
    assert_eq!(img.get_pixel(4, 4).0, [1, 2, 3, 255]);
    assert_eq!(img.get_pixel(0, 4).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(7, 7).0, [255, 0, 0, 255]);
  }

  #[test]
  fn tint_darkens() {
    let mut renderer = RasterTileRenderer::new();
    let theme = RenderTheme {
      tint: Some([0, 255, 255, 255]),
      ..RenderTheme::default()
    };
    let cancel = CancelToken::new();
    let params = RenderParams {
      theme: &theme,
      tile_size: 4,
      cancel: &cancel,
    };
    let img = renderer.render(&TILE, &png(4, 4, [200, 200, 200, 255]), &params).unwrap();
    assert_eq!(img.get_pixel(1, 1).0, [0, 200, 200, 255]);
  }

  #[test]
  fn cancelled_render_stops() {
    let mut renderer = RasterTileRenderer::new();
    let theme = RenderTheme::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let params = RenderParams {
      theme: &theme,
      tile_size: 4,
      cancel: &cancel,
    };
    let result = renderer.render(&TILE, &png(4, 4, [0, 0, 0, 255]), &params);
    assert!(matches!(result, Err(TileRenderError::Cancelled)));
  }
}

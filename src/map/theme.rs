use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::PathBuf;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThemeError {
  #[error("Failed to read render theme {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Failed to parse render theme: {0}")]
  Parse(String),
}

/// The resampling filter used when tile data does not match the tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
  Nearest,
  #[default]
  Triangle,
  CatmullRom,
  Lanczos3,
}

impl From<Resampling> for FilterType {
  fn from(resampling: Resampling) -> Self {
    match resampling {
      Resampling::Nearest => FilterType::Nearest,
      Resampling::Triangle => FilterType::Triangle,
      Resampling::CatmullRom => FilterType::CatmullRom,
      Resampling::Lanczos3 => FilterType::Lanczos3,
    }
  }
}

/// A parsed render theme. Shared read-only between all pipelines of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTheme {
  pub name: String,
  /// Drawn below the tile data, visible where the data is transparent.
  #[serde(default = "default_background")]
  pub background: [u8; 4],
  /// Multiplied onto every pixel.
  #[serde(default)]
  pub tint: Option<[u8; 4]>,
  /// Draws a one pixel frame around every tile.
  #[serde(default)]
  pub tile_frame: Option<[u8; 4]>,
  #[serde(default)]
  pub resampling: Resampling,
}

fn default_background() -> [u8; 4] {
  [242, 239, 233, 255]
}

impl Default for RenderTheme {
  fn default() -> Self {
    Self {
      name: "default".to_string(),
      background: default_background(),
      tint: None,
      tile_frame: None,
      resampling: Resampling::default(),
    }
  }
}

/// Themes compiled into the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InternalTheme {
  #[default]
  Default,
  Night,
  Debug,
}

impl InternalTheme {
  #[must_use]
  pub fn name(&self) -> &'static str {
    match self {
      InternalTheme::Default => "Default",
      InternalTheme::Night => "Night",
      InternalTheme::Debug => "Debug",
    }
  }

  fn source(self) -> &'static str {
    match self {
      InternalTheme::Default => r#"{ "name": "default" }"#,
      InternalTheme::Night => {
        r#"{ "name": "night", "background": [20, 24, 36, 255], "tint": [120, 130, 170, 255] }"#
      }
      InternalTheme::Debug => {
        r#"{ "name": "debug", "tile_frame": [255, 0, 0, 255], "resampling": "nearest" }"#
      }
    }
  }
}

/// Where to get a render theme from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThemeDescriptor {
  Internal(InternalTheme),
  File(PathBuf),
}

impl Default for ThemeDescriptor {
  fn default() -> Self {
    Self::Internal(InternalTheme::default())
  }
}

impl std::fmt::Display for ThemeDescriptor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ThemeDescriptor::Internal(theme) => write!(f, "{}", theme.name()),
      ThemeDescriptor::File(path) => write!(f, "{}", path.display()),
    }
  }
}

impl ThemeDescriptor {
  /// Opens the theme definition for reading.
  ///
  /// # Errors
  /// Fails if a theme file cannot be opened.
  pub fn open(&self) -> Result<Box<dyn Read>, ThemeError> {
    match self {
      ThemeDescriptor::Internal(theme) => Ok(Box::new(Cursor::new(theme.source()))),
      ThemeDescriptor::File(path) => File::open(path)
        .map(|f| Box::new(BufReader::new(f)) as Box<dyn Read>)
        .map_err(|source| ThemeError::Io {
          path: path.clone(),
          source,
        }),
    }
  }
}

/// Turns a theme definition into a [`RenderTheme`].
pub trait ThemeParser: Send + Sync {
  /// # Errors
  /// Returns `ThemeError::Parse` if the definition is malformed.
  fn parse(&self, stream: &mut dyn Read) -> Result<RenderTheme, ThemeError>;
}

/// Reads themes stored as json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonThemeParser;

impl ThemeParser for JsonThemeParser {
  fn parse(&self, stream: &mut dyn Read) -> Result<RenderTheme, ThemeError> {
    serde_json::from_reader(stream).map_err(|e| ThemeError::Parse(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use rstest::rstest;

  use super::*;

  #[rstest]
  #[case(InternalTheme::Default, "default")]
  #[case(InternalTheme::Night, "night")]
  #[case(InternalTheme::Debug, "debug")]
  fn internal_themes_parse(#[case] theme: InternalTheme, #[case] name: &str) {
    let mut stream = ThemeDescriptor::Internal(theme).open().unwrap();
    let parsed = JsonThemeParser.parse(&mut stream).unwrap();
    assert_eq!(parsed.name, name);
  }

  #[test]
  fn defaults_are_filled_in() {
    let parsed = JsonThemeParser.parse(&mut r#"{ "name": "x" }"#.as_bytes()).unwrap();
    assert_eq!(parsed.background, default_background());
    assert_eq!(parsed.tint, None);
    assert_eq!(parsed.resampling, Resampling::Triangle);
  }

  #[test]
  fn malformed_theme_is_an_error() {
    let result = JsonThemeParser.parse(&mut "<rendertheme/>".as_bytes());
    assert!(matches!(result, Err(ThemeError::Parse(_))));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let result = ThemeDescriptor::File(PathBuf::from("/does/not/exist.json")).open();
    assert!(matches!(result, Err(ThemeError::Io { .. })));
  }
}

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::{info, warn};
use mapworkers::{
  MapView, TileEvent,
  config::Config,
  map::{
    coordinates::WGS84Coordinate,
    data_source::DataSourceKind,
    rendering_context::Viewport,
    theme::{InternalTheme, ThemeDescriptor},
  },
};

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Offline tile directory to render from.
  map: Option<PathBuf>,

  /// Renders generated test tiles instead of a map.
  #[arg(long, default_value_t = false)]
  test_source: bool,

  /// Center latitude. The start position of the map is used if not provided.
  #[arg(long, allow_negative_numbers = true)]
  lat: Option<f32>,

  /// Center longitude.
  #[arg(long, allow_negative_numbers = true)]
  lon: Option<f32>,

  /// Zoom level.
  #[arg(short, long)]
  zoom: Option<u8>,

  /// Width of the view in pixels.
  #[arg(long, default_value_t = 1024)]
  width: u32,

  /// Height of the view in pixels.
  #[arg(long, default_value_t = 768)]
  height: u32,

  /// A json render theme.
  #[arg(short, long)]
  theme: Option<PathBuf>,

  /// Uses the built in night theme.
  #[arg(long, default_value_t = false)]
  night: bool,

  /// Where the rendered tiles are written to.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Number of render threads.
  #[arg(short = 'j', long)]
  threads: Option<usize>,

  /// Gives up waiting for tiles after this many seconds.
  #[arg(long, default_value_t = 30)]
  timeout: u64,
}

impl Args {
  fn apply(&self, mut config: Config) -> Config {
    if self.map.is_some() {
      config.map_file.clone_from(&self.map);
    }
    if self.test_source {
      config.data_source = Some(DataSourceKind::Test);
    }
    if self.theme.is_some() {
      config.theme_file.clone_from(&self.theme);
    }
    if self.output.is_some() {
      config.output_dir.clone_from(&self.output);
    }
    if self.threads.is_some() {
      config.worker_count = self.threads;
    }
    config
  }
}

fn main() -> Result<()> {
  let args = <Args as clap::Parser>::parse();
  env_logger::init();

  let config = args.apply(Config::new());
  let mut settings = config.pool_settings(Viewport::new(args.width, args.height));
  if args.night {
    settings.theme = ThemeDescriptor::Internal(InternalTheme::Night);
  }
  let output_dir = config.output_dir.clone().unwrap_or_else(|| PathBuf::from("tiles"));
  std::fs::create_dir_all(&output_dir)
    .with_context(|| format!("creating {}", output_dir.display()))?;

  let (sender, receiver) = mpsc::channel();
  let mut view = MapView::with_defaults(settings, sender).context("starting the workers")?;

  let position = view.position();
  let center = match (args.lat, args.lon) {
    (Some(lat), Some(lon)) => WGS84Coordinate::new(lat, lon),
    (None, None) => position.center,
    _ => bail!("--lat and --lon have to be given together"),
  };
  if !center.is_valid() {
    bail!("{center:?} is not a valid center");
  }
  let expected = view.set_center_and_zoom(center, args.zoom.unwrap_or(position.zoom));
  info!("Rendering {expected} tiles around {:?}", view.position());

  let deadline = Instant::now() + Duration::from_secs(args.timeout);
  let mut done = HashSet::new();
  let mut written = 0;
  while done.len() < expected {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let event = match receiver.recv_timeout(remaining) {
      Ok(event) => event,
      Err(RecvTimeoutError::Timeout) => {
        warn!("Timed out with {} of {expected} tiles", done.len());
        break;
      }
      Err(RecvTimeoutError::Disconnected) => break,
    };

    let fresh = view.tile_loaded(&event);
    match event {
      TileEvent::Rendered { job, image, .. } if fresh => {
        let tile = job.tile;
        let path = output_dir.join(format!("{}_{}_{}.png", tile.zoom, tile.x, tile.y));
        image
          .save(&path)
          .with_context(|| format!("writing {}", path.display()))?;
        written += 1;
        done.insert(tile);
      }
      TileEvent::Failed { job, error, .. } => {
        warn!("Tile {} failed: {error}", job.tile);
        done.insert(job.tile);
      }
      TileEvent::Rendered { .. } => {}
    }
  }

  view.destroy();
  info!("Wrote {written} tiles to {}", output_dir.display());
  Ok(())
}

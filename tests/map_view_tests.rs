use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use mapworkers::map::{
  coordinates::{WGS84Coordinate, viewport_tiles},
  data_source::{DataSourceKind, METADATA_FILE},
  map_view::{DEFAULT_START_ZOOM_LEVEL, MapView},
  rendering_context::Viewport,
  theme::{InternalTheme, ThemeDescriptor},
  worker::TileEvent,
  worker_pool::{PoolError, PoolSettings},
};

const WIDTH: u32 = 512;
const HEIGHT: u32 = 512;
const START_ZOOM: u8 = 12;

fn start() -> WGS84Coordinate {
  WGS84Coordinate::new(52.52, 13.405)
}

/// Writes a map covering the view around the start position at the start zoom level.
fn write_map(dir: &Path) {
  std::fs::write(
    dir.join(METADATA_FILE),
    r#"{
      "bounding_box": { "min_lat": 52.0, "min_lon": 12.8, "max_lat": 53.0, "max_lon": 14.0 },
      "start_position": { "lat": 52.52, "lon": 13.405 },
      "start_zoom": 12,
      "max_zoom": 18
    }"#,
  )
  .unwrap();
  let image = RgbaImage::from_pixel(256, 256, Rgba([30, 160, 60, 255]));
  for (tile, _) in viewport_tiles(start(), START_ZOOM, WIDTH, HEIGHT, 256) {
    image
      .save(dir.join(format!("{}_{}_{}.png", tile.zoom, tile.x, tile.y)))
      .unwrap();
  }
}

fn view(dir: &Path, viewport: Viewport) -> (MapView, Receiver<TileEvent>) {
  let (sender, receiver) = mpsc::channel();
  let settings = PoolSettings {
    worker_count: 2,
    viewport,
    data_source: DataSourceKind::MapFile,
    map_target: Some(dir.to_path_buf()),
    ..PoolSettings::default()
  };
  (MapView::with_defaults(settings, sender).unwrap(), receiver)
}

fn collect(receiver: &Receiver<TileEvent>, count: usize) -> Vec<TileEvent> {
  let deadline = Instant::now() + Duration::from_secs(10);
  let mut events = Vec::new();
  while events.len() < count {
    match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
      Ok(event) => events.push(event),
      Err(_) => break,
    }
  }
  events
}

#[test]
fn test_view_starts_at_start_position() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (view, _receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  let position = view.position();
  assert_eq!(position.center, start());
  assert_eq!(position.zoom, START_ZOOM);
  assert_eq!(view.max_zoom_level(), 18);
  assert!(view.has_valid_center());
}

#[test]
fn test_renders_the_viewport() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  let requested = view.set_center_and_zoom(start(), START_ZOOM);
  assert!(requested > 0);
  assert!(requested <= Viewport::new(WIDTH, HEIGHT).tile_capacity(256));

  let events = collect(&receiver, requested);
  assert_eq!(events.len(), requested);
  for event in &events {
    let TileEvent::Rendered { image, .. } = event else {
      panic!("render failed: {event:?}");
    };
    assert_eq!(image.dimensions(), (256, 256));
    assert!(view.tile_loaded(event));
  }
  assert_eq!(view.loaded_tiles(), requested);

  // Loaded tiles are not requested again.
  assert_eq!(view.redraw_tiles(), 0);
  assert_eq!(view.pool().queued_jobs(), 0);
}

#[test]
fn test_theme_change_invalidates_loaded_tiles() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  let requested = view.set_center_and_zoom(start(), START_ZOOM);
  let old_events = collect(&receiver, requested);
  assert_eq!(old_events.len(), requested);

  view
    .set_render_theme(ThemeDescriptor::Internal(InternalTheme::Night))
    .unwrap();
  assert_eq!(view.pool().context().theme.name, "night");
  assert!(old_events.iter().all(|e| !view.tile_loaded(e)));
  assert_eq!(view.loaded_tiles(), 0);

  let new_events = collect(&receiver, requested);
  assert_eq!(new_events.len(), requested);
  assert!(new_events.iter().all(|e| view.tile_loaded(e)));
  assert_eq!(view.loaded_tiles(), requested);
}

#[test]
fn test_missing_map_file() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  let result = view.set_map_file(dir.path().join("missing"));
  assert!(matches!(result, Err(PoolError::SourceUnavailable { .. })));
  assert!(!view.has_valid_center());
  assert_eq!(view.pool().open_handles(), 0);

  // Requested tiles fail instead of hanging.
  let requested = view.redraw_tiles();
  let events = collect(&receiver, requested);
  assert_eq!(events.len(), requested);
  assert!(events.iter().all(|e| !e.is_rendered()));

  let swap = view.set_map_file(dir.path().to_path_buf());
  assert!(swap.is_ok());
  assert!(view.has_valid_center());
}

#[test]
fn test_zoom_stays_within_limits() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, _receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  assert!(view.zoom(1));
  assert_eq!(view.position().zoom, START_ZOOM + 1);
  assert!(!view.zoom(10));
  assert_eq!(view.position().zoom, START_ZOOM + 1);
  assert_eq!(view.limit_zoom_level(25), 18);
}

#[test]
fn test_nothing_is_requested_without_a_size() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::default());

  assert_eq!(view.redraw_tiles(), 0);
  assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());

  view.on_size_changed(WIDTH, HEIGHT).unwrap();
  assert_eq!(view.pool().context().viewport, Viewport::new(WIDTH, HEIGHT));
  assert!(!collect(&receiver, 1).is_empty());
}

#[test]
fn test_destroy_stops_the_pool() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, _receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  view.on_pause();
  view.on_resume();
  view.destroy();
  assert!(view.pool().is_shut_down());
  assert!(view.pool().all_finished());
  assert_eq!(view.pool().open_handles(), 0);
}

#[test]
fn test_start_zoom_defaults_to_sixteen() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(
    dir.path().join(METADATA_FILE),
    r#"{ "bounding_box": { "min_lat": 52.0, "min_lon": 12.8, "max_lat": 53.0, "max_lon": 14.0 } }"#,
  )
  .unwrap();
  let (view, _receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  assert_eq!(view.position().zoom, DEFAULT_START_ZOOM_LEVEL);
  assert_eq!(DEFAULT_START_ZOOM_LEVEL, 16);
}

#[test]
fn test_tiles_in_flight_are_not_requested_again() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  let requested = view.set_center_and_zoom(start(), START_ZOOM);
  let events = collect(&receiver, requested);
  assert_eq!(events.len(), requested);

  // Rendered but not reported to the view yet.
  assert_eq!(view.redraw_tiles(), 0);
  assert_eq!(view.pending_tiles(), requested);
  assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());

  assert!(events.iter().all(|e| view.tile_loaded(e)));
  assert_eq!(view.pending_tiles(), 0);
  assert_eq!(view.redraw_tiles(), 0);
}

#[test]
fn test_failed_tiles_are_requested_again() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));
  let _ = view.set_map_file(dir.path().join("missing"));

  let requested = view.redraw_tiles();
  assert!(requested > 0);
  let events = collect(&receiver, requested);
  assert_eq!(events.len(), requested);
  assert!(events.iter().all(|e| !view.tile_loaded(e)));
  assert_eq!(view.pending_tiles(), 0);

  assert_eq!(view.redraw_tiles(), requested);
}

#[test]
fn test_queued_tiles_are_requested_again_while_paused() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (mut view, receiver) = view(dir.path(), Viewport::new(WIDTH, HEIGHT));

  view.on_pause();
  let requested = view.set_center_and_zoom(start(), START_ZOOM);
  assert!(requested > 0);
  assert_eq!(view.redraw_tiles(), requested);
  assert_eq!(view.pool().queued_jobs(), requested);

  view.on_resume();
  assert_eq!(collect(&receiver, requested).len(), requested);
}

#[test]
fn test_zero_tile_size_requests_a_bounded_viewport() {
  let dir = tempfile::tempdir().unwrap();
  write_map(dir.path());
  let (sender, _receiver) = mpsc::channel();
  let settings = PoolSettings {
    worker_count: 1,
    viewport: Viewport::new(8, 6),
    tile_size: 0,
    data_source: DataSourceKind::MapFile,
    map_target: Some(dir.path().to_path_buf()),
    ..PoolSettings::default()
  };
  let mut view = MapView::with_defaults(settings, sender).unwrap();
  view.on_pause();

  let requested = view.set_center_and_zoom(start(), START_ZOOM);
  assert!(requested > 0);
  assert!(requested <= Viewport::new(8, 6).tile_capacity(1));
}

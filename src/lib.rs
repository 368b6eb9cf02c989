pub mod config;
pub mod map;

pub use map::{
  job::{DataSourceId, Job},
  map_view::MapView,
  worker::TileEvent,
  worker_pool::{PoolError, PoolSettings, WorkerPool},
};

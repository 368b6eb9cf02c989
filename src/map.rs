/// Cooperative cancellation of renders in flight.
pub mod cancel;
/// Contains everything needed to handle coordinates.
pub mod coordinates;
/// Where tiles come from.
pub mod data_source;
pub mod job;
/// The shared queue the workers consume.
pub mod job_queue;
/// The owning view: position, zoom and which tiles to request.
pub mod map_view;
/// Per worker data source handle and renderer.
pub mod pipeline;
/// State every worker reads and only a paused pool may change.
pub mod rendering_context;
/// Render themes and their parsers.
pub mod theme;
/// Turn tile data into images.
pub mod tile_renderer;
pub mod worker;
/// The pool and its pause, mutate, resume protocol.
pub mod worker_pool;

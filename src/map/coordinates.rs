mod boxes;
mod coords;

/// Tiles and bounding boxes.
pub use boxes::*;
/// Coordinates.
pub use coords::*;

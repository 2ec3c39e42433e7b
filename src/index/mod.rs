//! In-memory lookup structures populated during the early passes.

mod coordinate;

pub use coordinate::CoordinateIndex;

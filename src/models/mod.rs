//! Output data model.

pub mod dump;
pub mod place;

pub use dump::{DumpHeader, PlaceLine};
pub use place::{Address, BoundingBox, CanonicalPlace, Coordinate, Extra, ObjectKind, PlaceName};

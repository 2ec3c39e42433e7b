//! Centroid resolution and coordinate transforms.

mod centroid;
pub mod transform;

pub use centroid::{centroid_of, resolve_members, CentroidAccumulator};
pub use transform::{utm_to_wgs84, Crs};

//! Centroids and extents of coordinate sets, including members resolved
//! through a [`CoordinateIndex`].

use crate::index::CoordinateIndex;
use crate::models::{BoundingBox, Coordinate};

/// Running mean (and extent) of a set of coordinates.
///
/// Holds only sums and a count, so aggregating many members never buffers
/// their coordinates.
#[derive(Debug, Clone, Default)]
pub struct CentroidAccumulator {
    sum_lon: f64,
    sum_lat: f64,
    count: usize,
    min: Option<Coordinate>,
    max: Option<Coordinate>,
}

impl CentroidAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, coordinate: Coordinate) {
        self.sum_lon += coordinate.lon;
        self.sum_lat += coordinate.lat;
        self.count += 1;

        let (min, max) = match (self.min, self.max) {
            (Some(min), Some(max)) => (
                Coordinate::new(min.lon.min(coordinate.lon), min.lat.min(coordinate.lat)),
                Coordinate::new(max.lon.max(coordinate.lon), max.lat.max(coordinate.lat)),
            ),
            _ => (coordinate, coordinate),
        };
        self.min = Some(min);
        self.max = Some(max);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Arithmetic mean, or `None` if nothing was added.
    pub fn centroid(&self) -> Option<Coordinate> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Coordinate::checked(self.sum_lon / n, self.sum_lat / n)
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        let (min, max) = (self.min?, self.max?);
        Some(BoundingBox { min, max })
    }
}

impl Extend<Coordinate> for CentroidAccumulator {
    fn extend<I: IntoIterator<Item = Coordinate>>(&mut self, iter: I) {
        for coordinate in iter {
            self.add(coordinate);
        }
    }
}

/// Mean of every member found in `index`; missing members are skipped.
///
/// Returns `None` when no member resolves, never a `(0, 0)` placeholder.
pub fn centroid_of<I>(members: I, index: &CoordinateIndex) -> Option<Coordinate>
where
    I: IntoIterator<Item = u64>,
{
    resolve_members(members, index).centroid()
}

/// Accumulate every member found in `index`.
pub fn resolve_members<I>(members: I, index: &CoordinateIndex) -> CentroidAccumulator
where
    I: IntoIterator<Item = u64>,
{
    let mut acc = CentroidAccumulator::new();
    acc.extend(members.into_iter().filter_map(|id| index.get(id)));
    acc
}

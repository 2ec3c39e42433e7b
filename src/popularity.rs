//! Popularity to importance conversion.
//!
//! Popularity is a raw, source-dependent weight. Only its log-normalized
//! importance ends up in the output.

use serde::Deserialize;

/// Log-scale bounds mapping popularity onto `[floor, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportanceScale {
    pub min_popularity: f64,
    pub max_popularity: f64,
    pub floor: f64,
}

impl Default for ImportanceScale {
    fn default() -> Self {
        Self {
            min_popularity: 1.0,
            max_popularity: 1e9,
            floor: 0.1,
        }
    }
}

impl ImportanceScale {
    pub fn new(min_popularity: f64, max_popularity: f64, floor: f64) -> Self {
        Self {
            min_popularity,
            max_popularity,
            floor,
        }
    }

    /// Importance for a positive popularity.
    ///
    /// Callers must not pass `popularity <= 0`; in debug builds this panics.
    pub fn importance(&self, popularity: f64) -> f64 {
        importance(popularity, self.min_popularity, self.max_popularity, self.floor)
    }
}

/// `floor + (log10(p) - log10(min)) / (log10(max) - log10(min)) * (1 - floor)`,
/// clamped to `[floor, 1.0]`.
pub fn importance(popularity: f64, min_popularity: f64, max_popularity: f64, floor: f64) -> f64 {
    debug_assert!(popularity > 0.0, "importance of non-positive popularity");
    let low = min_popularity.log10();
    let span = max_popularity.log10() - low;
    let scaled = floor + (popularity.log10() - low) / span * (1.0 - floor);
    scaled.clamp(floor, 1.0)
}

/// `boost_factor * product(members)`; an empty member list yields exactly
/// `boost_factor`.
pub fn group_popularity<I>(boost_factor: f64, members: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    members.into_iter().fold(boost_factor, |acc, p| acc * p)
}

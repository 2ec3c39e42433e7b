//! Source-specific converters. Each turns one input file into canonical
//! places pushed to a [`PlaceSink`](crate::output::PlaceSink).

pub mod matrikkel;
pub mod netex;
pub mod osm;
pub mod stedsnavn;

/// Hierarchy id of a municipality, e.g. `KVE:TopographicPlace:0301`.
pub fn municipality_gid(municipality_code: &str) -> String {
    format!("KVE:TopographicPlace:{}", municipality_code)
}

/// Hierarchy id of the county owning a municipality (first two digits).
pub fn county_gid(municipality_code: &str) -> String {
    let county: String = municipality_code.chars().take(2).collect();
    format!("KVE:TopographicPlace:{}", county)
}

/// `"NORDRE LAND"` → `"Nordre Land"`, `"AURSKOG-HØLAND"` → `"Aurskog-Høland"`.
pub fn titleize(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut word_start = true;
    for c in value.trim().chars() {
        if word_start {
            result.extend(c.to_uppercase());
        } else {
            result.extend(c.to_lowercase());
        }
        word_start = matches!(c, ' ' | '-' | '/' | '(');
    }
    result
}

//! Administrative hierarchy lookup (locality → county → country).
//!
//! A [`HierarchyTable`] is built once from one collection of administrative
//! units and then only read. A miss at any level leaves that level empty.

use hashbrown::HashMap;

/// Kind of administrative unit, as named by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Country,
    County,
    Municipality,
    Other,
}

impl UnitKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "country" => UnitKind::Country,
            "county" => UnitKind::County,
            "municipality" | "town" | "city" => UnitKind::Municipality,
            _ => UnitKind::Other,
        }
    }
}

/// One administrative unit.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyEntry {
    pub id: String,
    pub name: Option<String>,
    pub kind: UnitKind,
    pub parent: Option<String>,
    /// Lowercase ISO 3166-1 alpha-2 code.
    pub country_code: Option<String>,
}

/// A resolved level: the unit id and, if known, its name.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub id: String,
    pub name: Option<String>,
}

impl Level {
    fn from_entry(entry: &HierarchyEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
        }
    }
}

/// Whatever levels could be found for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedHierarchy {
    pub locality: Option<Level>,
    pub county: Option<Level>,
    pub country_code: Option<String>,
}

#[derive(Debug, Default)]
pub struct HierarchyTable {
    entries: HashMap<String, HierarchyEntry>,
}

impl HierarchyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from one full pass over a unit collection.
    pub fn build<I>(units: I) -> Self
    where
        I: IntoIterator<Item = HierarchyEntry>,
    {
        let mut table = Self::new();
        for unit in units {
            table.insert(unit);
        }
        table
    }

    pub fn insert(&mut self, entry: HierarchyEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&HierarchyEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follow `unit_ref` up to its county and country.
    ///
    /// An entity referencing a county directly gets no locality.
    pub fn resolve(&self, unit_ref: &str) -> ResolvedHierarchy {
        let mut resolved = ResolvedHierarchy::default();
        let Some(unit) = self.get(unit_ref) else {
            return resolved;
        };
        resolved.country_code = unit.country_code.clone();

        let county = match unit.kind {
            UnitKind::County => Some(unit),
            UnitKind::Country => None,
            _ => {
                resolved.locality = Some(Level::from_entry(unit));
                unit.parent.as_deref().and_then(|id| self.get(id))
            }
        };

        if let Some(county) = county {
            resolved.county = Some(Level::from_entry(county));
            if resolved.country_code.is_none() {
                resolved.country_code = county.country_code.clone().or_else(|| {
                    county
                        .parent
                        .as_deref()
                        .and_then(|id| self.get(id))
                        .and_then(|country| country.country_code.clone())
                });
            }
        }

        resolved
    }
}

//! Region names from the boundary layer, and completion of aggregate tables
//! so that every mapped region has a row.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::table::{AggregateRow, AggregateTable, Dimension};

pub const DEFAULT_REGION_PROPERTY: &str = "PLN_AREA_N";

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// Region name stored in an HTML attribute table, as KML exports do:
/// `<th>PLN_AREA_N</th> <td>BEDOK</td>`.
fn name_from_description(description: &str, property: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<th>\s*([^<]*?)\s*</th>\s*<td>\s*([^<]*?)\s*</td>")
            .expect("valid description pattern")
    });
    pattern
        .captures_iter(description)
        .find(|caps| &caps[1] == property)
        .map(|caps| caps[2].to_string())
        .filter(|name| !name.is_empty())
}

fn region_name(properties: &Map<String, Value>, property: &str) -> Option<String> {
    if let Some(name) = properties.get(property).and_then(Value::as_str) {
        return Some(name.to_string());
    }
    properties
        .get("Description")
        .and_then(Value::as_str)
        .and_then(|d| name_from_description(d, property))
}

/// The canonical set of region names known to the map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSet {
    names: BTreeSet<String>,
}

impl RegionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Collects the `property` of every feature in a GeoJSON feature
    /// collection. Sub-zones of one region collapse to a single name.
    pub fn from_geojson_str(geojson: &str, property: &str) -> PipelineResult<Self> {
        let collection: FeatureCollection = serde_json::from_str(geojson)?;
        let mut unnamed = 0usize;
        let mut names = BTreeSet::new();
        for feature in &collection.features {
            match feature.properties.as_ref().and_then(|p| region_name(p, property)) {
                Some(name) => {
                    names.insert(name);
                }
                None => unnamed += 1,
            }
        }
        if unnamed > 0 {
            warn!(features = unnamed, property, "boundary features without a region name");
        }
        if names.is_empty() {
            return Err(PipelineError::parse(format!(
                "no feature carries a {property:?} region name"
            )));
        }
        Ok(Self { names })
    }

    pub fn from_geojson_path<P: AsRef<Path>>(path: P, property: &str) -> PipelineResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_geojson_str(&raw, property)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Appends a placeholder row for every region in `regions` that has no row
/// in `table`. Placeholders carry the region name, null for every other
/// dimension and zero for every statistic.
///
/// Running it on its own output adds nothing. Tables without a town column
/// are a `SchemaMismatch`.
pub fn complete(table: &AggregateTable, regions: &RegionSet) -> PipelineResult<AggregateTable> {
    let town_pos = table.require_dimension(Dimension::Town)?;
    let present: HashSet<&str> = table
        .rows()
        .iter()
        .filter_map(|r| r.keys[town_pos].as_deref())
        .collect();

    let mut completed = table.clone();
    let mut added = 0usize;
    for region in regions.iter().filter(|r| !present.contains(r)) {
        let mut keys = vec![None; table.dimensions().len()];
        keys[town_pos] = Some(region.to_string());
        completed.push_row(AggregateRow {
            keys,
            values: vec![Some(0.0); table.columns().len()],
        })?;
        added += 1;
    }
    debug!(added, "filled regions without transactions");
    Ok(completed)
}

/// Drops rows whose town the map does not know.
pub fn restrict_to(table: &AggregateTable, regions: &RegionSet) -> PipelineResult<AggregateTable> {
    let town_pos = table.require_dimension(Dimension::Town)?;
    let kept = table.filtered(|r| {
        r.keys[town_pos]
            .as_deref()
            .is_some_and(|t| regions.contains(t))
    });
    let dropped = table.len() - kept.len();
    if dropped > 0 {
        warn!(rows = dropped, "rows for towns missing from the map left out");
    }
    Ok(kept)
}

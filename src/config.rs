use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::geo::DEFAULT_REGION_PROPERTY;
use crate::table::MeasureSet;

pub const DEFAULT_CONFIG_NAME: &str = "resale_cache.json";

/// How date filtering treats rows whose month is null or malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullMonthPolicy {
    /// Such rows take month index 0 and match only ranges starting at 0.
    SortFirst,
    /// Such rows never match a date range.
    #[default]
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub raw_files: Vec<PathBuf>,
    pub reference: PathBuf,
    pub region_property: String,
    pub cache_dir: PathBuf,
    pub measures: MeasureSet,
    pub null_months: NullMonthPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let raw = Path::new("data/resale_price_data");
        Self {
            raw_files: [
                "ResaleFlatPricesBasedonApprovalDate19901999.csv",
                "ResaleFlatPricesBasedonApprovalDate2000Feb2012.csv",
                "ResaleFlatPricesBasedonRegistrationDateFromMar2012toDec2014.csv",
                "ResaleFlatPricesBasedonRegistrationDateFromJan2015toDec2016.csv",
                "ResaleflatpricesbasedonregistrationdatefromJan2017onwards.csv",
            ]
            .iter()
            .map(|name| raw.join(name))
            .collect(),
            reference: PathBuf::from("data/map_data/SubzoneBoundaryProcessed.geojson"),
            region_property: DEFAULT_REGION_PROPERTY.to_string(),
            cache_dir: raw.join("processed_data"),
            measures: MeasureSet::default(),
            null_months: NullMonthPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config. Relative paths in it are taken relative to the
    /// file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolve_paths(base))
    }

    /// Like [`PipelineConfig::load`], falling back to the defaults resolved
    /// against the current directory when `path` does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads `dir/resale_cache.json`, writing the defaults there first when
    /// it does not exist yet.
    pub fn load_or_init(dir: &Path) -> PipelineResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(DEFAULT_CONFIG_NAME);
        if path.exists() {
            return Self::load(&path);
        }
        let default = PipelineConfig::default();
        fs::write(&path, serde_json::to_string_pretty(&default)?)?;
        Ok(default.resolve_paths(dir))
    }

    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.raw_files = self.raw_files.iter().map(|p| resolve(p.as_path())).collect();
        self.reference = resolve(self.reference.as_path());
        self.cache_dir = resolve(self.cache_dir.as_path());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults_and_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_NAME);
        fs::write(
            &path,
            r#"{"raw_files": ["raw/a.csv"], "measures": "floor_area", "null_months": "sort_first"}"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.raw_files, vec![dir.path().join("raw/a.csv")]);
        assert_eq!(config.measures, MeasureSet::FloorArea);
        assert_eq!(config.null_months, NullMonthPolicy::SortFirst);
        assert_eq!(config.region_property, "PLN_AREA_N");
        assert_eq!(config.cache_dir, dir.path().join("data/resale_price_data/processed_data"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.raw_files.len(), 5);
    }

    #[test]
    fn init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        let first = PipelineConfig::load_or_init(&root).unwrap();
        let path = root.join(DEFAULT_CONFIG_NAME);
        assert!(path.is_file());
        assert_eq!(first.cache_dir, root.join("data/resale_price_data/processed_data"));

        fs::write(&path, r#"{"cache_dir": "elsewhere"}"#).unwrap();
        let second = PipelineConfig::load_or_init(&root).unwrap();
        assert_eq!(second.cache_dir, root.join("elsewhere"));
    }
}

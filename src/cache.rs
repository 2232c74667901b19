//! The derived-data cache: a directory tree of pre-aggregated tables, built
//! once offline and read back at dashboard time.
//!
//! Layout under the cache root:
//!
//! ```text
//! .resale_cache
//! overview_by_month.csv
//! overview_by_month_and_town.csv
//! detailed_overview_by_month.csv
//! detailed_overview_by_month_and_town.csv
//! flat_type_data/{value}_overview.csv
//! storey_range_data/{value}_overview.csv
//! towns/{town}/{town}_overview.csv
//! towns/{town}/{town}_flat_type_data/{value}_overview.csv
//! towns/{town}/{town}_storey_range_data/{value}_overview.csv
//! ```
//!
//! Town and category values become path tokens through [`sanitize_token`].
//! The tree carries no record of the source data it came from; rebuild it
//! wholesale whenever the raw files change. The `.resale_cache` marker is
//! what allows a rebuild to delete an existing root.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::error::{PipelineError, PipelineResult};
use crate::normalize::TransactionRecord;
use crate::table::{AggregateTable, Category, Dimension, MeasureSet};

/// File at the root of every built tree.
pub const CACHE_MARKER: &str = ".resale_cache";

/// Identifies one persisted table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    OverviewByMonth,
    OverviewByMonthAndTown,
    DetailedOverviewByMonth,
    DetailedOverviewByMonthAndTown,
    CategoryOverview {
        category: Category,
        value: String,
    },
    TownOverview {
        town: String,
    },
    TownCategoryOverview {
        town: String,
        category: Category,
        value: String,
    },
}

impl CacheKey {
    /// Grouping dimensions of the table stored under this key.
    pub fn dimensions(&self) -> Vec<Dimension> {
        match self {
            CacheKey::OverviewByMonth => vec![Dimension::Month],
            CacheKey::OverviewByMonthAndTown | CacheKey::TownOverview { .. } => {
                vec![Dimension::Town, Dimension::Month]
            }
            CacheKey::DetailedOverviewByMonth => vec![
                Dimension::Month,
                Dimension::StoreyRange,
                Dimension::FlatType,
            ],
            CacheKey::DetailedOverviewByMonthAndTown => vec![
                Dimension::Town,
                Dimension::Month,
                Dimension::FlatType,
                Dimension::StoreyRange,
            ],
            CacheKey::CategoryOverview { category, .. } => {
                vec![category.dimension(), Dimension::Month]
            }
            CacheKey::TownCategoryOverview { category, .. } => {
                vec![Dimension::Town, category.dimension(), Dimension::Month]
            }
        }
    }

    /// Location of the table relative to the cache root.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            CacheKey::OverviewByMonth => PathBuf::from("overview_by_month.csv"),
            CacheKey::OverviewByMonthAndTown => PathBuf::from("overview_by_month_and_town.csv"),
            CacheKey::DetailedOverviewByMonth => PathBuf::from("detailed_overview_by_month.csv"),
            CacheKey::DetailedOverviewByMonthAndTown => {
                PathBuf::from("detailed_overview_by_month_and_town.csv")
            }
            CacheKey::CategoryOverview { category, value } => Path::new(&category_dir(*category))
                .join(format!("{}_overview.csv", sanitize_token(value))),
            CacheKey::TownOverview { town } => {
                let town = sanitize_token(town);
                Path::new("towns")
                    .join(&town)
                    .join(format!("{town}_overview.csv"))
            }
            CacheKey::TownCategoryOverview {
                town,
                category,
                value,
            } => {
                let town = sanitize_token(town);
                Path::new("towns")
                    .join(&town)
                    .join(format!("{town}_{}", category_dir(*category)))
                    .join(format!("{}_overview.csv", sanitize_token(value)))
            }
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::OverviewByMonth => write!(f, "overview by month"),
            CacheKey::OverviewByMonthAndTown => write!(f, "overview by month and town"),
            CacheKey::DetailedOverviewByMonth => write!(f, "detailed overview by month"),
            CacheKey::DetailedOverviewByMonthAndTown => {
                write!(f, "detailed overview by month and town")
            }
            CacheKey::CategoryOverview { category, value } => {
                write!(f, "{} {value:?} overview", category.name())
            }
            CacheKey::TownOverview { town } => write!(f, "{town:?} overview"),
            CacheKey::TownCategoryOverview {
                town,
                category,
                value,
            } => write!(f, "{town:?} {} {value:?} overview", category.name()),
        }
    }
}

fn category_dir(category: Category) -> String {
    format!("{}_data", category.name())
}

/// Filesystem-safe token for a town or category value: path separators
/// become `-` and spaces become `_`. Empty, `.` and `..` get a `_` prefix
/// so every token names a real child directory.
pub fn sanitize_token(name: &str) -> String {
    let token: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            ' ' => '_',
            c => c,
        })
        .collect();
    match token.as_str() {
        "" | "." | ".." => format!("_{token}"),
        _ => token,
    }
}

/// Fails if two distinct values of `dimension` sanitize to the same token.
pub fn check_tokens<'a, I>(dimension: &str, values: I) -> PipelineResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashMap<String, &str> = HashMap::new();
    for value in values {
        let token = sanitize_token(value);
        match seen.get(&token) {
            Some(first) if *first != value => {
                return Err(PipelineError::PartitionCollision {
                    dimension: dimension.to_string(),
                    token,
                    first: first.to_string(),
                    second: value.to_string(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(token, value);
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub records: usize,
    pub tables_written: usize,
    pub towns: usize,
    pub category_values: BTreeMap<Category, usize>,
}

pub struct DerivedCache {
    root: PathBuf,
}

impl DerivedCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Reads back the table stored under `key`. A key that was never built
    /// is `NotFound`; an unreadable or malformed file is reported as such.
    pub fn load(&self, key: &CacheKey) -> PipelineResult<AggregateTable> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Err(PipelineError::not_found(format!("{key} ({})", path.display())));
        }
        let table = AggregateTable::from_path(&path)?;
        let expected: BTreeSet<_> = key.dimensions().into_iter().collect();
        let found: BTreeSet<_> = table.dimensions().iter().copied().collect();
        if expected != found {
            return Err(PipelineError::schema(format!(
                "{} holds [{}], expected grouping on {:?}",
                path.display(),
                table.headers().join(","),
                expected.iter().map(Dimension::name).collect::<Vec<_>>()
            )));
        }
        Ok(table)
    }

    /// Aggregates `records` into every table of the tree and replaces the
    /// existing tree in one step. The new tree is assembled next to the root
    /// and only moved into place once complete.
    ///
    /// Not safe to run concurrently with another build of the same root.
    pub fn build_all(
        &self,
        records: &[TransactionRecord],
        measures: MeasureSet,
    ) -> PipelineResult<BuildReport> {
        self.check_replaceable()?;
        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let mut report = BuildReport {
            records: records.len(),
            ..Default::default()
        };
        let staged = DerivedCache::new(&staging);
        fs::write(staging.join(CACHE_MARKER), env!("CARGO_PKG_VERSION"))?;

        for key in [
            CacheKey::OverviewByMonth,
            CacheKey::DetailedOverviewByMonth,
            CacheKey::DetailedOverviewByMonthAndTown,
        ] {
            let table = aggregate(records, &key.dimensions(), measures)?;
            staged.store(&key, table)?;
            report.tables_written += 1;
        }

        let by_town = aggregate(records, &CacheKey::OverviewByMonthAndTown.dimensions(), measures)?;
        let town_parts = by_town.partition_by(Dimension::Town)?;
        check_tokens(Dimension::Town.name(), town_parts.iter().map(|(t, _)| t.as_str()))?;
        report.towns = town_parts.len();
        staged.store(&CacheKey::OverviewByMonthAndTown, by_town)?;
        report.tables_written += 1;
        for (town, table) in town_parts {
            staged.store(&CacheKey::TownOverview { town }, table)?;
            report.tables_written += 1;
        }

        for category in Category::ALL {
            let dim = category.dimension();

            let overall = aggregate(records, &[dim, Dimension::Month], measures)?;
            let parts = overall.partition_by(dim)?;
            check_tokens(dim.name(), parts.iter().map(|(v, _)| v.as_str()))?;
            report.category_values.insert(category, parts.len());
            for (value, table) in parts {
                staged.store(&CacheKey::CategoryOverview { category, value }, table)?;
                report.tables_written += 1;
            }

            let per_town = aggregate(records, &[Dimension::Town, dim, Dimension::Month], measures)?;
            for (town, town_table) in per_town.partition_by(Dimension::Town)? {
                for (value, table) in town_table.partition_by(dim)? {
                    let key = CacheKey::TownCategoryOverview {
                        town: town.clone(),
                        category,
                        value,
                    };
                    staged.store(&key, table)?;
                    report.tables_written += 1;
                }
            }
        }

        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::rename(&staging, &self.root)?;

        info!(
            root = %self.root.display(),
            records = report.records,
            tables = report.tables_written,
            towns = report.towns,
            "derived cache built"
        );
        Ok(report)
    }

    /// The root may be replaced only if it is absent, empty, or a tree this
    /// crate built.
    fn check_replaceable(&self) -> PipelineResult<()> {
        let unsafe_root = |reason: &str| PipelineError::UnsafeCacheRoot {
            path: self.root.display().to_string(),
            reason: reason.to_string(),
        };
        if self.root.file_name().is_none() {
            return Err(unsafe_root("cache root must name a directory of its own"));
        }
        if !self.root.exists() {
            return Ok(());
        }
        if !self.root.is_dir() {
            return Err(unsafe_root("not a directory"));
        }
        if self.root.join(CACHE_MARKER).is_file() || fs::read_dir(&self.root)?.next().is_none() {
            Ok(())
        } else {
            Err(unsafe_root("existing directory is not a cache tree"))
        }
    }

    fn store(&self, key: &CacheKey, mut table: AggregateTable) -> PipelineResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        table.sort_by_dimensions();
        table.write_to_path(&path)?;
        debug!(path = %path.display(), rows = table.len(), "wrote cache table");
        Ok(())
    }

    fn staging_dir(&self) -> PathBuf {
        let mut name = self
            .root
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cache".into());
        name.push(".staging");
        self.root.with_file_name(name)
    }
}

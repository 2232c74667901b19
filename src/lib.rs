//! Offline aggregation of housing resale transactions into a tree of
//! summary tables, and the filtering the dashboard applies when reading
//! them back.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod month;
pub mod normalize;
pub mod query;
pub mod record;
pub mod table;

pub use aggregate::aggregate;
pub use cache::{BuildReport, CacheKey, DerivedCache};
pub use config::{NullMonthPolicy, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use geo::{complete, RegionSet};
pub use month::Month;
pub use normalize::{normalize, StoreyBucket, TransactionRecord};
pub use query::{
    filter_by_category, filter_by_date, statistics_median_by_town, CategoryChoice,
    DashboardContext, DateRange, FilterState,
};
pub use record::{load_raw_files, RawRecord};
pub use table::{AggregateRow, AggregateTable, Category, Dimension, Measure, MeasureSet, Statistic};

/// Loads the raw files, normalizes them and rebuilds the whole cache tree.
pub fn run_build(config: &PipelineConfig) -> PipelineResult<BuildReport> {
    let raw = load_raw_files(&config.raw_files)?;
    let records = normalize(&raw);
    DerivedCache::new(&config.cache_dir).build_all(&records, config.measures)
}

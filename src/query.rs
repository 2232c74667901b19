//! Online side of the dashboard: picks the cached table a filter needs and
//! narrows it to the selected months and categories.
//!
//! Nothing here returns an error to the caller. A missing table or a table
//! without the column a filter needs is logged and turns into an empty
//! result, so a chart shows "no data" instead of failing. An unreadable date
//! bound falls back to month index 0.

use std::collections::BTreeMap;

use tracing::warn;

use crate::aggregate::Sample;
use crate::cache::{CacheKey, DerivedCache};
use crate::config::{NullMonthPolicy, PipelineConfig};
use crate::error::PipelineResult;
use crate::geo::{complete, restrict_to, RegionSet};
use crate::month::{Month, UNKNOWN_MONTH_INDEX};
use crate::table::{
    AggregateRow, AggregateTable, Category, Dimension, Measure, MeasureSet, Statistic, Summary,
};

/// Sentinel category value meaning "do not filter".
pub const ALL: &str = "All";

/// Inclusive range of month indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: i64,
    end: i64,
}

impl DateRange {
    pub fn from_indices(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn from_months(start: Month, end: Month) -> Self {
        Self::from_indices(start.index(), end.index())
    }

    /// Parses "YYYY-MM" bounds. An unreadable bound becomes month index 0.
    pub fn parse(start: &str, end: &str) -> Self {
        let bound = |label: &str| match Month::parse(label) {
            Ok(m) => m.index(),
            Err(e) => {
                warn!(label, error = %e, "date bound falls back to month index 0");
                UNKNOWN_MONTH_INDEX
            }
        };
        Self::from_indices(bound(start), bound(end))
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn contains(&self, index: i64) -> bool {
        self.start <= index && index <= self.end
    }

    /// Caption for the range slider.
    pub fn describe(&self) -> String {
        let label = |index: i64| {
            Month::from_index(index).map_or_else(|| "unknown".to_string(), |m| m.label())
        };
        format!(
            "Showing data from between {} and {}",
            label(self.start),
            label(self.end)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryChoice {
    #[default]
    All,
    Only(String),
}

impl CategoryChoice {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == ALL || value.is_empty() {
            CategoryChoice::All
        } else {
            CategoryChoice::Only(value.to_string())
        }
    }
}

/// What the user has selected: a date range plus one choice per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    pub date_range: DateRange,
    pub category_filters: BTreeMap<Category, CategoryChoice>,
}

impl FilterState {
    pub fn new(date_range: DateRange) -> Self {
        Self {
            date_range,
            category_filters: Category::ALL
                .into_iter()
                .map(|c| (c, CategoryChoice::All))
                .collect(),
        }
    }

    /// Builds the state from raw widget values.
    pub fn from_widgets(start: &str, end: &str, choices: &[(Category, &str)]) -> Self {
        choices.iter().fold(
            Self::new(DateRange::parse(start, end)),
            |state, (category, value)| state.with_category(*category, CategoryChoice::parse(value)),
        )
    }

    pub fn with_category(mut self, category: Category, choice: CategoryChoice) -> Self {
        self.category_filters.insert(category, choice);
        self
    }

    /// Categories restricted to a single value.
    pub fn active(&self) -> Vec<(Category, &str)> {
        self.category_filters
            .iter()
            .filter_map(|(category, choice)| match choice {
                CategoryChoice::All => None,
                CategoryChoice::Only(value) => Some((*category, value.as_str())),
            })
            .collect()
    }
}

/// Keeps the rows whose month lies in `range`.
pub fn filter_by_date(
    range: &DateRange,
    table: &AggregateTable,
    policy: NullMonthPolicy,
) -> AggregateTable {
    let Some(pos) = table.dimension_position(Dimension::Month) else {
        warn!(columns = %table.headers().join(","), "date filter on a table without months");
        return table.empty_like();
    };
    table.filtered(|row| {
        match row.keys[pos].as_deref().and_then(|l| Month::parse(l).ok()) {
            Some(month) => range.contains(month.index()),
            None => policy == NullMonthPolicy::SortFirst && range.contains(UNKNOWN_MONTH_INDEX),
        }
    })
}

/// Keeps the rows whose `dimension` equals `value` exactly.
pub fn filter_by_dimension(
    dimension: Dimension,
    value: &str,
    table: &AggregateTable,
) -> AggregateTable {
    let Some(pos) = table.dimension_position(dimension) else {
        warn!(dimension = dimension.name(), "filter on a table without that column");
        return table.empty_like();
    };
    table.filtered(|row| row.keys[pos].as_deref() == Some(value))
}

pub fn filter_by_category(
    category: Category,
    choice: &CategoryChoice,
    table: &AggregateTable,
) -> AggregateTable {
    match choice {
        CategoryChoice::All => table.clone(),
        CategoryChoice::Only(value) => filter_by_dimension(category.dimension(), value, table),
    }
}

/// Date range and every category choice; each narrows independently, so
/// the order does not matter.
pub fn apply_filters(
    filter: &FilterState,
    table: &AggregateTable,
    policy: NullMonthPolicy,
) -> AggregateTable {
    filter
        .category_filters
        .iter()
        .fold(filter_by_date(&filter.date_range, table, policy), |t, (category, choice)| {
            filter_by_category(*category, choice, &t)
        })
}

/// One row per town holding the median, across the town's rows, of every
/// `_median` column. Over a town-by-month table this is a median of
/// monthly medians, not the median of the underlying transactions.
pub fn statistics_median_by_town(table: &AggregateTable) -> AggregateTable {
    let medians: Vec<(usize, _)> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.statistic == Statistic::Median)
        .map(|(i, c)| (i, *c))
        .collect();
    let mut out = AggregateTable::new(
        vec![Dimension::Town],
        medians.iter().map(|(_, c)| *c).collect(),
    );
    let Some(town_pos) = table.dimension_position(Dimension::Town) else {
        warn!(columns = %table.headers().join(","), "median by town on a table without towns");
        return out;
    };

    let mut towns: Vec<(&str, Vec<Sample>)> = Vec::new();
    for row in table.rows() {
        let Some(town) = row.keys[town_pos].as_deref() else {
            continue;
        };
        let slot = match towns.iter().position(|(t, _)| *t == town) {
            Some(slot) => slot,
            None => {
                towns.push((town, vec![Sample::new(); medians.len()]));
                towns.len() - 1
            }
        };
        for (sample, (pos, _)) in towns[slot].1.iter_mut().zip(&medians) {
            if let Some(v) = row.values[*pos] {
                sample.add(v);
            }
        }
    }

    for (town, samples) in towns {
        let row = AggregateRow {
            keys: vec![Some(town.to_string())],
            values: samples.iter().map(Sample::median).collect(),
        };
        if let Err(e) = out.push_row(row) {
            warn!(error = %e, "median by town row rejected");
        }
    }
    out
}

/// One box of the distribution chart.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxPoint {
    pub month: String,
    pub summary: Summary,
}

/// Per-month five-number summaries of `measure`, oldest first. Rows outside
/// `range` or without a full summary are left out.
pub fn box_series(
    table: &AggregateTable,
    measure: Measure,
    range: &DateRange,
    policy: NullMonthPolicy,
) -> Vec<BoxPoint> {
    let mut filtered = filter_by_date(range, table, policy);
    filtered.sort_by_dimensions();
    filtered
        .rows()
        .iter()
        .filter_map(|row| {
            let month = filtered.key(row, Dimension::Month)?;
            let summary = filtered.summary(row, measure)?;
            Some(BoxPoint {
                month: month.to_string(),
                summary,
            })
        })
        .collect()
}

/// Everything the dashboard reads, loaded once at start-up and shared by
/// reference with every callback.
pub struct DashboardContext {
    cache: DerivedCache,
    regions: RegionSet,
    measures: MeasureSet,
    null_months: NullMonthPolicy,
}

impl DashboardContext {
    pub fn new(
        cache: DerivedCache,
        regions: RegionSet,
        measures: MeasureSet,
        null_months: NullMonthPolicy,
    ) -> Self {
        Self {
            cache,
            regions,
            measures,
            null_months,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let regions = RegionSet::from_geojson_path(&config.reference, &config.region_property)?;
        Ok(Self::new(
            DerivedCache::new(&config.cache_dir),
            regions,
            config.measures,
            config.null_months,
        ))
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    /// The cached table for `key`, or an empty table of the same shape when
    /// it cannot be read.
    pub fn get_overview(&self, key: &CacheKey) -> AggregateTable {
        match self.cache.load(key) {
            Ok(table) => table,
            Err(e) => {
                warn!(key = %key, error = %e, "serving empty table");
                AggregateTable::new(key.dimensions(), self.measures.columns())
            }
        }
    }

    pub fn filter(&self, filter: &FilterState, table: &AggregateTable) -> AggregateTable {
        apply_filters(filter, table, self.null_months)
    }

    /// The narrowest cached table that can answer `filter` for one town or
    /// for all towns.
    pub fn select_key(filter: &FilterState, town: Option<&str>) -> CacheKey {
        let active = filter.active();
        match (town, active.as_slice()) {
            (None, []) => CacheKey::OverviewByMonth,
            (None, [(category, value)]) => CacheKey::CategoryOverview {
                category: *category,
                value: value.to_string(),
            },
            (None, _) => CacheKey::DetailedOverviewByMonth,
            (Some(town), []) => CacheKey::TownOverview {
                town: town.to_string(),
            },
            (Some(town), [(category, value)]) => CacheKey::TownCategoryOverview {
                town: town.to_string(),
                category: *category,
                value: value.to_string(),
            },
            (Some(_), _) => CacheKey::DetailedOverviewByMonthAndTown,
        }
    }

    /// Time series for the current selection, oldest month first.
    pub fn query(&self, filter: &FilterState, town: Option<&str>) -> AggregateTable {
        let key = Self::select_key(filter, town);
        let mut table = self.get_overview(&key);
        if let (Some(town), CacheKey::DetailedOverviewByMonthAndTown) = (town, &key) {
            table = filter_by_dimension(Dimension::Town, town, &table);
        }
        let mut table = self.filter(filter, &table);
        table.sort_by_dimensions();
        table
    }

    /// Choropleth data: one row per mapped region with the median of its
    /// monthly medians over the selection, zero for regions without sales.
    pub fn map_view(&self, filter: &FilterState) -> AggregateTable {
        let filtered = self.filter(filter, &self.town_series(filter));
        let by_town = statistics_median_by_town(&filtered);
        let completed =
            restrict_to(&by_town, &self.regions).and_then(|t| complete(&t, &self.regions));
        match completed {
            Ok(mut table) => {
                table.sort_by_dimensions();
                table
            }
            Err(e) => {
                warn!(error = %e, "map view unavailable");
                by_town.empty_like()
            }
        }
    }

    /// Rows with one (town, month) pair each once `filter` is applied.
    fn town_series(&self, filter: &FilterState) -> AggregateTable {
        let (category, value) = match filter.active().as_slice() {
            [] => return self.get_overview(&CacheKey::OverviewByMonthAndTown),
            [(category, value)] => (*category, value.to_string()),
            _ => return self.get_overview(&CacheKey::DetailedOverviewByMonthAndTown),
        };

        let mut combined: Option<AggregateTable> = None;
        for town in self.regions.iter() {
            let key = CacheKey::TownCategoryOverview {
                town: town.to_string(),
                category,
                value: value.clone(),
            };
            let table = match self.cache.load(&key) {
                Ok(table) => table,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "town left out of map");
                    continue;
                }
            };
            let out = combined.get_or_insert_with(|| table.empty_like());
            for row in table.rows() {
                if let Err(e) = out.push_row(row.clone()) {
                    warn!(key = %key, error = %e, "town left out of map");
                    break;
                }
            }
        }
        combined.unwrap_or_else(|| {
            AggregateTable::new(
                vec![Dimension::Town, category.dimension(), Dimension::Month],
                self.measures.columns(),
            )
        })
    }
}

//! Aggregate tables: rows keyed by grouping dimensions, carrying flattened
//! `{measure}_{statistic}` columns, and their CSV form on disk.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, Writer};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Town,
    Month,
    FlatType,
    StoreyRange,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Town,
        Dimension::Month,
        Dimension::FlatType,
        Dimension::StoreyRange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Town => "town",
            Dimension::Month => "month",
            Dimension::FlatType => "flat_type",
            Dimension::StoreyRange => "storey_range",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

/// Dimensions the dashboard exposes as filter widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FlatType,
    StoreyRange,
}

pub const FLAT_TYPE_OPTIONS: [&str; 6] = [
    "2 ROOM",
    "3 ROOM",
    "4 ROOM",
    "5 ROOM",
    "EXECUTIVE",
    "MULTI GENERATION",
];

pub const STOREY_RANGE_OPTIONS: [&str; 4] = ["very low", "low", "mid", "high"];

impl Category {
    pub const ALL: [Category; 2] = [Category::FlatType, Category::StoreyRange];

    pub fn dimension(&self) -> Dimension {
        match self {
            Category::FlatType => Dimension::FlatType,
            Category::StoreyRange => Dimension::StoreyRange,
        }
    }

    pub fn name(&self) -> &'static str {
        self.dimension().name()
    }

    /// Values offered by the filter widget for this category.
    pub fn options(&self) -> &'static [&'static str] {
        match self {
            Category::FlatType => &FLAT_TYPE_OPTIONS,
            Category::StoreyRange => &STOREY_RANGE_OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    ResalePrice,
    FloorAreaSqm,
    PricePerSqm,
}

impl Measure {
    pub const ALL: [Measure; 3] = [
        Measure::ResalePrice,
        Measure::FloorAreaSqm,
        Measure::PricePerSqm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Measure::ResalePrice => "resale_price",
            Measure::FloorAreaSqm => "floor_area_sqm",
            Measure::PricePerSqm => "price_per_sqm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Statistic {
    Median,
    Min,
    Max,
    Quantile25,
    Quantile75,
}

impl Statistic {
    pub const ALL: [Statistic; 5] = [
        Statistic::Median,
        Statistic::Min,
        Statistic::Max,
        Statistic::Quantile25,
        Statistic::Quantile75,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Statistic::Median => "median",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Quantile25 => "quantile_25",
            Statistic::Quantile75 => "quantile_75",
        }
    }
}

/// Which measures the aggregation tracks. Earlier cache generations tracked
/// floor area instead of price per square metre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureSet {
    #[default]
    PricePerSqm,
    FloorArea,
}

impl MeasureSet {
    pub fn measures(&self) -> &'static [Measure] {
        match self {
            MeasureSet::PricePerSqm => &[Measure::ResalePrice, Measure::PricePerSqm],
            MeasureSet::FloorArea => &[Measure::ResalePrice, Measure::FloorAreaSqm],
        }
    }

    pub fn columns(&self) -> Vec<StatColumn> {
        self.measures()
            .iter()
            .flat_map(|&measure| {
                Statistic::ALL
                    .into_iter()
                    .map(move |statistic| StatColumn { measure, statistic })
            })
            .collect()
    }
}

/// Joins column levels with `_`, dropping the trailing separator left by an
/// empty level (`["town", ""]` flattens to `town`).
pub fn flatten_column(levels: &[&str]) -> String {
    levels.join("_").trim_end_matches('_').to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatColumn {
    pub measure: Measure,
    pub statistic: Statistic,
}

impl StatColumn {
    pub fn new(measure: Measure, statistic: Statistic) -> Self {
        Self { measure, statistic }
    }

    pub fn name(&self) -> String {
        flatten_column(&[self.measure.name(), self.statistic.name()])
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Measure::ALL
            .into_iter()
            .cartesian_product(Statistic::ALL)
            .map(|(measure, statistic)| StatColumn { measure, statistic })
            .find(|col| col.name() == name)
    }
}

/// Five-number summary of one measure within one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub quantile_25: f64,
    pub quantile_75: f64,
}

impl Summary {
    pub fn zero() -> Self {
        Self {
            median: 0.0,
            min: 0.0,
            max: 0.0,
            quantile_25: 0.0,
            quantile_75: 0.0,
        }
    }

    pub fn get(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Median => self.median,
            Statistic::Min => self.min,
            Statistic::Max => self.max,
            Statistic::Quantile25 => self.quantile_25,
            Statistic::Quantile75 => self.quantile_75,
        }
    }

    /// `min <= p25 <= median <= p75 <= max`. False for any NaN.
    pub fn is_ordered(&self) -> bool {
        self.min <= self.quantile_25
            && self.quantile_25 <= self.median
            && self.median <= self.quantile_75
            && self.quantile_75 <= self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub keys: Vec<Option<String>>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    dimensions: Vec<Dimension>,
    columns: Vec<StatColumn>,
    rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn new(dimensions: Vec<Dimension>, columns: Vec<StatColumn>) -> Self {
        Self {
            dimensions,
            columns,
            rows: Vec::new(),
        }
    }

    /// Same schema, no rows.
    pub fn empty_like(&self) -> Self {
        Self::new(self.dimensions.clone(), self.columns.clone())
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn columns(&self) -> &[StatColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .map(|d| flatten_column(&[d.name(), ""]))
            .chain(self.columns.iter().map(StatColumn::name))
            .collect()
    }

    pub fn dimension_position(&self, dimension: Dimension) -> Option<usize> {
        self.dimensions.iter().position(|d| *d == dimension)
    }

    pub fn require_dimension(&self, dimension: Dimension) -> PipelineResult<usize> {
        self.dimension_position(dimension).ok_or_else(|| {
            PipelineError::schema(format!(
                "table [{}] has no {} column",
                self.headers().join(","),
                dimension.name()
            ))
        })
    }

    pub fn column_position(&self, column: StatColumn) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    pub fn push_row(&mut self, row: AggregateRow) -> PipelineResult<()> {
        if row.keys.len() != self.dimensions.len() || row.values.len() != self.columns.len() {
            return Err(PipelineError::schema(format!(
                "row with {} keys and {} values does not fit [{}]",
                row.keys.len(),
                row.values.len(),
                self.headers().join(",")
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn key<'a>(&self, row: &'a AggregateRow, dimension: Dimension) -> Option<&'a str> {
        self.dimension_position(dimension)
            .and_then(|pos| row.keys[pos].as_deref())
    }

    /// Five-number summary of `measure` in `row`, if every statistic is present.
    pub fn summary(&self, row: &AggregateRow, measure: Measure) -> Option<Summary> {
        let stat = |statistic| {
            self.column_position(StatColumn::new(measure, statistic))
                .and_then(|pos| row.values[pos])
        };
        Some(Summary {
            median: stat(Statistic::Median)?,
            min: stat(Statistic::Min)?,
            max: stat(Statistic::Max)?,
            quantile_25: stat(Statistic::Quantile25)?,
            quantile_75: stat(Statistic::Quantile75)?,
        })
    }

    pub fn filtered<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&AggregateRow) -> bool,
    {
        Self {
            dimensions: self.dimensions.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Sorts rows on their keys in dimension order. Null keys sort first;
    /// "YYYY-MM" months sort chronologically.
    pub fn sort_by_dimensions(&mut self) {
        self.rows.sort_by(|a, b| a.keys.cmp(&b.keys));
    }

    pub fn distinct_values(&self, dimension: Dimension) -> Vec<String> {
        let Some(pos) = self.dimension_position(dimension) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|r| r.keys[pos].clone())
            .unique()
            .collect()
    }

    /// Splits the table by the values of `dimension`, in order of first
    /// appearance. Rows with a null key are left out.
    pub fn partition_by(&self, dimension: Dimension) -> PipelineResult<Vec<(String, AggregateTable)>> {
        let pos = self.require_dimension(dimension)?;
        let parts = self
            .rows
            .iter()
            .filter_map(|r| r.keys[pos].clone().map(|k| (k, r)))
            .into_group_map();
        Ok(self
            .distinct_values(dimension)
            .into_iter()
            .map(|value| {
                let rows = parts
                    .get(&value)
                    .map(|rows| rows.iter().map(|r| (*r).clone()).collect())
                    .unwrap_or_default();
                let table = Self {
                    dimensions: self.dimensions.clone(),
                    columns: self.columns.clone(),
                    rows,
                };
                (value, table)
            })
            .collect())
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> PipelineResult<()> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(self.headers())?;
        for row in &self.rows {
            let fields = row
                .keys
                .iter()
                .map(|k| k.clone().unwrap_or_default())
                .chain(
                    row.values
                        .iter()
                        .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
                );
            wtr.write_record(fields)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let file = File::create(path)?;
        self.write_csv(file)
    }

    /// Reads a table back from CSV. Every header must name a dimension or a
    /// flattened statistic column; an unnamed leading index column is skipped.
    pub fn read_csv<R: Read>(reader: R) -> PipelineResult<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.clone();

        enum Slot {
            Skip,
            Key(usize),
            Value(usize),
        }

        let mut dimensions = Vec::new();
        let mut columns = Vec::new();
        let mut slots = Vec::with_capacity(headers.len());
        let mut seen = HashSet::new();
        for (i, header) in headers.iter().enumerate() {
            if !seen.insert(header.to_string()) {
                return Err(PipelineError::schema(format!("duplicate column {header:?}")));
            }
            if i == 0 && header.is_empty() {
                slots.push(Slot::Skip);
            } else if let Some(dim) = Dimension::from_name(header) {
                slots.push(Slot::Key(dimensions.len()));
                dimensions.push(dim);
            } else if let Some(col) = StatColumn::from_name(header) {
                slots.push(Slot::Value(columns.len()));
                columns.push(col);
            } else {
                return Err(PipelineError::schema(format!("unknown column {header:?}")));
            }
        }

        let mut table = Self::new(dimensions, columns);
        for (line, result) in rdr.records().enumerate() {
            let record = result?;
            let mut keys = vec![None; table.dimensions.len()];
            let mut values = vec![None; table.columns.len()];
            for (slot, field) in slots.iter().zip(record.iter()) {
                match slot {
                    Slot::Skip => {}
                    Slot::Key(pos) => {
                        keys[*pos] = (!field.is_empty()).then(|| field.to_string());
                    }
                    Slot::Value(pos) => {
                        if !field.is_empty() {
                            let v = field.trim().parse::<f64>().map_err(|e| {
                                PipelineError::parse(format!(
                                    "row {}: {:?} in {}: {e}",
                                    line + 1,
                                    field,
                                    table.columns[*pos].name()
                                ))
                            })?;
                            values[*pos] = Some(v);
                        }
                    }
                }
            }
            table.push_row(AggregateRow { keys, values })?;
        }
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let file = File::open(path)?;
        Self::read_csv(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> AggregateTable {
        let mut table = AggregateTable::new(
            vec![Dimension::Town, Dimension::Month],
            MeasureSet::PricePerSqm.columns(),
        );
        for (town, month, price) in [
            ("BEDOK", "2012-04", 300000.0),
            ("ANG MO KIO", "2012-03", 275000.0),
            ("BEDOK", "2012-03", 310000.0),
        ] {
            table
                .push_row(AggregateRow {
                    keys: vec![Some(town.to_string()), Some(month.to_string())],
                    values: vec![Some(price); 10],
                })
                .unwrap();
        }
        table
    }

    #[test]
    fn flattens_column_levels() {
        assert_eq!(flatten_column(&["town", ""]), "town");
        assert_eq!(flatten_column(&["resale_price", "quantile_25"]), "resale_price_quantile_25");
        let col = StatColumn::from_name("price_per_sqm_quantile_75").unwrap();
        assert_eq!(col, StatColumn::new(Measure::PricePerSqm, Statistic::Quantile75));
        assert!(StatColumn::from_name("resale_price_mean").is_none());
    }

    #[test]
    fn headers_follow_schema() {
        let headers = sample_table().headers();
        assert_eq!(&headers[..3], ["town", "month", "resale_price_median"]);
        assert_eq!(headers.len(), 12);
        assert_eq!(headers[11], "price_per_sqm_quantile_75");
    }

    #[test]
    fn rejects_rows_of_wrong_width() {
        let mut table = sample_table();
        let err = table
            .push_row(AggregateRow {
                keys: vec![Some("BEDOK".into())],
                values: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn sorts_and_partitions() {
        let mut table = sample_table();
        table.sort_by_dimensions();
        let towns: Vec<_> = table.rows().iter().map(|r| r.keys[0].clone().unwrap()).collect();
        assert_eq!(towns, ["ANG MO KIO", "BEDOK", "BEDOK"]);
        assert_eq!(table.rows()[1].keys[1].as_deref(), Some("2012-03"));

        let parts = table.partition_by(Dimension::Town).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].0, "BEDOK");
        assert_eq!(parts[1].1.len(), 2);
        assert!(table.partition_by(Dimension::FlatType).is_err());
    }

    #[test]
    fn csv_round_trip_keeps_nulls() {
        let mut table = sample_table();
        table
            .push_row(AggregateRow {
                keys: vec![Some("PUNGGOL".into()), None],
                values: vec![None; 10],
            })
            .unwrap();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let back = AggregateTable::read_csv(buf.as_slice()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn reads_index_column_and_rejects_unknown_headers() {
        let csv = ",month,resale_price_median\n0,2012-03,275000\n";
        let table = AggregateTable::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.dimensions(), [Dimension::Month]);
        assert_eq!(table.rows()[0].values, vec![Some(275000.0)]);

        let bad = "month,resale_price_mean\n2012-03,1\n";
        let err = AggregateTable::read_csv(bad.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn category_options_match_widgets() {
        assert_eq!(Category::StoreyRange.options(), ["very low", "low", "mid", "high"]);
        assert_eq!(Category::FlatType.options().len(), 6);
        assert_eq!(Category::FlatType.dimension().name(), "flat_type");
    }

    #[test]
    fn summary_requires_all_statistics() {
        let table = sample_table();
        let row = &table.rows()[0];
        let summary = table.summary(row, Measure::ResalePrice).unwrap();
        assert!(summary.is_ordered());
        assert!(table.summary(row, Measure::FloorAreaSqm).is_none());
    }
}

//! Group-by aggregation of normalized transactions into five-number
//! summaries per measure.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::normalize::TransactionRecord;
use crate::table::{AggregateRow, AggregateTable, Dimension, MeasureSet, Statistic, Summary};

/// Collects the values of one measure within one group.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    vals: Vec<f64>,
}

impl Sample {
    pub fn new() -> Self {
        Self { vals: Vec::new() }
    }

    /// Non-finite values are ignored.
    pub fn add(&mut self, v: f64) {
        if v.is_finite() {
            self.vals.push(v);
        }
    }

    pub fn median(&self) -> Option<f64> {
        let mut sorted = self.vals.clone();
        sorted.sort_by(f64::total_cmp);
        quantile(&sorted, 0.5)
    }

    pub fn summary(&self) -> Option<Summary> {
        let mut sorted = self.vals.clone();
        sorted.sort_by(f64::total_cmp);
        Some(Summary {
            median: quantile(&sorted, 0.5)?,
            min: *sorted.first()?,
            max: *sorted.last()?,
            quantile_25: quantile(&sorted, 0.25)?,
            quantile_75: quantile(&sorted, 0.75)?,
        })
    }
}

/// Linear-interpolation quantile of already sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let (a, b) = (sorted[lo], sorted[hi]);
    let v = a + (b - a) * (pos - lo as f64);
    Some(v.clamp(a, b))
}

/// Groups `records` by the exact values of `group_by` and summarizes every
/// measure of `measures` per group.
///
/// Groups appear in order of first occurrence; sort the result when a
/// particular order matters. Records with a null value in a grouping
/// dimension belong to no group. A measure with no values in a group gets
/// null statistics in that row only.
pub fn aggregate(
    records: &[TransactionRecord],
    group_by: &[Dimension],
    measures: MeasureSet,
) -> PipelineResult<AggregateTable> {
    for (i, dim) in group_by.iter().enumerate() {
        if group_by[..i].contains(dim) {
            return Err(PipelineError::schema(format!(
                "{} listed twice in grouping",
                dim.name()
            )));
        }
    }

    let tracked = measures.measures();
    let mut index: HashMap<Vec<&str>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<&str>, Vec<Sample>)> = Vec::new();
    let mut ungrouped = 0usize;

    for record in records {
        let key: Option<Vec<&str>> = group_by.iter().map(|d| record.dimension(*d)).collect();
        let Some(key) = key else {
            ungrouped += 1;
            continue;
        };
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                groups.push((key.clone(), vec![Sample::new(); tracked.len()]));
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        for (sample, measure) in groups[slot].1.iter_mut().zip(tracked) {
            if let Some(v) = record.measure(*measure) {
                sample.add(v);
            }
        }
    }

    if ungrouped > 0 {
        debug!(rows = ungrouped, "records with null grouping keys left out");
    }

    let mut table = AggregateTable::new(group_by.to_vec(), measures.columns());
    for (key, samples) in groups {
        let mut values = Vec::with_capacity(tracked.len() * Statistic::ALL.len());
        for (sample, measure) in samples.iter().zip(tracked) {
            let summary = sample.summary().filter(|s| {
                let ordered = s.is_ordered();
                if !ordered {
                    warn!(measure = measure.name(), ?key, "dropping unordered summary");
                }
                ordered
            });
            values.extend(
                Statistic::ALL
                    .iter()
                    .map(|stat| summary.map(|s| s.get(*stat))),
            );
        }
        table.push_row(AggregateRow {
            keys: key.into_iter().map(|k| Some(k.to_string())).collect(),
            values,
        })?;
    }
    Ok(table)
}

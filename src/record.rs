//! Raw resale transaction files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{info, warn};

use crate::error::PipelineResult;

/// One resale transaction as published. Older files lack `remaining_lease`
/// and some carry unparseable numbers, so most fields are optional.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub month: Option<String>,
    pub town: String,
    pub flat_type: String,
    #[serde(default)]
    pub block: Option<String>,
    #[serde(default)]
    pub street_name: Option<String>,
    pub storey_range: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub floor_area_sqm: Option<f64>,
    #[serde(default)]
    pub flat_model: Option<String>,
    #[serde(default)]
    pub lease_commence_date: Option<String>,
    #[serde(default)]
    pub remaining_lease: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub resale_price: Option<f64>,
}

/// Reads every record from one delimited source. Rows that fail to
/// deserialize are skipped and counted.
pub fn read_raw<R: Read>(reader: R, source: &str) -> PipelineResult<(Vec<RawRecord>, usize)> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let mut records = Vec::new();
    let mut skipped = 0;
    for (line, result) in rdr.deserialize::<RawRecord>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(source, row = line + 1, error = %e, "skipping malformed transaction");
                skipped += 1;
            }
        }
    }
    Ok((records, skipped))
}

/// Loads and concatenates the time-sliced raw files in the given order.
/// No deduplication is done; the files are assumed to cover disjoint months.
pub fn load_raw_files<P: AsRef<Path>>(paths: &[P]) -> PipelineResult<Vec<RawRecord>> {
    let mut all = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let source = path.display().to_string();
        let (records, skipped) = read_raw(File::open(path)?, &source)?;
        info!(source = %source, rows = records.len(), skipped, "loaded raw transactions");
        all.extend(records);
    }
    Ok(all)
}

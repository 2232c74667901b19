//! Canonical categories and derived measures applied before aggregation.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::record::RawRecord;
use crate::table::{Dimension, Measure};

fn storey_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s+TO\s+(\d+)\s*$").expect("valid storey pattern")
    })
}

/// Coarse storey buckets shown by the dashboard, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreyBucket {
    VeryLow,
    Low,
    Mid,
    High,
}

impl StoreyBucket {
    pub const ALL: [StoreyBucket; 4] = [
        StoreyBucket::VeryLow,
        StoreyBucket::Low,
        StoreyBucket::Mid,
        StoreyBucket::High,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StoreyBucket::VeryLow => "very low",
            StoreyBucket::Low => "low",
            StoreyBucket::Mid => "mid",
            StoreyBucket::High => "high",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.label() == label)
    }

    pub fn from_upper_bound(upper: u32) -> Self {
        match upper {
            0..=3 => StoreyBucket::VeryLow,
            4..=6 => StoreyBucket::Low,
            7..=9 => StoreyBucket::Mid,
            _ => StoreyBucket::High,
        }
    }

    /// Buckets a raw "NN TO MM" label by its upper storey. Labels that are
    /// already coarse pass through; anything else is `High`.
    pub fn classify(label: &str) -> (Self, bool) {
        if let Some(bucket) = Self::from_label(label) {
            return (bucket, true);
        }
        match storey_pattern()
            .captures(label)
            .and_then(|caps| caps[2].parse::<u32>().ok())
        {
            Some(upper) => (Self::from_upper_bound(upper), true),
            None => (StoreyBucket::High, false),
        }
    }
}

/// A transaction after normalization: coarse storey bucket and the derived
/// price per square metre.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub town: String,
    pub month: Option<String>,
    pub flat_type: String,
    pub storey_range: String,
    pub floor_area_sqm: Option<f64>,
    pub resale_price: Option<f64>,
    pub price_per_sqm: Option<f64>,
}

impl TransactionRecord {
    pub fn dimension(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Town => Some(&self.town),
            Dimension::Month => self.month.as_deref(),
            Dimension::FlatType => Some(&self.flat_type),
            Dimension::StoreyRange => Some(&self.storey_range),
        }
    }

    pub fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::ResalePrice => self.resale_price,
            Measure::FloorAreaSqm => self.floor_area_sqm,
            Measure::PricePerSqm => self.price_per_sqm,
        }
    }
}

fn price_per_sqm(price: Option<f64>, area: Option<f64>) -> Option<f64> {
    match (price, area) {
        (Some(p), Some(a)) if a > 0.0 => Some(p / a).filter(|v| v.is_finite()),
        _ => None,
    }
}

/// One output row per input row, in input order.
pub fn normalize(raw: &[RawRecord]) -> Vec<TransactionRecord> {
    let mut unrecognized = 0usize;
    let records = raw
        .iter()
        .map(|r| {
            let (bucket, recognized) = StoreyBucket::classify(&r.storey_range);
            if !recognized {
                unrecognized += 1;
            }
            TransactionRecord {
                town: r.town.clone(),
                month: r.month.clone(),
                flat_type: r.flat_type.clone(),
                storey_range: bucket.label().to_string(),
                floor_area_sqm: r.floor_area_sqm,
                resale_price: r.resale_price,
                price_per_sqm: price_per_sqm(r.resale_price, r.floor_area_sqm),
            }
        })
        .collect();
    if unrecognized > 0 {
        warn!(rows = unrecognized, "unrecognized storey labels bucketed as high");
    }
    records
}

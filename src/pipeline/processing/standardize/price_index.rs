use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{PipelineError, RecordError, Result};

/// Consumer price index table with a fixed base year.
/// Adjusted value = value * index[base_year] / index[year].
#[derive(Debug, Clone, Serialize)]
pub struct PriceIndex {
    table: BTreeMap<i32, f64>,
    base_year: i32,
    base_value: f64,
}

impl PriceIndex {
    pub fn new(table: BTreeMap<i32, f64>, base_year: i32) -> Result<Self> {
        if let Some((year, ipc)) = table.iter().find(|(_, ipc)| !(ipc.is_finite() && **ipc > 0.0)) {
            return Err(PipelineError::Config(format!(
                "price index for {} must be a positive number, got {}",
                year, ipc
            )));
        }
        let base_value = *table.get(&base_year).ok_or_else(|| {
            PipelineError::Config(format!("base year {} missing from price index", base_year))
        })?;
        Ok(Self {
            table,
            base_year,
            base_value,
        })
    }

    pub fn base_year(&self) -> i32 {
        self.base_year
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.table.keys().copied()
    }

    /// Multiplicative factor bringing `year` prices to base-year prices
    pub fn factor(&self, year: i32) -> std::result::Result<f64, RecordError> {
        if year == self.base_year {
            return Ok(1.0);
        }
        self.table
            .get(&year)
            .map(|ipc| self.base_value / ipc)
            .ok_or(RecordError::MissingIndex(year))
    }

    pub fn adjust(&self, value: f64, year: i32) -> std::result::Result<f64, RecordError> {
        Ok(value * self.factor(year)?)
    }
}

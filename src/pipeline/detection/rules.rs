//! Deterministic fraud heuristics. Every rule is a pure function of one record
//! (plus, for the time rule, the read-only filing history of the same property).

use chrono::{Months, NaiveDate};
use std::collections::HashMap;

use crate::config::RuleConfig;
use crate::domain::{AnomalyFlag, FlagKind, FlagSource, StandardizedRecord};

/// Sorted filing dates per MATRICULA, built once in phase 1
#[derive(Debug, Clone, Default)]
pub struct ResaleHistory {
    by_property: HashMap<String, Vec<NaiveDate>>,
}

impl ResaleHistory {
    pub fn build(records: &[StandardizedRecord]) -> Self {
        let mut by_property: HashMap<String, Vec<NaiveDate>> = HashMap::new();
        for r in records {
            by_property
                .entry(r.record.matricula.clone())
                .or_default()
                .push(r.filing_date);
        }
        for dates in by_property.values_mut() {
            dates.sort_unstable();
        }
        Self { by_property }
    }

    pub fn dates(&self, matricula: &str) -> &[NaiveDate] {
        self.by_property
            .get(matricula)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn properties(&self) -> usize {
        self.by_property.len()
    }
}

/// Number of filings inside the closed window `[date - months, date]`.
/// The record itself and same-day filings are included.
pub fn transactions_in_window(history: &[NaiveDate], date: NaiveDate, months: u32) -> usize {
    let start = date
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN);
    let upper = history.partition_point(|d| *d <= date);
    let lower = history.partition_point(|d| *d < start);
    upper.saturating_sub(lower)
}

/// UNDERVALUATION: declared value below `ratio` times the cadastral appraisal
pub fn undervaluation(record: &StandardizedRecord, ratio: f64) -> Option<AnomalyFlag> {
    let tx = &record.record;
    let appraisal = tx.avaluo.filter(|a| *a > 0.0)?;
    if tx.value_imputed || tx.valor >= ratio * appraisal {
        return None;
    }
    Some(
        AnomalyFlag::new(
            tx.pk.clone(),
            FlagSource::Rule,
            FlagKind::Undervaluation,
            tx.valor / appraisal,
        )
        .with_detail(format!("value {:.0} vs appraisal {:.0}", tx.valor, appraisal)),
    )
}

/// RAPID_RESALE: more than `max_transactions` filings of the same property in the trailing window
pub fn rapid_resale(
    record: &StandardizedRecord,
    history: &[NaiveDate],
    window_months: u32,
    max_transactions: usize,
) -> Option<AnomalyFlag> {
    let count = transactions_in_window(history, record.filing_date, window_months);
    (count > max_transactions).then(|| {
        AnomalyFlag::new(
            record.pk(),
            FlagSource::Rule,
            FlagKind::RapidResale,
            count as f64,
        )
        .with_detail(format!(
            "{} filings of {} within {} months",
            count, record.record.matricula, window_months
        ))
    })
}

/// AREA_INTEGRITY: a priced transaction with zero area
pub fn area_integrity(record: &StandardizedRecord) -> Option<AnomalyFlag> {
    let tx = &record.record;
    (tx.valor > 0.0 && tx.area == 0.0).then(|| {
        AnomalyFlag::new(tx.pk.clone(), FlagSource::Rule, FlagKind::AreaIntegrity, tx.valor)
            .with_detail("value present with zero area")
    })
}

/// Applies every rule to a record
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        record: &StandardizedRecord,
        history: &ResaleHistory,
    ) -> Vec<AnomalyFlag> {
        [
            undervaluation(record, self.config.undervaluation_ratio),
            rapid_resale(
                record,
                history.dates(&record.record.matricula),
                self.config.resale_window_months,
                self.config.resale_max_transactions,
            ),
            area_integrity(record),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

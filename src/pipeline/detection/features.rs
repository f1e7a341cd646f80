//! Feature engineering for the anomaly model.
//!
//! Features, in order:
//! 1. `ln(1 + adjusted value)`
//! 2. annotation count
//! 3. real-estate dynamics type (ordinal)
//! 4. geographic key (ordinal)
//! 5. legal-nature code (numeric when every code parses, otherwise ordinal)
//!
//! Ordinal codes follow the sorted order of distinct values, so the encoding does not
//! depend on row order.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::domain::StandardizedRecord;
use crate::error::{PipelineError, Result};

pub const N_FEATURES: usize = 5;

pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "log_adjusted_value",
    "num_anotacion",
    "dinamica",
    "geo_key",
    "cod_natujur",
];

pub type FeatureVector = [f64; N_FEATURES];

/// Sorted-distinct ordinal encoding; blank values share one code
#[derive(Debug, Clone, Default)]
pub struct OrdinalEncoder {
    codes: HashMap<String, f64>,
}

impl OrdinalEncoder {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        let distinct: BTreeSet<&str> = values.into_iter().collect();
        let codes = distinct
            .into_iter()
            .enumerate()
            .map(|(i, v)| (v.to_string(), i as f64))
            .collect();
        Self { codes }
    }

    pub fn cardinality(&self) -> usize {
        self.codes.len()
    }

    /// Unseen values map to NaN, which the model rejects
    pub fn encode(&self, value: &str) -> f64 {
        self.codes.get(value).copied().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone)]
enum NatureEncoding {
    Numeric,
    Ordinal(OrdinalEncoder),
}

/// Encoder fitted on the records the model scores
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    dinamica: OrdinalEncoder,
    geo_key: OrdinalEncoder,
    nature: NatureEncoding,
}

fn dinamica_of(r: &StandardizedRecord) -> &str {
    r.record.dinamica.as_deref().unwrap_or("")
}

fn nature_code_of(r: &StandardizedRecord) -> &str {
    r.record.cod_natujur.as_deref().unwrap_or("")
}

impl FeatureEncoder {
    /// Records the model scores: those with a reported, inflation-adjusted value
    pub fn is_eligible(record: &StandardizedRecord) -> bool {
        record.adjusted_value.is_some() && !record.record.value_imputed
    }

    pub fn fit(records: &[StandardizedRecord], max_cardinality: usize) -> Result<Self> {
        let eligible = || records.iter().filter(|r| Self::is_eligible(r));

        let dinamica = OrdinalEncoder::fit(eligible().map(dinamica_of));
        let geo_key = OrdinalEncoder::fit(eligible().map(|r| r.geo_key.as_str()));
        let all_numeric = eligible()
            .map(nature_code_of)
            .filter(|c| !c.is_empty())
            .all(|c| c.trim().parse::<f64>().is_ok());
        let nature = if all_numeric {
            NatureEncoding::Numeric
        } else {
            NatureEncoding::Ordinal(OrdinalEncoder::fit(eligible().map(nature_code_of)))
        };

        let mut checks = vec![("dinamica", &dinamica), ("geo_key", &geo_key)];
        if let NatureEncoding::Ordinal(enc) = &nature {
            checks.push(("cod_natujur", enc));
        }
        for (name, encoder) in checks {
            if encoder.cardinality() > max_cardinality {
                return Err(PipelineError::ModelFit(format!(
                    "feature '{}' has {} categories, limit is {}",
                    name,
                    encoder.cardinality(),
                    max_cardinality
                )));
            }
        }

        debug!(
            dinamica = dinamica.cardinality(),
            geo_keys = geo_key.cardinality(),
            numeric_nature = all_numeric,
            "Feature encoder fitted"
        );
        Ok(Self {
            dinamica,
            geo_key,
            nature,
        })
    }

    /// Feature vector for an eligible record, `None` otherwise
    pub fn encode(&self, record: &StandardizedRecord) -> Option<FeatureVector> {
        if !Self::is_eligible(record) {
            return None;
        }
        let adjusted = record.adjusted_value?;
        let nature = match &self.nature {
            NatureEncoding::Numeric => nature_code_of(record).trim().parse::<f64>().unwrap_or(0.0),
            NatureEncoding::Ordinal(enc) => enc.encode(nature_code_of(record)),
        };
        Some([
            adjusted.ln_1p(),
            record.record.num_anotacion as f64,
            self.dinamica.encode(dinamica_of(record)),
            self.geo_key.encode(&record.geo_key),
            nature,
        ])
    }
}

/// Dense matrix of eligible records, with the index of each row's source record
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    pub rows: Vec<FeatureVector>,
    pub record_index: Vec<usize>,
}

impl FeatureMatrix {
    pub fn build(records: &[StandardizedRecord], encoder: &FeatureEncoder) -> Result<Self> {
        let mut matrix = FeatureMatrix::default();
        for (i, r) in records.iter().enumerate() {
            if let Some(row) = encoder.encode(r) {
                if let Some(col) = row.iter().position(|v| !v.is_finite()) {
                    return Err(PipelineError::ModelFit(format!(
                        "non-finite value in feature '{}' for PK {}",
                        FEATURE_NAMES[col],
                        r.pk()
                    )));
                }
                matrix.rows.push(row);
                matrix.record_index.push(i);
            }
        }
        Ok(matrix)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MissingIndexPolicy, PipelineConfig};
    use crate::pipeline::processing::standardize::tests::record;
    use crate::pipeline::processing::{StandardizeOutcome, Standardizer};

    fn standardized(pk: &str, dinamica: &str, code: &str) -> StandardizedRecord {
        let standardizer = Standardizer::new(
            PipelineConfig::default().price_index().unwrap(),
            MissingIndexPolicy::Flag,
        );
        let mut tx = record(pk, "01/01/2024", 1_000_000.0, 10.0);
        tx.dinamica = Some(dinamica.to_string());
        tx.cod_natujur = Some(code.to_string());
        match standardizer.standardize(tx) {
            StandardizeOutcome::Standardized(r) => r,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_ordinal_codes_ignore_row_order() {
        let forward = OrdinalEncoder::fit(["VENTA", "HIPOTECA", "VENTA", "ADJUDICACION"]);
        let backward = OrdinalEncoder::fit(["ADJUDICACION", "VENTA", "HIPOTECA"]);
        for v in ["VENTA", "HIPOTECA", "ADJUDICACION"] {
            assert_eq!(forward.encode(v), backward.encode(v));
        }
        assert_eq!(forward.encode("ADJUDICACION"), 0.0);
        assert!(forward.encode("OTRA").is_nan());
    }

    #[test]
    fn test_numeric_nature_codes_are_used_directly() {
        let records = vec![standardized("1", "VENTA", "125"), standardized("2", "VENTA", "0125")];
        let encoder = FeatureEncoder::fit(&records, 100).unwrap();
        let row = encoder.encode(&records[0]).unwrap();
        assert_eq!(row[4], 125.0);
        assert!((row[0] - 1_000_000f64.ln_1p()).abs() < 1e-12);
    }

    #[test]
    fn test_mixed_nature_codes_fall_back_to_ordinal() {
        let records = vec![standardized("1", "VENTA", "125"), standardized("2", "VENTA", "0125A")];
        let encoder = FeatureEncoder::fit(&records, 100).unwrap();
        assert_eq!(encoder.encode(&records[0]).unwrap()[4], 0.0);
        assert_eq!(encoder.encode(&records[1]).unwrap()[4], 1.0);
    }

    #[test]
    fn test_cardinality_limit_fails_the_fit() {
        let records: Vec<_> = (0..4)
            .map(|i| standardized(&i.to_string(), &format!("D{}", i), "1"))
            .collect();
        let err = FeatureEncoder::fit(&records, 3).unwrap_err();
        assert!(matches!(err, PipelineError::ModelFit(_)));
    }

    #[test]
    fn test_nan_feature_fails_the_matrix() {
        let mut records = vec![standardized("1", "VENTA", "1")];
        records[0].adjusted_value = Some(f64::NAN);
        let encoder = FeatureEncoder::fit(&records, 10).unwrap();
        let err = FeatureMatrix::build(&records, &encoder).unwrap_err();
        assert!(err.to_string().contains("log_adjusted_value"));
    }

    #[test]
    fn test_records_without_adjusted_value_are_skipped() {
        let mut records = vec![standardized("1", "VENTA", "1"), standardized("2", "VENTA", "1")];
        records[1].adjusted_value = None;
        let encoder = FeatureEncoder::fit(&records, 10).unwrap();
        let matrix = FeatureMatrix::build(&records, &encoder).unwrap();
        assert_eq!(matrix.record_index, vec![0]);
    }

    #[test]
    fn test_imputed_values_stay_out_of_the_model() {
        let mut records = vec![standardized("1", "VENTA", "1"), standardized("2", "VENTA", "1")];
        records[0].record.value_imputed = true;
        records[0].adjusted_value = Some(0.0);
        let encoder = FeatureEncoder::fit(&records, 10).unwrap();
        assert!(encoder.encode(&records[0]).is_none());
        let matrix = FeatureMatrix::build(&records, &encoder).unwrap();
        assert_eq!(matrix.record_index, vec![1]);
    }
}

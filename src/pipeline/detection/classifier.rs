use crate::config::{ClassifierConfig, ValueBasis};
use crate::domain::{AnomalyFlag, FlagKind, FlagSet, FlagSource, StandardizedRecord, Typology};

/// Buckets already-flagged transactions into non-exclusive risk typologies
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    config: ClassifierConfig,
}

impl RiskClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Value compared against the thresholds. Imputed values are unknown, not zero.
    fn value(&self, record: &StandardizedRecord) -> Option<f64> {
        if record.record.value_imputed {
            return None;
        }
        match self.config.value_basis {
            ValueBasis::Nominal => Some(record.record.valor),
            ValueBasis::Adjusted => record.adjusted_value,
        }
    }

    /// Typology flags for one record; empty unless it carries a detection flag
    pub fn classify(&self, record: &StandardizedRecord, flags: &FlagSet) -> Vec<AnomalyFlag> {
        if !flags.is_flagged(record.pk()) {
            return Vec::new();
        }

        let mut out = Vec::new();
        let typology = |t: Typology, score: f64, detail: String| {
            AnomalyFlag::new(record.pk(), FlagSource::Classifier, FlagKind::Typology(t), score)
                .with_detail(detail)
        };

        if let Some(value) = self.value(record) {
            if value > self.config.extreme_high {
                out.push(typology(
                    Typology::PossibleLaundering,
                    value,
                    format!("value {:.0} above {:.0}", value, self.config.extreme_high),
                ));
            }
            if value < self.config.extreme_low {
                out.push(typology(
                    Typology::PossibleEvasion,
                    value,
                    format!("value {:.0} below {:.0}", value, self.config.extreme_low),
                ));
            }
        }

        let annotations = record.record.num_anotacion;
        if annotations > self.config.annotation_threshold {
            out.push(typology(
                Typology::LandFlipping,
                annotations as f64,
                format!("{} annotations", annotations),
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MissingIndexPolicy, PipelineConfig};
    use crate::pipeline::processing::standardize::tests::record;
    use crate::pipeline::processing::{StandardizeOutcome, Standardizer};

    fn standardized(pk: &str, date: &str, valor: f64, annotations: u32) -> StandardizedRecord {
        let standardizer = Standardizer::new(
            PipelineConfig::default().price_index().unwrap(),
            MissingIndexPolicy::Reject,
        );
        let mut tx = record(pk, date, valor, 100.0);
        tx.num_anotacion = annotations;
        match standardizer.standardize(tx) {
            StandardizeOutcome::Standardized(r) => r,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn flagged(pk: &str) -> FlagSet {
        let mut flags = FlagSet::new();
        flags.insert(AnomalyFlag::new(pk, FlagSource::Model, FlagKind::ModelOutlier, 0.8));
        flags
    }

    fn typologies(out: &[AnomalyFlag]) -> Vec<FlagKind> {
        out.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_extreme_value_is_possible_laundering() {
        let classifier = RiskClassifier::new(ClassifierConfig::default());
        let r = standardized("1", "01/01/2020", 12_000_000_000.0, 1);
        assert_eq!(
            typologies(&classifier.classify(&r, &flagged("1"))),
            vec![FlagKind::Typology(Typology::PossibleLaundering)]
        );
    }

    #[test]
    fn test_typologies_are_not_exclusive() {
        let classifier = RiskClassifier::new(ClassifierConfig::default());
        let r = standardized("1", "01/01/2020", 500_000.0, 35);
        assert_eq!(
            typologies(&classifier.classify(&r, &flagged("1"))),
            vec![
                FlagKind::Typology(Typology::PossibleEvasion),
                FlagKind::Typology(Typology::LandFlipping),
            ]
        );
    }

    #[test]
    fn test_unflagged_records_are_not_classified() {
        let classifier = RiskClassifier::new(ClassifierConfig::default());
        let r = standardized("1", "01/01/2020", 12_000_000_000.0, 50);
        assert!(classifier.classify(&r, &FlagSet::new()).is_empty());
    }

    #[test]
    fn test_adjusted_basis_uses_inflated_value() {
        // 9e9 in 2015 prices is 14.4e9 in 2024 prices
        let r = standardized("1", "01/01/2015", 9_000_000_000.0, 1);
        let nominal = RiskClassifier::new(ClassifierConfig::default());
        assert!(nominal.classify(&r, &flagged("1")).is_empty());

        let adjusted = RiskClassifier::new(ClassifierConfig {
            value_basis: ValueBasis::Adjusted,
            ..ClassifierConfig::default()
        });
        assert_eq!(
            typologies(&adjusted.classify(&r, &flagged("1"))),
            vec![FlagKind::Typology(Typology::PossibleLaundering)]
        );
    }
}

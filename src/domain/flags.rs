//! Typed anomaly flags, accumulated per transaction.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which component produced a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    Standardizer,
    Rule,
    ZScore,
    Model,
    Classifier,
}

/// Risk typologies assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Typology {
    PossibleLaundering,
    PossibleEvasion,
    LandFlipping,
}

impl Typology {
    pub fn label(&self) -> &'static str {
        match self {
            Typology::PossibleLaundering => "POSSIBLE_LAUNDERING",
            Typology::PossibleEvasion => "POSSIBLE_EVASION",
            Typology::LandFlipping => "LAND_FLIPPING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagKind {
    Undervaluation,
    RapidResale,
    AreaIntegrity,
    StatOutlier,
    ModelOutlier,
    MissingPriceIndex,
    Typology(Typology),
}

impl FlagKind {
    /// Output column / label name
    pub fn label(&self) -> &'static str {
        match self {
            FlagKind::Undervaluation => "UNDERVALUATION",
            FlagKind::RapidResale => "RAPID_RESALE",
            FlagKind::AreaIntegrity => "AREA_INTEGRITY",
            FlagKind::StatOutlier => "STAT_OUTLIER",
            FlagKind::ModelOutlier => "MODEL_OUTLIER",
            FlagKind::MissingPriceIndex => "MISSING_PRICE_INDEX",
            FlagKind::Typology(t) => t.label(),
        }
    }

    /// Flags produced by the rule engine, statistical scorer or model.
    /// Only these make a record eligible for classification and text mining.
    pub fn is_detection(&self) -> bool {
        matches!(
            self,
            FlagKind::Undervaluation
                | FlagKind::RapidResale
                | FlagKind::AreaIntegrity
                | FlagKind::StatOutlier
                | FlagKind::ModelOutlier
        )
    }

    /// The detection flags written as boolean output columns, in column order
    pub fn detection_kinds() -> [FlagKind; 5] {
        [
            FlagKind::Undervaluation,
            FlagKind::RapidResale,
            FlagKind::AreaIntegrity,
            FlagKind::StatOutlier,
            FlagKind::ModelOutlier,
        ]
    }
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One flag attached to one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub pk: String,
    pub source: FlagSource,
    pub kind: FlagKind,
    /// Source-specific magnitude: value ratio, window count, |Z|, anomaly score, or value
    pub score: f64,
    pub detail: String,
}

impl AnomalyFlag {
    pub fn new(pk: impl Into<String>, source: FlagSource, kind: FlagKind, score: f64) -> Self {
        Self {
            pk: pk.into(),
            source,
            kind,
            score,
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Non-exclusive union of flags keyed by transaction PK
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    by_pk: BTreeMap<String, Vec<AnomalyFlag>>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag; a second flag of the same kind for the same PK is ignored
    pub fn insert(&mut self, flag: AnomalyFlag) {
        let flags = self.by_pk.entry(flag.pk.clone()).or_default();
        if !flags.iter().any(|f| f.kind == flag.kind) {
            flags.push(flag);
        }
    }

    pub fn extend<I: IntoIterator<Item = AnomalyFlag>>(&mut self, flags: I) {
        for flag in flags {
            self.insert(flag);
        }
    }

    pub fn get(&self, pk: &str) -> &[AnomalyFlag] {
        self.by_pk.get(pk).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn has(&self, pk: &str, kind: FlagKind) -> bool {
        self.get(pk).iter().any(|f| f.kind == kind)
    }

    pub fn kinds(&self, pk: &str) -> BTreeSet<FlagKind> {
        self.get(pk).iter().map(|f| f.kind).collect()
    }

    /// True when the transaction carries at least one detection flag
    pub fn is_flagged(&self, pk: &str) -> bool {
        self.get(pk).iter().any(|f| f.kind.is_detection())
    }

    /// PKs with at least one detection flag, in PK order
    pub fn flagged_pks(&self) -> Vec<&str> {
        self.by_pk
            .iter()
            .filter(|(_, flags)| flags.iter().any(|f| f.kind.is_detection()))
            .map(|(pk, _)| pk.as_str())
            .collect()
    }

    pub fn typologies(&self, pk: &str) -> Vec<Typology> {
        let mut out: Vec<Typology> = self
            .get(pk)
            .iter()
            .filter_map(|f| match f.kind {
                FlagKind::Typology(t) => Some(t),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnomalyFlag> {
        self.by_pk.values().flatten()
    }

    /// Total number of flags
    pub fn len(&self) -> usize {
        self.by_pk.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_by_kind(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for flag in self.iter() {
            *counts.entry(flag.kind.label().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_accumulate_without_duplicates() {
        let mut set = FlagSet::new();
        set.insert(AnomalyFlag::new("1", FlagSource::Rule, FlagKind::Undervaluation, 0.05));
        set.insert(AnomalyFlag::new("1", FlagSource::Rule, FlagKind::Undervaluation, 0.05));
        set.insert(AnomalyFlag::new("1", FlagSource::ZScore, FlagKind::StatOutlier, 4.2));

        assert_eq!(set.len(), 2);
        assert!(set.has("1", FlagKind::StatOutlier));
        assert!(!set.has("2", FlagKind::StatOutlier));
        assert_eq!(set.flagged_pks(), vec!["1"]);
    }

    #[test]
    fn test_missing_index_alone_is_not_a_detection() {
        let mut set = FlagSet::new();
        set.insert(AnomalyFlag::new(
            "9",
            FlagSource::Standardizer,
            FlagKind::MissingPriceIndex,
            0.0,
        ));
        assert!(!set.is_flagged("9"));
        assert!(set.flagged_pks().is_empty());
    }

    #[test]
    fn test_flag_serializes_with_labels() {
        let flag = AnomalyFlag::new(
            "7",
            FlagSource::Classifier,
            FlagKind::Typology(Typology::LandFlipping),
            31.0,
        );
        let json = serde_json::to_string(&flag).unwrap();
        assert!(json.contains("\"source\":\"classifier\""));
        assert!(json.contains("LAND_FLIPPING"));
    }
}

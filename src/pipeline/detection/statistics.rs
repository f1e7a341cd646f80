//! Per-municipality price-per-area profiles and Z-score flagging.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::config::StatisticsConfig;
use crate::domain::{AnomalyFlag, FlagKind, FlagSource, StandardizedRecord};
use crate::error::DegenerateStatisticsError;

/// Welford accumulator for mean and sample variance
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    n: usize,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample (n - 1) standard deviation; `None` below two observations
    pub fn sample_stddev(&self) -> Option<f64> {
        (self.n >= 2).then(|| (self.m2 / (self.n - 1) as f64).max(0.0).sqrt())
    }
}

/// Monthly transaction volume over the group's observed period, zero-filled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeBaseline {
    pub first_period: String,
    pub last_period: String,
    pub months: usize,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MunicipalityProfile {
    pub geo_key: String,
    pub transactions: usize,
    /// Records contributing a price per area
    pub observations: usize,
    pub mean_ppa: f64,
    pub stddev_ppa: Option<f64>,
    pub degenerate: bool,
    pub volume: VolumeBaseline,
}

impl MunicipalityProfile {
    /// Z-score of a price per area, `None` for degenerate groups
    pub fn z_score(&self, ppa: f64) -> Option<f64> {
        match self.stddev_ppa {
            Some(sd) if !self.degenerate => Some((ppa - self.mean_ppa) / sd),
            _ => None,
        }
    }
}

#[derive(Default)]
struct GroupAccumulator {
    ppa: RunningStats,
    transactions: usize,
    monthly: BTreeMap<(i32, u32), usize>,
}

/// Read-only statistics computed in phase 1
#[derive(Debug, Clone, Default)]
pub struct StatisticalScorer {
    profiles: HashMap<String, MunicipalityProfile>,
    degenerate: Vec<DegenerateStatisticsError>,
    z_threshold: f64,
}

impl StatisticalScorer {
    pub fn fit(records: &[StandardizedRecord], config: &StatisticsConfig) -> Self {
        let mut groups: HashMap<&str, GroupAccumulator> = HashMap::new();
        for r in records {
            let acc = groups.entry(r.geo_key.as_str()).or_default();
            acc.transactions += 1;
            *acc.monthly
                .entry((r.filing_date.year(), r.filing_date.month()))
                .or_insert(0) += 1;
            if let Some(ppa) = r.price_per_area {
                acc.ppa.push(ppa);
            }
        }

        let mut profiles = HashMap::with_capacity(groups.len());
        let mut degenerate = Vec::new();
        for (geo_key, acc) in groups {
            let stddev = acc.ppa.sample_stddev();
            let is_degenerate = acc.ppa.count() < config.min_observations
                || !matches!(stddev, Some(sd) if sd > 0.0 && sd.is_finite());
            if is_degenerate {
                let error = DegenerateStatisticsError {
                    geo_key: geo_key.to_string(),
                    observations: acc.ppa.count(),
                    stddev: stddev.unwrap_or(0.0),
                };
                warn!(%error, "Excluding group from Z-score flagging");
                degenerate.push(error);
            }

            let profile = MunicipalityProfile {
                geo_key: geo_key.to_string(),
                transactions: acc.transactions,
                observations: acc.ppa.count(),
                mean_ppa: acc.ppa.mean(),
                stddev_ppa: stddev,
                degenerate: is_degenerate,
                volume: volume_baseline(&acc.monthly),
            };
            debug!(
                geo_key,
                observations = profile.observations,
                mean = profile.mean_ppa,
                "Profile computed"
            );
            profiles.insert(geo_key.to_string(), profile);
        }
        degenerate.sort_by(|a, b| a.geo_key.cmp(&b.geo_key));

        Self {
            profiles,
            degenerate,
            z_threshold: config.z_threshold,
        }
    }

    pub fn profile(&self, geo_key: &str) -> Option<&MunicipalityProfile> {
        self.profiles.get(geo_key)
    }

    /// Profiles sorted by geographic key
    pub fn profiles(&self) -> Vec<&MunicipalityProfile> {
        let mut out: Vec<_> = self.profiles.values().collect();
        out.sort_by(|a, b| a.geo_key.cmp(&b.geo_key));
        out
    }

    pub fn degenerate_groups(&self) -> &[DegenerateStatisticsError] {
        &self.degenerate
    }

    pub fn z_score(&self, record: &StandardizedRecord) -> Option<f64> {
        let ppa = record.price_per_area?;
        self.profile(&record.geo_key)?.z_score(ppa)
    }

    /// Z-score and, when |Z| exceeds the threshold, a STAT_OUTLIER flag
    pub fn score(&self, record: &StandardizedRecord) -> (Option<f64>, Option<AnomalyFlag>) {
        let z = self.z_score(record);
        let flag = z.filter(|z| z.abs() > self.z_threshold).map(|z| {
            AnomalyFlag::new(record.pk(), FlagSource::ZScore, FlagKind::StatOutlier, z.abs())
                .with_detail(format!("z = {:.3} in {}", z, record.geo_key))
        });
        (z, flag)
    }
}

fn volume_baseline(monthly: &BTreeMap<(i32, u32), usize>) -> VolumeBaseline {
    let (first, last) = match (monthly.keys().next(), monthly.keys().next_back()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => {
            return VolumeBaseline {
                first_period: String::new(),
                last_period: String::new(),
                months: 0,
                mean: 0.0,
                stddev: 0.0,
            }
        }
    };

    let mut stats = RunningStats::default();
    let (mut year, mut month) = first;
    loop {
        stats.push(monthly.get(&(year, month)).copied().unwrap_or(0) as f64);
        if (year, month) == last {
            break;
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    VolumeBaseline {
        first_period: format!("{:04}-{:02}", first.0, first.1),
        last_period: format!("{:04}-{:02}", last.0, last.1),
        months: stats.count(),
        mean: stats.mean(),
        stddev: stats.sample_stddev().unwrap_or(0.0),
    }
}

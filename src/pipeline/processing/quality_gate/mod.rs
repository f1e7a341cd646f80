use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{CRITICAL_COLUMNS, VALID_VALUE_RANGE, VALID_YEAR_RANGE};
use crate::domain::{RawRecord, TransactionRecord};
use crate::pipeline::processing::standardize::parse_date;

/// Dataset-level quality assessment of a cleaned batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// The quality gate decision
    pub decision: QualityDecision,
    /// Overall quality score (0.0 to 1.0)
    pub quality_score: f64,
    /// Specific quality issues found
    pub issues: Vec<QualityIssue>,
    /// The quality rule set version used
    pub rule_version: String,
}

/// Quality Gate decision for a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum QualityDecision {
    /// Batch meets quality standards
    Accept,
    /// Batch has quality concerns but is usable
    AcceptWithWarnings,
    /// Batch fails quality checks and should be reviewed before use
    Quarantine,
}

/// Individual quality issue found during assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub issue_type: QualityIssueType,
    pub severity: QualitySeverity,
    /// Human-readable description of the issue
    pub description: String,
    /// Column that triggered this issue
    pub field: Option<String>,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum QualityIssueType {
    /// Missing required data
    MissingData,
    /// Data outside expected ranges
    OutOfRange,
    /// Imputed or otherwise suspicious values
    SuspiciousValue,
    /// Duplicate primary keys
    DuplicationConcern,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, PartialOrd)]
pub enum QualitySeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Configuration for Quality Gate assessment rules
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Minimum quality score for acceptance
    pub min_quality_score: f64,
    pub rule_version: String,
    /// Share of nulls in a critical column above which the issue becomes an error
    pub max_critical_null_ratio: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 0.6,
            rule_version: "v1.0.0".to_string(),
            max_critical_null_ratio: 0.05,
        }
    }
}

/// Below/above counts for one validated column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeCheck {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub checked: u64,
    pub below: u64,
    pub above: u64,
}

impl RangeCheck {
    fn new(column: &str, (min, max): (f64, f64)) -> Self {
        Self {
            column: column.to_string(),
            min,
            max,
            checked: 0,
            below: 0,
            above: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        self.checked += 1;
        if value < self.min {
            self.below += 1;
        } else if value > self.max {
            self.above += 1;
        }
    }

    pub fn out_of_range(&self) -> u64 {
        self.below + self.above
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriticalColumnCheck {
    pub column: String,
    pub present: bool,
    pub null_count: u64,
}

/// Data quality report over the cleaned dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_rows: u64,
    pub total_columns: usize,
    /// Blank cells per input column, before imputation
    pub null_counts: BTreeMap<String, u64>,
    pub duplicate_pks: u64,
    pub imputed_values: u64,
    pub ranges: Vec<RangeCheck>,
    pub critical_columns: Vec<CriticalColumnCheck>,
    pub assessment: QualityAssessment,
}

/// Accumulates quality counters while records stream through cleaning
#[derive(Debug, Clone)]
pub struct QualityAccumulator {
    columns: Vec<String>,
    null_counts: BTreeMap<String, u64>,
    rows: u64,
    duplicates: u64,
    imputed_values: u64,
    year: RangeCheck,
    value: RangeCheck,
}

impl QualityAccumulator {
    pub fn new(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            null_counts: columns.iter().map(|c| (c.clone(), 0)).collect(),
            rows: 0,
            duplicates: 0,
            imputed_values: 0,
            year: RangeCheck::new("YEAR", VALID_YEAR_RANGE),
            value: RangeCheck::new("VALOR", VALID_VALUE_RANGE),
        }
    }

    /// Count blank cells of a row that survived cleaning and deduplication
    pub fn observe_raw(&mut self, raw: &RawRecord) {
        for column in &self.columns {
            if raw.get(column).is_none() {
                if let Some(count) = self.null_counts.get_mut(column) {
                    *count += 1;
                }
            }
        }
    }

    pub fn observe_clean(&mut self, record: &TransactionRecord) {
        self.rows += 1;
        if record.value_imputed {
            self.imputed_values += 1;
        } else {
            self.value.observe(record.valor);
        }
        if let Some(date) = parse_date(&record.fecha_radica) {
            self.year.observe(date.year() as f64);
        }
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn finish(self, config: &QualityGateConfig) -> QualityReport {
        let critical_columns: Vec<CriticalColumnCheck> = CRITICAL_COLUMNS
            .iter()
            .map(|col| CriticalColumnCheck {
                column: col.to_string(),
                present: self.columns.iter().any(|c| c == col),
                null_count: self.null_counts.get(*col).copied().unwrap_or(0),
            })
            .collect();
        let ranges = vec![self.year, self.value];

        let issues = assess_issues(
            config,
            self.rows,
            self.duplicates,
            self.imputed_values,
            &ranges,
            &critical_columns,
        );
        let quality_score = calculate_quality_score(&issues);
        let decision = determine_decision(config, quality_score, &issues);

        QualityReport {
            total_rows: self.rows,
            total_columns: self.columns.len(),
            null_counts: self.null_counts,
            duplicate_pks: self.duplicates,
            imputed_values: self.imputed_values,
            ranges,
            critical_columns,
            assessment: QualityAssessment {
                decision,
                quality_score,
                issues,
                rule_version: config.rule_version.clone(),
            },
        }
    }
}

fn assess_issues(
    config: &QualityGateConfig,
    rows: u64,
    duplicates: u64,
    imputed: u64,
    ranges: &[RangeCheck],
    critical: &[CriticalColumnCheck],
) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    if rows == 0 {
        issues.push(QualityIssue {
            issue_type: QualityIssueType::MissingData,
            severity: QualitySeverity::Critical,
            description: "No records survived cleaning".to_string(),
            field: None,
            suggestion: Some("Check the delimiter and the rejects file".to_string()),
        });
    }

    for check in critical {
        if !check.present {
            issues.push(QualityIssue {
                issue_type: QualityIssueType::MissingData,
                severity: QualitySeverity::Critical,
                description: format!("Critical column {} is absent", check.column),
                field: Some(check.column.clone()),
                suggestion: None,
            });
        } else if check.null_count > 0 {
            let ratio = check.null_count as f64 / rows.max(1) as f64;
            let severity = if ratio > config.max_critical_null_ratio {
                QualitySeverity::Error
            } else {
                QualitySeverity::Warning
            };
            issues.push(QualityIssue {
                issue_type: QualityIssueType::MissingData,
                severity,
                description: format!(
                    "Critical column {} has {} null values ({:.2}%)",
                    check.column,
                    check.null_count,
                    ratio * 100.0
                ),
                field: Some(check.column.clone()),
                suggestion: None,
            });
        }
    }

    for range in ranges.iter().filter(|r| r.out_of_range() > 0) {
        issues.push(QualityIssue {
            issue_type: QualityIssueType::OutOfRange,
            severity: QualitySeverity::Warning,
            description: format!(
                "{}: {} below {}, {} above {}",
                range.column, range.below, range.min, range.above, range.max
            ),
            field: Some(range.column.clone()),
            suggestion: Some("Review the price index coverage and value parsing".to_string()),
        });
    }

    if imputed > 0 {
        issues.push(QualityIssue {
            issue_type: QualityIssueType::SuspiciousValue,
            severity: QualitySeverity::Info,
            description: format!("{} records had VALOR imputed as 0", imputed),
            field: Some("VALOR".to_string()),
            suggestion: None,
        });
    }

    if duplicates > 0 {
        issues.push(QualityIssue {
            issue_type: QualityIssueType::DuplicationConcern,
            severity: QualitySeverity::Info,
            description: format!("{} duplicate PKs removed", duplicates),
            field: Some("PK".to_string()),
            suggestion: None,
        });
    }

    issues
}

fn calculate_quality_score(issues: &[QualityIssue]) -> f64 {
    let mut score: f64 = 1.0;
    for issue in issues {
        let deduction = match issue.severity {
            QualitySeverity::Info => 0.01,
            QualitySeverity::Warning => 0.05,
            QualitySeverity::Error => 0.15,
            QualitySeverity::Critical => 0.30,
        };
        score = (score - deduction).max(0.0);
    }
    score
}

fn determine_decision(
    config: &QualityGateConfig,
    quality_score: f64,
    issues: &[QualityIssue],
) -> QualityDecision {
    if issues.iter().any(|i| i.severity == QualitySeverity::Critical) {
        return QualityDecision::Quarantine;
    }
    if quality_score < config.min_quality_score {
        return QualityDecision::Quarantine;
    }
    if issues.iter().any(|i| i.severity >= QualitySeverity::Warning) {
        return QualityDecision::AcceptWithWarnings;
    }
    QualityDecision::Accept
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== DATA QUALITY REPORT ===")?;
        writeln!(f, "Rows: {}  Columns: {}", self.total_rows, self.total_columns)?;
        writeln!(f, "Duplicate PKs removed: {}", self.duplicate_pks)?;
        writeln!(f, "Imputed values: {}", self.imputed_values)?;

        let with_nulls: Vec<_> = self.null_counts.iter().filter(|(_, n)| **n > 0).collect();
        if !with_nulls.is_empty() {
            writeln!(f, "Null counts:")?;
            for (column, count) in with_nulls {
                writeln!(f, "  {:<28} {}", column, count)?;
            }
        }

        writeln!(f, "Ranges:")?;
        for r in &self.ranges {
            writeln!(
                f,
                "  {:<8} [{}, {}] checked={} below={} above={}",
                r.column, r.min, r.max, r.checked, r.below, r.above
            )?;
        }

        writeln!(
            f,
            "Decision: {:?} (score {:.2}, rules {})",
            self.assessment.decision, self.assessment.quality_score, self.assessment.rule_version
        )?;
        for issue in &self.assessment.issues {
            writeln!(f, "  [{:?}] {}", issue.severity, issue.description)?;
        }
        Ok(())
    }
}

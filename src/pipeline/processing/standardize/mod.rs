use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::config::{MissingIndexPolicy, PipelineConfig};
use crate::constants::DATE_FORMATS;
use crate::domain::{
    AnomalyFlag, FlagKind, FlagSource, RejectedRecord, StandardizedRecord, TemporalFields,
    TransactionRecord,
};
use crate::error::{RecordError, Result};

pub mod price_index;

pub use price_index::PriceIndex;

const STAGE: &str = "standardize";

/// Parse a date using the known export formats, in order.
/// Four-digit-year formats only match plausible years so that `15` never parses as year 15.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        let parsed = if fmt.contains("%H") {
            NaiveDateTime::parse_from_str(raw, fmt).ok().map(|dt| dt.date())
        } else {
            NaiveDate::parse_from_str(raw, fmt).ok()
        };
        parsed.filter(|d| (1900..=2100).contains(&d.year()))
    })
}

pub fn temporal_fields(date: NaiveDate) -> TemporalFields {
    let month = date.month();
    TemporalFields {
        year: date.year(),
        month,
        quarter: (month - 1) / 3 + 1,
        semester: (month - 1) / 6 + 1,
        weekday: date.weekday().num_days_from_monday(),
    }
}

/// Zero-pad a DIVIPOLA code to 5 digits; non-numeric codes pass through trimmed
pub fn normalize_divipola(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>5}", digits)
    } else {
        trimmed.to_string()
    }
}

pub fn geo_key(departamento: &str, municipio: &str) -> String {
    format!("{}_{}", departamento, municipio)
}

/// Output of standardizing one record
#[derive(Debug, Clone)]
pub enum StandardizeOutcome {
    Standardized(StandardizedRecord),
    /// Kept without an adjusted value under the `flag` missing-index policy
    Flagged(StandardizedRecord, AnomalyFlag),
    Rejected(RejectedRecord),
}

/// Inflation adjustment and derived fields
pub struct Standardizer {
    index: PriceIndex,
    policy: MissingIndexPolicy,
}

impl Standardizer {
    pub fn new(index: PriceIndex, policy: MissingIndexPolicy) -> Self {
        Self { index, policy }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.price_index()?,
            config.standardize.missing_index_policy,
        ))
    }

    pub fn price_index(&self) -> &PriceIndex {
        &self.index
    }

    pub fn standardize(&self, record: TransactionRecord) -> StandardizeOutcome {
        let filing_date = match parse_date(&record.fecha_radica) {
            Some(date) => date,
            None => {
                let error = RecordError::InvalidDate(record.fecha_radica.clone());
                return StandardizeOutcome::Rejected(Self::reject(&record, error));
            }
        };
        let filing = temporal_fields(filing_date);
        let opening = record
            .fecha_apertura
            .as_deref()
            .and_then(parse_date)
            .map(temporal_fields);

        let (adjusted_value, missing) = match self.index.adjust(record.valor, filing.year) {
            Ok(v) => (Some(v), None),
            Err(error) => match self.policy {
                MissingIndexPolicy::Reject => {
                    return StandardizeOutcome::Rejected(Self::reject(&record, error));
                }
                MissingIndexPolicy::Flag => (None, Some(error)),
            },
        };

        // An imputed value is unknown, not zero
        let price_per_area = adjusted_value
            .filter(|_| record.area > 0.0 && !record.value_imputed)
            .map(|v| v / record.area);

        let standardized = StandardizedRecord {
            filing_date,
            filing,
            opening,
            geo_key: geo_key(&record.departamento, &record.municipio),
            divipola_code: record.divipola.as_deref().map(normalize_divipola),
            adjusted_value,
            price_per_area,
            record,
        };

        match missing {
            None => StandardizeOutcome::Standardized(standardized),
            Some(error) => {
                debug!(pk = %standardized.pk(), %error, "Keeping record without adjusted value");
                let flag = AnomalyFlag::new(
                    standardized.pk(),
                    FlagSource::Standardizer,
                    FlagKind::MissingPriceIndex,
                    filing.year as f64,
                )
                .with_detail(error.to_string());
                StandardizeOutcome::Flagged(standardized, flag)
            }
        }
    }

    fn reject(record: &TransactionRecord, error: RecordError) -> RejectedRecord {
        RejectedRecord {
            line: record.line,
            pk: Some(record.pk.clone()),
            stage: STAGE.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RejectKind;

    pub(crate) fn record(pk: &str, date: &str, valor: f64, area: f64) -> TransactionRecord {
        TransactionRecord {
            line: 2,
            pk: pk.to_string(),
            matricula: format!("M-{}", pk),
            numero_catastral: "sin folio".to_string(),
            numero_catastral_antiguo: None,
            fecha_radica: date.to_string(),
            fecha_apertura: None,
            orip: "SIN_ORIP".to_string(),
            divipola: Some("5001".to_string()),
            departamento_raw: "ANTIOQUIA".to_string(),
            municipio_raw: "MEDELLIN".to_string(),
            departamento: "ANTIOQUIA".to_string(),
            municipio: "MEDELLÍN".to_string(),
            tipo_predio_zona: Some("URBANO".to_string()),
            categoria_ruralidad: None,
            num_anotacion: 1,
            estado_folio: "ACTIVO".to_string(),
            folios_derivados: "Sin folio".to_string(),
            dinamica: Some("COMPRAVENTA".to_string()),
            cod_natujur: Some("125".to_string()),
            nombre_natujur: Some("COMPRAVENTA".to_string()),
            documento: "SIN_DOCUMENTO_JUSTIFICATIVO".to_string(),
            count_a: 1.0,
            count_de: 1.0,
            predios_nuevos: 0.0,
            tiene_valor: true,
            tiene_mas_de_un_valor: false,
            valor,
            value_imputed: false,
            area,
            avaluo: None,
        }
    }

    fn standardizer(policy: MissingIndexPolicy) -> Standardizer {
        Standardizer::from_config(&PipelineConfig::default())
            .map(|s| Standardizer::new(s.index, policy))
            .unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2015, 12, 20).unwrap();
        assert_eq!(parse_date("20/12/2015"), Some(expected));
        assert_eq!(parse_date("2015-12-20"), Some(expected));
        assert_eq!(parse_date("2015-12-20 00:00:00"), Some(expected));
        assert_eq!(parse_date("20-12-2015"), Some(expected));
        assert_eq!(parse_date("2015/12/20"), Some(expected));
        assert_eq!(parse_date("20/12/15"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_temporal_fields() {
        // 2023-08-15 was a Tuesday
        let fields = temporal_fields(NaiveDate::from_ymd_opt(2023, 8, 15).unwrap());
        assert_eq!(fields.quarter, 3);
        assert_eq!(fields.semester, 2);
        assert_eq!(fields.weekday, 1);
    }

    #[test]
    fn test_divipola_is_zero_padded() {
        assert_eq!(normalize_divipola("5001"), "05001");
        assert_eq!(normalize_divipola(" 11001 "), "11001");
        assert_eq!(normalize_divipola("5001.0"), "05001");
        assert_eq!(normalize_divipola("N/A"), "N/A");
    }

    #[test]
    fn test_base_year_value_is_unchanged() {
        let std = standardizer(MissingIndexPolicy::Reject);
        match std.standardize(record("1", "03/03/2024", 250_000_000.0, 50.0)) {
            StandardizeOutcome::Standardized(r) => {
                assert_eq!(r.adjusted_value, Some(250_000_000.0));
                assert_eq!(r.price_per_area, Some(5_000_000.0));
                assert_eq!(r.geo_key, "ANTIOQUIA_MEDELLÍN");
                assert_eq!(r.divipola_code.as_deref(), Some("05001"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_invalid_date_is_rejected() {
        let std = standardizer(MissingIndexPolicy::Reject);
        match std.standardize(record("1", "32/13/2020", 1.0, 1.0)) {
            StandardizeOutcome::Rejected(r) => assert_eq!(r.kind, RejectKind::InvalidDateError),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_missing_index_follows_policy() {
        let rejecting = standardizer(MissingIndexPolicy::Reject);
        match rejecting.standardize(record("1", "01/06/2012", 1.0, 1.0)) {
            StandardizeOutcome::Rejected(r) => assert_eq!(r.kind, RejectKind::MissingIndexError),
            other => panic!("unexpected outcome {:?}", other),
        }

        let flagging = standardizer(MissingIndexPolicy::Flag);
        match flagging.standardize(record("2", "01/06/2012", 1.0, 1.0)) {
            StandardizeOutcome::Flagged(r, flag) => {
                assert!(r.index_missing());
                assert_eq!(r.price_per_area, None);
                assert_eq!(flag.kind, FlagKind::MissingPriceIndex);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_imputed_value_has_no_price_per_area() {
        let std = standardizer(MissingIndexPolicy::Reject);
        let mut tx = record("1", "01/01/2020", 0.0, 80.0);
        tx.value_imputed = true;
        match std.standardize(tx) {
            StandardizeOutcome::Standardized(r) => {
                assert_eq!(r.price_per_area, None);
                assert!(r.adjusted_value.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_zero_area_has_no_price_per_area() {
        let std = standardizer(MissingIndexPolicy::Reject);
        match std.standardize(record("1", "01/01/2020", 10.0, 0.0)) {
            StandardizeOutcome::Standardized(r) => assert_eq!(r.price_per_area, None),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

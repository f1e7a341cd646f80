use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RejectKind;

pub mod flags;

pub use flags::{AnomalyFlag, FlagKind, FlagSet, FlagSource, Typology};

/// One input row keyed by (quote-stripped) header name
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    /// 1-based line number in the input file, header included
    pub line: u64,
    pub fields: HashMap<String, String>,
}

impl RawRecord {
    /// Field value, `None` when the column is absent or the cell is blank
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// A cleaned transaction: strings normalized, numerics parsed, placeholders imputed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub line: u64,
    pub pk: String,
    pub matricula: String,
    pub numero_catastral: String,
    pub numero_catastral_antiguo: Option<String>,
    pub fecha_radica: String,
    pub fecha_apertura: Option<String>,
    pub orip: String,
    pub divipola: Option<String>,
    pub departamento_raw: String,
    pub municipio_raw: String,
    pub departamento: String,
    pub municipio: String,
    pub tipo_predio_zona: Option<String>,
    pub categoria_ruralidad: Option<String>,
    pub num_anotacion: u32,
    pub estado_folio: String,
    pub folios_derivados: String,
    pub dinamica: Option<String>,
    pub cod_natujur: Option<String>,
    pub nombre_natujur: Option<String>,
    pub documento: String,
    pub count_a: f64,
    pub count_de: f64,
    pub predios_nuevos: f64,
    pub tiene_valor: bool,
    pub tiene_mas_de_un_valor: bool,
    /// Nominal transaction value (COP)
    pub valor: f64,
    /// True when VALOR was missing or negative and imputed as 0
    pub value_imputed: bool,
    /// Area in square meters; 0 when missing
    pub area: f64,
    /// Cadastral appraisal (COP) when present
    pub avaluo: Option<f64>,
}

/// Calendar fields derived from a date
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemporalFields {
    pub year: i32,
    pub month: u32,
    pub quarter: u32,
    pub semester: u32,
    /// Monday = 0
    pub weekday: u32,
}

/// A transaction after inflation adjustment and key derivation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardizedRecord {
    pub record: TransactionRecord,
    pub filing_date: NaiveDate,
    pub filing: TemporalFields,
    pub opening: Option<TemporalFields>,
    /// DEPARTAMENTO_MUNICIPIO composite
    pub geo_key: String,
    /// 5-digit zero-padded DIVIPOLA code
    pub divipola_code: Option<String>,
    /// Value in base-year prices; `None` when the filing year had no index entry
    pub adjusted_value: Option<f64>,
    pub price_per_area: Option<f64>,
}

impl StandardizedRecord {
    pub fn pk(&self) -> &str {
        &self.record.pk
    }

    pub fn index_missing(&self) -> bool {
        self.adjusted_value.is_none()
    }
}

/// A record that could not be processed, as written to the rejects sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedRecord {
    pub line: u64,
    pub pk: Option<String>,
    /// Pipeline stage that rejected the record
    pub stage: String,
    pub kind: RejectKind,
    pub message: String,
}

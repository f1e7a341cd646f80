//! Record cleaning: quote stripping, string normalization, numeric parsing,
//! business imputations and primary-key deduplication.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::StandardizeConfig;
use crate::constants::*;
use crate::domain::{RawRecord, RejectedRecord, TransactionRecord};
use crate::error::{RecordError, RejectKind};

const STAGE: &str = "clean";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Uppercase and replace accented vowels with their plain form. Ñ is kept.
pub fn fold_accents(s: &str) -> String {
    s.to_uppercase()
        .chars()
        .map(|c| match c {
            'Á' | 'À' | 'Ä' => 'A',
            'É' | 'È' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            other => other,
        })
        .collect()
}

/// Parse a COP amount written with thousands separators, e.g. `"1,250,000"`.
/// Negative or unparseable amounts yield `None`.
pub fn parse_cop_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '"' && *c != ',' && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn upper_trim(raw: Option<&str>) -> Option<String> {
    raw.map(|s| WHITESPACE.replace_all(s.trim(), " ").to_uppercase())
        .filter(|s| !s.is_empty())
}

/// Turns raw rows into `TransactionRecord`s. Stateless apart from its lookup tables.
pub struct Cleaner {
    municipality_mapping: HashMap<String, String>,
}

impl Cleaner {
    pub fn new(config: &StandardizeConfig) -> Self {
        let municipality_mapping = config
            .municipality_mapping
            .iter()
            .map(|(from, to)| (fold_accents(from.trim()), to.trim().to_uppercase()))
            .collect();
        Self {
            municipality_mapping,
        }
    }

    /// Normalize a municipality name and apply the alias table
    pub fn normalize_municipality(&self, raw: &str) -> String {
        let folded = fold_accents(WHITESPACE.replace_all(raw.trim(), " ").as_ref());
        self.municipality_mapping
            .get(&folded)
            .cloned()
            .unwrap_or(folded)
    }

    pub fn clean(&self, raw: &RawRecord) -> Result<TransactionRecord, RejectedRecord> {
        // Stray double quotes are an export defect, never data
        let unquoted: HashMap<&str, String> = raw
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.replace('"', "")))
            .collect();
        let field = |col: &str| {
            unquoted
                .get(col)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let pk = field(COL_PK).map(str::to_string);
        let reject = |message: String| RejectedRecord {
            line: raw.line,
            pk: pk.clone(),
            stage: STAGE.to_string(),
            kind: RejectKind::ParseError,
            message: RecordError::Parse(message).to_string(),
        };

        let pk_value = pk.clone().ok_or_else(|| reject("missing PK".to_string()))?;
        let matricula = upper_trim(field(COL_MATRICULA))
            .ok_or_else(|| reject("missing MATRICULA".to_string()))?;
        let departamento_raw = field(COL_DEPARTAMENTO)
            .map(str::to_string)
            .ok_or_else(|| reject("missing DEPARTAMENTO".to_string()))?;
        let municipio_raw = field(COL_MUNICIPIO)
            .map(str::to_string)
            .ok_or_else(|| reject("missing MUNICIPIO".to_string()))?;

        let orip = match field(COL_ORIP) {
            None | Some("0") | Some("0.0") => SIN_ORIP.to_string(),
            Some(s) => s.to_uppercase(),
        };

        let (valor, value_imputed) = match field(COL_VALOR).and_then(parse_cop_value) {
            Some(v) => (v, false),
            None => (0.0, true),
        };

        let num_anotacion = parse_number(field(COL_NUM_ANOTACION))
            .filter(|v| *v >= 0.0)
            .map(|v| v.round() as u32)
            .unwrap_or(0);

        let record = TransactionRecord {
            line: raw.line,
            pk: pk_value,
            matricula,
            numero_catastral: field(COL_NUMERO_CATASTRAL)
                .map(str::to_string)
                .unwrap_or_else(|| SIN_FOLIO_CATASTRAL.to_string()),
            numero_catastral_antiguo: field(COL_NUMERO_CATASTRAL_ANTIGUO).map(str::to_string),
            fecha_radica: field(COL_FECHA_RADICA).unwrap_or_default().to_string(),
            fecha_apertura: field(COL_FECHA_APERTURA).map(str::to_string),
            orip,
            divipola: upper_trim(field(COL_DIVIPOLA)),
            departamento: upper_trim(Some(departamento_raw.as_str())).unwrap_or_default(),
            municipio: self.normalize_municipality(&municipio_raw),
            departamento_raw,
            municipio_raw,
            tipo_predio_zona: upper_trim(field(COL_TIPO_PREDIO_ZONA)),
            categoria_ruralidad: upper_trim(field(COL_CATEGORIA_RURALIDAD)),
            num_anotacion,
            estado_folio: upper_trim(field(COL_ESTADO_FOLIO))
                .unwrap_or_else(|| ESTADO_FOLIO_DEFAULT.to_string()),
            folios_derivados: field(COL_FOLIOS_DERIVADOS)
                .map(str::to_string)
                .unwrap_or_else(|| SIN_FOLIO.to_string()),
            dinamica: upper_trim(field(COL_DINAMICA)),
            cod_natujur: field(COL_COD_NATUJUR).map(str::to_string),
            nombre_natujur: upper_trim(field(COL_NOMBRE_NATUJUR)),
            documento: upper_trim(field(COL_DOCUMENTO))
                .unwrap_or_else(|| SIN_DOCUMENTO.to_string()),
            count_a: parse_number(field(COL_COUNT_A)).unwrap_or(0.0),
            count_de: parse_number(field(COL_COUNT_DE)).unwrap_or(0.0),
            predios_nuevos: parse_number(field(COL_PREDIOS_NUEVOS)).unwrap_or(0.0),
            tiene_valor: parse_number(field(COL_TIENE_VALOR)).map(|v| v != 0.0).unwrap_or(false),
            tiene_mas_de_un_valor: parse_number(field(COL_TIENE_MAS_DE_UN_VALOR))
                .map(|v| v != 0.0)
                .unwrap_or(false),
            valor,
            value_imputed,
            area: parse_number(field(COL_AREA))
                .filter(|v| *v >= 0.0)
                .unwrap_or(0.0),
            avaluo: field(COL_AVALUO).and_then(parse_cop_value),
        };

        if record.value_imputed {
            debug!(pk = %record.pk, line = raw.line, "VALOR missing, imputed as 0");
        }
        Ok(record)
    }
}

/// Keeps the first occurrence of each PK
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the PK has not been seen before
    pub fn admit(&mut self, pk: &str) -> bool {
        if self.seen.contains(pk) {
            self.duplicates += 1;
            false
        } else {
            self.seen.insert(pk.to_string());
            true
        }
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

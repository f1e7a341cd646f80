/// Column name constants for the IGAC transaction file.
/// These must match the header row of the input exactly (after quote stripping).

// Identity
pub const COL_PK: &str = "PK";
pub const COL_MATRICULA: &str = "MATRICULA";
pub const COL_NUMERO_CATASTRAL: &str = "NUMERO_CATASTRAL";
pub const COL_NUMERO_CATASTRAL_ANTIGUO: &str = "NUMERO_CATASTRAL_ANTIGUO";

// Dates
pub const COL_FECHA_RADICA: &str = "FECHA_RADICA_TEXTO";
pub const COL_FECHA_APERTURA: &str = "FECHA_APERTURA_TEXTO";
pub const COL_YEAR_RADICA: &str = "YEAR_RADICA";

// Geography
pub const COL_ORIP: &str = "ORIP";
pub const COL_DIVIPOLA: &str = "DIVIPOLA";
pub const COL_DEPARTAMENTO: &str = "DEPARTAMENTO";
pub const COL_MUNICIPIO: &str = "MUNICIPIO";
pub const COL_TIPO_PREDIO_ZONA: &str = "TIPO_PREDIO_ZONA";
pub const COL_CATEGORIA_RURALIDAD: &str = "CATEGORIA_RURALIDAD";

// Registry attributes
pub const COL_NUM_ANOTACION: &str = "NUM_ANOTACION";
pub const COL_ESTADO_FOLIO: &str = "ESTADO_FOLIO";
pub const COL_FOLIOS_DERIVADOS: &str = "FOLIOS_DERIVADOS";
pub const COL_DINAMICA: &str = "DINAMICA_INMOBILIARIA";
pub const COL_COD_NATUJUR: &str = "COD_NATUJUR";
pub const COL_NOMBRE_NATUJUR: &str = "NOMBRE_NATUJUR";
pub const COL_DOCUMENTO: &str = "DOCUMENTO_JUSTIFICATIVO";
pub const COL_COUNT_A: &str = "COUNT_A";
pub const COL_COUNT_DE: &str = "COUNT_DE";
pub const COL_PREDIOS_NUEVOS: &str = "PREDIOS_NUEVOS";

// Values
pub const COL_TIENE_VALOR: &str = "TIENE_VALOR";
pub const COL_TIENE_MAS_DE_UN_VALOR: &str = "TIENE_MAS_DE_UN_VALOR";
pub const COL_VALOR: &str = "VALOR";
pub const COL_AREA: &str = "AREA";
pub const COL_AVALUO: &str = "AVALUO_CATASTRAL";

/// Columns the loader refuses to run without.
pub const REQUIRED_COLUMNS: &[&str] = &[
    COL_PK,
    COL_MATRICULA,
    COL_VALOR,
    COL_FECHA_RADICA,
    COL_DEPARTAMENTO,
    COL_MUNICIPIO,
    COL_AREA,
];

/// Columns that must be populated after cleaning (value may be imputed, see `value_imputed`).
pub const CRITICAL_COLUMNS: &[&str] = &[
    COL_PK,
    COL_MUNICIPIO,
    COL_DEPARTAMENTO,
    COL_FECHA_RADICA,
    COL_VALOR,
];

// Imputation placeholders
pub const SIN_FOLIO: &str = "Sin folio";
pub const SIN_FOLIO_CATASTRAL: &str = "sin folio";
pub const SIN_ORIP: &str = "SIN_ORIP";
pub const ESTADO_FOLIO_DEFAULT: &str = "INACTIVO";
pub const SIN_DOCUMENTO: &str = "SIN_DOCUMENTO_JUSTIFICATIVO";

/// Filing-date formats, tried in order.
pub const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d/%m/%y",
    "%d-%m-%y",
];

// Valid ranges for the quality report
pub const VALID_YEAR_RANGE: (f64, f64) = (2015.0, 2025.0);
pub const VALID_VALUE_RANGE: (f64, f64) = (0.0, 1e12);

/// Common Spanish function words dropped by the text miner.
pub const STOPWORDS: &[&str] = &[
    "al", "ante", "como", "con", "contra", "de", "del", "desde", "el", "en", "entre", "es", "esta",
    "este", "hacia", "hasta", "la", "las", "lo", "los", "mediante", "no", "para", "por", "que", "se",
    "segun", "sin", "sobre", "su", "sus", "un", "una", "uno", "y",
];

/// Default municipality aliases, keys already accent-folded.
pub fn default_municipality_mapping() -> Vec<(&'static str, &'static str)> {
    vec![
        ("BOGOTA D.C.", "BOGOTÁ"),
        ("BOGOTA", "BOGOTÁ"),
        ("BOGOTA DC", "BOGOTÁ"),
        ("MEDELLIN", "MEDELLÍN"),
        ("CALI", "CALI"),
        ("BARRANQUILLA", "BARRANQUILLA"),
        ("CARTAGENA", "CARTAGENA DE INDIAS"),
    ]
}

/// Default IPC table (DANE), base 2015 = 100.
pub fn default_price_index() -> Vec<(i32, f64)> {
    vec![
        (2015, 100.0),
        (2016, 107.5),
        (2017, 111.8),
        (2018, 115.3),
        (2019, 119.4),
        (2020, 121.5),
        (2021, 126.9),
        (2022, 139.4),
        (2023, 151.2),
        (2024, 160.0),
        (2025, 168.0),
    ]
}

/// Adjusted value (COP) above which a transaction is marked ALTO_VALOR.
pub const HIGH_VALUE_THRESHOLD: f64 = 500_000_000.0;

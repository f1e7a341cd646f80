use chrono::NaiveDate;
use parquet::basic::{Compression, LogicalType, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::{SerializedColumnWriter, SerializedFileWriter};
use parquet::schema::types::{Type, TypePtr};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::HIGH_VALUE_THRESHOLD;
use crate::domain::{FlagKind, FlagSet, StandardizedRecord, TransactionRecord};
use crate::error::Result;

const ROW_GROUP_SIZE: usize = 500_000;

/// A standardized record with its phase 2 scores attached
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: StandardizedRecord,
    pub z_score: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub top_terms: Vec<String>,
}

enum ColumnData {
    Utf8(Vec<Option<String>>),
    Int32(Vec<Option<i32>>),
    Double(Vec<Option<f64>>),
    Date(Vec<i32>),
    Bool(Vec<bool>),
}

struct Column {
    name: &'static str,
    data: ColumnData,
}

impl Column {
    fn utf8(
        name: &'static str,
        rows: &[ScoredRecord],
        f: impl Fn(&ScoredRecord) -> Option<String>,
    ) -> Self {
        Self {
            name,
            data: ColumnData::Utf8(rows.iter().map(f).collect()),
        }
    }

    fn int32(
        name: &'static str,
        rows: &[ScoredRecord],
        f: impl Fn(&ScoredRecord) -> Option<i32>,
    ) -> Self {
        Self {
            name,
            data: ColumnData::Int32(rows.iter().map(f).collect()),
        }
    }

    fn double(
        name: &'static str,
        rows: &[ScoredRecord],
        f: impl Fn(&ScoredRecord) -> Option<f64>,
    ) -> Self {
        Self {
            name,
            data: ColumnData::Double(rows.iter().map(f).collect()),
        }
    }

    fn boolean(
        name: &'static str,
        rows: &[ScoredRecord],
        f: impl Fn(&ScoredRecord) -> bool,
    ) -> Self {
        Self {
            name,
            data: ColumnData::Bool(rows.iter().map(f).collect()),
        }
    }

    fn schema_type(&self) -> Result<TypePtr> {
        let (physical, logical, repetition) = match self.data {
            ColumnData::Utf8(_) => (
                PhysicalType::BYTE_ARRAY,
                Some(LogicalType::String),
                Repetition::OPTIONAL,
            ),
            ColumnData::Int32(_) => (PhysicalType::INT32, None, Repetition::OPTIONAL),
            ColumnData::Double(_) => (PhysicalType::DOUBLE, None, Repetition::OPTIONAL),
            ColumnData::Date(_) => (
                PhysicalType::INT32,
                Some(LogicalType::Date),
                Repetition::REQUIRED,
            ),
            ColumnData::Bool(_) => (PhysicalType::BOOLEAN, None, Repetition::REQUIRED),
        };
        Ok(Arc::new(
            Type::primitive_type_builder(self.name, physical)
                .with_repetition(repetition)
                .with_logical_type(logical)
                .build()?,
        ))
    }
}

fn tx(r: &ScoredRecord) -> &TransactionRecord {
    &r.record.record
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.signed_duration_since(NaiveDate::default()).num_days() as i32
}

/// Output columns, in file order
fn build_columns(rows: &[ScoredRecord], flags: &FlagSet) -> Vec<Column> {
    let mut columns = vec![
        Column::utf8("PK", rows, |r| Some(tx(r).pk.clone())),
        Column::utf8("MATRICULA", rows, |r| Some(tx(r).matricula.clone())),
        Column::utf8("NUMERO_CATASTRAL", rows, |r| Some(tx(r).numero_catastral.clone())),
        Column::utf8("ORIP", rows, |r| Some(tx(r).orip.clone())),
        Column::utf8("DIVIPOLA", rows, |r| r.record.divipola_code.clone()),
        Column::utf8("DEPARTAMENTO", rows, |r| Some(tx(r).departamento.clone())),
        Column::utf8("MUNICIPIO", rows, |r| Some(tx(r).municipio.clone())),
        Column::utf8("GEO_KEY", rows, |r| Some(r.record.geo_key.clone())),
        Column::utf8("TIPO_PREDIO_ZONA", rows, |r| tx(r).tipo_predio_zona.clone()),
        Column::utf8("CATEGORIA_RURALIDAD", rows, |r| tx(r).categoria_ruralidad.clone()),
        Column::utf8("DINAMICA_INMOBILIARIA", rows, |r| tx(r).dinamica.clone()),
        Column::utf8("COD_NATUJUR", rows, |r| tx(r).cod_natujur.clone()),
        Column::utf8("NOMBRE_NATUJUR", rows, |r| tx(r).nombre_natujur.clone()),
        Column::utf8("ESTADO_FOLIO", rows, |r| Some(tx(r).estado_folio.clone())),
        Column::utf8("DOCUMENTO_JUSTIFICATIVO", rows, |r| Some(tx(r).documento.clone())),
        Column {
            name: "FECHA_RADICA",
            data: ColumnData::Date(
                rows.iter()
                    .map(|r| days_since_epoch(r.record.filing_date))
                    .collect(),
            ),
        },
        Column::int32("ANIO_RADICA", rows, |r| Some(r.record.filing.year)),
        Column::int32("MES_RADICA", rows, |r| Some(r.record.filing.month as i32)),
        Column::int32("TRIMESTRE_RADICA", rows, |r| Some(r.record.filing.quarter as i32)),
        Column::int32("SEMESTRE_RADICA", rows, |r| Some(r.record.filing.semester as i32)),
        Column::int32("DIA_SEMANA_RADICA", rows, |r| Some(r.record.filing.weekday as i32)),
        Column::int32("ANIO_APERTURA", rows, |r| r.record.opening.map(|o| o.year)),
        Column::int32("MES_APERTURA", rows, |r| r.record.opening.map(|o| o.month as i32)),
        Column::int32("NUM_ANOTACION", rows, |r| Some(tx(r).num_anotacion as i32)),
        Column::double("VALOR", rows, |r| Some(tx(r).valor)),
        Column::boolean("VALOR_IMPUTADO", rows, |r| tx(r).value_imputed),
        Column::double("VALOR_AJUSTADO", rows, |r| r.record.adjusted_value),
        Column::double("AREA", rows, |r| Some(tx(r).area)),
        Column::double("AVALUO_CATASTRAL", rows, |r| tx(r).avaluo),
        Column::double("PRECIO_M2", rows, |r| r.record.price_per_area),
        Column::boolean("ALTO_VALOR", rows, |r| {
            r.record.adjusted_value.map_or(false, |v| v > HIGH_VALUE_THRESHOLD)
        }),
    ];

    for kind in FlagKind::detection_kinds()
        .into_iter()
        .chain(std::iter::once(FlagKind::MissingPriceIndex))
    {
        columns.push(Column::boolean(kind.label(), rows, |r| flags.has(r.record.pk(), kind)));
    }

    columns.extend([
        Column::double("Z_SCORE", rows, |r| r.z_score),
        Column::double("ANOMALY_SCORE", rows, |r| r.anomaly_score),
        Column::utf8("TYPOLOGIES", rows, |r| {
            let labels: Vec<&str> = flags
                .typologies(r.record.pk())
                .iter()
                .map(|t| t.label())
                .collect();
            (!labels.is_empty()).then(|| labels.join("|"))
        }),
        Column::utf8("TOP_TERMS", rows, |r| {
            (!r.top_terms.is_empty()).then(|| r.top_terms.join("|"))
        }),
    ]);
    columns
}

fn build_schema(columns: &[Column]) -> Result<TypePtr> {
    let fields = columns
        .iter()
        .map(Column::schema_type)
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(
        Type::group_type_builder("transactions").with_fields(fields).build()?,
    ))
}

/// Split optional values into dense values plus definition levels
fn dense<T, V>(values: &[Option<T>], f: impl Fn(&T) -> V) -> (Vec<V>, Vec<i16>) {
    let mut dense = Vec::with_capacity(values.len());
    let mut levels = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Some(v) => {
                dense.push(f(v));
                levels.push(1);
            }
            None => levels.push(0),
        }
    }
    (dense, levels)
}

fn write_column(writer: &mut SerializedColumnWriter<'_>, data: &ColumnData) -> Result<()> {
    match (writer.untyped(), data) {
        (ColumnWriter::ByteArrayColumnWriter(w), ColumnData::Utf8(values)) => {
            let (vals, levels) = dense(values, |s: &String| ByteArray::from(s.as_str()));
            w.write_batch(&vals, Some(&levels[..]), None)?;
        }
        (ColumnWriter::Int32ColumnWriter(w), ColumnData::Int32(values)) => {
            let (vals, levels) = dense(values, |v: &i32| *v);
            w.write_batch(&vals, Some(&levels[..]), None)?;
        }
        (ColumnWriter::Int32ColumnWriter(w), ColumnData::Date(values)) => {
            w.write_batch(values, None, None)?;
        }
        (ColumnWriter::DoubleColumnWriter(w), ColumnData::Double(values)) => {
            let (vals, levels) = dense(values, |v: &f64| *v);
            w.write_batch(&vals, Some(&levels[..]), None)?;
        }
        (ColumnWriter::BoolColumnWriter(w), ColumnData::Bool(values)) => {
            w.write_batch(values, None, None)?;
        }
        _ => {
            return Err(parquet::errors::ParquetError::General(
                "column writer does not match column data".to_string(),
            )
            .into())
        }
    }
    Ok(())
}

/// Write `transactions.parquet`, one row group per `ROW_GROUP_SIZE` records, ZSTD-compressed
pub fn write_transactions(path: &Path, rows: &[ScoredRecord], flags: &FlagSet) -> Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let schema = build_schema(&build_columns(&[], flags))?;
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build(),
    );

    let file = File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;
    for chunk in rows.chunks(ROW_GROUP_SIZE) {
        let columns = build_columns(chunk, flags);
        let mut row_group = writer.next_row_group()?;
        let mut index = 0;
        while let Some(mut column) = row_group.next_column()? {
            write_column(&mut column, &columns[index].data)?;
            column.close()?;
            index += 1;
        }
        row_group.close()?;
        debug!(rows = chunk.len(), "Row group written");
    }
    writer.close()?;

    info!(path = %path.display(), rows = rows.len(), "Parquet output written");
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MissingIndexPolicy, PipelineConfig};
    use crate::domain::{AnomalyFlag, FlagSource, Typology};
    use crate::pipeline::processing::standardize::tests::record;
    use crate::pipeline::processing::{StandardizeOutcome, Standardizer};
    use parquet::file::reader::{FileReader, SerializedFileReader};

    fn scored(pk: &str, z: Option<f64>) -> ScoredRecord {
        let standardizer = Standardizer::new(
            PipelineConfig::default().price_index().unwrap(),
            MissingIndexPolicy::Reject,
        );
        match standardizer.standardize(record(pk, "05/05/2022", 800_000_000.0, 100.0)) {
            StandardizeOutcome::Standardized(r) => ScoredRecord {
                record: r,
                z_score: z,
                anomaly_score: Some(0.42),
                top_terms: vec!["remate".to_string()],
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_writes_all_rows_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transactions.parquet");
        let rows = vec![scored("1", Some(3.5)), scored("2", None)];
        let mut flags = FlagSet::new();
        flags.insert(AnomalyFlag::new("1", FlagSource::ZScore, FlagKind::StatOutlier, 3.5));
        flags.insert(AnomalyFlag::new(
            "1",
            FlagSource::Classifier,
            FlagKind::Typology(Typology::PossibleEvasion),
            1.0,
        ));

        assert_eq!(write_transactions(&path, &rows, &flags).unwrap(), 2);

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let meta = reader.metadata().file_metadata();
        assert_eq!(meta.num_rows(), 2);
        let names: Vec<&str> = meta
            .schema_descr()
            .columns()
            .iter()
            .map(|c| c.name())
            .collect();
        for expected in [
            "PK",
            "STAT_OUTLIER",
            "MODEL_OUTLIER",
            "Z_SCORE",
            "ANOMALY_SCORE",
            "TYPOLOGIES",
            "TOP_TERMS",
        ] {
            assert!(names.contains(&expected), "missing column {}", expected);
        }
    }

    #[test]
    fn test_empty_output_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        write_transactions(&path, &[], &FlagSet::new()).unwrap();
        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 0);
    }
}

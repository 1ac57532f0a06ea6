//! Flat CSV hand-off between acquisition and loading.
//!
//! Column order is fixed: `nombre, precio_actual, precio_anterior, descuento,
//! ubicacion, cuotas, envio_gratis, enlace, categoria, fecha_extraccion`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LoadError;
use crate::normalize;
use crate::record::{ProductRecord, TIMESTAMP_FORMAT};

pub const COLUMNS: [&str; 10] = [
    "nombre",
    "precio_actual",
    "precio_anterior",
    "descuento",
    "ubicacion",
    "cuotas",
    "envio_gratis",
    "enlace",
    "categoria",
    "fecha_extraccion",
];

const TRUE_TOKENS: [&str; 4] = ["true", "1", "yes", "sí"];

#[derive(Serialize)]
struct CsvRowOut<'a> {
    nombre: &'a str,
    precio_actual: Option<f64>,
    precio_anterior: Option<f64>,
    descuento: Option<u8>,
    ubicacion: Option<&'a str>,
    cuotas: Option<&'a str>,
    envio_gratis: &'static str,
    enlace: Option<&'a str>,
    categoria: &'a str,
    fecha_extraccion: String,
}

/// Cells are read as text and coerced by hand so a bad cell rejects one row
/// with a readable reason.
#[derive(Deserialize)]
struct CsvRowIn {
    nombre: Option<String>,
    precio_actual: Option<String>,
    precio_anterior: Option<String>,
    descuento: Option<String>,
    ubicacion: Option<String>,
    cuotas: Option<String>,
    envio_gratis: Option<String>,
    enlace: Option<String>,
    categoria: Option<String>,
    fecha_extraccion: Option<String>,
}

/// A CSV row that could not become a `ProductRecord`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReject {
    pub line: u64,
    pub reason: String,
}

pub struct InterchangeBatch {
    pub records: Vec<ProductRecord>,
    pub rejected: Vec<RowReject>,
}

impl InterchangeBatch {
    /// Every data row in the file, accepted or not.
    pub fn rows(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

pub fn write_records(path: &Path, records: &[ProductRecord]) -> Result<usize, LoadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| LoadError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for r in records {
        writer
            .serialize(CsvRowOut {
                nombre: &r.name,
                precio_actual: r.current_price,
                precio_anterior: r.previous_price,
                descuento: r.discount_percent,
                ubicacion: r.location.as_deref(),
                cuotas: r.installments.as_deref(),
                envio_gratis: if r.free_shipping { "True" } else { "False" },
                enlace: r.link.as_deref(),
                categoria: &r.category,
                fecha_extraccion: r.timestamp(),
            })
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), rows = records.len(), "interchange written");
    Ok(records.len())
}

/// Reads the interchange file. A missing file is fatal; bad rows are not.
///
/// `now` stands in for unreadable extraction timestamps.
pub fn read_records(path: &Path, now: DateTime<Utc>) -> Result<InterchangeBatch, LoadError> {
    if !path.exists() {
        return Err(LoadError::MissingInterchange(path.to_path_buf()));
    }
    let csv_err = |source| LoadError::Csv {
        path: PathBuf::from(path),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let missing: Vec<&str> = COLUMNS
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .collect();
    if !missing.is_empty() {
        warn!(path = %path.display(), ?missing, "interchange header lacks columns");
    }

    let mut records = Vec::new();
    let mut rejected = Vec::new();

    for (index, row) in reader.records().enumerate() {
        // line 1 is the header
        let fallback_line = index as u64 + 2;
        let (line, parsed) = match row {
            Ok(record) => (
                record.position().map_or(fallback_line, |p| p.line()),
                record
                    .deserialize::<CsvRowIn>(Some(&headers))
                    .map_err(|e| format!("malformed row: {e}"))
                    .and_then(|raw| coerce_row(raw, now)),
            ),
            Err(e) => (
                e.position().map_or(fallback_line, |p| p.line()),
                Err(format!("malformed row: {e}")),
            ),
        };
        match parsed {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!(line, %reason, "row skipped");
                rejected.push(RowReject { line, reason });
            }
        }
    }

    info!(
        path = %path.display(),
        accepted = records.len(),
        rejected = rejected.len(),
        "interchange read"
    );
    Ok(InterchangeBatch { records, rejected })
}

fn coerce_row(raw: CsvRowIn, now: DateTime<Utc>) -> Result<ProductRecord, String> {
    let name = normalize::clean_text(raw.nombre.as_deref()).ok_or("blank nombre")?;
    let category = normalize::clean_text(raw.categoria.as_deref()).ok_or("blank categoria")?;

    Ok(ProductRecord {
        name,
        current_price: number_cell("precio_actual", raw.precio_actual.as_deref())?,
        previous_price: number_cell("precio_anterior", raw.precio_anterior.as_deref())?,
        discount_percent: discount_cell(raw.descuento.as_deref())?,
        location: normalize::clean_text(raw.ubicacion.as_deref()),
        installments: normalize::clean_text(raw.cuotas.as_deref()),
        free_shipping: bool_cell(raw.envio_gratis.as_deref()),
        link: normalize::clean_text(raw.enlace.as_deref()),
        category,
        // Load time stands in for an unreadable timestamp, so under `full_row`
        // such rows get a new key on every load and are not deduplicated.
        extracted_at: timestamp_cell(raw.fecha_extraccion.as_deref()).unwrap_or(now),
    })
}

fn number_cell(column: &str, cell: Option<&str>) -> Result<Option<f64>, String> {
    let Some(text) = cell.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("{column}: not a number: {text:?}")),
    }
}

fn discount_cell(cell: Option<&str>) -> Result<Option<u8>, String> {
    let Some(value) = number_cell("descuento", cell)? else {
        return Ok(None);
    };
    if value.fract() != 0.0 {
        return Err(format!("descuento: not an integer: {value}"));
    }
    // range is enforced by the table's CHECK constraint
    if !(0.0..=255.0).contains(&value) {
        return Err(format!("descuento: out of range: {value}"));
    }
    Ok(Some(value as u8))
}

fn bool_cell(cell: Option<&str>) -> bool {
    cell.map(|c| c.trim().to_lowercase())
        .is_some_and(|c| TRUE_TOKENS.contains(&c.as_str()))
}

fn timestamp_cell(cell: Option<&str>) -> Option<DateTime<Utc>> {
    let text = cell?.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{sample, DedupKey};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn write_raw(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("productos.csv");
        fs::write(&path, format!("{}\n{body}", COLUMNS.join(","))).unwrap();
        path
    }

    #[test]
    fn header_is_the_ten_column_contract() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/productos.csv");
        write_records(&path, &[sample("Notebook", "laptops", Some(1.0))]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), COLUMNS.join(","));
    }

    #[test]
    fn written_records_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("productos.csv");
        let mut full = sample("Notebook, 15\"", "laptops", Some(1503899.0));
        full.previous_price = Some(1799999.0);
        full.discount_percent = Some(16);
        full.location = Some("Capital Federal".into());
        full.installments = Some("12 cuotas de $ 125.324".into());
        full.free_shipping = true;
        let mut bare = sample("Promo", "laptops", None);
        bare.link = None;

        write_records(&path, &[full.clone(), bare.clone()]).unwrap();
        let batch = read_records(&path, now()).unwrap();

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.records, vec![full, bare]);
    }

    #[test]
    fn unreadable_timestamp_takes_load_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(&dir, "A,100,,,,,False,,laptops,ayer\n");
        let later = now() + chrono::Duration::hours(1);

        let first = read_records(&path, now()).unwrap().records;
        let second = read_records(&path, later).unwrap().records;

        assert_eq!(first[0].extracted_at, now());
        assert_eq!(second[0].extracted_at, later);
        assert_ne!(
            first[0].natural_key(DedupKey::FullRow),
            second[0].natural_key(DedupKey::FullRow)
        );
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.csv");
        assert!(matches!(
            read_records(&path, now()),
            Err(LoadError::MissingInterchange(p)) if p == path
        ));
    }

    #[test]
    fn bad_number_rejects_only_that_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(
            &dir,
            "A,100,,,,,False,,laptops,2026-03-14 10:00:00\n\
             B,abc,,,,,False,,laptops,2026-03-14 10:00:00\n\
             C,300,,,,,False,,laptops,2026-03-14 10:00:00\n",
        );
        let batch = read_records(&path, now()).unwrap();

        assert_eq!(batch.rows(), 3);
        let names: Vec<&str> = batch.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].line, 3);
        assert!(batch.rejected[0].reason.contains("precio_actual"));
    }

    #[test]
    fn blank_name_and_short_rows_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(
            &dir,
            "  ,1,,,,,False,,laptops,2026-03-14 10:00:00\n\
             only,three,cells\n\
             ok,1,,,,,False,,laptops,2026-03-14 10:00:00\n",
        );
        let batch = read_records(&path, now()).unwrap();

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.rejected.len(), 2);
    }

    #[test]
    fn loose_cells_follow_loader_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(
            &dir,
            "A,1,,23,  ,,sí,,laptops,yesterday\n\
             B,1,,,,,TRUE,,laptops,2026-03-14T10:00:00Z\n\
             C,1,,,,,maybe,,laptops,\n",
        );
        let batch = read_records(&path, now()).unwrap();
        let [a, b, c] = &batch.records[..] else {
            panic!("expected three records, got {}", batch.records.len());
        };

        assert_eq!(a.discount_percent, Some(23));
        assert_eq!(a.location, None);
        assert!(a.free_shipping);
        assert_eq!(a.extracted_at, now());

        assert!(b.free_shipping);
        assert_eq!(b.extracted_at, Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap());

        assert!(!c.free_shipping);
        assert_eq!(c.extracted_at, now());
    }
}

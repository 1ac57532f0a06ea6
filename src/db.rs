use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, Connection};

use crate::record::{DedupKey, ProductRecord};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS productos (
            id               INTEGER PRIMARY KEY,
            nombre           TEXT    NOT NULL CHECK (length(trim(nombre)) > 0),
            precio_actual    REAL,
            precio_anterior  REAL,
            descuento        INTEGER CHECK (descuento IS NULL OR descuento BETWEEN 0 AND 100),
            ubicacion        TEXT    CHECK (ubicacion IS NULL OR length(ubicacion) <= 200),
            cuotas           TEXT    CHECK (cuotas IS NULL OR length(cuotas) <= 200),
            envio_gratis     BOOLEAN NOT NULL DEFAULT 0,
            enlace           TEXT,
            categoria        TEXT    NOT NULL CHECK (length(categoria) BETWEEN 1 AND 100),
            fecha_extraccion TEXT    NOT NULL,
            clave_natural    TEXT    NOT NULL UNIQUE
        );
        CREATE INDEX IF NOT EXISTS idx_productos_categoria ON productos(categoria);
        ",
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Inserts one product unless a row with the same natural key exists.
pub fn insert_product(
    conn: &Connection,
    record: &ProductRecord,
    key: DedupKey,
) -> rusqlite::Result<InsertOutcome> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO productos
         (nombre, precio_actual, precio_anterior, descuento, ubicacion, cuotas,
          envio_gratis, enlace, categoria, fecha_extraccion, clave_natural)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(clave_natural) DO NOTHING",
    )?;
    let changed = stmt.execute(params![
        record.name,
        record.current_price,
        record.previous_price,
        record.discount_percent,
        record.location,
        record.installments,
        record.free_shipping,
        record.link,
        record.category,
        record.timestamp(),
        record.natural_key(key),
    ])?;
    Ok(if changed == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    })
}

pub fn count_products(conn: &Connection) -> rusqlite::Result<usize> {
    conn.query_row("SELECT COUNT(*) FROM productos", [], |r| r.get(0))
}

// ── Read-only queries ──

/// Column names plus raw values, in result order.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Runs a read-only statement. Anything that would write is refused.
pub fn query_table(conn: &Connection, sql: &str) -> rusqlite::Result<Table> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(rusqlite::Error::InvalidQuery);
    }
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Table { columns, rows })
}

#[cfg(test)]
pub(crate) fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

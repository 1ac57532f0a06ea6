//! Fixed read-only reports over `productos`.
//!
//! Tie order is whatever SQLite returns: e.g. two products sharing the top
//! price of a category may come back in either order.

use rusqlite::types::Value;
use rusqlite::Connection;

use crate::db::{self, Table};

pub struct Report {
    pub title: &'static str,
    pub sql: &'static str,
}

pub const REPORTS: [Report; 9] = [
    Report {
        title: "1. Precio promedio por categoría",
        sql: "SELECT categoria, ROUND(AVG(precio_actual), 2) AS precio_promedio
              FROM productos
              WHERE precio_actual IS NOT NULL
              GROUP BY categoria
              ORDER BY precio_promedio DESC",
    },
    Report {
        title: "2. Producto más costoso por categoría",
        sql: "SELECT categoria, nombre, precio_actual
              FROM (
                  SELECT categoria, nombre, precio_actual,
                         ROW_NUMBER() OVER (PARTITION BY categoria ORDER BY precio_actual DESC) AS rn
                  FROM productos
                  WHERE precio_actual IS NOT NULL
              )
              WHERE rn = 1
              ORDER BY categoria",
    },
    Report {
        title: "3. Productos con / sin envío gratis",
        sql: "SELECT envio_gratis, COUNT(*) AS cantidad
              FROM productos
              GROUP BY envio_gratis
              ORDER BY envio_gratis DESC",
    },
    Report {
        title: "4. Ubicaciones con más publicaciones (top 10)",
        sql: "SELECT COALESCE(NULLIF(TRIM(ubicacion), ''), 'Sin ubicación') AS ubicacion,
                     COUNT(*) AS publicaciones
              FROM productos
              GROUP BY 1
              ORDER BY publicaciones DESC
              LIMIT 10",
    },
    Report {
        title: "5. Descuento promedio por categoría",
        sql: "SELECT categoria, ROUND(AVG(descuento), 1) AS descuento_promedio_pct
              FROM productos
              WHERE descuento IS NOT NULL
              GROUP BY categoria
              ORDER BY descuento_promedio_pct DESC",
    },
    Report {
        title: "6. Productos sobre el precio promedio general",
        sql: "SELECT COUNT(*) AS sobre_promedio
              FROM productos
              WHERE precio_actual > (
                  SELECT AVG(precio_actual) FROM productos WHERE precio_actual IS NOT NULL
              )",
    },
    Report {
        title: "7. Los 5 más económicos por categoría",
        sql: "SELECT categoria, nombre, precio_actual
              FROM (
                  SELECT categoria, nombre, precio_actual,
                         ROW_NUMBER() OVER (PARTITION BY categoria ORDER BY precio_actual ASC) AS rn
                  FROM productos
                  WHERE precio_actual IS NOT NULL
              )
              WHERE rn <= 5
              ORDER BY categoria, precio_actual",
    },
    Report {
        title: "8. Ahorro promedio (precio anterior vs actual)",
        sql: "SELECT categoria, ROUND(AVG(precio_anterior - precio_actual), 2) AS ahorro_promedio
              FROM productos
              WHERE precio_anterior IS NOT NULL
                AND precio_actual IS NOT NULL
                AND precio_anterior > precio_actual
              GROUP BY categoria
              ORDER BY ahorro_promedio DESC",
    },
    Report {
        title: "9. Distribución por rango de precio",
        sql: "SELECT CASE
                       WHEN precio_actual < 500000 THEN 'Bajo (< 500k)'
                       WHEN precio_actual < 1500000 THEN 'Medio (500k – 1.5M)'
                       ELSE 'Alto (> 1.5M)'
                     END AS rango,
                     COUNT(*) AS cantidad
              FROM productos
              WHERE precio_actual IS NOT NULL
              GROUP BY rango
              ORDER BY MIN(precio_actual)",
    },
];

pub fn run_all(conn: &Connection) -> rusqlite::Result<Vec<(&'static str, Table)>> {
    REPORTS
        .iter()
        .map(|r| Ok((r.title, db::query_table(conn, r.sql)?)))
        .collect()
}

/// Left-aligned text table with a dashed rule under the header.
pub fn render(table: &Table) -> String {
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(&table.columns)];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    if cells.is_empty() {
        out.push("(sin filas)".to_string());
    }
    out.extend(cells.iter().map(|row| line(row)));
    out.join("\n")
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format!("{f:.2}"),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

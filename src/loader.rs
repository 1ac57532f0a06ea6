use std::path::Path;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, InsertOutcome};
use crate::error::LoadError;
use crate::interchange;
use crate::record::{DedupKey, ProductRecord};

/// Observable result of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub batch_size: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Inserts each record on its own; a failing row is logged and skipped.
/// Everything that succeeded is committed once at the end.
pub fn load_records(
    conn: &Connection,
    records: &[ProductRecord],
    key: DedupKey,
) -> Result<LoadReport, LoadError> {
    let mut report = LoadReport {
        batch_size: records.len(),
        ..LoadReport::default()
    };

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} rows")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let tx = conn.unchecked_transaction()?;
    for record in records {
        match db::insert_product(&tx, record, key) {
            Ok(InsertOutcome::Inserted) => report.inserted += 1,
            Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
            Err(e) => {
                warn!(name = %record.name, category = %record.category, error = %e, "row skipped");
                report.skipped += 1;
            }
        }
        pb.inc(1);
    }
    tx.commit()?;
    pb.finish_and_clear();

    info!(
        batch = report.batch_size,
        inserted = report.inserted,
        duplicates = report.duplicates,
        skipped = report.skipped,
        "load finished"
    );
    Ok(report)
}

/// Loads the CSV interchange. Rows the CSV reader rejects count as skipped.
pub fn load_csv(conn: &Connection, path: &Path, key: DedupKey) -> Result<LoadReport, LoadError> {
    let batch = interchange::read_records(path, Utc::now())?;
    let mut report = load_records(conn, &batch.records, key)?;
    report.batch_size = batch.rows();
    report.skipped += batch.rejected.len();
    Ok(report)
}

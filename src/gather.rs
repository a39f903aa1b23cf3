//! gather.rs
//!
//! Dispatch driver: runs every registered collector against one `since`
//! watermark, writes each result as `<key>.json` into a dated archive
//! directory, then exports the bulk tables to CSV alongside them.
//!
//! Collector failures are isolated here: a broken collector is logged and
//! recorded, and the run continues with the next one.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{error, info};

use crate::collectors::{Context, REGISTRY};
use crate::errors::CollectError;
use crate::export::{copy_tables, TableExport};
use crate::metrics::{COLLECTOR_ERRORS, GATHER_DURATION, GATHER_RUNS};

/// What one gather run produced.
#[derive(Debug)]
pub struct GatherReport {
    pub archive_dir: PathBuf,
    pub written: Vec<PathBuf>,
    pub failed_collectors: Vec<(String, String)>,
    pub table_exports: Vec<TableExport>,
}

impl GatherReport {
    pub fn fully_successful(&self) -> bool {
        self.failed_collectors.is_empty() && self.table_exports.iter().all(|t| t.is_written())
    }
}

/// Name of the archive directory for a run started at `stamp`.
pub fn archive_dir_name(stamp: DateTime<Utc>) -> String {
    format!("telemetry-{}", stamp.format("%Y-%m-%d-%H%M%S"))
}

/// Run every collector with `since` and archive the results under the
/// configured output directory.
///
/// Only archive-directory creation is fatal; individual collector and
/// table-export failures are reported in the returned [`GatherReport`].
pub async fn gather(cx: &Context, since: DateTime<Utc>) -> Result<GatherReport, CollectError> {
    GATHER_RUNS.inc();
    let timer = GATHER_DURATION.start_timer();

    let archive_dir = cx.settings.output_dir.join(archive_dir_name(Utc::now()));
    tokio::fs::create_dir_all(&archive_dir)
        .await
        .map_err(|e| CollectError::Io(archive_dir.display().to_string(), e))?;

    let mut written = Vec::new();
    let mut failed_collectors = Vec::new();

    for collector in REGISTRY {
        match collector.collect(cx, since).await {
            Ok(value) => {
                let path = archive_dir.join(format!("{}.json", collector.key));
                let body = serde_json::to_vec_pretty(&value)?;
                tokio::fs::write(&path, body)
                    .await
                    .map_err(|e| CollectError::Io(path.display().to_string(), e))?;
                info!(collector = collector.key, path = %path.display(), "Collected");
                written.push(path);
            }
            Err(e) => {
                COLLECTOR_ERRORS.with_label_values(&[collector.key]).inc();
                error!(collector = collector.key, error = %e, "Collector failed");
                failed_collectors.push((collector.key.to_string(), e.to_string()));
            }
        }
    }

    let table_exports = copy_tables(&cx.pool, since, &archive_dir).await;

    timer.observe_duration();
    Ok(GatherReport {
        archive_dir,
        written,
        failed_collectors,
        table_exports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn archive_dir_names_are_dated() {
        let stamp = Utc.with_ymd_and_hms(2019, 6, 1, 12, 30, 5).unwrap();
        assert_eq!(archive_dir_name(stamp), "telemetry-2019-06-01-123005");
    }

    #[test]
    fn report_with_failures_is_not_fully_successful() {
        let report = GatherReport {
            archive_dir: PathBuf::from("/tmp/a"),
            written: vec![],
            failed_collectors: vec![("counts".into(), "boom".into())],
            table_exports: vec![],
        };
        assert!(!report.fully_successful());

        let report = GatherReport {
            archive_dir: PathBuf::from("/tmp/a"),
            written: vec![PathBuf::from("/tmp/a/config.json")],
            failed_collectors: vec![],
            table_exports: vec![TableExport::Written {
                table: "events",
                path: PathBuf::from("/tmp/a/events_table.csv"),
            }],
        };
        assert!(report.fully_successful());

        let report = GatherReport {
            archive_dir: PathBuf::from("/tmp/a"),
            written: vec![],
            failed_collectors: vec![],
            table_exports: vec![TableExport::Failed {
                table: "events",
                reason: "copy interrupted".into(),
            }],
        };
        assert!(!report.fully_successful());
    }
}

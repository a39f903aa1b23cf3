//! export.rs
//!
//! Bulk table exporter: streams the job-event and unified-job tables,
//! filtered to rows created after `since`, straight from Postgres
//! `COPY ... TO STDOUT` into CSV files in the archive directory.
//!
//! Unlike the collectors this is deliberately fail-soft: each table's
//! outcome is returned as a tagged [`TableExport`], so one table's failure
//! never aborts the other's export and a caller can never mistake a
//! failure for an output path.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::PgPoolCopyExt;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

/// Outcome of one table's export. A failed export may leave a missing or
/// partially written file behind; only `Written` guarantees a complete,
/// consistently ordered dump.
#[derive(Debug)]
pub enum TableExport {
    Written { table: &'static str, path: PathBuf },
    Failed { table: &'static str, reason: String },
}

impl TableExport {
    pub fn is_written(&self) -> bool {
        matches!(self, TableExport::Written { .. })
    }

    pub fn table(&self) -> &'static str {
        match self {
            TableExport::Written { table, .. } => table,
            TableExport::Failed { table, .. } => table,
        }
    }
}

/// CSV file name for a table, `<table>_table.csv`.
pub fn table_file_name(table: &str) -> String {
    format!("{table}_table.csv")
}

/// COPY does not take bind parameters, so the `since` watermark is
/// rendered into the statement as a timestamp literal.
fn since_literal(since: DateTime<Utc>) -> String {
    format!("'{}+00'", since.format("%Y-%m-%d %H:%M:%S%.6f"))
}

fn events_query(since: DateTime<Utc>) -> String {
    format!(
        r#"COPY (SELECT e.id,
                        e.created,
                        e.uuid,
                        e.parent_uuid,
                        e.event,
                        e.event_data::json->'task_action' AS task_action,
                        e.failed,
                        e.changed,
                        e.playbook,
                        e.play,
                        e.task,
                        e.role,
                        e.job_id,
                        e.host_id,
                        e.host_name
                 FROM job_events e
                 WHERE e.created > {since}
                 ORDER BY e.id ASC) TO STDOUT WITH (FORMAT csv)"#,
        since = since_literal(since),
    )
}

fn unified_jobs_query(since: DateTime<Utc>) -> String {
    format!(
        r#"COPY (SELECT DISTINCT j.id,
                        j.polymorphic_ctype_id,
                        ct.model,
                        j.created,
                        j.name,
                        j.unified_job_template_id,
                        j.launch_type,
                        j.schedule_id,
                        j.execution_node,
                        j.controller_node,
                        j.cancel_flag,
                        j.status,
                        j.failed,
                        j.started,
                        j.finished,
                        j.elapsed,
                        j.job_explanation,
                        j.instance_group_id
                 FROM unified_jobs j
                 JOIN content_types ct ON j.polymorphic_ctype_id = ct.id
                 WHERE j.created > {since}
                 ORDER BY j.id ASC) TO STDOUT WITH (FORMAT csv)"#,
        since = since_literal(since),
    )
}

/// Stream one COPY statement into `path`. The file handle is scoped, so it
/// is released on every exit path; on failure the file may exist with a
/// partial prefix of the dump.
async fn copy_table(
    pool: &PgPool,
    table: &'static str,
    query: String,
    dir: &Path,
) -> TableExport {
    let path = dir.join(table_file_name(table));

    let result: Result<(), anyhow::Error> = async {
        let mut file = File::create(&path).await?;
        let mut stream = pool.copy_out_raw(&query).await?;
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            info!(table, path = %path.display(), "Exported table");
            TableExport::Written { table, path }
        }
        Err(e) => {
            error!(table, error = %e, "Table export failed");
            TableExport::Failed {
                table,
                reason: e.to_string(),
            }
        }
    }
}

/// Export the job-event and unified-job tables created after `since` to
/// `events_table.csv` and `unified_jobs_table.csv` under `dir`. Both
/// exports are always attempted; each outcome is reported independently.
pub async fn copy_tables(pool: &PgPool, since: DateTime<Utc>, dir: &Path) -> Vec<TableExport> {
    vec![
        copy_table(pool, "events", events_query(since), dir).await,
        copy_table(pool, "unified_jobs", unified_jobs_query(since), dir).await,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn table_file_names_match_the_archive_layout() {
        assert_eq!(table_file_name("events"), "events_table.csv");
        assert_eq!(table_file_name("unified_jobs"), "unified_jobs_table.csv");
    }

    #[test]
    fn since_literal_renders_a_quoted_utc_timestamp() {
        let since = Utc.with_ymd_and_hms(2019, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(since_literal(since), "'2019-03-14 09:26:53.000000+00'");
    }

    #[test]
    fn events_query_selects_a_wellformed_column_list() {
        let q = events_query(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        // Every selected expression must be comma-separated from the next
        // and the list must not end with a dangling comma before FROM.
        assert!(q.contains("AS task_action,"));
        assert!(q.contains("e.failed,"));
        assert!(!q.contains(", FROM"));
        assert!(!q.contains(",\n                 FROM"));
        assert!(q.contains("ORDER BY e.id ASC"));
        assert!(q.contains("WHERE e.created > '1970-01-01 00:00:00.000000+00'"));
        assert!(q.ends_with("TO STDOUT WITH (FORMAT csv)"));
    }

    #[test]
    fn unified_jobs_query_joins_the_content_type_lookup() {
        let q = unified_jobs_query(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        assert!(q.contains("SELECT DISTINCT j.id"));
        assert!(q.contains("JOIN content_types ct ON j.polymorphic_ctype_id = ct.id"));
        assert!(q.contains("ct.model"));
        assert!(q.contains("ORDER BY j.id ASC"));
    }

    #[test]
    fn a_failed_export_is_never_a_path() {
        let outcome = TableExport::Failed {
            table: "events",
            reason: "connection reset".into(),
        };
        assert!(!outcome.is_written());
        assert_eq!(outcome.table(), "events");

        let outcome = TableExport::Written {
            table: "unified_jobs",
            path: PathBuf::from("/archive/unified_jobs_table.csv"),
        };
        assert!(outcome.is_written());
    }
}

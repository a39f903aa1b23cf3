//! collectors.rs
//!
//! Telemetry collectors: each function queries aggregate state from the
//! platform database and returns a report fragment that serializes cleanly
//! to JSON. Collectors are registered under a unique string key; the gather
//! driver calls every entry with `since`, the timestamp of the last
//! successful run, and writes the result as `<key>.json` into the archive.
//!
//! Collectors never catch database errors. A failing query propagates to
//! the driver, which logs it and moves on to the next collector.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::config::Settings;
use crate::errors::CollectError;

/// Shared read-only state handed to every collector.
pub struct Context {
    pub pool: PgPool,
    pub settings: Settings,
}

impl Context {
    pub fn new(pool: PgPool, settings: Settings) -> Self {
        Self { pool, settings }
    }
}

type CollectorFn =
    for<'a> fn(&'a Context, DateTime<Utc>) -> BoxFuture<'a, Result<Value, CollectError>>;

/// One registered collector: a unique key plus the adapter that runs the
/// typed collector function and serializes its result.
pub struct Collector {
    pub key: &'static str,
    run: CollectorFn,
}

impl Collector {
    pub async fn collect(
        &self,
        cx: &Context,
        since: DateTime<Utc>,
    ) -> Result<Value, CollectError> {
        (self.run)(cx, since).await
    }
}

/// Wraps a typed collector in the uniform registry signature: run it,
/// serialize the result to a JSON value.
macro_rules! adapt {
    ($wrapper:ident, $func:ident) => {
        fn $wrapper(
            cx: &Context,
            since: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<Value, CollectError>> {
            Box::pin(async move { Ok(serde_json::to_value($func(cx, since).await?)?) })
        }
    };
}

adapt!(run_config, config);
adapt!(run_counts, counts);
adapt!(run_org_counts, org_counts);
adapt!(run_cred_type_counts, cred_type_counts);
adapt!(run_inventory_counts, inventory_counts);
adapt!(run_projects_by_scm_type, projects_by_scm_type);
adapt!(run_instance_info, instance_info);
adapt!(run_job_counts, job_counts);
adapt!(run_job_instance_counts, job_instance_counts);

/// All collectors, in gather order. Keys are stable: they name the JSON
/// files in the shipped archive.
pub static REGISTRY: &[Collector] = &[
    Collector { key: "config", run: run_config },
    Collector { key: "counts", run: run_counts },
    Collector { key: "org_counts", run: run_org_counts },
    Collector { key: "cred_type_counts", run: run_cred_type_counts },
    Collector { key: "inventory_counts", run: run_inventory_counts },
    Collector { key: "projects_by_scm_type", run: run_projects_by_scm_type },
    Collector { key: "instance_info", run: run_instance_info },
    Collector { key: "job_counts", run: run_job_counts },
    Collector { key: "job_instance_counts", run: run_job_instance_counts },
];

// ────────────────────────────────────────────────────────────────────────
// config
// ────────────────────────────────────────────────────────────────────────

/// Identity and licensing snapshot. Not filtered by `since`: the full
/// record is recomputed on every run.
#[derive(Debug, Serialize)]
pub struct ConfigSnapshot {
    pub system_uuid: uuid::Uuid,
    pub base_url: String,
    pub platform_version: String,
    pub collector_version: &'static str,
    pub license_type: String,
    pub free_instances: i64,
    pub license_expiry: i64,
    pub tracking_state: bool,
    pub authentication_backends: Vec<String>,
    pub log_aggregators: Vec<String>,
}

/// Build the snapshot from settings alone. Missing license fields fall
/// back to the `UNLICENSED` sentinel and zero.
pub fn config_snapshot(settings: &Settings) -> ConfigSnapshot {
    let license = settings.license.clone().unwrap_or_default();
    ConfigSnapshot {
        system_uuid: settings.system_uuid,
        base_url: settings.base_url.clone(),
        platform_version: settings.platform_version.clone(),
        collector_version: env!("CARGO_PKG_VERSION"),
        license_type: license
            .license_type
            .unwrap_or_else(|| "UNLICENSED".to_string()),
        free_instances: license.free_instances.unwrap_or(0),
        license_expiry: license.time_remaining.unwrap_or(0),
        tracking_state: settings.tracking_state,
        authentication_backends: settings.authentication_backends.clone(),
        log_aggregators: settings.log_aggregators.clone(),
    }
}

async fn config(cx: &Context, _since: DateTime<Utc>) -> Result<ConfigSnapshot, CollectError> {
    Ok(config_snapshot(&cx.settings))
}

// ────────────────────────────────────────────────────────────────────────
// counts
// ────────────────────────────────────────────────────────────────────────

/// Models counted one-by-one, as (type name, table) pairs. The JSON key is
/// the snake_case transform of the type name.
const COUNTED_MODELS: &[(&str, &str)] = &[
    ("Organization", "organizations"),
    ("Team", "teams"),
    ("User", "users"),
    ("Inventory", "inventories"),
    ("Credential", "credentials"),
    ("Project", "projects"),
    ("JobTemplate", "job_templates"),
    ("WorkflowJobTemplate", "workflow_job_templates"),
    ("UnifiedJob", "unified_jobs"),
    ("Host", "hosts"),
    ("Schedule", "schedules"),
    ("CustomInventoryScript", "inventory_scripts"),
    ("NotificationTemplate", "notification_templates"),
];

/// `CamelCase` → `camel_case`, matching the key transform used for the
/// per-model counts.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Count custom execution environments, skipping the platform-provided
/// entry literally named `ansible` (trailing path separators ignored).
pub fn custom_venv_count(paths: &[String]) -> i64 {
    paths
        .iter()
        .filter(|p| {
            let trimmed = p.trim_end_matches('/');
            let basename = trimmed.rsplit('/').next().unwrap_or(trimmed);
            basename != "ansible"
        })
        .count() as i64
}

#[derive(Debug, sqlx::FromRow)]
pub struct BucketCount {
    pub bucket: String,
    pub count: i64,
}

/// Fold grouped rows into a name → count map.
pub fn histogram(rows: Vec<BucketCount>) -> BTreeMap<String, i64> {
    rows.into_iter().map(|r| (r.bucket, r.count)).collect()
}

/// Inventory counts grouped by `kind`. The empty kind is the plain,
/// manually-managed inventory; it is reported under `normal`.
pub fn inventory_kind_buckets(rows: Vec<BucketCount>) -> BTreeMap<String, i64> {
    rows.into_iter()
        .map(|r| {
            let kind = if r.bucket.is_empty() {
                "normal".to_string()
            } else {
                r.bucket
            };
            (kind, r.count)
        })
        .collect()
}

/// Channel sessions are whatever is left of the session store once API
/// sessions are subtracted. A negative remainder means the store is
/// inconsistent and is surfaced as an error, not clamped.
pub fn channel_sessions(total: i64, api: i64) -> Result<i64, CollectError> {
    if api > total {
        return Err(CollectError::SessionAccounting { total, api });
    }
    Ok(total - api)
}

#[derive(Debug, Serialize)]
pub struct Counts {
    #[serde(flatten)]
    pub models: BTreeMap<String, i64>,
    pub custom_virtualenvs: i64,
    pub inventories: BTreeMap<String, i64>,
    pub active_host_count: i64,
    pub active_sessions: i64,
    pub active_api_sessions: i64,
    pub active_channels_sessions: i64,
    pub running_jobs: i64,
}

async fn counts(cx: &Context, _since: DateTime<Utc>) -> Result<Counts, CollectError> {
    let mut models = BTreeMap::new();
    for (type_name, table) in COUNTED_MODELS {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&cx.pool)
            .await?;
        models.insert(snake_case(type_name), count);
    }

    let kind_rows = sqlx::query_as::<_, BucketCount>(
        r#"
        SELECT kind AS bucket, COUNT(*) AS count
        FROM inventories
        GROUP BY kind
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;

    // Active hosts count once per name: retries and re-imports of the same
    // host must not inflate the licensing figure.
    let active_host_count: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT name) FROM hosts")
            .fetch_one(&cx.pool)
            .await?;

    let active_sessions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE expire_date >= NOW()")
            .fetch_one(&cx.pool)
            .await?;

    let active_api_sessions: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM user_session_memberships m
        JOIN sessions s ON s.session_key = m.session_id
        WHERE s.expire_date >= NOW()
        "#,
    )
    .fetch_one(&cx.pool)
    .await?;

    let running_jobs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM unified_jobs WHERE status IN ('running', 'waiting')",
    )
    .fetch_one(&cx.pool)
    .await?;

    Ok(Counts {
        models,
        custom_virtualenvs: custom_venv_count(&cx.settings.custom_venv_paths),
        inventories: inventory_kind_buckets(kind_rows),
        active_host_count,
        active_sessions,
        active_api_sessions,
        active_channels_sessions: channel_sessions(active_sessions, active_api_sessions)?,
        running_jobs,
    })
}

// ────────────────────────────────────────────────────────────────────────
// org_counts
// ────────────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct OrgRow {
    pub id: i64,
    pub name: String,
    pub users: i64,
    pub teams: i64,
}

#[derive(Debug, Serialize)]
pub struct OrgCounts {
    pub name: String,
    pub users: i64,
    pub teams: i64,
}

pub fn org_map(rows: Vec<OrgRow>) -> BTreeMap<String, OrgCounts> {
    rows.into_iter()
        .map(|r| {
            (
                r.id.to_string(),
                OrgCounts {
                    name: r.name,
                    users: r.users,
                    teams: r.teams,
                },
            )
        })
        .collect()
}

async fn org_counts(
    cx: &Context,
    _since: DateTime<Utc>,
) -> Result<BTreeMap<String, OrgCounts>, CollectError> {
    let rows = sqlx::query_as::<_, OrgRow>(
        r#"
        SELECT o.id::bigint AS id, o.name,
               COUNT(DISTINCT m.user_id) AS users,
               COUNT(DISTINCT t.id) AS teams
        FROM organizations o
        LEFT JOIN organization_members m ON m.organization_id = o.id
        LEFT JOIN teams t ON t.organization_id = o.id
        GROUP BY o.id, o.name
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;
    Ok(org_map(rows))
}

// ────────────────────────────────────────────────────────────────────────
// cred_type_counts
// ────────────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct CredTypeRow {
    pub id: i64,
    pub name: String,
    pub managed: bool,
    pub credentials: i64,
}

#[derive(Debug, Serialize)]
pub struct CredTypeCounts {
    pub name: String,
    pub credential_count: i64,
    pub managed: bool,
}

pub fn cred_type_map(rows: Vec<CredTypeRow>) -> BTreeMap<String, CredTypeCounts> {
    rows.into_iter()
        .map(|r| {
            (
                r.id.to_string(),
                CredTypeCounts {
                    name: r.name,
                    credential_count: r.credentials,
                    managed: r.managed,
                },
            )
        })
        .collect()
}

async fn cred_type_counts(
    cx: &Context,
    _since: DateTime<Utc>,
) -> Result<BTreeMap<String, CredTypeCounts>, CollectError> {
    let rows = sqlx::query_as::<_, CredTypeRow>(
        r#"
        SELECT ct.id::bigint AS id, ct.name, ct.managed,
               COUNT(DISTINCT c.id) AS credentials
        FROM credential_types ct
        LEFT JOIN credentials c ON c.credential_type_id = ct.id
        GROUP BY ct.id, ct.name, ct.managed
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;
    Ok(cred_type_map(rows))
}

// ────────────────────────────────────────────────────────────────────────
// inventory_counts
// ────────────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct InventoryRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub hosts: i64,
    pub sources: i64,
}

#[derive(Debug, Serialize)]
pub struct InventoryCounts {
    pub name: String,
    pub kind: String,
    pub hosts: i64,
    pub sources: i64,
}

pub fn inventory_map(rows: Vec<InventoryRow>) -> BTreeMap<String, InventoryCounts> {
    rows.into_iter()
        .map(|r| {
            (
                r.id.to_string(),
                InventoryCounts {
                    name: r.name,
                    kind: r.kind,
                    hosts: r.hosts,
                    sources: r.sources,
                },
            )
        })
        .collect()
}

/// Per-inventory host and source counts. Normal inventories store their
/// membership directly; smart inventories resolve a host filter, so their
/// membership lives in the computed `smart_inventory_memberships` table
/// and needs its own query.
async fn inventory_counts(
    cx: &Context,
    _since: DateTime<Utc>,
) -> Result<BTreeMap<String, InventoryCounts>, CollectError> {
    let mut rows = sqlx::query_as::<_, InventoryRow>(
        r#"
        SELECT i.id::bigint AS id, i.name, i.kind,
               COUNT(DISTINCT h.id) AS hosts,
               COUNT(DISTINCT s.id) AS sources
        FROM inventories i
        LEFT JOIN hosts h ON h.inventory_id = i.id
        LEFT JOIN inventory_sources s ON s.inventory_id = i.id
        WHERE i.kind = ''
        GROUP BY i.id, i.name, i.kind
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;

    let smart_rows = sqlx::query_as::<_, InventoryRow>(
        r#"
        SELECT i.id::bigint AS id, i.name, i.kind,
               COUNT(DISTINCT m.host_id) AS hosts,
               COUNT(DISTINCT s.id) AS sources
        FROM inventories i
        LEFT JOIN smart_inventory_memberships m ON m.inventory_id = i.id
        LEFT JOIN inventory_sources s ON s.inventory_id = i.id
        WHERE i.kind = 'smart'
        GROUP BY i.id, i.name, i.kind
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;

    rows.extend(smart_rows);
    Ok(inventory_map(rows))
}

// ────────────────────────────────────────────────────────────────────────
// projects_by_scm_type
// ────────────────────────────────────────────────────────────────────────

/// Statically known SCM choices; the empty choice is a manually managed
/// project and is reported under `manual`.
pub const SCM_TYPE_CHOICES: &[&str] = &["", "git", "hg", "svn", "insights"];

/// Zero-initialize every known choice, then overlay observed counts. The
/// result always covers the union of known and observed types.
pub fn scm_type_histogram(rows: Vec<BucketCount>) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = SCM_TYPE_CHOICES
        .iter()
        .copied()
        .map(|t| {
            let key = if t.is_empty() { "manual" } else { t };
            (key.to_string(), 0)
        })
        .collect();
    for row in rows {
        let key = if row.bucket.is_empty() {
            "manual".to_string()
        } else {
            row.bucket
        };
        counts.insert(key, row.count);
    }
    counts
}

async fn projects_by_scm_type(
    cx: &Context,
    _since: DateTime<Utc>,
) -> Result<BTreeMap<String, i64>, CollectError> {
    let rows = sqlx::query_as::<_, BucketCount>(
        r#"
        SELECT scm_type AS bucket, COUNT(*) AS count
        FROM projects
        GROUP BY scm_type
        ORDER BY scm_type
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;
    Ok(scm_type_histogram(rows))
}

// ────────────────────────────────────────────────────────────────────────
// instance_info
// ────────────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct InstanceRow {
    pub uuid: String,
    pub hostname: String,
    pub version: String,
    pub capacity: i64,
    pub cpu: i64,
    pub memory: i64,
    pub managed_by_policy: bool,
}

#[derive(Debug, Serialize)]
pub struct InstanceInfo {
    pub hostname: String,
    pub version: String,
    pub capacity: i64,
    pub cpu: i64,
    pub memory: i64,
    pub managed_by_policy: bool,
}

/// One record per execution-node instance, keyed by its UUID.
pub fn instance_map(rows: Vec<InstanceRow>) -> BTreeMap<String, InstanceInfo> {
    rows.into_iter()
        .map(|r| {
            (
                r.uuid,
                InstanceInfo {
                    hostname: r.hostname,
                    version: r.version,
                    capacity: r.capacity,
                    cpu: r.cpu,
                    memory: r.memory,
                    managed_by_policy: r.managed_by_policy,
                },
            )
        })
        .collect()
}

async fn instance_info(
    cx: &Context,
    _since: DateTime<Utc>,
) -> Result<BTreeMap<String, InstanceInfo>, CollectError> {
    let rows = sqlx::query_as::<_, InstanceRow>(
        r#"
        SELECT uuid, hostname, version,
               capacity::bigint AS capacity,
               cpu::bigint AS cpu,
               memory::bigint AS memory,
               managed_by_policy
        FROM instances
        "#,
    )
    .fetch_all(&cx.pool)
    .await?;
    Ok(instance_map(rows))
}

// ────────────────────────────────────────────────────────────────────────
// job_counts
// ────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct JobCounts {
    pub total_jobs: i64,
    pub status: BTreeMap<String, i64>,
    pub launch_type: BTreeMap<String, i64>,
}

/// Lifetime job figures, deliberately unfiltered by `since`.
async fn job_counts(cx: &Context, _since: DateTime<Utc>) -> Result<JobCounts, CollectError> {
    let total_jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unified_jobs")
        .fetch_one(&cx.pool)
        .await?;

    let status_rows = sqlx::query_as::<_, BucketCount>(
        "SELECT status AS bucket, COUNT(*) AS count FROM unified_jobs GROUP BY status",
    )
    .fetch_all(&cx.pool)
    .await?;

    let launch_rows = sqlx::query_as::<_, BucketCount>(
        "SELECT launch_type AS bucket, COUNT(*) AS count FROM unified_jobs GROUP BY launch_type",
    )
    .fetch_all(&cx.pool)
    .await?;

    Ok(JobCounts {
        total_jobs,
        status: histogram(status_rows),
        launch_type: histogram(launch_rows),
    })
}

// ────────────────────────────────────────────────────────────────────────
// job_instance_counts
// ────────────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct NodeBucketCount {
    pub execution_node: String,
    pub bucket: String,
    pub count: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct NodeJobCounts {
    pub status: BTreeMap<String, i64>,
    pub launch_type: BTreeMap<String, i64>,
}

/// Merge the two grouped result sets into one record per execution node.
/// Each sub-map is named after what it counts: `status` holds status
/// buckets, `launch_type` holds launch-type buckets.
pub fn node_job_counts(
    status_rows: Vec<NodeBucketCount>,
    launch_rows: Vec<NodeBucketCount>,
) -> BTreeMap<String, NodeJobCounts> {
    let mut counts: BTreeMap<String, NodeJobCounts> = BTreeMap::new();
    for row in status_rows {
        counts
            .entry(row.execution_node)
            .or_default()
            .status
            .insert(row.bucket, row.count);
    }
    for row in launch_rows {
        counts
            .entry(row.execution_node)
            .or_default()
            .launch_type
            .insert(row.bucket, row.count);
    }
    counts
}

/// Per-node job histograms for jobs created after `since`.
async fn job_instance_counts(
    cx: &Context,
    since: DateTime<Utc>,
) -> Result<BTreeMap<String, NodeJobCounts>, CollectError> {
    let status_rows = sqlx::query_as::<_, NodeBucketCount>(
        r#"
        SELECT execution_node, status AS bucket, COUNT(*) AS count
        FROM unified_jobs
        WHERE created > $1
        GROUP BY execution_node, status
        "#,
    )
    .bind(since)
    .fetch_all(&cx.pool)
    .await?;

    let launch_rows = sqlx::query_as::<_, NodeBucketCount>(
        r#"
        SELECT execution_node, launch_type AS bucket, COUNT(*) AS count
        FROM unified_jobs
        WHERE created > $1
        GROUP BY execution_node, launch_type
        "#,
    )
    .bind(since)
    .fetch_all(&cx.pool)
    .await?;

    Ok(node_job_counts(status_rows, launch_rows))
}

// ────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LicenseInfo;

    fn bucket(name: &str, count: i64) -> BucketCount {
        BucketCount {
            bucket: name.to_string(),
            count,
        }
    }

    fn test_settings() -> Settings {
        Settings {
            database_url: "postgres://localhost/platform".into(),
            gather_interval: std::time::Duration::from_secs(4 * 3600),
            server_bind: "127.0.0.1:9100".into(),
            output_dir: "/tmp/telemetry".into(),
            system_uuid: uuid::Uuid::nil(),
            base_url: "https://platform.example.com".into(),
            platform_version: "9.2.0".into(),
            tracking_state: false,
            authentication_backends: vec!["builtin".into(), "ldap".into()],
            log_aggregators: vec![],
            custom_venv_paths: vec![],
            license: None,
        }
    }

    #[test]
    fn snake_case_transforms_model_names() {
        assert_eq!(snake_case("Organization"), "organization");
        assert_eq!(snake_case("JobTemplate"), "job_template");
        assert_eq!(snake_case("WorkflowJobTemplate"), "workflow_job_template");
        assert_eq!(snake_case("CustomInventoryScript"), "custom_inventory_script");
    }

    #[test]
    fn custom_venv_count_skips_the_builtin_entry() {
        let paths = vec![
            "/var/lib/venv/ansible".to_string(),
            "/var/lib/venv/ansible///".to_string(),
            "/var/lib/venv/data-science".to_string(),
            "/opt/envs/ansible-custom/".to_string(),
        ];
        assert_eq!(custom_venv_count(&paths), 2);
        assert_eq!(custom_venv_count(&[]), 0);
    }

    #[test]
    fn inventory_kind_empty_bucket_is_reported_as_normal() {
        let buckets = inventory_kind_buckets(vec![bucket("", 7), bucket("smart", 2)]);
        assert_eq!(buckets.get("normal"), Some(&7));
        assert_eq!(buckets.get("smart"), Some(&2));
        assert!(!buckets.contains_key(""));
        assert_eq!(buckets.values().sum::<i64>(), 9);
    }

    #[test]
    fn channel_sessions_is_the_non_api_remainder() {
        assert_eq!(channel_sessions(10, 4).unwrap(), 6);
        assert_eq!(channel_sessions(0, 0).unwrap(), 0);
    }

    #[test]
    fn channel_sessions_surfaces_inconsistent_stores() {
        let err = channel_sessions(3, 5).unwrap_err();
        assert!(matches!(
            err,
            CollectError::SessionAccounting { total: 3, api: 5 }
        ));
    }

    #[test]
    fn scm_histogram_covers_every_known_choice() {
        let counts = scm_type_histogram(vec![]);
        for choice in SCM_TYPE_CHOICES.iter().copied() {
            let key = if choice.is_empty() { "manual" } else { choice };
            assert_eq!(counts.get(key), Some(&0), "missing zero for {key}");
        }
    }

    #[test]
    fn scm_histogram_maps_the_empty_choice_to_manual() {
        let counts = scm_type_histogram(vec![bucket("", 3), bucket("git", 12)]);
        assert_eq!(counts.get("manual"), Some(&3));
        assert_eq!(counts.get("git"), Some(&12));
        assert!(!counts.contains_key(""));
        // Unused known choices stay present with zero counts.
        assert_eq!(counts.get("svn"), Some(&0));
    }

    #[test]
    fn scm_histogram_keeps_observed_unknown_types() {
        let counts = scm_type_histogram(vec![bucket("archive", 1)]);
        assert_eq!(counts.get("archive"), Some(&1));
        assert_eq!(counts.get("manual"), Some(&0));
    }

    #[test]
    fn instance_map_keeps_one_record_per_instance() {
        let rows = vec![
            InstanceRow {
                uuid: "aaaa-1111".into(),
                hostname: "node-1.example.com".into(),
                version: "9.2.0".into(),
                capacity: 100,
                cpu: 8,
                memory: 16_000_000_000,
                managed_by_policy: true,
            },
            InstanceRow {
                uuid: "bbbb-2222".into(),
                hostname: "node-2.example.com".into(),
                version: "9.2.0".into(),
                capacity: 50,
                cpu: 4,
                memory: 8_000_000_000,
                managed_by_policy: false,
            },
        ];
        let info = instance_map(rows);
        assert_eq!(info.len(), 2);
        assert_eq!(info["aaaa-1111"].hostname, "node-1.example.com");
        assert_eq!(info["bbbb-2222"].capacity, 50);
    }

    #[test]
    fn node_histograms_are_labelled_after_their_contents() {
        let status_rows = vec![
            NodeBucketCount {
                execution_node: "node-1".into(),
                bucket: "successful".into(),
                count: 9,
            },
            NodeBucketCount {
                execution_node: "node-1".into(),
                bucket: "failed".into(),
                count: 1,
            },
        ];
        let launch_rows = vec![NodeBucketCount {
            execution_node: "node-1".into(),
            bucket: "manual".into(),
            count: 10,
        }];
        let counts = node_job_counts(status_rows, launch_rows);

        let node = &counts["node-1"];
        // The status sub-map must hold statuses, the launch_type sub-map
        // launch types, never the other way around.
        assert_eq!(node.status.get("successful"), Some(&9));
        assert_eq!(node.status.get("failed"), Some(&1));
        assert!(!node.status.contains_key("manual"));
        assert_eq!(node.launch_type.get("manual"), Some(&10));
        assert!(!node.launch_type.contains_key("successful"));
    }

    #[test]
    fn node_histograms_empty_input_yields_empty_map() {
        assert!(node_job_counts(vec![], vec![]).is_empty());
    }

    #[test]
    fn node_seen_in_only_one_result_set_still_gets_both_maps() {
        let launch_rows = vec![NodeBucketCount {
            execution_node: "node-9".into(),
            bucket: "scheduled".into(),
            count: 2,
        }];
        let counts = node_job_counts(vec![], launch_rows);
        assert!(counts["node-9"].status.is_empty());
        assert_eq!(counts["node-9"].launch_type.get("scheduled"), Some(&2));
    }

    #[test]
    fn config_snapshot_substitutes_unlicensed_sentinels() {
        let snapshot = config_snapshot(&test_settings());
        assert_eq!(snapshot.license_type, "UNLICENSED");
        assert_eq!(snapshot.free_instances, 0);
        assert_eq!(snapshot.license_expiry, 0);
    }

    #[test]
    fn config_snapshot_reports_license_fields_when_present() {
        let mut settings = test_settings();
        settings.license = Some(LicenseInfo {
            license_type: Some("enterprise".into()),
            free_instances: Some(25),
            time_remaining: Some(86_400),
        });
        let snapshot = config_snapshot(&settings);
        assert_eq!(snapshot.license_type, "enterprise");
        assert_eq!(snapshot.free_instances, 25);
        assert_eq!(snapshot.license_expiry, 86_400);
    }

    #[test]
    fn every_result_shape_serializes_to_json() {
        let snapshot = config_snapshot(&test_settings());
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.is_object());

        let counts = Counts {
            models: [("organization".to_string(), 3)].into_iter().collect(),
            custom_virtualenvs: 1,
            inventories: inventory_kind_buckets(vec![bucket("", 2)]),
            active_host_count: 40,
            active_sessions: 5,
            active_api_sessions: 2,
            active_channels_sessions: 3,
            running_jobs: 1,
        };
        let value = serde_json::to_value(&counts).unwrap();
        // Flattened model counts sit beside the named fields.
        assert_eq!(value["organization"], 3);
        assert_eq!(value["inventories"]["normal"], 2);

        let jobs = JobCounts {
            total_jobs: 10,
            status: histogram(vec![bucket("successful", 9), bucket("failed", 1)]),
            launch_type: histogram(vec![bucket("manual", 10)]),
        };
        let value = serde_json::to_value(&jobs).unwrap();
        assert_eq!(value["status"]["successful"], 9);
        assert_eq!(jobs.status.values().sum::<i64>(), jobs.total_jobs);
        assert_eq!(jobs.launch_type.values().sum::<i64>(), jobs.total_jobs);

        let value = serde_json::to_value(node_job_counts(vec![], vec![])).unwrap();
        assert!(value.is_object());
    }

    #[test]
    fn registry_keys_are_unique_and_stable() {
        let keys: Vec<_> = REGISTRY.iter().map(|c| c.key).collect();
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), keys.len());
        assert_eq!(
            keys,
            vec![
                "config",
                "counts",
                "org_counts",
                "cred_type_counts",
                "inventory_counts",
                "projects_by_scm_type",
                "instance_info",
                "job_counts",
                "job_instance_counts",
            ]
        );
    }
}

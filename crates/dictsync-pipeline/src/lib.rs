//! Sync job orchestration: read the new batch, replace matching name groups
//! in the target table, append the batch with one shared creation stamp.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dictsync_core::{NameValueGroup, NewRecord, TableRef, TableRow};
use dictsync_ingest::read_new_batch;
use dictsync_store::{LocalTableStore, StoreError, TableStore};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dictsync-pipeline";

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub schema: String,
    pub table: String,
    pub source_pattern: String,
    pub store_root: PathBuf,
    pub report_dir: Option<PathBuf>,
}

impl JobConfig {
    pub fn from_env() -> Self {
        Self {
            schema: std::env::var("DICTSYNC_SCHEMA").unwrap_or_else(|_| "gold".to_string()),
            table: std::env::var("DICTSYNC_TABLE")
                .unwrap_or_else(|_| "l2_data_dictionary_text_values_v2".to_string()),
            source_pattern: std::env::var("DICTSYNC_SOURCE_PATTERN")
                .unwrap_or_else(|_| "3rd-party/l2/scratch/text_values/*.json".to_string()),
            store_root: std::env::var("DICTSYNC_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./tables")),
            report_dir: std::env::var("DICTSYNC_REPORT_DIR").map(PathBuf::from).ok(),
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.schema.clone(), self.table.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub table: String,
    pub batch_rows: usize,
    pub distinct_names: usize,
    pub deleted_rows: usize,
    pub inserted_rows: usize,
    pub delete_skipped: bool,
}

/// Collect every value per distinct name, groups ordered by name, values in
/// encounter order. Only the name set is consumed downstream; the grouped
/// values feed the summary counts.
pub fn group_by_name(batch: &[NewRecord]) -> Vec<NameValueGroup> {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in batch {
        groups
            .entry(record.name.as_str())
            .or_default()
            .push(record.value.clone());
    }
    groups
        .into_iter()
        .map(|(name, values)| NameValueGroup {
            name: name.to_string(),
            values,
        })
        .collect()
}

pub fn distinct_names(groups: &[NameValueGroup]) -> BTreeSet<String> {
    groups.iter().map(|g| g.name.clone()).collect()
}

/// Existing rows whose name reappears in the incoming batch. A direct
/// membership filter; the match is on `name` only, never on value or
/// sort order.
pub fn build_delete_set(existing: &[TableRow], names: &BTreeSet<String>) -> Vec<TableRow> {
    existing
        .iter()
        .filter(|row| names.contains(&row.name))
        .cloned()
        .collect()
}

/// Sort the batch ascending by `(name, sort_order)`, narrow `sort_order` to
/// the storage width, and stamp every row with the shared creation time.
///
/// The sort is stable, so duplicate `(name, sort_order)` pairs keep their
/// encounter order and all survive.
pub fn build_insert_set(
    mut batch: Vec<NewRecord>,
    dt_created: DateTime<Utc>,
) -> Result<Vec<TableRow>> {
    batch.sort_by(|a, b| a.name.cmp(&b.name).then(a.sort_order.cmp(&b.sort_order)));
    batch
        .into_iter()
        .map(|record| {
            let sort_order = i16::try_from(record.sort_order).with_context(|| {
                format!(
                    "sort_order {} for name {} exceeds the storage column width",
                    record.sort_order, record.name
                )
            })?;
            Ok(TableRow {
                name: record.name,
                value: record.value,
                sort_order,
                dt_created,
            })
        })
        .collect()
}

pub struct SyncJob {
    config: JobConfig,
    store: Box<dyn TableStore>,
}

impl SyncJob {
    pub fn new(config: JobConfig) -> Self {
        let store = Box::new(LocalTableStore::new(config.store_root.clone()));
        Self { config, store }
    }

    pub fn with_store(config: JobConfig, store: Box<dyn TableStore>) -> Self {
        Self { config, store }
    }

    /// Execute one full run: sources, transforms, then the three sinks in
    /// fixed order (cache names, delete-by-name, append).
    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        // One creation stamp per run, applied uniformly to every inserted row.
        let dt_created = started_at;
        let table = self.config.table_ref();
        info!(%run_id, table = %table, pattern = %self.config.source_pattern, "sync run starting");

        let batch = read_new_batch(&self.config.source_pattern)
            .with_context(|| format!("reading new batch from {}", self.config.source_pattern))?;

        let groups = group_by_name(&batch);
        let names = distinct_names(&groups);
        let insert_set = build_insert_set(batch.clone(), dt_created)
            .context("building insert set")?;

        // Sink 2: delete-by-name. A missing target table skips the delete
        // phase instead of failing the run; the append below creates it.
        let mut deleted_rows = 0;
        let mut delete_skipped = false;
        if self.store.table_exists(&table).await? {
            let existing = self
                .store
                .read_all(&table)
                .await
                .with_context(|| format!("reading existing rows of {table}"))?;
            let delete_set = build_delete_set(&existing, &names);
            if !delete_set.is_empty() {
                deleted_rows = self
                    .store
                    .delete_where_name_in(&table, &names)
                    .await
                    .with_context(|| format!("deleting matched names from {table}"))?;
            }
        } else {
            delete_skipped = true;
            warn!(table = %table, "target table missing, delete phase skipped");
        }

        // Sink 3: unconditional append of the whole batch, create-if-absent.
        let inserted_rows = insert_set.len();
        self.store
            .append(&table, &insert_set)
            .await
            .with_context(|| format!("appending insert set to {table}"))?;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            table: table.to_string(),
            batch_rows: batch.len(),
            distinct_names: names.len(),
            deleted_rows,
            inserted_rows,
            delete_skipped,
        };

        if let Some(report_dir) = &self.config.report_dir {
            self.write_report(report_dir, &summary).await?;
        }

        info!(
            %run_id,
            deleted = summary.deleted_rows,
            inserted = summary.inserted_rows,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn write_report(&self, report_dir: &PathBuf, summary: &RunSummary) -> Result<()> {
        let run_dir = report_dir.join(summary.run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;
        let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        let path = run_dir.join("run_summary.json");
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

pub async fn run_sync_once_from_env() -> Result<RunSummary> {
    let config = JobConfig::from_env();
    SyncJob::new(config).run_once().await
}

/// Current rows of the configured target table, for operational inspection.
pub async fn show_table(config: &JobConfig) -> Result<Vec<TableRow>> {
    let store = LocalTableStore::new(config.store_root.clone());
    let table = config.table_ref();
    match store.read_all(&table).await {
        Ok(rows) => Ok(rows),
        Err(StoreError::TableMissing { .. }) => Ok(Vec::new()),
        Err(err) => Err(err).with_context(|| format!("reading {table}")),
    }
}

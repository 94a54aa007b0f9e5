//! Transactional table-storage collaborator: the `TableStore` contract plus
//! a file-backed implementation with atomic rewrites.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dictsync_core::{TableRef, TableRow};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "dictsync-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {table} does not exist")]
    TableMissing { table: String },
    #[error("corrupt row in table {table} line {line}: {reason}")]
    Corrupt {
        table: String,
        line: usize,
        reason: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}

/// Contract the sync job requires of the transactional table storage.
///
/// Mutations are whole-table transactional: a failed call leaves the
/// previous table state intact, and no reader observes a partial write.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, StoreError>;

    /// All rows of the table; `TableMissing` if it does not exist.
    async fn read_all(&self, table: &TableRef) -> Result<Vec<TableRow>, StoreError>;

    /// Merge-delete every row whose `name` is in `names`. Returns the number
    /// of rows removed. `TableMissing` if the table does not exist; the
    /// caller decides whether that is recoverable.
    async fn delete_where_name_in(
        &self,
        table: &TableRef,
        names: &BTreeSet<String>,
    ) -> Result<usize, StoreError>;

    /// Append rows, creating the table if absent.
    async fn append(&self, table: &TableRef, rows: &[TableRow]) -> Result<(), StoreError>;
}

/// File-backed store: one line-delimited JSON file per table at
/// `<root>/<schema>/<table>.jsonl`. Every mutation rewrites the file through
/// a uniquely-named temp file in the same directory and an atomic rename.
#[derive(Debug, Clone)]
pub struct LocalTableStore {
    root: PathBuf,
}

impl LocalTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.schema)
            .join(format!("{}.jsonl", table.table))
    }

    async fn load_rows(&self, table: &TableRef) -> Result<Vec<TableRow>, StoreError> {
        let path = self.table_path(table);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::TableMissing {
                    table: table.to_string(),
                })
            }
            Err(err) => return Err(StoreError::io(format!("reading {}", path.display()))(err)),
        };

        let mut rows = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str(line).map_err(|err| StoreError::Corrupt {
                table: table.to_string(),
                line: idx + 1,
                reason: err.to_string(),
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Serialize and atomically replace the table file.
    async fn write_rows(&self, table: &TableRef, rows: &[TableRow]) -> Result<(), StoreError> {
        let path = self.table_path(table);
        let parent = path.parent().expect("table path always has parent");
        fs::create_dir_all(parent)
            .await
            .map_err(StoreError::io(format!("creating {}", parent.display())))?;

        let mut buf = Vec::with_capacity(rows.len() * 96);
        for row in rows {
            serde_json::to_writer(&mut buf, row).map_err(|err| StoreError::Corrupt {
                table: table.to_string(),
                line: 0,
                reason: format!("serializing row: {err}"),
            })?;
            buf.push(b'\n');
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(StoreError::io(format!("opening {}", temp_path.display())))?;
        file.write_all(&buf)
            .await
            .map_err(StoreError::io(format!("writing {}", temp_path.display())))?;
        file.flush()
            .await
            .map_err(StoreError::io(format!("flushing {}", temp_path.display())))?;
        drop(file);

        match fs::rename(&temp_path, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StoreError::io(format!(
                    "renaming {} -> {}",
                    temp_path.display(),
                    path.display()
                ))(err))
            }
        }
    }
}

#[async_trait]
impl TableStore for LocalTableStore {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, StoreError> {
        let path = self.table_path(table);
        fs::try_exists(&path)
            .await
            .map_err(StoreError::io(format!("checking {}", path.display())))
    }

    async fn read_all(&self, table: &TableRef) -> Result<Vec<TableRow>, StoreError> {
        self.load_rows(table).await
    }

    async fn delete_where_name_in(
        &self,
        table: &TableRef,
        names: &BTreeSet<String>,
    ) -> Result<usize, StoreError> {
        let rows = self.load_rows(table).await?;
        let before = rows.len();
        let kept: Vec<TableRow> = rows
            .into_iter()
            .filter(|row| !names.contains(&row.name))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.write_rows(table, &kept).await?;
        }
        debug!(table = %table, removed, "delete-by-name merge applied");
        Ok(removed)
    }

    async fn append(&self, table: &TableRef, rows: &[TableRow]) -> Result<(), StoreError> {
        let mut all = match self.load_rows(table).await {
            Ok(existing) => existing,
            Err(StoreError::TableMissing { .. }) => Vec::new(),
            Err(err) => return Err(err),
        };
        all.extend_from_slice(rows);
        self.write_rows(table, &all).await?;
        debug!(table = %table, appended = rows.len(), "append applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc)
    }

    fn row(name: &str, value: &str, sort_order: i16) -> TableRow {
        TableRow {
            name: name.into(),
            value: value.into(),
            sort_order,
            dt_created: ts(),
        }
    }

    #[tokio::test]
    async fn append_creates_table_and_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "text_values");

        assert!(!store.table_exists(&table).await.expect("exists"));
        store
            .append(&table, &[row("A", "x", 0), row("B", "y", 1)])
            .await
            .expect("append");

        assert!(store.table_exists(&table).await.expect("exists"));
        let rows = store.read_all(&table).await.expect("read");
        assert_eq!(rows, vec![row("A", "x", 0), row("B", "y", 1)]);
    }

    #[tokio::test]
    async fn read_of_missing_table_is_table_missing() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "absent");

        let err = store.read_all(&table).await.expect_err("should fail");
        assert!(matches!(err, StoreError::TableMissing { .. }));
    }

    #[tokio::test]
    async fn delete_removes_only_named_rows_and_reports_count() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "text_values");
        store
            .append(&table, &[row("A", "x", 0), row("A", "y", 1), row("B", "z", 0)])
            .await
            .expect("append");

        let names: BTreeSet<String> = ["A".to_string()].into_iter().collect();
        let removed = store
            .delete_where_name_in(&table, &names)
            .await
            .expect("delete");

        assert_eq!(removed, 2);
        let rows = store.read_all(&table).await.expect("read");
        assert_eq!(rows, vec![row("B", "z", 0)]);
    }

    #[tokio::test]
    async fn delete_on_missing_table_is_table_missing() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "absent");

        let names: BTreeSet<String> = ["A".to_string()].into_iter().collect();
        let err = store
            .delete_where_name_in(&table, &names)
            .await
            .expect_err("should fail");
        assert!(matches!(err, StoreError::TableMissing { .. }));
    }

    #[tokio::test]
    async fn empty_append_creates_an_empty_table() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "text_values");

        store.append(&table, &[]).await.expect("append");
        assert!(store.table_exists(&table).await.expect("exists"));
        assert!(store.read_all(&table).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn rewrite_leaves_no_temp_files_behind() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "text_values");
        store.append(&table, &[row("A", "x", 0)]).await.expect("append");
        store.append(&table, &[row("B", "y", 0)]).await.expect("append");

        let schema_dir = dir.path().join("gold");
        let leftovers: Vec<_> = std::fs::read_dir(&schema_dir)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_row_surfaces_with_line_number() {
        let dir = tempdir().expect("tempdir");
        let store = LocalTableStore::new(dir.path());
        let table = TableRef::new("gold", "text_values");
        store.append(&table, &[row("A", "x", 0)]).await.expect("append");

        let path = store.table_path(&table);
        let mut text = std::fs::read_to_string(&path).expect("read");
        text.push_str("{not json\n");
        std::fs::write(&path, text).expect("write");

        let err = store.read_all(&table).await.expect_err("should fail");
        match err {
            StoreError::Corrupt { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}

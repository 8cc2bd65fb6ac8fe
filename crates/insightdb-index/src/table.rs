//! LanceDB connection and housekeeping helpers.
//!
//! Opening tables, the key/value meta table that records which embedder
//! produced the stored vectors, and quarantine of table directories that
//! cannot be opened or belong to another embedder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::Schema;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, Table};

use crate::schema::build_meta_schema;

pub const META_TABLE: &str = "meta";
pub const META_EMBEDDER_ID: &str = "embedder_id";
pub const META_DIM: &str = "dim";

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

/// Opens `name`, creating it empty with `schema` when the database has no such table.
pub async fn open_or_create(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<Table> {
    let names = conn.table_names().execute().await?;
    if names.iter().any(|n| n == name) {
        return Ok(conn.open_table(name).execute().await?);
    }
    let empty = RecordBatchIterator::new(Vec::new().into_iter(), schema);
    Ok(conn.create_table(name, Box::new(empty)).execute().await?)
}

/// Small key/value table next to the chunk table.
pub struct MetaStore {
    table: Table,
}

impl MetaStore {
    pub async fn open(conn: &Connection, name: &str) -> Result<Self> {
        let table = open_or_create(conn, name, build_meta_schema()).await?;
        Ok(Self { table })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .only_if(format!("key = {}", sql_literal(key)))
            .select(Select::columns(&["value"]))
            .limit(1)
            .execute()
            .await?
            .try_collect()
            .await?;
        let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) else {
            return Ok(None);
        };
        let values = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow!("meta value column missing"))?;
        Ok(Some(values.value(0).to_string()))
    }

    /// Writes all entries in one merge on `key`.
    pub async fn put_all(&self, entries: &[(&str, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp_millis();
        let batch = RecordBatch::try_new(
            build_meta_schema(),
            vec![
                Arc::new(StringArray::from_iter_values(entries.iter().map(|(k, _)| *k))),
                Arc::new(StringArray::from_iter_values(entries.iter().map(|(_, v)| v.as_str()))),
                Arc::new(TimestampMillisecondArray::from(vec![now; entries.len()])),
            ],
        )?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), build_meta_schema());
        let mut merge = self.table.merge_insert(&["key"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        merge.execute(Box::new(reader)).await?;
        Ok(())
    }
}

/// On-disk directory of a table in a local LanceDB database.
pub fn table_dir(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.lance"))
}

/// Move a table's directory aside as `<name>.lance.<reason>-<timestamp>`.
/// Returns the new location, or `None` when there was nothing to move.
pub fn quarantine_table(root: &Path, name: &str, reason: &str) -> Result<Option<PathBuf>> {
    let dir = table_dir(root, name);
    if !dir.exists() {
        return Ok(None);
    }
    let target = root.join(format!("{name}.lance.{reason}-{}", Utc::now().format("%Y%m%d%H%M%S%3f")));
    std::fs::rename(&dir, &target)?;
    Ok(Some(target))
}

/// Quote a string as a SQL literal for LanceDB predicates.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray,
};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::Mutex;

use insightdb_core::error::{Error, Result};
use insightdb_core::types::{BoundingBox, CandidateResult, Chunk, ChunkFilter, ChunkId, ChunkRecord, DocumentId, StructuralRole};

use crate::schema::{build_chunk_schema, vector_dim};
use crate::table::{open_db, quarantine_table, sql_literal, table_dir, MetaStore, META_DIM, META_EMBEDDER_ID, META_TABLE};

/// Persistent nearest-neighbour index over chunks.
///
/// Writes (`upsert*`, `remove`, `replace_document`) are serialized through an
/// async lock; reads never take it and see the latest committed version.
pub struct ChunkIndex {
    conn: Connection,
    table: Table,
    root: PathBuf,
    table_name: String,
    embedder_id: String,
    dim: usize,
    write_lock: Mutex<()>,
}

impl ChunkIndex {
    /// Open (or create) the index under `root` for vectors from `embedder_id`.
    ///
    /// A table that cannot be opened is moved aside and replaced by an empty
    /// one. So is a table built by a different embedder: its vectors live in
    /// another space and must be re-ingested, never mixed.
    pub async fn open(root: &Path, table_name: &str, embedder_id: &str, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(Error::unavailable)?;
        let uri = root.to_string_lossy().to_string();
        let conn = open_db(&uri).await.map_err(Error::unavailable)?;
        let dim_i32 = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("embedding dim {dim} too large")))?;

        let (meta, stored_id) = match Self::read_meta(&conn).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(error = %e, "index meta table unreadable, resetting it");
                quarantine_table(root, META_TABLE, "corrupt").map_err(Error::unavailable)?;
                let meta = MetaStore::open(&conn, META_TABLE).await.map_err(Error::unavailable)?;
                (meta, None)
            }
        };
        if let Some(stored) = stored_id.as_deref().filter(|s| *s != embedder_id) {
            if let Some(moved) = quarantine_table(root, table_name, "stale").map_err(Error::unavailable)? {
                tracing::warn!(
                    stored = stored,
                    current = embedder_id,
                    moved_to = %moved.display(),
                    "index was built by another embedder; starting empty, re-ingest documents"
                );
            }
        }

        let table = match Self::open_existing(&conn, root, table_name, dim_i32).await {
            Ok(Some(t)) => t,
            Ok(None) => Self::create_empty(&conn, table_name, dim_i32).await?,
            Err(reason) => {
                let moved = quarantine_table(root, table_name, "corrupt").map_err(Error::unavailable)?;
                tracing::error!(
                    table = table_name,
                    reason = %reason,
                    moved_to = ?moved,
                    "chunk index unreadable; continuing with an EMPTY index"
                );
                Self::create_empty(&conn, table_name, dim_i32).await?
            }
        };

        meta.put_all(&[(META_EMBEDDER_ID, embedder_id.to_string()), (META_DIM, dim.to_string())])
            .await
            .map_err(Error::write)?;

        let index = Self {
            conn,
            table,
            root: root.to_path_buf(),
            table_name: table_name.to_string(),
            embedder_id: embedder_id.to_string(),
            dim,
            write_lock: Mutex::new(()),
        };
        tracing::info!(table = table_name, embedder = embedder_id, rows = index.count().await?, "chunk index ready");
        Ok(index)
    }

    async fn read_meta(conn: &Connection) -> anyhow::Result<(MetaStore, Option<String>)> {
        let meta = MetaStore::open(conn, META_TABLE).await?;
        let stored = meta.get(META_EMBEDDER_ID).await?;
        Ok((meta, stored))
    }

    /// `Ok(None)` when the table does not exist, `Err` when it exists but is unusable.
    async fn open_existing(conn: &Connection, root: &Path, name: &str, dim: i32) -> std::result::Result<Option<Table>, String> {
        let exists_on_disk = table_dir(root, name).exists();
        let table = match conn.open_table(name).execute().await {
            Ok(t) => t,
            Err(_) if !exists_on_disk => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let schema = table.schema().await.map_err(|e| e.to_string())?;
        match vector_dim(&schema) {
            Some(d) if d == dim => {}
            other => return Err(format!("vector column width {other:?}, expected {dim}")),
        }
        let expected = build_chunk_schema(dim);
        if let Some(missing) = expected.fields().iter().find(|f| schema.field_with_name(f.name()).is_err()) {
            return Err(format!("column {} missing", missing.name()));
        }
        table.count_rows(None).await.map_err(|e| e.to_string())?;
        Ok(Some(table))
    }

    async fn create_empty(conn: &Connection, name: &str, dim: i32) -> Result<Table> {
        let schema = build_chunk_schema(dim);
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::write)
    }

    pub fn embedder_id(&self) -> &str { &self.embedder_id }
    pub fn dim(&self) -> usize { self.dim }
    pub fn path(&self) -> &Path { &self.root }
    pub fn table_name(&self) -> &str { &self.table_name }

    pub async fn upsert(&self, record: ChunkRecord) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(&record)).await
    }

    /// Store or replace chunks by id.
    pub async fn upsert_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let batch = self.records_to_batch(records)?;
        let _guard = self.write_lock.lock().await;
        self.merge(batch).await
    }

    /// Remove every chunk of a document and store its new chunks as one write.
    pub async fn replace_document(&self, document_id: &str, records: &[ChunkRecord]) -> Result<()> {
        if let Some(stray) = records.iter().find(|r| r.chunk.document_id != document_id) {
            return Err(Error::Operation(format!("chunk {} does not belong to {document_id}", stray.chunk.id)));
        }
        let batch = if records.is_empty() { None } else { Some(self.records_to_batch(records)?) };
        let _guard = self.write_lock.lock().await;
        self.delete_where(&doc_predicate(document_id)).await?;
        if let Some(batch) = batch {
            self.merge(batch).await?;
        }
        Ok(())
    }

    /// Delete all chunks of a document. Unknown documents are a no-op.
    pub async fn remove(&self, document_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.delete_where(&doc_predicate(document_id)).await
    }

    /// Up to `top_n` chunks by descending cosine similarity, optionally filtered.
    pub async fn query(&self, embedding: &[f32], top_n: usize, filter: Option<&ChunkFilter>) -> Result<Vec<CandidateResult>> {
        self.check_dim(embedding.len())?;
        if top_n == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }
        let mut query = self
            .table
            .vector_search(embedding.to_vec())
            .map_err(Error::unavailable)?
            .distance_type(DistanceType::Cosine)
            .limit(top_n);
        if let Some(predicate) = filter.and_then(filter_predicate) {
            query = query.only_if(predicate);
        }
        let mut stream = query.execute().await.map_err(Error::unavailable)?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::unavailable)? {
            let chunks = batch_to_chunks(&batch)?;
            let distances = f32_col(&batch, "_distance")?;
            for (i, chunk) in chunks.into_iter().enumerate() {
                out.push(CandidateResult { chunk, similarity: 1.0 - distances.value(i) });
            }
        }
        out.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        out.truncate(top_n);
        Ok(out)
    }

    /// Stored chunks and vectors of one document, in position order.
    pub async fn document_records(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let mut stream = self
            .table
            .query()
            .only_if(doc_predicate(document_id))
            .execute()
            .await
            .map_err(Error::unavailable)?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::unavailable)? {
            let chunks = batch_to_chunks(&batch)?;
            let vectors = batch
                .column_by_name("vector")
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
                .ok_or_else(|| Error::unavailable("column vector missing"))?;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let embedding = vectors.value(i).as_primitive::<arrow_array::types::Float32Type>().values().to_vec();
                out.push(ChunkRecord { chunk, embedding });
            }
        }
        out.sort_by_key(|r| r.chunk.position);
        Ok(out)
    }

    /// Ids of `chunks` that are still stored with the same text. Chunks that were
    /// removed, or replaced under the same id with different text, are left out.
    pub async fn unchanged_chunks(&self, chunks: &[&Chunk]) -> Result<HashSet<ChunkId>> {
        if chunks.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<String> = chunks.iter().map(|c| sql_literal(&c.id)).collect();
        let mut stream = self
            .table
            .query()
            .only_if(format!("id IN ({})", ids.join(", ")))
            .select(Select::columns(&["id", "content_hash"]))
            .execute()
            .await
            .map_err(Error::unavailable)?;
        let mut stored = HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::unavailable)? {
            let id_col = str_col(&batch, "id")?;
            let hash_col = str_col(&batch, "content_hash")?;
            for i in 0..batch.num_rows() {
                stored.insert(id_col.value(i).to_string(), hash_col.value(i).to_string());
            }
        }
        Ok(chunks
            .iter()
            .filter(|c| stored.get(&c.id).is_some_and(|h| *h == content_hash(&c.raw_text)))
            .map(|c| c.id.clone())
            .collect())
    }

    /// Distinct document ids, sorted.
    pub async fn document_ids(&self) -> Result<Vec<DocumentId>> {
        let mut stream = self
            .table
            .query()
            .select(Select::columns(&["doc_id"]))
            .execute()
            .await
            .map_err(Error::unavailable)?;
        let mut ids = BTreeSet::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::unavailable)? {
            let col = str_col(&batch, "doc_id")?;
            for i in 0..batch.num_rows() {
                ids.insert(col.value(i).to_string());
            }
        }
        Ok(ids.into_iter().collect())
    }

    pub async fn contains_document(&self, document_id: &str) -> Result<bool> {
        let n = self.table.count_rows(Some(doc_predicate(document_id))).await.map_err(Error::unavailable)?;
        Ok(n > 0)
    }

    pub async fn count(&self) -> Result<usize> {
        self.table.count_rows(None).await.map_err(Error::unavailable)
    }

    fn check_dim(&self, found: usize) -> Result<()> {
        if found == self.dim {
            return Ok(());
        }
        Err(Error::EmbeddingMismatch {
            expected: format!("{} dims ({})", self.dim, self.embedder_id),
            found: format!("{found} dims"),
        })
    }

    async fn merge(&self, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut mi = self.table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(Error::write)?;
        Ok(())
    }

    async fn delete_where(&self, predicate: &str) -> Result<()> {
        self.table.delete(predicate).await.map_err(Error::write)?;
        Ok(())
    }

    fn records_to_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        for r in records {
            self.check_dim(r.embedding.len())?;
        }
        let dim = i32::try_from(self.dim).map_err(Error::write)?;
        let now = Utc::now().timestamp_millis();
        let mut ids = Vec::with_capacity(records.len());
        let mut doc_ids = Vec::with_capacity(records.len());
        let mut pages = Vec::with_capacity(records.len());
        let mut titles = Vec::with_capacity(records.len());
        let mut roles = Vec::with_capacity(records.len());
        let mut texts = Vec::with_capacity(records.len());
        let mut positions = Vec::with_capacity(records.len());
        let mut hashes = Vec::with_capacity(records.len());
        let mut boxes: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
        for ChunkRecord { chunk, embedding } in records {
            ids.push(chunk.id.clone());
            doc_ids.push(chunk.document_id.clone());
            pages.push(i32::try_from(chunk.page_number).map_err(Error::write)?);
            titles.push(chunk.section_title.clone());
            roles.push(chunk.structural_role.as_str());
            texts.push(chunk.raw_text.clone());
            positions.push(i32::try_from(chunk.position).map_err(Error::write)?);
            hashes.push(content_hash(&chunk.raw_text));
            boxes.push(chunk.bounding_box.map(|b| serde_json::to_string(&b)).transpose().map_err(Error::write)?);
            vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
        }
        RecordBatch::try_new(
            build_chunk_schema(dim),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(doc_ids)),
                Arc::new(Int32Array::from(pages)),
                Arc::new(StringArray::from(titles)),
                Arc::new(StringArray::from(roles)),
                Arc::new(StringArray::from(texts)),
                Arc::new(Int32Array::from(positions)),
                Arc::new(StringArray::from(hashes)),
                Arc::new(StringArray::from(boxes)),
                Arc::new(TimestampMillisecondArray::from(vec![now; records.len()])),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dim)),
            ],
        )
        .map_err(Error::write)
    }
}

fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn doc_predicate(document_id: &str) -> String {
    format!("doc_id = {}", sql_literal(document_id))
}

fn filter_predicate(filter: &ChunkFilter) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(doc) = &filter.document_id {
        clauses.push(doc_predicate(doc));
    }
    if let Some(role) = filter.structural_role {
        clauses.push(format!("role = {}", sql_literal(role.as_str())));
    }
    if let Some(page) = filter.page_number {
        clauses.push(format!("page_number = {page}"));
    }
    if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) }
}

fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::unavailable(format!("column {name} missing")))
}

fn i32_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| Error::unavailable(format!("column {name} missing")))
}

fn f32_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| Error::unavailable(format!("column {name} missing")))
}

fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let ids = str_col(batch, "id")?;
    let docs = str_col(batch, "doc_id")?;
    let pages = i32_col(batch, "page_number")?;
    let titles = str_col(batch, "section_title")?;
    let roles = str_col(batch, "role")?;
    let texts = str_col(batch, "raw_text")?;
    let positions = i32_col(batch, "position")?;
    let boxes = str_col(batch, "bounding_box")?;
    (0..batch.num_rows())
        .map(|i| {
            let structural_role = StructuralRole::from_label(roles.value(i))
                .ok_or_else(|| Error::unavailable(format!("unknown role '{}'", roles.value(i))))?;
            Ok(Chunk {
                id: ids.value(i).to_string(),
                document_id: docs.value(i).to_string(),
                page_number: u32::try_from(pages.value(i)).unwrap_or(0),
                section_title: titles.value(i).to_string(),
                raw_text: texts.value(i).to_string(),
                structural_role,
                position: u32::try_from(positions.value(i)).unwrap_or(0),
                bounding_box: if boxes.is_null(i) {
                    None
                } else {
                    serde_json::from_str::<BoundingBox>(boxes.value(i)).ok()
                },
            })
        })
        .collect()
}

impl std::fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIndex")
            .field("root", &self.root)
            .field("table", &self.table_name)
            .field("embedder_id", &self.embedder_id)
            .field("dim", &self.dim)
            .field("uri", &self.conn.uri())
            .finish_non_exhaustive()
    }
}

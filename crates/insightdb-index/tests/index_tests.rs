use std::fs;

use insightdb_core::traits::Embedder;
use insightdb_core::types::{BoundingBox, ChunkDraft, ChunkFilter, ChunkRecord, StructuralRole};
use insightdb_core::Error;
use insightdb_embed::FakeEmbedder;
use insightdb_index::ChunkIndex;
use tempfile::TempDir;

const DIM: usize = 64;
const TABLE: &str = "chunks";

fn record(embedder: &FakeEmbedder, doc: &str, pos: u32, text: &str, role: StructuralRole) -> ChunkRecord {
    let chunk = ChunkDraft::new(text, role, pos + 1, format!("Section {pos}")).into_chunk(doc, pos);
    let embedding = embedder.embed_batch(&[text.to_string()]).expect("embed").remove(0);
    ChunkRecord { chunk, embedding }
}

fn query_vec(embedder: &FakeEmbedder, text: &str) -> Vec<f32> {
    embedder.embed_batch(&[text.to_string()]).expect("embed").remove(0)
}

async fn seeded(dir: &TempDir, embedder: &FakeEmbedder) -> ChunkIndex {
    let index = ChunkIndex::open(dir.path(), TABLE, embedder.embedder_id(), DIM).await.expect("open");
    let records = vec![
        record(embedder, "alpha.pdf", 0, "solar panels charge batteries", StructuralRole::Heading),
        record(embedder, "alpha.pdf", 1, "batteries store solar energy overnight", StructuralRole::Body),
        record(embedder, "beta.pdf", 0, "goats need fresh water daily", StructuralRole::Body),
        record(embedder, "beta.pdf", 1, "rain barrels collect water for goats", StructuralRole::Body),
    ];
    index.upsert_batch(&records).await.expect("upsert");
    index
}

#[tokio::test]
async fn query_orders_by_similarity_and_applies_filters() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = seeded(&tmp, &embedder).await;
    assert_eq!(index.count().await.expect("count"), 4);

    let q = query_vec(&embedder, "solar panels charge batteries");
    let hits = index.query(&q, 10, None).await.expect("query");
    assert_eq!(hits.len(), 4);
    assert_eq!(hits[0].chunk.id, "alpha.pdf:0", "exact text ranks first");
    assert!((hits[0].similarity - 1.0).abs() < 1e-4, "identical vectors have similarity 1");
    for pair in hits.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity, "similarities are non-increasing");
    }

    let limited = index.query(&q, 2, None).await.expect("query");
    assert_eq!(limited.len(), 2);

    let only_beta = index.query(&q, 10, Some(&ChunkFilter::document("beta.pdf"))).await.expect("query");
    assert_eq!(only_beta.len(), 2);
    assert!(only_beta.iter().all(|h| h.chunk.document_id == "beta.pdf"));

    let headings = ChunkFilter { structural_role: Some(StructuralRole::Heading), ..ChunkFilter::default() };
    let only_headings = index.query(&q, 10, Some(&headings)).await.expect("query");
    assert_eq!(only_headings.len(), 1);
    assert_eq!(only_headings[0].chunk.structural_role, StructuralRole::Heading);

    let none = index.query(&q, 0, None).await.expect("query");
    assert!(none.is_empty());
}

#[tokio::test]
async fn empty_index_answers_with_no_candidates() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = ChunkIndex::open(tmp.path(), TABLE, embedder.embedder_id(), DIM).await.expect("open");
    let hits = index.query(&query_vec(&embedder, "anything at all"), 100, None).await.expect("query");
    assert!(hits.is_empty());
    assert!(index.document_ids().await.expect("ids").is_empty());
}

#[tokio::test]
async fn reopen_round_trips_metadata_and_vectors() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let original = {
        let index = seeded(&tmp, &embedder).await;
        index.document_records("alpha.pdf").await.expect("records")
    };
    assert_eq!(original.len(), 2);

    let reopened = ChunkIndex::open(tmp.path(), TABLE, embedder.embedder_id(), DIM).await.expect("reopen");
    assert_eq!(reopened.count().await.expect("count"), 4, "index survives reopen");
    let again = reopened.document_records("alpha.pdf").await.expect("records");
    assert_eq!(again, original, "metadata and vectors round-trip losslessly");
    assert_eq!(again[1].chunk.page_number, 2);
    assert_eq!(again[1].chunk.section_title, "Section 1");
    assert_eq!(reopened.document_ids().await.expect("ids"), vec!["alpha.pdf".to_string(), "beta.pdf".to_string()]);
}

#[tokio::test]
async fn remove_is_idempotent_and_scoped_to_document() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = seeded(&tmp, &embedder).await;

    index.remove("alpha.pdf").await.expect("remove");
    index.remove("alpha.pdf").await.expect("second remove is a no-op");
    index.remove("never-ingested.pdf").await.expect("unknown document is a no-op");
    index.remove("it's-quoted.pdf").await.expect("quotes are escaped");

    assert!(!index.contains_document("alpha.pdf").await.expect("contains"));
    assert!(index.contains_document("beta.pdf").await.expect("contains"));
    let hits = index.query(&query_vec(&embedder, "solar panels"), 10, None).await.expect("query");
    assert!(hits.iter().all(|h| h.chunk.document_id != "alpha.pdf"));
}

#[tokio::test]
async fn upsert_replaces_by_id_and_replace_document_drops_stale_chunks() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = seeded(&tmp, &embedder).await;

    index
        .upsert(record(&embedder, "beta.pdf", 0, "goats prefer shade in summer", StructuralRole::Body))
        .await
        .expect("upsert");
    assert_eq!(index.count().await.expect("count"), 4, "same id replaces, does not duplicate");
    let beta = index.document_records("beta.pdf").await.expect("records");
    assert_eq!(beta[0].chunk.raw_text, "goats prefer shade in summer");

    index
        .replace_document("beta.pdf", &[record(&embedder, "beta.pdf", 0, "single new chunk", StructuralRole::Body)])
        .await
        .expect("replace");
    assert_eq!(index.document_records("beta.pdf").await.expect("records").len(), 1);

    let stray = index
        .replace_document("beta.pdf", &[record(&embedder, "alpha.pdf", 5, "wrong doc", StructuralRole::Body)])
        .await;
    assert!(matches!(stray, Err(Error::Operation(_))));
}

#[tokio::test]
async fn unchanged_chunks_detects_removed_and_rewritten_ids() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = seeded(&tmp, &embedder).await;
    let mut before = index.document_records("alpha.pdf").await.expect("alpha");
    before.extend(index.document_records("beta.pdf").await.expect("beta"));
    let chunks: Vec<_> = before.iter().map(|r| &r.chunk).collect();
    assert_eq!(index.unchanged_chunks(&chunks).await.expect("check").len(), 4);

    index
        .replace_document(
            "alpha.pdf",
            &[record(&embedder, "alpha.pdf", 0, "a rewritten heading about wind power", StructuralRole::Heading)],
        )
        .await
        .expect("replace");

    let current = index.unchanged_chunks(&chunks).await.expect("check");
    assert!(!current.contains("alpha.pdf:0"), "same id, different text");
    assert!(!current.contains("alpha.pdf:1"), "no longer stored");
    assert!(current.contains("beta.pdf:0") && current.contains("beta.pdf:1"));
    assert!(index.unchanged_chunks(&[]).await.expect("empty").is_empty());
}

#[tokio::test]
async fn bounding_box_round_trips() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = ChunkIndex::open(tmp.path(), TABLE, embedder.embedder_id(), DIM).await.expect("open");
    let bbox = BoundingBox { x0: 72.0, y0: 100.5, x1: 540.0, y1: 130.25 };
    let text = "check the pump seals monthly";
    let chunk = ChunkDraft::new(text, StructuralRole::Body, 4, "Pumps")
        .with_bounding_box(Some(bbox))
        .into_chunk("manual.pdf", 0);
    let embedding = query_vec(&embedder, text);
    index.upsert(ChunkRecord { chunk, embedding }).await.expect("upsert");
    index.upsert(record(&embedder, "manual.pdf", 1, "no box here", StructuralRole::Body)).await.expect("upsert");

    let stored = index.document_records("manual.pdf").await.expect("records");
    assert_eq!(stored[0].chunk.bounding_box, Some(bbox));
    assert_eq!(stored[1].chunk.bounding_box, None);
    let hits = index.query(&query_vec(&embedder, text), 1, None).await.expect("query");
    assert_eq!(hits[0].chunk.bounding_box, Some(bbox));
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let embedder = FakeEmbedder::new(DIM);
    let tmp = TempDir::new().expect("tmp");
    let index = ChunkIndex::open(tmp.path(), TABLE, embedder.embedder_id(), DIM).await.expect("open");

    let mut bad = record(&embedder, "alpha.pdf", 0, "text", StructuralRole::Body);
    bad.embedding.truncate(DIM - 1);
    assert!(matches!(index.upsert(bad).await, Err(Error::EmbeddingMismatch { .. })));
    assert!(matches!(index.query(&[0.1; 8], 5, None).await, Err(Error::EmbeddingMismatch { .. })));
    assert_eq!(index.count().await.expect("count"), 0);
}

#[tokio::test]
async fn unreadable_table_degrades_to_empty_index() {
    let tmp = TempDir::new().expect("tmp");
    let broken = tmp.path().join("chunks.lance");
    fs::create_dir_all(broken.join("_versions")).expect("mkdir");
    fs::write(broken.join("_versions").join("1.manifest"), b"definitely not a lance manifest").expect("write");

    let embedder = FakeEmbedder::new(DIM);
    let index = ChunkIndex::open(tmp.path(), TABLE, embedder.embedder_id(), DIM).await.expect("open never fails on corruption");
    assert_eq!(index.count().await.expect("count"), 0);

    let quarantined = fs::read_dir(tmp.path())
        .expect("read_dir")
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("chunks.lance.corrupt-"));
    assert!(quarantined, "broken table is moved aside, not deleted");

    index.upsert(record(&embedder, "a.pdf", 0, "fresh start", StructuralRole::Body)).await.expect("usable after reset");
    assert_eq!(index.count().await.expect("count"), 1);
}

#[tokio::test]
async fn different_embedder_never_mixes_vectors() {
    let tmp = TempDir::new().expect("tmp");
    let first = FakeEmbedder::new(DIM);
    {
        let index = seeded(&tmp, &first).await;
        assert_eq!(index.count().await.expect("count"), 4);
    }

    let other_id = "other-model:d64";
    let index = ChunkIndex::open(tmp.path(), TABLE, other_id, DIM).await.expect("open");
    assert_eq!(index.embedder_id(), other_id);
    assert_eq!(index.count().await.expect("count"), 0, "vectors from another embedder are not served");

    let stale = fs::read_dir(tmp.path())
        .expect("read_dir")
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("chunks.lance.stale-"));
    assert!(stale);
}

#[tokio::test]
async fn reads_proceed_while_writes_are_serialized() {
    let embedder = std::sync::Arc::new(FakeEmbedder::new(DIM));
    let tmp = TempDir::new().expect("tmp");
    let index = std::sync::Arc::new(seeded(&tmp, &embedder).await);

    let mut tasks = Vec::new();
    for i in 0..4u32 {
        let index = index.clone();
        let embedder = embedder.clone();
        tasks.push(tokio::spawn(async move {
            let doc = format!("doc-{i}.pdf");
            index
                .replace_document(&doc, &[record(&embedder, &doc, 0, &format!("note number {i}"), StructuralRole::Body)])
                .await
        }));
    }
    let q = query_vec(&embedder, "goats need water");
    for _ in 0..4 {
        let hits = index.query(&q, 10, None).await.expect("query during writes");
        assert!(hits.len() >= 4);
    }
    for t in tasks {
        t.await.expect("join").expect("write");
    }
    assert_eq!(index.count().await.expect("count"), 8);
}

use std::fs;

use figment::{providers::{Format, Toml}, Figment};
use tempfile::TempDir;

use insightdb_core::config::{Config, InsightSettings};
use insightdb_core::ingest::{collect_section_files, group_into_documents, load_sections_file, SmartChunk};
use insightdb_core::types::{
    BoundingBox, CategorizedInsightSet, CategoryStatus, Chunk, ChunkDraft, InsightCategory, InsightKind, RankedResult, ScoreSource,
    SelectionQuery, StructuralRole,
};
use insightdb_core::Error;

fn chunk(doc: &str, pos: u32, text: &str) -> Chunk {
    ChunkDraft::new(text, StructuralRole::Body, 1, "Intro").into_chunk(doc, pos)
}

#[test]
fn smart_chunk_aliases_normalize_to_one_shape() {
    let raw = r#"[
        {"document_name": "report.pdf", "page_number": 3, "section_title": "Results",
         "content": "Revenue   grew\n10% in Q1", "hierarchy_level": 2, "full_path": ["Report", "Results"],
         "bounding_box": [0, 0, 10, 10]},
        {"doc_id": "report.pdf", "page": "4", "heading": "Outlook", "text": "Flat guidance", "label": "H1"},
        {"document": "notes.pdf", "page": 2.0, "title": "Summary", "raw_text": "", "full_path": "Notes > Summary"},
        {"document_name": "notes.pdf", "content": "   "}
    ]"#;
    let sections: Vec<SmartChunk> = serde_json::from_str(raw).expect("parse");
    let docs = group_into_documents(sections, "fallback");

    assert_eq!(docs.len(), 2, "grouped by document in first-seen order");
    let (report, report_drafts) = &docs[0];
    assert_eq!(report, "report.pdf");
    assert_eq!(report_drafts.len(), 2);
    assert_eq!(report_drafts[0].text, "Revenue grew 10% in Q1");
    assert_eq!(report_drafts[0].page_number, 3);
    assert_eq!(report_drafts[0].structural_role, StructuralRole::Subheading);
    assert_eq!(report_drafts[0].bounding_box, Some(BoundingBox { x0: 0.0, y0: 0.0, x1: 10.0, y1: 10.0 }));
    assert_eq!(report_drafts[1].bounding_box, None);
    assert_eq!(report_drafts[1].page_number, 4);
    assert_eq!(report_drafts[1].structural_role, StructuralRole::Heading);

    let (notes, notes_drafts) = &docs[1];
    assert_eq!(notes, "notes.pdf");
    assert_eq!(notes_drafts.len(), 1, "entry with neither text nor title is dropped");
    assert_eq!(notes_drafts[0].text, "Summary", "empty content falls back to the title");
    assert_eq!(notes_drafts[0].page_number, 2);
    assert_eq!(notes_drafts[0].section_path, vec!["Notes".to_string(), "Summary".to_string()]);
}

#[test]
fn embedding_text_carries_section_trail() {
    let draft = ChunkDraft::new("Body text", StructuralRole::Body, 1, "Results")
        .with_section_path(vec!["Report".into(), "Results".into()]);
    assert_eq!(draft.embedding_text(), "Section Path: Report > Results\nContent: Body text");

    let bare = ChunkDraft::new("Body text", StructuralRole::Body, 1, "");
    assert_eq!(bare.embedding_text(), "Body text");
}

#[test]
fn sections_file_wrapped_form_and_discovery() {
    let tmp = TempDir::new().expect("tmp");
    let nested = tmp.path().join("nested");
    fs::create_dir_all(&nested).expect("mkdir");
    fs::write(
        nested.join("b.json"),
        r#"{"document_name": "b.pdf", "sections": [{"content": "alpha"}, {"content": "bravo", "document_name": "c.pdf"}]}"#,
    )
    .expect("write");
    fs::write(tmp.path().join("a.json"), r#"[{"content": "charlie"}]"#).expect("write");
    fs::write(tmp.path().join("skip.txt"), "not json").expect("write");

    let files = collect_section_files(tmp.path());
    assert_eq!(files.len(), 2, "only json files are collected");
    assert!(files[0].ends_with("a.json"));

    let sections = load_sections_file(&files[1]).expect("load");
    let docs = group_into_documents(sections, "b");
    let ids: Vec<&str> = docs.iter().map(|(d, _)| d.as_str()).collect();
    assert_eq!(ids, vec!["b.pdf", "c.pdf"], "wrapper id fills only missing ids");

    let unnamed = group_into_documents(load_sections_file(&files[0]).expect("load"), "a");
    assert_eq!(unnamed[0].0, "a", "fallback document id is used");
}

#[test]
fn sections_with_several_spellings_of_a_field_still_load() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("export.json");
    fs::write(
        &path,
        r#"[
            {"document_name": "a.pdf", "document_id": "a.pdf", "title": "T", "section_title": "T",
             "page": 2, "page_number": "2", "content": "x", "text": "x", "structural_role": "H2", "label": "body"},
            {"doc_id": "a.pdf", "section_title": "", "heading": "Pumps", "page_number": "", "page": 5,
             "content": "  ", "raw_text": "Prime first.", "bounding_box": "{\"x0\": 1, \"y0\": 2, \"x1\": 3, \"y1\": 4}"},
            {"document": "a.pdf", "content": "Flat", "full_path": [], "section_path": "Ops > Pumps", "bounding_box": {}}
        ]"#,
    )
    .expect("write");

    let sections = load_sections_file(&path).expect("one record with mixed spellings does not reject the file");
    assert_eq!(sections.len(), 3);
    assert_eq!(sections[0].section_title.as_deref(), Some("T"));
    assert_eq!(sections[0].structural_role.as_deref(), Some("H2"), "canonical spelling wins");

    let docs = group_into_documents(sections, "fallback");
    assert_eq!(docs.len(), 1);
    let drafts = &docs[0].1;
    assert_eq!(drafts[0].page_number, 2);
    assert_eq!(drafts[0].text, "x");
    assert_eq!(drafts[1].section_title, "Pumps", "blank spellings fall through to the next one");
    assert_eq!(drafts[1].page_number, 5);
    assert_eq!(drafts[1].text, "Prime first.");
    assert_eq!(drafts[1].bounding_box, Some(BoundingBox { x0: 1.0, y0: 2.0, x1: 3.0, y1: 4.0 }));
    assert_eq!(drafts[2].section_path, vec!["Ops".to_string(), "Pumps".to_string()]);
    assert_eq!(drafts[2].bounding_box, None, "empty placeholder box is dropped");
}

#[test]
fn selection_query_validation() {
    assert!(matches!(SelectionQuery::new("", None, 3), Err(Error::InvalidQuery(_))));
    assert!(matches!(SelectionQuery::new(" \n\t ", None, 3), Err(Error::InvalidQuery(_))));
    assert!(matches!(SelectionQuery::new(" ab ", None, 3), Err(Error::InvalidQuery(_))));
    let q = SelectionQuery::new("  abc ", Some("  ".into()), 3).expect("valid");
    assert_eq!(q.text(), "abc");
    assert!(q.document_filter().is_none(), "blank filter is dropped");
}

#[test]
fn fingerprint_ignores_case_punctuation_and_spacing() {
    let a = SelectionQuery::new("Revenue grew 10% in Q1", None, 3).expect("q");
    let b = SelectionQuery::new("  revenue GREW 10 in q1!! ", None, 3).expect("q");
    let c = SelectionQuery::new("Revenue grew 10% in Q1", Some("report.pdf".into()), 3).expect("q");
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint(), "document filter is part of the key");
}

#[test]
fn insight_set_partial_and_retain() {
    let ranked = |doc: &str, pos: u32| RankedResult { chunk: chunk(doc, pos, "text"), score: 1.0, source: ScoreSource::Joint };
    let mut set = CategorizedInsightSet {
        related: vec![ranked("a", 0), ranked("b", 0)],
        contradictions: InsightCategory::empty(InsightKind::Contradiction, CategoryStatus::TimedOut),
        enhancements: InsightCategory { results: vec![ranked("b", 0)], ..InsightCategory::empty(InsightKind::Enhancement, CategoryStatus::Complete) },
        connections: InsightCategory::empty(InsightKind::Connection, CategoryStatus::Complete),
        rerank_degraded: false,
        recall_count: 2,
    };
    assert!(set.is_partial());
    assert_eq!(set.incomplete_categories(), vec![InsightKind::Contradiction]);

    set.retain_chunks(|c| c.document_id != "b");
    assert_eq!(set.related.len(), 1);
    assert!(set.enhancements.results.is_empty());
}

#[test]
fn config_defaults_and_overrides() {
    let defaults = InsightSettings::default();
    assert_eq!(defaults.retrieval.recall_top_n, 100);
    assert_eq!(defaults.rerank.top_k, 30);
    assert_eq!(defaults.categorize.per_category_limit, 5);
    defaults.validate().expect("defaults are valid");

    let config = Config::from_figment(Figment::from(Toml::string("[rerank]\ntop_k = 10\n[cache]\nttl_secs = 5\n")));
    let settings = config.settings().expect("settings");
    assert_eq!(settings.rerank.top_k, 10);
    assert_eq!(settings.rerank.batch_size, 16, "unset keys keep defaults");
    assert_eq!(settings.cache.ttl_secs, 5);
    let table: String = config.get("index.table").expect("get");
    assert_eq!(table, "chunks");
}

#[test]
fn config_rejects_widening_pipeline() {
    let config = Config::from_figment(Figment::from(Toml::string("[retrieval]\nrecall_top_n = 20\n[rerank]\ntop_k = 30\n")));
    assert!(config.settings().is_err(), "rerank output cannot exceed recall output");

    let mut settings = InsightSettings::default();
    settings.rerank.dedup_threshold = 0.0;
    assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
}

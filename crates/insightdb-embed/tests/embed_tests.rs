use insightdb_core::config::{EmbeddingSettings, RerankSettings};
use insightdb_core::traits::{Embedder, JointScorer};
use insightdb_embed::{get_default_embedder, get_default_scorer, FakeEmbedder, LexicalScorer};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn fake_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { use_fake: true, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    let texts = vec!["hello world".to_string(), "Hello, world!".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 1024, "embedding dim is 1024");
    assert_eq!(embedder.embedder_id(), "fake:xxh64:d1024");

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    // Case and punctuation do not change the vector
    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn fake_embedder_prefers_shared_words() {
    let e = FakeEmbedder::new(256);
    let v = e
        .embed_batch(&[
            "revenue grew in q1".to_string(),
            "revenue grew strongly in q1".to_string(),
            "marketing spend rose".to_string(),
        ])
        .expect("embed");
    assert!(cosine(&v[0], &v[1]) > cosine(&v[0], &v[2]));
}

#[test]
fn lexical_scorer_orders_by_query_coverage() {
    let scorer = LexicalScorer::new();
    let candidates = vec![
        "Q1 marketing spend increased 15%".to_string(),
        "Revenue grew 10% in Q1".to_string(),
        "Revenue declined 3% in Q1 per the restated filing".to_string(),
    ];
    let scores = scorer.score_pairs("Revenue grew 10% in Q1", &candidates).expect("score");
    assert_eq!(scores.len(), 3);
    assert!((scores[1] - 1.0).abs() < 1e-6, "exact match covers every word and bigram");
    assert!(scores[1] > scores[2] && scores[2] > scores[0], "scores={scores:?}");
}

#[test]
fn scorer_disabled_or_fake_by_settings() {
    let disabled = RerankSettings { enabled: false, ..RerankSettings::default() };
    assert!(get_default_scorer(&disabled).expect("ok").is_none());

    let fake = RerankSettings { use_fake: true, ..RerankSettings::default() };
    let scorer = get_default_scorer(&fake).expect("ok").expect("scorer");
    assert_eq!(scorer.scorer_id(), "lexical");
}

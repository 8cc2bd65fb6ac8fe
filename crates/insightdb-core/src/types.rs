//! Domain types shared by the index, the pipeline stages and the orchestrator.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::normalize::normalize_text;

pub type ChunkId = String;
pub type DocumentId = String;

/// Structural role assigned by the document parser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StructuralRole {
    Heading,
    Subheading,
    Body,
}

impl StructuralRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Subheading => "subheading",
            Self::Body => "body",
        }
    }

    /// Accepts the stored names plus the parser's classifier labels (`Title`, `H1`..`H6`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "heading" | "title" | "h1" => Some(Self::Heading),
            "subheading" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(Self::Subheading),
            "body" | "text" | "paragraph" => Some(Self::Body),
            _ => None,
        }
    }

    /// Hierarchy levels as emitted by the parser: 0 = title, 1 = H1, 2.. = deeper headings.
    pub fn from_level(level: u32) -> Self {
        if level <= 1 { Self::Heading } else { Self::Subheading }
    }
}

/// An indexed unit of document text. Immutable once stored.
///
/// - `id`: stable identifier, `<document_id>:<position>`
/// - `position`: order of the chunk within its document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub page_number: u32,
    pub section_title: String,
    pub raw_text: String,
    pub structural_role: StructuralRole,
    pub position: u32,
    /// Where the text sits on its page, when the parser reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Page rectangle in PDF points, `(x0, y0)` being the top-left corner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Chunk {
    pub fn chunk_id(document_id: &str, position: u32) -> ChunkId {
        format!("{document_id}:{position}")
    }
}

/// A chunk together with the vector the index stores for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Ingestion input for one chunk, before an id and embedding are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub text: String,
    pub structural_role: StructuralRole,
    pub page_number: u32,
    pub section_title: String,
    /// Heading trail from the document root; only used to enrich the embedded text.
    pub section_path: Vec<String>,
    pub bounding_box: Option<BoundingBox>,
}

impl ChunkDraft {
    pub fn new(
        text: impl Into<String>,
        structural_role: StructuralRole,
        page_number: u32,
        section_title: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            structural_role,
            page_number,
            section_title: section_title.into(),
            section_path: Vec::new(),
            bounding_box: None,
        }
    }

    #[must_use]
    pub fn with_section_path(mut self, path: Vec<String>) -> Self {
        self.section_path = path;
        self
    }

    #[must_use]
    pub fn with_bounding_box(mut self, bounding_box: Option<BoundingBox>) -> Self {
        self.bounding_box = bounding_box;
        self
    }

    /// Text handed to the embedder: the raw text prefixed with its section trail.
    pub fn embedding_text(&self) -> String {
        let trail = if self.section_path.is_empty() {
            self.section_title.trim().to_string()
        } else {
            self.section_path.join(" > ")
        };
        if trail.is_empty() {
            self.text.clone()
        } else {
            format!("Section Path: {trail}\nContent: {}", self.text)
        }
    }

    pub fn into_chunk(self, document_id: &str, position: u32) -> Chunk {
        Chunk {
            id: Chunk::chunk_id(document_id, position),
            document_id: document_id.to_string(),
            page_number: self.page_number,
            section_title: self.section_title,
            raw_text: self.text,
            structural_role: self.structural_role,
            position,
            bounding_box: self.bounding_box,
        }
    }
}

/// Equality filter over chunk metadata. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkFilter {
    pub document_id: Option<DocumentId>,
    pub structural_role: Option<StructuralRole>,
    pub page_number: Option<u32>,
}

impl ChunkFilter {
    pub fn document(document_id: impl Into<DocumentId>) -> Self {
        Self { document_id: Some(document_id.into()), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.structural_role.is_none() && self.page_number.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.document_id.as_ref().map_or(true, |d| *d == chunk.document_id)
            && self.structural_role.map_or(true, |r| r == chunk.structural_role)
            && self.page_number.map_or(true, |p| p == chunk.page_number)
    }
}

/// One retrieval request: the selected text and an optional document restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionQuery {
    text: String,
    document_filter: Option<DocumentId>,
}

impl SelectionQuery {
    /// Rejects empty, whitespace-only and too-short selections.
    pub fn new(text: &str, document_filter: Option<DocumentId>, min_chars: usize) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidQuery("selection is empty".to_string()));
        }
        let chars = trimmed.chars().count();
        if chars < min_chars {
            return Err(Error::InvalidQuery(format!(
                "selection has {chars} characters, at least {min_chars} required"
            )));
        }
        let document_filter = document_filter.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        Ok(Self { text: trimmed.to_string(), document_filter })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn document_filter(&self) -> Option<&str> {
        self.document_filter.as_deref()
    }

    pub fn chunk_filter(&self) -> Option<ChunkFilter> {
        self.document_filter.as_ref().map(|d| ChunkFilter::document(d.clone()))
    }

    /// Key for caching and coalescing: identical for selections that only
    /// differ in case, punctuation or whitespace.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize_text(&self.text).as_bytes());
        hasher.update(&[0x1f]);
        if let Some(doc) = &self.document_filter {
            hasher.update(doc.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A recall-stage hit: a chunk and its embedding similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Which stage produced a result's score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    /// Joint relevance score from the precision reranker.
    Joint,
    /// Recall similarity kept because the reranker was unavailable.
    Recall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    pub chunk: Chunk,
    pub score: f32,
    pub source: ScoreSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Contradiction,
    Enhancement,
    Connection,
}

impl InsightKind {
    pub const ALL: [InsightKind; 3] = [Self::Contradiction, Self::Enhancement, Self::Connection];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contradiction => "contradiction",
            Self::Enhancement => "enhancement",
            Self::Connection => "connection",
        }
    }

    /// Key under which the categorization service returns its picks.
    pub fn response_key(self) -> &'static str {
        match self {
            Self::Contradiction => "contradictions",
            Self::Enhancement => "enhancements",
            Self::Connection => "connections",
        }
    }
}

/// A speaker-attributed line for the narration collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentaryLine {
    pub speaker: String,
    pub text: String,
}

impl CommentaryLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self { speaker: speaker.into(), text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Complete,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightCategory {
    pub kind: InsightKind,
    /// Picks in the reranker's order.
    pub results: Vec<RankedResult>,
    pub commentary: Vec<CommentaryLine>,
    pub status: CategoryStatus,
}

impl InsightCategory {
    pub fn empty(kind: InsightKind, status: CategoryStatus) -> Self {
        Self { kind, results: Vec::new(), commentary: Vec::new(), status }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CategoryStatus::Complete
    }
}

/// Full response of the insight pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorizedInsightSet {
    pub related: Vec<RankedResult>,
    pub contradictions: InsightCategory,
    pub enhancements: InsightCategory,
    pub connections: InsightCategory,
    /// True when `related` carries recall ordering because joint scoring failed.
    pub rerank_degraded: bool,
    /// Number of candidates the recall stage produced.
    pub recall_count: usize,
}

impl CategorizedInsightSet {
    pub fn category(&self, kind: InsightKind) -> &InsightCategory {
        match kind {
            InsightKind::Contradiction => &self.contradictions,
            InsightKind::Enhancement => &self.enhancements,
            InsightKind::Connection => &self.connections,
        }
    }

    pub fn categories(&self) -> [&InsightCategory; 3] {
        [&self.contradictions, &self.enhancements, &self.connections]
    }

    /// True when at least one category failed or timed out.
    pub fn is_partial(&self) -> bool {
        self.categories().iter().any(|c| !c.is_complete())
    }

    pub fn incomplete_categories(&self) -> Vec<InsightKind> {
        self.categories().iter().filter(|c| !c.is_complete()).map(|c| c.kind).collect()
    }

    /// Commentary of all categories, in category order, for narration.
    pub fn commentary(&self) -> Vec<(InsightKind, &CommentaryLine)> {
        self.categories()
            .into_iter()
            .flat_map(|c| c.commentary.iter().map(move |line| (c.kind, line)))
            .collect()
    }

    /// Keep only results whose chunk passes `keep`, in every view.
    pub fn retain_chunks<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Chunk) -> bool,
    {
        self.related.retain(|r| keep(&r.chunk));
        for category in [&mut self.contradictions, &mut self.enhancements, &mut self.connections] {
            category.results.retain(|r| keep(&r.chunk));
        }
    }
}

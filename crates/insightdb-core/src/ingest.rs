//! Ingestion boundary for the document parser's "smart chunks".
//!
//! The parser output is loosely typed: optional fields, several names for the
//! same concept, page numbers as numbers or strings. Everything is normalized
//! here into [`ChunkDraft`] so nothing optional or aliased leaks further in.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::normalize::collapse_whitespace;
use crate::types::{BoundingBox, ChunkDraft, DocumentId, StructuralRole};

/// One parser section with every alias already resolved.
///
/// Exporters often emit several spellings of a field at once (`title` next to
/// `section_title`, `page` next to `page_number`); the first non-empty one wins.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawSection")]
pub struct SmartChunk {
    pub document_id: Option<String>,
    pub content: Option<String>,
    pub page_number: Option<PageNumber>,
    pub section_title: Option<String>,
    pub structural_role: Option<String>,
    pub hierarchy_level: Option<i64>,
    pub full_path: Option<SectionPath>,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSection {
    document_id: Option<String>,
    document_name: Option<String>,
    doc_id: Option<String>,
    document: Option<String>,
    content: Option<String>,
    raw_text: Option<String>,
    text: Option<String>,
    original_content: Option<String>,
    chunk_text: Option<String>,
    page_number: Option<PageNumber>,
    page: Option<PageNumber>,
    section_title: Option<String>,
    heading: Option<String>,
    title: Option<String>,
    structural_role: Option<String>,
    role: Option<String>,
    label: Option<String>,
    hierarchy_level: Option<i64>,
    full_path: Option<SectionPath>,
    section_path: Option<SectionPath>,
    bounding_box: Option<serde_json::Value>,
}

fn first_text<const N: usize>(spellings: [Option<String>; N]) -> Option<String> {
    spellings.into_iter().flatten().find(|s| !s.trim().is_empty())
}

impl From<RawSection> for SmartChunk {
    fn from(raw: RawSection) -> Self {
        let page_number = [raw.page_number, raw.page]
            .into_iter()
            .flatten()
            .find(|p| !matches!(p, PageNumber::Text(s) if s.trim().is_empty()));
        let full_path = [raw.full_path, raw.section_path].into_iter().flatten().find(|p| !p.segments().is_empty());
        Self {
            document_id: first_text([raw.document_id, raw.document_name, raw.doc_id, raw.document]),
            content: first_text([raw.content, raw.raw_text, raw.text, raw.original_content, raw.chunk_text]),
            page_number,
            section_title: first_text([raw.section_title, raw.heading, raw.title]),
            structural_role: first_text([raw.structural_role, raw.role, raw.label]),
            hierarchy_level: raw.hierarchy_level,
            full_path,
            bounding_box: raw.bounding_box.as_ref().and_then(parse_bounding_box),
        }
    }
}

/// Accepts `{x0, y0, x1, y1}`, `[x0, y0, x1, y1]`, or either of those encoded as a
/// JSON string. Anything else (including the parser's `{}` placeholder) is `None`.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_bounding_box(value: &serde_json::Value) -> Option<BoundingBox> {
    use serde_json::Value;
    let num = |v: Option<&Value>| v.and_then(Value::as_f64).map(|f| f as f32);
    let bbox = match value {
        Value::String(s) => return serde_json::from_str::<Value>(s).ok().as_ref().and_then(parse_bounding_box),
        Value::Array(items) if items.len() == 4 => BoundingBox {
            x0: num(items.first())?,
            y0: num(items.get(1))?,
            x1: num(items.get(2))?,
            y1: num(items.get(3))?,
        },
        Value::Object(map) => BoundingBox {
            x0: num(map.get("x0"))?,
            y0: num(map.get("y0"))?,
            x1: num(map.get("x1"))?,
            y1: num(map.get("y1"))?,
        },
        _ => return None,
    };
    [bbox.x0, bbox.y0, bbox.x1, bbox.y1].iter().all(|f| f.is_finite()).then_some(bbox)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PageNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PageNumber {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn value(&self) -> u32 {
        match self {
            Self::Int(n) => u32::try_from(*n).unwrap_or(0),
            Self::Float(f) if f.is_finite() && *f >= 0.0 => f.floor() as u32,
            Self::Float(_) => 0,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SectionPath {
    Segments(Vec<String>),
    Joined(String),
}

impl SectionPath {
    pub fn segments(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::Segments(v) => v.iter().map(String::as_str).collect(),
            Self::Joined(s) => s.split('>').collect(),
        };
        raw.into_iter().map(collapse_whitespace).filter(|s| !s.is_empty()).collect()
    }
}

impl SmartChunk {
    /// Normalize into a strict draft. Returns `None` for entries with no text and no title.
    pub fn into_draft(self) -> Option<ChunkDraft> {
        let title = self.section_title.as_deref().map(collapse_whitespace).unwrap_or_default();
        let content = self.content.as_deref().map(collapse_whitespace).unwrap_or_default();
        if content.is_empty() && title.is_empty() {
            return None;
        }

        let role = self
            .structural_role
            .as_deref()
            .and_then(StructuralRole::from_label)
            .or_else(|| self.hierarchy_level.map(|l| StructuralRole::from_level(u32::try_from(l).unwrap_or(0))))
            .unwrap_or(if content.is_empty() { StructuralRole::Heading } else { StructuralRole::Body });

        let mut path = self.full_path.as_ref().map(SectionPath::segments).unwrap_or_default();
        if path.is_empty() && !title.is_empty() {
            path.push(title.clone());
        }

        let text = if content.is_empty() { title.clone() } else { content };
        let page = self.page_number.as_ref().map_or(0, PageNumber::value);
        Some(ChunkDraft::new(text, role, page, title).with_section_path(path).with_bounding_box(self.bounding_box))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SectionsFile {
    List(Vec<SmartChunk>),
    Wrapped {
        #[serde(default)]
        document_id: Option<String>,
        #[serde(default)]
        document_name: Option<String>,
        #[serde(default)]
        doc_id: Option<String>,
        sections: Vec<SmartChunk>,
    },
}

/// Read one parser output file (a JSON array of sections, or `{ "sections": [...] }`).
pub fn load_sections_file(path: &Path) -> Result<Vec<SmartChunk>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed: SectionsFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing sections from {}", path.display()))?;
    Ok(match parsed {
        SectionsFile::List(sections) => sections,
        SectionsFile::Wrapped { document_id, document_name, doc_id, mut sections } => {
            if let Some(doc) = first_text([document_id, document_name, doc_id]) {
                for s in sections.iter_mut().filter(|s| s.document_id.is_none()) {
                    s.document_id = Some(doc.clone());
                }
            }
            sections
        }
    })
}

/// Split parser output into per-document draft lists, preserving first-seen order.
/// Sections without a document id are attributed to `fallback_document`.
pub fn group_into_documents(sections: Vec<SmartChunk>, fallback_document: &str) -> Vec<(DocumentId, Vec<ChunkDraft>)> {
    let mut docs: Vec<(DocumentId, Vec<ChunkDraft>)> = Vec::new();
    let mut skipped = 0usize;
    for section in sections {
        let doc = section
            .document_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(fallback_document)
            .to_string();
        let Some(draft) = section.into_draft() else {
            skipped += 1;
            continue;
        };
        match docs.iter_mut().find(|(id, _)| *id == doc) {
            Some((_, drafts)) => drafts.push(draft),
            None => docs.push((doc, vec![draft])),
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "dropped sections without text or title");
    }
    docs
}

/// JSON files under `root` (or `root` itself when it is a file), sorted.
pub fn collect_section_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(std::result::Result::ok).filter(|e| e.file_type().is_file()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

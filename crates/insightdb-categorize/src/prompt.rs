//! Prompt construction for the categorization and persona calls.
//!
//! Candidates are listed as a JSON array between [`CANDIDATES_BEGIN`] and
//! [`CANDIDATES_END`] so replies can echo their `chunk_id`s back.

use insightdb_core::types::{InsightKind, RankedResult};
use serde::Serialize;

pub const CANDIDATES_BEGIN: &str = "CANDIDATES (JSON):";
pub const CANDIDATES_END: &str = "END CANDIDATES";
/// First line of every category prompt, followed by the kind (`TASK: contradiction`).
pub const TASK_PREFIX: &str = "TASK: ";

#[derive(Debug, Serialize)]
struct PromptCandidate<'a> {
    chunk_id: &'a str,
    document_id: &'a str,
    page_number: u32,
    section_title: &'a str,
    text: &'a str,
}

fn instruction(kind: InsightKind) -> &'static str {
    match kind {
        InsightKind::Contradiction => {
            "Find only the contradictions: candidates that present a viewpoint, figure or fact \
             that directly opposes or challenges the selected text."
        }
        InsightKind::Enhancement => {
            "Find only the enhancements: candidates that give a more detailed explanation, a \
             specific example, or build directly upon the selected text."
        }
        InsightKind::Connection => {
            "Find only the connections: candidates that are thematically related to the selected \
             text but are neither direct enhancements nor contradictions."
        }
    }
}

/// JSON array of the candidates, in rank order.
pub fn candidate_block(candidates: &[RankedResult]) -> String {
    let rows: Vec<PromptCandidate<'_>> = candidates
        .iter()
        .map(|r| PromptCandidate {
            chunk_id: &r.chunk.id,
            document_id: &r.chunk.document_id,
            page_number: r.chunk.page_number,
            section_title: &r.chunk.section_title,
            text: &r.chunk.raw_text,
        })
        .collect();
    serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
}

pub fn category_prompt(kind: InsightKind, selection: &str, candidates: &[RankedResult], limit: usize) -> String {
    let key = kind.response_key();
    format!(
        "{TASK_PREFIX}{kind}\n\
         You are an analyst comparing a reader's selected text against passages from their document library.\n\
         {instruction}\n\
         Pick at most {limit} candidates, most relevant first, using only chunk_id values from the candidate list.\n\
         Also write a short commentary exchange about your picks, alternating between a Host and an Analyst.\n\
         Respond with a JSON object only, no prose, in this shape:\n\
         {{\"{key}\": [{{\"chunk_id\": \"<chunk_id>\", \"reason\": \"<one sentence>\"}}], \
         \"commentary\": [{{\"speaker\": \"Host\", \"text\": \"...\"}}, {{\"speaker\": \"Analyst\", \"text\": \"...\"}}]}}\n\
         If nothing qualifies return an empty \"{key}\" array.\n\n\
         SELECTED TEXT:\n\"{selection}\"\n\n\
         {CANDIDATES_BEGIN}\n{block}\n{CANDIDATES_END}\n",
        kind = kind.as_str(),
        instruction = instruction(kind),
        block = candidate_block(candidates),
    )
}

pub fn persona_prompt(persona: &str, style_guide: &str, selection: &str, context: &[RankedResult]) -> String {
    format!(
        "You are a podcast script writer. Using the selected text and the context passages, write a \
         conversation between a Host and an Analyst in the style of a \"{persona}\".\n\
         Style guide: {style_guide}\n\
         Write 8 to 12 exchanges, each one to three sentences, without speaker names in the text.\n\
         Return a JSON object only, with a single key \"conversation\" holding an array of strings; \
         even indices are the Host, odd indices the Analyst.\n\n\
         SELECTED TEXT:\n\"{selection}\"\n\n\
         {CANDIDATES_BEGIN}\n{block}\n{CANDIDATES_END}\n",
        block = candidate_block(context),
    )
}

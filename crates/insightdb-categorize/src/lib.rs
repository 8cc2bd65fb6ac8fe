//! Categorization of reranked results into contradictions, enhancements and
//! connections by a generative service, plus persona-styled commentary scripts.

pub mod gemini;
pub mod parse;
pub mod persona;
pub mod prompt;
mod stage;

pub use gemini::GeminiGenerator;
pub use persona::{Persona, PersonaScript, PersonaScripter};
pub use stage::{Categorization, Categorizer};

//! Persona-styled Host/Analyst scripts about a selection, for narration.

use std::sync::Arc;
use std::time::Duration;

use insightdb_core::traits::Generator;
use insightdb_core::types::{CommentaryLine, RankedResult};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::parse::{parse_script_reply, speaker_for};
use crate::prompt::persona_prompt;

const MIN_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Debater,
    Investigator,
    Fundamentals,
    Connections,
}

impl Persona {
    pub const ALL: [Persona; 4] = [Self::Debater, Self::Investigator, Self::Fundamentals, Self::Connections];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debater => "debater",
            Self::Investigator => "investigator",
            Self::Fundamentals => "fundamentals",
            Self::Connections => "connections",
        }
    }

    pub fn style_guide(self) -> &'static str {
        match self {
            Self::Debater => "The Host and Analyst present opposing viewpoints and debate the nuances of the findings.",
            Self::Investigator => {
                "The Host and Analyst dig into the evidence, question assumptions and focus on factual details."
            }
            Self::Fundamentals => {
                "The Host and Analyst start from the most basic concepts in the context and build up to the selected topic."
            }
            Self::Connections => {
                "The Host and Analyst draw surprising connections and analogies between the selected topic and \
                 other concepts in the context, even from different domains."
            }
        }
    }

    fn canned_lines(self) -> [&'static str; 8] {
        match self {
            Self::Debater => [
                "Welcome to a debate-style look at the text you selected.",
                "There is more room for disagreement here than it first appears.",
                "Then let's hear the strongest case against it.",
                "The counterarguments rest on how you read the evidence.",
                "Does the context lean toward either side?",
                "It supports parts of both positions, which is what makes it interesting.",
                "So the honest answer is that it depends on the framing.",
                "Exactly, and that is worth keeping in mind as you read on.",
            ],
            Self::Investigator => [
                "Let's examine the selected text with a critical eye.",
                "The surrounding passages give us several concrete details to check.",
                "Which of those details actually support the claim?",
                "The documented figures line up, with a few gaps.",
                "What is missing that we would want to verify?",
                "Mostly the sources behind the numbers; those deserve a closer look.",
                "Good, so we know where the evidence is solid.",
                "And where a follow-up read would pay off.",
            ],
            Self::Fundamentals => [
                "Let's start with the basic ideas behind the selected text.",
                "Getting the fundamentals right makes the rest much easier.",
                "What are the core principles we need first?",
                "A handful of definitions carry most of the weight here.",
                "How do those basics lead to the point being made?",
                "Step by step; each idea builds on the one before it.",
                "So the selection is really the last step of that chain.",
                "Right, and seeing the chain makes it easy to follow.",
            ],
            Self::Connections => [
                "Let's explore what the selected text connects to.",
                "It links to several topics you might not expect.",
                "Which patterns show up across the other documents?",
                "The same underlying idea appears in quite different fields.",
                "Is there an analogy that makes the link clear?",
                "A few, and they point to a shared principle.",
                "That is a useful way to remember it.",
                "Connections like these are what make the library worth exploring.",
            ],
        }
    }

    /// Script used when generation fails or returns too little.
    pub fn fallback_script(self) -> Vec<CommentaryLine> {
        self.canned_lines().iter().enumerate().map(|(i, t)| CommentaryLine::new(speaker_for(i), *t)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaScript {
    pub persona: Persona,
    pub lines: Vec<CommentaryLine>,
    /// True when `lines` is the canned script.
    pub fallback: bool,
}

impl PersonaScript {
    fn fallback(persona: Persona) -> Self {
        Self { persona, lines: persona.fallback_script(), fallback: true }
    }
}

pub struct PersonaScripter {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl PersonaScripter {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// One script per persona, in [`Persona::ALL`] order. Always returns all four.
    pub async fn scripts(&self, selection: &str, context: &[RankedResult]) -> Vec<PersonaScript> {
        if context.is_empty() {
            return Persona::ALL.iter().map(|p| PersonaScript::fallback(*p)).collect();
        }
        let mut tasks = JoinSet::new();
        for persona in Persona::ALL {
            let generator = self.generator.clone();
            let prompt = persona_prompt(persona.as_str(), persona.style_guide(), selection, context);
            let timeout = self.timeout;
            tasks.spawn(async move { generate_script(generator, persona, prompt, timeout).await });
        }
        let mut done = Vec::with_capacity(Persona::ALL.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(script) => done.push(script),
                Err(e) => tracing::warn!(error = %e, "persona task did not finish"),
            }
        }
        Persona::ALL
            .iter()
            .map(|p| {
                done.iter().position(|s| s.persona == *p).map_or_else(|| PersonaScript::fallback(*p), |i| done.swap_remove(i))
            })
            .collect()
    }
}

async fn generate_script(generator: Arc<dyn Generator>, persona: Persona, prompt: String, timeout: Duration) -> PersonaScript {
    let raw = match tokio::time::timeout(timeout, generator.generate(&prompt)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            tracing::warn!(persona = persona.as_str(), error = %e, "persona script failed, using fallback");
            return PersonaScript::fallback(persona);
        }
        Err(_) => {
            tracing::warn!(persona = persona.as_str(), "persona script timed out, using fallback");
            return PersonaScript::fallback(persona);
        }
    };
    match finalize(parse_script_reply(&raw)) {
        Some(lines) => PersonaScript { persona, lines, fallback: false },
        None => {
            tracing::warn!(persona = persona.as_str(), "persona reply too short or malformed, using fallback");
            PersonaScript::fallback(persona)
        }
    }
}

/// Even length, at least [`MIN_LINES`], speakers strictly alternating from Host.
fn finalize(mut lines: Vec<CommentaryLine>) -> Option<Vec<CommentaryLine>> {
    if lines.len() < MIN_LINES {
        return None;
    }
    lines.truncate(lines.len() - lines.len() % 2);
    for (i, line) in lines.iter_mut().enumerate() {
        line.speaker = speaker_for(i).to_string();
    }
    Some(lines)
}

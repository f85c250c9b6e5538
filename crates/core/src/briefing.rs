//! Briefing — the structured extraction of user intent.
//!
//! One Briefing per session, produced by the briefing-refinement sub-agent
//! and consumed read-only by the reasoning loop. A refinement replaces the
//! whole structure; fields are never merged.

use serde::{Deserialize, Serialize};

/// Markers that identify top-level briefing fields inside free text.
/// The host UI submits briefings as fenced blocks; plain `Field:` headers
/// are accepted as well.
const FIELD_MARKERS: &[&str] = &["context", "expectations", "prior knowledge", "questions"];

/// Structured user intent for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    /// Background the user provided
    #[serde(default)]
    pub context: String,

    /// What the user expects, as a list
    #[serde(default)]
    pub expectations: Vec<String>,

    /// What the user already knows
    #[serde(default)]
    pub prior_knowledge: String,

    /// Open questions the user wants addressed
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Briefing {
    /// A briefing holding only raw, unrefined context. Used as the fallback
    /// when the refinement sub-agent produces unusable output.
    pub fn raw(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    /// Whether every field is empty.
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.expectations.is_empty()
            && self.prior_knowledge.is_empty()
            && self.questions.is_empty()
    }

    /// Default re-trigger predicate: does the latest input carry new
    /// top-level briefing fields?
    ///
    /// Looks for fenced blocks (```Context ... ```) or `Context:`-style
    /// headers at line starts. The preparation stage accepts an override, so
    /// hosts can swap in a different policy.
    pub fn mentions_inline_fields(input: &str) -> bool {
        for line in input.lines() {
            let line = line.trim();
            let candidate = line
                .strip_prefix("```")
                .map(str::trim)
                .or_else(|| line.split_once(':').map(|(head, _)| head.trim()));
            if let Some(head) = candidate {
                let head = head.to_lowercase();
                if FIELD_MARKERS.iter().any(|m| head == *m) {
                    return true;
                }
            }
        }
        false
    }

    /// Render the briefing into the fenced-block layout the assistant's
    /// system instruction grounds itself on. Empty blocks mean "not provided
    /// by the user".
    pub fn prompt_block(&self) -> String {
        let mut out = String::from("~~~ User briefing\n");
        push_block(&mut out, "Context", &self.context);
        push_block(&mut out, "Expectations", &self.expectations.join("\n"));
        push_block(&mut out, "Prior Knowledge", &self.prior_knowledge);
        push_block(&mut out, "Questions", &self.questions.join("\n"));
        out.push_str("~~~");
        out
    }
}

fn push_block(out: &mut String, heading: &str, body: &str) {
    out.push_str("```");
    out.push_str(heading);
    out.push('\n');
    if !body.is_empty() {
        out.push_str(body);
        out.push('\n');
    }
    out.push_str("```\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_fenced_briefing_blocks() {
        let input = "Here you go.\n```Context\nA panel on AI policy.\n```\n";
        assert!(Briefing::mentions_inline_fields(input));
    }

    #[test]
    fn detects_header_style_fields() {
        assert!(Briefing::mentions_inline_fields(
            "Expectations: cover inflation and rates"
        ));
        assert!(Briefing::mentions_inline_fields(
            "prior knowledge: basic macroeconomics"
        ));
    }

    #[test]
    fn plain_question_is_not_a_briefing() {
        let input = "What's new in the panel I expected to cover inflation \
                     but instead discussed AI?";
        assert!(!Briefing::mentions_inline_fields(input));
    }

    #[test]
    fn prompt_block_keeps_empty_blocks() {
        let briefing = Briefing {
            context: "A fintech conference talk".into(),
            expectations: vec!["summarize key claims".into()],
            ..Default::default()
        };
        let block = briefing.prompt_block();
        assert!(block.contains("```Context\nA fintech conference talk"));
        assert!(block.contains("```Expectations\nsummarize key claims"));
        // Empty fields still render as empty blocks
        assert!(block.contains("```Prior Knowledge\n```"));
        assert!(block.contains("```Questions\n```"));
    }

    #[test]
    fn raw_briefing_is_context_only() {
        let briefing = Briefing::raw("unparsed text");
        assert_eq!(briefing.context, "unparsed text");
        assert!(briefing.expectations.is_empty());
        assert!(!briefing.is_empty());
    }
}

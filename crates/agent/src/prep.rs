//! Preparation stage: sub-agents that massage the session before the
//! reasoning loop sees it.
//!
//! Sub-agents run in a fixed order and every one of them degrades
//! gracefully. A failure inside a sub-agent never aborts the turn; the
//! session is simply left with the unrefined input and a fallback flag.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::{
    Briefing, EngineConfig, ModelClient, ModelReply, ModelRequest, Session, TraceBus, TraceEvent,
    TraceKind, Turn,
};

/// A single preparation step run before the reasoning loop.
#[async_trait]
pub trait SubAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Mutates the session in place. Errors are internal to the
    /// sub-agent; implementations fall back rather than propagate.
    async fn run(&self, session: &mut Session, latest_input: &str);
}

/// Decides whether a refined briefing should be rebuilt for this input.
pub type RetriggerPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

const REFINER_SYSTEM_PROMPT: &str = "You restructure a user's free-text briefing for an \
assistant. Extract it into a JSON object with exactly these keys: \"context\" (string), \
\"expectations\" (array of strings), \"prior_knowledge\" (string), \"questions\" (array of \
strings). Use empty strings or arrays for anything the user did not provide. Respond with \
the JSON object only, no prose.";

const NORMALIZER_SYSTEM_PROMPT: &str = "You correct grammar, spelling, and punctuation in a \
user's message without changing its meaning, tone, or language. Respond with the corrected \
message only, no prose.";

/// Restructures the user's free-text briefing into the four structured
/// fields the system prompt is built from.
///
/// Runs once per session; afterwards it only re-runs when the retrigger
/// predicate recognises fresh briefing material in the input.
pub struct BriefingRefiner {
    model: Arc<dyn ModelClient>,
    model_name: String,
    retrigger: RetriggerPredicate,
}

impl BriefingRefiner {
    pub fn new(model: Arc<dyn ModelClient>, config: &EngineConfig) -> Self {
        Self {
            model,
            model_name: config.model.clone(),
            retrigger: Arc::new(|input| Briefing::mentions_inline_fields(input)),
        }
    }

    pub fn with_retrigger(mut self, predicate: RetriggerPredicate) -> Self {
        self.retrigger = predicate;
        self
    }

    fn fall_back(&self, session: &mut Session, input: &str, reason: &str) {
        warn!(agent = self.name(), reason, "briefing refinement fell back to raw input");
        session.briefing = Some(Briefing::raw(input));
        session.briefing_unrefined_fallback = true;
    }
}

#[async_trait]
impl SubAgent for BriefingRefiner {
    fn name(&self) -> &str {
        "briefing_refiner"
    }

    async fn run(&self, session: &mut Session, latest_input: &str) {
        if session.briefing_refined && !(self.retrigger)(latest_input) {
            debug!(session = %session.key, "briefing already refined, skipping");
            return;
        }

        let request = ModelRequest {
            model: self.model_name.clone(),
            system: Some(REFINER_SYSTEM_PROMPT.to_string()),
            messages: vec![Turn::user(latest_input)],
            temperature: 0.0,
            max_tokens: None,
            tools: Vec::new(),
        };

        let text = match self.model.complete(request).await {
            Ok(response) => match response.reply {
                ModelReply::Answer { text } => text,
                ModelReply::ToolRequests { .. } => {
                    self.fall_back(session, latest_input, "model returned tool requests");
                    return;
                }
            },
            Err(err) => {
                self.fall_back(session, latest_input, &err.to_string());
                return;
            }
        };

        match serde_json::from_str::<Briefing>(strip_code_fences(&text)) {
            Ok(briefing) => {
                session.briefing = Some(briefing);
                session.briefing_refined = true;
                session.briefing_unrefined_fallback = false;
            }
            Err(err) => self.fall_back(session, latest_input, &err.to_string()),
        }
    }
}

/// Cleans up the latest user message in place before the model sees it.
/// The raw text is kept in session state under `raw_user_message`.
pub struct MessageNormalizer {
    model: Arc<dyn ModelClient>,
    model_name: String,
}

impl MessageNormalizer {
    pub fn new(model: Arc<dyn ModelClient>, config: &EngineConfig) -> Self {
        Self {
            model,
            model_name: config.model.clone(),
        }
    }
}

#[async_trait]
impl SubAgent for MessageNormalizer {
    fn name(&self) -> &str {
        "message_normalizer"
    }

    async fn run(&self, session: &mut Session, latest_input: &str) {
        let request = ModelRequest {
            model: self.model_name.clone(),
            system: Some(NORMALIZER_SYSTEM_PROMPT.to_string()),
            messages: vec![Turn::user(latest_input)],
            temperature: 0.0,
            max_tokens: None,
            tools: Vec::new(),
        };

        let normalized = match self.model.complete(request).await {
            Ok(response) => match response.reply {
                ModelReply::Answer { text } if !text.trim().is_empty() => text,
                _ => {
                    warn!(agent = self.name(), "empty normalization, keeping raw message");
                    session.set_state("normalization_fallback", Value::Bool(true));
                    return;
                }
            },
            Err(err) => {
                warn!(agent = self.name(), error = %err, "normalization failed, keeping raw message");
                session.set_state("normalization_fallback", Value::Bool(true));
                return;
            }
        };

        session.set_state("raw_user_message", Value::String(latest_input.to_string()));
        if let Some(turn) = session
            .transcript
            .iter_mut()
            .rev()
            .find(|turn| turn.role == parley_core::Role::User)
        {
            turn.content = normalized;
        }
    }
}

/// Runs the configured sub-agents in declared order, tracing each one.
pub struct PrepStage {
    agents: Vec<Box<dyn SubAgent>>,
    trace: Arc<TraceBus>,
}

impl PrepStage {
    pub fn new(agents: Vec<Box<dyn SubAgent>>, trace: Arc<TraceBus>) -> Self {
        Self { agents, trace }
    }

    /// The standard pipeline: briefing refinement, then normalization.
    pub fn standard(model: Arc<dyn ModelClient>, config: &EngineConfig, trace: Arc<TraceBus>) -> Self {
        Self::new(
            vec![
                Box::new(BriefingRefiner::new(Arc::clone(&model), config)),
                Box::new(MessageNormalizer::new(model, config)),
            ],
            trace,
        )
    }

    /// Each sub-agent boundary is a cancellation point: a cancelled turn
    /// skips the remaining sub-agents instead of spending model calls.
    pub async fn run(&self, session: &mut Session, latest_input: &str, cancel: &CancellationToken) {
        for agent in &self.agents {
            if cancel.is_cancelled() {
                debug!(session = %session.key, agent = agent.name(), "turn cancelled, skipping sub-agent");
                return;
            }
            self.trace.publish(TraceEvent::new(
                TraceKind::StageEnter,
                &session.key,
                agent.name(),
                Value::Null,
            ));
            agent.run(session, latest_input).await;
            self.trace.publish(TraceEvent::new(
                TraceKind::StageExit,
                &session.key,
                agent.name(),
                Value::Null,
            ));
        }
    }
}

/// Trims an optional markdown code fence around a model reply.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{answer, ScriptedModel};
    use parley_core::SessionKey;

    fn session_with_user(text: &str) -> Session {
        let mut session = Session::new(SessionKey::from("prep-test"));
        session.push_turn(Turn::user(text));
        session
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn refiner_parses_structured_briefing() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(answer(
            r#"{"context":"planning a talk","expectations":["outline"],"prior_knowledge":"","questions":["how long?"]}"#,
        ))]));
        let config = EngineConfig::default();
        let refiner = BriefingRefiner::new(model, &config);

        let mut session = session_with_user("I'm planning a talk. I expect an outline.");
        refiner.run(&mut session, "I'm planning a talk. I expect an outline.").await;

        assert!(session.briefing_refined);
        assert!(!session.briefing_unrefined_fallback);
        let briefing = session.briefing.as_ref().unwrap();
        assert_eq!(briefing.context, "planning a talk");
        assert_eq!(briefing.expectations, vec!["outline".to_string()]);
    }

    #[tokio::test]
    async fn refiner_falls_back_on_model_error() {
        let model = Arc::new(ScriptedModel::new(vec![Err(
            parley_core::ModelError::Network("connection reset".into()),
        )]));
        let config = EngineConfig::default();
        let refiner = BriefingRefiner::new(model, &config);

        let mut session = session_with_user("raw input");
        refiner.run(&mut session, "raw input").await;

        assert!(!session.briefing_refined);
        assert!(session.briefing_unrefined_fallback);
        assert_eq!(session.briefing.as_ref().unwrap().context, "raw input");
    }

    #[tokio::test]
    async fn refiner_skips_once_refined() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let config = EngineConfig::default();
        let refiner = BriefingRefiner::new(Arc::clone(&model) as Arc<dyn ModelClient>, &config);

        let mut session = session_with_user("follow-up question");
        session.briefing_refined = true;
        refiner.run(&mut session, "follow-up question").await;

        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn refiner_retriggers_on_inline_fields() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(answer(
            r#"{"context":"new project","expectations":[],"prior_knowledge":"","questions":[]}"#,
        ))]));
        let config = EngineConfig::default();
        let refiner = BriefingRefiner::new(Arc::clone(&model) as Arc<dyn ModelClient>, &config);

        let input = "Context: new project\nExpectations: none yet";
        let mut session = session_with_user(input);
        session.briefing_refined = true;
        refiner.run(&mut session, input).await;

        assert_eq!(model.calls(), 1);
        assert_eq!(session.briefing.as_ref().unwrap().context, "new project");
    }

    #[tokio::test]
    async fn normalizer_rewrites_latest_user_turn() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(answer("Where is the report?"))]));
        let config = EngineConfig::default();
        let normalizer = MessageNormalizer::new(model, &config);

        let mut session = session_with_user("wher is teh report");
        normalizer.run(&mut session, "wher is teh report").await;

        assert_eq!(session.transcript.last().unwrap().content, "Where is the report?");
        assert_eq!(
            session.state_str("raw_user_message"),
            Some("wher is teh report")
        );
    }

    #[tokio::test]
    async fn normalizer_keeps_raw_message_on_failure() {
        let model = Arc::new(ScriptedModel::new(vec![Err(
            parley_core::ModelError::Timeout { timeout_secs: 60 },
        )]));
        let config = EngineConfig::default();
        let normalizer = MessageNormalizer::new(model, &config);

        let mut session = session_with_user("wher is teh report");
        normalizer.run(&mut session, "wher is teh report").await;

        assert_eq!(session.transcript.last().unwrap().content, "wher is teh report");
        assert_eq!(session.state_str("normalization_fallback"), None);
        assert_eq!(
            session.state.get("normalization_fallback"),
            Some(&Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn stage_runs_agents_in_order() {
        let model: Arc<dyn ModelClient> = Arc::new(ScriptedModel::new(vec![
            Ok(answer(
                r#"{"context":"c","expectations":[],"prior_knowledge":"","questions":[]}"#,
            )),
            Ok(answer("Hello there.")),
        ]));
        let config = EngineConfig::default();
        let trace = Arc::new(TraceBus::default());
        let mut events = trace.subscribe();
        let stage = PrepStage::standard(model, &config, Arc::clone(&trace));

        let mut session = session_with_user("hello ther");
        stage
            .run(&mut session, "hello ther", &CancellationToken::new())
            .await;

        assert!(session.briefing_refined);
        assert_eq!(session.transcript.last().unwrap().content, "Hello there.");

        let mut components = Vec::new();
        while let Ok(event) = events.try_recv() {
            components.push(event.component.clone());
        }
        assert_eq!(
            components,
            vec![
                "briefing_refiner",
                "briefing_refiner",
                "message_normalizer",
                "message_normalizer"
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_stage_runs_no_sub_agents() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let config = EngineConfig::default();
        let trace = Arc::new(TraceBus::default());
        let stage = PrepStage::standard(
            Arc::clone(&model) as Arc<dyn ModelClient>,
            &config,
            trace,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut session = session_with_user("wher is teh report");
        stage.run(&mut session, "wher is teh report", &cancel).await;

        assert_eq!(model.calls(), 0);
        assert!(!session.briefing_refined);
        assert_eq!(session.transcript.last().unwrap().content, "wher is teh report");
    }
}

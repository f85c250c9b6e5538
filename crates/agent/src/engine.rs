//! The engine entrypoint: one `handle_turn` call per user message.
//!
//! A turn holds the session's lock from start to finish, so turns for the
//! same key are strictly sequential while different keys proceed in
//! parallel. Within the turn: preparation sub-agents run first, then one
//! memory lookup, then the reasoning loop.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use parley_core::{
    format_fact_context, EngineConfig, Error, LogTracer, MemoryFact, MemoryRetriever, MemoryScope,
    ModelClient, Session, SessionKey, ToolCatalog, ToolTransport, TraceBus, TraceEvent, TraceKind,
    Turn,
};
use parley_session::SessionStore;

use crate::loop_runner::ReasoningLoop;
use crate::outcome::LoopOutcome;
use crate::prep::PrepStage;

const SYSTEM_PROMPT_BASE: &str = "You are a conscientious assistant. Ground your answers in \
the user's briefing and the known facts below, and say so when you do not know something. Use \
the available tools when they help. Long-running operations return a handle; check their \
status before reporting them as finished.";

pub struct Engine {
    store: Arc<SessionStore>,
    memory: Arc<dyn MemoryRetriever>,
    scope: MemoryScope,
    transport: Arc<dyn ToolTransport>,
    config: EngineConfig,
    trace: Arc<TraceBus>,
    prep: PrepStage,
    runner: ReasoningLoop,
}

impl Engine {
    pub fn new(
        model: Arc<dyn ModelClient>,
        transport: Arc<dyn ToolTransport>,
        memory: Arc<dyn MemoryRetriever>,
        scope: MemoryScope,
        config: EngineConfig,
    ) -> Self {
        let trace = Arc::new(TraceBus::default());
        let prep = PrepStage::standard(Arc::clone(&model), &config, Arc::clone(&trace));
        let runner = ReasoningLoop::new(
            model,
            Arc::clone(&transport),
            config.clone(),
            Arc::clone(&trace),
        );
        Self {
            store: Arc::new(SessionStore::new()),
            memory,
            scope,
            transport,
            config,
            trace,
            prep,
            runner,
        }
    }

    /// Swap in a custom preparation pipeline.
    pub fn with_prep(mut self, prep: PrepStage) -> Self {
        self.prep = prep;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn trace_bus(&self) -> &Arc<TraceBus> {
        &self.trace
    }

    /// Forward lifecycle events to the `tracing` log stream.
    pub fn spawn_log_tracer(&self) -> tokio::task::JoinHandle<()> {
        LogTracer::spawn(&self.trace)
    }

    /// Run one full turn for the given session.
    pub async fn handle_turn(&self, key: &SessionKey, user_message: &str) -> LoopOutcome {
        self.handle_turn_cancellable(key, user_message, CancellationToken::new())
            .await
    }

    /// Like [`handle_turn`](Self::handle_turn), but the caller keeps a
    /// cancellation token. Cancellation takes effect at the next suspension
    /// point; the interrupted step's results are discarded.
    pub async fn handle_turn_cancellable(
        &self,
        key: &SessionKey,
        user_message: &str,
        cancel: CancellationToken,
    ) -> LoopOutcome {
        let mut session = self.store.lock_owned(key).await;
        session.turn_counter += 1;
        session.push_turn(Turn::user(user_message));

        if cancel.is_cancelled() {
            return LoopOutcome::Cancelled;
        }
        self.prep.run(&mut session, user_message, &cancel).await;
        if cancel.is_cancelled() {
            return LoopOutcome::Cancelled;
        }

        let facts = self.recall(key).await;
        if cancel.is_cancelled() {
            return LoopOutcome::Cancelled;
        }

        let catalog = match self.load_catalog().await {
            Ok(catalog) => catalog,
            Err(error) => {
                self.trace.publish(TraceEvent::new(
                    TraceKind::Error,
                    key,
                    "engine",
                    json!({ "error": error.to_string() }),
                ));
                return LoopOutcome::Fatal { error };
            }
        };

        let system_prompt = self.system_prompt(&session, &facts);
        self.runner
            .run(&mut session, &system_prompt, &catalog, &cancel)
            .await
    }

    /// One memory lookup per turn. A failing backend degrades to no recalled
    /// facts; the turn proceeds.
    async fn recall(&self, key: &SessionKey) -> Vec<MemoryFact> {
        match self
            .memory
            .lookup(&self.scope, self.config.recall_limit)
            .await
        {
            Ok(facts) => facts,
            Err(err) => {
                warn!(session = %key, error = %err, "memory lookup failed, continuing without facts");
                self.trace.publish(TraceEvent::new(
                    TraceKind::Error,
                    key,
                    "engine",
                    json!({ "error": err.to_string(), "degraded": true }),
                ));
                Vec::new()
            }
        }
    }

    /// The handshake catalog, retried once over a fresh connection.
    async fn load_catalog(&self) -> Result<ToolCatalog, Error> {
        let first = match self.transport.catalog().await {
            Ok(catalog) => return Ok(catalog),
            Err(err) => err,
        };
        warn!(error = %first, "catalog unavailable, reconnecting");
        self.transport
            .reconnect()
            .await
            .map_err(Error::Transport)?;
        self.transport.catalog().await.map_err(Error::Transport)
    }

    fn system_prompt(&self, session: &Session, facts: &[MemoryFact]) -> String {
        let mut prompt = SYSTEM_PROMPT_BASE.to_string();
        if let Some(briefing) = &session.briefing {
            let block = briefing.prompt_block();
            if !block.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(&block);
            }
        }
        let fact_block = format_fact_context(facts);
        if !fact_block.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&fact_block);
        }
        prompt
    }
}

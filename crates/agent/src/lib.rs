//! The orchestration engine: preparation sub-agents, the bounded reasoning
//! loop, and the per-session turn entrypoint.
//!
//! A host constructs an [`Engine`] from a model client, a tool transport,
//! and a memory retriever, then feeds it user messages one
//! [`Engine::handle_turn`] at a time.

pub mod engine;
pub mod loop_runner;
pub mod outcome;
pub mod prep;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use engine::Engine;
pub use loop_runner::ReasoningLoop;
pub use outcome::LoopOutcome;
pub use prep::{BriefingRefiner, MessageNormalizer, PrepStage, RetriggerPredicate, SubAgent};

/// Install a process-wide `tracing` subscriber. `RUST_LOG` wins over the
/// given default filter. Call once from the host's entrypoint.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

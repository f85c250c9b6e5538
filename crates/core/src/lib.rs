//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley
//! agent-orchestration engine. This crate has **zero framework
//! dependencies** — it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod briefing;
pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod tool;
pub mod trace;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use briefing::Briefing;
pub use config::{EngineConfig, TransportConfig};
pub use error::{Error, MemoryError, ModelError, Result, SchemaError, TransportError};
pub use memory::{format_fact_context, MemoryFact, MemoryRetriever, MemoryScope};
pub use model::{ModelClient, ModelReply, ModelRequest, ModelResponse, ToolRequest, Usage};
pub use tool::{ToolCall, ToolCatalog, ToolDescriptor, ToolOutcome, ToolTransport};
pub use trace::{LogTracer, TraceBus, TraceEvent, TraceKind};
pub use turn::{Role, Session, SessionKey, Turn, TurnToolCall};

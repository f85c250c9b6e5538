//! Memory Retriever backends for Parley.
//!
//! The engine reads high-confidence, scoped facts from a long-term store
//! once per user turn. Backends implement `parley_core::MemoryRetriever`;
//! the HTTP backend talks to an external fact-store service, the in-memory
//! backend serves tests and ephemeral deployments.

pub mod http;
pub mod in_memory;

pub use http::HttpFactStore;
pub use in_memory::InMemoryFacts;

//! Error types for the Parley engine.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Two terminal conditions
//! are deliberately *not* errors: budget exhaustion and cancellation are
//! `LoopOutcome` variants, because they are defined outcomes of a turn.

use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Tool call schema errors ---
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the external completion capability.
///
/// Retried with backoff up to the configured count, then fatal for the turn.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Malformed model response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Channel-level failures of the tool transport.
///
/// Distinct from tool-level failures (`ToolOutcome::Error`), which the tool
/// process reports inside a well-formed response. A `TransportError` is
/// retried once by the caller with a fresh handshake; a second consecutive
/// failure is fatal for the current loop iteration.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to spawn tool process: {0}")]
    Spawn(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Tool channel closed: {0}")]
    ChannelClosed(String),

    #[error("Malformed transport frame: {0}")]
    Malformed(String),

    #[error("Tool call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Correlation id mismatch: expected {expected}, got {got}")]
    CorrelationMismatch { expected: u64, got: u64 },
}

/// A malformed or unknown tool call. Caller error, never retried.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required argument '{argument}' for tool '{tool}'")]
    MissingArgument { tool: String, argument: String },

    #[error("Arguments for tool '{tool}' must be an object")]
    NotAnObject { tool: String },
}

/// Failures of the long-term fact store. Never fatal to a turn: the engine
/// degrades a lookup failure to an empty result with a logged warning.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Fact store not configured: {0}")]
    NotConfigured(String),
}

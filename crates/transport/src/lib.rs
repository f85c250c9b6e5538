//! Tool Transport — a persistent subprocess channel for remote operations.
//!
//! On first use the transport spawns the configured tool process, performs a
//! capability handshake that yields the registry of available tools, and
//! keeps the channel alive for the life of the engine. Calls are validated
//! against the handshake-declared catalog before dispatch and execute
//! strictly one at a time on the channel, so responses can never be
//! reordered relative to requests.
//!
//! Channel-level failures (`TransportError`) are distinct from tool-level
//! failures (`ToolOutcome::Error`); the caller retries transport failures at
//! most once after `reconnect()`.

pub mod codec;
pub mod wire;

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::TransportConfig;
use parley_core::error::{Error, Result, TransportError};
use parley_core::tool::{ToolCall, ToolCatalog, ToolOutcome, ToolTransport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::wire::Wire;

pub use crate::wire::Wire as ToolWire;

struct Channel {
    child: Child,
    wire: Wire<ChildStdout, ChildStdin>,
    catalog: ToolCatalog,
}

/// `ToolTransport` over a long-lived subprocess with piped stdio.
///
/// The single state mutex serves three guarantees at once: only one
/// handshake may be in flight (concurrent invokers wait for it), at most one
/// request is outstanding per correlation id, and responses arrive in
/// request order.
pub struct SubprocessTransport {
    config: TransportConfig,
    state: Mutex<Option<Channel>>,
}

impl SubprocessTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
        }
    }

    async fn connect(&self) -> std::result::Result<Channel, TransportError> {
        if self.config.command.is_empty() {
            return Err(TransportError::Spawn(
                "no tool transport command configured".into(),
            ));
        }

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", self.config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("tool process has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("tool process has no stdout".into()))?;

        // Drain stderr so the child can never block on a full pipe; its
        // output is diagnostics, not protocol.
        if let Some(stderr) = child.stderr.take() {
            let command = self.config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(tool_process = %command, "{line}");
                }
            });
        }

        let mut wire = Wire::new(stdout, stdin);
        let catalog = wire
            .handshake(Duration::from_secs(self.config.handshake_timeout_secs))
            .await?;

        info!(
            command = %self.config.command,
            tools = catalog.len(),
            "tool transport connected"
        );

        Ok(Channel {
            child,
            wire,
            catalog,
        })
    }

    async fn ensure_connected<'a>(
        &self,
        state: &'a mut Option<Channel>,
    ) -> std::result::Result<&'a mut Channel, TransportError> {
        if state.is_none() {
            *state = Some(self.connect().await?);
        }
        Ok(state.as_mut().expect("channel just established"))
    }
}

#[async_trait]
impl ToolTransport for SubprocessTransport {
    async fn catalog(&self) -> std::result::Result<ToolCatalog, TransportError> {
        let mut state = self.state.lock().await;
        let channel = self.ensure_connected(&mut state).await?;
        Ok(channel.catalog.clone())
    }

    async fn invoke(&self, call: &ToolCall, timeout: Duration) -> Result<ToolOutcome> {
        let mut state = self.state.lock().await;
        let channel = self.ensure_connected(&mut state).await?;

        channel.catalog.validate(call)?;

        debug!(tool = %call.name, "dispatching tool call");
        match channel.wire.call(call, timeout).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // The channel is suspect after any transport failure; drop it
                // so the caller's reconnect starts from a clean slate.
                if let Some(mut dead) = state.take() {
                    let _ = dead.child.start_kill();
                }
                Err(Error::Transport(e))
            }
        }
    }

    async fn reconnect(&self) -> std::result::Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if let Some(mut dead) = state.take() {
            let _ = dead.child.start_kill();
        }
        *state = Some(self.connect().await?);
        Ok(())
    }
}

//! The framed request/response channel, independent of what carries it.
//!
//! `Wire` owns one reader/writer pair and the correlation-id counter. It is
//! generic over the byte streams so the subprocess transport and in-process
//! tests (via `tokio::io::duplex`) share the exact same protocol code.
//!
//! Protocol: request `{tool_name, arguments, correlation_id}`; response
//! `{correlation_id, status: ok|pending|error, payload|handle|error_detail}`.
//! Messages without a correlation id are unsolicited notifications and are
//! skipped. A response whose correlation id does not match the outstanding
//! request is a protocol violation.

use std::time::Duration;

use parley_core::error::TransportError;
use parley_core::tool::{ToolCall, ToolCatalog, ToolDescriptor, ToolOutcome, HANDSHAKE_OP};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::codec::{read_frame, write_frame};

#[derive(Debug, Deserialize)]
struct WireResponse {
    correlation_id: u64,
    #[serde(flatten)]
    outcome: ToolOutcome,
}

#[derive(Debug, Deserialize)]
struct HandshakePayload {
    tools: Vec<ToolDescriptor>,
}

/// One persistent request/response channel.
pub struct Wire<R, W> {
    reader: BufReader<R>,
    writer: W,
    next_correlation: u64,
}

impl<R, W> Wire<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            next_correlation: 1,
        }
    }

    /// Perform the capability handshake, yielding the tool catalog.
    pub async fn handshake(&mut self, timeout: Duration) -> Result<ToolCatalog, TransportError> {
        let outcome = self
            .call(
                &ToolCall::new(HANDSHAKE_OP, serde_json::json!({})),
                timeout,
            )
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let payload = match outcome {
            ToolOutcome::Ok { payload } => payload,
            ToolOutcome::Pending { .. } => {
                return Err(TransportError::Handshake(
                    "handshake reported pending".into(),
                ));
            }
            ToolOutcome::Error { detail } => return Err(TransportError::Handshake(detail)),
        };

        let parsed: HandshakePayload = serde_json::from_value(payload)
            .map_err(|e| TransportError::Handshake(format!("bad capability payload: {e}")))?;
        debug!(tools = parsed.tools.len(), "handshake complete");
        Ok(ToolCatalog::new(parsed.tools))
    }

    /// Send one request and wait for its matching response.
    ///
    /// The exclusive borrow of `self` is what enforces at-most-one in-flight
    /// request per correlation id and keeps responses in request order.
    pub async fn call(
        &mut self,
        call: &ToolCall,
        timeout: Duration,
    ) -> Result<ToolOutcome, TransportError> {
        let correlation_id = self.next_correlation;
        self.next_correlation += 1;

        let request = serde_json::json!({
            "tool_name": call.name,
            "arguments": call.arguments,
            "correlation_id": correlation_id,
        });
        write_frame(&mut self.writer, &request).await?;

        tokio::time::timeout(timeout, self.read_response(correlation_id))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    async fn read_response(&mut self, correlation_id: u64) -> Result<ToolOutcome, TransportError> {
        loop {
            let frame = read_frame(&mut self.reader).await?.ok_or_else(|| {
                TransportError::ChannelClosed("tool process closed the channel".into())
            })?;

            // Unsolicited notification: no correlation id.
            if frame.get("correlation_id").is_none() {
                warn!(frame = %frame, "skipping unsolicited notification");
                continue;
            }

            let response: WireResponse = serde_json::from_value(frame)
                .map_err(|e| TransportError::Malformed(format!("bad response: {e}")))?;

            if response.correlation_id != correlation_id {
                return Err(TransportError::CorrelationMismatch {
                    expected: correlation_id,
                    got: response.correlation_id,
                });
            }
            return Ok(response.outcome);
        }
    }
}

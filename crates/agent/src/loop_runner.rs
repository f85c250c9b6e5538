//! The bounded reasoning loop.
//!
//! Each turn alternates between calling the model and dispatching the tool
//! calls it requested, folding every result back into the transcript, until
//! the model produces a final answer or the iteration budget runs out. The
//! iteration counter bumps on every model call; tool dispatch rounds are
//! free. Outstanding long-running operations are tracked by handle and
//! polled via the configured status tool before any new substantive call,
//! and a final answer is deferred while any handle is still outstanding.
//!
//! Invariant: every tool call declared on an assistant turn is resolved by
//! exactly one tool-result turn before the loop returns. A failed round
//! resolves its calls with error results; a cancelled round is rewound to
//! the transcript length it started from. Either way the transcript stays
//! replayable on the next user turn.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::{
    EngineConfig, Error, ModelClient, ModelError, ModelReply, ModelRequest, ModelResponse,
    Session, SessionKey, ToolCall, ToolCatalog, ToolOutcome, ToolRequest, TraceBus, TraceEvent,
    TraceKind, Turn, TurnToolCall,
};

use crate::outcome::LoopOutcome;

enum Step {
    ModelCall,
    Dispatch {
        reasoning: String,
        requests: Vec<ToolRequest>,
        mark: usize,
    },
}

pub struct ReasoningLoop {
    model: Arc<dyn ModelClient>,
    transport: Arc<dyn parley_core::ToolTransport>,
    config: EngineConfig,
    trace: Arc<TraceBus>,
}

impl ReasoningLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        transport: Arc<dyn parley_core::ToolTransport>,
        config: EngineConfig,
        trace: Arc<TraceBus>,
    ) -> Self {
        Self {
            model,
            transport,
            config,
            trace,
        }
    }

    /// Run the loop to completion for the current turn. The session already
    /// holds the user's message as its latest turn.
    ///
    /// Cancellation is observed at suspension points; a cancelled step's
    /// results are discarded, so the transcript never holds a half-applied
    /// step.
    pub async fn run(
        &self,
        session: &mut Session,
        system_prompt: &str,
        catalog: &ToolCatalog,
        cancel: &CancellationToken,
    ) -> LoopOutcome {
        let mut iterations: u32 = 0;
        let mut pending: Vec<String> = Vec::new();
        let mut poll_seq: u64 = 0;
        let mut step = Step::ModelCall;

        loop {
            if cancel.is_cancelled() {
                return LoopOutcome::Cancelled;
            }

            match step {
                Step::ModelCall => {
                    if iterations >= self.config.max_iterations {
                        warn!(
                            session = %session.key,
                            iterations,
                            "iteration budget exhausted without a final answer"
                        );
                        return LoopOutcome::BudgetExceeded { iterations };
                    }
                    iterations += 1;

                    self.trace.publish(TraceEvent::new(
                        TraceKind::ModelCallStart,
                        &session.key,
                        "reasoning_loop",
                        json!({ "iteration": iterations }),
                    ));

                    let request = self.build_request(session, system_prompt, catalog);
                    let response = match self.call_model(request).await {
                        Ok(response) => response,
                        Err(err) => {
                            self.trace.publish(TraceEvent::new(
                                TraceKind::Error,
                                &session.key,
                                "reasoning_loop",
                                json!({ "error": err.to_string() }),
                            ));
                            return LoopOutcome::Fatal {
                                error: Error::Model(err),
                            };
                        }
                    };
                    if cancel.is_cancelled() {
                        return LoopOutcome::Cancelled;
                    }

                    self.trace.publish(TraceEvent::new(
                        TraceKind::ModelCallEnd,
                        &session.key,
                        "reasoning_loop",
                        json!({ "iteration": iterations, "model": response.model }),
                    ));

                    match response.reply {
                        ModelReply::Answer { text } => {
                            if pending.is_empty() {
                                session.push_turn(Turn::assistant(&text));
                                return LoopOutcome::Done {
                                    message: text,
                                    iterations,
                                };
                            }
                            // Handles are still outstanding: the answer is
                            // premature. Poll, then let the model reconsider
                            // with the fresh status in the transcript.
                            debug!(
                                session = %session.key,
                                outstanding = pending.len(),
                                "final answer deferred, polling outstanding handles"
                            );
                            let mark = session.transcript.len();
                            if let Err(outcome) = self
                                .poll_pending(session, &mut pending, &mut poll_seq, cancel)
                                .await
                            {
                                if matches!(outcome, LoopOutcome::Cancelled) {
                                    session.transcript.truncate(mark);
                                }
                                return outcome;
                            }
                            step = Step::ModelCall;
                        }
                        ModelReply::ToolRequests {
                            reasoning,
                            requests,
                        } => {
                            // The assistant turn is recorded in the Dispatch
                            // arm, after the poll round, so each tool-call
                            // turn sits directly above its results.
                            step = Step::Dispatch {
                                reasoning,
                                requests,
                                mark: session.transcript.len(),
                            };
                        }
                    }
                }

                Step::Dispatch {
                    reasoning,
                    requests,
                    mark,
                } => {
                    // Status checks for outstanding handles go out before any
                    // new substantive call.
                    if let Err(outcome) = self
                        .poll_pending(session, &mut pending, &mut poll_seq, cancel)
                        .await
                    {
                        if matches!(outcome, LoopOutcome::Cancelled) {
                            session.transcript.truncate(mark);
                        }
                        return outcome;
                    }

                    let calls = requests
                        .iter()
                        .map(|r| TurnToolCall {
                            id: r.call_id.clone(),
                            name: r.name.clone(),
                            arguments: r.arguments.clone(),
                        })
                        .collect();
                    session.push_turn(Turn::assistant_with_calls(&reasoning, calls));

                    if let Err(outcome) = self
                        .dispatch_round(session, &requests, &mut pending, cancel)
                        .await
                    {
                        if matches!(outcome, LoopOutcome::Cancelled) {
                            session.transcript.truncate(mark);
                        }
                        return outcome;
                    }
                    step = Step::ModelCall;
                }
            }
        }
    }

    fn build_request(
        &self,
        session: &Session,
        system_prompt: &str,
        catalog: &ToolCatalog,
    ) -> ModelRequest {
        ModelRequest {
            model: self.config.model.clone(),
            system: Some(system_prompt.to_string()),
            messages: session.transcript.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            tools: catalog.descriptors(),
        }
    }

    /// One model completion, with timeout and linear-backoff retries.
    async fn call_model(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(
                self.config.model_timeout(),
                self.model.complete(request.clone()),
            )
            .await;

            let err = match result {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => err,
                Err(_) => ModelError::Timeout {
                    timeout_secs: self.config.model_timeout_secs,
                },
            };
            if attempt > self.config.model_retries {
                return Err(err);
            }
            warn!(attempt, error = %err, "model call failed, retrying");
            tokio::time::sleep(self.config.model_backoff() * attempt).await;
        }
    }

    /// Dispatch a round of requests concurrently and fold the results into
    /// the transcript in request order. A request that failed even after the
    /// reconnect retry still folds in, as an error result, so its call id is
    /// resolved before the round reports Fatal.
    async fn dispatch_round(
        &self,
        session: &mut Session,
        requests: &[ToolRequest],
        pending: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), LoopOutcome> {
        if requests.is_empty() {
            return Ok(());
        }

        let results = join_all(
            requests
                .iter()
                .map(|request| self.invoke_with_retry(&session.key, request)),
        )
        .await;
        if cancel.is_cancelled() {
            return Err(LoopOutcome::Cancelled);
        }

        let mut first_error = None;
        for (request, result) in requests.iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.trace.publish(TraceEvent::new(
                        TraceKind::Error,
                        &session.key,
                        "reasoning_loop",
                        json!({ "tool": request.name, "error": error.to_string() }),
                    ));
                    session.push_turn(Turn::tool_result(
                        &request.call_id,
                        format!("Error: {error}"),
                    ));
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    continue;
                }
            };

            self.trace.publish(TraceEvent::new(
                TraceKind::ToolCallEnd,
                &session.key,
                "reasoning_loop",
                json!({ "tool": request.name, "call_id": request.call_id }),
            ));

            match &outcome {
                ToolOutcome::Pending { handle } => {
                    if !pending.contains(handle) {
                        pending.push(handle.clone());
                    }
                }
                _ if request.name == self.config.status_tool => {
                    // A status check came back terminal, whether the model
                    // issued it or the loop did.
                    if let Some(handle) = request.arguments.get("handle").and_then(|h| h.as_str())
                    {
                        pending.retain(|h| h != handle);
                    }
                }
                _ => {}
            }

            session.push_turn(Turn::tool_result(&request.call_id, outcome.render()));
        }
        match first_error {
            Some(error) => Err(LoopOutcome::Fatal { error }),
            None => Ok(()),
        }
    }

    /// Poll every outstanding handle via the status tool, clearing the ones
    /// that reached a terminal state. The polls are recorded as their own
    /// assistant tool-call turn so the transcript declares them like any
    /// other round.
    async fn poll_pending(
        &self,
        session: &mut Session,
        pending: &mut Vec<String>,
        poll_seq: &mut u64,
        cancel: &CancellationToken,
    ) -> Result<(), LoopOutcome> {
        if pending.is_empty() {
            return Ok(());
        }

        *poll_seq += 1;
        let seq = *poll_seq;
        let polls: Vec<ToolRequest> = pending
            .iter()
            .map(|handle| ToolRequest {
                call_id: format!("status{seq}_{handle}"),
                name: self.config.status_tool.clone(),
                arguments: json!({ "handle": handle }),
            })
            .collect();

        let calls = polls
            .iter()
            .map(|poll| TurnToolCall {
                id: poll.call_id.clone(),
                name: poll.name.clone(),
                arguments: poll.arguments.clone(),
            })
            .collect();
        session.push_turn(Turn::assistant_with_calls("", calls));

        self.dispatch_round(session, &polls, pending, cancel).await
    }

    /// One tool invocation. A transport failure is retried once after a
    /// reconnect; a second failure is fatal. Schema rejections are never
    /// retried and fold in as error results.
    async fn invoke_with_retry(
        &self,
        key: &SessionKey,
        request: &ToolRequest,
    ) -> Result<ToolOutcome, Error> {
        let call = ToolCall::new(&request.name, request.arguments.clone());

        self.trace.publish(TraceEvent::new(
            TraceKind::ToolCallStart,
            key,
            "reasoning_loop",
            json!({ "tool": request.name, "call_id": request.call_id }),
        ));

        let first = match self
            .transport
            .invoke(&call, self.config.tool_timeout())
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(Error::Schema(err)) => {
                return Ok(ToolOutcome::Error {
                    detail: err.to_string(),
                })
            }
            Err(err) => err,
        };

        warn!(tool = %request.name, error = %first, "tool call failed, reconnecting");
        self.trace.publish(TraceEvent::new(
            TraceKind::Error,
            key,
            "reasoning_loop",
            json!({ "tool": request.name, "error": first.to_string(), "retrying": true }),
        ));

        if let Err(err) = self.transport.reconnect().await {
            return Err(Error::Transport(err));
        }

        match self
            .transport
            .invoke(&call, self.config.tool_timeout())
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(Error::Schema(err)) => Ok(ToolOutcome::Error {
                detail: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }
}

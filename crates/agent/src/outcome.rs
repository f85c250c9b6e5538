use parley_core::Error;

/// Terminal result of one reasoning turn.
#[derive(Debug)]
pub enum LoopOutcome {
    /// The model produced a final answer for the user.
    Done { message: String, iterations: u32 },
    /// The iteration budget ran out before a final answer.
    BudgetExceeded { iterations: u32 },
    /// The turn was cancelled at a suspension point.
    Cancelled,
    /// An unrecoverable error ended the turn early.
    Fatal { error: Error },
}

impl LoopOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, LoopOutcome::Done { .. })
    }

    /// The final answer text, when the turn completed normally.
    pub fn message(&self) -> Option<&str> {
        match self {
            LoopOutcome::Done { message, .. } => Some(message),
            _ => None,
        }
    }
}

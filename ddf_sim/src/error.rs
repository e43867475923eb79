//! Error types for the simulation harness.

use ddf_core::{AgentId, FusionError};
use thiserror::Error;

/// Errors that abort a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// Building the world failed (bad model, bad topology)
    #[error("Setup failed: {0}")]
    Setup(#[from] FusionError),

    /// A fusion round failed; the run halts at this step
    #[error("Round at step {step} failed: {source}")]
    Round {
        step: u64,
        #[source]
        source: FusionError,
    },

    /// A link between two agent tasks was closed mid-round
    #[error("Link {from} -> {to} closed")]
    LinkClosed { from: AgentId, to: AgentId },

    /// An agent task panicked or was cancelled
    #[error("Agent task failed: {0}")]
    TaskError(String),

    /// Export file could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export could not be serialized
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SimError {
    /// Wraps a fusion error raised at `step`.
    pub fn round(step: u64, source: FusionError) -> Self {
        Self::Round { step, source }
    }

    /// Creates a task error.
    pub fn task(msg: impl Into<String>) -> Self {
        Self::TaskError(msg.into())
    }

    /// Step at which the run failed, if the failure was inside a round.
    pub fn step(&self) -> Option<u64> {
        match self {
            SimError::Round { step, .. } => Some(*step),
            _ => None,
        }
    }
}

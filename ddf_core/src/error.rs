//! Error types for the fusion engine.

use crate::ids::{AgentId, TargetId};
use thiserror::Error;

/// Errors that can occur while filtering or fusing information.
///
/// None of these are recoverable inside the engine: they indicate a model
/// misconfiguration, a broken measurement feed, or a protocol violation, and
/// are propagated to the orchestrating loop which halts the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// A matrix that must be inverted is singular or ill-conditioned.
    #[error("Singular matrix: {context}")]
    SingularMatrix { context: String },

    /// Matrix or vector has the wrong shape.
    #[error("Dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// No measurement exists for the requested step.
    #[error("Missing measurement for {agent} observing {target} at step {step}")]
    MissingMeasurement {
        agent: AgentId,
        target: TargetId,
        step: u64,
    },

    /// A fusion operation referenced a neighbor with no channel filter.
    #[error("{agent} has no channel filter to {neighbor} for {target}")]
    UnknownNeighbor {
        agent: AgentId,
        neighbor: AgentId,
        target: TargetId,
    },

    /// An agent id is not registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// A target is not tracked by this agent or not known to the provider.
    #[error("{agent} does not track {target}")]
    UnknownTarget { agent: AgentId, target: TargetId },

    /// An agent tried to open a channel to itself.
    #[error("{0} cannot open a channel filter to itself")]
    SelfPairing(AgentId),

    /// A link would close a loop in the communication graph.
    ///
    /// Channel filters only remove common information shared over a single
    /// path; on a cycle information returns by another route and is counted
    /// again.
    #[error("Link {a} <-> {b} would close a cycle in the communication graph")]
    CyclicTopology { a: AgentId, b: AgentId },

    /// A channel filter for the pair and target already exists.
    #[error("{agent} already has a channel filter to {neighbor} for {target}")]
    DuplicateChannel {
        agent: AgentId,
        neighbor: AgentId,
        target: TargetId,
    },

    /// A measurement or state does not advance from the prior step.
    #[error("Step mismatch: prior at step {prior}, update at step {update}")]
    StepMismatch { prior: u64, update: u64 },

    /// A novel-information message belongs to a different round.
    #[error(
        "Stale novel information from {from} for {target}: expected step {expected}, got {actual}"
    )]
    StaleNovelInformation {
        from: AgentId,
        target: TargetId,
        expected: u64,
        actual: u64,
    },

    /// A neighbor sent nothing for a channel during this round.
    #[error("{agent} received no novel information from {neighbor} for {target} at step {step}")]
    MissingNovelInformation {
        agent: AgentId,
        neighbor: AgentId,
        target: TargetId,
        step: u64,
    },

    /// A channel filter operation was called out of send/receive order.
    #[error("Channel {owner} -> {peer} for {target} is out of phase: {detail}")]
    ChannelOutOfPhase {
        owner: AgentId,
        peer: AgentId,
        target: TargetId,
        detail: &'static str,
    },

    /// A node operation was called in the wrong round phase.
    #[error("{agent} cannot {operation} while {phase}")]
    PhaseViolation {
        agent: AgentId,
        operation: &'static str,
        phase: &'static str,
    },
}

impl FusionError {
    /// Creates a singular matrix error.
    pub fn singular(context: impl Into<String>) -> Self {
        Self::SingularMatrix {
            context: context.into(),
        }
    }

    /// Creates a dimension mismatch error.
    pub fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

//! The channel filter: common-information bookkeeping between two agents.
//!
//! When two information filters exchange posteriors repeatedly, whatever one
//! of them received from the other last round is still inside its posterior.
//! Adding the posteriors again would count that information twice and make
//! both estimates overconfident. The channel filter tracks the information
//! the two endpoints already share and lets each side send only the part
//! that is new to its peer.
//!
//! Each round, on one channel:
//!
//! ```text
//!   owner i                                        peer j
//!   ───────                                        ──────
//!   local posterior yᵢ                             local posterior yⱼ
//!   common⁻ = predict(common)                      common⁻ = predict(common)
//!   novelᵢ  = yᵢ − common⁻   ───── send ─────►     fused  += novelᵢ
//!   fused  += novelⱼ         ◄──── send ──────     novelⱼ = yⱼ − common⁻
//!   common  = yᵢ + novelⱼ                          common  = yⱼ + novelᵢ
//! ```
//!
//! Both ends compute the same `common` (= common⁻ + novelᵢ + novelⱼ), so the
//! two copies of the channel filter stay in lock-step without ever sharing
//! memory. On tree-shaped communication graphs every measurement is counted
//! exactly once at every agent.

use crate::error::FusionError;
use crate::ids::{AgentId, TargetId};
use crate::information::InformationState;
use crate::information_filter;
use crate::model::LinearGaussianModel;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// The information one agent sends to one neighbor for one target.
///
/// A value snapshot: the receiver never holds a reference to the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelInformation {
    /// Sending agent
    pub from: AgentId,

    /// Receiving agent
    pub to: AgentId,

    /// Target the information is about
    pub target: TargetId,

    /// Round (step) in which it was produced
    pub step: u64,

    /// Novel information vector
    pub vector: DVector<f64>,

    /// Novel information matrix
    pub matrix: DMatrix<f64>,
}

/// State held between `update_and_send` and `receive_and_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingExchange {
    /// Owner's local posterior at send time (before any fusion this round)
    local: InformationState,

    /// Common information predicted to the local posterior's step
    common_predicted: InformationState,

    /// What was sent to the peer
    novel: NovelInformation,
}

/// One side of the channel between `owner` and `peer` for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFilter {
    owner: AgentId,
    peer: AgentId,
    target: TargetId,

    /// Information common to both endpoints as of the last exchange
    common: InformationState,

    /// Outstanding exchange of the current round
    pending: Option<PendingExchange>,

    /// Number of completed exchanges
    exchanges: u64,
}

impl ChannelFilter {
    /// Opens a channel with zero common information at step 0.
    ///
    /// # Errors
    /// `SelfPairing` when `owner == peer`.
    pub fn new(
        owner: AgentId,
        peer: AgentId,
        target: TargetId,
        dim: usize,
    ) -> Result<Self, FusionError> {
        if owner == peer {
            return Err(FusionError::SelfPairing(owner));
        }

        Ok(Self {
            owner,
            peer,
            target,
            common: InformationState::zeros(0, dim),
            pending: None,
            exchanges: 0,
        })
    }

    /// Computes the information that is safe to send to the peer.
    ///
    /// The common estimate is predicted forward to `local.step` with the same
    /// recursion as the local filter (once per elapsed step), and
    /// novel = local − common⁻. On the first exchange common⁻ is zero and the
    /// full local posterior is sent.
    ///
    /// # Errors
    /// `ChannelOutOfPhase` if the previous exchange was never completed,
    /// `StepMismatch` if `local` is not newer than the last exchange.
    pub fn update_and_send(
        &mut self,
        model: &LinearGaussianModel,
        local: &InformationState,
    ) -> Result<NovelInformation, FusionError> {
        if self.pending.is_some() {
            return Err(self.out_of_phase("sent twice without receiving"));
        }
        if local.step <= self.common.step {
            return Err(FusionError::StepMismatch {
                prior: self.common.step,
                update: local.step,
            });
        }

        let elapsed = local.step - self.common.step;
        let (vector_pred, matrix_pred) = information_filter::predict_steps(
            model,
            &self.common.vector,
            &self.common.matrix,
            elapsed,
        )?;
        let common_predicted = InformationState::new(local.step, vector_pred, matrix_pred)?;
        let difference = local.difference(&common_predicted)?;

        let novel = NovelInformation {
            from: self.owner,
            to: self.peer,
            target: self.target,
            step: local.step,
            vector: difference.vector,
            matrix: difference.matrix,
        };

        self.pending = Some(PendingExchange {
            local: local.clone(),
            common_predicted,
            novel: novel.clone(),
        });

        Ok(novel)
    }

    /// Fuses the peer's novel term into `posterior` and advances the common
    /// estimate to what both endpoints now share.
    ///
    /// `posterior` is the owner's provisional posterior for this round; other
    /// neighbors' contributions may already have been added to it. The new
    /// common estimate is built from the local posterior captured at send
    /// time, so fusion order across neighbors does not matter.
    ///
    /// # Errors
    /// `UnknownNeighbor` / `UnknownTarget` for a misaddressed message,
    /// `ChannelOutOfPhase` before `update_and_send`, and
    /// `StaleNovelInformation` when the message is from another round.
    pub fn receive_and_update(
        &mut self,
        message: &NovelInformation,
        posterior: &mut InformationState,
    ) -> Result<(), FusionError> {
        if message.from != self.peer || message.to != self.owner {
            return Err(FusionError::UnknownNeighbor {
                agent: self.owner,
                neighbor: message.from,
                target: message.target,
            });
        }
        if message.target != self.target {
            return Err(FusionError::UnknownTarget {
                agent: self.owner,
                target: message.target,
            });
        }

        let expected = match &self.pending {
            Some(pending) => pending.local.step,
            None => return Err(self.out_of_phase("received before sending")),
        };
        if message.step != expected {
            return Err(FusionError::StaleNovelInformation {
                from: message.from,
                target: message.target,
                expected,
                actual: message.step,
            });
        }
        if posterior.step != expected {
            return Err(FusionError::StepMismatch {
                prior: expected,
                update: posterior.step,
            });
        }

        posterior.add_information(&message.vector, &message.matrix)?;

        if let Some(pending) = self.pending.take() {
            let mut common = pending.local;
            common.add_information(&message.vector, &message.matrix)?;
            self.common = common;
            self.exchanges += 1;
        }

        Ok(())
    }

    /// Agent that owns this side of the channel.
    pub fn owner(&self) -> AgentId {
        self.owner
    }

    /// Agent at the other end.
    pub fn peer(&self) -> AgentId {
        self.peer
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// Common information as of the last completed exchange.
    pub fn common(&self) -> &InformationState {
        &self.common
    }

    /// Common information predicted for the outstanding exchange, if any.
    pub fn common_predicted(&self) -> Option<&InformationState> {
        self.pending.as_ref().map(|p| &p.common_predicted)
    }

    /// Novel term staged for the peer in the current round, if any.
    pub fn staged_novel(&self) -> Option<&NovelInformation> {
        self.pending.as_ref().map(|p| &p.novel)
    }

    /// True between `update_and_send` and `receive_and_update`.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of completed exchanges.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    fn out_of_phase(&self, detail: &'static str) -> FusionError {
        FusionError::ChannelOutOfPhase {
            owner: self.owner,
            peer: self.peer,
            target: self.target,
            detail,
        }
    }
}

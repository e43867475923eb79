//! Fusion node: one seeker running local filters and channel filters.
//!
//! A node tracks any number of targets. Each step runs through three phases
//! in order:
//!
//! ```text
//!   Idle ──local_update──► LocalUpdated ──send──► Sent ──receive_and_fuse──► Idle
//!                               │
//!                               └────────commit_local──────────────────────► Idle
//! ```
//!
//! The posterior produced by `local_update` is held as *pending* until the
//! round completes; only then is it appended to the target's history. The
//! history is never edited after the fact.

use crate::channel_filter::{ChannelFilter, NovelInformation};
use crate::error::FusionError;
use crate::ids::{AgentId, TargetId};
use crate::information::{InformationState, StateEstimate};
use crate::information_filter;
use crate::model::LinearGaussianModel;
use crate::source::MeasurementSource;
use std::collections::BTreeMap;
use tracing::debug;

/// Where a node is within the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    /// Waiting for the next step
    Idle,

    /// Local posteriors computed, nothing sent yet
    LocalUpdated,

    /// Novel terms sent, waiting for the neighbors' terms
    Sent,
}

impl NodePhase {
    pub fn name(&self) -> &'static str {
        match self {
            NodePhase::Idle => "idle",
            NodePhase::LocalUpdated => "locally updated",
            NodePhase::Sent => "waiting for neighbors",
        }
    }
}

/// Everything a node knows about one target.
#[derive(Debug, Clone)]
struct TargetTrack {
    /// Target dynamics with this node's sensor noise
    model: LinearGaussianModel,

    /// Committed posteriors, one per step, starting with the prior at step 0
    history: Vec<InformationState>,

    /// Posterior of the step in progress
    pending: Option<InformationState>,

    /// Channel filters keyed by neighbor
    channels: BTreeMap<AgentId, ChannelFilter>,
}

impl TargetTrack {
    fn last_committed(&self) -> &InformationState {
        // history always holds at least the prior
        &self.history[self.history.len() - 1]
    }
}

/// A seeker in the fusion network.
#[derive(Debug, Clone)]
pub struct FusionNode {
    id: AgentId,
    name: String,
    tracks: BTreeMap<TargetId, TargetTrack>,
    phase: NodePhase,
}

impl FusionNode {
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tracks: BTreeMap::new(),
            phase: NodePhase::Idle,
        }
    }

    /// Starts tracking `target` from a flat prior (zero information) at step 0.
    ///
    /// `model` must already carry this node's observation noise. Tracking a
    /// target twice keeps the existing track.
    pub fn track_target(
        &mut self,
        target: TargetId,
        model: LinearGaussianModel,
    ) -> Result<(), FusionError> {
        let prior = InformationState::zeros(0, model.state_dim());
        self.track_target_with_prior(target, model, prior)
    }

    /// Starts tracking `target` from an explicit prior.
    pub fn track_target_with_prior(
        &mut self,
        target: TargetId,
        model: LinearGaussianModel,
        prior: InformationState,
    ) -> Result<(), FusionError> {
        self.require_phase(NodePhase::Idle, "track a target")?;
        if prior.dim() != model.state_dim() {
            return Err(FusionError::dimension("prior", model.state_dim(), prior.dim()));
        }

        self.tracks.entry(target).or_insert_with(|| TargetTrack {
            model,
            history: vec![prior],
            pending: None,
            channels: BTreeMap::new(),
        });
        Ok(())
    }

    /// Opens a channel filter to `neighbor` for `target`.
    ///
    /// # Errors
    /// `SelfPairing`, `UnknownTarget` if the target is not tracked, and
    /// `DuplicateChannel` if the channel already exists.
    pub fn connect(&mut self, neighbor: AgentId, target: TargetId) -> Result<(), FusionError> {
        self.require_phase(NodePhase::Idle, "open a channel")?;
        let id = self.id;
        let track = self
            .tracks
            .get_mut(&target)
            .ok_or(FusionError::UnknownTarget { agent: id, target })?;

        if track.channels.contains_key(&neighbor) {
            return Err(FusionError::DuplicateChannel {
                agent: id,
                neighbor,
                target,
            });
        }

        let channel = ChannelFilter::new(id, neighbor, target, track.model.state_dim())?;
        track.channels.insert(neighbor, channel);
        debug!("{} opened channel to {} for {}", id, neighbor, target);
        Ok(())
    }

    /// Runs the local information filter for every tracked target.
    ///
    /// Results are held as pending posteriors. Either every target is
    /// updated or, on error, none is.
    pub fn local_update(
        &mut self,
        source: &mut dyn MeasurementSource,
        step: u64,
    ) -> Result<(), FusionError> {
        self.require_phase(NodePhase::Idle, "run a local update")?;

        let mut posteriors = Vec::with_capacity(self.tracks.len());
        for (&target, track) in &self.tracks {
            let measurement = source.measure(self.id, target, step)?;
            if measurement.step != step {
                return Err(FusionError::StepMismatch {
                    prior: step,
                    update: measurement.step,
                });
            }
            let posterior =
                information_filter::run(&track.model, track.last_committed(), &measurement)?;
            posteriors.push((target, posterior));
        }

        for (target, posterior) in posteriors {
            if let Some(track) = self.tracks.get_mut(&target) {
                track.pending = Some(posterior);
            }
        }

        debug!("{} local update at step {} ({} targets)", self.id, step, self.tracks.len());
        self.phase = NodePhase::LocalUpdated;
        Ok(())
    }

    /// Produces the novel-information message for every channel.
    ///
    /// Messages come out in (target, neighbor) order.
    pub fn send(&mut self) -> Result<Vec<NovelInformation>, FusionError> {
        self.require_phase(NodePhase::LocalUpdated, "send")?;

        let mut outbox = Vec::new();
        for (&target, track) in self.tracks.iter_mut() {
            let TargetTrack {
                model,
                pending,
                channels,
                ..
            } = track;
            let local = pending.as_ref().ok_or(FusionError::PhaseViolation {
                agent: self.id,
                operation: "send",
                phase: "missing local posterior",
            })?;

            for channel in channels.values_mut() {
                outbox.push(channel.update_and_send(model, local)?);
            }
            debug!("{} sent {} novel terms for {}", self.id, channels.len(), target);
        }

        self.phase = NodePhase::Sent;
        Ok(outbox)
    }

    /// Fuses the neighbors' novel terms and commits the round.
    ///
    /// Every channel must receive exactly one message. Channels are processed
    /// in neighbor-id order so the result does not depend on arrival order.
    /// A missing or stale message is reported before any target is fused, so
    /// a rejected inbox leaves the node unchanged.
    pub fn receive_and_fuse(&mut self, inbox: Vec<NovelInformation>) -> Result<(), FusionError> {
        self.require_phase(NodePhase::Sent, "receive")?;

        let mut by_channel: BTreeMap<(TargetId, AgentId), NovelInformation> = BTreeMap::new();
        for message in inbox {
            let track = self.tracks.get(&message.target).ok_or(FusionError::UnknownTarget {
                agent: self.id,
                target: message.target,
            })?;
            if message.to != self.id || !track.channels.contains_key(&message.from) {
                return Err(FusionError::UnknownNeighbor {
                    agent: self.id,
                    neighbor: message.from,
                    target: message.target,
                });
            }

            let key = (message.target, message.from);
            if by_channel.contains_key(&key) {
                return Err(FusionError::ChannelOutOfPhase {
                    owner: self.id,
                    peer: message.from,
                    target: message.target,
                    detail: "more than one message in a round",
                });
            }
            by_channel.insert(key, message);
        }

        // Check the whole inbox before touching any track
        for (&target, track) in &self.tracks {
            let step = track
                .pending
                .as_ref()
                .ok_or(FusionError::PhaseViolation {
                    agent: self.id,
                    operation: "fuse",
                    phase: "missing local posterior",
                })?
                .step;

            for &neighbor in track.channels.keys() {
                let message = by_channel.get(&(target, neighbor)).ok_or(
                    FusionError::MissingNovelInformation {
                        agent: self.id,
                        neighbor,
                        target,
                        step,
                    },
                )?;
                if message.step != step {
                    return Err(FusionError::StaleNovelInformation {
                        from: neighbor,
                        target,
                        expected: step,
                        actual: message.step,
                    });
                }
                let n = track.model.state_dim();
                if message.vector.len() != n || message.matrix.shape() != (n, n) {
                    let actual = message.vector.len();
                    return Err(FusionError::dimension("novel information", n, actual));
                }
            }
        }

        for (&target, track) in self.tracks.iter_mut() {
            let TargetTrack {
                history,
                pending,
                channels,
                ..
            } = track;
            let mut posterior = pending.take().ok_or(FusionError::PhaseViolation {
                agent: self.id,
                operation: "fuse",
                phase: "missing local posterior",
            })?;

            for (&neighbor, channel) in channels.iter_mut() {
                let message = by_channel.remove(&(target, neighbor)).ok_or(
                    FusionError::MissingNovelInformation {
                        agent: self.id,
                        neighbor,
                        target,
                        step: posterior.step,
                    },
                )?;
                channel.receive_and_update(&message, &mut posterior)?;
            }

            debug!(
                "{} fused {} neighbors for {} at step {}",
                self.id,
                channels.len(),
                target,
                posterior.step
            );
            history.push(posterior);
        }

        self.phase = NodePhase::Idle;
        Ok(())
    }

    /// Commits the local posteriors without communicating.
    ///
    /// Used on steps where the schedule does not exchange information.
    pub fn commit_local(&mut self) -> Result<(), FusionError> {
        self.require_phase(NodePhase::LocalUpdated, "commit")?;

        for track in self.tracks.values_mut() {
            if let Some(posterior) = track.pending.take() {
                track.history.push(posterior);
            }
        }

        self.phase = NodePhase::Idle;
        Ok(())
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    /// Tracked targets in id order.
    pub fn targets(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.tracks.keys().copied()
    }

    /// Neighbors with a channel for `target`, in id order.
    pub fn neighbors(&self, target: TargetId) -> Vec<AgentId> {
        self.tracks
            .get(&target)
            .map(|t| t.channels.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn model(&self, target: TargetId) -> Option<&LinearGaussianModel> {
        self.tracks.get(&target).map(|t| &t.model)
    }

    pub fn channel(&self, neighbor: AgentId, target: TargetId) -> Option<&ChannelFilter> {
        self.tracks.get(&target).and_then(|t| t.channels.get(&neighbor))
    }

    /// Committed posteriors for `target`, oldest first.
    pub fn history(&self, target: TargetId) -> Option<&[InformationState]> {
        self.tracks.get(&target).map(|t| t.history.as_slice())
    }

    /// Most recent committed posterior for `target`.
    pub fn latest(&self, target: TargetId) -> Option<&InformationState> {
        self.tracks.get(&target).map(|t| t.last_committed())
    }

    /// Posterior of the step in progress, if any.
    pub fn pending(&self, target: TargetId) -> Option<&InformationState> {
        self.tracks.get(&target).and_then(|t| t.pending.as_ref())
    }

    /// Mean/covariance view of the latest committed posterior.
    pub fn estimate(&self, target: TargetId) -> Result<StateEstimate, FusionError> {
        self.latest(target)
            .ok_or(FusionError::UnknownTarget {
                agent: self.id,
                target,
            })?
            .to_estimate()
    }

    fn require_phase(
        &self,
        expected: NodePhase,
        operation: &'static str,
    ) -> Result<(), FusionError> {
        if self.phase != expected {
            return Err(FusionError::PhaseViolation {
                agent: self.id,
                operation,
                phase: self.phase.name(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::information::Measurement;
    use crate::source::RecordedMeasurements;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    const TARGET: TargetId = TargetId(0);

    fn model(r: [f64; 2]) -> LinearGaussianModel {
        LinearGaussianModel::constant_position(2, 1e-9, 1.0, 1.0)
            .unwrap()
            .with_observation_noise(DMatrix::from_diagonal(&DVector::from_row_slice(&r)))
            .unwrap()
    }

    fn node(id: u32, r: [f64; 2]) -> FusionNode {
        let mut node = FusionNode::new(AgentId(id), format!("seeker-{id}"));
        node.track_target(TARGET, model(r)).unwrap();
        node
    }

    fn constant_log(agents: &[u32], steps: u64, z: [f64; 2]) -> RecordedMeasurements {
        let mut log = RecordedMeasurements::new();
        for &a in agents {
            for step in 1..=steps {
                log.insert(AgentId(a), TARGET, Measurement::new(step, DVector::from_row_slice(&z)));
            }
        }
        log
    }

    #[test]
    fn test_connect_errors() {
        let mut a = node(1, [1.0, 1.0]);
        assert_eq!(a.connect(AgentId(1), TARGET), Err(FusionError::SelfPairing(AgentId(1))));
        assert_eq!(
            a.connect(AgentId(2), TargetId(9)),
            Err(FusionError::UnknownTarget {
                agent: AgentId(1),
                target: TargetId(9)
            })
        );
        a.connect(AgentId(2), TARGET).unwrap();
        assert!(matches!(
            a.connect(AgentId(2), TARGET),
            Err(FusionError::DuplicateChannel { .. })
        ));
        assert_eq!(a.neighbors(TARGET), vec![AgentId(2)]);
    }

    #[test]
    fn test_lone_node_commits_locally() {
        let mut a = node(1, [10.0, 15.0]);
        let mut log = constant_log(&[1], 3, [30.0, 0.0]);

        for step in 1..=3 {
            a.local_update(&mut log, step).unwrap();
            assert_eq!(a.latest(TARGET).unwrap().step, step - 1);
            a.commit_local().unwrap();
        }

        let history = a.history(TARGET).unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[0].is_uninformed());
        assert_relative_eq!(history[3].matrix[(0, 0)], 0.3, max_relative = 1e-6);

        let estimate = a.estimate(TARGET).unwrap();
        assert_relative_eq!(estimate.mean[0], 30.0, epsilon = 1e-6);
    }

    #[test]
    fn test_phase_order_enforced() {
        let mut a = node(1, [1.0, 1.0]);
        assert!(matches!(a.send(), Err(FusionError::PhaseViolation { .. })));
        assert!(matches!(a.receive_and_fuse(Vec::new()), Err(FusionError::PhaseViolation { .. })));

        let mut log = constant_log(&[1], 1, [0.0, 0.0]);
        a.local_update(&mut log, 1).unwrap();
        assert_eq!(a.phase(), NodePhase::LocalUpdated);
        assert!(matches!(
            a.local_update(&mut log, 1),
            Err(FusionError::PhaseViolation { .. })
        ));
        assert!(matches!(
            a.track_target(TargetId(3), model([1.0, 1.0])),
            Err(FusionError::PhaseViolation { .. })
        ));
    }

    #[test]
    fn test_missing_measurement_is_fatal() {
        let mut a = node(1, [1.0, 1.0]);
        let mut log = RecordedMeasurements::new();
        assert_eq!(
            a.local_update(&mut log, 1),
            Err(FusionError::MissingMeasurement {
                agent: AgentId(1),
                target: TARGET,
                step: 1
            })
        );
        assert_eq!(a.phase(), NodePhase::Idle);
        assert!(a.pending(TARGET).is_none());
    }

    #[test]
    fn test_two_nodes_exchange() {
        let mut a = node(1, [10.0, 15.0]);
        let mut b = node(2, [30.0, 20.0]);
        a.connect(AgentId(2), TARGET).unwrap();
        b.connect(AgentId(1), TARGET).unwrap();
        let mut log = constant_log(&[1, 2], 1, [30.0, 0.0]);

        a.local_update(&mut log, 1).unwrap();
        b.local_update(&mut log, 1).unwrap();
        let to_b = a.send().unwrap();
        let to_a = b.send().unwrap();
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].to, AgentId(2));

        a.receive_and_fuse(to_a).unwrap();
        b.receive_and_fuse(to_b).unwrap();

        let ya = a.latest(TARGET).unwrap();
        let yb = b.latest(TARGET).unwrap();
        assert_eq!(ya.step, 1);
        assert_relative_eq!(ya.matrix[(0, 0)], 0.1 + 1.0 / 30.0, max_relative = 1e-9);
        assert_relative_eq!(ya.matrix, yb.matrix, epsilon = 1e-12);
        assert_eq!(a.channel(AgentId(2), TARGET).unwrap().exchanges(), 1);
    }

    #[test]
    fn test_rejected_inbox_leaves_node_unchanged() {
        let mut a = node(1, [1.0, 1.0]);
        a.track_target(TargetId(1), model([2.0, 2.0])).unwrap();
        a.connect(AgentId(2), TARGET).unwrap();
        a.connect(AgentId(2), TargetId(1)).unwrap();

        let mut log = constant_log(&[1], 1, [0.0, 0.0]);
        log.insert(AgentId(1), TargetId(1), Measurement::new(1, DVector::zeros(2)));
        a.local_update(&mut log, 1).unwrap();
        a.send().unwrap();

        // Only the first target's message arrives
        let partial = NovelInformation {
            from: AgentId(2),
            to: AgentId(1),
            target: TARGET,
            step: 1,
            vector: DVector::zeros(2),
            matrix: DMatrix::identity(2, 2),
        };
        assert_eq!(
            a.receive_and_fuse(vec![partial.clone()]),
            Err(FusionError::MissingNovelInformation {
                agent: AgentId(1),
                neighbor: AgentId(2),
                target: TargetId(1),
                step: 1
            })
        );

        assert_eq!(a.phase(), NodePhase::Sent);
        for target in [TARGET, TargetId(1)] {
            assert_eq!(a.history(target).unwrap().len(), 1);
            assert!(a.pending(target).is_some());
            assert!(a.channel(AgentId(2), target).unwrap().is_pending());
        }

        // A late message for the second target is caught the same way
        let mut stale = partial.clone();
        stale.target = TargetId(1);
        stale.step = 0;
        assert!(matches!(
            a.receive_and_fuse(vec![partial.clone(), stale]),
            Err(FusionError::StaleNovelInformation { actual: 0, .. })
        ));
        assert_eq!(a.history(TARGET).unwrap().len(), 1);

        // The full inbox still goes through afterwards
        let mut second = partial.clone();
        second.target = TargetId(1);
        a.receive_and_fuse(vec![partial, second]).unwrap();
        assert_eq!(a.phase(), NodePhase::Idle);
        assert_eq!(a.history(TargetId(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_and_unknown_neighbor_messages() {
        let mut a = node(1, [1.0, 1.0]);
        a.connect(AgentId(2), TARGET).unwrap();
        let mut log = constant_log(&[1], 1, [0.0, 0.0]);

        a.local_update(&mut log, 1).unwrap();
        a.send().unwrap();
        assert_eq!(
            a.clone().receive_and_fuse(Vec::new()),
            Err(FusionError::MissingNovelInformation {
                agent: AgentId(1),
                neighbor: AgentId(2),
                target: TARGET,
                step: 1
            })
        );

        let stranger = NovelInformation {
            from: AgentId(7),
            to: AgentId(1),
            target: TARGET,
            step: 1,
            vector: DVector::zeros(2),
            matrix: DMatrix::zeros(2, 2),
        };
        assert_eq!(
            a.receive_and_fuse(vec![stranger]),
            Err(FusionError::UnknownNeighbor {
                agent: AgentId(1),
                neighbor: AgentId(7),
                target: TARGET
            })
        );
    }
}

//! Communication graph and the synchronous two-phase round.
//!
//! Every round first lets all nodes run their local update and send, then
//! lets all nodes receive and fuse. No node fuses before every node has
//! sent, so each message is computed from purely local information.

use crate::channel_filter::NovelInformation;
use crate::error::FusionError;
use crate::ids::AgentId;
use crate::node::FusionNode;
use crate::source::MeasurementSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Fixed set of bidirectional links between agents.
///
/// The links always form a forest: an edge that would close a cycle is
/// rejected, since channel filters cannot remove information that comes
/// back around a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationSchedule {
    /// Undirected edges stored as (smaller id, larger id)
    edges: BTreeSet<(AgentId, AgentId)>,
}

impl CommunicationSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schedule from a list of links.
    pub fn from_edges(
        edges: impl IntoIterator<Item = (AgentId, AgentId)>,
    ) -> Result<Self, FusionError> {
        let mut schedule = Self::new();
        for (a, b) in edges {
            schedule.add_edge(a, b)?;
        }
        Ok(schedule)
    }

    /// Links consecutive agents: a0 - a1 - ... - aN.
    pub fn chain(agents: &[AgentId]) -> Result<Self, FusionError> {
        Self::from_edges(agents.windows(2).map(|w| (w[0], w[1])))
    }

    /// Adds a bidirectional link. Returns false if it already existed.
    ///
    /// # Errors
    /// `SelfPairing` for a loop on one agent, `CyclicTopology` when `a` and
    /// `b` are already connected through other links.
    pub fn add_edge(&mut self, a: AgentId, b: AgentId) -> Result<bool, FusionError> {
        if a == b {
            return Err(FusionError::SelfPairing(a));
        }
        if self.contains(a, b) {
            return Ok(false);
        }
        if self.connected(a, b) {
            return Err(FusionError::CyclicTopology {
                a: a.min(b),
                b: a.max(b),
            });
        }
        Ok(self.edges.insert((a.min(b), a.max(b))))
    }

    /// True when a path of links joins `a` and `b`.
    pub fn connected(&self, a: AgentId, b: AgentId) -> bool {
        let mut parent: BTreeMap<AgentId, AgentId> = BTreeMap::new();
        for &(x, y) in &self.edges {
            let rx = find(&mut parent, x);
            let ry = find(&mut parent, y);
            if rx != ry {
                parent.insert(rx, ry);
            }
        }
        find(&mut parent, a) == find(&mut parent, b)
    }

    pub fn contains(&self, a: AgentId, b: AgentId) -> bool {
        self.edges.contains(&(a.min(b), a.max(b)))
    }

    /// Neighbors of `agent` in id order.
    pub fn neighbors(&self, agent: AgentId) -> Vec<AgentId> {
        let mut out: Vec<AgentId> = self
            .edges
            .iter()
            .filter_map(|&(a, b)| {
                if a == agent {
                    Some(b)
                } else if b == agent {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        out.sort();
        out
    }

    pub fn edges(&self) -> impl Iterator<Item = (AgentId, AgentId)> + '_ {
        self.edges.iter().copied()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Every agent that appears in at least one link.
    pub fn agents(&self) -> BTreeSet<AgentId> {
        self.edges.iter().flat_map(|&(a, b)| [a, b]).collect()
    }
}

/// Union-find root of `agent`, halving the path on the way.
fn find(parent: &mut BTreeMap<AgentId, AgentId>, agent: AgentId) -> AgentId {
    let mut current = agent;
    while let Some(&next) = parent.get(&current) {
        if let Some(&grand) = parent.get(&next) {
            parent.insert(current, grand);
        }
        current = next;
    }
    current
}

/// Fusion settings shared by every node of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Channels exchange on every `communication_interval`-th step
    pub communication_interval: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            communication_interval: 1,
        }
    }
}

impl FusionConfig {
    pub fn with_communication_interval(mut self, interval: u64) -> Self {
        self.communication_interval = interval.max(1);
        self
    }

    /// True when channels exchange information at `step`.
    pub fn communicates_at(&self, step: u64) -> bool {
        step % self.communication_interval.max(1) == 0
    }
}

/// Summary of one completed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub step: u64,

    /// Whether channels exchanged information this round
    pub communicated: bool,

    /// Novel-information messages delivered
    pub messages: usize,
}

/// A registry of nodes linked by a communication schedule.
#[derive(Debug, Clone, Default)]
pub struct FusionNetwork {
    nodes: BTreeMap<AgentId, FusionNode>,
    schedule: CommunicationSchedule,
    config: FusionConfig,
    messages_sent: u64,
}

impl FusionNetwork {
    pub fn new(schedule: CommunicationSchedule, config: FusionConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            schedule,
            config,
            messages_sent: 0,
        }
    }

    /// Registers a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: FusionNode) -> Option<FusionNode> {
        self.nodes.insert(node.id(), node)
    }

    /// Opens a channel filter at both ends of every link, for every target.
    ///
    /// # Errors
    /// `CyclicTopology` if the links contain a loop (possible for a
    /// deserialized schedule), `UnknownAgent` if a link names an unregistered
    /// agent, `UnknownTarget` if the two ends do not track the same targets.
    pub fn establish_channels(&mut self) -> Result<(), FusionError> {
        let edges: Vec<_> = self.schedule.edges().collect();
        CommunicationSchedule::from_edges(edges.iter().copied())?;

        for (a, b) in edges {
            let targets: BTreeSet<_> = self
                .node(a)
                .ok_or(FusionError::UnknownAgent(a))?
                .targets()
                .chain(self.node(b).ok_or(FusionError::UnknownAgent(b))?.targets())
                .collect();

            for target in targets {
                self.node_mut(a)?.connect(b, target)?;
                self.node_mut(b)?.connect(a, target)?;
            }
            debug!("Linked {} <-> {}", a, b);
        }

        info!(
            "Established channels: {} nodes, {} links",
            self.nodes.len(),
            self.schedule.edge_count()
        );
        Ok(())
    }

    /// Runs one synchronous round at `step`.
    ///
    /// Phase one runs every node's local update (and send, on communication
    /// steps); phase two delivers the messages and fuses them. Any error
    /// aborts the round.
    pub fn run_round(
        &mut self,
        step: u64,
        source: &mut dyn MeasurementSource,
    ) -> Result<RoundReport, FusionError> {
        for node in self.nodes.values_mut() {
            node.local_update(source, step)?;
        }

        if !self.config.communicates_at(step) {
            for node in self.nodes.values_mut() {
                node.commit_local()?;
            }
            debug!("Step {}: local updates only", step);
            return Ok(RoundReport {
                step,
                communicated: false,
                messages: 0,
            });
        }

        let mut outbox = Vec::new();
        for node in self.nodes.values_mut() {
            outbox.extend(node.send()?);
        }
        let messages = outbox.len();
        let mut inboxes = self.route(outbox)?;

        for (id, node) in self.nodes.iter_mut() {
            node.receive_and_fuse(inboxes.remove(id).unwrap_or_default())?;
        }

        self.messages_sent += messages as u64;
        debug!("Step {}: {} messages exchanged", step, messages);
        Ok(RoundReport {
            step,
            communicated: true,
            messages,
        })
    }

    /// Sorts messages into per-recipient inboxes.
    pub fn route(
        &self,
        outbox: Vec<NovelInformation>,
    ) -> Result<BTreeMap<AgentId, Vec<NovelInformation>>, FusionError> {
        let mut inboxes: BTreeMap<AgentId, Vec<NovelInformation>> = BTreeMap::new();
        for message in outbox {
            if !self.nodes.contains_key(&message.to) {
                return Err(FusionError::UnknownAgent(message.to));
            }
            inboxes.entry(message.to).or_default().push(message);
        }
        Ok(inboxes)
    }

    pub fn node(&self, id: AgentId) -> Option<&FusionNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: AgentId) -> Result<&mut FusionNode, FusionError> {
        self.nodes.get_mut(&id).ok_or(FusionError::UnknownAgent(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FusionNode> + '_ {
        self.nodes.values()
    }

    /// Consumes the network and hands back its nodes.
    pub fn into_nodes(self) -> BTreeMap<AgentId, FusionNode> {
        self.nodes
    }

    pub fn schedule(&self) -> &CommunicationSchedule {
        &self.schedule
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Total novel-information messages delivered so far.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TargetId;
    use crate::model::LinearGaussianModel;

    fn ids(raw: &[u32]) -> Vec<AgentId> {
        raw.iter().map(|&i| AgentId(i)).collect()
    }

    #[test]
    fn test_chain_neighbors() {
        let schedule = CommunicationSchedule::chain(&ids(&[1, 2, 3, 4, 5])).unwrap();
        assert_eq!(schedule.edge_count(), 4);
        assert_eq!(schedule.neighbors(AgentId(1)), ids(&[2]));
        assert_eq!(schedule.neighbors(AgentId(3)), ids(&[2, 4]));
        assert!(schedule.contains(AgentId(5), AgentId(4)));
        assert_eq!(schedule.agents().len(), 5);
    }

    #[test]
    fn test_self_loop_rejected() {
        let result = CommunicationSchedule::from_edges([(AgentId(2), AgentId(2))]);
        assert_eq!(result, Err(FusionError::SelfPairing(AgentId(2))));
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let mut schedule = CommunicationSchedule::new();
        assert!(schedule.add_edge(AgentId(1), AgentId(2)).unwrap());
        assert!(!schedule.add_edge(AgentId(2), AgentId(1)).unwrap());
        assert_eq!(schedule.edge_count(), 1);
    }

    #[test]
    fn test_triangle_rejected() {
        let mut schedule = CommunicationSchedule::chain(&ids(&[1, 2, 3])).unwrap();
        assert_eq!(
            schedule.add_edge(AgentId(3), AgentId(1)),
            Err(FusionError::CyclicTopology {
                a: AgentId(1),
                b: AgentId(3)
            })
        );
        assert_eq!(schedule.edge_count(), 2);

        let result = CommunicationSchedule::from_edges([
            (AgentId(1), AgentId(2)),
            (AgentId(2), AgentId(3)),
            (AgentId(1), AgentId(3)),
        ]);
        assert!(matches!(result, Err(FusionError::CyclicTopology { .. })));
    }

    #[test]
    fn test_forest_accepted() {
        // Two separate trees, then a link joining them
        let mut schedule = CommunicationSchedule::from_edges([
            (AgentId(1), AgentId(2)),
            (AgentId(1), AgentId(3)),
            (AgentId(5), AgentId(4)),
        ])
        .unwrap();
        assert!(!schedule.connected(AgentId(3), AgentId(4)));
        assert!(schedule.add_edge(AgentId(3), AgentId(4)).unwrap());
        assert!(schedule.connected(AgentId(2), AgentId(5)));
        assert!(matches!(
            schedule.add_edge(AgentId(2), AgentId(5)),
            Err(FusionError::CyclicTopology { .. })
        ));
    }

    #[test]
    fn test_communication_interval() {
        let config = FusionConfig::default().with_communication_interval(3);
        assert!(!config.communicates_at(1));
        assert!(config.communicates_at(3));
        assert!(config.communicates_at(6));
        assert!(FusionConfig::default().communicates_at(7));
    }

    #[test]
    fn test_link_to_unregistered_agent_rejected() {
        let schedule = CommunicationSchedule::chain(&ids(&[1, 2])).unwrap();
        let mut network = FusionNetwork::new(schedule, FusionConfig::default());
        let mut node = FusionNode::new(AgentId(1), "seeker-1");
        node.track_target(
            TargetId(0),
            LinearGaussianModel::constant_position(2, 1e-6, 1.0, 1.0).unwrap(),
        )
        .unwrap();
        network.add_node(node);

        assert_eq!(network.establish_channels(), Err(FusionError::UnknownAgent(AgentId(2))));
    }
}

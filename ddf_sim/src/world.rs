//! SimWorld - The simulation harness container.

use crate::concurrent;
use crate::error::SimError;
use crate::oracle::Oracle;
use crate::sensor::{agent_seed, Sensor, SensorSuite};

use ddf_core::{
    AgentId, CentralizedFilter, CommunicationSchedule, FusionConfig, FusionError, FusionNetwork,
    FusionNode, LinearGaussianModel, ModelProvider, RoundReport, TargetId,
};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of fusion rounds
    pub steps: u64,

    /// Feed the seekers true measurements (no sensor noise)
    pub noiseless: bool,

    /// Channels exchange every n-th step
    pub communication_interval: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            steps: 100,
            noiseless: false,
            communication_interval: 1,
        }
    }
}

/// Static description of one seeker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekerInfo {
    pub id: AgentId,
    pub name: String,

    /// Where the seeker sits (for display only)
    pub position: [f64; 2],

    /// Sensor noise covariance R
    pub noise: DMatrix<f64>,

    /// False for control seekers that never communicate
    pub linked: bool,

    /// Seeker whose sensor this one replays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrors: Option<AgentId>,
}

/// Collects hiders, seekers and links, then builds a [`SimWorld`].
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    config: SimConfig,
    oracle: Oracle,
    seekers: Vec<SeekerInfo>,
    links: Vec<(AgentId, AgentId)>,
}

impl WorldBuilder {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            oracle: Oracle::new(),
            seekers: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Adds a hider with its dynamics and true initial state.
    pub fn hider(
        mut self,
        id: TargetId,
        model: LinearGaussianModel,
        initial: DVector<f64>,
    ) -> Self {
        self.oracle.spawn_hider(id, model, initial);
        self
    }

    /// Adds a seeker with sensor noise `noise`.
    pub fn seeker(
        mut self,
        id: AgentId,
        name: &str,
        position: [f64; 2],
        noise: DMatrix<f64>,
    ) -> Self {
        self.seekers.push(SeekerInfo {
            id,
            name: name.to_string(),
            position,
            noise,
            linked: false,
            mirrors: None,
        });
        self
    }

    /// Adds a control seeker that sees exactly what `mirror` sees.
    ///
    /// The sensor takes over the mirrored seeker's noise covariance and seed,
    /// so both draw identical measurements every step. Leave it unlinked to
    /// compare local-only filtering against the fused estimate.
    pub fn control_of(
        mut self,
        id: AgentId,
        name: &str,
        position: [f64; 2],
        mirror: AgentId,
    ) -> Self {
        self.seekers.push(SeekerInfo {
            id,
            name: name.to_string(),
            position,
            noise: DMatrix::zeros(0, 0),
            linked: false,
            mirrors: Some(mirror),
        });
        self
    }

    /// Adds a bidirectional communication link.
    pub fn link(mut self, a: AgentId, b: AgentId) -> Self {
        self.links.push((a, b));
        self
    }

    /// Propagates the truth, creates sensors and nodes, and opens channels.
    pub fn build(self) -> Result<SimWorld, SimError> {
        let WorldBuilder {
            config,
            mut oracle,
            mut seekers,
            links,
        } = self;

        oracle.propagate_to(config.steps);
        let oracle = Arc::new(oracle);

        let noise: BTreeMap<AgentId, DMatrix<f64>> = seekers
            .iter()
            .filter(|s| s.mirrors.is_none())
            .map(|s| (s.id, s.noise.clone()))
            .collect();
        for seeker in seekers.iter_mut() {
            if let Some(mirror) = seeker.mirrors {
                seeker.noise = noise
                    .get(&mirror)
                    .cloned()
                    .ok_or(FusionError::UnknownAgent(mirror))?;
            }
        }

        let schedule = CommunicationSchedule::from_edges(links)?;
        let linked = schedule.agents();
        let fusion =
            FusionConfig::default().with_communication_interval(config.communication_interval);
        let mut network = FusionNetwork::new(schedule, fusion);
        let mut sensors = SensorSuite::new();
        let mut centralized = BTreeMap::new();

        let targets: Vec<TargetId> = oracle.hiders().map(|h| h.id).collect();
        for &target in &targets {
            let dynamics = model_for(&*oracle, AgentId(0), target)?;
            centralized.insert(target, CentralizedFilter::new(target, dynamics.clone()));
        }

        for seeker in seekers.iter_mut() {
            seeker.linked = linked.contains(&seeker.id);

            let mut node = FusionNode::new(seeker.id, seeker.name.clone());
            for &target in &targets {
                let model = model_for(&*oracle, seeker.id, target)?
                    .with_observation_noise(seeker.noise.clone())?;
                node.track_target(target, model.clone())?;

                if seeker.linked {
                    if let Some(filter) = centralized.get_mut(&target) {
                        filter.add_sensor(seeker.id, model)?;
                    }
                }
            }
            network.add_node(node);

            let source = seeker.mirrors.unwrap_or(seeker.id);
            let sensor = Sensor::new(
                seeker.id,
                seeker.noise.clone(),
                agent_seed(config.seed, source),
                oracle.clone(),
            )?
            .noiseless(config.noiseless);
            sensors.insert(sensor);
        }

        network.establish_channels()?;
        info!(
            "World ready: {} seekers, {} hiders, {} links",
            seekers.len(),
            targets.len(),
            network.schedule().edge_count()
        );

        Ok(SimWorld {
            config,
            oracle,
            sensors,
            network,
            seekers,
            centralized,
            step: 0,
            messages_sent: 0,
        })
    }
}

fn model_for(
    provider: &impl ModelProvider,
    agent: AgentId,
    target: TargetId,
) -> Result<&LinearGaussianModel, FusionError> {
    provider.model(target).ok_or(FusionError::UnknownTarget { agent, target })
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Ground truth
    oracle: Arc<Oracle>,

    /// Every seeker's sensor
    sensors: SensorSuite,

    /// Seekers and their channel filters
    network: FusionNetwork,

    seekers: Vec<SeekerInfo>,

    /// Reference filters fed by every linked seeker
    centralized: BTreeMap<TargetId, CentralizedFilter>,

    /// Last completed step
    step: u64,

    messages_sent: u64,
}

impl SimWorld {
    /// Runs the next round synchronously.
    pub fn step(&mut self) -> Result<RoundReport, SimError> {
        let step = self.step + 1;
        let report = self
            .network
            .run_round(step, &mut self.sensors)
            .map_err(|e| SimError::round(step, e))?;

        for filter in self.centralized.values_mut() {
            filter
                .step(&mut self.sensors, step)
                .map_err(|e| SimError::round(step, e))?;
        }

        self.step = step;
        self.messages_sent += report.messages as u64;
        Ok(report)
    }

    /// Runs the remaining rounds synchronously.
    pub fn run(&mut self) -> Result<(), SimError> {
        while self.step < self.config.steps {
            let report = self.step()?;
            if report.step % 10 == 0 {
                debug!("  step={} | messages={}", report.step, self.messages_sent);
            }
        }
        Ok(())
    }

    /// Runs the remaining rounds with one task per seeker.
    ///
    /// On error the seekers are lost and the world should be discarded.
    pub async fn run_concurrent(&mut self) -> Result<(), SimError> {
        let first = self.step + 1;
        let last = self.config.steps;
        if first > last {
            return Ok(());
        }

        let network = std::mem::take(&mut self.network);
        let schedule = network.schedule().clone();
        let fusion = *network.config();
        let sensors = self.sensors.clone().into_sensors();

        let nodes = network.into_nodes();
        let outcome =
            concurrent::run_rounds(nodes, sensors, &schedule, fusion, first, last).await?;

        let mut network = FusionNetwork::new(schedule, fusion);
        for node in outcome.nodes.into_values() {
            network.add_node(node);
        }
        self.network = network;
        self.messages_sent += outcome.messages;

        for step in first..=last {
            for filter in self.centralized.values_mut() {
                filter
                    .step(&mut self.sensors, step)
                    .map_err(|e| SimError::round(step, e))?;
            }
        }

        self.step = last;
        Ok(())
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    pub fn network(&self) -> &FusionNetwork {
        &self.network
    }

    pub fn sensors(&self) -> &SensorSuite {
        &self.sensors
    }

    pub fn seekers(&self) -> &[SeekerInfo] {
        &self.seekers
    }

    pub fn centralized(&self, target: TargetId) -> Option<&CentralizedFilter> {
        self.centralized.get(&target)
    }

    /// Last completed step.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn targets(&self) -> Vec<TargetId> {
        self.oracle.hiders().map(|h| h.id).collect()
    }
}

//! Hide-and-seek scenarios.

use crate::world::{SimConfig, WorldBuilder};
use ddf_core::{AgentId, FusionError, LinearGaussianModel, TargetId};
use nalgebra::{DMatrix, DVector};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two seekers, one stationary hider
    Stationary,

    /// Five seekers in a chain plus an unlinked control seeker
    Chain,

    /// Four seekers in a star following a constant-velocity hider
    Pursuit,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::Stationary, ScenarioId::Chain, ScenarioId::Pursuit]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Stationary => "stationary",
            ScenarioId::Chain => "chain",
            ScenarioId::Pursuit => "pursuit",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Stationary => "2 seekers with unequal sensors locate a hider at (30, 0)",
            ScenarioId::Chain => {
                "5 seekers in a line relay information, 1 control seeker works alone"
            }
            ScenarioId::Pursuit => "4 seekers in a star track a hider moving at constant velocity",
        }
    }

    /// Number of rounds run when none is configured.
    pub fn default_steps(&self) -> u64 {
        match self {
            ScenarioId::Stationary => 100,
            ScenarioId::Chain => 50,
            ScenarioId::Pursuit => 60,
        }
    }

    /// Lays out hiders, seekers and links for this scenario.
    pub fn world(&self, config: SimConfig) -> Result<WorldBuilder, FusionError> {
        match self {
            ScenarioId::Stationary => stationary(config),
            ScenarioId::Chain => chain(config),
            ScenarioId::Pursuit => pursuit(config),
        }
    }
}

fn diag(x: f64, y: f64) -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_vec(vec![x, y]))
}

fn stationary(config: SimConfig) -> Result<WorldBuilder, FusionError> {
    let hider = LinearGaussianModel::constant_position(2, 1e-6, 1.0, 1.0)?;

    Ok(WorldBuilder::new(config)
        .hider(TargetId(0), hider, DVector::from_vec(vec![30.0, 0.0]))
        .seeker(AgentId(1), "seeker-1", [-30.0, -30.0], diag(10.0, 15.0))
        .seeker(AgentId(2), "seeker-2", [-20.0, 10.0], diag(30.0, 20.0))
        .link(AgentId(1), AgentId(2)))
}

fn chain(config: SimConfig) -> Result<WorldBuilder, FusionError> {
    let hider = LinearGaussianModel::constant_position(2, 1e-6, 1.0, 1.0)?;
    let mut builder =
        WorldBuilder::new(config).hider(TargetId(0), hider, DVector::from_vec(vec![10.0, 20.0]));

    for i in 1..=5u32 {
        let k = i as f64;
        builder = builder.seeker(
            AgentId(i),
            &format!("seeker-{i}"),
            [-60.0 + 20.0 * k, -20.0],
            diag(5.0 * k, 20.0 - 3.0 * k),
        );
        if i > 1 {
            builder = builder.link(AgentId(i - 1), AgentId(i));
        }
    }

    // Same measurements as seeker-1, but it never talks to anyone
    Ok(builder.control_of(AgentId(6), "control", [-40.0, -40.0], AgentId(1)))
}

fn pursuit(config: SimConfig) -> Result<WorldBuilder, FusionError> {
    let hider = LinearGaussianModel::constant_velocity(1.0, 0.01, 1.0)?;

    Ok(WorldBuilder::new(config)
        .hider(TargetId(0), hider, DVector::from_vec(vec![0.0, 0.0, 1.0, 0.5]))
        .seeker(
            AgentId(1),
            "hub",
            [0.0, 30.0],
            DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 4.0]),
        )
        .seeker(
            AgentId(2),
            "east",
            [40.0, 0.0],
            DMatrix::from_row_slice(2, 2, &[9.0, 2.0, 2.0, 6.0]),
        )
        .seeker(AgentId(3), "west", [-40.0, 0.0], diag(6.0, 12.0))
        .seeker(AgentId(4), "south", [0.0, -30.0], diag(15.0, 5.0))
        .link(AgentId(1), AgentId(2))
        .link(AgentId(1), AgentId(3))
        .link(AgentId(1), AgentId(4)))
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stationary" | "static" => Ok(ScenarioId::Stationary),
            "chain" | "line" => Ok(ScenarioId::Chain),
            "pursuit" | "moving" => Ok(ScenarioId::Pursuit),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

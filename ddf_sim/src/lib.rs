//! DDF Sim - Deterministic hide-and-seek harness for decentralized fusion
//!
//! Hiders move under known linear dynamics, seekers measure them with noisy
//! sensors, and the seekers fuse what they see through channel filters.
//! A centralized filter fed by every linked seeker serves as the reference
//! a consistent decentralized estimate may approach but never exceed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │                                                          │
//! │  ┌─────────┐  novel info  ┌─────────┐  novel info        │
//! │  │ Seeker  │◄────────────►│ Seeker  │◄────────► ...      │
//! │  │   #1    │   (channel   │   #2    │                    │
//! │  └────▲────┘    filter)   └────▲────┘                    │
//! │       │ z = Hx + v             │                         │
//! │  ┌────┴────────────────────────┴────┐   ┌─────────────┐  │
//! │  │             Oracle               │──►│ Centralized │  │
//! │  │   (true hider trajectories)      │   │  reference  │  │
//! │  └──────────────────────────────────┘   └─────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every random draw derives from one 64-bit seed, so a run is
//! reproducible bit for bit, with either the synchronous executor or the
//! concurrent one.
//!
//! # Usage
//!
//! ```ignore
//! use ddf_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_steps(50).run(ScenarioId::Chain)?;
//! assert!(result.passed);
//! ```

mod concurrent;
mod error;
mod exporter;
mod oracle;
mod runner;
mod sensor;
mod world;
pub mod scenarios;

pub use concurrent::{run_rounds, ConcurrentOutcome};
pub use error::SimError;
pub use exporter::{EstimateRecord, HiderPosition, SimExport, StepFrame};
pub use oracle::{Hider, Oracle};
pub use runner::{
    ScenarioMetrics, ScenarioResult, ScenarioRunner, CONSISTENCY_TOLERANCE, ERROR_BOUND_SIGMAS,
};
pub use sensor::{agent_seed, Sensor, SensorSuite};
pub use world::{SeekerInfo, SimConfig, SimWorld, WorldBuilder};

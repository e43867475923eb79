//! DDF Core - Decentralized data fusion with information and channel filters
//!
//! Several seekers each run a local information filter on their own
//! measurements of a target and exchange information with their neighbors.
//! The library solves the two problems that come with peer-to-peer fusion:
//! 1. **Additivity**: estimates are kept in information form (y = P⁻¹x,
//!    Y = P⁻¹) so independent information is fused by addition
//! 2. **Double counting**: a channel filter per link tracks the information
//!    both ends already share, and only the novel part is ever sent
//!
//! The rounds are synchronous: every node updates locally and sends, then
//! every node receives and fuses (see [`schedule::FusionNetwork`]).

pub mod centralized;
pub mod channel_filter;
pub mod error;
pub mod ids;
pub mod information;
pub mod information_filter;
pub mod linalg;
pub mod model;
pub mod node;
pub mod schedule;
pub mod source;

// Re-export key types for convenience
pub use centralized::CentralizedFilter;
pub use channel_filter::{ChannelFilter, NovelInformation};
pub use error::FusionError;
pub use ids::{AgentId, TargetId};
pub use information::{
    CovarianceEllipse, InformationState, Measurement, StateEstimate, CHI2_2DOF_95,
};
pub use model::{LinearGaussianModel, ModelProvider};
pub use node::{FusionNode, NodePhase};
pub use schedule::{CommunicationSchedule, FusionConfig, FusionNetwork, RoundReport};
pub use source::{MeasurementSource, RecordedMeasurements};

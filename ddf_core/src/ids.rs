//! Stable identifiers for agents and targets.

use serde::{Deserialize, Serialize};

/// Identifier of a fusion agent (a "seeker").
///
/// Plain integer handle; ordering is used to fix the fusion order of
/// neighbor contributions so that runs are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    /// Returns the raw index.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Identifier of an estimated entity (a "hider").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(pub u32);

impl TargetId {
    /// Returns the raw index.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "target-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AgentId(3).to_string(), "agent-3");
        assert_eq!(TargetId(0).to_string(), "target-0");
    }

    #[test]
    fn test_ordering() {
        let mut ids = vec![AgentId(4), AgentId(1), AgentId(3)];
        ids.sort();
        assert_eq!(ids, vec![AgentId(1), AgentId(3), AgentId(4)]);
    }
}

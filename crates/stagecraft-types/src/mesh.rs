//! Capability-mesh types: agent registrations and health states.
//!
//! Registrations are process-lifetime only -- never persisted. The mesh
//! router mutates load and health continuously as routed calls complete
//! or fail.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Health of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Normal operation.
    Healthy,
    /// Elevated recent failure rate; still eligible for routing.
    Degraded,
    /// Excluded from candidate selection.
    Unavailable,
}

/// A worker's declaration of what it can do and how loaded it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Opaque agent identifier. Also the deterministic tie-breaker when
    /// multiple candidates share the same load.
    pub agent_id: String,
    /// Named kinds of work this agent can perform.
    pub capabilities: HashSet<String>,
    /// Current health, as observed by the router.
    pub health: AgentHealth,
    /// Number of requests currently dispatched to this agent.
    pub current_load: u32,
    /// Maximum concurrent requests this agent accepts.
    pub max_capacity: u32,
}

impl AgentRegistration {
    /// Create a healthy, idle registration.
    pub fn new(
        agent_id: &str,
        capabilities: impl IntoIterator<Item = String>,
        max_capacity: u32,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            capabilities: capabilities.into_iter().collect(),
            health: AgentHealth::Healthy,
            current_load: 0,
            max_capacity,
        }
    }

    /// Whether this agent declares the given capability.
    pub fn declares(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether this agent has no remaining capacity.
    pub fn is_saturated(&self) -> bool {
        self.current_load >= self.max_capacity
    }
}

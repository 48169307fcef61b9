//! Agent registry: discovery, health, and load tracking for the mesh.
//!
//! Backed by a `DashMap` keyed by agent ID so unrelated agents never contend.
//! Registrations are process-lifetime only -- nothing here is persisted.
//! Model the registry as an injected, explicitly-owned service object, never
//! a package-level singleton, so tests can build isolated instances.

use dashmap::DashMap;
use stagecraft_types::mesh::{AgentHealth, AgentRegistration};

/// Registry of capability-declaring agents.
pub struct AgentRegistry {
    agents: DashMap<String, AgentRegistration>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Register an agent (or replace its existing registration).
    ///
    /// New registrations start healthy with zero load.
    pub fn register(
        &self,
        agent_id: &str,
        capabilities: impl IntoIterator<Item = String>,
        max_capacity: u32,
    ) {
        let registration = AgentRegistration::new(agent_id, capabilities, max_capacity);
        tracing::debug!(
            agent_id,
            capabilities = ?registration.capabilities,
            "agent registered"
        );
        self.agents.insert(agent_id.to_string(), registration);
    }

    /// Remove an agent. Returns `true` if it was registered.
    pub fn deregister(&self, agent_id: &str) -> bool {
        self.agents.remove(agent_id).is_some()
    }

    /// Fetch a snapshot of one agent's registration.
    pub fn get(&self, agent_id: &str) -> Option<AgentRegistration> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    /// Candidates declaring a capability, excluding `Unavailable` agents,
    /// ordered by ascending current load with agent-ID tie-breaking for
    /// determinism.
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentRegistration> {
        let mut candidates: Vec<AgentRegistration> = self
            .agents
            .iter()
            .filter(|a| a.declares(capability) && a.health != AgentHealth::Unavailable)
            .map(|a| a.clone())
            .collect();
        candidates.sort_by(|a, b| {
            a.current_load
                .cmp(&b.current_load)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        candidates
    }

    /// Set an agent's health. Returns `false` for unknown agents.
    pub fn update_health(&self, agent_id: &str, health: AgentHealth) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut agent) => {
                agent.health = health;
                true
            }
            None => false,
        }
    }

    /// Set an agent's load directly. Returns `false` for unknown agents.
    pub fn update_load(&self, agent_id: &str, load: u32) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut agent) => {
                agent.current_load = load;
                true
            }
            None => false,
        }
    }

    /// Count one request dispatched to an agent.
    pub fn record_dispatch(&self, agent_id: &str) {
        if let Some(mut agent) = self.agents.get_mut(agent_id) {
            agent.current_load = agent.current_load.saturating_add(1);
        }
    }

    /// Count one request finished (success or failure) on an agent.
    pub fn record_completion(&self, agent_id: &str) {
        if let Some(mut agent) = self.agents.get_mut(agent_id) {
            agent.current_load = agent.current_load.saturating_sub(1);
        }
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.len())
            .finish()
    }
}

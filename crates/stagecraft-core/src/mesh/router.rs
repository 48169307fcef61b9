//! Demand-driven request routing with failure isolation.
//!
//! `MeshRouter` picks the least-loaded eligible agent for a capability and
//! invokes it through the same executor boundary the job engine uses. Every
//! request carries a `RouteChain` recording the capabilities already visited
//! and the hop count, so circular delegation and unbounded chains are
//! rejected before any call is made. A per-capability circuit breaker stops
//! routing after repeated failures.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use stagecraft_types::config::MeshConfig;
use stagecraft_types::event::EngineEvent;
use stagecraft_types::mesh::AgentHealth;
use uuid::Uuid;

use crate::engine::step_executor::StepExecutorError;
use crate::event::EventBus;

use super::breaker::{CapabilityBreaker, CircuitState};
use super::registry::AgentRegistry;

// ---------------------------------------------------------------------------
// RouteChain
// ---------------------------------------------------------------------------

/// Provenance of a routed request: its correlation ID, how many hops it has
/// taken, and the ordered list of capabilities already visited.
#[derive(Debug, Clone)]
pub struct RouteChain {
    /// Correlation ID shared by every hop of this request.
    pub request_id: Uuid,
    /// Number of routed hops taken so far.
    pub hop_count: u32,
    /// Capabilities visited, in order.
    pub visited: Vec<String>,
}

impl RouteChain {
    /// Start a fresh chain for an incoming request.
    pub fn root() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            hop_count: 0,
            visited: Vec::new(),
        }
    }

    /// Derive the chain an agent passes along when it routes a follow-up
    /// request after handling `capability`.
    pub fn next(&self, capability: &str) -> Self {
        let mut visited = self.visited.clone();
        visited.push(capability.to_string());
        Self {
            request_id: self.request_id,
            hop_count: self.hop_count + 1,
            visited,
        }
    }

    /// Whether a capability already appears in this chain.
    pub fn contains(&self, capability: &str) -> bool {
        self.visited.iter().any(|c| c == capability)
    }
}

// ---------------------------------------------------------------------------
// CapabilityInvoker
// ---------------------------------------------------------------------------

/// The router's face of the worker boundary: actually call an agent.
///
/// The router never interprets `payload` or the returned value.
pub trait CapabilityInvoker: Send + Sync {
    fn invoke(
        &self,
        agent_id: &str,
        capability: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<Value, StepExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// Routing results
// ---------------------------------------------------------------------------

/// A successfully routed call: who handled it and what they returned.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub agent_id: String,
    pub output: Value,
}

/// Errors terminating a routed request chain. These never corrupt registry
/// state; load counters are released on every path.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// No agent declares the capability, all are unavailable or saturated,
    /// or the capability's circuit is open.
    #[error("no agent available for capability '{capability}'")]
    NoAgentAvailable { capability: String },

    /// The chain has reached the hop ceiling.
    #[error("hop count {hops} exceeds maximum {max}")]
    MaxHopsExceeded { hops: u32, max: u32 },

    /// The target capability already appears in the request's chain.
    #[error("capability '{capability}' already visited in chain {chain:?}")]
    CircularDependency {
        capability: String,
        chain: Vec<String>,
    },

    /// The routed call itself failed (collaborator error, opaque).
    #[error("routed call failed: {0}")]
    Invoke(#[from] StepExecutorError),
}

// ---------------------------------------------------------------------------
// MeshRouter
// ---------------------------------------------------------------------------

/// Routes capability requests to registered agents.
pub struct MeshRouter<I: CapabilityInvoker> {
    registry: Arc<AgentRegistry>,
    invoker: I,
    /// Circuit breakers keyed by capability, created lazily.
    breakers: DashMap<String, CapabilityBreaker>,
    config: MeshConfig,
    event_bus: EventBus,
}

impl<I: CapabilityInvoker> MeshRouter<I> {
    /// Create a router over an injected registry and invoker.
    pub fn new(
        registry: Arc<AgentRegistry>,
        invoker: I,
        config: MeshConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            invoker,
            breakers: DashMap::new(),
            config,
            event_bus,
        }
    }

    /// The registry this router selects from.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Snapshot of a capability's circuit state, if a breaker exists yet.
    pub fn circuit_state(&self, capability: &str) -> Option<CircuitState> {
        self.breakers.get(capability).map(|b| b.state().clone())
    }

    /// Route one request.
    ///
    /// Checks, in order: capability-chain cycle, hop ceiling, candidate
    /// availability, circuit state. Only then is the call dispatched to the
    /// least-loaded candidate (agent-ID tie-break).
    pub async fn route(
        &self,
        capability: &str,
        payload: Value,
        chain: &RouteChain,
    ) -> Result<RouteOutcome, RoutingError> {
        if chain.contains(capability) {
            self.publish_rejected(chain, capability, "circular capability chain");
            return Err(RoutingError::CircularDependency {
                capability: capability.to_string(),
                chain: chain.visited.clone(),
            });
        }

        if chain.hop_count >= self.config.max_hops {
            self.publish_rejected(chain, capability, "max hops exceeded");
            return Err(RoutingError::MaxHopsExceeded {
                hops: chain.hop_count,
                max: self.config.max_hops,
            });
        }

        let candidate = self
            .registry
            .find_by_capability(capability)
            .into_iter()
            .find(|a| !a.is_saturated());
        let Some(agent) = candidate else {
            self.publish_rejected(chain, capability, "no eligible agent");
            return Err(RoutingError::NoAgentAvailable {
                capability: capability.to_string(),
            });
        };

        // Breaker gate, in a short scope so the map guard is not held
        // across the call below.
        let allowed = {
            let mut breaker = self
                .breakers
                .entry(capability.to_string())
                .or_insert_with(|| {
                    CapabilityBreaker::new(capability, &self.config.circuit_breaker)
                });
            breaker.allow_request()
        };
        if !allowed {
            self.publish_rejected(chain, capability, "circuit open");
            return Err(RoutingError::NoAgentAvailable {
                capability: capability.to_string(),
            });
        }

        tracing::debug!(
            request_id = %chain.request_id,
            capability,
            agent_id = agent.agent_id.as_str(),
            hop = chain.hop_count,
            "routing request"
        );

        self.registry.record_dispatch(&agent.agent_id);
        let result = self
            .invoker
            .invoke(&agent.agent_id, capability, &payload)
            .await;
        self.registry.record_completion(&agent.agent_id);

        match result {
            Ok(output) => {
                if let Some(mut breaker) = self.breakers.get_mut(capability) {
                    breaker.record_success();
                }
                self.registry
                    .update_health(&agent.agent_id, AgentHealth::Healthy);
                self.event_bus.publish(EngineEvent::MeshRouted {
                    request_id: chain.request_id,
                    capability: capability.to_string(),
                    agent_id: agent.agent_id.clone(),
                    hop_count: chain.hop_count,
                });
                Ok(RouteOutcome {
                    agent_id: agent.agent_id,
                    output,
                })
            }
            Err(e) => {
                if let Some(mut breaker) = self.breakers.get_mut(capability) {
                    breaker.record_failure(&e.to_string());
                }
                self.registry
                    .update_health(&agent.agent_id, AgentHealth::Degraded);
                self.publish_rejected(chain, capability, &e.to_string());
                Err(RoutingError::Invoke(e))
            }
        }
    }

    fn publish_rejected(&self, chain: &RouteChain, capability: &str, reason: &str) {
        self.event_bus.publish(EngineEvent::MeshRejected {
            request_id: chain.request_id,
            capability: capability.to_string(),
            reason: reason.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Capability mesh: demand-driven routing across capability-declaring agents.
//!
//! The alternate execution mode for workflows whose next step is not known
//! ahead of time. Agents register capabilities; requests are routed to the
//! least-loaded eligible agent, with per-capability circuit breaking,
//! hop-count limiting, and capability-chain cycle rejection.
//!
//! - `registry` -- agent discovery, health, and load tracking
//! - `breaker` -- per-capability circuit breaker
//! - `router` -- the routing decision itself

pub mod breaker;
pub mod registry;
pub mod router;

pub use breaker::{CapabilityBreaker, CircuitState};
pub use registry::AgentRegistry;
pub use router::{CapabilityInvoker, MeshRouter, RouteChain, RouteOutcome, RoutingError};

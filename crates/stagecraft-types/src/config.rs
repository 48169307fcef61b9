//! Engine configuration surface for Stagecraft.
//!
//! Owned externally (loaded from `config.toml` by the infrastructure layer)
//! and consumed by the engine and mesh router. Every field has a default so
//! a missing or partial file still yields a usable configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for the job execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum jobs running concurrently.
    pub max_concurrent_jobs: usize,
    /// How many submissions the queue buffers beyond the running set.
    pub queue_capacity: usize,
    /// Per-stage cap on concurrently executing steps.
    pub max_parallel_steps_per_stage: usize,
    /// Default per-step attempt bound, and the bound on whole-job retries.
    pub max_retries: u32,
    /// Base delay for exponential step backoff.
    pub retry_base_delay_ms: u64,
    /// Cap on the exponential step backoff.
    pub retry_max_delay_ms: u64,
    /// How many checkpoints to keep per job after each stage.
    pub checkpoint_retention_count: usize,
    /// Mesh router configuration.
    pub mesh: MeshConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            queue_capacity: 64,
            max_parallel_steps_per_stage: 4,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            checkpoint_retention_count: 10,
            mesh: MeshConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// MeshConfig
// ---------------------------------------------------------------------------

/// Configuration for the capability mesh router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Ceiling on routed-request chain length.
    pub max_hops: u32,
    /// Per-capability circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_hops: 10,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Circuit breaker tuning, per capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing one trial call.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Execution bounds for function bodies
//!
//! Every invocation runs under a wall-clock [`Deadline`]. Each runtime
//! additionally enforces its own host-side bound: the Lua runtime checks
//! the deadline from an instruction-count hook, the Wasm runtime burns fuel
//! and is interrupted by epoch ticks.

use std::time::{Duration, Instant};

/// Resource limits applied to every invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Wall-clock budget per invocation (default: 1s)
    pub timeout: Duration,

    /// Memory cap per Lua state or Wasm store (default: 16MB)
    pub memory_limit_bytes: usize,

    /// Lua instructions between deadline checks (default: 1000)
    pub lua_hook_interval: u32,

    /// Wasm fuel budget per invocation (default: 500M units)
    pub wasm_fuel: u64,

    /// Period of the Wasm epoch ticker (default: 10ms)
    pub wasm_epoch_tick: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            timeout: Duration::from_millis(1000),
            memory_limit_bytes: 16 * 1024 * 1024, // 16MB
            lua_hook_interval: 1000,
            wasm_fuel: 500_000_000,
            wasm_epoch_tick: Duration::from_millis(10),
        }
    }
}

impl SandboxLimits {
    /// Limits with a different timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Wall-clock deadline of one invocation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// True once the budget is spent
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    /// Milliseconds since the invocation started
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

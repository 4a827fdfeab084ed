#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of parallel machine queues per agent.
pub const NUM_QUEUES: usize = 3;

/// Depth cap of a machine's state history stack; the oldest entry is evicted
/// on overflow.
pub const MAX_STATE_STACK: usize = 10;

/// Safety bound on chained state (or machine) changes applied after a single
/// event. Exceeding it means handlers are flip-flopping.
pub const MAX_STATE_CHANGES: usize = 20;

/// Runtime tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Minimum positive delay meaning "next tick". All non-`now` self-sends
    /// are clamped up to this.
    pub one_frame: f32,

    /// Seed for the per-machine deterministic RNG streams.
    pub seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            one_frame: default_one_frame(),
            seed: 0,
        }
    }
}

fn default_one_frame() -> f32 {
    1.0e-4
}

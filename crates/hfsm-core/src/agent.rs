#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identifier for an agent.
///
/// Ids are process-unique and never reused within a run. `AgentId::NONE` is
/// reserved for "no agent" (e.g. the sender of harness-injected messages);
/// live ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AgentId(pub u32);

impl AgentId {
    pub const NONE: AgentId = AgentId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Stable numeric id for seeding and logs.
    pub fn stable_id(self) -> u64 {
        self.0 as u64
    }
}

/// Coarse agent category used for broadcast targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AgentKind(pub u32);

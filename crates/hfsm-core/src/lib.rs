//! Hierarchical state machines with scoped, delayed message routing.
//!
//! Each agent owns a bank of parallel queues, each queue a stack of state
//! machines, each machine a current state and optional substate. All
//! communication, whether between agents, within a machine, or across time,
//! flows through one message router that understands scope (machine / state /
//! substate lifetime) and delay. Scope counters bumped on every transition
//! silently invalidate in-flight messages the departed state was expecting.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod agent;
pub mod clock;
pub mod config;
pub mod ctx;
pub mod machine;
pub mod manager;
pub mod message;
pub mod registry;
pub mod rng;
pub mod router;
pub mod runtime;
pub mod trace;
pub mod vars;

pub use agent::{AgentId, AgentKind};
pub use clock::Clock;
pub use config::{RuntimeConfig, MAX_STATE_CHANGES, MAX_STATE_STACK, NUM_QUEUES};
pub use ctx::MachineCtx;
pub use machine::{Behavior, Event, MachineCore, On};
pub use manager::MachineManager;
pub use message::{
    Message, MsgData, MsgName, QueueId, QueueTarget, ScopeRule, MSG_CHANGE_STATE_DELAYED,
    MSG_CHANGE_SUBSTATE_DELAYED,
};
pub use registry::{AgentEntry, Registry};
pub use rng::{derive_seed, DeterministicRng, SplitMix64};
pub use router::MessageRouter;
pub use runtime::Runtime;
pub use trace::{NullTraceSink, TraceEvent, TraceSink};
pub use vars::{Value, VarScope};

use thiserror::Error;

/// Errors from host-facing runtime operations. Handler verbs never return
/// errors; their misuses are debug assertions absorbed in release.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("unknown agent {0:?}")]
    UnknownAgent(AgentId),

    #[error("agent {0:?} is marked for deletion")]
    AgentDeleted(AgentId),

    #[error("queue index {0} out of bounds")]
    QueueOutOfBounds(usize),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

use std::borrow::Cow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// A small, allocation-friendly trace event.
///
/// The runtime emits one per applied state change and machine stack change;
/// sinks decide what to do with them. This is intentionally "dumb data" so it
/// can be recorded during simulation and rendered later by tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceEvent {
    pub tick: u64,
    pub tag: Cow<'static, str>,
    pub agent: AgentId,
    pub a: i64,
    pub b: i64,
}

impl TraceEvent {
    pub fn new(tick: u64, tag: impl Into<Cow<'static, str>>, agent: AgentId) -> Self {
        Self {
            tick,
            tag: tag.into(),
            agent,
            a: 0,
            b: 0,
        }
    }

    pub fn with_a(mut self, a: i64) -> Self {
        self.a = a;
        self
    }

    pub fn with_b(mut self, b: i64) -> Self {
        self.b = b;
        self
    }
}

/// Debug log seam. The runtime never requires a real sink.
pub trait TraceSink {
    fn emit(&mut self, event: TraceEvent);
}

#[derive(Debug, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn emit(&mut self, _event: TraceEvent) {}
}

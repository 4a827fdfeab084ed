use crate::agent::AgentId;
use crate::config::NUM_QUEUES;

/// Name of a message, an interned-string key.
///
/// User code defines its vocabulary as constants:
///
/// ```
/// use hfsm_core::MsgName;
/// const MSG_ARRIVED: MsgName = MsgName("arrived");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgName(pub &'static str);

/// Self-message that applies a deferred state change on delivery. Handled by
/// the runtime before user dispatch; the payload carries the target state.
pub const MSG_CHANGE_STATE_DELAYED: MsgName = MsgName("hfsm.change_state_delayed");

/// Self-message that applies a deferred substate change on delivery.
pub const MSG_CHANGE_SUBSTATE_DELAYED: MsgName = MsgName("hfsm.change_substate_delayed");

/// Message payload. Timers reuse the `Float` slot to carry their period.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MsgData {
    #[default]
    None,
    Int(i32),
    Float(f32),
    Bool(bool),
    Agent(AgentId),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

impl MsgData {
    pub fn as_int(self) -> Option<i32> {
        match self {
            MsgData::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f32> {
        match self {
            MsgData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            MsgData::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_agent(self) -> Option<AgentId> {
        match self {
            MsgData::Agent(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec2(self) -> Option<[f32; 2]> {
        match self {
            MsgData::Vec2(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3(self) -> Option<[f32; 3]> {
        match self {
            MsgData::Vec3(v) => Some(v),
            _ => None,
        }
    }
}

/// How long an in-flight message stays deliverable across transitions of the
/// receiving machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeRule {
    /// Valid while the receiver still has a machine on the target queue.
    Machine,
    /// Additionally requires the state not to have changed since send.
    State,
    /// Additionally requires the substate not to have changed since send.
    Substate,
}

/// One slot in an agent's parallel queue bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub usize);

impl QueueId {
    pub fn is_valid(self) -> bool {
        self.0 < NUM_QUEUES
    }
}

/// Target queue(s) of a message on the receiving agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTarget {
    One(QueueId),
    All,
}

/// An in-flight message.
///
/// `scope` is the sending machine's `scope_state`/`scope_substate` counter
/// captured at send time; the router compares it against the receiver's
/// current counter at delivery and silently drops the message on mismatch.
#[derive(Debug, Clone)]
pub struct Message {
    pub name: MsgName,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub rule: ScopeRule,
    pub scope: u32,
    pub queue: QueueTarget,
    pub data: MsgData,
    /// Absolute clock time at which the message becomes due.
    pub deliver_at: f64,
    /// Periodic timer: re-armed by the router after each successful delivery.
    pub timer: bool,
    /// Tracing copy of a message another machine processed.
    pub cc: bool,
}

use std::any::Any;

use crate::agent::{AgentId, AgentKind};
use crate::config::NUM_QUEUES;
use crate::machine::{Behavior, DispatchEnv, MachineCore, On};
use crate::message::{
    Message, MsgData, MsgName, QueueId, QueueTarget, ScopeRule, MSG_CHANGE_STATE_DELAYED,
    MSG_CHANGE_SUBSTATE_DELAYED,
};
use crate::rng::DeterministicRng;
use crate::trace::TraceEvent;
use crate::vars::{Value, VarScope};

/// A machine-level change requested by a handler, applied by the manager on
/// the next update cycle.
pub(crate) enum ChangeKind<W> {
    Reset,
    Replace(Box<dyn Behavior<W>>),
    Queue(Box<dyn Behavior<W>>),
    Requeue,
    Push(Box<dyn Behavior<W>>),
    Pop,
}

pub(crate) enum MachineOp<W> {
    Request { queue: QueueId, change: ChangeKind<W> },
    DeleteQueue(QueueTarget),
}

pub(crate) struct BroadcastRequest {
    pub name: MsgName,
    pub kind: AgentKind,
    pub data: MsgData,
    pub sender: AgentId,
}

/// Side effects emitted by handlers during a dispatch, drained by the manager
/// (machine ops) and the runtime (sends, broadcasts, trace) after the handler
/// returns. This replaces the global router/registry calls of a singleton
/// design with plain data flow.
pub(crate) struct Effects<W> {
    pub sends: Vec<Message>,
    pub stops: Vec<(MsgName, AgentId)>,
    pub broadcasts: Vec<BroadcastRequest>,
    pub machine_ops: Vec<MachineOp<W>>,
    pub trace: Vec<TraceEvent>,
}

impl<W> Effects<W> {
    pub fn new() -> Self {
        Self {
            sends: Vec::new(),
            stops: Vec::new(),
            broadcasts: Vec::new(),
            machine_ops: Vec::new(),
            trace: Vec::new(),
        }
    }
}

/// The runtime surface handlers call from inside the transition function:
/// transition requests, every send/broadcast/timer variant, scoped variables,
/// and introspection of the machine being dispatched.
pub struct MachineCtx<'a, W> {
    core: &'a mut MachineCore,
    fx: &'a mut Effects<W>,
    env: DispatchEnv,
}

impl<'a, W> MachineCtx<'a, W> {
    pub(crate) fn new(core: &'a mut MachineCore, fx: &'a mut Effects<W>, env: DispatchEnv) -> Self {
        Self { core, fx, env }
    }

    // --- probe -----------------------------------------------------------

    /// Reports, during `Probe`, which handlers exist at the rung being
    /// probed. Calling it outside a `Probe` dispatch is an error.
    pub fn declare(&mut self, handlers: &[On]) {
        let Some(level) = self.core.probe_level else {
            debug_assert!(false, "declare() is only valid during a Probe dispatch");
            return;
        };
        for on in handlers {
            self.core.registered.set(*on, level);
        }
    }

    // --- transitions -----------------------------------------------------

    /// Requests a state change, applied once the current handler returns.
    pub fn change_state(&mut self, state: u32) {
        self.core.request_change_state(state);
    }

    /// Requests a substate change within the current state.
    pub fn change_substate(&mut self, substate: u32) {
        self.core.request_change_substate(substate);
    }

    /// Requests a state change at `delay` seconds in the future. Dropped
    /// silently if the state changes before the delay elapses.
    pub fn change_state_delayed(&mut self, delay: f32, state: u32) {
        debug_assert!(self.core.change_allowed, "state change not allowed in an exit handler");
        debug_assert!(delay > 0.0, "delay must be positive");
        if self.core.change_allowed && delay > 0.0 {
            self.core.delayed_state_queued = true;
            let queue = self.core.queue;
            self.send_to_me(
                delay,
                MSG_CHANGE_STATE_DELAYED,
                ScopeRule::State,
                QueueTarget::One(queue),
                MsgData::Int(state as i32),
                false,
            );
        }
    }

    /// Requests a substate change at `delay` seconds in the future. Dropped
    /// silently if the substate changes before the delay elapses.
    pub fn change_substate_delayed(&mut self, delay: f32, substate: u32) {
        debug_assert!(self.core.change_allowed, "substate change not allowed in an exit handler");
        debug_assert!(delay > 0.0, "delay must be positive");
        if self.core.change_allowed && delay > 0.0 {
            self.core.delayed_substate_queued = true;
            let queue = self.core.queue;
            self.send_to_me(
                delay,
                MSG_CHANGE_SUBSTATE_DELAYED,
                ScopeRule::Substate,
                QueueTarget::One(queue),
                MsgData::Int(substate as i32),
                false,
            );
        }
    }

    /// Requests a pop back to the previous state on the history stack.
    pub fn pop_state(&mut self) {
        self.core.request_pop();
    }

    pub fn delayed_state_change_queued(&self) -> bool {
        self.core.delayed_state_queued
    }

    pub fn delayed_substate_change_queued(&self) -> bool {
        self.core.delayed_substate_queued
    }

    // --- machine-level changes -------------------------------------------

    /// Requests that this machine be reinitialized on the next update cycle.
    pub fn reset_machine(&mut self) {
        self.request_machine_change(ChangeKind::Reset);
    }

    /// Requests that this machine be replaced by `behavior` on the next
    /// update cycle. The replaced machine is destroyed.
    pub fn replace_machine(&mut self, behavior: Box<dyn Behavior<W>>) {
        self.request_machine_change(ChangeKind::Replace(behavior));
    }

    /// Requests that `behavior` be inserted just above the queue's default
    /// machine, dormant until promoted.
    pub fn queue_machine(&mut self, behavior: Box<dyn Behavior<W>>) {
        self.request_machine_change(ChangeKind::Queue(behavior));
    }

    /// Requests that this machine move just above the queue's default machine
    /// and the one beneath it become active.
    pub fn requeue_machine(&mut self) {
        self.request_machine_change(ChangeKind::Requeue);
    }

    /// Requests that `behavior` be pushed on top of this queue and become the
    /// active machine.
    pub fn push_machine(&mut self, behavior: Box<dyn Behavior<W>>) {
        self.request_machine_change(ChangeKind::Push(behavior));
    }

    /// Requests that this machine be popped and destroyed, activating the one
    /// beneath it. The bottom machine of a queue is never popped.
    pub fn pop_machine(&mut self) {
        self.request_machine_change(ChangeKind::Pop);
    }

    /// Drops every machine in the given queue(s).
    pub fn delete_machine_queue(&mut self, target: QueueTarget) {
        self.fx.machine_ops.push(MachineOp::DeleteQueue(target));
    }

    fn request_machine_change(&mut self, change: ChangeKind<W>) {
        let queue = self.core.queue;
        self.fx.machine_ops.push(MachineOp::Request { queue, change });
    }

    // --- directed sends --------------------------------------------------

    /// Sends a message to another agent, delivered next tick.
    pub fn send_msg(&mut self, name: MsgName, receiver: AgentId, data: MsgData) {
        debug_assert!(
            receiver != self.core.owner,
            "use the scoped self-send forms to message your own state machine"
        );
        if receiver != self.core.owner {
            self.send_external(self.env.one_frame, name, receiver, data);
        }
    }

    /// Sends a message to another agent within the current tick.
    pub fn send_msg_now(&mut self, name: MsgName, receiver: AgentId, data: MsgData) {
        debug_assert!(
            receiver != self.core.owner,
            "use the scoped self-send forms to message your own state machine"
        );
        if receiver != self.core.owner {
            self.send_external(0.0, name, receiver, data);
        }
    }

    /// Sends a message to another agent at `delay` seconds in the future.
    pub fn send_msg_delayed(&mut self, delay: f32, name: MsgName, receiver: AgentId, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_msg otherwise");
        debug_assert!(
            receiver != self.core.owner,
            "use the scoped self-send forms to message your own state machine"
        );
        if delay > 0.0 && receiver != self.core.owner {
            self.send_external(delay, name, receiver, data);
        }
    }

    // --- scoped self-sends -----------------------------------------------

    /// Self-message next tick, valid as long as the substate doesn't change.
    pub fn send_to_substate(&mut self, name: MsgName, data: MsgData) {
        let queue = self.core.queue;
        self.send_to_me(self.env.one_frame, name, ScopeRule::Substate, QueueTarget::One(queue), data, false);
    }

    /// Self-message next tick, valid as long as the state doesn't change.
    pub fn send_to_state(&mut self, name: MsgName, data: MsgData) {
        let queue = self.core.queue;
        self.send_to_me(self.env.one_frame, name, ScopeRule::State, QueueTarget::One(queue), data, false);
    }

    /// Self-message next tick, valid across state changes.
    pub fn send_to_machine(&mut self, name: MsgName, data: MsgData) {
        let queue = self.core.queue;
        self.send_to_me(self.env.one_frame, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
    }

    /// Self-message within the current tick. Beware of state change
    /// paradoxes: the sending handler's state may no longer be current.
    pub fn send_to_machine_now(&mut self, name: MsgName, data: MsgData) {
        let queue = self.core.queue;
        self.send_to_me(0.0, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
    }

    pub fn send_delayed_to_substate(&mut self, delay: f32, name: MsgName, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_to_substate otherwise");
        if delay > 0.0 {
            let queue = self.core.queue;
            self.send_to_me(delay, name, ScopeRule::Substate, QueueTarget::One(queue), data, false);
        }
    }

    pub fn send_delayed_to_state(&mut self, delay: f32, name: MsgName, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_to_state otherwise");
        if delay > 0.0 {
            let queue = self.core.queue;
            self.send_to_me(delay, name, ScopeRule::State, QueueTarget::One(queue), data, false);
        }
    }

    pub fn send_delayed_to_machine(&mut self, delay: f32, name: MsgName, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_to_machine otherwise");
        if delay > 0.0 {
            let queue = self.core.queue;
            self.send_to_me(delay, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
        }
    }

    // --- cross-queue self-sends ------------------------------------------

    /// Message to the machine on another of this agent's queues, next tick.
    pub fn send_to_queue(&mut self, name: MsgName, queue: QueueId, data: MsgData) {
        if self.check_other_queue(queue) {
            self.send_to_me(self.env.one_frame, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
        }
    }

    pub fn send_to_queue_now(&mut self, name: MsgName, queue: QueueId, data: MsgData) {
        if self.check_other_queue(queue) {
            self.send_to_me(0.0, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
        }
    }

    pub fn send_delayed_to_queue(&mut self, delay: f32, name: MsgName, queue: QueueId, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_to_queue otherwise");
        if delay > 0.0 && self.check_other_queue(queue) {
            self.send_to_me(delay, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
        }
    }

    /// Message to every queue this agent owns (including this one), next tick.
    pub fn send_to_all_queues(&mut self, name: MsgName, data: MsgData) {
        self.send_to_me(self.env.one_frame, name, ScopeRule::Machine, QueueTarget::All, data, false);
    }

    pub fn send_to_all_queues_now(&mut self, name: MsgName, data: MsgData) {
        self.send_to_me(0.0, name, ScopeRule::Machine, QueueTarget::All, data, false);
    }

    pub fn send_delayed_to_all_queues(&mut self, delay: f32, name: MsgName, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_to_all_queues otherwise");
        if delay > 0.0 {
            self.send_to_me(delay, name, ScopeRule::Machine, QueueTarget::All, data, false);
        }
    }

    /// Message to every queue this agent owns except this one, next tick.
    pub fn send_to_all_other_queues(&mut self, name: MsgName, data: MsgData) {
        self.fan_to_other_queues(self.env.one_frame, name, data);
    }

    pub fn send_to_all_other_queues_now(&mut self, name: MsgName, data: MsgData) {
        self.fan_to_other_queues(0.0, name, data);
    }

    pub fn send_delayed_to_all_other_queues(&mut self, delay: f32, name: MsgName, data: MsgData) {
        debug_assert!(delay > 0.0, "delay must be positive, use send_to_all_other_queues otherwise");
        if delay > 0.0 {
            self.fan_to_other_queues(delay, name, data);
        }
    }

    fn fan_to_other_queues(&mut self, delay: f32, name: MsgName, data: MsgData) {
        for q in 0..NUM_QUEUES {
            let queue = QueueId(q);
            if queue != self.core.queue {
                self.send_to_me(delay, name, ScopeRule::Machine, QueueTarget::One(queue), data, false);
            }
        }
    }

    fn check_other_queue(&self, queue: QueueId) -> bool {
        debug_assert!(queue != self.core.queue, "use send_to_machine for your own queue");
        debug_assert!(queue.is_valid(), "queue index out of bounds");
        queue != self.core.queue && queue.is_valid()
    }

    // --- broadcast -------------------------------------------------------

    /// Broadcast to every registered agent of `kind`, excluding the sender,
    /// within the current tick.
    pub fn broadcast_now(&mut self, name: MsgName, kind: AgentKind, data: MsgData) {
        self.fx.broadcasts.push(BroadcastRequest {
            name,
            kind,
            data,
            sender: self.core.owner,
        });
    }

    /// Broadcast to the machine's composed recipient list, next tick.
    pub fn broadcast_to_list(&mut self, name: MsgName, data: MsgData) {
        self.fan_to_list(self.env.one_frame, name, data);
    }

    /// Broadcast to the machine's composed recipient list within this tick.
    pub fn broadcast_to_list_now(&mut self, name: MsgName, data: MsgData) {
        self.fan_to_list(0.0, name, data);
    }

    fn fan_to_list(&mut self, delay: f32, name: MsgName, data: MsgData) {
        debug_assert!(!self.core.broadcast_list.is_empty(), "broadcast list is empty");
        let me = self.core.owner;
        for i in 0..self.core.broadcast_list.len() {
            let id = self.core.broadcast_list[i];
            if id != me {
                self.send_external(delay, name, id, data);
            }
        }
    }

    pub fn broadcast_add(&mut self, id: AgentId) {
        self.core.broadcast_list.push(id);
    }

    pub fn broadcast_clear(&mut self) {
        self.core.broadcast_list.clear();
    }

    // --- timers ----------------------------------------------------------

    /// Periodic self-message, re-armed on each delivery while the substate
    /// doesn't change. Delays below one frame are clamped up.
    pub fn set_timer_substate(&mut self, delay: f32, name: MsgName) {
        let delay = delay.max(self.env.one_frame);
        let queue = self.core.queue;
        self.send_to_me(delay, name, ScopeRule::Substate, QueueTarget::One(queue), MsgData::Float(delay), true);
    }

    /// Periodic self-message, re-armed on each delivery while the state
    /// doesn't change.
    pub fn set_timer_state(&mut self, delay: f32, name: MsgName) {
        let delay = delay.max(self.env.one_frame);
        let queue = self.core.queue;
        self.send_to_me(delay, name, ScopeRule::State, QueueTarget::One(queue), MsgData::Float(delay), true);
    }

    /// Periodic self-message, re-armed on each delivery regardless of state
    /// or substate changes.
    pub fn set_timer_machine(&mut self, delay: f32, name: MsgName) {
        let delay = delay.max(self.env.one_frame);
        let queue = self.core.queue;
        self.send_to_me(delay, name, ScopeRule::Machine, QueueTarget::One(queue), MsgData::Float(delay), true);
    }

    /// Purges pending self-addressed timer messages with this name.
    pub fn stop_timer(&mut self, name: MsgName) {
        self.fx.stops.push((name, self.core.owner));
    }

    // --- CC --------------------------------------------------------------

    /// Configures an agent to receive a tracing copy of every message this
    /// machine processes. `None` disables.
    pub fn set_cc_receiver(&mut self, receiver: Option<AgentId>) {
        self.core.cc_receiver = receiver;
    }

    pub fn cc_receiver(&self) -> Option<AgentId> {
        self.core.cc_receiver
    }

    // --- state variables --------------------------------------------------

    /// Grows the slot vector of `scope` to include `id`.
    pub fn declare_var(&mut self, id: usize, scope: VarScope) {
        self.table_mut(scope).declare(id);
    }

    pub fn set_int(&mut self, id: usize, scope: VarScope, value: i32) {
        self.table_mut(scope).set(id, Value::Int(value));
    }

    pub fn get_int(&self, id: usize, scope: VarScope) -> Option<i32> {
        match self.table(scope).get(id)? {
            Value::Int(v) => Some(*v),
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    pub fn set_float(&mut self, id: usize, scope: VarScope, value: f32) {
        self.table_mut(scope).set(id, Value::Float(value));
    }

    pub fn get_float(&self, id: usize, scope: VarScope) -> Option<f32> {
        match self.table(scope).get(id)? {
            Value::Float(v) => Some(*v),
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    pub fn set_bool(&mut self, id: usize, scope: VarScope, value: bool) {
        self.table_mut(scope).set(id, Value::Bool(value));
    }

    pub fn get_bool(&self, id: usize, scope: VarScope) -> Option<bool> {
        match self.table(scope).get(id)? {
            Value::Bool(v) => Some(*v),
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    pub fn set_agent(&mut self, id: usize, scope: VarScope, value: AgentId) {
        self.table_mut(scope).set(id, Value::Agent(value));
    }

    pub fn get_agent(&self, id: usize, scope: VarScope) -> Option<AgentId> {
        match self.table(scope).get(id)? {
            Value::Agent(v) => Some(*v),
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    pub fn set_vec2(&mut self, id: usize, scope: VarScope, value: [f32; 2]) {
        self.table_mut(scope).set(id, Value::Vec2(value));
    }

    pub fn get_vec2(&self, id: usize, scope: VarScope) -> Option<[f32; 2]> {
        match self.table(scope).get(id)? {
            Value::Vec2(v) => Some(*v),
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    pub fn set_vec3(&mut self, id: usize, scope: VarScope, value: [f32; 3]) {
        self.table_mut(scope).set(id, Value::Vec3(value));
    }

    pub fn get_vec3(&self, id: usize, scope: VarScope) -> Option<[f32; 3]> {
        match self.table(scope).get(id)? {
            Value::Vec3(v) => Some(*v),
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    /// Stores a type-erased value; the reader downcasts with [`Self::get_data`].
    pub fn set_data(&mut self, id: usize, scope: VarScope, value: Box<dyn Any>) {
        self.table_mut(scope).set(id, Value::Data(value));
    }

    pub fn get_data<T: 'static>(&self, id: usize, scope: VarScope) -> Option<&T> {
        match self.table(scope).get(id)? {
            Value::Data(v) => {
                let downcast = v.downcast_ref::<T>();
                debug_assert!(downcast.is_some(), "variable {id} read with the wrong type");
                downcast
            }
            _ => {
                debug_assert!(false, "variable {id} read with the wrong type");
                None
            }
        }
    }

    fn table(&self, scope: VarScope) -> &crate::vars::VarTable {
        match scope {
            VarScope::State => &self.core.state_vars,
            VarScope::Substate => &self.core.substate_vars,
        }
    }

    fn table_mut(&mut self, scope: VarScope) -> &mut crate::vars::VarTable {
        match scope {
            VarScope::State => &mut self.core.state_vars,
            VarScope::Substate => &mut self.core.substate_vars,
        }
    }

    // --- introspection ---------------------------------------------------

    pub fn agent(&self) -> AgentId {
        self.core.owner
    }

    pub fn queue(&self) -> QueueId {
        self.core.queue
    }

    pub fn state(&self) -> u32 {
        self.core.current_state
    }

    pub fn substate(&self) -> Option<u32> {
        self.core.current_substate
    }

    pub fn now(&self) -> f64 {
        self.env.now
    }

    pub fn tick(&self) -> u64 {
        self.env.tick
    }

    /// Seconds spent in the current state.
    pub fn time_in_state(&self) -> f64 {
        self.env.now - self.core.time_on_enter_state
    }

    /// Seconds spent in the current substate.
    pub fn time_in_substate(&self) -> f64 {
        self.env.now - self.core.time_on_enter_substate
    }

    /// Update ticks dispatched since the last transition.
    pub fn update_iteration(&self) -> u32 {
        self.core.update_iteration
    }

    /// Number of machines stacked on this machine's queue.
    pub fn machines_in_queue(&self) -> usize {
        self.env.queue_len
    }

    /// Uniform random delay in `[min, max]` from the machine's deterministic
    /// stream.
    pub fn rand_delay(&mut self, min: f32, max: f32) -> f32 {
        debug_assert!(min >= 0.0, "min must be >= 0");
        debug_assert!(min <= max, "min must be <= max");
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        min + self.core.rng.next_f32_unit() * (max - min)
    }

    // --- plumbing --------------------------------------------------------

    fn send_to_me(
        &mut self,
        delay: f32,
        name: MsgName,
        rule: ScopeRule,
        queue: QueueTarget,
        data: MsgData,
        timer: bool,
    ) {
        let scope = self.core.scope_for(rule);
        let me = self.core.owner;
        self.fx.sends.push(Message {
            name,
            sender: me,
            receiver: me,
            rule,
            scope,
            queue,
            data,
            deliver_at: self.env.now + delay.max(0.0) as f64,
            timer,
            cc: false,
        });
    }

    fn send_external(&mut self, delay: f32, name: MsgName, receiver: AgentId, data: MsgData) {
        self.fx.sends.push(Message {
            name,
            sender: self.core.owner,
            receiver,
            rule: ScopeRule::Machine,
            scope: 0,
            queue: QueueTarget::All,
            data,
            deliver_at: self.env.now + delay.max(0.0) as f64,
            timer: false,
            cc: false,
        });
    }
}

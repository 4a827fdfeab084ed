use std::collections::VecDeque;

use crate::agent::AgentId;
use crate::config::{MAX_STATE_CHANGES, MAX_STATE_STACK};
use crate::ctx::{Effects, MachineCtx};
use crate::message::{
    Message, QueueId, QueueTarget, ScopeRule, MSG_CHANGE_STATE_DELAYED,
    MSG_CHANGE_SUBSTATE_DELAYED,
};
use crate::rng::{derive_seed, SplitMix64};
use crate::trace::TraceEvent;
use crate::vars::VarTable;

/// Events dispatched through a machine's transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Issued before each `Enter` to discover which handlers exist for the
    /// new `(state, substate)`. Handler bodies must not run.
    Probe,
    Enter,
    Exit,
    Update,
    Message,
}

/// Handler kinds a behavior can declare during `Probe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum On {
    Enter,
    Exit,
    Update,
}

/// Which of `{Enter, Exit, Update} x {Machine, State, Substate}` handlers the
/// current `(state, substate)` declares. Populated by `Probe`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RegisteredEvents(u16);

impl RegisteredEvents {
    fn bit(on: On, level: ScopeRule) -> u16 {
        let on = match on {
            On::Enter => 0,
            On::Exit => 1,
            On::Update => 2,
        };
        let level = match level {
            ScopeRule::Machine => 0,
            ScopeRule::State => 1,
            ScopeRule::Substate => 2,
        };
        1 << (on * 3 + level)
    }

    pub fn set(&mut self, on: On, level: ScopeRule) {
        self.0 |= Self::bit(on, level);
    }

    pub fn contains(self, on: On, level: ScopeRule) -> bool {
        self.0 & Self::bit(on, level) != 0
    }

    pub fn any(self, on: On) -> bool {
        self.contains(on, ScopeRule::Machine)
            || self.contains(on, ScopeRule::State)
            || self.contains(on, ScopeRule::Substate)
    }

    /// Bits surviving a state-level change: machine-level only.
    pub fn machine_bits(self) -> Self {
        let mask = Self::bit(On::Enter, ScopeRule::Machine)
            | Self::bit(On::Exit, ScopeRule::Machine)
            | Self::bit(On::Update, ScopeRule::Machine);
        Self(self.0 & mask)
    }

    /// Bits surviving a substate-only change: machine and state levels.
    pub fn machine_and_state_bits(self) -> Self {
        let mask = !(Self::bit(On::Enter, ScopeRule::Substate)
            | Self::bit(On::Exit, ScopeRule::Substate)
            | Self::bit(On::Update, ScopeRule::Substate));
        Self(self.0 & mask)
    }
}

/// A requested transition, applied after the requesting handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingChange {
    Change { state: u32, substate: Option<u32> },
    Pop,
}

/// Per-dispatch environment snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchEnv {
    pub now: f64,
    pub tick: u64,
    pub one_frame: f32,
    pub seed: u64,
    pub queue_len: usize,
}

impl DispatchEnv {
    pub fn with_queue_len(mut self, len: usize) -> Self {
        self.queue_len = len;
        self
    }
}

/// The user-supplied transition function of a machine.
///
/// The runtime walks three query rungs per event, `(state, substate)` then
/// `(state, -1)` then `(-1, -1)`, stopping at the first that returns `true`.
/// `-1` is the global/none sentinel. For `Probe` the behavior must report
/// handler presence with [`MachineCtx::declare`] for the rung being probed
/// instead of running handler bodies.
pub trait Behavior<W>: 'static {
    fn states(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        state: i32,
        substate: i32,
        ctx: &mut MachineCtx<'_, W>,
        world: &mut W,
    ) -> bool;
}

/// Bookkeeping of one state machine instance: current state/substate, scope
/// counters, declared handlers, pending transition, scoped variables.
#[derive(Debug)]
pub struct MachineCore {
    pub(crate) owner: AgentId,
    pub(crate) queue: QueueId,
    pub(crate) current_state: u32,
    pub(crate) current_substate: Option<u32>,
    pub(crate) scope_state: u32,
    pub(crate) scope_substate: u32,
    pub(crate) registered: RegisteredEvents,
    pub(crate) change: Option<PendingChange>,
    pub(crate) change_allowed: bool,
    pub(crate) delayed_state_queued: bool,
    pub(crate) delayed_substate_queued: bool,
    pub(crate) update_iteration: u32,
    pub(crate) state_stack: VecDeque<u32>,
    pub(crate) state_vars: VarTable,
    pub(crate) substate_vars: VarTable,
    pub(crate) time_on_enter_state: f64,
    pub(crate) time_on_enter_substate: f64,
    pub(crate) broadcast_list: Vec<AgentId>,
    pub(crate) cc_receiver: Option<AgentId>,
    pub(crate) probe_level: Option<ScopeRule>,
    pub(crate) rng: SplitMix64,
}

impl MachineCore {
    fn new(owner: AgentId, queue: QueueId, seed: u64) -> Self {
        Self {
            owner,
            queue,
            current_state: 0,
            current_substate: None,
            scope_state: 0,
            scope_substate: 0,
            registered: RegisteredEvents::default(),
            change: None,
            change_allowed: true,
            delayed_state_queued: false,
            delayed_substate_queued: false,
            update_iteration: 0,
            state_stack: VecDeque::new(),
            state_vars: VarTable::default(),
            substate_vars: VarTable::default(),
            time_on_enter_state: 0.0,
            time_on_enter_substate: 0.0,
            broadcast_list: Vec::new(),
            cc_receiver: None,
            probe_level: None,
            rng: SplitMix64::new(derive_seed(seed, owner.stable_id(), queue.0 as u64)),
        }
    }

    fn initialize(&mut self, now: f64) {
        self.current_state = 0;
        self.current_substate = None;
        self.scope_state = 0;
        self.scope_substate = 0;
        self.registered = RegisteredEvents::default();
        self.change = None;
        self.change_allowed = true;
        self.delayed_state_queued = false;
        self.delayed_substate_queued = false;
        self.update_iteration = 0;
        self.state_stack.clear();
        self.state_vars.clear();
        self.substate_vars.clear();
        self.time_on_enter_state = now;
        self.time_on_enter_substate = now;
        self.broadcast_list.clear();
        self.cc_receiver = None;
        self.probe_level = None;
    }

    pub fn owner(&self) -> AgentId {
        self.owner
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn state(&self) -> u32 {
        self.current_state
    }

    pub fn substate(&self) -> Option<u32> {
        self.current_substate
    }

    pub fn scope_state(&self) -> u32 {
        self.scope_state
    }

    pub fn scope_substate(&self) -> u32 {
        self.scope_substate
    }

    pub fn state_stack_len(&self) -> usize {
        self.state_stack.len()
    }

    pub fn update_iteration(&self) -> u32 {
        self.update_iteration
    }

    pub fn time_on_enter_state(&self) -> f64 {
        self.time_on_enter_state
    }

    pub fn time_on_enter_substate(&self) -> f64 {
        self.time_on_enter_substate
    }

    pub fn substate_vars_empty(&self) -> bool {
        self.substate_vars.is_empty()
    }

    /// Scope value a message sent now under `rule` must carry.
    ///
    /// Pending-aware: a send made after a transition was requested in the same
    /// handler is tagged with the scope the *destination* will have, so the
    /// message survives exactly that transition.
    pub(crate) fn scope_for(&self, rule: ScopeRule) -> u32 {
        match rule {
            ScopeRule::Machine => 0,
            ScopeRule::State => {
                let pending_state_change = matches!(
                    self.change,
                    Some(PendingChange::Pop) | Some(PendingChange::Change { substate: None, .. })
                );
                self.scope_state.wrapping_add(pending_state_change as u32)
            }
            ScopeRule::Substate => self.scope_substate.wrapping_add(self.change.is_some() as u32),
        }
    }

    pub(crate) fn request_change_state(&mut self, state: u32) {
        debug_assert!(self.change_allowed, "state change not allowed in an exit handler");
        debug_assert!(self.change.is_none(), "state change already requested");
        if self.change_allowed && self.change.is_none() {
            self.change = Some(PendingChange::Change { state, substate: None });
        }
    }

    pub(crate) fn request_change_substate(&mut self, substate: u32) {
        debug_assert!(self.change_allowed, "substate change not allowed in an exit handler");
        debug_assert!(self.change.is_none(), "state change already requested");
        if self.change_allowed && self.change.is_none() {
            self.change = Some(PendingChange::Change {
                state: self.current_state,
                substate: Some(substate),
            });
        }
    }

    pub(crate) fn request_pop(&mut self) {
        debug_assert!(self.change_allowed, "state change not allowed in an exit handler");
        debug_assert!(self.change.is_none(), "state change already requested");
        if self.change_allowed && self.change.is_none() {
            self.change = Some(PendingChange::Pop);
        }
    }
}

/// A state machine instance: bookkeeping plus the user transition function.
pub(crate) struct Machine<W> {
    core: MachineCore,
    behavior: Box<dyn Behavior<W>>,
}

impl<W: 'static> Machine<W> {
    pub fn new(behavior: Box<dyn Behavior<W>>, owner: AgentId, queue: QueueId, seed: u64) -> Self {
        Self {
            core: MachineCore::new(owner, queue, seed),
            behavior,
        }
    }

    pub fn core(&self) -> &MachineCore {
        &self.core
    }

    /// Reinitializes to the default state and runs `Probe` + `Enter` for it.
    pub fn reset(&mut self, env: DispatchEnv, fx: &mut Effects<W>, world: &mut W) {
        self.core.initialize(env.now);
        self.process(Event::Probe, None, env, fx, world);
        self.process(Event::Enter, None, env, fx, world);
    }

    /// Per-tick update. Dispatch is gated on declared `Update` handlers;
    /// transition application runs regardless.
    pub fn update(&mut self, env: DispatchEnv, fx: &mut Effects<W>, world: &mut W) {
        if self.core.registered.any(On::Update) {
            self.core.update_iteration = self.core.update_iteration.wrapping_add(1);

            let current = self.core.current_state as i32;
            let mut handled = false;
            if let Some(sub) = self.core.current_substate {
                if self.core.registered.contains(On::Update, ScopeRule::Substate) {
                    handled = self.invoke(Event::Update, None, current, sub as i32, env, fx, world);
                }
            }
            if !handled && self.core.registered.contains(On::Update, ScopeRule::State) {
                handled = self.invoke(Event::Update, None, current, -1, env, fx, world);
            }
            if !handled && self.core.registered.contains(On::Update, ScopeRule::Machine) {
                self.invoke(Event::Update, None, -1, -1, env, fx, world);
            }
        }
        self.perform_state_changes(env, fx, world);
    }

    /// Dispatches an event down the substate -> state -> global ladder, then
    /// applies any requested transitions.
    pub fn process(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        env: DispatchEnv,
        fx: &mut Effects<W>,
        world: &mut W,
    ) {
        if event == Event::Message {
            if let Some(m) = msg {
                if let Some(cc) = self.core.cc_receiver {
                    fx.sends.push(Message {
                        name: m.name,
                        sender: self.core.owner,
                        receiver: cc,
                        rule: ScopeRule::Machine,
                        scope: 0,
                        queue: QueueTarget::All,
                        data: m.data,
                        deliver_at: env.now,
                        timer: false,
                        cc: true,
                    });
                }
                if m.name == MSG_CHANGE_STATE_DELAYED {
                    if let Some(next) = m.data.as_int() {
                        self.core.request_change_state(next as u32);
                    }
                    self.perform_state_changes(env, fx, world);
                    return;
                }
                if m.name == MSG_CHANGE_SUBSTATE_DELAYED {
                    if let Some(next) = m.data.as_int() {
                        self.core.request_change_substate(next as u32);
                    }
                    self.perform_state_changes(env, fx, world);
                    return;
                }
            }
        }

        if event == Event::Probe {
            self.probe(env, fx, world);
        } else {
            let current = self.core.current_state as i32;
            let mut handled = false;
            if let Some(sub) = self.core.current_substate {
                handled = self.invoke(event, msg, current, sub as i32, env, fx, world);
            }
            if !handled {
                handled = self.invoke(event, msg, current, -1, env, fx, world);
            }
            if !handled {
                self.invoke(event, msg, -1, -1, env, fx, world);
            }
        }

        self.perform_state_changes(env, fx, world);
    }

    /// Walks all three rungs with `Probe`, telling the ctx which scope level
    /// each rung declares into. No early-out: every level must report.
    fn probe(&mut self, env: DispatchEnv, fx: &mut Effects<W>, world: &mut W) {
        let current = self.core.current_state as i32;
        if let Some(sub) = self.core.current_substate {
            self.core.probe_level = Some(ScopeRule::Substate);
            self.invoke(Event::Probe, None, current, sub as i32, env, fx, world);
        }
        self.core.probe_level = Some(ScopeRule::State);
        self.invoke(Event::Probe, None, current, -1, env, fx, world);
        self.core.probe_level = Some(ScopeRule::Machine);
        self.invoke(Event::Probe, None, -1, -1, env, fx, world);
        self.core.probe_level = None;
    }

    /// Applies pending transitions one at a time until none remain, bounded
    /// by `MAX_STATE_CHANGES`. Transitions requested from `Enter` feed the
    /// next iteration; transitions requested from `Exit` are rejected.
    fn perform_state_changes(&mut self, env: DispatchEnv, fx: &mut Effects<W>, world: &mut W) {
        let mut safety = MAX_STATE_CHANGES;
        while self.core.change.is_some() {
            if safety == 0 {
                debug_assert!(false, "states are flip-flopping in an infinite loop");
                self.core.change = None;
                break;
            }
            safety -= 1;

            if matches!(self.core.change, Some(PendingChange::Pop)) && self.core.state_stack.is_empty() {
                debug_assert!(false, "hit bottom of state stack, can't pop state");
                self.core.change = None;
                break;
            }

            let state_level = !matches!(
                self.core.change,
                Some(PendingChange::Change { substate: Some(_), .. })
            );

            self.core.change_allowed = false;
            self.core.delayed_state_queued = false;
            self.core.delayed_substate_queued = false;
            self.core.update_iteration = 0;

            // Let the departing state clean up.
            let current = self.core.current_state as i32;
            if let Some(sub) = self.core.current_substate {
                if self.core.registered.contains(On::Exit, ScopeRule::Substate) {
                    self.invoke(Event::Exit, None, current, sub as i32, env, fx, world);
                }
            }
            if state_level && self.core.registered.contains(On::Exit, ScopeRule::State) {
                self.invoke(Event::Exit, None, current, -1, env, fx, world);
            }

            match self.core.change.take() {
                Some(PendingChange::Change { state, substate }) => {
                    if substate.is_none() {
                        self.core.state_stack.push_back(self.core.current_state);
                        if self.core.state_stack.len() > MAX_STATE_STACK {
                            self.core.state_stack.pop_front();
                        }
                    }
                    self.core.current_state = state;
                    self.core.current_substate = substate;
                }
                Some(PendingChange::Pop) => {
                    if let Some(previous) = self.core.state_stack.pop_back() {
                        self.core.current_state = previous;
                        self.core.current_substate = None;
                    }
                }
                None => break,
            }

            // Every change gets a unique scope; stale scoped messages die here.
            self.core.scope_substate = self.core.scope_substate.wrapping_add(1);
            if state_level {
                self.core.scope_state = self.core.scope_state.wrapping_add(1);
            }

            self.core.substate_vars.clear();
            if state_level {
                self.core.state_vars.clear();
            }

            self.core.time_on_enter_substate = env.now;
            if state_level {
                self.core.time_on_enter_state = env.now;
            }

            self.core.change_allowed = true;
            self.core.registered = if state_level {
                self.core.registered.machine_bits()
            } else {
                self.core.registered.machine_and_state_bits()
            };

            fx.trace.push(
                TraceEvent::new(env.tick, "state_change", self.core.owner)
                    .with_a(self.core.current_state as i64)
                    .with_b(self.core.current_substate.map(|s| s as i64).unwrap_or(-1)),
            );

            self.probe(env, fx, world);

            let current = self.core.current_state as i32;
            let substate_query = self.core.current_substate.map(|s| s as i32).unwrap_or(-1);
            let enter_declared = if state_level {
                self.core.registered.contains(On::Enter, ScopeRule::State)
            } else {
                self.core.registered.contains(On::Enter, ScopeRule::Substate)
            };
            if enter_declared {
                self.invoke(Event::Enter, None, current, substate_query, env, fx, world);
            }
        }
    }

    fn invoke(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        state: i32,
        substate: i32,
        env: DispatchEnv,
        fx: &mut Effects<W>,
        world: &mut W,
    ) -> bool {
        let Machine { core, behavior } = self;
        let mut ctx = MachineCtx::new(core, fx, env);
        behavior.states(event, msg, state, substate, &mut ctx, world)
    }
}

impl<W> std::fmt::Debug for Machine<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine").field("core", &self.core).finish_non_exhaustive()
    }
}

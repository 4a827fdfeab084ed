use crate::agent::{AgentId, AgentKind};
use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::ctx::Effects;
use crate::machine::{Behavior, DispatchEnv, MachineCore};
use crate::message::{Message, MsgData, MsgName, QueueId, QueueTarget, ScopeRule};
use crate::registry::Registry;
use crate::router::MessageRouter;
use crate::trace::{NullTraceSink, TraceSink};
use crate::{Result, RuntimeError};

/// The simulation driver: owns the clock, router, registry, and trace sink,
/// and advances everything one tick at a time.
///
/// `W` is the user's world: bodies, movement, whatever handler code needs.
/// The runtime passes it through to handlers untouched.
pub struct Runtime<W> {
    config: RuntimeConfig,
    clock: Clock,
    router: MessageRouter,
    registry: Registry<W>,
    fx: Effects<W>,
    trace: Box<dyn TraceSink>,
}

impl<W: 'static> Runtime<W> {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            clock: Clock::new(),
            router: MessageRouter::new(),
            registry: Registry::new(),
            fx: Effects::new(),
            trace: Box::new(NullTraceSink),
        }
    }

    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace = sink;
    }

    /// Registers a new agent with empty machine queues.
    pub fn spawn(&mut self, kind: AgentKind) -> AgentId {
        self.registry.spawn(kind)
    }

    /// Flags an agent for removal at the end of the current tick. No events
    /// are dispatched to it from this point on.
    pub fn mark_for_deletion(&mut self, id: AgentId) -> Result<()> {
        if self.registry.mark_for_deletion(id) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownAgent(id))
        }
    }

    /// Pushes a machine onto an agent's queue and initializes it (its default
    /// state receives `Probe` + `Enter` immediately).
    pub fn push_machine(
        &mut self,
        id: AgentId,
        queue: QueueId,
        behavior: Box<dyn Behavior<W>>,
        world: &mut W,
    ) -> Result<()> {
        if !queue.is_valid() {
            return Err(RuntimeError::QueueOutOfBounds(queue.0));
        }
        let env = self.env();
        let entry = self
            .registry
            .get_mut(id)
            .ok_or(RuntimeError::UnknownAgent(id))?;
        if entry.marked_for_deletion {
            return Err(RuntimeError::AgentDeleted(id));
        }
        entry
            .manager
            .push(id, queue, behavior, true, env, &mut self.router, &mut self.fx, world);
        self.expand_broadcasts();
        self.flush_trace();
        Ok(())
    }

    /// Schedules a message from outside the simulation (sender
    /// `AgentId::NONE`, machine scope, all queues), due at the next delivery
    /// pass.
    pub fn post_msg(&mut self, name: MsgName, receiver: AgentId, data: MsgData) -> Result<()> {
        self.post_msg_delayed(0.0, name, receiver, data)
    }

    /// As [`Self::post_msg`], due `delay` seconds from now.
    pub fn post_msg_delayed(
        &mut self,
        delay: f32,
        name: MsgName,
        receiver: AgentId,
        data: MsgData,
    ) -> Result<()> {
        if !self.registry.contains(receiver) {
            return Err(RuntimeError::UnknownAgent(receiver));
        }
        self.router.schedule(Message {
            name,
            sender: AgentId::NONE,
            receiver,
            rule: ScopeRule::Machine,
            scope: 0,
            queue: QueueTarget::All,
            data,
            deliver_at: self.clock.time() + delay.max(0.0) as f64,
            timer: false,
            cc: false,
        });
        Ok(())
    }

    /// Advances the simulation by `dt` seconds: clock, due message delivery,
    /// machine updates, then a drain of everything that became due within the
    /// tick. Agents flagged for deletion are reaped at the end.
    pub fn tick(&mut self, dt: f32, world: &mut W) {
        self.clock.advance(dt);

        self.deliver_due(world);

        for id in self.registry.ids() {
            let env = self.env();
            if let Some(entry) = self.registry.get_mut(id) {
                if entry.marked_for_deletion {
                    continue;
                }
                entry
                    .manager
                    .update(id, env, &mut self.router, &mut self.fx, world);
            }
            self.expand_broadcasts();
            self.flush_trace();
        }

        self.deliver_due(world);

        self.registry.remove_marked();
    }

    /// Delivers every message due at the current time, including messages
    /// that become due while handlers run, until quiescent. Messages to
    /// missing or deletion-flagged agents are discarded.
    fn deliver_due(&mut self, world: &mut W) {
        let now = self.clock.time();
        while let Some(msg) = self.router.pop_due(now) {
            let env = self.env();
            if let Some(entry) = self.registry.get_mut(msg.receiver) {
                if !entry.marked_for_deletion {
                    entry
                        .manager
                        .deliver(&msg, env, &mut self.router, &mut self.fx, world);
                }
            }
            self.expand_broadcasts();
            self.flush_trace();
        }
    }

    /// Expands broadcast requests against the registry: one copy per agent of
    /// the kind, excluding the sender.
    fn expand_broadcasts(&mut self) {
        if self.fx.broadcasts.is_empty() {
            return;
        }
        let now = self.clock.time();
        let requests: Vec<_> = self.fx.broadcasts.drain(..).collect();
        for request in requests {
            for id in self.registry.compose_list(request.kind) {
                if id == request.sender {
                    continue;
                }
                self.router.schedule(Message {
                    name: request.name,
                    sender: request.sender,
                    receiver: id,
                    rule: ScopeRule::Machine,
                    scope: 0,
                    queue: QueueTarget::All,
                    data: request.data,
                    deliver_at: now,
                    timer: false,
                    cc: false,
                });
            }
        }
    }

    fn flush_trace(&mut self) {
        for event in self.fx.trace.drain(..) {
            self.trace.emit(event);
        }
    }

    fn env(&self) -> DispatchEnv {
        DispatchEnv {
            now: self.clock.time(),
            tick: self.clock.tick(),
            one_frame: self.config.one_frame,
            seed: self.config.seed,
            queue_len: 0,
        }
    }

    // --- inspection ------------------------------------------------------

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry<W> {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn is_alive(&self, id: AgentId) -> bool {
        self.registry.is_alive(id)
    }

    /// Bookkeeping of the active machine on `(agent, queue)`, if any.
    pub fn machine(&self, id: AgentId, queue: QueueId) -> Option<&MachineCore> {
        self.registry.get(id)?.manager().top(queue)
    }

    pub fn machines_in_queue(&self, id: AgentId, queue: QueueId) -> usize {
        self.registry
            .get(id)
            .map_or(0, |e| e.manager().machines_in_queue(queue))
    }
}

impl<W: 'static> std::fmt::Debug for Runtime<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("clock", &self.clock)
            .field("agents", &self.registry.len())
            .field("pending_messages", &self.router.pending_count())
            .finish_non_exhaustive()
    }
}

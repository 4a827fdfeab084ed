use crate::agent::AgentId;
use crate::config::{MAX_STATE_CHANGES, NUM_QUEUES};
use crate::ctx::{ChangeKind, Effects, MachineOp};
use crate::machine::{Behavior, DispatchEnv, Event, Machine, MachineCore};
use crate::message::{Message, MsgData, QueueId, QueueTarget, ScopeRule};
use crate::router::MessageRouter;

/// Per-agent bank of machine queues. Each queue is a stack: bottom is the
/// default machine and is never popped, top is active. At most one machine
/// change per queue can be pending at a time.
pub struct MachineManager<W> {
    queues: [MachineQueue<W>; NUM_QUEUES],
}

struct MachineQueue<W> {
    stack: Vec<Machine<W>>,
    pending: Option<ChangeKind<W>>,
}

impl<W> MachineQueue<W> {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            pending: None,
        }
    }
}

impl<W: 'static> Default for MachineManager<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: 'static> MachineManager<W> {
    pub fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| MachineQueue::new()),
        }
    }

    pub fn machines_in_queue(&self, queue: QueueId) -> usize {
        self.queues.get(queue.0).map_or(0, |q| q.stack.len())
    }

    /// Bookkeeping of the active machine on `queue`, if any.
    pub fn top(&self, queue: QueueId) -> Option<&MachineCore> {
        self.queues.get(queue.0)?.stack.last().map(|m| m.core())
    }

    /// Applies pending machine changes on each queue, then ticks the top
    /// machine of each queue with an `Update` event.
    pub(crate) fn update(
        &mut self,
        agent: AgentId,
        env: DispatchEnv,
        router: &mut MessageRouter,
        fx: &mut Effects<W>,
        world: &mut W,
    ) {
        for q in 0..NUM_QUEUES {
            if self.queues[q].stack.is_empty() {
                continue;
            }
            self.apply_changes(agent, q, env, router, fx, world);

            let len = self.queues[q].stack.len();
            if let Some(top) = self.queues[q].stack.last_mut() {
                top.update(env.with_queue_len(len), fx, world);
            }
            self.absorb(fx, router);
        }
    }

    /// Routes a due message to the top machine of its target queue(s).
    /// Returns whether any machine accepted delivery. Successfully delivered
    /// timers are re-armed at their original period with freshly captured
    /// scope.
    pub(crate) fn deliver(
        &mut self,
        msg: &Message,
        env: DispatchEnv,
        router: &mut MessageRouter,
        fx: &mut Effects<W>,
        world: &mut W,
    ) -> bool {
        match msg.queue {
            QueueTarget::One(q) => self.deliver_to_queue(q, msg, env, router, fx, world),
            QueueTarget::All => {
                let mut any = false;
                for q in 0..NUM_QUEUES {
                    any |= self.deliver_to_queue(QueueId(q), msg, env, router, fx, world);
                }
                any
            }
        }
    }

    fn deliver_to_queue(
        &mut self,
        queue: QueueId,
        msg: &Message,
        env: DispatchEnv,
        router: &mut MessageRouter,
        fx: &mut Effects<W>,
        world: &mut W,
    ) -> bool {
        if queue.0 >= NUM_QUEUES {
            debug_assert!(false, "queue index out of bounds");
            return false;
        }

        let len = self.queues[queue.0].stack.len();
        let valid = match self.queues[queue.0].stack.last() {
            None => false,
            Some(top) => match msg.rule {
                ScopeRule::Machine => true,
                ScopeRule::State => msg.scope == top.core().scope_state(),
                ScopeRule::Substate => msg.scope == top.core().scope_substate(),
            },
        };
        if !valid {
            return false;
        }

        if let Some(top) = self.queues[queue.0].stack.last_mut() {
            top.process(Event::Message, Some(msg), env.with_queue_len(len), fx, world);
        }

        if msg.timer {
            if let Some(period) = msg.data.as_float() {
                if let Some(top) = self.queues[queue.0].stack.last() {
                    let scope = top.core().scope_for(msg.rule);
                    router.schedule(Message {
                        name: msg.name,
                        sender: msg.receiver,
                        receiver: msg.receiver,
                        rule: msg.rule,
                        scope,
                        queue: QueueTarget::One(queue),
                        data: MsgData::Float(period),
                        deliver_at: env.now + period.max(env.one_frame) as f64,
                        timer: true,
                        cc: false,
                    });
                }
            } else {
                debug_assert!(false, "timer message without a float period");
            }
        }

        self.absorb(fx, router);
        true
    }

    /// Pushes a machine onto `queue`. With `initialize`, the machine is reset
    /// (runs `Probe` + `Enter` for its starting state); without, it stays
    /// dormant until promoted.
    pub(crate) fn push(
        &mut self,
        agent: AgentId,
        queue: QueueId,
        behavior: Box<dyn Behavior<W>>,
        initialize: bool,
        env: DispatchEnv,
        router: &mut MessageRouter,
        fx: &mut Effects<W>,
        world: &mut W,
    ) {
        debug_assert!(queue.0 < NUM_QUEUES, "queue index out of bounds");
        if queue.0 >= NUM_QUEUES {
            return;
        }

        let machine = Machine::new(behavior, agent, queue, env.seed);
        self.queues[queue.0].stack.push(machine);

        if initialize {
            let len = self.queues[queue.0].stack.len();
            if let Some(top) = self.queues[queue.0].stack.last_mut() {
                top.reset(env.with_queue_len(len), fx, world);
            }
            self.absorb(fx, router);
        }
    }

    /// Applies machine change requests on one queue until none remain,
    /// bounded by the flip-flop safety counter. Requests made by handlers
    /// running inside an apply (e.g. the `Enter` of a freshly reset machine)
    /// feed the next iteration.
    fn apply_changes(
        &mut self,
        agent: AgentId,
        q: usize,
        env: DispatchEnv,
        router: &mut MessageRouter,
        fx: &mut Effects<W>,
        world: &mut W,
    ) {
        let mut safety = MAX_STATE_CHANGES;
        while let Some(change) = self.queues[q].pending.take() {
            if safety == 0 {
                debug_assert!(false, "state machines are flip-flopping in an infinite loop");
                break;
            }
            safety -= 1;

            let queue = QueueId(q);
            match change {
                ChangeKind::Reset => {
                    router.purge_scoped(agent, queue);
                    let len = self.queues[q].stack.len();
                    if let Some(top) = self.queues[q].stack.last_mut() {
                        top.reset(env.with_queue_len(len), fx, world);
                    } else {
                        debug_assert!(false, "no state machine to reset");
                    }
                }
                ChangeKind::Replace(behavior) => {
                    router.purge_scoped(agent, queue);
                    if self.queues[q].stack.pop().is_some() {
                        self.push(agent, queue, behavior, true, env, router, fx, world);
                    } else {
                        debug_assert!(false, "no state machine to replace");
                    }
                }
                ChangeKind::Queue(behavior) => {
                    // No purge: the queued machine starts later.
                    let machine = Machine::new(behavior, agent, queue, env.seed);
                    if self.queues[q].stack.len() <= 1 {
                        self.queues[q].stack.push(machine);
                    } else {
                        self.queues[q].stack.insert(1, machine);
                    }
                }
                ChangeKind::Requeue => {
                    router.purge_scoped(agent, queue);
                    if self.queues[q].stack.len() > 1 {
                        if let Some(machine) = self.queues[q].stack.pop() {
                            self.queues[q].stack.insert(1, machine);
                        }
                    }
                    let len = self.queues[q].stack.len();
                    if let Some(top) = self.queues[q].stack.last_mut() {
                        top.reset(env.with_queue_len(len), fx, world);
                    } else {
                        debug_assert!(false, "no state machines to requeue");
                    }
                }
                ChangeKind::Push(behavior) => {
                    router.purge_scoped(agent, queue);
                    self.push(agent, queue, behavior, true, env, router, fx, world);
                }
                ChangeKind::Pop => {
                    router.purge_scoped(agent, queue);
                    if self.queues[q].stack.len() > 1 {
                        self.queues[q].stack.pop();
                        let len = self.queues[q].stack.len();
                        if let Some(top) = self.queues[q].stack.last_mut() {
                            top.reset(env.with_queue_len(len), fx, world);
                        }
                    } else {
                        debug_assert!(false, "can't pop the last state machine");
                    }
                }
            }

            self.absorb(fx, router);
        }
    }

    /// Drains handler effects: sends and timer stops go to the router,
    /// machine change requests land in their queue's pending slot. A request
    /// arriving while one is already pending is dropped.
    pub(crate) fn absorb(&mut self, fx: &mut Effects<W>, router: &mut MessageRouter) {
        for msg in fx.sends.drain(..) {
            router.schedule(msg);
        }
        for (name, agent) in fx.stops.drain(..) {
            router.remove_msgs(name, agent, agent, true);
        }
        for op in fx.machine_ops.drain(..) {
            match op {
                MachineOp::Request { queue, change } => {
                    if queue.0 >= NUM_QUEUES {
                        debug_assert!(false, "queue index out of bounds");
                        continue;
                    }
                    let slot = &mut self.queues[queue.0].pending;
                    debug_assert!(slot.is_none(), "state machine change already requested");
                    if slot.is_none() {
                        *slot = Some(change);
                    }
                }
                MachineOp::DeleteQueue(target) => match target {
                    QueueTarget::All => {
                        for q in &mut self.queues {
                            q.stack.clear();
                            q.pending = None;
                        }
                    }
                    QueueTarget::One(queue) => {
                        if let Some(q) = self.queues.get_mut(queue.0) {
                            q.stack.clear();
                            q.pending = None;
                        } else {
                            debug_assert!(false, "queue index out of bounds");
                        }
                    }
                },
            }
        }
    }
}

impl<W> std::fmt::Debug for MachineManager<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sizes: Vec<usize> = self.queues.iter().map(|q| q.stack.len()).collect();
        f.debug_struct("MachineManager").field("queues", &sizes).finish()
    }
}

use crate::agent::AgentId;
use crate::message::{Message, MsgName, QueueId, QueueTarget, ScopeRule};

/// Global store of in-flight messages.
///
/// Delivery order among due messages is `(deliver_at, insertion order)`; the
/// `seq` counter breaks timestamp ties FIFO. The store is a flat vector so
/// that cancellation (`remove_msgs`, `purge_scoped`) is a plain retain.
#[derive(Debug, Default)]
pub struct MessageRouter {
    pending: Vec<Scheduled>,
    next_seq: u64,
}

#[derive(Debug)]
struct Scheduled {
    seq: u64,
    msg: Message,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, msg: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Scheduled { seq, msg });
    }

    /// Extracts the earliest message due at or before `now`, FIFO among ties.
    pub fn pop_due(&mut self, now: f64) -> Option<Message> {
        let mut best: Option<usize> = None;
        for (i, s) in self.pending.iter().enumerate() {
            if s.msg.deliver_at > now {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(j) => {
                    let cur = &self.pending[j];
                    let key = (s.msg.deliver_at, s.seq);
                    let cur_key = (cur.msg.deliver_at, cur.seq);
                    if key.0.total_cmp(&cur_key.0).then(key.1.cmp(&cur_key.1)).is_lt() {
                        best = Some(i);
                    }
                }
            }
        }
        best.map(|i| self.pending.swap_remove(i).msg)
    }

    /// Removes pending messages by name, receiver, and sender. With
    /// `timer_only`, non-timer messages survive (the `StopTimer` path).
    pub fn remove_msgs(&mut self, name: MsgName, receiver: AgentId, sender: AgentId, timer_only: bool) {
        self.pending.retain(|s| {
            let m = &s.msg;
            !(m.name == name
                && m.receiver == receiver
                && m.sender == sender
                && (!timer_only || m.timer))
        });
    }

    /// Removes every scoped message targeting `(agent, queue)`. Machine-scope
    /// messages survive: they stay valid across state changes.
    pub fn purge_scoped(&mut self, agent: AgentId, queue: QueueId) {
        self.pending.retain(|s| {
            let m = &s.msg;
            let queue_hit = match m.queue {
                QueueTarget::All => true,
                QueueTarget::One(q) => q == queue,
            };
            !(m.receiver == agent && queue_hit && m.rule != ScopeRule::Machine)
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of pending messages with the given name, across all receivers.
    pub fn count_by_name(&self, name: MsgName) -> usize {
        self.pending.iter().filter(|s| s.msg.name == name).count()
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use hfsm_core::{AgentId, Behavior, Event, MachineCtx, Message, MsgData, MsgName};

/// One message seen by a [`CcRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub struct CcRecord {
    pub tick: u64,
    pub name: MsgName,
    pub sender: AgentId,
    pub data: MsgData,
    /// Whether this was a CC tracing copy (as opposed to a direct message).
    pub cc: bool,
}

/// Shared read handle onto a recorder's log, usable after the recorder has
/// been handed to the runtime.
#[derive(Debug, Clone, Default)]
pub struct CcRecorderHandle {
    log: Rc<RefCell<Vec<CcRecord>>>,
}

impl CcRecorderHandle {
    pub fn records(&self) -> Vec<CcRecord> {
        self.log.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }
}

/// A behavior that records every message it receives, typically installed on
/// a dedicated agent configured as another machine's CC receiver.
#[derive(Debug, Default)]
pub struct CcRecorder {
    log: Rc<RefCell<Vec<CcRecord>>>,
}

impl CcRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> CcRecorderHandle {
        CcRecorderHandle {
            log: Rc::clone(&self.log),
        }
    }
}

impl<W> Behavior<W> for CcRecorder {
    fn states(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        state: i32,
        substate: i32,
        ctx: &mut MachineCtx<'_, W>,
        _world: &mut W,
    ) -> bool {
        if state != -1 || substate != -1 {
            return false;
        }
        if event == Event::Message {
            if let Some(m) = msg {
                self.log.borrow_mut().push(CcRecord {
                    tick: ctx.tick(),
                    name: m.name,
                    sender: m.sender,
                    data: m.data,
                    cc: m.cc,
                });
            }
            return true;
        }
        // Global rung of Probe and lifecycle events: nothing to declare.
        true
    }
}

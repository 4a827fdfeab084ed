use std::collections::BTreeMap;

use crate::agent::{AgentId, AgentKind};
use crate::manager::MachineManager;

/// One registered agent: its kind, deletion flag, and machine bank.
#[derive(Debug)]
pub struct AgentEntry<W> {
    pub(crate) kind: AgentKind,
    pub(crate) marked_for_deletion: bool,
    pub(crate) manager: MachineManager<W>,
}

impl<W> AgentEntry<W> {
    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.marked_for_deletion
    }

    pub fn manager(&self) -> &MachineManager<W> {
        &self.manager
    }
}

/// Id -> agent mapping with stable iteration order.
///
/// The registry only tracks what the runtime needs: everything user code
/// hangs off an agent (body, movement, perception) lives in the world type.
#[derive(Debug)]
pub struct Registry<W> {
    agents: BTreeMap<AgentId, AgentEntry<W>>,
    next_id: u32,
}

impl<W: 'static> Default for Registry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: 'static> Registry<W> {
    pub fn new() -> Self {
        Self {
            agents: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn spawn(&mut self, kind: AgentKind) -> AgentId {
        let id = AgentId(self.next_id);
        self.next_id += 1;
        self.agents.insert(
            id,
            AgentEntry {
                kind,
                marked_for_deletion: false,
                manager: MachineManager::new(),
            },
        );
        id
    }

    pub fn get(&self, id: AgentId) -> Option<&AgentEntry<W>> {
        self.agents.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: AgentId) -> Option<&mut AgentEntry<W>> {
        self.agents.get_mut(&id)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// Alive and not scheduled for removal.
    pub fn is_alive(&self, id: AgentId) -> bool {
        self.agents.get(&id).is_some_and(|e| !e.marked_for_deletion)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// All agent ids in stable (ascending) order.
    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// Broadcast helper: every agent of `kind`, in stable order.
    pub fn compose_list(&self, kind: AgentKind) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn mark_for_deletion(&mut self, id: AgentId) -> bool {
        match self.agents.get_mut(&id) {
            Some(entry) => {
                entry.marked_for_deletion = true;
                true
            }
            None => false,
        }
    }

    /// Removes every agent flagged for deletion, destroying its machines.
    pub(crate) fn remove_marked(&mut self) {
        self.agents.retain(|_, e| !e.marked_for_deletion);
    }
}

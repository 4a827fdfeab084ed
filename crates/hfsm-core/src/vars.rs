use std::any::Any;
use std::fmt;

use crate::agent::AgentId;

/// Lifetime of a state variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    /// Lives until the next state change.
    State,
    /// Wiped on any substate change.
    Substate,
}

/// Tagged value stored in a variable slot.
///
/// `Data` is the type-erased escape hatch: the writer and reader agree on the
/// concrete type, and the accessors validate by downcast.
pub enum Value {
    Int(i32),
    Float(f32),
    Bool(bool),
    Agent(AgentId),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Data(Box<dyn Any>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Agent(v) => write!(f, "Agent({v:?})"),
            Value::Vec2(v) => write!(f, "Vec2({v:?})"),
            Value::Vec3(v) => write!(f, "Vec3({v:?})"),
            Value::Data(_) => write!(f, "Data(..)"),
        }
    }
}

/// Indexed slots of typed values. Slots must be declared before use; reads of
/// undeclared or unset slots return `None`.
#[derive(Debug, Default)]
pub(crate) struct VarTable {
    slots: Vec<Option<Value>>,
}

impl VarTable {
    pub fn declare(&mut self, id: usize) {
        if self.slots.len() <= id {
            self.slots.resize_with(id + 1, || None);
        }
    }

    pub fn set(&mut self, id: usize, value: Value) {
        debug_assert!(id < self.slots.len(), "variable {id} not declared");
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = Some(value);
        }
    }

    pub fn get(&self, id: usize) -> Option<&Value> {
        self.slots.get(id)?.as_ref()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}

//! Core runtime types
//!
//! Flat-arena keys for every instance kind, the dynamic value domain
//! carried by ports and actions, and the trigger taxonomy.

use std::fmt;

/// Index of a reactor instance in the environment's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactorKey(pub u32);

impl ReactorKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ReactorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global reaction index. Assignment order is declaration order, which is
/// also the deterministic total order used to break scheduling ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactionKey(pub u32);

impl ReactionKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ReactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a port slot in the port fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey(pub u32);

impl PortKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a schedulable action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey(pub u32);

impl ActionKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey(pub u32);

impl TimerKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that can cause reactions to run at a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerKey {
    /// Fires exactly once, at the origin tag.
    Startup,
    /// Fires at the final tag, before teardown.
    Shutdown,
    Timer(TimerKey),
    Action(ActionKey),
    /// Arrival of a value over a delayed connection.
    Port(PortKey),
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKey::Startup => write!(f, "startup"),
            TriggerKey::Shutdown => write!(f, "shutdown"),
            TriggerKey::Timer(k) => write!(f, "timer {k}"),
            TriggerKey::Action(k) => write!(f, "action {k}"),
            TriggerKey::Port(k) => write!(f, "port {k}"),
        }
    }
}

/// What a reaction may write: its declared effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKey {
    Port(PortKey),
    Action(ActionKey),
}

/// Runtime value carried by ports and actions.
///
/// The single dynamic value domain keeps reaction bodies polymorphic over
/// one contract; bindings pick the variants they need.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Scalar(f64),
    Text(String),
    Vec3([f64; 3]),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<[f64; 3]> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_key_order_is_stable() {
        let mut triggers = vec![
            TriggerKey::Port(PortKey(1)),
            TriggerKey::Timer(TimerKey(0)),
            TriggerKey::Startup,
        ];
        triggers.sort();
        assert_eq!(
            triggers,
            vec![
                TriggerKey::Startup,
                TriggerKey::Timer(TimerKey(0)),
                TriggerKey::Port(PortKey(1)),
            ]
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Scalar(2.5).as_scalar(), Some(2.5));
        assert_eq!(Value::Int(3).as_scalar(), None);
        assert_eq!(Value::Vec3([1.0, 2.0, 3.0]).as_vec3(), Some([1.0, 2.0, 3.0]));
    }
}

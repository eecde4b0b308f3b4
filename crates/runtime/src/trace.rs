//! Execution trace
//!
//! Optional recording of every reaction invocation and port write in
//! commit order. Two runs of the same program with the same inputs must
//! produce equal traces regardless of worker count; the integration
//! tests compare them structurally.

use std::fmt::Write as _;

use crate::time::Tag;
use crate::types::Value;

/// One committed step of an execution.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Invoke {
        tag: Tag,
        reaction: String,
    },
    Write {
        tag: Tag,
        port: String,
        value: Value,
    },
}

/// The committed steps of a run, in global order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExecutionTrace {
    pub events: Vec<TraceEvent>,
}

impl ExecutionTrace {
    pub fn record_invoke(&mut self, tag: Tag, reaction: &str) {
        self.events.push(TraceEvent::Invoke {
            tag,
            reaction: reaction.to_string(),
        });
    }

    pub fn record_write(&mut self, tag: Tag, port: &str, value: &Value) {
        self.events.push(TraceEvent::Write {
            tag,
            port: port.to_string(),
            value: value.clone(),
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// One line per event, for diffing failing determinism runs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            match event {
                TraceEvent::Invoke { tag, reaction } => {
                    let _ = writeln!(out, "{tag} invoke {reaction}");
                }
                TraceEvent::Write { tag, port, value } => {
                    let _ = writeln!(out, "{tag} write {port} = {value:?}");
                }
            }
        }
        out
    }
}

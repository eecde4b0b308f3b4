//! Port & connection fabric
//!
//! Tag-scoped single-writer value slots plus the fixed connection graph
//! between them. Slots are cleared at tag start; a committed write
//! propagates through the zero-delay connection closure immediately and
//! turns positive-delay connections into scheduled events.

use std::time::Duration;

use crate::types::{PortKey, ReactionKey, ReactorKey, Value};

/// Which side of a reactor a port sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    Input,
    Output,
}

/// Static description of one port instance.
#[derive(Debug, Clone)]
pub struct PortDecl {
    pub key: PortKey,
    pub reactor: ReactorKey,
    pub name: String,
    pub side: PortSide,
}

/// Identity of whatever set a port within the current tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    Reaction(ReactionKey),
    /// Arrival over a positive-delay connection.
    Delivery,
}

/// A second writer for a port within one tag. The scheduler attaches
/// names and converts this into the reported conflict error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConflict {
    pub port: PortKey,
    pub first: Writer,
    pub second: Writer,
}

/// Effects of committing one write: reactions that became runnable at the
/// current tag, and deliveries owed to future tags.
#[derive(Debug, Default)]
pub struct Propagation {
    pub triggered: Vec<ReactionKey>,
    pub delayed: Vec<(PortKey, Duration, Value)>,
}

#[derive(Debug, Default, Clone)]
struct Slot {
    value: Option<Value>,
    written_by: Option<Writer>,
}

/// All port slots of one environment, flat, keyed by [PortKey].
#[derive(Debug, Default)]
pub struct PortFabric {
    decls: Vec<PortDecl>,
    slots: Vec<Slot>,
    /// Zero-delay fan-out per port.
    downstream: Vec<Vec<PortKey>>,
    /// Positive-delay fan-out per port.
    delayed: Vec<Vec<(PortKey, Duration)>>,
    /// Reactions triggered by presence on each port.
    triggers: Vec<Vec<ReactionKey>>,
}

impl PortFabric {
    pub fn new(
        decls: Vec<PortDecl>,
        downstream: Vec<Vec<PortKey>>,
        delayed: Vec<Vec<(PortKey, Duration)>>,
        triggers: Vec<Vec<ReactionKey>>,
    ) -> Self {
        let slots = vec![Slot::default(); decls.len()];
        PortFabric {
            decls,
            slots,
            downstream,
            delayed,
            triggers,
        }
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn decl(&self, port: PortKey) -> &PortDecl {
        &self.decls[port.index()]
    }

    pub fn name(&self, port: PortKey) -> &str {
        &self.decls[port.index()].name
    }

    /// Reactions triggered by presence on `port`.
    pub fn triggered_reactions(&self, port: PortKey) -> &[ReactionKey] {
        &self.triggers[port.index()]
    }

    /// Reset slots before any reaction of a tag runs. Presence survives
    /// microstep advancement within one logical instant so that zero-delay
    /// chains observe values written earlier at the same instant; the
    /// single-writer scope is always the individual tag.
    pub fn begin_tag(&mut self, same_instant: bool) {
        for slot in &mut self.slots {
            if !same_instant {
                slot.value = None;
            }
            slot.written_by = None;
        }
    }

    /// Presence flag for the current tag.
    pub fn is_present(&self, port: PortKey) -> bool {
        self.slots[port.index()].value.is_some()
    }

    /// Read a port: `Some` iff present at the current tag.
    pub fn read(&self, port: PortKey) -> Option<&Value> {
        self.slots[port.index()].value.as_ref()
    }

    /// Write `port` on behalf of `writer`. At most one writer per tag per
    /// port; a repeated write by the same writer overwrites.
    pub fn write(
        &mut self,
        port: PortKey,
        value: Value,
        writer: Writer,
    ) -> Result<(), WriteConflict> {
        let slot = &mut self.slots[port.index()];
        if let Some(first) = slot.written_by
            && first != writer
        {
            return Err(WriteConflict {
                port,
                first,
                second: writer,
            });
        }
        slot.value = Some(value);
        slot.written_by = Some(writer);
        Ok(())
    }

    /// Commit a write: store the value, copy it through the zero-delay
    /// connection closure, and collect downstream triggering.
    pub fn deposit(
        &mut self,
        port: PortKey,
        value: Value,
        writer: Writer,
    ) -> Result<Propagation, WriteConflict> {
        self.write(port, value, writer)?;

        let mut result = Propagation::default();
        let mut frontier = vec![port];
        let mut visited = vec![false; self.slots.len()];
        visited[port.index()] = true;

        while let Some(current) = frontier.pop() {
            result
                .triggered
                .extend_from_slice(&self.triggers[current.index()]);

            for (dest, delay) in self.delayed[current.index()].clone() {
                let carried = self.slots[current.index()]
                    .value
                    .clone()
                    .unwrap_or_default();
                result.delayed.push((dest, delay, carried));
            }

            for dest in self.downstream[current.index()].clone() {
                if visited[dest.index()] {
                    continue;
                }
                visited[dest.index()] = true;
                let carried = self.slots[current.index()]
                    .value
                    .clone()
                    .unwrap_or_default();
                self.write(dest, carried, writer)?;
                frontier.push(dest);
            }
        }

        // Deterministic commit order downstream
        result.triggered.sort();
        result.triggered.dedup();
        Ok(result)
    }

    /// Every port reachable from `port` over zero-delay connections,
    /// including `port` itself. Used when building the reaction graph.
    pub fn zero_delay_closure(&self, port: PortKey) -> Vec<PortKey> {
        let mut closure = Vec::new();
        let mut frontier = vec![port];
        let mut visited = vec![false; self.slots.len()];
        visited[port.index()] = true;

        while let Some(current) = frontier.pop() {
            closure.push(current);
            for &dest in &self.downstream[current.index()] {
                if !visited[dest.index()] {
                    visited[dest.index()] = true;
                    frontier.push(dest);
                }
            }
        }
        closure.sort();
        closure
    }
}

//! Logical-time event queue
//!
//! Pending triggers keyed by tag, ascending. The queue itself is oblivious
//! to the tag cursor; the environment rejects past-tag schedules before
//! anything reaches it.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::time::Tag;
use crate::types::{TriggerKey, Value};

/// All triggers pending at one tag, in schedule order.
#[derive(Debug, Clone, PartialEq)]
pub struct TagBatch {
    pub tag: Tag,
    pub triggers: IndexMap<TriggerKey, Option<Value>>,
}

/// Priority queue of pending triggers, ordered by tag.
///
/// Two events for the same trigger at the same tag merge; the later
/// scheduled value wins.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<Tag, IndexMap<TriggerKey, Option<Value>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            events: BTreeMap::new(),
        }
    }

    /// Insert a pending trigger at `tag`.
    pub fn schedule(&mut self, tag: Tag, trigger: TriggerKey, value: Option<Value>) {
        self.events.entry(tag).or_default().insert(trigger, value);
    }

    /// Remove and return every trigger sharing the minimal tag present.
    /// Returns None when the queue is empty — the program is quiescent.
    pub fn pop_next_tag(&mut self) -> Option<TagBatch> {
        self.events
            .pop_first()
            .map(|(tag, triggers)| TagBatch { tag, triggers })
    }

    /// The minimal tag present, without removing it.
    pub fn peek_tag(&self) -> Option<Tag> {
        self.events.keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of pending (tag, trigger) entries.
    pub fn len(&self) -> usize {
        self.events.values().map(|t| t.len()).sum()
    }
}

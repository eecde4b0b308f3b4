//! Environment
//!
//! The owning context for one isolated execution domain ("enclave"): the
//! event queue, the reaction graph, the port fabric, the reactor arena,
//! and the tag cursor. Everything the scheduler touches goes through an
//! explicit environment reference; several enclaves can coexist.

use std::any::Any;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::addr::MixedRadixInt;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, ReactionDecl};
use crate::port::PortFabric;
use crate::queue::{EventQueue, TagBatch};
use crate::scheduler::ReactionFn;
use crate::time::{LogicalTime, Microstep, Tag};
use crate::types::{ActionKey, PortKey, ReactionKey, ReactorKey, TimerKey, TriggerKey, Value};

/// Static description of a timer.
#[derive(Debug, Clone)]
pub struct TimerDecl {
    pub key: TimerKey,
    pub reactor: ReactorKey,
    pub name: String,
    pub offset: Duration,
    /// None fires once; Some(period) re-fires every period.
    pub period: Option<Duration>,
}

/// Static description of a schedulable action.
#[derive(Debug, Clone)]
pub struct ActionDecl {
    pub key: ActionKey,
    pub reactor: ReactorKey,
    pub name: String,
    /// Added to every schedule request for this action.
    pub min_delay: Duration,
}

/// One reactor instance in the arena.
///
/// State is owned exclusively by the instance and touched only by its own
/// reactions, which the graph serializes; the mutex is uncontended by
/// construction.
pub struct ReactorInstance {
    pub key: ReactorKey,
    pub name: String,
    pub parent: Option<ReactorKey>,
    /// Bank position along the ancestry, innermost digit first.
    pub bank: MixedRadixInt,
    state: Mutex<Box<dyn Any + Send>>,
}

impl ReactorInstance {
    pub fn new(
        key: ReactorKey,
        name: String,
        parent: Option<ReactorKey>,
        bank: MixedRadixInt,
    ) -> Self {
        ReactorInstance {
            key,
            name,
            parent,
            bank,
            state: Mutex::new(Box::new(())),
        }
    }

    /// The instance's flat mixed-radix address.
    pub fn address(&self) -> Result<u32> {
        self.bank.flatten()
    }

    pub fn set_state(&mut self, state: Box<dyn Any + Send>) {
        self.state = Mutex::new(state);
    }

    /// Reaction bodies never panic while holding the guard (faults travel
    /// as values), so a poisoned lock is recovered rather than propagated.
    pub fn lock_state(&self) -> MutexGuard<'_, Box<dyn Any + Send>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for ReactorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorInstance")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("bank", &self.bank)
            .finish_non_exhaustive()
    }
}

/// One isolated execution domain.
pub struct Environment {
    pub(crate) reactors: Vec<ReactorInstance>,
    pub(crate) reactions: Vec<ReactionDecl>,
    pub(crate) bodies: Vec<ReactionFn>,
    pub(crate) fabric: PortFabric,
    pub(crate) graph: DependencyGraph,
    pub(crate) queue: EventQueue,
    pub(crate) timers: Vec<TimerDecl>,
    pub(crate) actions: Vec<ActionDecl>,
    pub(crate) startup_reactions: Vec<ReactionKey>,
    pub(crate) shutdown_reactions: Vec<ReactionKey>,
    pub(crate) timer_triggers: Vec<Vec<ReactionKey>>,
    pub(crate) action_triggers: Vec<Vec<ReactionKey>>,
    /// Action presence for the current tag, cleared at tag start.
    pub(crate) action_values: Vec<Option<Value>>,
    tag: Tag,
    primed: bool,
}

impl Environment {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        reactors: Vec<ReactorInstance>,
        reactions: Vec<ReactionDecl>,
        bodies: Vec<ReactionFn>,
        fabric: PortFabric,
        graph: DependencyGraph,
        timers: Vec<TimerDecl>,
        actions: Vec<ActionDecl>,
        startup_reactions: Vec<ReactionKey>,
        shutdown_reactions: Vec<ReactionKey>,
        timer_triggers: Vec<Vec<ReactionKey>>,
        action_triggers: Vec<Vec<ReactionKey>>,
    ) -> Self {
        let action_values = vec![None; actions.len()];
        Environment {
            reactors,
            reactions,
            bodies,
            fabric,
            graph,
            queue: EventQueue::new(),
            timers,
            actions,
            startup_reactions,
            shutdown_reactions,
            timer_triggers,
            action_triggers,
            action_values,
            tag: Tag::ORIGIN,
            primed: false,
        }
    }

    pub fn current_tag(&self) -> Tag {
        self.tag
    }

    pub fn reactor_count(&self) -> usize {
        self.reactors.len()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    pub fn reactor(&self, key: ReactorKey) -> &ReactorInstance {
        &self.reactors[key.index()]
    }

    pub fn reactor_name(&self, key: ReactorKey) -> &str {
        &self.reactors[key.index()].name
    }

    pub fn reaction_name(&self, key: ReactionKey) -> &str {
        &self.reactions[key.index()].name
    }

    pub fn reaction(&self, key: ReactionKey) -> &ReactionDecl {
        &self.reactions[key.index()]
    }

    pub fn reaction_reactor(&self, key: ReactionKey) -> ReactorKey {
        self.reactions[key.index()].reactor
    }

    pub fn timer(&self, key: TimerKey) -> &TimerDecl {
        &self.timers[key.index()]
    }

    pub fn port_name(&self, key: PortKey) -> &str {
        self.fabric.name(key)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Inspect a reactor's state after (or between) runs.
    pub fn read_state<T: 'static, R>(
        &self,
        reactor: ReactorKey,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let guard = self.reactors[reactor.index()].lock_state();
        guard.downcast_ref::<T>().map(f)
    }

    /// Reactions triggered by `trigger`.
    pub fn reactions_for(&self, trigger: TriggerKey) -> &[ReactionKey] {
        match trigger {
            TriggerKey::Startup => &self.startup_reactions,
            TriggerKey::Shutdown => &self.shutdown_reactions,
            TriggerKey::Timer(k) => &self.timer_triggers[k.index()],
            TriggerKey::Action(k) => &self.action_triggers[k.index()],
            TriggerKey::Port(p) => self.fabric.triggered_reactions(p),
        }
    }

    /// Insert a pending trigger. The clock must not move backward: a tag
    /// strictly below the cursor is rejected and the queue is untouched.
    pub fn schedule(&mut self, tag: Tag, trigger: TriggerKey, value: Option<Value>) -> Result<()> {
        if tag < self.tag {
            return Err(Error::PastTag {
                requested: tag,
                current: self.tag,
            });
        }
        self.queue.schedule(tag, trigger, value);
        Ok(())
    }

    /// Schedule `action` at its minimum delay plus `extra_delay` from the
    /// current tag, per the zero-delay rule. Returns the resulting tag.
    pub fn schedule_action(
        &mut self,
        action: ActionKey,
        extra_delay: Duration,
        value: Option<Value>,
    ) -> Result<Tag> {
        let min_delay = self.actions[action.index()].min_delay;
        let tag = self.tag.delay(min_delay + extra_delay);
        self.schedule(tag, TriggerKey::Action(action), value)?;
        Ok(tag)
    }

    /// Seed the queue with the startup trigger and every timer's first
    /// firing. Idempotent.
    pub fn prime(&mut self) {
        if self.primed {
            return;
        }
        self.primed = true;

        if !self.startup_reactions.is_empty() {
            self.queue
                .schedule(Tag::ORIGIN, TriggerKey::Startup, None);
        }
        for timer in &self.timers {
            let first = Tag::new(LogicalTime::ZERO.after(timer.offset), Microstep::ZERO);
            self.queue
                .schedule(first, TriggerKey::Timer(timer.key), None);
        }
        debug!(pending = self.queue.len(), "environment primed");
    }

    /// Advance the cursor to `tag` and reset tag-scoped presence. Port
    /// values persist across microsteps of one logical instant so that
    /// zero-delay chains observe them.
    pub(crate) fn begin_tag(&mut self, tag: Tag) {
        let same_instant = tag.time == self.tag.time;
        self.tag = tag;
        self.fabric.begin_tag(same_instant);
        for slot in &mut self.action_values {
            *slot = None;
        }
    }

    pub(crate) fn pop_next_tag(&mut self) -> Option<TagBatch> {
        self.queue.pop_next_tag()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Value carried by an action scheduled at the current tag.
    pub fn action_value(&self, action: ActionKey) -> Option<&Value> {
        self.action_values[action.index()].as_ref()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("reactors", &self.reactors.len())
            .field("reactions", &self.reactions.len())
            .field("ports", &self.fabric.len())
            .field("tag", &self.tag)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

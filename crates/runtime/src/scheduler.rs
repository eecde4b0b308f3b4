//! Threaded scheduler
//!
//! Drives an environment tag by tag. Each tag moves through a fixed phase
//! cycle: compute the ready set from the popped trigger batch, dispatch
//! each topological level of the reaction graph to the worker pool, await
//! completion at the pool barrier, and commit outcomes sequentially in
//! declaration order. The tag cursor advances only once every reaction of
//! the current tag has committed, so no reaction ever observes partially
//! written state from its own tag.

use std::any::Any;
use std::num::NonZeroUsize;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::env::Environment;
use crate::error::{Error, ReactionFault, Result};
use crate::platform::PhysicalClock;
use crate::port::{PortFabric, WriteConflict, Writer};
use crate::queue::TagBatch;
use crate::time::{Microstep, Tag};
use crate::trace::ExecutionTrace;
use crate::types::{ActionKey, EffectKey, PortKey, ReactionKey, ReactorKey, TriggerKey, Value};

/// What to do when a reaction body reports a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Terminate the whole program with the tagged error.
    #[default]
    Abort,
    /// Quarantine the owning reactor's subtree and keep running.
    Isolate,
}

/// Runtime configuration, exposed 1:1 as host CLI flags.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Logical horizon: tags beyond this elapsed time are not executed.
    pub timeout: Option<Duration>,
    /// Do not align tags with physical time; run as fast as possible.
    pub fast_forward: bool,
    /// Keep running on queue exhaustion, waiting for physical events.
    pub keep_alive: bool,
    pub fault_policy: FaultPolicy,
    /// Record every invocation and port write in commit order.
    pub record_trace: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            timeout: None,
            fast_forward: false,
            keep_alive: false,
            fault_policy: FaultPolicy::default(),
            record_trace: false,
        }
    }
}

/// Per-tag phase cycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPhase {
    Idle,
    ComputeReady,
    Dispatch,
    AwaitCompletion,
    Commit,
}

/// The opaque reaction-body contract: a polymorphic callable over the
/// capability set carried by [ReactionCtx]. The core never assumes the
/// body's internal representation.
pub type ReactionFn =
    Box<dyn Fn(&mut ReactionCtx) -> std::result::Result<(), ReactionFault> + Send + Sync>;

/// Buffered effects of one invocation, applied at commit.
#[derive(Default)]
pub(crate) struct ReactionOutcome {
    writes: Vec<(PortKey, Value)>,
    schedules: Vec<(ActionKey, Duration, Option<Value>)>,
    stop: bool,
}

/// Capability set handed to a reaction body: read ports and actions,
/// write declared effects, access the owning reactor's state, schedule,
/// and request stop. Effects are buffered and committed by the scheduler
/// after the body returns.
pub struct ReactionCtx<'a> {
    tag: Tag,
    fabric: &'a PortFabric,
    action_values: &'a [Option<Value>],
    state: &'a mut (dyn Any + Send),
    effects: &'a [EffectKey],
    outcome: ReactionOutcome,
}

impl<'a> ReactionCtx<'a> {
    fn new(
        tag: Tag,
        fabric: &'a PortFabric,
        action_values: &'a [Option<Value>],
        state: &'a mut (dyn Any + Send),
        effects: &'a [EffectKey],
    ) -> Self {
        ReactionCtx {
            tag,
            fabric,
            action_values,
            state,
            effects,
            outcome: ReactionOutcome::default(),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Presence of `port` at the current tag.
    pub fn is_present(&self, port: PortKey) -> bool {
        self.fabric.is_present(port)
    }

    /// Read a port; `Some` iff present.
    pub fn get(&self, port: PortKey) -> Option<&Value> {
        self.fabric.read(port)
    }

    /// Value carried by an action triggering at the current tag.
    pub fn action_value(&self, action: ActionKey) -> Option<&Value> {
        self.action_values[action.index()].as_ref()
    }

    /// Write a declared effect port. The write is committed, and made
    /// visible downstream, only after the body returns without fault.
    pub fn set(&mut self, port: PortKey, value: Value) -> std::result::Result<(), ReactionFault> {
        if !self.effects.contains(&EffectKey::Port(port)) {
            return Err(ReactionFault::UndeclaredEffect {
                port: self.fabric.name(port).to_string(),
            });
        }
        self.outcome.writes.push((port, value));
        Ok(())
    }

    /// Schedule a declared effect action at its minimum delay plus
    /// `extra_delay` from the current tag.
    pub fn schedule(
        &mut self,
        action: ActionKey,
        extra_delay: Duration,
        value: Option<Value>,
    ) -> std::result::Result<(), ReactionFault> {
        if !self.effects.contains(&EffectKey::Action(action)) {
            return Err(ReactionFault::Failed(format!(
                "action {action} was not declared as an effect"
            )));
        }
        self.outcome.schedules.push((action, extra_delay, value));
        Ok(())
    }

    /// The owning reactor's state, downcast to its concrete type.
    pub fn state_mut<T: 'static>(&mut self) -> std::result::Result<&mut T, ReactionFault> {
        self.state
            .downcast_mut::<T>()
            .ok_or(ReactionFault::StateType {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Ask the scheduler to finish the current tag and shut down.
    pub fn request_stop(&mut self) {
        self.outcome.stop = true;
    }

    fn into_outcome(self) -> ReactionOutcome {
        self.outcome
    }
}

/// Summary of one completed run.
#[derive(Debug)]
pub struct ExecutionReport {
    pub tags_executed: u64,
    pub reactions_invoked: u64,
    pub final_tag: Tag,
    pub trace: Option<ExecutionTrace>,
}

/// Executes environments over a fixed-size worker pool.
pub struct Scheduler {
    config: RuntimeConfig,
    pool: rayon::ThreadPool,
    clock: Box<dyn PhysicalClock>,
    phase: TagPhase,
    stop_requested: bool,
    quarantined: Vec<bool>,
    trace: Option<ExecutionTrace>,
    reactions_invoked: u64,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig, clock: Box<dyn PhysicalClock>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("cadence-worker-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool {
                reason: e.to_string(),
            })?;
        Ok(Scheduler {
            config,
            pool,
            clock,
            phase: TagPhase::Idle,
            stop_requested: false,
            quarantined: Vec::new(),
            trace: None,
            reactions_invoked: 0,
        })
    }

    pub fn phase(&self) -> TagPhase {
        self.phase
    }

    /// Execute `env` until quiescence, timeout, or an explicit stop
    /// request. In-flight tags always complete before teardown; the
    /// shutdown trigger fires at the final tag.
    pub fn run(&mut self, env: &mut Environment) -> Result<ExecutionReport> {
        env.prime();
        self.quarantined = vec![false; env.reactor_count()];
        self.stop_requested = false;
        self.reactions_invoked = 0;
        self.trace = self.config.record_trace.then(ExecutionTrace::default);

        info!(
            workers = self.config.workers,
            reactions = env.reaction_count(),
            "execution starting"
        );

        let mut tags_executed = 0u64;
        loop {
            if self.stop_requested {
                info!("stop requested; skipping further tags");
                break;
            }
            let Some(batch) = env.pop_next_tag() else {
                if self.config.keep_alive {
                    warn!("keep-alive set but no physical event sources remain; shutting down");
                } else {
                    debug!("event queue exhausted; program is quiescent");
                }
                break;
            };
            if let Some(timeout) = self.config.timeout
                && batch.tag.time.as_duration() > timeout
            {
                debug!(tag = %batch.tag, "next tag lies beyond the timeout horizon");
                break;
            }

            if !self.config.fast_forward {
                self.clock.sleep_until(batch.tag.time.as_duration());
            }

            self.execute_tag(env, batch)?;
            tags_executed += 1;
        }

        if self.execute_shutdown_tag(env)? {
            tags_executed += 1;
        }

        info!(
            tags = tags_executed,
            reactions = self.reactions_invoked,
            final_tag = %env.current_tag(),
            "execution finished"
        );

        Ok(ExecutionReport {
            tags_executed,
            reactions_invoked: self.reactions_invoked,
            final_tag: env.current_tag(),
            trace: self.trace.take(),
        })
    }

    /// One full tag: ready-set computation, leveled dispatch, commit.
    #[instrument(skip_all, fields(tag = %batch.tag))]
    fn execute_tag(&mut self, env: &mut Environment, batch: TagBatch) -> Result<()> {
        self.phase = TagPhase::ComputeReady;
        trace!("tag start");
        env.begin_tag(batch.tag);

        let mut triggered = vec![false; env.reaction_count()];
        for (trigger, value) in batch.triggers {
            for r in env.reactions_for(trigger).to_vec() {
                triggered[r.index()] = true;
            }
            match trigger {
                TriggerKey::Timer(t) => {
                    // Periodic timers re-arm themselves
                    if let Some(period) = env.timer(t).period {
                        let next = Tag::new(batch.tag.time.after(period), Microstep::ZERO);
                        env.schedule(next, trigger, None)?;
                    }
                }
                TriggerKey::Action(a) => {
                    env.action_values[a.index()] = Some(value.unwrap_or_default());
                }
                TriggerKey::Port(p) => {
                    // Delivery over a delayed connection; propagates
                    // through the destination's own zero-delay fan-out.
                    let deposited =
                        env.fabric
                            .deposit(p, value.unwrap_or_default(), Writer::Delivery);
                    let propagation = match deposited {
                        Ok(propagation) => propagation,
                        Err(conflict) => return Err(conflict_error(env, conflict)),
                    };
                    for r in propagation.triggered {
                        triggered[r.index()] = true;
                    }
                    for (dest, delay, carried) in propagation.delayed {
                        env.schedule(batch.tag.delay(delay), TriggerKey::Port(dest), Some(carried))?;
                    }
                }
                TriggerKey::Startup | TriggerKey::Shutdown => {}
            }
        }

        self.run_levels(env, batch.tag, &mut triggered)?;

        self.phase = TagPhase::Idle;
        trace!("tag complete");
        Ok(())
    }

    /// Dispatch every topological level whose reactions are triggered,
    /// committing between levels so downstream reactions observe
    /// committed upstream effects only.
    fn run_levels(
        &mut self,
        env: &mut Environment,
        tag: Tag,
        triggered: &mut [bool],
    ) -> Result<()> {
        for depth in 0..env.graph().levels().len() {
            let ready: Vec<ReactionKey> = env.graph().levels()[depth]
                .iter()
                .copied()
                .filter(|r| {
                    triggered[r.index()]
                        && !self.quarantined[env.reaction_reactor(*r).index()]
                })
                .collect();
            if ready.is_empty() {
                continue;
            }

            self.phase = TagPhase::Dispatch;
            trace!(depth, count = ready.len(), "dispatching level");

            let env_ref: &Environment = env;
            let outcomes: Vec<(ReactionKey, std::result::Result<ReactionOutcome, ReactionFault>)> =
                self.pool.install(|| {
                    ready
                        .par_iter()
                        .map(|&key| {
                            let decl = env_ref.reaction(key);
                            let reactor = env_ref.reactor(decl.reactor);
                            let mut guard = reactor.lock_state();
                            let mut ctx = ReactionCtx::new(
                                tag,
                                &env_ref.fabric,
                                &env_ref.action_values,
                                &mut **guard,
                                &decl.effects,
                            );
                            let result = (env_ref.bodies[key.index()])(&mut ctx);
                            (key, result.map(|()| ctx.into_outcome()))
                        })
                        .collect()
                });

            // The pool barrier above is the wait for completion
            self.phase = TagPhase::AwaitCompletion;

            // Apply outcomes sequentially for determinism
            self.phase = TagPhase::Commit;
            for (key, result) in outcomes {
                match result {
                    Ok(outcome) => self.commit_outcome(env, key, tag, outcome, triggered)?,
                    Err(fault) => self.handle_fault(env, key, tag, fault)?,
                }
            }
        }
        Ok(())
    }

    fn commit_outcome(
        &mut self,
        env: &mut Environment,
        key: ReactionKey,
        tag: Tag,
        outcome: ReactionOutcome,
        triggered: &mut [bool],
    ) -> Result<()> {
        self.reactions_invoked += 1;
        if let Some(recorder) = &mut self.trace {
            recorder.record_invoke(tag, env.reaction_name(key));
        }

        for (port, value) in outcome.writes {
            if let Some(recorder) = &mut self.trace {
                recorder.record_write(tag, env.port_name(port), &value);
            }
            let deposited = env.fabric.deposit(port, value, Writer::Reaction(key));
            let propagation = match deposited {
                Ok(propagation) => propagation,
                Err(conflict) => return Err(conflict_error(env, conflict)),
            };
            for r in propagation.triggered {
                if r == key {
                    continue;
                }
                debug_assert!(env.graph().level_of(r) > env.graph().level_of(key));
                triggered[r.index()] = true;
            }
            for (dest, delay, carried) in propagation.delayed {
                env.schedule(tag.delay(delay), TriggerKey::Port(dest), Some(carried))?;
            }
        }

        for (action, extra_delay, value) in outcome.schedules {
            let landed = env.schedule_action(action, extra_delay, value)?;
            trace!(action = %action, tag = %landed, "action scheduled");
        }

        if outcome.stop {
            debug!(reaction = env.reaction_name(key), "stop requested by reaction");
            self.stop_requested = true;
        }
        Ok(())
    }

    /// A fault never escapes unlogged; the policy decides whether it
    /// terminates the program or only the owning subtree.
    fn handle_fault(
        &mut self,
        env: &Environment,
        key: ReactionKey,
        tag: Tag,
        fault: ReactionFault,
    ) -> Result<()> {
        self.reactions_invoked += 1;
        let reaction = env.reaction_name(key).to_string();
        error!(%reaction, %tag, %fault, "reaction failed");

        match self.config.fault_policy {
            FaultPolicy::Abort => Err(Error::ReactionFailed {
                reaction,
                tag,
                fault,
            }),
            FaultPolicy::Isolate => {
                self.quarantine_subtree(env, env.reaction_reactor(key));
                Ok(())
            }
        }
    }

    fn quarantine_subtree(&mut self, env: &Environment, root: ReactorKey) {
        warn!(reactor = env.reactor_name(root), "quarantining reactor subtree");
        self.quarantined[root.index()] = true;
        // The arena is created parents-first, so one pass closes the set
        for key in 0..env.reactor_count() {
            if let Some(parent) = env.reactor(ReactorKey(key as u32)).parent
                && self.quarantined[parent.index()]
            {
                self.quarantined[key] = true;
            }
        }
    }

    /// Fire shutdown-triggered reactions at one final tag, strictly after
    /// the last executed tag.
    fn execute_shutdown_tag(&mut self, env: &mut Environment) -> Result<bool> {
        if env.shutdown_reactions.is_empty() {
            return Ok(false);
        }
        let final_tag = env.current_tag().delay(Duration::ZERO);
        debug!(tag = %final_tag, "executing shutdown tag");

        self.phase = TagPhase::ComputeReady;
        env.begin_tag(final_tag);
        let mut triggered = vec![false; env.reaction_count()];
        for r in env.shutdown_reactions.clone() {
            triggered[r.index()] = true;
        }
        self.run_levels(env, final_tag, &mut triggered)?;
        self.phase = TagPhase::Idle;
        Ok(true)
    }
}

fn conflict_error(env: &Environment, conflict: WriteConflict) -> Error {
    let describe = |writer: Writer| match writer {
        Writer::Reaction(key) => env.reaction_name(key).to_string(),
        Writer::Delivery => "delayed delivery".to_string(),
    };
    Error::ConflictingWrite {
        port: env.port_name(conflict.port).to_string(),
        first: describe(conflict.first),
        second: describe(conflict.second),
    }
}

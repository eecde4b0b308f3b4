//! Motion-tracking arena binding
//!
//! The hand-assembled equivalent of a generated binding: a MainScheduler
//! reactor broadcasts capture triggers to a bank of CaptureNode reactors
//! on a periodic timer, and every node's sample feeds back into the
//! scheduler, which assembles them into frames.
//!
//! Samples are derived from (node index, frame sequence), so a run is
//! reproducible without any physical capture hardware attached.

use std::time::Duration;

use tracing::{debug, info};

use cadence_runtime::env::Environment;
use cadence_runtime::error::{Error, Result};
use cadence_runtime::types::{EffectKey, PortKey, ReactorKey, TimerKey, TriggerKey, Value};
use cadence_runtime::EnvBuilder;

/// Parameters of the arena program, mirroring the binding's reactor
/// parameters: how many capture nodes, and how often to trigger them.
#[derive(Debug, Clone)]
pub struct ArenaParams {
    pub node_count: usize,
    pub capture_rate: Duration,
    /// Stop after this many complete frames; None runs until an external
    /// stop, timeout, or queue exhaustion.
    pub rounds: Option<u64>,
}

impl Default for ArenaParams {
    fn default() -> Self {
        ArenaParams {
            node_count: 4,
            capture_rate: Duration::from_secs(1),
            rounds: None,
        }
    }
}

/// Runtime-owned bookkeeping plus typed handles to the binding's ports
/// and parameters, for host code and tests to reach into the program.
#[derive(Debug, Clone)]
pub struct ArenaHandles {
    pub params: ArenaParams,
    pub scheduler: ReactorKey,
    pub nodes: Vec<ReactorKey>,
    pub capture_timer: TimerKey,
    /// MainScheduler's broadcast output.
    pub capture_trigger: PortKey,
    /// MainScheduler's multiport input, one slot per node.
    pub data_in: Vec<PortKey>,
    pub node_outputs: Vec<PortKey>,
}

/// MainScheduler state: frame assembly progress.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// Sequence number of the next broadcast.
    pub seq: i64,
    pub samples_seen: u64,
    pub frames_complete: u64,
}

/// CaptureNode state.
#[derive(Debug)]
pub struct NodeState {
    pub index: usize,
    pub captures: u64,
}

/// Assemble the arena program into a fresh environment.
pub fn assemble(params: ArenaParams) -> Result<(Environment, ArenaHandles)> {
    if params.node_count == 0 {
        return Err(Error::InvalidDeclaration {
            item: "main_scheduler".to_string(),
            reason: "node_count is zero".to_string(),
        });
    }

    let mut builder = EnvBuilder::new();

    let scheduler = builder.add_reactor("main_scheduler", None)?;
    builder.set_state(scheduler, SchedulerState::default())?;
    let capture_timer = builder.add_timer(
        scheduler,
        "capture",
        Duration::ZERO,
        Some(params.capture_rate),
    )?;
    let capture_trigger = builder.add_output(scheduler, "capture_trigger")?;
    let mut data_in = Vec::with_capacity(params.node_count);
    for i in 0..params.node_count {
        data_in.push(builder.add_input(scheduler, &format!("data_in[{i}]"))?);
    }

    // Reaction 1: broadcast the capture trigger on every timer firing.
    builder.add_reaction(
        scheduler,
        "broadcast",
        &[TriggerKey::Timer(capture_timer)],
        &[],
        &[EffectKey::Port(capture_trigger)],
        Box::new(move |ctx| {
            let state = ctx.state_mut::<SchedulerState>()?;
            let seq = state.seq;
            state.seq += 1;
            debug!(seq, "broadcasting capture trigger");
            ctx.set(capture_trigger, Value::Int(seq))?;
            Ok(())
        }),
    )?;

    // The capture node bank, each wired trigger-in / data-out.
    let nodes = builder.add_bank("capture_node", None, params.node_count as u32)?;
    let mut node_outputs = Vec::with_capacity(params.node_count);
    for (index, &node) in nodes.iter().enumerate() {
        builder.set_state(node, NodeState { index, captures: 0 })?;
        let trigger_in = builder.add_input(node, "capture_trigger")?;
        let data_out = builder.add_output(node, "data_out")?;

        builder.add_reaction(
            node,
            "capture",
            &[TriggerKey::Port(trigger_in)],
            &[],
            &[EffectKey::Port(data_out)],
            Box::new(move |ctx| {
                let seq = ctx
                    .get(trigger_in)
                    .and_then(Value::as_int)
                    .unwrap_or_default();
                let state = ctx.state_mut::<NodeState>()?;
                state.captures += 1;
                ctx.set(data_out, Value::Vec3(sample(index, seq)))?;
                Ok(())
            }),
        )?;

        builder.connect(capture_trigger, trigger_in, None)?;
        builder.connect(data_out, data_in[index], None)?;
        node_outputs.push(data_out);
    }

    // Reaction 2: assemble arriving samples into frames.
    let collect_inputs = data_in.clone();
    let rounds = params.rounds;
    let collect_triggers: Vec<TriggerKey> =
        data_in.iter().map(|&p| TriggerKey::Port(p)).collect();
    builder.add_reaction(
        scheduler,
        "collect",
        &collect_triggers,
        &[],
        &[],
        Box::new(move |ctx| {
            let present = collect_inputs
                .iter()
                .filter(|&&p| ctx.is_present(p))
                .count();
            let complete = present == collect_inputs.len();
            let state = ctx.state_mut::<SchedulerState>()?;
            state.samples_seen += present as u64;
            if complete {
                state.frames_complete += 1;
                debug!(frame = state.frames_complete, "frame complete");
                if let Some(rounds) = rounds
                    && state.frames_complete >= rounds
                {
                    ctx.request_stop();
                }
            }
            Ok(())
        }),
    )?;

    let env = builder.build()?;
    info!(
        nodes = params.node_count,
        capture_rate_ms = params.capture_rate.as_millis() as u64,
        "arena assembled"
    );

    let handles = ArenaHandles {
        params,
        scheduler,
        nodes,
        capture_timer,
        capture_trigger,
        data_in,
        node_outputs,
    };
    Ok((env, handles))
}

/// Deterministic simulated sample for a node at a frame.
fn sample(index: usize, seq: i64) -> [f64; 3] {
    let phase = (index as f64) + 0.25 * (seq as f64);
    [phase.sin(), phase.cos(), index as f64]
}

//! Cadence Run - executes the motion-tracking arena program
//!
//! Host entry point: parses runtime flags, assembles the arena binding,
//! and drives it on the threaded scheduler. The exit status communicates
//! success or the first fatal build/reaction error.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_arena::ArenaParams;
use cadence_runtime::platform::{PhysicalClock, VirtualClock, WallClock};
use cadence_runtime::{FaultPolicy, RuntimeConfig, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum FaultPolicyArg {
    /// Abort the whole program on a reaction fault
    #[default]
    Abort,
    /// Quarantine the faulting reactor's subtree and keep running
    Isolate,
}

impl From<FaultPolicyArg> for FaultPolicy {
    fn from(arg: FaultPolicyArg) -> Self {
        match arg {
            FaultPolicyArg::Abort => FaultPolicy::Abort,
            FaultPolicyArg::Isolate => FaultPolicy::Isolate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "cadence-run")]
#[command(about = "Run the motion-tracking arena on the Cadence scheduler")]
struct Cli {
    /// Worker pool size (0 = all available cores)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Logical horizon in seconds; tags beyond it are not executed
    #[arg(long)]
    timeout: Option<f64>,

    /// Fast-forward to completion instead of waiting for physical time
    #[arg(long)]
    fast: bool,

    /// Keep running on queue exhaustion, waiting for physical events
    #[arg(long)]
    keep_alive: bool,

    /// What to do when a reaction body faults
    #[arg(long, value_enum, default_value = "abort")]
    fault_policy: FaultPolicyArg,

    /// Number of capture nodes in the arena
    #[arg(long, default_value = "4")]
    nodes: usize,

    /// Capture rate in milliseconds
    #[arg(long, default_value = "1000")]
    capture_rate_ms: u64,

    /// Stop after this many complete frames
    #[arg(long)]
    rounds: Option<u64>,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_run=info,cadence_runtime=info,cadence_arena=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = RuntimeConfig {
        timeout: cli.timeout.map(Duration::from_secs_f64),
        fast_forward: cli.fast,
        keep_alive: cli.keep_alive,
        fault_policy: cli.fault_policy.into(),
        ..RuntimeConfig::default()
    };
    if cli.workers > 0 {
        config.workers = cli.workers;
    }

    let params = ArenaParams {
        node_count: cli.nodes,
        capture_rate: Duration::from_millis(cli.capture_rate_ms),
        rounds: cli.rounds,
    };

    let (mut env, handles) = match cadence_arena::assemble(params) {
        Ok(assembled) => assembled,
        Err(e) => {
            error!("failed to assemble arena: {e}");
            std::process::exit(1);
        }
    };

    let clock: Box<dyn PhysicalClock> = if cli.fast {
        Box::new(VirtualClock::new())
    } else {
        match WallClock::try_new() {
            Ok(clock) => Box::new(clock),
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        }
    };

    let mut scheduler = match Scheduler::new(config, clock) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    match scheduler.run(&mut env) {
        Ok(report) => {
            let frames = env
                .read_state::<cadence_arena::SchedulerState, u64>(handles.scheduler, |s| {
                    s.frames_complete
                })
                .unwrap_or(0);
            info!(
                tags = report.tags_executed,
                reactions = report.reactions_invoked,
                frames,
                final_tag = %report.final_tag,
                "arena run complete"
            );
        }
        Err(e) => {
            error!("execution failed: {e}");
            std::process::exit(1);
        }
    }
}

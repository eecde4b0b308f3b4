//! Cadence Runtime
//!
//! A deterministic, logical-time reactor runtime: reactors connected by
//! typed ports, executed tag by tag over a fixed worker pool with one
//! global effect order regardless of thread count.

pub mod addr;
pub mod builder;
pub mod env;
pub mod error;
pub mod graph;
pub mod platform;
pub mod port;
pub mod queue;
pub mod scheduler;
pub mod time;
pub mod trace;
pub mod types;

pub use builder::EnvBuilder;
pub use env::Environment;
pub use error::{Error, ReactionFault, Result};
pub use scheduler::{
    ExecutionReport, FaultPolicy, ReactionCtx, ReactionFn, RuntimeConfig, Scheduler,
};
pub use time::{LogicalTime, Microstep, Tag};
pub use types::*;

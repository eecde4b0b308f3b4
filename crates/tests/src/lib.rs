//! Integration test harness for Cadence.
//!
//! This crate provides utilities for end-to-end testing of the full
//! pipeline: Assemble → Build → Execute → Verify. Runs default to
//! fast-forward on a virtual clock with trace recording enabled, so
//! scenarios are reproducible and comparable across worker counts.

use std::time::Duration;

use cadence_arena::{ArenaHandles, ArenaParams};
use cadence_runtime::env::Environment;
use cadence_runtime::platform::VirtualClock;
use cadence_runtime::trace::ExecutionTrace;
use cadence_runtime::types::ReactorKey;
use cadence_runtime::{ExecutionReport, Result, RuntimeConfig, Scheduler};

/// Test harness for running assembled environments to completion.
pub struct TestHarness {
    env: Environment,
    config: RuntimeConfig,
    report: Option<ExecutionReport>,
}

impl TestHarness {
    /// Wrap a freshly built environment. Fast-forward, single worker,
    /// trace recording on.
    pub fn new(env: Environment) -> Self {
        TestHarness {
            env,
            config: RuntimeConfig {
                workers: 1,
                fast_forward: true,
                record_trace: true,
                ..RuntimeConfig::default()
            },
            report: None,
        }
    }

    /// Assemble the arena program.
    ///
    /// # Panics
    ///
    /// Panics if assembly fails.
    pub fn arena(params: ArenaParams) -> (Self, ArenaHandles) {
        let (env, handles) = cadence_arena::assemble(params).expect("arena assembly failed");
        (Self::new(env), handles)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn with_config(mut self, f: impl FnOnce(&mut RuntimeConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Execute to completion, keeping the report for inspection.
    pub fn run(&mut self) -> Result<&ExecutionReport> {
        let mut scheduler = Scheduler::new(self.config.clone(), Box::new(VirtualClock::new()))?;
        let report = scheduler.run(&mut self.env)?;
        self.report = Some(report);
        Ok(self.report.as_ref().expect("report just stored"))
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn report(&self) -> &ExecutionReport {
        self.report.as_ref().expect("run() has not been called")
    }

    /// The recorded trace of the last run.
    pub fn trace(&self) -> &ExecutionTrace {
        self.report()
            .trace
            .as_ref()
            .expect("trace recording was disabled")
    }

    /// Inspect a reactor's state after the run.
    pub fn read_state<T: 'static, R>(
        &self,
        reactor: ReactorKey,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        self.env.read_state(reactor, f)
    }
}

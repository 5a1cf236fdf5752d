//! The kernel - tasks, the scheduler, and the application-facing wrapper
//!
//! Design:
//! - One `Manager` owns every task; there is no global state
//! - Two task kinds (stackless, stackful) share one scheduling loop through
//!   a statically bound operation table
//! - Single-threaded and cooperative: a task runs until it returns or delays
//! - Small, auditable core; embedders supply time and execution contexts

pub mod blocking_queue;
pub mod config;
pub mod error;
pub mod kind;
pub mod manager;
pub mod pool;
pub mod stackful;
pub mod stackless;
pub mod task;
pub mod task_context;
pub mod time;
pub mod trace;


pub use blocking_queue::QueueId;
pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kind::{StackfulConfig, StacklessConfig, TaskConfig, TaskEntry, TaskKind};
pub use manager::{IDLE_FOREVER_MS, Manager, Pass};
pub use pool::PoolId;
pub use stackless::{Flow, StacklessSemaphore};
pub use task::{Reclaim, TaskId, TaskInfo, TaskState};
pub use task_context::TaskContext;
pub use time::{Tick, TickSource};
pub use trace::{SchedStats, SchedTrace, TraceEvent, TraceKind};

use log::info;
use serde::Serialize;

/// Counters for a `run_for` / `run_until` stretch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KernelStats {
    pub passes: u64,
    pub dispatched: u64,
    pub urgent: u64,
    pub idle: u64,
    /// Message bus callbacks run between passes
    pub delivered: u64,
}

impl KernelStats {
    fn record(&mut self, pass: Pass, delivered: usize) {
        self.passes += 1;
        match pass {
            Pass::Dispatched(_) => self.dispatched += 1,
            Pass::Urgent(_) => self.urgent += 1,
            Pass::Idle { .. } => self.idle += 1,
        }
        self.delivered += delivered as u64;
    }
}

/// An application's kernel: one manager plus the loop that drives it
pub struct Kernel {
    manager: Manager,
}

impl Kernel {
    /// A kernel timed by the host monotonic clock at `config.tick_hz`
    pub fn new(config: KernelConfig) -> KernelResult<Self> {
        let clock = TickSource::monotonic(config.tick_hz)?;
        Self::with_clock(config, clock)
    }

    pub fn with_clock(config: KernelConfig, clock: TickSource) -> KernelResult<Self> {
        info!(
            "kernel up: {} priority levels, {} Hz, hunger {}",
            config.priority_levels,
            clock.hz(),
            if config.hunger { "on" } else { "off" }
        );
        Ok(Self {
            manager: Manager::new(config, clock)?,
        })
    }

    pub fn from_json(json: &str) -> KernelResult<Self> {
        Self::new(KernelConfig::from_json(json)?)
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut Manager {
        &mut self.manager
    }

    pub fn spawn_stackless<F>(
        &mut self,
        priority: u16,
        config: StacklessConfig,
        entry: F,
    ) -> KernelResult<TaskId>
    where
        F: FnMut(&mut TaskContext<'_>) -> Flow + Send + 'static,
    {
        self.manager.create_stackless(priority, config, entry)
    }

    /// Spawn a stackful task with the configured default stack size
    pub fn spawn_stackful<F>(&mut self, priority: u16, entry: F) -> KernelResult<TaskId>
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        let config = StackfulConfig::new(self.manager.config().default_stack_size);
        self.manager.create_stackful(priority, config, entry)
    }

    /// One scheduling pass, then deliver queued bus messages
    pub fn run_once(&mut self) -> Pass {
        self.step().0
    }

    fn step(&mut self) -> (Pass, usize) {
        let pass = self.manager.run_once();
        let delivered = self.manager.bus_mut().handle();
        (pass, delivered)
    }

    pub fn run_for(&mut self, passes: u64) -> KernelStats {
        let mut stats = KernelStats::default();
        for _ in 0..passes {
            let (pass, delivered) = self.step();
            stats.record(pass, delivered);
        }
        stats
    }

    /// Run until `done` holds (checked before every pass) or `max_passes`
    /// have run; returns whether `done` was reached
    pub fn run_until<F>(&mut self, mut done: F, max_passes: u64) -> (bool, KernelStats)
    where
        F: FnMut(&Manager) -> bool,
    {
        let mut stats = KernelStats::default();
        while stats.passes < max_passes {
            if done(&self.manager) {
                return (true, stats);
            }
            let (pass, delivered) = self.step();
            stats.record(pass, delivered);
        }
        (done(&self.manager), stats)
    }
}

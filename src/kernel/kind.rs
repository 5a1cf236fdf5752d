//! Task kinds
//!
//! The kernel knows exactly two kinds of task. Each kind provides the same
//! four operations (construct, reset, update, exec) through `KindOps`, bound
//! statically by `ops()`; the scheduling loop never needs to know which kind
//! it is driving.

use super::error::KernelResult;
use super::manager::Manager;
use super::stackful::{StackfulOps, StackfulState};
use super::stackless::{Flow, StacklessOps, StacklessState};
use super::task::TaskId;
use super::task_context::TaskContext;
use super::time::Tick;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Re-invoked state machine, no private stack
    Stackless,
    /// Coroutine with its own execution context
    Stackful,
}

/// Stackless construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacklessConfig {
    /// Timed activations before the task deletes itself
    pub count: u32,
    /// Period in ms; 0 means the task only runs when triggered
    pub interval_ms: u32,
}

impl StacklessConfig {
    /// Loop count that is never decremented
    pub const INFINITE: u32 = u32::MAX;

    pub fn new(count: u32, interval_ms: u32) -> Self {
        Self { count, interval_ms }
    }

    pub fn forever(interval_ms: u32) -> Self {
        Self::new(Self::INFINITE, interval_ms)
    }

    pub fn once(interval_ms: u32) -> Self {
        Self::new(1, interval_ms)
    }
}

/// Stackful construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackfulConfig {
    pub stack_size: usize,
}

impl StackfulConfig {
    pub fn new(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskConfig {
    Stackless(StacklessConfig),
    Stackful(StackfulConfig),
}

impl TaskConfig {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskConfig::Stackless(_) => TaskKind::Stackless,
            TaskConfig::Stackful(_) => TaskKind::Stackful,
        }
    }
}

impl From<StacklessConfig> for TaskConfig {
    fn from(config: StacklessConfig) -> Self {
        TaskConfig::Stackless(config)
    }
}

impl From<StackfulConfig> for TaskConfig {
    fn from(config: StackfulConfig) -> Self {
        TaskConfig::Stackful(config)
    }
}

/// Body of a stackless task: one activation per call
pub type StacklessFn = dyn FnMut(&mut TaskContext<'_>) -> Flow + Send;

/// Body of a stackful task: runs once from start to finish
pub type StackfulFn = dyn FnMut(&mut TaskContext<'_>) + Send;

/// Entry function of either kind
pub enum TaskEntry {
    Stackless(Box<StacklessFn>),
    Stackful(Box<StackfulFn>),
}

impl TaskEntry {
    pub fn stackless<F>(f: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>) -> Flow + Send + 'static,
    {
        TaskEntry::Stackless(Box::new(f))
    }

    pub fn stackful<F>(f: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        TaskEntry::Stackful(Box::new(f))
    }

    /// An entry that does nothing; parked pool members carry it
    pub fn idle(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Stackless => TaskEntry::stackless(|_| Flow::Done),
            TaskKind::Stackful => TaskEntry::stackful(|_| {}),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskEntry::Stackless(_) => TaskKind::Stackless,
            TaskEntry::Stackful(_) => TaskKind::Stackful,
        }
    }
}

/// Kind-specific payload of a task record
pub(crate) enum KindState {
    Stackless(StacklessState),
    Stackful(StackfulState),
}

impl KindState {
    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            KindState::Stackless(_) => TaskKind::Stackless,
            KindState::Stackful(_) => TaskKind::Stackful,
        }
    }

    pub(crate) fn stackless(&self) -> Option<&StacklessState> {
        match self {
            KindState::Stackless(state) => Some(state),
            KindState::Stackful(_) => None,
        }
    }

    pub(crate) fn stackless_mut(&mut self) -> Option<&mut StacklessState> {
        match self {
            KindState::Stackless(state) => Some(state),
            KindState::Stackful(_) => None,
        }
    }

    pub(crate) fn stackful_mut(&mut self) -> Option<&mut StackfulState> {
        match self {
            KindState::Stackful(state) => Some(state),
            KindState::Stackless(_) => None,
        }
    }
}

/// Per-kind operations driven by the manager
pub(crate) trait KindOps: Sync {
    /// Finish construction once the record sits in the blocked list
    fn construct(&self, manager: &mut Manager, id: TaskId) -> KernelResult<()>;

    /// Return the task to its freshly constructed condition
    fn reset(&self, manager: &mut Manager, id: TaskId) -> KernelResult<()>;

    /// Evaluate a blocked task's wake conditions; returns the tick used
    fn update(&self, manager: &mut Manager, id: TaskId) -> Tick;

    /// Run one activation of the task
    fn exec(&self, manager: &mut Manager, id: TaskId);
}

pub(crate) fn ops(kind: TaskKind) -> &'static dyn KindOps {
    match kind {
        TaskKind::Stackless => &StacklessOps,
        TaskKind::Stackful => &StackfulOps,
    }
}

//! coop-kernel - a cooperative, priority-based task kernel
//!
//! Design principles:
//! - Tractable: one manager, a handful of lists, no hidden threads of control
//! - Cooperative: a task runs until it returns or delays; nothing preempts it
//! - Two task kinds behind one scheduler: stackless state machines and
//!   stackful coroutines with their own execution context
//! - The embedder owns time and sleep: the kernel reports how long it may
//!   idle and never blocks on its own
//!
//! Layout:
//! - `kernel`: tasks, the scheduler, blocking queues, task pools, tracing
//! - `utils`: the fixed-size element queue and the message bus
//! - `platform`: tick sources and execution contexts for stackful tasks

pub mod kernel;
pub mod platform;
pub mod utils;

pub use kernel::{
    Flow, Kernel, KernelConfig, KernelError, KernelResult, KernelStats, Manager, Pass, PoolId,
    QueueId, StackfulConfig, StacklessConfig, TaskContext, TaskId, TaskKind, TaskState,
    TickSource,
};
pub use utils::{FixedQueue, MessageBus};

//! Task base record
//!
//! Every task, whatever its kind, carries the same scheduling fields:
//! priority, state, signal bits, timing and list location. The kind-specific
//! payload (loop count and marker, or execution context) hangs off `body`.
//!
//! All state changes go through `Task::set_state`, which enforces:
//! - Deleted is absorbing (only Deleted -> Deleted is accepted)
//! - A Suspended task only leaves Suspended while a resume is in flight
//! - Delete always succeeds

use super::error::{KernelError, KernelResult};
use super::kind::{KindState, TaskKind};
use super::pool::PoolId;
use super::time::Tick;
use bitflags::bitflags;
use log::debug;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Handle to a task owned by a `Manager`
///
/// The generation guards against a handle outliving its task: once the slot
/// is reused, the old handle is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}.{})", self.index, self.generation)
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting in a ready list for dispatch
    Ready,
    /// Currently executing
    Running,
    /// Waiting for a deadline or an event
    Blocked,
    /// Parked until resumed; time does not count toward its delay
    Suspended,
    /// Logically deleted, awaiting reclamation
    Deleted,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Scheduler-owned signal bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Signal: u8 {
        const READY = 1 << 0;
        const TIMEOUT = 1 << 1;
        const EVENT = 1 << 2;
        const RESUME = 1 << 3;
    }
}

bitflags! {
    /// Owner-settable flags; the scheduler reads them but never writes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskFlags: u8 {
        /// Eligible for hunger elevation while ready
        const HUNGER = 1 << 0;
    }
}

/// Which scheduler list a task currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    Ready(u16),
    Blocked,
    Suspended,
    Destroy,
    /// Running, or in transit between lists
    Detached,
}

/// What happens to a task's record once it is reclaimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reclaim {
    /// Drop the record
    Free,
    /// Park the record back in its pool
    Pool(PoolId),
}

/// User argument attached to a task
pub type TaskArg = Arc<dyn Any + Send + Sync>;

pub(crate) struct Task {
    pub(crate) generation: u32,
    pub(crate) state: TaskState,
    pub(crate) priority: u16,
    pub(crate) signal: Signal,
    pub(crate) flags: TaskFlags,
    /// Period (stackless) or last requested delay (stackful), in ticks
    pub(crate) delay: Tick,
    pub(crate) wakeup: Tick,
    pub(crate) suspended_at: Tick,
    /// Lateness in ms relative to `wakeup`; negative when woken early
    pub(crate) timeout: i32,
    pub(crate) hunger_ms: u32,
    pub(crate) in_hunger: bool,
    pub(crate) location: Location,
    pub(crate) reclaim: Reclaim,
    pub(crate) arg: Option<TaskArg>,
    pub(crate) user_data: Option<Box<dyn Any + Send>>,
    pub(crate) dispatches: u64,
    pub(crate) body: KindState,
}

impl Task {
    pub(crate) fn new(generation: u32, priority: u16, body: KindState) -> Self {
        Self {
            generation,
            state: TaskState::Blocked,
            priority,
            signal: Signal::empty(),
            flags: TaskFlags::empty(),
            delay: 0,
            wakeup: 0,
            suspended_at: 0,
            timeout: 0,
            hunger_ms: 0,
            in_hunger: false,
            location: Location::Detached,
            reclaim: Reclaim::Free,
            arg: None,
            user_data: None,
            dispatches: 0,
            body,
        }
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.body.kind()
    }

    pub(crate) fn set_state(&mut self, new: TaskState) -> KernelResult<()> {
        if new == TaskState::Deleted {
            self.state = new;
            return Ok(());
        }
        match self.state {
            TaskState::Deleted => {
                debug!("rejecting {} -> {}: task is deleted", self.state, new);
                return Err(KernelError::InvalidState(TaskState::Deleted));
            }
            TaskState::Suspended if !self.signal.contains(Signal::RESUME) => {
                debug!("rejecting {} -> {}: no resume pending", self.state, new);
                return Err(KernelError::InvalidState(TaskState::Suspended));
            }
            TaskState::Suspended => self.signal.remove(Signal::RESUME),
            _ => {}
        }
        self.state = new;
        Ok(())
    }

    /// Fold Timeout and Event into a single Ready signal
    pub(crate) fn coalesce_ready(&mut self) {
        if self.signal.intersects(Signal::TIMEOUT | Signal::EVENT) {
            self.signal.remove(Signal::TIMEOUT | Signal::EVENT);
            self.signal.insert(Signal::READY);
        }
    }

    /// Restore the common fields to their construction values
    ///
    /// Bypasses `set_state`: a reset revives even deleted records.
    pub(crate) fn reset_base(&mut self) {
        self.state = TaskState::Blocked;
        self.flags = TaskFlags::empty();
        self.signal = Signal::empty();
        self.wakeup = 0;
        self.suspended_at = 0;
        self.timeout = 0;
        self.hunger_ms = 0;
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub priority: u16,
    pub timeout_ms: i32,
    pub wakeup: Tick,
    pub hungry: bool,
    pub dispatches: u64,
    pub reclaim: Reclaim,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kind::StacklessConfig;
    use crate::kernel::stackless::{Flow, StacklessState};

    fn task() -> Task {
        let body = StacklessState::new(StacklessConfig::once(0), Box::new(|_| Flow::Done));
        Task::new(0, 3, KindState::Stackless(body))
    }

    #[test]
    fn test_new_task_is_blocked() {
        let t = task();
        assert_eq!(t.state, TaskState::Blocked);
        assert_eq!(t.kind(), TaskKind::Stackless);
        assert!(t.signal.is_empty());
    }

    #[test]
    fn test_deleted_is_absorbing() {
        let mut t = task();
        t.set_state(TaskState::Deleted).unwrap();
        for state in [
            TaskState::Ready,
            TaskState::Running,
            TaskState::Blocked,
            TaskState::Suspended,
        ] {
            assert_eq!(
                t.set_state(state),
                Err(KernelError::InvalidState(TaskState::Deleted))
            );
        }
        assert!(t.set_state(TaskState::Deleted).is_ok());
        assert_eq!(t.state, TaskState::Deleted);
    }

    #[test]
    fn test_suspended_needs_resume() {
        let mut t = task();
        t.set_state(TaskState::Suspended).unwrap();
        assert_eq!(
            t.set_state(TaskState::Blocked),
            Err(KernelError::InvalidState(TaskState::Suspended))
        );
        assert_eq!(t.state, TaskState::Suspended);

        t.signal.insert(Signal::RESUME);
        t.set_state(TaskState::Blocked).unwrap();
        assert_eq!(t.state, TaskState::Blocked);
        assert!(!t.signal.contains(Signal::RESUME));
    }

    #[test]
    fn test_coalesce_ready() {
        let mut t = task();
        t.signal.insert(Signal::TIMEOUT | Signal::EVENT);
        t.coalesce_ready();
        assert_eq!(t.signal, Signal::READY);

        let mut idle = task();
        idle.coalesce_ready();
        assert!(idle.signal.is_empty());
    }

    #[test]
    fn test_reset_base_revives() {
        let mut t = task();
        t.flags.insert(TaskFlags::HUNGER);
        t.timeout = -12;
        t.wakeup = 99;
        t.set_state(TaskState::Deleted).unwrap();

        t.reset_base();
        assert_eq!(t.state, TaskState::Blocked);
        assert!(t.flags.is_empty());
        assert_eq!(t.timeout, 0);
        assert_eq!(t.wakeup, 0);
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId::new(4, 2).to_string(), "Task(4.2)");
    }
}

//! Stackful tasks
//!
//! A stackful task runs its body inside an execution context obtained from
//! the manager's `ContextPort`. `exec` switches into the context; the body
//! runs until it calls `TaskContext::delay` (which suspends the context) or
//! returns (the trampoline then deletes the task).
//!
//! The body reaches the manager through a `ManagerLink`: the scheduler
//! publishes its own address right before every switch, and the body
//! re-reads it after every suspension. This is the only place the kernel
//! dereferences a raw pointer.

use super::error::{KernelError, KernelResult};
use super::kind::{KindOps, StackfulConfig, StackfulFn};
use super::manager::Manager;
use super::task::{Signal, TaskId, TaskState};
use super::task_context::TaskContext;
use super::time::Tick;
use crate::platform::{ContextEntry, ExecutionContext, Suspender, Switch};
use log::{debug, warn};
use std::panic;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

/// Body shared between the task record and its trampoline
pub(crate) type SharedEntry = Arc<Mutex<Box<StackfulFn>>>;

pub(crate) struct StackfulState {
    pub(crate) stack_size: usize,
    pub(crate) entry: SharedEntry,
    pub(crate) context: Option<Box<dyn ExecutionContext>>,
}

impl StackfulState {
    pub(crate) fn new(config: StackfulConfig, entry: Box<StackfulFn>) -> Self {
        Self {
            stack_size: config.stack_size,
            entry: Arc::new(Mutex::new(entry)),
            context: None,
        }
    }

    /// Swap in a new body. Fails with `Busy` while the current body is
    /// mid-run; it takes effect from the next reset.
    pub(crate) fn replace_entry(&mut self, entry: Box<StackfulFn>) -> KernelResult<()> {
        let mut slot = match self.entry.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(KernelError::Busy),
        };
        *slot = entry;
        Ok(())
    }
}

/// Where a suspended body finds its manager again
pub(crate) struct ManagerLink {
    manager: AtomicPtr<Manager>,
}

impl ManagerLink {
    pub(crate) fn new() -> Self {
        Self {
            manager: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn publish(&self, manager: &mut Manager) {
        self.manager.store(manager, Ordering::Release);
    }

    /// # Safety
    ///
    /// Only callable from a stackful body that was switched in after the
    /// latest `publish`. The scheduler is parked inside `switch_in` for as
    /// long as the returned reference is used, and the reference must not be
    /// used again once the body suspends.
    pub(crate) unsafe fn acquire<'a>(&self) -> &'a mut Manager {
        // SAFETY: upheld by the caller; see above
        unsafe { &mut *self.manager.load(Ordering::Acquire) }
    }
}

fn trampoline(id: TaskId, entry: SharedEntry, link: Arc<ManagerLink>) -> ContextEntry {
    Box::new(move |suspender: &dyn Suspender| {
        // SAFETY: we were just switched in, right after the scheduler published itself
        let manager = unsafe { link.acquire() };
        let mut body = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cx = TaskContext::stackful(manager, id, suspender, &link);
        (*body)(&mut cx);
        debug!("{} body returned", id);
        let _ = cx.manager().delete(id);
    })
}

pub(crate) struct StackfulOps;

impl KindOps for StackfulOps {
    fn construct(&self, manager: &mut Manager, id: TaskId) -> KernelResult<()> {
        let port = manager.context_port();
        let link = manager.link();
        let state = manager
            .task_mut(id)?
            .body
            .stackful_mut()
            .ok_or(KernelError::NotSupported)?;
        // Cancel the previous context before building its replacement
        state.context = None;
        let entry = trampoline(id, Arc::clone(&state.entry), link);
        state.context = Some(port.create(state.stack_size, entry)?);
        Ok(())
    }

    fn reset(&self, manager: &mut Manager, id: TaskId) -> KernelResult<()> {
        if manager.current_task() == Some(id) {
            return Err(KernelError::InvalidState(TaskState::Running));
        }
        manager.reset_base(id)?;
        manager.task_mut(id)?.delay = 0;
        manager.leave_queue_waits(id);
        self.construct(manager, id)
    }

    fn update(&self, manager: &mut Manager, id: TaskId) -> Tick {
        let now = manager.clock().now();
        if let Ok((task, clock)) = manager.task_and_clock(id) {
            task.timeout = clock.elapsed_ms(now, task.wakeup);
            if now >= task.wakeup {
                task.signal.insert(Signal::TIMEOUT);
            }
            task.coalesce_ready();
        }
        now
    }

    fn exec(&self, manager: &mut Manager, id: TaskId) {
        let mut context = match manager.task_mut(id) {
            Ok(task) if matches!(task.state, TaskState::Running | TaskState::Deleted) => return,
            Ok(task) => {
                let _ = task.set_state(TaskState::Running);
                match task.body.stackful_mut().and_then(|s| s.context.take()) {
                    Some(context) => context,
                    None => {
                        warn!("{} has no execution context", id);
                        return;
                    }
                }
            }
            Err(_) => return,
        };

        manager.link().publish(manager);
        let switch = context.switch_in();

        if let Ok(task) = manager.task_mut(id)
            && let Some(state) = task.body.stackful_mut()
            && state.context.is_none()
        {
            state.context = Some(context);
        }
        if let Switch::Panicked(payload) = switch {
            panic::resume_unwind(payload);
        }
    }
}

impl TaskContext<'_> {
    /// Suspend the calling stackful task for `ms` milliseconds
    ///
    /// Returns early if the task is triggered; `timeout()` then reports how
    /// early (as a negative value).
    pub fn delay(&mut self, ms: u32) -> KernelResult<()> {
        let Some(resume) = self.resume else {
            return Err(KernelError::NotSupported);
        };
        let id = self.id;
        if self.manager.current_task() != Some(id) {
            return Err(KernelError::Busy);
        }
        let (task, clock) = self.manager.task_and_clock(id)?;
        task.delay = clock.ms_to_ticks(ms);
        task.wakeup = clock.now().saturating_add(task.delay);

        resume.suspender.suspend();
        // SAFETY: suspend only returns once the scheduler has switched back in
        self.manager = unsafe { resume.link.acquire() };
        Ok(())
    }

    /// Give the other ready tasks a turn
    pub fn yield_now(&mut self) -> KernelResult<()> {
        self.delay(0)
    }
}

//! Stackless tasks
//!
//! A stackless task is an ordinary closure the scheduler calls once per
//! activation. Its "program counter" is a plain integer marker: the body
//! branches on `TaskContext::marker()` and tells the scheduler where to pick
//! up next time by returning a `Flow`.
//!
//! Timing:
//! - A nonzero interval makes the task wake every `interval` after its
//!   previous activation finished; 0 means it only runs when triggered
//! - Each timed activation consumes one loop iteration; yields give it back
//! - A task whose count reached 0 is deleted on its next timed check

use super::error::{KernelError, KernelResult};
use super::kind::{KindOps, StacklessConfig, StacklessFn};
use super::manager::Manager;
use super::task::{Signal, TaskId, TaskState};
use super::task_context::TaskContext;
use super::time::Tick;
use log::debug;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// What a stackless body asks the scheduler to do after an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Activation finished; the loop iteration is consumed
    Done,
    /// Resume at `marker` on the next activation
    Yield(u32),
    /// Resume at `marker` and change the period to `ms`
    Delay { marker: u32, ms: u32 },
    /// Start over from marker 0 on the next activation
    Restart,
    /// Delete the task now, whatever its remaining count
    Exit,
}

pub(crate) struct StacklessState {
    pub(crate) count: u32,
    pub(crate) count_max: u32,
    pub(crate) interval_ms: u32,
    pub(crate) marker: u32,
    pub(crate) hook: Option<Box<dyn Any + Send>>,
    pub(crate) entry: Option<Box<StacklessFn>>,
}

impl StacklessState {
    pub(crate) fn new(config: StacklessConfig, entry: Box<StacklessFn>) -> Self {
        Self {
            count: config.count,
            count_max: config.count,
            interval_ms: config.interval_ms,
            marker: 0,
            hook: None,
            entry: Some(entry),
        }
    }

    fn is_infinite(&self) -> bool {
        self.count == StacklessConfig::INFINITE
    }

    /// Hand back the iteration a timed activation consumed
    fn repeat_once(&mut self) {
        if !self.is_infinite() && self.count < self.count_max {
            self.count += 1;
        }
    }
}

pub(crate) struct StacklessOps;

impl KindOps for StacklessOps {
    fn construct(&self, manager: &mut Manager, id: TaskId) -> KernelResult<()> {
        let (task, clock) = manager.task_and_clock(id)?;
        let interval = task
            .body
            .stackless()
            .map(|state| state.interval_ms)
            .ok_or(KernelError::NotSupported)?;
        task.delay = clock.ms_to_ticks(interval);
        task.wakeup = clock.now().saturating_add(task.delay);
        Ok(())
    }

    fn reset(&self, manager: &mut Manager, id: TaskId) -> KernelResult<()> {
        manager.reset_base(id)?;
        let (task, clock) = manager.task_and_clock(id)?;
        let state = task
            .body
            .stackless_mut()
            .ok_or(KernelError::NotSupported)?;
        state.count = state.count_max;
        state.marker = 0;
        task.delay = clock.ms_to_ticks(state.interval_ms);
        task.wakeup = clock.now().saturating_add(task.delay);
        Ok(())
    }

    fn update(&self, manager: &mut Manager, id: TaskId) -> Tick {
        let now = manager.clock().now();
        let Ok((task, clock)) = manager.task_and_clock(id) else {
            return now;
        };

        if task.delay != 0 {
            let Some(state) = task.body.stackless_mut() else {
                return now;
            };
            if state.count == 0 {
                debug!("{} finished its loop count", id);
                let _ = manager.delete(id);
                return now;
            }
            task.timeout = clock.elapsed_ms(now, task.wakeup);
            if now >= task.wakeup {
                task.signal.insert(Signal::TIMEOUT);
                if !state.is_infinite() {
                    state.count -= 1;
                }
            }
        }
        task.coalesce_ready();
        now
    }

    fn exec(&self, manager: &mut Manager, id: TaskId) {
        let entry = match manager.task_mut(id) {
            Ok(task) => {
                let _ = task.set_state(TaskState::Running);
                task.body.stackless_mut().and_then(|state| state.entry.take())
            }
            Err(_) => return,
        };

        let flow = match entry {
            Some(mut entry) => {
                let flow = entry(&mut TaskContext::new(manager, id));
                // The body may have installed a replacement entry while running
                if let Ok(task) = manager.task_mut(id)
                    && let Some(state) = task.body.stackless_mut()
                    && state.entry.is_none()
                {
                    state.entry = Some(entry);
                }
                flow
            }
            None => Flow::Done,
        };

        let mut exit = false;
        if let Ok((task, clock)) = manager.task_and_clock(id) {
            if let Some(state) = task.body.stackless_mut() {
                match flow {
                    Flow::Done => {}
                    Flow::Yield(marker) => {
                        state.marker = marker;
                        state.repeat_once();
                    }
                    Flow::Delay { marker, ms } => {
                        state.marker = marker;
                        state.repeat_once();
                        task.delay = clock.ms_to_ticks(ms);
                    }
                    Flow::Restart => {
                        state.marker = 0;
                        state.repeat_once();
                    }
                    Flow::Exit => {
                        state.marker = 0;
                        exit = true;
                    }
                }
            }
            if task.delay != 0 {
                task.wakeup = clock.now().saturating_add(task.delay);
            }
        }
        if exit {
            let _ = manager.delete(id);
        }
    }
}

impl Manager {
    fn stackless_state(&self, id: TaskId) -> KernelResult<&StacklessState> {
        self.task(id)?
            .body
            .stackless()
            .ok_or(KernelError::NotSupported)
    }

    fn stackless_state_mut(&mut self, id: TaskId) -> KernelResult<&mut StacklessState> {
        self.task_mut(id)?
            .body
            .stackless_mut()
            .ok_or(KernelError::NotSupported)
    }

    /// Remaining timed activations
    pub fn stackless_count(&self, id: TaskId) -> KernelResult<u32> {
        Ok(self.stackless_state(id)?.count)
    }

    pub fn set_stackless_count(&mut self, id: TaskId, count: u32) -> KernelResult<()> {
        let state = self.stackless_state_mut(id)?;
        if count > state.count_max {
            return Err(KernelError::InvalidArgument("count exceeds maximum"));
        }
        state.count = count;
        Ok(())
    }

    pub fn stackless_count_max(&self, id: TaskId) -> KernelResult<u32> {
        Ok(self.stackless_state(id)?.count_max)
    }

    /// Change the count restored by `reset`; the current count is clamped
    pub fn set_stackless_count_max(&mut self, id: TaskId, max: u32) -> KernelResult<()> {
        let state = self.stackless_state_mut(id)?;
        state.count_max = max;
        state.count = state.count.min(max);
        Ok(())
    }

    pub fn stackless_marker(&self, id: TaskId) -> KernelResult<u32> {
        Ok(self.stackless_state(id)?.marker)
    }

    pub fn set_stackless_marker(&mut self, id: TaskId, marker: u32) -> KernelResult<()> {
        self.stackless_state_mut(id)?.marker = marker;
        Ok(())
    }

    pub(crate) fn stackless_hook_mut(
        &mut self,
        id: TaskId,
    ) -> KernelResult<&mut Option<Box<dyn Any + Send>>> {
        Ok(&mut self.stackless_state_mut(id)?.hook)
    }
}

/// Counting semaphore for stackless bodies
///
/// Never blocks: a body that fails `try_wait` yields and tries again on its
/// next activation. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct StacklessSemaphore {
    count: Arc<AtomicU32>,
}

impl StacklessSemaphore {
    pub fn new(count: u32) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(count)),
        }
    }

    /// Take one unit if available
    pub fn try_wait(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    pub fn signal(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(1))
            });
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

//! Task manager
//!
//! Owns every task and the lists that place them:
//! - `ready[p]` per priority level (0 is most urgent), FIFO within a level
//! - `blocked`, `suspended`, `destroy`
//! - `hunger`, a side list of ready tasks eligible for elevation
//!
//! A task sits in exactly one of the placement lists, except while it is the
//! running task, when it sits in none.
//!
//! One call to `run_once` is one scheduling pass:
//! 1. Sweep the blocked list, moving tasks whose wake condition holds to the
//!    tail of their ready level, and note the nearest pending deadline
//! 2. If an urgent task is pending, run only that and stop
//! 3. Otherwise run the head of the most urgent non-empty ready level
//! 4. If nothing ran: reclaim deleted tasks, then hand the remaining time to
//!    the nearest deadline to the idle callback
//! 5. If something ran: elevate hungry tasks by how long they have waited

use super::blocking_queue::BlockingQueue;
use super::config::KernelConfig;
use super::error::{KernelError, KernelResult};
use super::kind::{
    KindState, StackfulConfig, StacklessConfig, TaskConfig, TaskEntry, TaskKind, ops,
};
use super::pool::Pool;
use super::stackful::{ManagerLink, StackfulState};
use super::stackless::{Flow, StacklessState};
use super::task::{Location, Reclaim, Signal, Task, TaskArg, TaskFlags, TaskId, TaskInfo, TaskState};
use super::task_context::TaskContext;
use super::time::{Tick, TickSource};
use super::trace::{SchedTrace, TraceKind};
use crate::platform::{ContextPort, ThreadPort};
use crate::utils::mbus::MessageBus;
use log::{debug, trace, warn};
use slab::Slab;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Called with the longest time (ms) the host may sleep
pub type IdleFn = dyn FnMut(u32) + Send;

/// Idle budget reported when no deadline is pending
pub const IDLE_FOREVER_MS: u32 = i32::MAX as u32;

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// The urgent task ran
    Urgent(TaskId),
    /// The head of a ready level ran
    Dispatched(TaskId),
    /// Nothing was ready
    Idle { max_idle_ms: u32 },
}

pub struct Manager {
    tasks: Slab<Task>,
    next_generation: u32,
    ready: Vec<VecDeque<TaskId>>,
    blocked: VecDeque<TaskId>,
    suspended: VecDeque<TaskId>,
    destroy: VecDeque<TaskId>,
    hunger: VecDeque<TaskId>,
    current: Option<TaskId>,
    urgent: Option<TaskId>,
    clock: TickSource,
    on_idle: Option<Box<IdleFn>>,
    port: Arc<dyn ContextPort>,
    link: Arc<ManagerLink>,
    pub(crate) queues: Slab<BlockingQueue>,
    pub(crate) pools: Slab<Pool>,
    bus: MessageBus,
    trace: SchedTrace,
    config: KernelConfig,
}

impl Manager {
    pub fn new(config: KernelConfig, clock: TickSource) -> KernelResult<Self> {
        config.validate()?;
        Ok(Self {
            tasks: Slab::new(),
            next_generation: 0,
            ready: vec![VecDeque::new(); config.priority_levels as usize],
            blocked: VecDeque::new(),
            suspended: VecDeque::new(),
            destroy: VecDeque::new(),
            hunger: VecDeque::new(),
            current: None,
            urgent: None,
            clock,
            on_idle: None,
            port: Arc::new(ThreadPort::new()),
            link: Arc::new(ManagerLink::new()),
            queues: Slab::new(),
            pools: Slab::new(),
            bus: MessageBus::new(config.mbus_queue_depth),
            trace: SchedTrace::new(config.trace_capacity),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn clock(&self) -> &TickSource {
        &self.clock
    }

    pub fn set_idle<F>(&mut self, on_idle: F)
    where
        F: FnMut(u32) + Send + 'static,
    {
        self.on_idle = Some(Box::new(on_idle));
    }

    /// Replace the execution-context provider for stackful tasks created
    /// or reset from now on
    pub fn set_context_port<P>(&mut self, port: P)
    where
        P: ContextPort + 'static,
    {
        self.port = Arc::new(port);
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MessageBus {
        &mut self.bus
    }

    pub fn trace(&self) -> &SchedTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut SchedTrace {
        &mut self.trace
    }

    /// Next value of the generation counter shared by task, queue and pool
    /// handles
    pub(crate) fn fresh_generation(&mut self) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        generation
    }

    pub(crate) fn context_port(&self) -> Arc<dyn ContextPort> {
        Arc::clone(&self.port)
    }

    pub(crate) fn link(&self) -> Arc<ManagerLink> {
        Arc::clone(&self.link)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub(crate) fn task(&self, id: TaskId) -> KernelResult<&Task> {
        self.tasks
            .get(id.index())
            .filter(|task| task.generation == id.generation())
            .ok_or(KernelError::InvalidArgument("stale or unknown task handle"))
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> KernelResult<&mut Task> {
        self.tasks
            .get_mut(id.index())
            .filter(|task| task.generation == id.generation())
            .ok_or(KernelError::InvalidArgument("stale or unknown task handle"))
    }

    pub(crate) fn task_and_clock(&mut self, id: TaskId) -> KernelResult<(&mut Task, &TickSource)> {
        let task = self
            .tasks
            .get_mut(id.index())
            .filter(|task| task.generation == id.generation())
            .ok_or(KernelError::InvalidArgument("stale or unknown task handle"))?;
        Ok((task, &self.clock))
    }

    /// The record in a slot, whatever its generation
    pub(crate) fn record_at(&mut self, index: usize) -> Option<&mut Task> {
        self.tasks.get_mut(index)
    }

    /// Free a record for good
    pub(crate) fn drop_record(&mut self, id: TaskId) {
        if self.task(id).is_ok() {
            self.detach(id);
            self.tasks.remove(id.index());
            debug!("reclaimed {}", id);
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.task(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The task whose body is executing, if any
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    pub fn urgent_task(&self) -> Option<TaskId> {
        self.urgent
    }

    fn check_priority(&self, priority: u16) -> KernelResult<()> {
        if priority >= self.config.priority_levels {
            return Err(KernelError::InvalidArgument("priority out of range"));
        }
        Ok(())
    }

    // ========================================================================
    // List placement
    // ========================================================================

    fn list_mut(&mut self, location: Location) -> Option<&mut VecDeque<TaskId>> {
        match location {
            Location::Ready(p) => self.ready.get_mut(p as usize),
            Location::Blocked => Some(&mut self.blocked),
            Location::Suspended => Some(&mut self.suspended),
            Location::Destroy => Some(&mut self.destroy),
            Location::Detached => None,
        }
    }

    /// Take the task out of whichever placement list holds it
    fn detach(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id.index()) else {
            return;
        };
        let location = std::mem::replace(&mut task.location, Location::Detached);
        if let Some(list) = self.list_mut(location)
            && let Some(pos) = list.iter().position(|&t| t == id)
        {
            list.remove(pos);
        }
    }

    fn attach(&mut self, id: TaskId, location: Location) {
        self.detach(id);
        if let Some(list) = self.list_mut(location) {
            list.push_back(id);
        }
        if let Some(task) = self.tasks.get_mut(id.index()) {
            task.location = location;
        }
    }

    fn leave_hunger(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(id.index())
            && task.in_hunger
        {
            task.in_hunger = false;
            self.hunger.retain(|&t| t != id);
        }
    }

    pub(crate) fn reset_base(&mut self, id: TaskId) -> KernelResult<()> {
        self.task_mut(id)?.reset_base();
        self.leave_hunger(id);
        self.attach(id, Location::Blocked);
        Ok(())
    }

    /// How many placement lists hold `id`
    #[cfg(test)]
    pub(crate) fn list_memberships(&self, id: TaskId) -> usize {
        self.ready
            .iter()
            .chain([&self.blocked, &self.suspended, &self.destroy])
            .map(|list| list.iter().filter(|&&t| t == id).count())
            .sum()
    }

    fn update_timeout(&mut self, id: TaskId) {
        let now = self.clock.now();
        if let Ok((task, clock)) = self.task_and_clock(id) {
            task.timeout = clock.elapsed_ms(now, task.wakeup);
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub fn create(
        &mut self,
        priority: u16,
        config: TaskConfig,
        entry: TaskEntry,
    ) -> KernelResult<TaskId> {
        self.check_priority(priority)?;
        let body = match (config, entry) {
            (TaskConfig::Stackless(config), TaskEntry::Stackless(entry)) => {
                KindState::Stackless(StacklessState::new(config, entry))
            }
            (TaskConfig::Stackful(config), TaskEntry::Stackful(entry)) => {
                if config.stack_size == 0 {
                    return Err(KernelError::InvalidArgument("zero stack size"));
                }
                KindState::Stackful(StackfulState::new(config, entry))
            }
            _ => return Err(KernelError::NotSupported),
        };

        let generation = self.fresh_generation();
        let kind = body.kind();
        let slot = self.tasks.vacant_entry();
        let id = TaskId::new(slot.key(), generation);
        slot.insert(Task::new(generation, priority, body));
        self.attach(id, Location::Blocked);

        if let Err(e) = ops(kind).construct(self, id) {
            self.detach(id);
            self.tasks.remove(id.index());
            debug!("construction of {:?} task failed: {}", kind, e);
            return Err(e);
        }
        debug!("created {} ({:?}, priority {})", id, kind, priority);
        Ok(id)
    }

    pub fn create_stackless<F>(
        &mut self,
        priority: u16,
        config: StacklessConfig,
        entry: F,
    ) -> KernelResult<TaskId>
    where
        F: FnMut(&mut TaskContext<'_>) -> Flow + Send + 'static,
    {
        self.create(priority, config.into(), TaskEntry::stackless(entry))
    }

    pub fn create_stackful<F>(
        &mut self,
        priority: u16,
        config: StackfulConfig,
        entry: F,
    ) -> KernelResult<TaskId>
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        self.create(priority, config.into(), TaskEntry::stackful(entry))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Mark a task deleted; it is reclaimed on the next idle pass
    pub fn delete(&mut self, id: TaskId) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        let deleted = task.set_state(TaskState::Deleted);
        debug_assert!(deleted.is_ok(), "Deleted is reachable from every state");
        self.leave_hunger(id);
        if self.urgent == Some(id) {
            self.urgent = None;
        }
        // A running task is detached; it lands in the destroy list now and
        // is reclaimed only once it has stopped running
        self.attach(id, Location::Destroy);
        debug!("deleted {}", id);
        Ok(())
    }

    /// Return a task to the condition it was constructed in
    ///
    /// A deleted task stays deleted; pooled records are revived by the pool
    /// itself before they are reset.
    pub fn reset(&mut self, id: TaskId) -> KernelResult<()> {
        if self.current == Some(id) {
            return Err(KernelError::InvalidState(TaskState::Running));
        }
        let task = self.task(id)?;
        if task.state == TaskState::Deleted {
            return Err(KernelError::InvalidState(TaskState::Deleted));
        }
        let kind = task.kind();
        ops(kind).reset(self, id)
    }

    pub fn suspend(&mut self, id: TaskId) -> KernelResult<()> {
        let now = self.clock.now();
        let task = self.task_mut(id)?;
        match task.state {
            TaskState::Deleted => return Err(KernelError::InvalidState(TaskState::Deleted)),
            // Keep the original timestamp
            TaskState::Suspended => return Ok(()),
            _ => {}
        }
        task.set_state(TaskState::Suspended)?;
        task.suspended_at = now;
        self.leave_hunger(id);
        self.attach(id, Location::Suspended);
        debug!("suspended {}", id);
        Ok(())
    }

    /// Move a suspended task back to the blocked list, shifting its wakeup
    /// by the time it spent suspended
    pub fn resume(&mut self, id: TaskId) -> KernelResult<()> {
        let now = self.clock.now();
        let task = self.task_mut(id)?;
        if task.state != TaskState::Suspended {
            return Err(KernelError::InvalidState(task.state));
        }
        task.signal.insert(Signal::RESUME);
        task.set_state(TaskState::Blocked)?;
        let suspended_for = now.saturating_sub(task.suspended_at);
        task.wakeup = task.wakeup.saturating_add(suspended_for);
        self.attach(id, Location::Blocked);
        debug!("resumed {} after {} ticks", id, suspended_for);
        Ok(())
    }

    /// Wake a blocked task on the next pass regardless of its deadline
    pub fn trigger(&mut self, id: TaskId) -> KernelResult<()> {
        self.task_mut(id)?.signal.insert(Signal::EVENT);
        Ok(())
    }

    /// Run `id` alone on the next pass
    ///
    /// Fails with `Busy` if another urgent task is pending, unless `force`.
    pub fn set_urgent(&mut self, id: TaskId, force: bool) -> KernelResult<()> {
        let task = self.task(id)?;
        if matches!(task.state, TaskState::Suspended | TaskState::Deleted) {
            return Err(KernelError::InvalidState(task.state));
        }
        if self.urgent.is_some() && !force {
            return Err(KernelError::Busy);
        }
        if let Some(previous) = self.urgent.replace(id)
            && previous != id
        {
            debug!("{} displaced urgent {}", id, previous);
        }
        Ok(())
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn state(&self, id: TaskId) -> KernelResult<TaskState> {
        Ok(self.task(id)?.state)
    }

    pub fn kind(&self, id: TaskId) -> KernelResult<TaskKind> {
        Ok(self.task(id)?.kind())
    }

    pub fn priority(&self, id: TaskId) -> KernelResult<u16> {
        Ok(self.task(id)?.priority)
    }

    /// Change a task's priority; a ready task moves to the tail of its new level
    pub fn set_priority(&mut self, id: TaskId, priority: u16) -> KernelResult<()> {
        self.check_priority(priority)?;
        let task = self.task_mut(id)?;
        if task.priority == priority {
            return Ok(());
        }
        task.priority = priority;
        if task.state == TaskState::Ready && matches!(task.location, Location::Ready(_)) {
            self.attach(id, Location::Ready(priority));
        }
        Ok(())
    }

    /// Lateness of the task's last evaluation, in ms
    pub fn timeout(&self, id: TaskId) -> KernelResult<i32> {
        Ok(self.task(id)?.timeout)
    }

    /// Set the period (stackless) or pending delay (stackful) in ms
    pub fn set_delay(&mut self, id: TaskId, ms: u32) -> KernelResult<()> {
        let (task, clock) = self.task_and_clock(id)?;
        task.delay = clock.ms_to_ticks(ms);
        Ok(())
    }

    /// Replace the task's body; it must match the task's kind
    pub fn set_entry(&mut self, id: TaskId, entry: TaskEntry) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        match (&mut task.body, entry) {
            (KindState::Stackless(state), TaskEntry::Stackless(entry)) => {
                state.entry = Some(entry);
                Ok(())
            }
            (KindState::Stackful(state), TaskEntry::Stackful(entry)) => state.replace_entry(entry),
            _ => Err(KernelError::NotSupported),
        }
    }

    pub fn set_arg<T: Any + Send + Sync>(&mut self, id: TaskId, arg: T) -> KernelResult<()> {
        self.task_mut(id)?.arg = Some(Arc::new(arg));
        Ok(())
    }

    pub fn clear_arg(&mut self, id: TaskId) -> KernelResult<()> {
        self.task_mut(id)?.arg = None;
        Ok(())
    }

    pub fn arg(&self, id: TaskId) -> KernelResult<Option<TaskArg>> {
        Ok(self.task(id)?.arg.clone())
    }

    pub fn set_user_data<T: Any + Send>(&mut self, id: TaskId, data: T) -> KernelResult<()> {
        self.task_mut(id)?.user_data = Some(Box::new(data));
        Ok(())
    }

    pub fn user_data<T: Any + Send>(&self, id: TaskId) -> KernelResult<Option<&T>> {
        Ok(self
            .task(id)?
            .user_data
            .as_ref()
            .and_then(|data| data.downcast_ref::<T>()))
    }

    pub fn user_data_mut<T: Any + Send>(&mut self, id: TaskId) -> KernelResult<Option<&mut T>> {
        Ok(self
            .task_mut(id)?
            .user_data
            .as_mut()
            .and_then(|data| data.downcast_mut::<T>()))
    }

    /// Let the task climb priority levels while it waits, one level per
    /// `threshold_ms` spent ready
    pub fn enable_hunger(&mut self, id: TaskId, threshold_ms: u32) -> KernelResult<()> {
        if threshold_ms == 0 {
            return Err(KernelError::InvalidArgument("zero hunger threshold"));
        }
        let hunger = self.config.hunger;
        let task = self.task_mut(id)?;
        task.flags.insert(TaskFlags::HUNGER);
        task.hunger_ms = threshold_ms;
        if hunger && task.state == TaskState::Ready && !task.in_hunger {
            task.in_hunger = true;
            self.hunger.push_back(id);
        }
        Ok(())
    }

    pub fn disable_hunger(&mut self, id: TaskId) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        task.flags.remove(TaskFlags::HUNGER);
        task.hunger_ms = 0;
        self.leave_hunger(id);
        Ok(())
    }

    pub fn task_info(&self, id: TaskId) -> KernelResult<TaskInfo> {
        let task = self.task(id)?;
        Ok(TaskInfo {
            id,
            kind: task.kind(),
            state: task.state,
            priority: task.priority,
            timeout_ms: task.timeout,
            wakeup: task.wakeup,
            hungry: task.in_hunger,
            dispatches: task.dispatches,
            reclaim: task.reclaim,
        })
    }

    /// Every live task, in slot order
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.tasks
            .iter()
            .filter_map(|(index, task)| self.task_info(TaskId::new(index, task.generation)).ok())
            .collect()
    }

    /// Tasks at a ready level, head first
    pub fn ready_tasks(&self, priority: u16) -> Vec<TaskId> {
        self.ready
            .get(priority as usize)
            .map(|level| level.iter().copied().collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Run one scheduling pass
    pub fn run_once(&mut self) -> Pass {
        debug_assert!(self.current.is_none(), "run_once called from a task body");
        self.trace.record_pass();

        let mut max_idle_ms = i32::MAX;
        let mut idle_since: Option<Tick> = None;

        let blocked: Vec<TaskId> = self.blocked.iter().copied().collect();
        for id in blocked {
            let Ok(kind) = self.task(id).map(Task::kind) else {
                continue;
            };
            let now = ops(kind).update(self, id);
            self.wake_if_ready(id);

            let Ok(task) = self.task(id) else { continue };
            if task.delay == 0
                || task.timeout > 0
                || task.timeout.saturating_neg() > max_idle_ms
                || task.state != TaskState::Blocked
            {
                continue;
            }
            max_idle_ms = task.timeout.saturating_neg();
            idle_since = Some(now);
        }

        if let Some(id) = self.urgent.take()
            && self
                .task(id)
                .is_ok_and(|t| !matches!(t.state, TaskState::Suspended | TaskState::Deleted))
        {
            self.record(TraceKind::Urgent, Some(id));
            self.run_task(id);
            return Pass::Urgent(id);
        }

        let next = self.ready.iter().find_map(|level| level.front().copied());
        match next {
            Some(id) => {
                self.record(TraceKind::Dispatch, Some(id));
                self.run_task(id);
                self.feed_hunger();
                Pass::Dispatched(id)
            }
            None => {
                self.reclaim_deleted();
                if let Some(since) = idle_since {
                    let spent = self.clock.elapsed_ms(self.clock.now(), since);
                    max_idle_ms = max_idle_ms.saturating_sub(spent).max(0);
                }
                let max_idle_ms = max_idle_ms.max(0) as u32;
                self.record(TraceKind::Idle { max_idle_ms }, None);
                if let Some(on_idle) = self.on_idle.as_mut() {
                    on_idle(max_idle_ms);
                }
                Pass::Idle { max_idle_ms }
            }
        }
    }

    /// Move a blocked task with a Ready signal to its ready level
    fn wake_if_ready(&mut self, id: TaskId) {
        let hunger = self.config.hunger;
        let Ok(task) = self.task_mut(id) else { return };
        if !task.signal.contains(Signal::READY) || task.location != Location::Blocked {
            return;
        }
        if task.set_state(TaskState::Ready).is_err() {
            return;
        }
        task.signal.remove(Signal::READY);
        let priority = task.priority;
        if hunger && task.flags.contains(TaskFlags::HUNGER) && !task.in_hunger {
            task.in_hunger = true;
            self.hunger.push_back(id);
        }
        self.attach(id, Location::Ready(priority));
        trace!("{} ready at level {}", id, priority);
    }

    fn run_task(&mut self, id: TaskId) {
        self.leave_hunger(id);
        self.detach(id);
        self.current = Some(id);
        self.update_timeout(id);

        let Ok(task) = self.task_mut(id) else {
            self.current = None;
            return;
        };
        task.dispatches += 1;
        let kind = task.kind();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ops(kind).exec(self, id)));
        self.current = None;

        // A body that panicked is deleted, then the panic goes on to the caller
        if let Err(payload) = outcome {
            warn!("{} panicked; deleting it", id);
            let _ = self.delete(id);
            panic::resume_unwind(payload);
        }

        if let Ok(task) = self.task_mut(id)
            && task.location == Location::Detached
            && task.set_state(TaskState::Blocked).is_ok()
        {
            self.attach(id, Location::Blocked);
        }
    }

    fn feed_hunger(&mut self) {
        if !self.config.hunger {
            return;
        }
        let hungry: Vec<TaskId> = self.hunger.iter().copied().collect();
        for id in hungry {
            self.update_timeout(id);
            let Ok(task) = self.task(id) else { continue };
            let Location::Ready(from) = task.location else {
                continue;
            };
            if task.hunger_ms == 0 {
                continue;
            }
            let level = if task.timeout > 0 {
                task.timeout as u32 / task.hunger_ms
            } else {
                0
            };
            let to = task
                .priority
                .saturating_sub(level.min(u16::MAX as u32) as u16);
            if to >= from {
                continue;
            }

            // Elevated tasks jump the queue at their new level
            self.detach(id);
            self.ready[to as usize].push_front(id);
            if let Some(task) = self.tasks.get_mut(id.index()) {
                task.location = Location::Ready(to);
            }
            debug!("{} elevated from {} to {}", id, from, to);
            self.record(TraceKind::Elevate { from, to }, Some(id));
        }
    }

    fn reclaim_deleted(&mut self) {
        while let Some(id) = self.destroy.pop_front() {
            let Ok(task) = self.task_mut(id) else { continue };
            task.location = Location::Detached;
            let reclaim = task.reclaim;
            self.leave_hunger(id);
            self.leave_queue_waits(id);
            if self.urgent == Some(id) {
                self.urgent = None;
            }
            self.record(TraceKind::Reclaim, Some(id));
            match reclaim {
                Reclaim::Free => self.drop_record(id),
                Reclaim::Pool(pool) => self.return_to_pool(id, pool),
            }
        }
    }

    fn record(&mut self, kind: TraceKind, task: Option<TaskId>) {
        let now = self.clock.now();
        let priority = task.and_then(|id| self.task(id).ok()).map(|t| t.priority);
        trace!("{:?} {:?}", kind, task);
        self.trace.record(now, kind, task, priority);
    }
}

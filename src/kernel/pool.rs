//! Task pool
//!
//! Pre-creates a fixed number of task records of one kind and parks them
//! Suspended. `acquire` revives a parked record with a new entry and
//! priority instead of creating a task; deleting an acquired task sends the
//! record back to the pool (via `Reclaim::Pool`) instead of freeing it.
//!
//! A record gets a fresh generation on every acquire, so handles from an
//! earlier use go stale.

use super::error::{KernelError, KernelResult};
use super::kind::{KindState, TaskConfig, TaskEntry, TaskKind};
use super::manager::Manager;
use super::stackless::Flow;
use super::task::{Reclaim, TaskId, TaskState};
use super::task_context::TaskContext;
use log::{debug, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Handle to a task pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PoolId {
    key: u32,
    generation: u32,
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pool({}.{})", self.key, self.generation)
    }
}

pub(crate) struct Pool {
    generation: u32,
    config: TaskConfig,
    /// Slab slots of every record the pool owns
    members: Vec<usize>,
    /// Parked records, next to hand out first
    free: VecDeque<usize>,
}

impl Manager {
    fn pool(&self, pool: PoolId) -> KernelResult<&Pool> {
        self.pools
            .get(pool.key as usize)
            .filter(|p| p.generation == pool.generation)
            .ok_or(KernelError::InvalidArgument("stale or unknown pool handle"))
    }

    fn pool_mut(&mut self, pool: PoolId) -> KernelResult<&mut Pool> {
        self.pools
            .get_mut(pool.key as usize)
            .filter(|p| p.generation == pool.generation)
            .ok_or(KernelError::InvalidArgument("stale or unknown pool handle"))
    }

    /// Create `workers` parked tasks built from `config`
    pub fn create_pool(&mut self, workers: usize, config: TaskConfig) -> KernelResult<PoolId> {
        if workers == 0 {
            return Err(KernelError::InvalidArgument("empty pool"));
        }
        let generation = self.fresh_generation();
        let key = self.pools.insert(Pool {
            generation,
            config,
            members: Vec::with_capacity(workers),
            free: VecDeque::with_capacity(workers),
        });
        let id = PoolId {
            key: key as u32,
            generation,
        };

        for _ in 0..workers {
            let task = match self.create(0, config, TaskEntry::idle(config.kind())) {
                Ok(task) => task,
                Err(e) => {
                    warn!("pool member creation failed: {}", e);
                    let _ = self.delete_pool(id);
                    return Err(e);
                }
            };
            self.park(task, id);
        }
        debug!("created {} with {} {:?} workers", id, workers, config.kind());
        Ok(id)
    }

    /// Suspend a record with an idle body and put it on its pool's free list
    fn park(&mut self, task: TaskId, pool: PoolId) {
        if let Ok(record) = self.task_mut(task) {
            record.reclaim = Reclaim::Pool(pool);
            record.arg = None;
            record.user_data = None;
            match &mut record.body {
                KindState::Stackless(state) => {
                    state.entry = TaskEntry::idle(TaskKind::Stackless).into_stackless();
                    state.hook = None;
                }
                KindState::Stackful(state) => {
                    // Cancel whatever was parked before touching the entry
                    state.context = None;
                    if let Some(entry) = TaskEntry::idle(TaskKind::Stackful).into_stackful()
                        && let Err(e) = state.replace_entry(entry)
                    {
                        warn!("{} keeps its previous body: {}", task, e);
                    }
                }
            }
        }
        let Ok(p) = self.pool_mut(pool) else { return };
        if !p.members.contains(&task.index()) {
            p.members.push(task.index());
        }
        // Only a suspended record may be handed out again
        if let Err(e) = self.suspend(task) {
            warn!("{} not parked in {}: {}", task, pool, e);
            return;
        }
        if let Ok(p) = self.pool_mut(pool) {
            p.free.push_back(task.index());
        }
    }

    /// Reclamation for a deleted pool member
    pub(crate) fn return_to_pool(&mut self, task: TaskId, pool: PoolId) {
        if self.pool(pool).is_err() {
            self.drop_record(task);
            return;
        }
        let generation = self.fresh_generation();
        let Ok(record) = self.task_mut(task) else {
            return;
        };
        // Deleted is absorbing; the record is revived outside the state machine
        record.state = TaskState::Ready;
        record.generation = generation;
        let task = TaskId::new(task.index(), generation);
        self.park(task, pool);
        debug!("{} returned to {}", task, pool);
    }

    /// Take a parked record and start it with `entry` at `priority`
    pub fn acquire(&mut self, pool: PoolId, priority: u16, entry: TaskEntry) -> KernelResult<TaskId> {
        if priority >= self.config().priority_levels {
            return Err(KernelError::InvalidArgument("priority out of range"));
        }
        let p = self.pool_mut(pool)?;
        if p.config.kind() != entry.kind() {
            return Err(KernelError::NotSupported);
        }
        let index = p.free.pop_front().ok_or(KernelError::Busy)?;

        let generation = self.fresh_generation();
        let Some(record) = self.record_at(index) else {
            return Err(KernelError::NotFound);
        };
        record.generation = generation;
        let task = TaskId::new(index, generation);

        let started = self
            .set_entry(task, entry)
            .and_then(|()| self.reset(task))
            .and_then(|()| self.set_priority(task, priority));
        if let Err(e) = started {
            warn!("acquiring from {} failed: {}", pool, e);
            self.park(task, pool);
            return Err(e);
        }
        debug!("{} acquired from {}", task, pool);
        Ok(task)
    }

    pub fn acquire_stackless<F>(&mut self, pool: PoolId, priority: u16, entry: F) -> KernelResult<TaskId>
    where
        F: FnMut(&mut TaskContext<'_>) -> Flow + Send + 'static,
    {
        self.acquire(pool, priority, TaskEntry::stackless(entry))
    }

    pub fn acquire_stackful<F>(&mut self, pool: PoolId, priority: u16, entry: F) -> KernelResult<TaskId>
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        self.acquire(pool, priority, TaskEntry::stackful(entry))
    }

    /// Parked records left
    pub fn pool_available(&self, pool: PoolId) -> KernelResult<usize> {
        Ok(self.pool(pool)?.free.len())
    }

    pub fn pool_size(&self, pool: PoolId) -> KernelResult<usize> {
        Ok(self.pool(pool)?.members.len())
    }

    /// Delete every member, free or in use; their records are freed on the
    /// next idle pass
    pub fn delete_pool(&mut self, pool: PoolId) -> KernelResult<()> {
        self.pool(pool)?;
        let removed = self.pools.remove(pool.key as usize);
        for index in removed.members {
            let Some(record) = self.record_at(index) else {
                continue;
            };
            record.reclaim = Reclaim::Free;
            let task = TaskId::new(index, record.generation);
            let _ = self.delete(task);
        }
        debug!("deleted {}", pool);
        Ok(())
    }
}

impl TaskEntry {
    fn into_stackless(self) -> Option<Box<super::kind::StacklessFn>> {
        match self {
            TaskEntry::Stackless(entry) => Some(entry),
            TaskEntry::Stackful(_) => None,
        }
    }

    fn into_stackful(self) -> Option<Box<super::kind::StackfulFn>> {
        match self {
            TaskEntry::Stackful(entry) => Some(entry),
            TaskEntry::Stackless(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::config::KernelConfig;
    use crate::kernel::kind::{StackfulConfig, StacklessConfig};
    use crate::platform::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn manager() -> (Manager, ManualClock) {
        let clock = ManualClock::new();
        let manager = Manager::new(KernelConfig::default(), clock.source(1000).unwrap()).unwrap();
        (manager, clock)
    }

    #[test]
    fn test_members_start_suspended() {
        let (mut m, _clock) = manager();
        let pool = m.create_pool(3, StacklessConfig::once(10).into()).unwrap();
        assert_eq!(m.pool_available(pool).unwrap(), 3);
        assert_eq!(m.pool_size(pool).unwrap(), 3);
        assert_eq!(m.len(), 3);
        assert!(m.snapshot().iter().all(|t| t.state == TaskState::Suspended));
    }

    #[test]
    fn test_empty_pool_rejected() {
        let (mut m, _clock) = manager();
        assert!(matches!(
            m.create_pool(0, StacklessConfig::once(10).into()),
            Err(KernelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_acquire_runs_and_returns() {
        let (mut m, clock) = manager();
        let pool = m.create_pool(1, StacklessConfig::once(10).into()).unwrap();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&runs);
        let task = m
            .acquire_stackless(pool, 2, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Done
            })
            .unwrap();
        assert_eq!(m.pool_available(pool).unwrap(), 0);
        assert_eq!(m.priority(task).unwrap(), 2);
        assert_eq!(m.task_info(task).unwrap().reclaim, Reclaim::Pool(pool));
        assert_eq!(
            m.acquire_stackless(pool, 0, |_| Flow::Done),
            Err(KernelError::Busy)
        );

        // Run once, get deleted on the next check, reclaimed when idle
        for _ in 0..3 {
            clock.advance(10);
            m.run_once();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(m.pool_available(pool).unwrap(), 1);
        assert_eq!(m.len(), 1);
        assert!(m.state(task).is_err(), "old handle must be stale");

        let again = m.acquire_stackless(pool, 0, |_| Flow::Done).unwrap();
        assert_ne!(again, task);
        assert_eq!(m.state(again).unwrap(), TaskState::Blocked);
    }

    #[test]
    fn test_recycled_record_starts_clean() {
        let (mut m, clock) = manager();
        let pool = m.create_pool(1, StacklessConfig::once(10).into()).unwrap();
        let first = m.acquire_stackless(pool, 0, |_| Flow::Done).unwrap();
        m.set_user_data(first, String::from("owned by first")).unwrap();
        m.set_arg(first, 7u32).unwrap();

        for _ in 0..3 {
            clock.advance(10);
            m.run_once();
        }
        assert_eq!(m.pool_available(pool).unwrap(), 1);

        let second = m.acquire_stackless(pool, 0, |_| Flow::Done).unwrap();
        assert_eq!(second.index(), first.index());
        assert_eq!(m.user_data::<String>(second).unwrap(), None);
        assert!(m.arg(second).unwrap().is_none());
    }

    #[test]
    fn test_acquire_validation() {
        let (mut m, _clock) = manager();
        let pool = m.create_pool(1, StacklessConfig::once(10).into()).unwrap();
        assert_eq!(
            m.acquire_stackful(pool, 0, |_| {}),
            Err(KernelError::NotSupported)
        );
        assert!(matches!(
            m.acquire_stackless(pool, 500, |_| Flow::Done),
            Err(KernelError::InvalidArgument(_))
        ));
        assert_eq!(m.pool_available(pool).unwrap(), 1);
    }

    #[test]
    fn test_stackful_pool_reuse() {
        let (mut m, _clock) = manager();
        let pool = m
            .create_pool(1, StackfulConfig::new(64 * 1024).into())
            .unwrap();
        let runs = Arc::new(AtomicU32::new(0));

        for round in 1..=2 {
            let counter = Arc::clone(&runs);
            m.acquire_stackful(pool, 0, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            // Run to completion, then reclaim
            m.run_once();
            m.run_once();
            assert_eq!(runs.load(Ordering::SeqCst), round);
            assert_eq!(m.pool_available(pool).unwrap(), 1);
        }
    }

    #[test]
    fn test_delete_pool_frees_members() {
        let (mut m, _clock) = manager();
        let pool = m.create_pool(2, StacklessConfig::forever(10).into()).unwrap();
        let busy = m.acquire_stackless(pool, 0, |_| Flow::Done).unwrap();
        m.delete_pool(pool).unwrap();
        assert_eq!(m.state(busy).unwrap(), TaskState::Deleted);
        assert!(matches!(
            m.pool_available(pool),
            Err(KernelError::InvalidArgument(_))
        ));

        m.run_once();
        assert!(m.is_empty());
    }
}

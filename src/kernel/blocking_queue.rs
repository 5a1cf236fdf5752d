//! Blocking queue for stackful tasks
//!
//! A `FixedQueue` plus two wait lists. A stackful task that finds the queue
//! full (send) or empty (receive) joins the matching wait list and delays
//! for its remaining budget. Every successful operation triggers *all*
//! waiters on the opposite side; the scheduler then picks the best of them,
//! and the losers find the queue unusable again and go back to waiting.
//!
//! The non-blocking `try_send` / `try_receive` work from anywhere (stackless
//! bodies, the embedder) and wake waiters the same way.

use super::error::{KernelError, KernelResult};
use super::manager::Manager;
use super::task::{TaskId, TaskState};
use super::task_context::TaskContext;
use crate::utils::queue::FixedQueue;
use bytemuck::Pod;
use log::debug;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

/// Handle to a blocking queue of `T` values
pub struct QueueId<T> {
    key: usize,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for QueueId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for QueueId<T> {}

impl<T> PartialEq for QueueId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.generation == other.generation
    }
}

impl<T> Eq for QueueId<T> {}

impl<T> fmt::Debug for QueueId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({}.{})", self.key, self.generation)
    }
}

pub(crate) struct BlockingQueue {
    generation: u32,
    ring: FixedQueue,
    send_waiters: VecDeque<TaskId>,
    receive_waiters: VecDeque<TaskId>,
}

fn wait_on(list: &mut VecDeque<TaskId>, id: TaskId) {
    if !list.contains(&id) {
        list.push_back(id);
    }
}

impl Manager {
    fn blocking_queue<T>(&self, queue: QueueId<T>) -> KernelResult<&BlockingQueue> {
        self.queues
            .get(queue.key)
            .filter(|q| q.generation == queue.generation)
            .ok_or(KernelError::InvalidArgument("stale or unknown queue handle"))
    }

    fn blocking_queue_mut<T>(&mut self, queue: QueueId<T>) -> KernelResult<&mut BlockingQueue> {
        self.queues
            .get_mut(queue.key)
            .filter(|q| q.generation == queue.generation)
            .ok_or(KernelError::InvalidArgument("stale or unknown queue handle"))
    }

    /// A queue holding up to `capacity` values of `T`
    pub fn create_queue<T: Pod>(&mut self, capacity: usize) -> KernelResult<QueueId<T>> {
        let ring = FixedQueue::with_capacity(std::mem::size_of::<T>(), capacity)?;
        let generation = self.fresh_generation();
        let key = self.queues.insert(BlockingQueue {
            generation,
            ring,
            send_waiters: VecDeque::new(),
            receive_waiters: VecDeque::new(),
        });
        Ok(QueueId {
            key,
            generation,
            _marker: PhantomData,
        })
    }

    /// Drop a queue; tasks waiting on it are woken and fail their operation
    pub fn delete_queue<T>(&mut self, queue: QueueId<T>) -> KernelResult<()> {
        self.blocking_queue(queue)?;
        let removed = self.queues.remove(queue.key);
        for id in removed.send_waiters.into_iter().chain(removed.receive_waiters) {
            let _ = self.trigger(id);
        }
        Ok(())
    }

    pub fn queue_len<T>(&self, queue: QueueId<T>) -> KernelResult<usize> {
        Ok(self.blocking_queue(queue)?.ring.len())
    }

    pub fn queue_capacity<T>(&self, queue: QueueId<T>) -> KernelResult<usize> {
        Ok(self.blocking_queue(queue)?.ring.capacity())
    }

    /// Append without waiting; `Busy` when full
    pub fn try_send<T: Pod>(&mut self, queue: QueueId<T>, value: &T) -> KernelResult<()> {
        let q = self.blocking_queue_mut(queue)?;
        q.ring.push(value)?;
        let waiters = std::mem::take(&mut q.receive_waiters);
        self.wake_all(waiters);
        Ok(())
    }

    /// Take the front value without waiting; `Busy` when empty
    pub fn try_receive<T: Pod>(&mut self, queue: QueueId<T>) -> KernelResult<T> {
        let q = self.blocking_queue_mut(queue)?;
        let value = q.ring.pop::<T>()?;
        let waiters = std::mem::take(&mut q.send_waiters);
        self.wake_all(waiters);
        Ok(value)
    }

    /// Tasks currently waiting to send and to receive
    pub fn queue_waiters<T>(&self, queue: QueueId<T>) -> KernelResult<(Vec<TaskId>, Vec<TaskId>)> {
        let q = self.blocking_queue(queue)?;
        Ok((
            q.send_waiters.iter().copied().collect(),
            q.receive_waiters.iter().copied().collect(),
        ))
    }

    fn wake_all(&mut self, waiters: VecDeque<TaskId>) {
        for id in waiters {
            let _ = self.trigger(id);
        }
    }

    /// Forget every queue wait `id` is registered for
    pub(crate) fn leave_queue_waits(&mut self, id: TaskId) {
        for (_, q) in self.queues.iter_mut() {
            q.send_waiters.retain(|&t| t != id);
            q.receive_waiters.retain(|&t| t != id);
        }
    }
}

impl TaskContext<'_> {
    fn check_blocking(&self) -> KernelResult<()> {
        let running = self.manager.current_task() == Some(self.id)
            && self.manager.state(self.id)? == TaskState::Running;
        if !running {
            return Err(KernelError::Busy);
        }
        if !self.is_stackful() {
            return Err(KernelError::NotSupported);
        }
        Ok(())
    }

    /// Wait up to `timeout_ms` for room in the queue, then append `value`
    pub fn send<T: Pod>(&mut self, queue: QueueId<T>, value: &T, timeout_ms: u32) -> KernelResult<()> {
        self.check_blocking()?;
        let id = self.id;
        let mut budget = timeout_ms;
        loop {
            let q = self.manager.blocking_queue_mut(queue)?;
            if !q.ring.is_full() {
                return self.manager.try_send(queue, value);
            }
            wait_on(&mut q.send_waiters, id);
            self.delay(budget)?;

            let late = self.timeout();
            if late >= 0 {
                self.manager.leave_queue_waits(id);
                debug!("{} send timed out", id);
                return Err(KernelError::Timeout);
            }
            // Woken early; wait out the rest
            budget = late.unsigned_abs();
        }
    }

    /// Wait up to `timeout_ms` for a value
    pub fn receive<T: Pod>(&mut self, queue: QueueId<T>, timeout_ms: u32) -> KernelResult<T> {
        self.check_blocking()?;
        let id = self.id;
        let mut budget = timeout_ms;
        loop {
            let q = self.manager.blocking_queue_mut(queue)?;
            if !q.ring.is_empty() {
                return self.manager.try_receive(queue);
            }
            wait_on(&mut q.receive_waiters, id);
            self.delay(budget)?;

            let late = self.timeout();
            if late >= 0 {
                self.manager.leave_queue_waits(id);
                debug!("{} receive timed out", id);
                return Err(KernelError::Timeout);
            }
            budget = late.unsigned_abs();
        }
    }
}

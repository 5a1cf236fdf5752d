//! The handle a running task body receives
//!
//! `TaskContext` gives a body its own id, its argument, the timing of the
//! current activation, and full access to the manager (to create, trigger or
//! delete other tasks). Stackful bodies additionally get `delay` and the
//! blocking queue operations.

use super::error::KernelResult;
use super::manager::Manager;
use super::stackful::ManagerLink;
use super::task::TaskId;
use super::time::Tick;
use crate::platform::Suspender;
use std::any::Any;
use std::sync::Arc;

/// What a stackful body needs to park and come back
#[derive(Clone, Copy)]
pub(crate) struct Resume<'a> {
    pub(crate) suspender: &'a dyn Suspender,
    pub(crate) link: &'a ManagerLink,
}

pub struct TaskContext<'a> {
    pub(crate) manager: &'a mut Manager,
    pub(crate) id: TaskId,
    pub(crate) resume: Option<Resume<'a>>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(manager: &'a mut Manager, id: TaskId) -> Self {
        Self {
            manager,
            id,
            resume: None,
        }
    }

    pub(crate) fn stackful(
        manager: &'a mut Manager,
        id: TaskId,
        suspender: &'a dyn Suspender,
        link: &'a ManagerLink,
    ) -> Self {
        Self {
            manager,
            id,
            resume: Some(Resume { suspender, link }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn manager(&mut self) -> &mut Manager {
        self.manager
    }

    pub fn is_stackful(&self) -> bool {
        self.resume.is_some()
    }

    pub fn now(&self) -> Tick {
        self.manager.clock().now()
    }

    pub fn now_ms(&self) -> u64 {
        self.manager.clock().now_ms()
    }

    /// Lateness of this activation in ms; negative if it was triggered early
    pub fn timeout(&self) -> i32 {
        self.manager.timeout(self.id).unwrap_or(0)
    }

    /// The task's argument, if one of type `T` was set
    pub fn arg<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.manager
            .arg(self.id)
            .ok()
            .flatten()
            .and_then(|arg| arg.downcast::<T>().ok())
    }

    /// Resumption marker saved by the previous `Flow::Yield`
    pub fn marker(&self) -> u32 {
        self.manager.stackless_marker(self.id).unwrap_or(0)
    }

    /// Scratch state kept between stackless activations
    pub fn hook<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.manager
            .stackless_hook_mut(self.id)
            .ok()?
            .as_mut()?
            .downcast_mut::<T>()
    }

    pub fn set_hook<T: Any + Send>(&mut self, value: T) -> KernelResult<()> {
        *self.manager.stackless_hook_mut(self.id)? = Some(Box::new(value));
        Ok(())
    }

    pub fn take_hook(&mut self) -> Option<Box<dyn Any + Send>> {
        self.manager.stackless_hook_mut(self.id).ok()?.take()
    }

    /// Delete this task; a stackful body keeps running until it next suspends
    pub fn delete(&mut self) -> KernelResult<()> {
        self.manager.delete(self.id)
    }

    pub fn suspend(&mut self) -> KernelResult<()> {
        self.manager.suspend(self.id)
    }

    pub fn trigger(&mut self, other: TaskId) -> KernelResult<()> {
        self.manager.trigger(other)
    }
}

//! Platform Abstraction Layer
//!
//! The kernel needs two things from its host: a tick counter (see `clock`)
//! and, for stackful tasks, resumable execution contexts. This module defines
//! the context capability as traits so embedders can supply their own:
//!
//! - `ContextPort` creates a context from a stack size and an entry closure
//! - `ExecutionContext::switch_in` transfers control into the context and
//!   returns once it suspends or finishes
//! - `Suspender::suspend`, called from inside the context, transfers control
//!   back to whoever switched in
//!
//! Nothing else in the kernel assumes how a context is implemented.
//! `thread::ThreadPort` is the portable implementation shipped with the crate.

pub mod clock;
pub mod thread;

pub use clock::{ManualClock, MonotonicClock};
pub use thread::ThreadPort;

use crate::kernel::error::KernelResult;
use std::any::Any;

/// Code run inside a fresh context
pub type ContextEntry = Box<dyn FnOnce(&dyn Suspender) + Send + 'static>;

/// Handed to a context's entry; parks the context and returns control
pub trait Suspender {
    /// Returns when the context is next switched in
    fn suspend(&self);
}

/// Why `switch_in` returned
#[derive(Debug)]
pub enum Switch {
    /// The context called `Suspender::suspend`
    Suspended,
    /// The entry returned; the context cannot be switched in again
    Finished,
    /// The entry panicked; the payload should be re-raised by the caller
    Panicked(Box<dyn Any + Send>),
}

/// A resumable computation
///
/// Dropping a context that has not finished must abandon it without running
/// any more of its entry.
pub trait ExecutionContext: Send {
    fn switch_in(&mut self) -> Switch;

    fn is_finished(&self) -> bool;
}

/// Factory for execution contexts
pub trait ContextPort: Send + Sync {
    fn create(
        &self,
        stack_size: usize,
        entry: ContextEntry,
    ) -> KernelResult<Box<dyn ExecutionContext>>;
}

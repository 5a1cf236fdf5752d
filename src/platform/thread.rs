//! Thread-backed execution contexts
//!
//! Each context runs on its own OS thread with the requested stack size, but
//! only one side ever runs at a time: control moves by passing a baton under
//! a mutex, and whichever side does not hold it waits on a condvar. From the
//! kernel's point of view this is indistinguishable from a stack switch.
//!
//! Cancelling a parked context unwinds its thread from inside `suspend` with
//! a private payload, so no user code runs past the suspension point.

use super::{ContextEntry, ContextPort, ExecutionContext, Suspender, Switch};
use crate::kernel::error::{KernelError, KernelResult};
use log::warn;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Smallest stack handed to the OS
pub const MIN_STACK_SIZE: usize = 16 * 1024;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Scheduler,
    Task,
    Cancel,
    Finished,
}

struct Baton {
    turn: Turn,
    panic: Option<Box<dyn Any + Send>>,
}

struct Handoff {
    baton: Mutex<Baton>,
    cv: Condvar,
}

impl Handoff {
    fn new() -> Self {
        Self {
            baton: Mutex::new(Baton {
                turn: Turn::Scheduler,
                panic: None,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Baton> {
        self.baton.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the baton over and wait until it comes back
    fn pass<'a>(&self, mut baton: MutexGuard<'a, Baton>, to: Turn) -> MutexGuard<'a, Baton> {
        baton.turn = to;
        self.cv.notify_all();
        self.cv
            .wait_while(baton, |b| b.turn == to)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unwind payload for a cancelled context
struct Cancelled;

struct ThreadSuspender<'a> {
    handoff: &'a Handoff,
}

impl Suspender for ThreadSuspender<'_> {
    fn suspend(&self) {
        let baton = self.handoff.pass(self.handoff.lock(), Turn::Scheduler);
        if baton.turn == Turn::Cancel {
            drop(baton);
            panic::resume_unwind(Box::new(Cancelled));
        }
    }
}

/// Creates one parked OS thread per context
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPort;

impl ThreadPort {
    pub fn new() -> Self {
        Self
    }
}

impl ContextPort for ThreadPort {
    fn create(
        &self,
        stack_size: usize,
        entry: ContextEntry,
    ) -> KernelResult<Box<dyn ExecutionContext>> {
        let handoff = Arc::new(Handoff::new());
        let remote = Arc::clone(&handoff);
        let n = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);

        let thread = thread::Builder::new()
            .name(format!("coop-ctx-{}", n))
            .stack_size(stack_size.max(MIN_STACK_SIZE))
            .spawn(move || {
                let baton = remote
                    .cv
                    .wait_while(remote.lock(), |b| b.turn == Turn::Scheduler)
                    .unwrap_or_else(PoisonError::into_inner);
                if baton.turn == Turn::Cancel {
                    return;
                }
                drop(baton);

                let suspender = ThreadSuspender { handoff: &remote };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry(&suspender)));

                let mut baton = remote.lock();
                if let Err(payload) = outcome
                    && !payload.is::<Cancelled>()
                {
                    baton.panic = Some(payload);
                }
                baton.turn = Turn::Finished;
                remote.cv.notify_all();
            })
            .map_err(|e| {
                warn!("failed to spawn context thread: {}", e);
                KernelError::NoMemory
            })?;

        Ok(Box::new(ThreadContext {
            handoff,
            thread: Some(thread),
            finished: false,
        }))
    }
}

pub struct ThreadContext {
    handoff: Arc<Handoff>,
    thread: Option<JoinHandle<()>>,
    finished: bool,
}

impl ExecutionContext for ThreadContext {
    fn switch_in(&mut self) -> Switch {
        if self.finished {
            return Switch::Finished;
        }
        let mut baton = self.handoff.pass(self.handoff.lock(), Turn::Task);
        match baton.turn {
            Turn::Scheduler => Switch::Suspended,
            _ => {
                self.finished = true;
                match baton.panic.take() {
                    Some(payload) => Switch::Panicked(payload),
                    None => Switch::Finished,
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        if !self.finished {
            let mut baton = self.handoff.lock();
            baton.turn = Turn::Cancel;
            self.handoff.cv.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

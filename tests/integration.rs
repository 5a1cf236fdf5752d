//! Integration tests for the coop kernel
//!
//! End-to-end scheduling scenarios against the public API. Time is a
//! `ManualClock`; where a scenario needs time to pass while the kernel is
//! idle, the idle callback advances the clock by the budget it is offered.

use coop_kernel::kernel::{
    Flow, Kernel, KernelConfig, KernelError, Manager, Pass, StackfulConfig, StacklessConfig,
    TaskContext, TaskId, TaskState, TraceKind,
};
use coop_kernel::platform::ManualClock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const STACK: usize = 64 * 1024;

fn manager_with(config: KernelConfig) -> (Manager, ManualClock) {
    let clock = ManualClock::new();
    let manager = Manager::new(config, clock.source(1000).unwrap()).unwrap();
    (manager, clock)
}

fn manager() -> (Manager, ManualClock) {
    manager_with(KernelConfig::default())
}

/// A kernel whose idle callback "sleeps" by advancing the clock
fn sleeping_kernel() -> (Kernel, ManualClock) {
    let clock = ManualClock::new();
    let mut kernel =
        Kernel::with_clock(KernelConfig::default(), clock.source(1000).unwrap()).unwrap();
    let sleeper = clock.clone();
    kernel
        .manager_mut()
        .set_idle(move |ms| sleeper.advance(u64::from(ms.min(1000))));
    (kernel, clock)
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn logger(
    log: &Log,
    name: &'static str,
) -> impl FnMut(&mut TaskContext<'_>) -> Flow + Send + 'static {
    let log = Arc::clone(log);
    move |_| {
        log.lock().unwrap().push(name);
        Flow::Done
    }
}

// ============================================================================
// Dispatch order
// ============================================================================

#[test]
fn test_lower_level_always_first() {
    let (mut m, clock) = manager();
    let log: Log = Arc::default();
    m.create_stackless(7, StacklessConfig::forever(10), logger(&log, "low"))
        .unwrap();
    m.create_stackless(2, StacklessConfig::forever(10), logger(&log, "high"))
        .unwrap();

    for _ in 0..3 {
        clock.advance(10);
        m.run_once();
        m.run_once();
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec!["high", "low", "high", "low", "high", "low"]
    );
}

#[test]
fn test_fifo_within_level_follows_readiness() {
    let (mut m, clock) = manager();
    let log: Log = Arc::default();
    // Keeps level 0 busy until it runs out at t=40
    m.create_stackless(0, StacklessConfig::new(8, 5), |_| Flow::Done)
        .unwrap();
    m.create_stackless(1, StacklessConfig::once(30), logger(&log, "first-created"))
        .unwrap();
    m.create_stackless(1, StacklessConfig::once(20), logger(&log, "second-created"))
        .unwrap();
    m.create_stackless(1, StacklessConfig::once(10), logger(&log, "third-created"))
        .unwrap();

    for _ in 0..12 {
        clock.advance(5);
        m.run_once();
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec!["third-created", "second-created", "first-created"]
    );
}

// ============================================================================
// Task lifetime
// ============================================================================

#[test]
fn test_loop_count_then_reclaimed() {
    let (mut k, _clock) = sleeping_kernel();
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let id = k
        .spawn_stackless(0, StacklessConfig::new(3, 100), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Done
        })
        .unwrap();

    let stats = k.run_for(50);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(stats.dispatched, 3);
    assert!(!k.manager().contains(id));
    assert_eq!(k.manager().trace().stats().reclaimed, 1);
}

#[test]
fn test_suspend_shifts_wakeup() {
    let (mut m, clock) = manager();
    let log: Log = Arc::default();
    let id = m
        .create_stackless(0, StacklessConfig::once(100), logger(&log, "ran"))
        .unwrap();

    clock.set(40);
    m.suspend(id).unwrap();
    clock.set(90);
    m.resume(id).unwrap();
    assert_eq!(m.task_info(id).unwrap().wakeup, 150);

    clock.set(149);
    assert!(matches!(m.run_once(), Pass::Idle { max_idle_ms: 1 }));
    clock.set(150);
    assert_eq!(m.run_once(), Pass::Dispatched(id));
    assert_eq!(*log.lock().unwrap(), vec!["ran"]);
}

#[test]
fn test_trigger_wakes_early() {
    let (mut m, clock) = manager();
    let timeouts = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&timeouts);
    let id = m
        .create_stackless(0, StacklessConfig::forever(100), move |cx| {
            out.lock().unwrap().push(cx.timeout());
            Flow::Done
        })
        .unwrap();

    clock.set(30);
    assert!(matches!(m.run_once(), Pass::Idle { .. }));
    m.trigger(id).unwrap();
    assert_eq!(m.run_once(), Pass::Dispatched(id));
    assert_eq!(*timeouts.lock().unwrap(), vec![-70]);
}

#[test]
fn test_reset_restores_construction_values() {
    let (mut m, clock) = manager();
    let id = m
        .create_stackless(0, StacklessConfig::new(3, 10), |cx| match cx.marker() {
            0 => Flow::Yield(4),
            _ => Flow::Done,
        })
        .unwrap();
    let fresh = m.task_info(id).unwrap();

    for _ in 0..3 {
        clock.advance(10);
        m.run_once();
    }
    assert_eq!(m.stackless_count(id).unwrap(), 1);

    clock.set(0);
    m.reset(id).unwrap();
    assert_eq!(m.stackless_count(id).unwrap(), 3);
    assert_eq!(m.stackless_marker(id).unwrap(), 0);
    let info = m.task_info(id).unwrap();
    assert_eq!(info.state, fresh.state);
    assert_eq!(info.wakeup, fresh.wakeup);
}

#[test]
fn test_stackful_reset_starts_over() {
    let (mut m, _clock) = manager();
    let steps = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&steps);
    let id = m
        .create_stackful(0, StackfulConfig::new(STACK), move |cx| {
            for step in 0.. {
                out.lock().unwrap().push(step);
                cx.yield_now().unwrap();
            }
        })
        .unwrap();

    for _ in 0..3 {
        m.run_once();
    }
    m.reset(id).unwrap();
    m.run_once();
    assert_eq!(*steps.lock().unwrap(), vec![0, 1, 2, 0]);
    assert_eq!(m.state(id).unwrap(), TaskState::Blocked);
}

// ============================================================================
// Blocking queue
// ============================================================================

#[test]
fn test_send_to_full_queue_times_out() {
    let (mut k, _clock) = sleeping_kernel();
    let q = k.manager_mut().create_queue::<u32>(1).unwrap();
    let outcome = Arc::new(Mutex::new(None));
    let out = Arc::clone(&outcome);
    k.spawn_stackful(0, move |cx| {
        cx.send(q, &1, 50).unwrap();
        let start = cx.now_ms();
        let result = cx.send(q, &2, 50);
        *out.lock().unwrap() = Some((result, cx.now_ms() - start));
    })
    .unwrap();

    k.run_for(10);
    assert_eq!(*outcome.lock().unwrap(), Some((Err(KernelError::Timeout), 50)));
}

#[test]
fn test_receive_unblocks_sender_early() {
    let (mut k, _clock) = sleeping_kernel();
    let q = k.manager_mut().create_queue::<u32>(1).unwrap();
    let outcome = Arc::new(Mutex::new(None));
    let out = Arc::clone(&outcome);
    k.spawn_stackful(0, move |cx| {
        cx.send(q, &1, 1000).unwrap();
        let result = cx.send(q, &2, 1000);
        *out.lock().unwrap() = Some((result, cx.now_ms()));
    })
    .unwrap();
    k.spawn_stackful(1, move |cx| {
        cx.delay(10).unwrap();
        let value = cx.receive(q, 0).unwrap();
        assert_eq!(value, 1);
    })
    .unwrap();

    k.run_for(10);
    assert_eq!(*outcome.lock().unwrap(), Some((Ok(()), 10)));
    assert_eq!(k.manager_mut().try_receive(q), Ok(2));
}

// ============================================================================
// Hunger and urgent
// ============================================================================

/// A level-0 task ready on every pass, plus a level-3 task due at t=10
fn starving(config: KernelConfig) -> (Manager, ManualClock, TaskId, Arc<AtomicU32>) {
    let (mut m, clock) = manager_with(config);
    m.create_stackless(0, StacklessConfig::forever(1), |_| Flow::Done)
        .unwrap();
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let hungry = m
        .create_stackless(3, StacklessConfig::once(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Done
        })
        .unwrap();
    m.enable_hunger(hungry, 10).unwrap();
    (m, clock, hungry, runs)
}

#[test]
fn test_hunger_lifts_starved_task() {
    let (mut m, clock, hungry, runs) = starving(KernelConfig::default());
    let mut dispatched_at = None;
    for _ in 0..20 {
        clock.advance(5);
        if m.run_once() == Pass::Dispatched(hungry) {
            dispatched_at = Some(clock.now());
        }
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // Three levels of elevation take 3 * 10ms of waiting past t=10
    assert_eq!(dispatched_at, Some(45));

    let levels: Vec<(u16, u16)> = m
        .trace()
        .events()
        .iter()
        .filter_map(|e| match e.kind {
            TraceKind::Elevate { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(levels, vec![(3, 2), (2, 1), (1, 0)]);
}

#[test]
fn test_starved_without_hunger() {
    let config = KernelConfig {
        hunger: false,
        ..KernelConfig::default()
    };
    let (mut m, clock, hungry, runs) = starving(config);
    for _ in 0..20 {
        clock.advance(5);
        m.run_once();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(m.state(hungry).unwrap(), TaskState::Ready);
}

#[test]
fn test_urgent_slot_and_force() {
    let (mut m, clock) = manager();
    let log: Log = Arc::default();
    let first = m
        .create_stackless(5, StacklessConfig::forever(0), logger(&log, "first"))
        .unwrap();
    let second = m
        .create_stackless(6, StacklessConfig::forever(0), logger(&log, "second"))
        .unwrap();
    let normal = m
        .create_stackless(0, StacklessConfig::once(10), logger(&log, "normal"))
        .unwrap();

    m.set_urgent(first, false).unwrap();
    assert_eq!(m.set_urgent(second, false), Err(KernelError::Busy));
    m.set_urgent(second, true).unwrap();

    clock.set(10);
    assert_eq!(m.run_once(), Pass::Urgent(second));
    assert_eq!(m.run_once(), Pass::Dispatched(normal));
    assert!(matches!(m.run_once(), Pass::Idle { .. }));
    // The displaced task went back to normal scheduling without running
    assert_eq!(*log.lock().unwrap(), vec!["second", "normal"]);
    assert_eq!(m.state(first).unwrap(), TaskState::Blocked);
    assert_eq!(m.task_info(first).unwrap().dispatches, 0);
}

// ============================================================================
// Siblings
// ============================================================================

#[test]
fn test_pool_recycles_records() {
    let (mut k, _clock) = sleeping_kernel();
    let pool = k
        .manager_mut()
        .create_pool(2, StacklessConfig::once(5).into())
        .unwrap();
    let runs = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        for _ in 0..2 {
            let counter = Arc::clone(&runs);
            k.manager_mut()
                .acquire_stackless(pool, 1, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Flow::Done
                })
                .unwrap();
        }
        k.run_until(|m| m.pool_available(pool) == Ok(2), 20);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 6);
    assert_eq!(k.manager().len(), 2);
}

#[test]
fn test_tasks_talk_over_bus() {
    let (mut k, _clock) = sleeping_kernel();
    let received = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&received);
    {
        let bus = k.manager_mut().bus_mut();
        bus.register_topic(7, 2).unwrap();
        bus.subscribe_value::<u16, _>(7, move |v| out.lock().unwrap().push(v))
            .unwrap();
    }
    k.spawn_stackless(0, StacklessConfig::new(3, 10), |cx| {
        let tick = cx.now_ms() as u16;
        cx.manager().bus_mut().publish_async_value(7, &tick).unwrap();
        Flow::Done
    })
    .unwrap();

    let stats = k.run_for(20);
    assert_eq!(*received.lock().unwrap(), vec![10, 20, 30]);
    assert_eq!(stats.delivered, 3);
}

#[test]
fn test_snapshot_json() {
    let (mut m, _clock) = manager();
    let id = m
        .create_stackful(4, StackfulConfig::new(STACK), |_| {})
        .unwrap();
    m.set_user_data(id, 5u8).unwrap();
    let json = serde_json::to_string(&m.snapshot()).unwrap();
    assert!(json.contains("\"kind\":\"Stackful\""));
    assert!(json.contains("\"priority\":4"));
    assert!(m.trace().to_json().unwrap().contains("\"passes\":0"));
}

// ============================================================================
// Task failure
// ============================================================================

#[test]
#[should_panic(expected = "stackless body failed")]
fn test_stackless_panic_reaches_caller() {
    let (mut m, _clock) = manager();
    let id = m
        .create_stackless(0, StacklessConfig::once(0), |_| panic!("stackless body failed"))
        .unwrap();
    m.trigger(id).unwrap();
    m.run_once();
}

#[test]
#[should_panic(expected = "stackful body failed")]
fn test_stackful_panic_reaches_caller() {
    let (mut m, _clock) = manager();
    m.create_stackful(0, StackfulConfig::new(STACK), |_| panic!("stackful body failed"))
        .unwrap();
    m.run_once();
}

#[test]
fn test_kernel_runs_on_after_stackful_panic() {
    let (mut k, _clock) = sleeping_kernel();
    let failed = k
        .spawn_stackful(0, |cx| {
            cx.yield_now().unwrap();
            panic!("worker lost its device");
        })
        .unwrap();
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    k.spawn_stackless(1, StacklessConfig::new(2, 10), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Flow::Done
    })
    .unwrap();

    // First activation yields; the second panics
    k.run_once();
    let caught = panic::catch_unwind(AssertUnwindSafe(|| k.run_once()));
    assert!(caught.is_err());
    assert_eq!(k.manager().current_task(), None);
    assert_eq!(k.manager().state(failed).unwrap(), TaskState::Deleted);

    let (done, _) = k.run_until(|m| m.is_empty(), 20);
    assert!(done);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

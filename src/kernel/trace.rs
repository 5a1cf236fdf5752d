//! Scheduling trace
//!
//! Records what each scheduling pass decided, for debugging and monitoring.
//!
//! Design:
//! - Ring buffer of recent events (bounded memory, capacity from config)
//! - Counters that survive the ring buffer wrapping
//! - Everything serializes to JSON for offline inspection

use super::error::KernelResult;
use super::task::TaskId;
use super::time::Tick;
use serde::Serialize;
use std::collections::VecDeque;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceKind {
    /// The head of a ready level ran
    Dispatch,
    /// The urgent task ran
    Urgent,
    /// Nothing was ready; the host was offered `max_idle_ms`
    Idle { max_idle_ms: u32 },
    /// A deleted task was freed or returned to its pool
    Reclaim,
    /// A hungry task moved up from level `from` to level `to`
    Elevate { from: u16, to: u16 },
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub tick: Tick,
    pub kind: TraceKind,
    pub task: Option<TaskId>,
    /// Priority of `task` when the event was recorded
    pub priority: Option<u16>,
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedStats {
    pub passes: u64,
    pub dispatches: u64,
    pub urgent_runs: u64,
    pub idle_passes: u64,
    pub reclaimed: u64,
    pub elevations: u64,
}

impl SchedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of passes that ran a task
    pub fn busy_ratio(&self) -> f64 {
        if self.passes == 0 {
            0.0
        } else {
            (self.dispatches + self.urgent_runs) as f64 / self.passes as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedTrace {
    capacity: usize,
    events: VecDeque<TraceEvent>,
    stats: SchedStats,
}

impl SchedTrace {
    /// A trace keeping the last `capacity` events; 0 keeps only the counters
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            stats: SchedStats::new(),
        }
    }

    pub(crate) fn record_pass(&mut self) {
        self.stats.passes += 1;
    }

    /// Record an event
    pub fn record(&mut self, tick: Tick, kind: TraceKind, task: Option<TaskId>, priority: Option<u16>) {
        match kind {
            TraceKind::Dispatch => self.stats.dispatches += 1,
            TraceKind::Urgent => self.stats.urgent_runs += 1,
            TraceKind::Idle { .. } => self.stats.idle_passes += 1,
            TraceKind::Reclaim => self.stats.reclaimed += 1,
            TraceKind::Elevate { .. } => self.stats.elevations += 1,
        }
        if self.capacity == 0 {
            return;
        }

        // Maintain ring buffer size
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(TraceEvent {
            tick,
            kind,
            task,
            priority,
        });
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Recent events, oldest first
    pub fn events(&self) -> &VecDeque<TraceEvent> {
        &self.events
    }

    /// Recent events concerning one task
    pub fn events_for(&self, task: TaskId) -> Vec<&TraceEvent> {
        self.events.iter().filter(|e| e.task == Some(task)).collect()
    }

    pub fn stats(&self) -> &SchedStats {
        &self.stats
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Reset everything (events and stats)
    pub fn reset(&mut self) {
        self.clear_events();
        self.stats = SchedStats::new();
    }

    pub fn to_json(&self) -> KernelResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Default for SchedTrace {
    fn default() -> Self {
        Self::new(256)
    }
}

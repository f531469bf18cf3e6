//! Per-call deadline tracking with pause and cooperative cancellation.
//!
//! The center is constructed by whatever owns the tool-execution lifecycle
//! and handed down explicitly; there is no process-global instance. All state
//! lives behind one mutex, so the maps have a single logical owner.
//!
//! Cancellation is advisory: `cancel` flips a flag and broadcasts a
//! `ToolCancelled` event, and the running tool decides whether to observe it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::events::{EventBus, WorkspaceEvent};

/// Bookkeeping for one in-flight tool call.
///
/// Exists exactly while the call is in flight: created by `begin`, removed by
/// `finish`.
#[derive(Debug, Clone)]
pub struct TimeoutRecord {
    pub tool_name: String,
    pub target_file: Option<PathBuf>,
    pub timeout: Duration,
    pub last_progress: Instant,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct TimeoutState {
    records: HashMap<String, TimeoutRecord>,
    /// Set while the countdown is globally paused.
    paused_since: Option<Instant>,
}

/// Tracks wall-clock deadlines per tool call id.
#[derive(Debug, Default)]
pub struct TimeoutCenter {
    state: Mutex<TimeoutState>,
    bus: Option<EventBus>,
}

impl TimeoutCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a center that broadcasts cancellations on the given bus.
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(TimeoutState::default()),
            bus: Some(bus),
        }
    }

    /// (Re)initializes the record for a call. Idempotent: calling again for
    /// an existing id resets the progress clock and clears a stale cancel
    /// flag. A `timeout_secs` of zero registers the call without a deadline;
    /// it still participates in cancellation.
    pub fn begin(
        &self,
        call_id: &str,
        tool_name: &str,
        target_file: Option<PathBuf>,
        timeout_secs: u64,
    ) {
        let mut state = self.lock();
        state.records.insert(
            call_id.to_string(),
            TimeoutRecord {
                tool_name: tool_name.to_string(),
                target_file,
                timeout: Duration::from_secs(timeout_secs),
                last_progress: Instant::now(),
                cancelled: false,
            },
        );
    }

    /// Liveness signal from a running tool; resets the countdown.
    pub fn mark_progress(&self, call_id: &str) {
        let mut state = self.lock();
        if let Some(record) = state.records.get_mut(call_id) {
            record.last_progress = Instant::now();
        }
    }

    /// Seconds until the call's deadline.
    ///
    /// `None` while globally paused, for unknown ids, or for calls without a
    /// deadline; negative once the call is overdue.
    pub fn remaining_seconds(&self, call_id: &str) -> Option<i64> {
        let state = self.lock();
        if state.paused_since.is_some() {
            return None;
        }
        let record = state.records.get(call_id)?;
        if record.timeout.is_zero() {
            return None;
        }
        let deadline = record.last_progress + record.timeout;
        let now = Instant::now();
        let secs = if now < deadline {
            (deadline - now).as_secs_f64()
        } else {
            -((now - deadline).as_secs_f64())
        };
        Some(secs.ceil() as i64)
    }

    /// Pauses or resumes every countdown.
    ///
    /// On resume each record's progress clock is shifted forward by however
    /// long that record actually sat paused, so the countdown continues from
    /// the pre-pause deadline. A record begun mid-pause has spent less than
    /// the full pause duration paused and is shifted correspondingly less.
    pub fn toggle_pause(&self) {
        let mut state = self.lock();
        match state.paused_since.take() {
            None => state.paused_since = Some(Instant::now()),
            Some(since) => {
                let now = Instant::now();
                for record in state.records.values_mut() {
                    let paused_for = now.duration_since(record.last_progress.max(since));
                    record.last_progress += paused_for;
                }
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused_since.is_some()
    }

    /// Marks one call cancelled and broadcasts the notification.
    pub fn cancel(&self, call_id: &str) {
        let known = {
            let mut state = self.lock();
            match state.records.get_mut(call_id) {
                Some(record) => {
                    record.cancelled = true;
                    true
                }
                None => false,
            }
        };
        if known {
            self.notify_cancelled(call_id);
        }
    }

    /// Marks every in-flight call cancelled.
    ///
    /// Batches run concurrently, so "the active tool" is every record that
    /// still exists.
    pub fn cancel_active_now(&self) {
        let ids: Vec<String> = {
            let mut state = self.lock();
            state
                .records
                .iter_mut()
                .map(|(id, record)| {
                    record.cancelled = true;
                    id.clone()
                })
                .collect()
        };
        for id in ids {
            self.notify_cancelled(&id);
        }
    }

    /// True if the call is in flight and has been asked to stop.
    pub fn is_cancelled(&self, call_id: &str) -> bool {
        self.lock()
            .records
            .get(call_id)
            .is_some_and(|r| r.cancelled)
    }

    /// Clears all bookkeeping for the call. Unknown ids are a no-op.
    pub fn finish(&self, call_id: &str) {
        self.lock().records.remove(call_id);
    }

    /// Snapshot of in-flight call ids, for display ticks.
    pub fn active_calls(&self) -> Vec<String> {
        self.lock().records.keys().cloned().collect()
    }

    fn notify_cancelled(&self, call_id: &str) {
        tracing::debug!(call_id, "tool call cancelled");
        if let Some(bus) = &self.bus {
            bus.publish(WorkspaceEvent::ToolCancelled {
                tool_call_id: call_id.to_string(),
            });
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimeoutState> {
        // Lock poisoning would mean a panic while holding the map; the
        // bookkeeping is still usable, so recover the guard.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

//! Ordering, position accounting, and wait estimates for a user's jobs.
//!
//! The [`QueueManager`] owns the queue bookkeeping for one user: which
//! entries are waiting, which hold an active generation slot, and what the
//! caller should be told about position and expected wait. It never talks to
//! the generation service itself; the orchestrator drives it and dispatches
//! whatever it activates.
//!
//! Derived reads (position, stats, estimates) are recomputed from the entries
//! on every call, so they are always consistent with the latest mutation.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Scheduling weight of a queue entry.
///
/// A sort key only: a higher priority entry is placed ahead of waiting lower
/// priority ones but never preempts an entry that already holds a slot.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Where an entry is in its queue lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting for a generation slot.
    Pending,
    /// Holds a generation slot.
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Terminal outcome reported back to the queue for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// One job's bookkeeping while it sits in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: Priority,
    pub state: EntryState,
    pub added_at: DateTime<Utc>,
    /// Set when the entry is granted a generation slot.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate state of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Idle,
    Processing,
    Paused,
}

/// Entry counts, recomputed from entry states on every read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub active: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Entries removed by [`QueueManager::clear`].
///
/// `active` lists the removed entries that held a slot, so the caller can
/// request best-effort cancellation of their running generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearOutcome {
    pub removed: Vec<JobId>,
    pub active: Vec<JobId>,
}

/// A read-only view of the queue with per-entry positions.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub status: QueueStatus,
    pub stats: QueueStats,
    pub average_generation_time: Duration,
    pub entries: Vec<(QueueEntry, Option<usize>)>,
}

/// Tunables for queue behaviour.
///
/// All of the constructors and configuration functions are `const`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    max_active: usize,
    default_estimate: Duration,
    history_window: usize,
}

impl QueueConfig {
    /// One active slot, a 120 second default estimate, and a ten-job
    /// observation window.
    pub const fn new() -> Self {
        Self {
            max_active: 1,
            default_estimate: Duration::from_secs(120),
            history_window: 10,
        }
    }

    /// How many entries may generate concurrently.
    ///
    /// The service contract does not pin this down, so it is a parameter
    /// rather than a constant; plans with concurrent-generation allowances
    /// can raise it.
    pub const fn with_max_active(self, max_active: usize) -> Self {
        Self { max_active, ..self }
    }

    /// Wait estimate used per queue position before any generation has been
    /// observed.
    pub const fn with_default_estimate(self, default_estimate: Duration) -> Self {
        Self {
            default_estimate,
            ..self
        }
    }

    pub const fn with_history_window(self, history_window: usize) -> Self {
        Self {
            history_window,
            ..self
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The ordered set of a user's queue entries.
pub struct QueueManager {
    config: QueueConfig,
    entries: Vec<QueueEntry>,
    paused: bool,
    /// Durations of recently completed generations, newest last.
    durations: VecDeque<Duration>,
}

impl QueueManager {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            paused: false,
            durations: VecDeque::new(),
        }
    }

    /// Appends an entry and returns its 1-based position.
    pub fn enqueue(&mut self, job_id: JobId, priority: Priority) -> usize {
        self.entries.push(QueueEntry {
            job_id,
            priority,
            state: EntryState::Pending,
            added_at: Utc::now(),
            started_at: None,
            finished_at: None,
        });
        tracing::debug!(%job_id, ?priority, "Enqueued job {job_id}");
        self.position(job_id).unwrap_or(self.entries.len())
    }

    /// Grants free generation slots to the most eligible pending entries.
    ///
    /// Eligibility is highest priority first, then oldest. Returns the newly
    /// activated job ids; empty while paused or while all slots are taken.
    pub fn activate_next(&mut self) -> Vec<JobId> {
        if self.paused {
            return Vec::new();
        }
        let mut activated = Vec::new();
        while self.active_count() < self.config.max_active {
            let next = self
                .entries
                .iter_mut()
                .filter(|entry| entry.state == EntryState::Pending)
                .min_by_key(|entry| (std::cmp::Reverse(entry.priority), entry.added_at));
            match next {
                None => break,
                Some(entry) => {
                    entry.state = EntryState::Active;
                    entry.started_at = Some(Utc::now());
                    tracing::debug!(job_id = %entry.job_id, "Activated job {}", entry.job_id);
                    activated.push(entry.job_id);
                }
            }
        }
        activated
    }

    /// Records a terminal outcome for an entry and advances the queue.
    ///
    /// Completed entries feed the moving average used by
    /// [`QueueManager::estimated_wait`]. Returns any newly activated job ids.
    pub fn finish(&mut self, job_id: JobId, outcome: EntryOutcome) -> Vec<JobId> {
        let now = Utc::now();
        let mut observed = None;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.job_id == job_id && !entry.state.is_terminal())
        {
            entry.state = match outcome {
                EntryOutcome::Completed => EntryState::Completed,
                EntryOutcome::Failed => EntryState::Failed,
                EntryOutcome::Cancelled => EntryState::Cancelled,
            };
            entry.finished_at = Some(now);
            if outcome == EntryOutcome::Completed {
                if let Some(started_at) = entry.started_at {
                    observed = (now - started_at).to_std().ok();
                }
            }
        }
        if let Some(duration) = observed {
            self.record_duration(duration);
        }
        self.activate_next()
    }

    /// Removes an entry entirely, whatever its state.
    pub fn dequeue(&mut self, job_id: JobId) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|entry| entry.job_id == job_id)?;
        Some(self.entries.remove(index))
    }

    /// Removes every entry.
    ///
    /// Entries that held a slot are reported separately so the caller can
    /// request cancellation of their running generations; a rejected
    /// cancellation does not put the entry back.
    pub fn clear(&mut self) -> ClearOutcome {
        let removed: Vec<_> = self.entries.iter().map(|entry| entry.job_id).collect();
        let active = self
            .entries
            .iter()
            .filter(|entry| entry.state == EntryState::Active)
            .map(|entry| entry.job_id)
            .collect();
        self.entries.clear();
        ClearOutcome { removed, active }
    }

    /// Stops granting slots to pending entries. Entries already active are
    /// unaffected.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes granting slots and returns any newly activated job ids.
    pub fn resume(&mut self) -> Vec<JobId> {
        self.paused = false;
        self.activate_next()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// 1-based rank among non-terminal entries: slot holders first, then
    /// waiting entries by priority and age. `None` for unknown or finished
    /// entries.
    pub fn position(&self, job_id: JobId) -> Option<usize> {
        self.processing_order()
            .iter()
            .position(|entry| entry.job_id == job_id)
            .map(|index| index + 1)
    }

    /// Expected wait until completion: position times the average observed
    /// generation time.
    pub fn estimated_wait(&self, job_id: JobId) -> Option<Duration> {
        let position = self.position(job_id)? as u32;
        Some(self.average_generation_time() * position)
    }

    /// Moving average over recently completed generations, or the configured
    /// default when nothing has completed yet.
    pub fn average_generation_time(&self) -> Duration {
        if self.durations.is_empty() {
            return self.config.default_estimate;
        }
        let total: Duration = self.durations.iter().sum();
        total / self.durations.len() as u32
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in &self.entries {
            match entry.state {
                EntryState::Active => stats.active += 1,
                EntryState::Pending => stats.pending += 1,
                EntryState::Completed => stats.completed += 1,
                EntryState::Failed => stats.failed += 1,
                EntryState::Cancelled => {}
            }
        }
        stats
    }

    pub fn status(&self) -> QueueStatus {
        if self.paused {
            QueueStatus::Paused
        } else if self.active_count() > 0 {
            QueueStatus::Processing
        } else {
            QueueStatus::Idle
        }
    }

    pub fn entry(&self, job_id: JobId) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| entry.job_id == job_id)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            status: self.status(),
            stats: self.stats(),
            average_generation_time: self.average_generation_time(),
            entries: self
                .entries
                .iter()
                .map(|entry| (entry.clone(), self.position(entry.job_id)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Active)
            .count()
    }

    fn record_duration(&mut self, duration: Duration) {
        self.durations.push_back(duration);
        while self.durations.len() > self.config.history_window {
            self.durations.pop_front();
        }
    }

    fn processing_order(&self) -> Vec<&QueueEntry> {
        let mut order: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .collect();
        order.sort_by_key(|entry| {
            (
                entry.state != EntryState::Active,
                std::cmp::Reverse(entry.priority),
                entry.added_at,
            )
        });
        order
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::Range<i32>) -> Vec<JobId> {
        range.map(JobId::from).collect()
    }

    #[test]
    fn single_slot_queue_activates_one_entry() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.enqueue(2.into(), Priority::Normal);

        let activated = queue.activate_next();

        assert_eq!(activated, vec![JobId::from(1)]);
        assert_eq!(queue.stats().active, 1);
        assert_eq!(queue.stats().pending, 1);
        assert_eq!(queue.status(), QueueStatus::Processing);
    }

    #[test]
    fn high_priority_waits_behind_the_active_entry() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.activate_next();
        queue.enqueue(2.into(), Priority::High);

        // No preemption: the active entry keeps its slot.
        assert!(queue.activate_next().is_empty());
        assert_eq!(queue.position(1.into()), Some(1));
        assert_eq!(queue.position(2.into()), Some(2));
    }

    #[test]
    fn priority_orders_waiting_entries() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.activate_next();
        queue.enqueue(2.into(), Priority::Low);
        queue.enqueue(3.into(), Priority::High);
        queue.enqueue(4.into(), Priority::Normal);

        assert_eq!(queue.position(3.into()), Some(2));
        assert_eq!(queue.position(4.into()), Some(3));
        assert_eq!(queue.position(2.into()), Some(4));
    }

    #[test]
    fn positions_are_a_gapless_permutation() {
        let mut queue = QueueManager::default();
        for id in ids(1..8) {
            queue.enqueue(id, Priority::Normal);
        }
        queue.activate_next();
        queue.dequeue(3.into());
        queue.enqueue(8.into(), Priority::High);
        queue.finish(1.into(), EntryOutcome::Completed);
        queue.dequeue(5.into());

        let mut positions: Vec<_> = ids(1..9)
            .into_iter()
            .filter_map(|id| queue.position(id))
            .collect();
        positions.sort_unstable();

        let non_terminal = queue
            .snapshot()
            .entries
            .iter()
            .filter(|(entry, _)| !entry.state.is_terminal())
            .count();
        assert_eq!(positions, (1..=non_terminal).collect::<Vec<_>>());
    }

    #[test]
    fn finishing_the_active_entry_advances_the_queue() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.enqueue(2.into(), Priority::Normal);
        queue.activate_next();

        let activated = queue.finish(1.into(), EntryOutcome::Completed);

        assert_eq!(activated, vec![JobId::from(2)]);
        assert_eq!(queue.stats().completed, 1);
        assert_eq!(queue.stats().active, 1);
    }

    #[test]
    fn paused_queue_does_not_activate() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.pause();

        assert!(queue.activate_next().is_empty());
        assert_eq!(queue.status(), QueueStatus::Paused);

        let activated = queue.resume();
        assert_eq!(activated, vec![JobId::from(1)]);
    }

    #[test]
    fn pause_leaves_the_active_entry_running() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.activate_next();
        queue.pause();

        assert_eq!(queue.stats().active, 1);
        assert_eq!(queue.entry(1.into()).unwrap().state, EntryState::Active);
    }

    #[test]
    fn multiple_slots_activate_in_order() {
        let mut queue = QueueManager::new(QueueConfig::new().with_max_active(2));
        queue.enqueue(1.into(), Priority::Normal);
        queue.enqueue(2.into(), Priority::Normal);
        queue.enqueue(3.into(), Priority::Normal);

        let activated = queue.activate_next();

        assert_eq!(activated, vec![JobId::from(1), JobId::from(2)]);
        assert_eq!(queue.stats().active, 2);
    }

    #[test]
    fn clear_reports_active_entries() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.enqueue(2.into(), Priority::Normal);
        queue.activate_next();

        let outcome = queue.clear();

        assert_eq!(outcome.removed, vec![JobId::from(1), JobId::from(2)]);
        assert_eq!(outcome.active, vec![JobId::from(1)]);
        assert!(queue.is_empty());
        assert_eq!(queue.status(), QueueStatus::Idle);
    }

    #[test]
    fn wait_estimate_uses_default_without_history() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.enqueue(2.into(), Priority::Normal);
        queue.activate_next();

        assert_eq!(
            queue.estimated_wait(2.into()),
            Some(Duration::from_secs(240))
        );
        assert_eq!(queue.estimated_wait(99.into()), None);
    }

    #[test]
    fn completed_generations_feed_the_average() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.activate_next();
        queue.finish(1.into(), EntryOutcome::Completed);

        // An immediately finished job observes a near-zero duration, pulling
        // the average far below the 120s default.
        assert!(queue.average_generation_time() < Duration::from_secs(1));
    }

    #[test]
    fn history_window_is_bounded() {
        let mut queue = QueueManager::new(QueueConfig::new().with_history_window(2));
        for id in ids(1..5) {
            queue.enqueue(id, Priority::Normal);
            queue.activate_next();
            queue.finish(id, EntryOutcome::Completed);
        }

        assert_eq!(queue.durations.len(), 2);
    }

    #[test]
    fn failed_and_cancelled_entries_do_not_feed_the_average() {
        let mut queue = QueueManager::default();
        queue.enqueue(1.into(), Priority::Normal);
        queue.activate_next();
        queue.finish(1.into(), EntryOutcome::Failed);
        queue.enqueue(2.into(), Priority::Normal);
        queue.activate_next();
        queue.finish(2.into(), EntryOutcome::Cancelled);

        assert_eq!(queue.average_generation_time(), Duration::from_secs(120));
        assert_eq!(queue.stats().failed, 1);
    }
}

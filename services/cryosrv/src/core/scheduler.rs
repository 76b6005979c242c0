//! Poll scheduler
//!
//! An explicit map from device tag to (interval, next-fire), polled once
//! per main-loop tick. No background timers: the loop asks `due()` what
//! has come due and runs those jobs itself, which keeps every transport
//! round-trip on the one thread that owns the broker and database handles.
//!
//! Registration staggers first-fire times by a fixed pause so a restart
//! does not turn "every device is due now" into a thundering herd against
//! a shared serial bridge. Steady-state intervals are unaffected.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info};

/// What to do with a job whose body failed.
///
/// The default never cancels: a single bad read must not silently stop
/// monitoring a device indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    LeaveScheduled,
    Cancel,
}

/// One recurring job.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub tag: String,
    pub interval: Duration,
    pub next_fire: Instant,
}

/// Tag-keyed recurring job table.
#[derive(Debug)]
pub struct PollScheduler {
    jobs: HashMap<String, ScheduledJob>,
    stagger: Duration,
    /// Next unclaimed first-fire slot; keeps registrations staggered even
    /// when they arrive back-to-back.
    next_slot: Instant,
}

impl PollScheduler {
    pub fn new(stagger: Duration) -> Self {
        Self {
            jobs: HashMap::new(),
            stagger,
            next_slot: Instant::now(),
        }
    }

    /// Register (or replace) a recurring job for `tag`.
    ///
    /// The first fire lands one stagger slot after the previous
    /// registration's; after that the job free-runs at its own interval.
    pub fn register(&mut self, tag: &str, interval: Duration) {
        let now = Instant::now();
        if self.next_slot < now {
            self.next_slot = now;
        }
        self.next_slot += self.stagger;

        let job = ScheduledJob {
            tag: tag.to_string(),
            interval,
            next_fire: self.next_slot,
        };
        info!(
            tag,
            interval_s = interval.as_secs(),
            "scheduled polling job"
        );
        self.jobs.insert(tag.to_string(), job);
    }

    /// Remove a job; true when one existed.
    pub fn cancel(&mut self, tag: &str) -> bool {
        let existed = self.jobs.remove(tag).is_some();
        if existed {
            info!(tag, "cancelled polling job");
        }
        existed
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.jobs.contains_key(tag)
    }

    /// Tags of all jobs whose next-fire time has elapsed, each advanced to
    /// one interval from now. A job that fell far behind does not replay
    /// its missed ticks.
    pub fn due(&mut self, now: Instant) -> Vec<String> {
        let mut ready: Vec<(Instant, String)> = self
            .jobs
            .values()
            .filter(|job| job.next_fire <= now)
            .map(|job| (job.next_fire, job.tag.clone()))
            .collect();
        // Longest-overdue first; order between devices is otherwise
        // unspecified.
        ready.sort_by_key(|(fire, _)| *fire);

        let tags: Vec<String> = ready.into_iter().map(|(_, tag)| tag).collect();
        for tag in &tags {
            if let Some(job) = self.jobs.get_mut(tag) {
                job.next_fire = now + job.interval;
                debug!(tag, "job due");
            }
        }
        tags
    }

    /// Snapshot of the job table for diagnostics.
    pub fn jobs(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGGER: Duration = Duration::from_millis(2500);

    #[test]
    fn registrations_stagger_first_fires() {
        let mut sched = PollScheduler::new(STAGGER);
        for tag in ["a", "b", "c", "d"] {
            sched.register(tag, Duration::from_secs(60));
        }

        let mut fires: Vec<Instant> = sched.jobs().map(|job| job.next_fire).collect();
        fires.sort();
        assert_eq!(fires.len(), 4);
        for pair in fires.windows(2) {
            let gap = pair[1] - pair[0];
            // Strictly increasing by the configured stagger.
            assert!(gap >= STAGGER - Duration::from_millis(1), "gap was {gap:?}");
            assert!(gap <= STAGGER + Duration::from_millis(50), "gap was {gap:?}");
        }
    }

    #[test]
    fn due_advances_by_interval() {
        let mut sched = PollScheduler::new(Duration::ZERO);
        sched.register("gauge", Duration::from_secs(60));

        let now = Instant::now() + Duration::from_secs(1);
        assert_eq!(sched.due(now), vec!["gauge".to_string()]);
        // Not due again until a full interval out.
        assert!(sched.due(now + Duration::from_secs(59)).is_empty());
        assert_eq!(
            sched.due(now + Duration::from_secs(61)),
            vec!["gauge".to_string()]
        );
    }

    #[test]
    fn missed_ticks_do_not_replay() {
        let mut sched = PollScheduler::new(Duration::ZERO);
        sched.register("cooler", Duration::from_secs(10));

        // Five intervals behind: one fire, then back on cadence.
        let late = Instant::now() + Duration::from_secs(50);
        assert_eq!(sched.due(late).len(), 1);
        assert!(sched.due(late + Duration::from_secs(1)).is_empty());
        assert_eq!(sched.due(late + Duration::from_secs(10)).len(), 1);
    }

    #[test]
    fn cancel_and_reregister() {
        let mut sched = PollScheduler::new(Duration::ZERO);
        sched.register("gauge", Duration::from_secs(60));
        assert!(sched.cancel("gauge"));
        assert!(!sched.cancel("gauge"));
        assert!(sched.is_empty());

        sched.register("gauge", Duration::from_secs(30));
        assert!(sched.contains("gauge"));
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn overdue_jobs_run_longest_waiting_first() {
        let mut sched = PollScheduler::new(Duration::from_millis(10));
        sched.register("first", Duration::from_secs(60));
        sched.register("second", Duration::from_secs(60));

        let due = sched.due(Instant::now() + Duration::from_secs(5));
        assert_eq!(due, vec!["first".to_string(), "second".to_string()]);
    }
}

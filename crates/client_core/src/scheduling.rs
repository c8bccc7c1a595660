use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// A spawned timer task that is aborted when the handle is dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Runs `task` once after `delay`.
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            task.await;
        });
        Self { handle }
    }

    /// Runs `tick` every `period`, first one period from now. A slow tick delays the
    /// next one instead of bursting to catch up.
    pub fn every<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { handle }
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

/// Orders responses of concurrent requests so an older one never overwrites a newer one.
///
/// Callers take a ticket before sending and call [`RequestSequencer::accept`] while
/// holding the state lock they are about to write.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RequestTicket {
        RequestTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns `false` when a newer response has already been applied.
    pub fn accept(&self, ticket: RequestTicket) -> bool {
        let previous = self.applied.fetch_max(ticket.0, Ordering::SeqCst);
        previous < ticket.0
    }

    /// Marks every ticket issued so far as stale.
    pub fn invalidate(&self) {
        let issued = self.issued.load(Ordering::SeqCst);
        self.applied.fetch_max(issued, Ordering::SeqCst);
    }

    pub fn latest_applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn stale_ticket_is_rejected_after_newer_one() {
        let sequencer = RequestSequencer::new();
        let first = sequencer.issue();
        let second = sequencer.issue();

        assert!(sequencer.accept(second));
        assert!(!sequencer.accept(first));
        assert_eq!(sequencer.latest_applied(), second.sequence());
    }

    #[test]
    fn invalidate_discards_everything_in_flight() {
        let sequencer = RequestSequencer::new();
        let pending = sequencer.issue();
        sequencer.invalidate();
        assert!(!sequencer.accept(pending));
        assert!(sequencer.accept(sequencer.issue()));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_task_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let task = ScheduledTask::after(Duration::from_secs(3), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        time::sleep(Duration::from_secs(1)).await;
        task.cancel();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_waits_one_period_before_first_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let _task = ScheduledTask::every(Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(22)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}

//! Runs the sync cycles of a [`Provider`], and pushes the local changes it is told about
//!
//! Imports are single-flight: a request made while a cycle is running is coalesced into one
//! urgent follow-up cycle. Local changes are queued and drained by a worker loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};

use super::{Provider, SetOutcome};
use super::sync_progress::SyncReport;
use crate::traits::{CalDavSource, DavCalendar, TaskStore};

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    /// Another cycle has been requested while one was running
    urgent: bool,
}

/// Local changes that are waiting to be pushed.
///
/// A UID is never in both lists: a removal cancels a pending set.
#[derive(Debug, Default)]
struct MutationQueue {
    set: Vec<String>,
    remove: Vec<String>,
}

/// What a [`SyncScheduler::drain`] did
#[derive(Debug, Default)]
pub struct DrainReport {
    pub set: Vec<(String, SetOutcome)>,
    pub removed: Vec<String>,
    /// UIDs whose push failed. They are not queued again
    pub failed: Vec<String>,
}

pub struct SyncScheduler<S, R, C>
where
    S: TaskStore,
    R: CalDavSource<C>,
    C: DavCalendar,
{
    provider: Arc<tokio::sync::Mutex<Provider<S, R, C>>>,
    run_state: Arc<Mutex<RunState>>,
    queue: Arc<Mutex<MutationQueue>>,
    wakeup: Arc<Notify>,
}

impl<S, R, C> Clone for SyncScheduler<S, R, C>
where
    S: TaskStore,
    R: CalDavSource<C>,
    C: DavCalendar,
{
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            run_state: Arc::clone(&self.run_state),
            queue: Arc::clone(&self.queue),
            wakeup: Arc::clone(&self.wakeup),
        }
    }
}

impl<S, R, C> SyncScheduler<S, R, C>
where
    S: TaskStore,
    R: CalDavSource<C>,
    C: DavCalendar,
{
    pub fn new(provider: Provider<S, R, C>) -> Self {
        Self {
            provider: Arc::new(tokio::sync::Mutex::new(provider)),
            run_state: Arc::new(Mutex::new(RunState::default())),
            queue: Arc::new(Mutex::new(MutationQueue::default())),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// The provider. Lock it to access the local store between cycles
    pub fn provider(&self) -> &Arc<tokio::sync::Mutex<Provider<S, R, C>>> {
        &self.provider
    }

    pub fn is_running(&self) -> bool {
        self.run_state.lock().unwrap().running
    }

    /// Request an import.
    ///
    /// Returns `None` if a cycle was already running: it will run once more when it is done.
    /// Otherwise, returns the report of the last cycle that has been run.
    pub async fn trigger(&self) -> Option<SyncReport> {
        {
            let mut state = self.run_state.lock().unwrap();
            if state.running {
                log::debug!("A sync is already running, a follow-up sync will be run");
                state.urgent = true;
                return None;
            }
            state.running = true;
        }

        let report = loop {
            let report = self.provider.lock().await.sync().await;

            let run_again = {
                let mut state = self.run_state.lock().unwrap();
                if state.urgent {
                    state.urgent = false;
                    true
                } else {
                    state.running = false;
                    false
                }
            };
            if run_again == false {
                break report;
            }
        };
        Some(report)
    }

    /// Trigger an import at the period of the provider settings, until `shutdown` turns `true`
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.provider.lock().await.settings().period_secs);
        self.run_periodic(period, shutdown).await
    }

    /// Trigger an import every `period`, until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// A running cycle is always completed before this returns.
    pub async fn run_periodic(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Some(report) = self.trigger().await {
                        log::info!("Periodic sync done (success: {}, {})", report.success, report.total());
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::debug!("Stopping periodic syncs");
                        break;
                    }
                },
            }
        }
    }

    /// Queue a local task to be pushed to the server. Ignored if the task is queued for removal
    pub fn queue_set(&self, uid: &str) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.remove.iter().any(|u| u == uid) {
                log::debug!("{} is queued for removal, not pushing it", uid);
                return;
            }
            if queue.set.iter().any(|u| u == uid) == false {
                queue.set.push(uid.to_string());
            }
        }
        self.wakeup.notify_one();
    }

    /// Queue a task to be removed from the server. This cancels any pending push of it
    pub fn queue_remove(&self, uid: &str) {
        {
            let mut queue = self.queue.lock().unwrap();
            queue.set.retain(|u| u != uid);
            if queue.remove.iter().any(|u| u == uid) == false {
                queue.remove.push(uid.to_string());
            }
        }
        self.wakeup.notify_one();
    }

    /// Number of (pushes, removals) waiting
    pub fn pending(&self) -> (usize, usize) {
        let queue = self.queue.lock().unwrap();
        (queue.set.len(), queue.remove.len())
    }

    /// Send every queued change to the server. Removals are sent first
    pub async fn drain(&self) -> DrainReport {
        let (removals, sets) = {
            let mut queue = self.queue.lock().unwrap();
            (std::mem::take(&mut queue.remove), std::mem::take(&mut queue.set))
        };

        let mut report = DrainReport::default();
        if removals.is_empty() && sets.is_empty() {
            return report;
        }

        let mut provider = self.provider.lock().await;
        for uid in removals {
            match provider.remove_task(&uid).await {
                Ok(true) => report.removed.push(uid),
                Ok(false) => (),
                Err(err) => {
                    log::warn!("Unable to remove {} from the server: {}", uid, err);
                    report.failed.push(uid);
                },
            }
        }
        for uid in sets {
            match provider.set_task(&uid).await {
                Ok(outcome) => report.set.push((uid, outcome)),
                Err(err) => {
                    log::warn!("Unable to push {} to the server: {}", uid, err);
                    report.failed.push(uid);
                },
            }
        }
        report
    }

    /// Drain the queue every time something is queued, until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run_worker(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.wakeup.notified() => {
                    let report = self.drain().await;
                    log::debug!("Pushed {} tasks, removed {}, {} failures", report.set.len(), report.removed.len(), report.failed.len());
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::debug!("Stopping the mutation worker");
                        break;
                    }
                },
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::SyncSettings;
    use crate::mock::{MockCalendar, MockSource};
    use crate::store::MemoryStore;
    use crate::task::Task;
    use crate::traits::TaskStore;

    type MockScheduler = SyncScheduler<MemoryStore, MockSource, MockCalendar>;

    fn scheduler() -> (MockScheduler, MockSource) {
        let source = MockSource::new();
        source.add_calendar("Work");
        let provider = Provider::new(source.clone(), MemoryStore::new(), SyncSettings::default());
        (SyncScheduler::new(provider), source)
    }

    #[tokio::test]
    async fn test_concurrent_triggers_are_coalesced() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (scheduler, source) = scheduler();
        source.behaviour().lock().unwrap().latency = Duration::from_millis(20);

        let observer = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(scheduler.is_running());
            assert!(scheduler.provider().try_lock().is_err());
        };
        let (first, second, third, ()) = tokio::join!(scheduler.trigger(), scheduler.trigger(), scheduler.trigger(), observer);

        let reports: Vec<_> = vec![first, second, third].into_iter().flatten().collect();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].success);
        assert!(scheduler.is_running() == false);
        {
            // The two requests made during the first cycle caused a single follow-up cycle
            let behaviour = source.behaviour().lock().unwrap();
            assert_eq!(behaviour.calls("get_calendars"), 2);
            assert_eq!(behaviour.max_in_flight(), 1);
        }

        // Once idle, a request runs at once
        assert!(scheduler.trigger().await.unwrap().success);
        assert_eq!(source.behaviour().lock().unwrap().calls("get_calendars"), 3);
    }

    #[tokio::test]
    async fn test_removal_wins() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (scheduler, source) = scheduler();
        scheduler.trigger().await.unwrap();

        {
            let mut provider = scheduler.provider().lock().await;
            for uid in &["kept", "dropped"] {
                let mut task = Task::new(uid);
                task.set_title(uid);
                task.add_tag("DAV_Work");
                provider.store_mut().push_task(task).unwrap();
            }
        }

        scheduler.queue_set("kept");
        scheduler.queue_set("dropped");
        scheduler.queue_remove("dropped");
        scheduler.queue_set("dropped");
        assert_eq!(scheduler.pending(), (1, 1));

        let report = scheduler.drain().await;
        assert_eq!(report.set, vec![("kept".to_string(), SetOutcome::Created)]);
        assert!(report.removed.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(scheduler.pending(), (0, 0));

        let calendar = source.calendar_by_name("Work").unwrap();
        assert!(calendar.todo("kept").is_some());
        assert!(calendar.todo("dropped").is_none());

        // Removing a pushed task
        scheduler.queue_remove("kept");
        let report = scheduler.drain().await;
        assert_eq!(report.removed, vec!["kept".to_string()]);
        assert!(calendar.todo("kept").is_none());
    }

    #[tokio::test]
    async fn test_worker_stops() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (scheduler, _source) = scheduler();
        let (stop, shutdown) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.send(true).unwrap();
        };
        tokio::join!(scheduler.run_periodic(Duration::from_secs(3600), shutdown), stopper);

        assert!(scheduler.provider().lock().await.registry().is_first_run() == false);
    }
}

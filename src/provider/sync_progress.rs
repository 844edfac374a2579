//! Utilities to track the progression of a sync

use std::collections::BTreeMap;
use std::fmt::{Display, Error, Formatter};

/// An event that happens during a sync
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// Sync has not started
    NotStarted,
    /// Sync has just started but no calendar is handled yet
    Started,
    /// Sync is in progress.
    InProgress{ calendar: String, details: String},
    /// Sync is finished
    Finished{ success: bool },
}

impl Display for SyncEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            SyncEvent::NotStarted => write!(f, "Not started"),
            SyncEvent::Started => write!(f, "Sync has started..."),
            SyncEvent::InProgress{calendar, details} => write!(f, "[{}] {}...", calendar, details),
            SyncEvent::Finished{success} => match success {
                true => write!(f, "Sync successfully finished"),
                false => write!(f, "Sync finished with errors"),
            }
        }
    }
}

impl Default for SyncEvent {
    fn default() -> Self {
        Self::NotStarted
    }
}



/// See [`feedback_channel`]
pub type FeedbackSender = tokio::sync::watch::Sender<SyncEvent>;
/// See [`feedback_channel`]
pub type FeedbackReceiver = tokio::sync::watch::Receiver<SyncEvent>;

/// Create a feeback channel, that can be used to retrieve the current progress of a sync operation
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    tokio::sync::watch::channel(SyncEvent::default())
}


/// What happened to the tasks of a calendar during a sync
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub deleted: u32,
}

impl Display for SyncCounters {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{} created, {} updated, {} unchanged, {} deleted", self.created, self.updated, self.unchanged, self.deleted)
    }
}

/// The outcome of a sync
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReport {
    /// Whether no error (nor warning) has been logged
    pub success: bool,
    /// Counters, by calendar name
    pub counters: BTreeMap<String, SyncCounters>,
    /// The server refused our credentials. The user must be asked for new ones before syncing again
    pub authorization_failure: bool,
}

impl SyncReport {
    /// Counters of a calendar (all zero if it has not been synced)
    pub fn counters_for(&self, calendar: &str) -> SyncCounters {
        self.counters.get(calendar).copied().unwrap_or_default()
    }

    /// The sum of the counters of every calendar
    pub fn total(&self) -> SyncCounters {
        self.counters.values().fold(SyncCounters::default(), |acc, c| SyncCounters {
            created: acc.created + c.created,
            updated: acc.updated + c.updated,
            unchanged: acc.unchanged + c.unchanged,
            deleted: acc.deleted + c.deleted,
        })
    }
}



/// A structure that tracks the progression and the errors that happen during a sync
pub struct SyncProgress {
    n_errors: u32,
    counters: BTreeMap<String, SyncCounters>,
    authorization_failure: bool,
    feedback_channel: Option<FeedbackSender>
}
impl SyncProgress {
    pub fn new() -> Self {
        Self { n_errors: 0, counters: BTreeMap::new(), authorization_failure: false, feedback_channel: None }
    }
    pub fn new_with_feedback_channel(channel: FeedbackSender) -> Self {
        Self { feedback_channel: Some(channel), ..Self::new() }
    }


    pub fn is_success(&self) -> bool {
        self.n_errors == 0
    }

    /// The counters of a calendar
    pub fn counters_mut(&mut self, calendar: &str) -> &mut SyncCounters {
        self.counters.entry(calendar.to_string()).or_default()
    }

    /// Log that the server refused our credentials
    pub fn authorization_failed(&mut self, text: &str) {
        self.error(text);
        self.authorization_failure = true;
    }

    pub fn into_report(self) -> SyncReport {
        SyncReport {
            success: self.is_success(),
            counters: self.counters,
            authorization_failure: self.authorization_failure,
        }
    }

    /// Log an error
    pub fn error(&mut self, text: &str) {
        log::error!("{}", text);
        self.n_errors += 1;
    }
    /// Log a warning
    pub fn warn(&mut self, text: &str) {
        log::warn!("{}", text);
        self.n_errors += 1;
    }
    /// Log an info
    pub fn info(&mut self, text: &str) {
        log::info!("{}", text);
    }
    /// Log a debug message
    pub fn debug(&mut self, text: &str) {
        log::debug!("{}", text);
    }
    /// Log a trace message
    pub fn trace(&mut self, text: &str) {
        log::trace!("{}", text);
    }
    /// Send an event as a feedback to the listener (if any).
    pub fn feedback(&mut self, event: SyncEvent) {
        if let Some(sender) = &self.feedback_channel {
            let _ = sender.send(event);
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report() {
        let (sender, receiver) = feedback_channel();
        let mut progress = SyncProgress::new_with_feedback_channel(sender);
        progress.counters_mut("Work").created += 2;
        progress.counters_mut("Home").deleted += 1;
        progress.info("not an error");
        progress.feedback(SyncEvent::Started);
        assert_eq!(*receiver.borrow(), SyncEvent::Started);

        let report = progress.into_report();
        assert!(report.success);
        assert_eq!(report.counters_for("Work").created, 2);
        assert_eq!(report.counters_for("Nothing"), SyncCounters::default());
        assert_eq!(report.total(), SyncCounters{ created: 2, updated: 0, unchanged: 0, deleted: 1 });

        let mut failing = SyncProgress::new();
        failing.authorization_failed("401");
        let report = failing.into_report();
        assert!(report.success == false && report.authorization_failure);
    }
}

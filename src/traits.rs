use std::error::Error;

use async_trait::async_trait;

use crate::calendar::{CalendarId, ListFilter, SupportedComponents, SyncDelta};
use crate::error::DavError;
use crate::task::Task;
use crate::todo::Todo;

/// A source of calendars, usually a CalDAV server
#[async_trait]
pub trait CalDavSource<C: DavCalendar> {
    /// Returns the calendars that currently exist in this source.
    /// This always asks the source, that can be a long process, or that can even fail, e.g. in case of a remote server
    async fn get_calendars(&self) -> Result<Vec<C>, DavError>;
    /// Create a calendar that only supports tasks
    async fn create_calendar(&self, name: &str) -> Result<C, DavError>;
}

/// A calendar collection and the task resources it contains
#[async_trait]
pub trait DavCalendar: Clone + Send + Sync {
    /// Returns the calendar name
    fn name(&self) -> &str;
    /// Returns the calendar unique ID
    fn id(&self) -> &CalendarId;
    /// Returns the supported kinds of components for this calendar
    fn supported_components(&self) -> SupportedComponents;

    /// Returns the tasks that are neither completed nor cancelled
    async fn list_pending(&self) -> Result<Vec<Todo>, DavError>;
    /// Returns every task
    async fn list_all(&self) -> Result<Vec<Todo>, DavError>;

    async fn list(&self, filter: ListFilter) -> Result<Vec<Todo>, DavError> {
        match filter {
            ListFilter::Pending => self.list_pending().await,
            ListFilter::All => self.list_all().await,
        }
    }

    /// Returns the task with this UID, or `None` if the calendar does not contain it
    async fn fetch_by_uid(&self, uid: &str) -> Result<Option<Todo>, DavError>;

    /// Add a new task. It must not exist already.
    /// Returns the created task, with its new version tag
    async fn create(&self, todo: &Todo) -> Result<Todo, DavError>;
    /// Replace an existing task.
    /// Returns the updated task, with its new version tag
    async fn update(&self, todo: &Todo) -> Result<Todo, DavError>;
    /// Remove a task. Removing a task that does not exist is not an error
    async fn delete(&self, todo: &Todo) -> Result<(), DavError>;

    /// Returns the changes since `token`.
    ///
    /// An empty or unknown token lists the whole calendar (and still returns a fresh token).
    /// Unless `eager` is set, changed resources are only returned as stubs.
    async fn list_incremental(&self, token: Option<&str>, eager: bool) -> Result<SyncDelta, DavError>;
}

/// The store the local tasks live in.
///
/// Tasks are copied in and out of the store. A task that is modified must be pushed back
pub trait TaskStore: Send + Sync {
    /// Returns a copy of a task
    fn get_task(&self, uid: &str) -> Option<Task>;
    fn has_task(&self, uid: &str) -> bool;
    fn all_task_uids(&self) -> Vec<String>;
    /// Build a new task, that is not stored yet
    fn new_task(&self, uid: &str) -> Task;
    /// Store a new task, or replace an existing one
    fn push_task(&mut self, task: Task) -> Result<(), Box<dyn Error>>;
    /// Ask for a task to be deleted
    fn request_deletion(&mut self, uid: &str) -> Result<(), Box<dyn Error>>;
}

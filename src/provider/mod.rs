//! This modules keeps a local task store in sync with a CalDAV source
//!
//! The server is the source of truth for the tasks it contains: a sync cycle imports them into the local store.
//! Local changes are pushed one task at a time, with [`Provider::set_task`] and [`Provider::remove_task`].

use std::collections::{HashMap, HashSet};
use std::error::Error;

use chrono::{DateTime, Utc};
use url::Url;

use crate::calendar::ListFilter;
use crate::config::SyncSettings;
use crate::error::DavError;
use crate::fields::{self, FieldContext, FieldSet};
use crate::ordering::sort_by_dependencies;
use crate::registry::Registry;
use crate::task::{attributes, Task};
use crate::todo::{RelType, Todo};
use crate::traits::{CalDavSource, DavCalendar, TaskStore};

pub mod scheduler;
pub mod sync_progress;
use sync_progress::{FeedbackSender, SyncEvent, SyncProgress, SyncReport};


/// Where a provider is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    /// Calendars have never been listed
    Uninitialized,
    /// Calendars are known, but no sync has completed yet
    Initialized,
    /// Some calendar has not been fully imported yet. Its next sync imports every task, including the closed ones
    FirstRunImport,
    /// Every calendar has been imported once. Only pending tasks are listed
    SteadyState,
}

/// What [`Provider::set_task`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    Created,
    Updated,
    /// The server already had the same content. Nothing has been written
    Unchanged,
    /// The task changed calendars. It has been deleted from the former one and created in the new one
    Moved,
}

/// What a sync-token check tells about a calendar
enum TokenCheck {
    /// Nothing changed since the stored token
    Unchanged(Option<String>),
    /// The calendar must be listed. The token is the one to store once it is
    Changed(Option<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}


fn context<'a, S: TaskStore>(settings: &'a SyncSettings, store: &'a S) -> FieldContext<'a> {
    FieldContext {
        namespace: &settings.namespace,
        calendar_tag_prefix: &settings.calendar_tag_prefix,
        store,
    }
}

/// Sort order of a child among its siblings: explicit sort order first, then batch order
fn sibling_order(l: &(Option<i64>, usize, String), r: &(Option<i64>, usize, String)) -> std::cmp::Ordering {
    match (l.0, r.0) {
        (Some(a), Some(b)) => a.cmp(&b).then(l.1.cmp(&r.1)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => l.1.cmp(&r.1),
    }
}

/// Rebuild the CHILD links of a batch from its PARENT links.
///
/// Local children that are not in the batch (e.g. closed ones) are kept, after the batch ones.
fn recompute_children<S: TaskStore>(batch: &mut [Todo], store: &S) {
    let batch_uids: HashSet<String> = batch.iter().map(|t| t.uid().to_string()).collect();

    let mut children: HashMap<String, Vec<(Option<i64>, usize, String)>> = HashMap::new();
    for (position, todo) in batch.iter().enumerate() {
        if let Some(parent) = todo.parent_uid() {
            children.entry(parent).or_default().push((todo.sort_order(), position, todo.uid().to_string()));
        }
    }

    for todo in batch.iter_mut() {
        let mut kids = children.remove(todo.uid()).unwrap_or_default();
        kids.sort_by(sibling_order);
        let mut uids: Vec<String> = kids.into_iter().map(|(_, _, uid)| uid).collect();

        if let Some(local) = store.get_task(todo.uid()) {
            for child in local.children() {
                if batch_uids.contains(child) || uids.contains(child) {
                    continue;
                }
                let still_a_child = store.get_task(child)
                    .map(|c| c.parent() == Some(todo.uid()))
                    .unwrap_or(false);
                if still_a_child {
                    uids.push(child.clone());
                }
            }
        }

        todo.set_related(RelType::Child, &uids);
    }
}


/// Synchronizes a [`TaskStore`] with a [`CalDavSource`].
///
/// `remote` is usually a [`Client`](crate::client::Client), `store` is usually a [`MemoryStore`](crate::store::MemoryStore).
/// Integration tests use a [`MockSource`](crate::mock::MockSource) as `remote`.
pub struct Provider<S, R, C>
where
    S: TaskStore,
    R: CalDavSource<C>,
    C: DavCalendar,
{
    /// The remote source (usually a server)
    remote: R,
    /// The local tasks
    store: S,

    settings: SyncSettings,
    fields: FieldSet,
    registry: Registry<C>,
    state: CycleState,
}

impl<S, R, C> Provider<S, R, C>
where
    S: TaskStore,
    R: CalDavSource<C>,
    C: DavCalendar,
{
    /// Create a provider. This does not start a connection
    pub fn new(remote: R, store: S, settings: SyncSettings) -> Self {
        Self {
            remote, store, settings,
            fields: FieldSet::default(),
            registry: Registry::new(),
            state: CycleState::Uninitialized,
        }
    }

    /// Returns the local store
    pub fn store(&self) -> &S { &self.store }
    /// Returns the local store
    pub fn store_mut(&mut self) -> &mut S { &mut self.store }
    /// Returns the remote source.
    ///
    /// Apart from tests, there are very few (if any) reasons to access `remote` directly.
    pub fn remote(&self) -> &R { &self.remote }
    pub fn settings(&self) -> &SyncSettings { &self.settings }
    pub fn fields(&self) -> &FieldSet { &self.fields }
    pub fn registry(&self) -> &Registry<C> { &self.registry }
    pub fn state(&self) -> CycleState { self.state }

    /// Forget every calendar and resource seen so far. The next sync will be a first run again
    pub fn reset(&mut self) {
        self.registry.clear();
        self.state = CycleState::Uninitialized;
    }

    /// Whether a task differs from the last version seen on the server
    pub fn should_sync(&self, task: &Task, todo: &Todo) -> bool {
        self.fields.should_sync(task, todo, &context(&self.settings, &self.store))
    }

    /// List the calendars of the remote source again
    pub async fn refresh_calendars(&mut self) -> Result<(), DavError> {
        let calendars = self.remote.get_calendars().await?;
        log::debug!("{} calendars found", calendars.len());
        self.registry.set_calendars(calendars);
        if self.state == CycleState::Uninitialized {
            self.state = CycleState::Initialized;
        }
        Ok(())
    }

    /// Performs a synchronisation, and provide feeedback to the user about the progress.
    ///
    /// Details about errors are logged using the `log::*` macros.
    /// A failure on a resource does not stop the sync, only authorization failures do.
    pub async fn sync_with_feedback(&mut self, feedback_sender: FeedbackSender) -> SyncReport {
        let progress = SyncProgress::new_with_feedback_channel(feedback_sender);
        self.run_sync(progress, false).await
    }

    /// Performs a synchronisation, without giving any feedback.
    ///
    /// See [`Self::sync_with_feedback`]
    pub async fn sync(&mut self) -> SyncReport {
        self.run_sync(SyncProgress::new(), false).await
    }

    /// Performs a synchronisation where the remote version of every listed resource is applied,
    /// even when its sequence is not newer than the local one
    pub async fn force_sync(&mut self) -> SyncReport {
        self.run_sync(SyncProgress::new(), true).await
    }

    async fn run_sync(&mut self, mut progress: SyncProgress, force: bool) -> SyncReport {
        if let Err(err) = self.run_sync_inner(&mut progress, force).await {
            if err.is_authorization() {
                progress.authorization_failed(&format!("Sync interrupted, the server refused our credentials: {}", err));
            } else {
                progress.error(&format!("Sync terminated because of an error: {}", err));
            }
        }
        progress.feedback(SyncEvent::Finished{ success: progress.is_success() });
        progress.into_report()
    }

    async fn run_sync_inner(&mut self, progress: &mut SyncProgress, force: bool) -> Result<(), DavError> {
        progress.info("Starting a sync.");
        progress.feedback(SyncEvent::Started);
        let cycle_start = Utc::now();

        self.refresh_calendars().await?;

        if self.registry.is_first_run() {
            self.state = CycleState::FirstRunImport;
        }

        let calendars: Vec<C> = self.registry.calendars().into_iter().cloned().collect();
        for calendar in calendars {
            let first_run = self.registry.needs_import(calendar.id());
            match self.sync_calendar(&calendar, first_run, force, &cycle_start, progress).await {
                Ok(()) => self.registry.mark_imported(calendar.id()),
                Err(err) if err.is_authorization() => return Err(err),
                Err(err) => {
                    progress.warn(&format!("Unable to sync calendar {}: {}, skipping this time.", calendar.name(), err));
                },
            }
        }

        // A calendar that failed is fully listed again next time
        if self.registry.is_first_run() == false {
            self.state = CycleState::SteadyState;
        }
        progress.info("Sync ended");
        Ok(())
    }

    /// Ask for the changes since the last sync token, and get a fresh token
    async fn check_sync_token(&self, calendar: &C, first_run: bool, progress: &mut SyncProgress) -> Result<TokenCheck, DavError> {
        let stored = match first_run {
            true => None,
            false => self.registry.sync_token(calendar.id()).map(|t| t.to_string()),
        };

        if let Some(token) = stored {
            match calendar.list_incremental(Some(&token), false).await {
                Ok(delta) if delta.is_empty() && delta.token.is_some() => {
                    return Ok(TokenCheck::Unchanged(delta.token));
                },
                Ok(delta) => {
                    progress.debug(&format!("Calendar {} has changed since the last sync", calendar.name()));
                    if delta.token.is_some() {
                        return Ok(TokenCheck::Changed(delta.token));
                    }
                },
                Err(err) if err.is_authorization() => return Err(err),
                Err(err) => progress.debug(&format!("Unable to list the changes of {}: {}", calendar.name(), err)),
            }
        }

        match calendar.list_incremental(None, false).await {
            Ok(delta) => Ok(TokenCheck::Changed(delta.token)),
            Err(err) if err.is_authorization() => Err(err),
            Err(err) => {
                progress.debug(&format!("Unable to get a sync token for {}: {}", calendar.name(), err));
                Ok(TokenCheck::Changed(None))
            },
        }
    }

    async fn sync_calendar(&mut self, calendar: &C, first_run: bool, force: bool, cycle_start: &DateTime<Utc>, progress: &mut SyncProgress) -> Result<(), DavError> {
        let cal_name = calendar.name().to_string();
        progress.info(&format!("Syncing calendar {}", cal_name));
        progress.counters_mut(&cal_name);
        progress.feedback(SyncEvent::InProgress{
            calendar: cal_name.clone(),
            details: "started".to_string()
        });

        let mut fresh_token = None;
        if self.settings.use_sync_tokens {
            match self.check_sync_token(calendar, first_run, progress).await? {
                TokenCheck::Unchanged(token) => {
                    progress.debug(&format!("No change in calendar {} since the last sync", cal_name));
                    self.registry.set_sync_token(calendar.id(), token);
                    return Ok(());
                },
                TokenCheck::Changed(token) => fresh_token = token,
            }
        }

        // Step 1 - list the remote tasks
        let filter = if first_run { ListFilter::All } else { ListFilter::Pending };
        let mut batch = calendar.list(filter).await?;
        progress.feedback(SyncEvent::InProgress{
            calendar: cal_name.clone(),
            details: format!("{} remote items", batch.len()),
        });

        // Step 2 - find out which known tasks are missing from the listing
        self.check_missing_tasks(calendar, &mut batch, first_run, cycle_start, progress).await?;

        // Step 3 - apply the listing
        recompute_children(&mut batch, &self.store);
        let ordered = {
            let store = &self.store;
            sort_by_dependencies(batch, |uid| store.has_task(uid), self.settings.max_ordering_passes)
        };
        for todo in ordered {
            let uid = todo.uid().to_string();
            match self.apply_remote(todo, calendar, force) {
                Err(err) => progress.warn(&format!("Unable to apply {} from calendar {}: {}", uid, cal_name, err)),
                Ok(outcome) => {
                    progress.trace(&format!("{} is {:?}", uid, outcome));
                    let counters = progress.counters_mut(&cal_name);
                    match outcome {
                        ApplyOutcome::Created => counters.created += 1,
                        ApplyOutcome::Updated => counters.updated += 1,
                        ApplyOutcome::Unchanged => counters.unchanged += 1,
                    }
                },
            }
        }

        if self.settings.use_sync_tokens {
            self.registry.set_sync_token(calendar.id(), fresh_token);
        }

        let counters = *progress.counters_mut(&cal_name);
        progress.info(&format!("Calendar {} synced: {}", cal_name, counters));
        Ok(())
    }

    /// UIDs of the tasks that are known to be mirrored in a calendar
    fn known_uids(&self, calendar: &C) -> Vec<String> {
        let ns = &self.settings.namespace;
        let cal_url = calendar.id().as_str();

        let mut uids: Vec<String> = self.registry.todos_in(calendar.id()).iter()
            .map(|t| t.uid().to_string())
            .collect();
        for uid in self.store.all_task_uids() {
            let mirrored_here = self.store.get_task(&uid)
                .map(|t| t.attribute(ns, attributes::CALENDAR_URL) == Some(cal_url) && t.attribute(ns, attributes::URL).is_some())
                .unwrap_or(false);
            if mirrored_here {
                uids.push(uid);
            }
        }
        uids.sort();
        uids.dedup();
        uids
    }

    /// Decide what to do with the known tasks a listing did not return.
    ///
    /// Tasks that are still on the server are added to the batch, the others are deleted locally.
    async fn check_missing_tasks(&mut self, calendar: &C, batch: &mut Vec<Todo>, first_run: bool, cycle_start: &DateTime<Utc>, progress: &mut SyncProgress) -> Result<(), DavError> {
        let listed: HashSet<String> = batch.iter().map(|t| t.uid().to_string()).collect();
        let cal_name = calendar.name().to_string();

        for uid in self.known_uids(calendar) {
            if listed.contains(&uid) {
                continue;
            }
            let task = match self.store.get_task(&uid) {
                None => {
                    self.registry.forget(&uid);
                    continue;
                },
                Some(task) => task,
            };
            if task.added() > cycle_start {
                progress.trace(&format!("{} has been created during this sync, keeping it", uid));
                continue;
            }
            if first_run == false && task.is_active() == false {
                // Closed tasks are not listed
                continue;
            }

            match calendar.fetch_by_uid(&uid).await {
                Ok(Some(todo)) => {
                    progress.debug(&format!("{} is not listed in {} but still exists", uid, cal_name));
                    batch.push(todo);
                },
                Ok(None) => {
                    progress.debug(&format!("{} has been removed from {}", uid, cal_name));
                    self.registry.forget(&uid);
                    match self.store.request_deletion(&uid) {
                        Err(err) => progress.warn(&format!("Unable to delete local task {}: {}", uid, err)),
                        Ok(()) => progress.counters_mut(&cal_name).deleted += 1,
                    }
                },
                Err(err) if err.is_authorization() => return Err(err),
                Err(err) => progress.warn(&format!("Unable to check whether {} still exists in {}: {}", uid, cal_name, err)),
            }
        }
        Ok(())
    }

    /// Remember where a task is mirrored. Returns whether anything changed
    fn set_mirror_attributes(&self, task: &mut Task, todo: &Todo, calendar: &C) -> bool {
        let ns = &self.settings.namespace;
        let prefix = &self.settings.calendar_tag_prefix;
        let mut changed = false;

        let wanted = [
            (attributes::URL, todo.href().as_str()),
            (attributes::CALENDAR_URL, calendar.id().as_str()),
            (attributes::CALENDAR_NAME, calendar.name()),
        ];
        for (key, value) in &wanted {
            if task.attribute(ns, key) != Some(*value) {
                task.set_attribute(ns, key, value);
                changed = true;
            }
        }

        let membership = format!("{}{}", prefix, calendar.name());
        let stale: Vec<String> = task.tags().iter()
            .filter(|t| t.starts_with(prefix.as_str()) && **t != membership)
            .cloned()
            .collect();
        for tag in stale {
            task.remove_tag(&tag);
            changed = true;
        }
        if task.has_tag(&membership) == false {
            task.add_tag(&membership);
            changed = true;
        }
        changed
    }

    /// Create or update the local task that matches a remote resource
    fn apply_remote(&mut self, todo: Todo, calendar: &C, force: bool) -> Result<ApplyOutcome, Box<dyn Error>> {
        let ns = self.settings.namespace.clone();
        let (mut task, outcome) = match self.store.get_task(todo.uid()) {
            None => (self.store.new_task(todo.uid()), ApplyOutcome::Created),
            Some(task) => {
                let outcome = if force || todo.sequence() > task.sequence(&ns) {
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Unchanged
                };
                (task, outcome)
            },
        };

        let mirror_changed = self.set_mirror_attributes(&mut task, &todo, calendar);
        match outcome {
            ApplyOutcome::Created | ApplyOutcome::Updated => {
                self.fields.write_local_all(&todo, &mut task, &context(&self.settings, &self.store));
                self.store.push_task(task)?;
            },
            ApplyOutcome::Unchanged => {
                // CHILD links are recomputed from the batch, they do not depend on the sequence
                let children = todo.related(RelType::Child);
                let links_changed = task.children() != children.as_slice();
                if links_changed {
                    task.set_children(children);
                }
                if mirror_changed || links_changed {
                    self.store.push_task(task)?;
                }
            },
        }

        self.registry.remember(todo);
        Ok(outcome)
    }

    /// The calendar a task belongs to: from its calendar tag, from its attributes, or from its last known resource
    fn resolve_calendar(&self, task: &Task) -> Option<C> {
        let ns = &self.settings.namespace;

        if let Some(name) = fields::calendar_from_tags(task.tags(), &self.settings.calendar_tag_prefix) {
            match self.registry.calendar_by_name(name) {
                Some(calendar) => return Some(calendar.clone()),
                None => log::warn!("Task {} is tagged with unknown calendar {}", task.uid(), name),
            }
        }

        let by_attribute = task.attribute(ns, attributes::CALENDAR_URL)
            .and_then(|url| Url::parse(url).ok())
            .and_then(|url| self.registry.calendar(&url));
        if let Some(calendar) = by_attribute {
            return Some(calendar.clone());
        }

        self.registry.todo(task.uid())
            .and_then(|todo| self.registry.calendar(todo.calendar()))
            .cloned()
    }

    /// The resource currently mirroring a task, if any
    async fn find_existing(&self, task: &Task, target: &C) -> Result<Option<Todo>, DavError> {
        if let Some(todo) = self.registry.todo(task.uid()) {
            return Ok(Some(todo.clone()));
        }
        let ns = &self.settings.namespace;
        if task.attribute(ns, attributes::URL).is_none() {
            return Ok(None);
        }

        let previous = task.attribute(ns, attributes::CALENDAR_URL)
            .and_then(|url| Url::parse(url).ok())
            .and_then(|url| self.registry.calendar(&url))
            .cloned()
            .unwrap_or_else(|| target.clone());
        previous.fetch_by_uid(task.uid()).await
    }

    /// Push a local task to the server.
    ///
    /// The task is written only if it differs from its remote version (sync-ignorable fields aside).
    /// Its sequence is bumped before every write.
    pub async fn set_task(&mut self, uid: &str) -> Result<SetOutcome, Box<dyn Error>> {
        if self.registry.has_calendars() == false {
            self.refresh_calendars().await?;
        }

        let mut task = self.store.get_task(uid)
            .ok_or_else(|| DavError::Consistency(format!("No task {} in the local store", uid)))?;
        let target = self.resolve_calendar(&task)
            .ok_or_else(|| DavError::Consistency(format!("Unable to find a calendar for task {}", uid)))?;

        match self.find_existing(&task, &target).await? {
            Some(existing) if existing.calendar() != target.id() => {
                log::info!("Moving {} from {} to {}", uid, existing.calendar(), target.name());
                match self.registry.calendar(existing.calendar()).cloned() {
                    Some(former) => former.delete(&existing).await?,
                    None => log::warn!("Calendar {} is not known anymore, {} cannot be removed from it", existing.calendar(), uid),
                }
                self.registry.forget(uid);

                let todo = Todo::new(uid, target.id());
                self.push_new(&mut task, todo, &target, existing.sequence(), true).await?;
                Ok(SetOutcome::Moved)
            },
            Some(existing) => {
                if self.should_sync(&task, &existing) == false {
                    log::debug!("{} is already up to date on the server", uid);
                    return Ok(SetOutcome::Unchanged);
                }
                let sequence = existing.sequence();
                self.push_new(&mut task, existing, &target, sequence, false).await?;
                Ok(SetOutcome::Updated)
            },
            None => {
                let todo = Todo::new(uid, target.id());
                self.push_new(&mut task, todo, &target, 0, true).await?;
                Ok(SetOutcome::Created)
            },
        }
    }

    /// Bump the sequence of a task, write it to a resource, and send it
    async fn push_new(&mut self, task: &mut Task, mut todo: Todo, target: &C, remote_sequence: i64, creation: bool) -> Result<(), Box<dyn Error>> {
        let ns = self.settings.namespace.clone();
        let sequence = std::cmp::max(task.sequence(&ns), remote_sequence) + 1;
        task.set_sequence(&ns, sequence);

        self.fields.write_remote_all(task, &mut todo, &context(&self.settings, &self.store));
        fields::set_calendar_membership(&mut todo, &self.settings.calendar_tag_prefix, target.name());

        let written = match creation {
            true => target.create(&todo).await?,
            false => target.update(&todo).await?,
        };
        log::debug!("{} {} in {} (sequence {})", if creation { "Created" } else { "Updated" }, task.uid(), target.name(), sequence);

        self.set_mirror_attributes(task, &written, target);
        self.store.push_task(task.clone())?;
        self.registry.remember(written);
        Ok(())
    }

    /// Remove a task from the server.
    ///
    /// Returns whether a resource has been deleted (a task that is not on the server is not an error)
    pub async fn remove_task(&mut self, uid: &str) -> Result<bool, Box<dyn Error>> {
        if self.registry.has_calendars() == false {
            self.refresh_calendars().await?;
        }

        let mut found = self.registry.todo(uid)
            .and_then(|todo| self.registry.calendar(todo.calendar()).map(|cal| (cal.clone(), todo.clone())));
        if found.is_none() {
            let calendars: Vec<C> = self.registry.calendars().into_iter().cloned().collect();
            for calendar in calendars {
                if let Some(todo) = calendar.fetch_by_uid(uid).await? {
                    found = Some((calendar, todo));
                    break;
                }
            }
        }

        let (calendar, todo) = match found {
            None => {
                log::info!("{} is not on the server, there is nothing to remove", uid);
                return Ok(false);
            },
            Some(found) => found,
        };
        calendar.delete(&todo).await?;
        self.registry.forget(uid);
        log::info!("Removed {} from {}", uid, calendar.name());

        if let Some(mut task) = self.store.get_task(uid) {
            let ns = self.settings.namespace.clone();
            task.remove_attribute(&ns, attributes::URL);
            task.remove_attribute(&ns, attributes::CALENDAR_URL);
            task.remove_attribute(&ns, attributes::CALENDAR_NAME);
            self.store.push_task(task)?;
        }
        Ok(true)
    }
}

//! An in-memory CalDAV source, that tests use instead of a real server
//!
//! Resources are stored as iCal text, exactly like a server would, so that every read goes through the codec.
//! Failures can be injected with a [`MockBehaviour`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::calendar::{CalendarId, SupportedComponents, SyncDelta, TodoStub};
use crate::error::{DavError, RequestKind};
use crate::mock_behaviour::MockBehaviour;
use crate::todo::{Todo, VersionTag};
use crate::traits::{CalDavSource, DavCalendar};

const MOCK_URL: &str = "https://mock.example.com/calendars/";
const TOKEN_PREFIX: &str = "rev-";

#[derive(Clone, Debug)]
struct StoredTodo {
    href: Url,
    version_tag: VersionTag,
    payload: String,
}

#[derive(Debug, Default)]
struct MockData {
    /// Resources, indexed by UID
    todos: BTreeMap<String, StoredTodo>,
    /// Bumped on every change. Sync tokens are derived from it
    revision: u64,
    /// `(revision, UID)` of every change
    changes: Vec<(u64, String)>,
    /// Number of changes made through the DavCalendar trait (i.e. not by the test helpers)
    writes: u32,
}

impl MockData {
    fn store(&mut self, uid: &str, href: Url, payload: String) -> VersionTag {
        let version_tag = VersionTag::random();
        self.todos.insert(uid.to_string(), StoredTodo { href, version_tag: version_tag.clone(), payload });
        self.bump(uid);
        version_tag
    }

    fn bump(&mut self, uid: &str) {
        self.revision += 1;
        self.changes.push((self.revision, uid.to_string()));
    }
}

/// A calendar of a [`MockSource`]
#[derive(Clone, Debug)]
pub struct MockCalendar {
    name: String,
    id: CalendarId,
    data: Arc<Mutex<MockData>>,
    behaviour: Arc<Mutex<MockBehaviour>>,
}

impl MockCalendar {
    fn new(name: &str, id: CalendarId, behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        Self {
            name: name.to_string(),
            id,
            data: Arc::new(Mutex::new(MockData::default())),
            behaviour,
        }
    }

    fn load(&self, stored: &StoredTodo) -> Result<Todo, DavError> {
        crate::ical::parse(&stored.payload, stored.href.clone(), Some(stored.version_tag.clone()), &self.id)
    }

    fn load_all(&self) -> Result<Vec<Todo>, DavError> {
        let data = self.data.lock().unwrap();
        data.todos.values().map(|stored| self.load(stored)).collect()
    }

    /// Put a resource in this calendar, as if another client had created it
    pub fn insert(&self, todo: &Todo) {
        let href = Todo::href_for(todo.uid(), &self.id);
        let payload = crate::ical::build_from(todo);
        self.data.lock().unwrap().store(todo.uid(), href, payload);
    }

    /// Put a raw iCal resource in this calendar
    pub fn insert_raw(&self, uid: &str, payload: &str) {
        let href = Todo::href_for(uid, &self.id);
        self.data.lock().unwrap().store(uid, href, payload.to_string());
    }

    /// Modify a resource, as if another client had done it. Returns false if it does not exist
    pub fn server_edit<F: FnOnce(&mut Todo)>(&self, uid: &str, edit: F) -> bool {
        let mut todo = match self.todo(uid) {
            None => return false,
            Some(todo) => todo,
        };
        edit(&mut todo);
        let payload = crate::ical::build_from(&todo);
        self.data.lock().unwrap().store(uid, todo.href().clone(), payload);
        true
    }

    /// Remove a resource, as if another client had done it. Returns false if it did not exist
    pub fn server_delete(&self, uid: &str) -> bool {
        let mut data = self.data.lock().unwrap();
        match data.todos.remove(uid) {
            None => false,
            Some(_) => {
                data.bump(uid);
                true
            },
        }
    }

    /// The current version of a resource
    pub fn todo(&self, uid: &str) -> Option<Todo> {
        let data = self.data.lock().unwrap();
        data.todos.get(uid).and_then(|stored| self.load(stored).ok())
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().todos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many creations, updates and deletions have been sent to this calendar
    pub fn write_count(&self) -> u32 {
        self.data.lock().unwrap().writes
    }

    /// The token that designates the current state of this calendar
    pub fn current_token(&self) -> String {
        format!("{}{}", TOKEN_PREFIX, self.data.lock().unwrap().revision)
    }
}

/// Wait for the latency of the mock behaviour, as a real server would
async fn network_delay(behaviour: &Mutex<MockBehaviour>) {
    let latency = behaviour.lock().unwrap().begin_request();
    if latency.is_zero() == false {
        tokio::time::sleep(latency).await;
    }
    behaviour.lock().unwrap().end_request();
}

#[async_trait]
impl DavCalendar for MockCalendar {
    fn name(&self) -> &str {
        &self.name
    }
    fn id(&self) -> &CalendarId {
        &self.id
    }
    fn supported_components(&self) -> SupportedComponents {
        SupportedComponents::TODO
    }

    async fn list_pending(&self) -> Result<Vec<Todo>, DavError> {
        self.behaviour.lock().unwrap().can_list(&self.id)?;
        network_delay(&self.behaviour).await;
        let todos = self.load_all()?;
        Ok(todos.into_iter().filter(|t| t.is_closed() == false).collect())
    }

    async fn list_all(&self) -> Result<Vec<Todo>, DavError> {
        self.behaviour.lock().unwrap().can_list(&self.id)?;
        network_delay(&self.behaviour).await;
        self.load_all()
    }

    async fn fetch_by_uid(&self, uid: &str) -> Result<Option<Todo>, DavError> {
        self.behaviour.lock().unwrap().can_fetch_by_uid(&self.id)?;
        let data = self.data.lock().unwrap();
        data.todos.get(uid).map(|stored| self.load(stored)).transpose()
    }

    async fn create(&self, todo: &Todo) -> Result<Todo, DavError> {
        self.behaviour.lock().unwrap().can_create(todo.href())?;

        let mut data = self.data.lock().unwrap();
        if data.todos.contains_key(todo.uid()) {
            return Err(DavError::Protocol{
                kind: RequestKind::Creation,
                url: todo.href().clone(),
                status: 412,
                reason: "Precondition Failed".to_string(),
            });
        }
        let href = Todo::href_for(todo.uid(), &self.id);
        let payload = crate::ical::build_from(todo);
        data.store(todo.uid(), href, payload);
        data.writes += 1;
        let stored = data.todos.get(todo.uid()).cloned()
            .ok_or_else(|| DavError::Consistency(format!("{} vanished from the mock calendar", todo.uid())))?;
        self.load(&stored)
    }

    async fn update(&self, todo: &Todo) -> Result<Todo, DavError> {
        self.behaviour.lock().unwrap().can_update(todo.href())?;

        let mut data = self.data.lock().unwrap();
        let href = match data.todos.get(todo.uid()) {
            None => return Err(DavError::NotFound(todo.href().clone())),
            Some(stored) => {
                if let Some(tag) = todo.version_tag() {
                    if tag != &stored.version_tag {
                        return Err(DavError::Protocol{
                            kind: RequestKind::Creation,
                            url: todo.href().clone(),
                            status: 412,
                            reason: "Precondition Failed".to_string(),
                        });
                    }
                }
                stored.href.clone()
            },
        };
        let payload = crate::ical::build_from(todo);
        data.store(todo.uid(), href, payload);
        data.writes += 1;
        let stored = data.todos.get(todo.uid()).cloned()
            .ok_or_else(|| DavError::Consistency(format!("{} vanished from the mock calendar", todo.uid())))?;
        self.load(&stored)
    }

    async fn delete(&self, todo: &Todo) -> Result<(), DavError> {
        self.behaviour.lock().unwrap().can_delete(todo.href())?;

        let mut data = self.data.lock().unwrap();
        if data.todos.remove(todo.uid()).is_some() {
            data.bump(todo.uid());
            data.writes += 1;
        }
        Ok(())
    }

    async fn list_incremental(&self, token: Option<&str>, eager: bool) -> Result<SyncDelta, DavError> {
        self.behaviour.lock().unwrap().can_list(&self.id)?;

        let data = self.data.lock().unwrap();
        let since = token
            .and_then(|t| t.strip_prefix(TOKEN_PREFIX))
            .and_then(|rev| rev.parse::<u64>().ok())
            .filter(|rev| *rev <= data.revision);

        let mut changed: Vec<String> = match since {
            None => data.todos.keys().cloned().collect(),
            Some(rev) => data.changes.iter()
                .filter(|(change, _)| *change > rev)
                .map(|(_, uid)| uid.clone())
                .collect(),
        };
        changed.sort();
        changed.dedup();

        let mut delta = SyncDelta {
            token: Some(format!("{}{}", TOKEN_PREFIX, data.revision)),
            ..SyncDelta::default()
        };
        for uid in changed {
            match data.todos.get(&uid) {
                None => delta.removed.push(Todo::href_for(&uid, &self.id)),
                Some(stored) if eager => delta.loaded.push(self.load(stored)?),
                Some(stored) => delta.stubs.push(TodoStub {
                    href: stored.href.clone(),
                    version_tag: Some(stored.version_tag.clone()),
                }),
            }
        }
        Ok(delta)
    }
}


/// A mocked CalDAV server
#[derive(Clone, Debug)]
pub struct MockSource {
    url: Url,
    calendars: Arc<Mutex<Vec<MockCalendar>>>,
    behaviour: Arc<Mutex<MockBehaviour>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            url: MOCK_URL.parse().unwrap(),
            calendars: Arc::new(Mutex::new(Vec::new())),
            behaviour: Arc::new(Mutex::new(MockBehaviour::new())),
        }
    }

    /// The behaviour shared by this source and all its calendars
    pub fn behaviour(&self) -> &Arc<Mutex<MockBehaviour>> {
        &self.behaviour
    }

    pub fn set_behaviour(&self, behaviour: MockBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    /// Make every request fail with an authorization error
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.behaviour.lock().unwrap().unauthorized = unauthorized;
    }

    /// Add a calendar, as if another client had created it
    pub fn add_calendar(&self, name: &str) -> MockCalendar {
        let segment = format!("{}/", sanitize_filename::sanitize(name));
        let id = self.url.join(&segment).unwrap_or_else(|_| self.url.clone());
        let calendar = MockCalendar::new(name, id, Arc::clone(&self.behaviour));
        self.calendars.lock().unwrap().push(calendar.clone());
        calendar
    }

    /// Remove a calendar, as if another client had deleted it
    pub fn remove_calendar(&self, name: &str) {
        self.calendars.lock().unwrap().retain(|c| c.name() != name);
    }

    pub fn calendar_by_name(&self, name: &str) -> Option<MockCalendar> {
        self.calendars.lock().unwrap().iter().find(|c| c.name() == name).cloned()
    }
}

#[async_trait]
impl CalDavSource<MockCalendar> for MockSource {
    async fn get_calendars(&self) -> Result<Vec<MockCalendar>, DavError> {
        self.behaviour.lock().unwrap().can_get_calendars(&self.url)?;
        network_delay(&self.behaviour).await;
        Ok(self.calendars.lock().unwrap().clone())
    }

    async fn create_calendar(&self, name: &str) -> Result<MockCalendar, DavError> {
        self.behaviour.lock().unwrap().can_create_calendar(&self.url)?;
        if self.calendar_by_name(name).is_some() {
            return Err(DavError::Protocol{
                kind: RequestKind::CollectionCreation,
                url: self.url.clone(),
                status: 405,
                reason: "Method Not Allowed".to_string(),
            });
        }
        Ok(self.add_calendar(name))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_calendar() {
        let source = MockSource::new();
        let calendar = source.add_calendar("Shopping list");
        assert_eq!(calendar.id().as_str(), "https://mock.example.com/calendars/Shopping%20list/");

        let mut todo = Todo::new("milk", calendar.id());
        todo.props_mut().set_text("SUMMARY", "Buy milk");
        let created = calendar.create(&todo).await.unwrap();
        assert!(created.version_tag().is_some());
        assert!(calendar.create(&todo).await.is_err());

        // Stale version tags are refused
        let first_tag = created.version_tag().cloned();
        let updated = calendar.update(&created).await.unwrap();
        assert!(updated.version_tag().cloned() != first_tag);
        assert!(calendar.update(&created).await.is_err());

        let token = calendar.current_token();
        let delta = calendar.list_incremental(Some(&token), false).await.unwrap();
        assert!(delta.is_empty());

        calendar.delete(&updated).await.unwrap();
        calendar.delete(&updated).await.unwrap();
        let delta = calendar.list_incremental(Some(&token), false).await.unwrap();
        assert_eq!(delta.removed, vec![updated.href().clone()]);
        assert_eq!(calendar.write_count(), 3);
    }

    #[tokio::test]
    async fn test_pending_filter() {
        let source = MockSource::new();
        let calendar = source.add_calendar("Work");
        for (uid, status) in &[("open", "NEEDS-ACTION"), ("done", "COMPLETED")] {
            let mut todo = Todo::new(uid, calendar.id());
            todo.props_mut().set_text("STATUS", status);
            calendar.insert(&todo);
        }
        assert_eq!(calendar.list_all().await.unwrap().len(), 2);
        let pending = calendar.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].uid(), "open");
    }
}

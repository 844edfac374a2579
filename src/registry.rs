//! A process-local index of the calendars and resources seen on the server
//!
//! It holds no authoritative data, and can be rebuilt from the server at any time.

use std::collections::{HashMap, HashSet};

use crate::calendar::CalendarId;
use crate::todo::Todo;
use crate::traits::DavCalendar;

#[derive(Debug)]
pub struct Registry<C: DavCalendar> {
    calendars: HashMap<CalendarId, C>,
    names: HashMap<String, CalendarId>,
    /// Last seen version of every resource, by UID
    todos: HashMap<String, Todo>,
    sync_tokens: HashMap<CalendarId, String>,
    /// Calendars whose tasks, closed ones included, have been fully imported once
    imported: HashSet<CalendarId>,
}

impl<C: DavCalendar> Default for Registry<C> {
    fn default() -> Self {
        Self {
            calendars: HashMap::new(),
            names: HashMap::new(),
            todos: HashMap::new(),
            sync_tokens: HashMap::new(),
            imported: HashSet::new(),
        }
    }
}

impl<C: DavCalendar> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the known calendars.
    /// Resources and sync tokens of calendars that disappeared are forgotten
    pub fn set_calendars(&mut self, calendars: Vec<C>) {
        self.calendars.clear();
        self.names.clear();
        for calendar in calendars {
            if let Some(previous) = self.names.insert(calendar.name().to_string(), calendar.id().clone()) {
                log::warn!("Several calendars are named {} ({} and {})", calendar.name(), previous, calendar.id());
            }
            self.calendars.insert(calendar.id().clone(), calendar);
        }

        let calendars = &self.calendars;
        self.todos.retain(|_, todo| calendars.contains_key(todo.calendar()));
        self.sync_tokens.retain(|id, _| calendars.contains_key(id));
        self.imported.retain(|id| calendars.contains_key(id));
    }

    pub fn add_calendar(&mut self, calendar: C) {
        self.names.insert(calendar.name().to_string(), calendar.id().clone());
        self.calendars.insert(calendar.id().clone(), calendar);
    }

    pub fn has_calendars(&self) -> bool {
        self.calendars.is_empty() == false
    }

    pub fn calendar(&self, id: &CalendarId) -> Option<&C> {
        self.calendars.get(id)
    }

    pub fn calendar_by_name(&self, name: &str) -> Option<&C> {
        self.names.get(name).and_then(|id| self.calendars.get(id))
    }

    /// Known calendars, sorted by name
    pub fn calendars(&self) -> Vec<&C> {
        let mut calendars: Vec<&C> = self.calendars.values().collect();
        calendars.sort_by(|l, r| l.name().cmp(r.name()));
        calendars
    }

    pub fn todo(&self, uid: &str) -> Option<&Todo> {
        self.todos.get(uid)
    }

    /// Resources last seen in a calendar
    pub fn todos_in(&self, calendar: &CalendarId) -> Vec<&Todo> {
        self.todos.values().filter(|t| t.calendar() == calendar).collect()
    }

    pub fn remember(&mut self, todo: Todo) {
        self.todos.insert(todo.uid().to_string(), todo);
    }

    pub fn forget(&mut self, uid: &str) -> Option<Todo> {
        self.todos.remove(uid)
    }

    pub fn sync_token(&self, calendar: &CalendarId) -> Option<&str> {
        self.sync_tokens.get(calendar).map(|t| t.as_str())
    }

    pub fn set_sync_token(&mut self, calendar: &CalendarId, token: Option<String>) {
        match token {
            None => { self.sync_tokens.remove(calendar); },
            Some(token) => { self.sync_tokens.insert(calendar.clone(), token); },
        }
    }

    /// Whether some calendar still has to be fully imported (or no calendar is known yet)
    pub fn is_first_run(&self) -> bool {
        self.imported.is_empty() || self.calendars.keys().any(|id| self.imported.contains(id) == false)
    }

    /// Whether a calendar has never been fully imported
    pub fn needs_import(&self, calendar: &CalendarId) -> bool {
        self.imported.contains(calendar) == false
    }

    pub fn mark_imported(&mut self, calendar: &CalendarId) {
        self.imported.insert(calendar.clone());
    }

    /// Forget everything. The next cycle will be a first run again
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

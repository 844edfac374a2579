//! Local tasks, as they are stored by the application

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::date::TaskDate;

/// The lifecycle of a local task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Done,
    Dismissed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Active
    }
}

/// Attribute names this crate uses in its namespace
pub mod attributes {
    /// The revision counter of the task
    pub const SEQUENCE: &str = "sequence";
    /// The URL of the resource that mirrors the task
    pub const URL: &str = "url";
    /// The calendar this task is mirrored in
    pub const CALENDAR_URL: &str = "calendar_url";
    pub const CALENDAR_NAME: &str = "calendar_name";
}


/// A local task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Persistent, globally unique identifier. It is shared with the remote resource
    uid: String,
    title: String,
    /// The free-form body of the task
    text: String,
    status: TaskStatus,

    due: TaskDate,
    start: TaskDate,
    closed: TaskDate,

    tags: Vec<String>,
    parent: Option<String>,
    children: Vec<String>,

    /// Key/value pairs, grouped by namespace (one namespace per sync backend)
    attributes: HashMap<String, HashMap<String, String>>,

    added: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Task {
    /// Create an empty task
    pub fn new(uid: &str) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.to_string(),
            title: String::new(),
            text: String::new(),
            status: TaskStatus::Active,
            due: TaskDate::NoDate,
            start: TaskDate::NoDate,
            closed: TaskDate::NoDate,
            tags: Vec::new(),
            parent: None,
            children: Vec::new(),
            attributes: HashMap::new(),
            added: now,
            modified: now,
        }
    }

    /// Create an empty task with a random UID
    pub fn new_random() -> Self {
        Self::new(&Uuid::new_v4().to_hyphenated().to_string())
    }

    pub fn uid(&self) -> &str                   { &self.uid      }
    pub fn title(&self) -> &str                 { &self.title    }
    pub fn text(&self) -> &str                  { &self.text     }
    pub fn status(&self) -> TaskStatus          { self.status    }
    pub fn due(&self) -> &TaskDate              { &self.due      }
    pub fn start(&self) -> &TaskDate            { &self.start    }
    pub fn closed(&self) -> &TaskDate           { &self.closed   }
    pub fn tags(&self) -> &[String]             { &self.tags     }
    pub fn parent(&self) -> Option<&str>        { self.parent.as_deref() }
    pub fn children(&self) -> &[String]         { &self.children }
    pub fn added(&self) -> &DateTime<Utc>       { &self.added    }
    pub fn modified(&self) -> &DateTime<Utc>    { &self.modified }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    fn touch(&mut self) {
        self.modified = Utc::now();
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        self.touch();
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.touch();
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_due(&mut self, date: TaskDate) {
        self.due = date;
        self.touch();
    }

    pub fn set_start(&mut self, date: TaskDate) {
        self.start = date;
        self.touch();
    }

    pub fn set_closed(&mut self, date: TaskDate) {
        self.closed = date;
        self.touch();
    }

    /// Only used by stores that restore tasks, and tests
    pub fn set_added(&mut self, added: DateTime<Utc>) {
        self.added = added;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn add_tag(&mut self, tag: &str) {
        if self.has_tag(tag) == false {
            self.tags.push(tag.to_string());
            self.touch();
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        if self.tags.len() != before {
            self.touch();
        }
    }

    pub fn set_parent(&mut self, parent: Option<&str>) {
        self.parent = parent.map(|p| p.to_string());
        self.touch();
    }

    pub fn add_child(&mut self, uid: &str) {
        if self.children.iter().any(|c| c == uid) == false {
            self.children.push(uid.to_string());
            self.touch();
        }
    }

    pub fn remove_child(&mut self, uid: &str) {
        self.children.retain(|c| c != uid);
        self.touch();
    }

    /// Replace the children, keeping the given order
    pub fn set_children(&mut self, children: Vec<String>) {
        self.children = children;
        self.touch();
    }

    pub fn attribute(&self, namespace: &str, key: &str) -> Option<&str> {
        self.attributes.get(namespace)
            .and_then(|attrs| attrs.get(key))
            .map(|v| v.as_str())
    }

    pub fn set_attribute(&mut self, namespace: &str, key: &str, value: &str) {
        self.attributes.entry(namespace.to_string())
            .or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove_attribute(&mut self, namespace: &str, key: &str) {
        if let Some(attrs) = self.attributes.get_mut(namespace) {
            attrs.remove(key);
        }
    }

    /// The revision counter of this task in a namespace. Unparsable values count as 0
    pub fn sequence(&self, namespace: &str) -> i64 {
        self.attribute(namespace, attributes::SEQUENCE)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn set_sequence(&mut self, namespace: &str, sequence: i64) {
        self.set_attribute(namespace, attributes::SEQUENCE, &sequence.to_string());
    }
}

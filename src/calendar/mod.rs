pub mod remote_calendar;

use std::convert::TryFrom;

use bitflags::bitflags;
use url::Url;

use crate::error::DavError;
use crate::todo::{Todo, VersionTag};

bitflags! {
    pub struct SupportedComponents: u8 {
        /// An event, such as a calendar meeting
        const EVENT = 1;
        /// A to-do item, such as a reminder
        const TODO = 2;
    }
}

impl TryFrom<minidom::Element> for SupportedComponents {
    type Error = DavError;

    /// Create an instance from an XML <supported-calendar-component-set> element
    fn try_from(element: minidom::Element) -> Result<Self, Self::Error> {
        if element.name() != "supported-calendar-component-set" {
            return Err(DavError::Xml("Element must be a <supported-calendar-component-set>".to_string()));
        }

        let mut flags = Self::empty();
        for child in element.children() {
            match child.attr("name") {
                None => continue,
                Some("VEVENT") => flags.insert(Self::EVENT),
                Some("VTODO") => flags.insert(Self::TODO),
                Some(other) => {
                    log::debug!("Unimplemented supported component type: {:?}. Ignoring it", other);
                    continue
                },
            };
        }

        Ok(flags)
    }
}


/// Which tasks should be retrieved when listing a calendar
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListFilter {
    /// Only the tasks that are neither completed nor cancelled
    Pending,
    /// Every task
    All,
}

impl Default for ListFilter {
    fn default() -> Self {
        ListFilter::Pending
    }
}


/// A resource the server reported as changed, but whose content has not been downloaded
#[derive(Clone, Debug, PartialEq)]
pub struct TodoStub {
    pub href: Url,
    pub version_tag: Option<VersionTag>,
}

/// The changes of a calendar since a sync token
#[derive(Clone, Debug, Default)]
pub struct SyncDelta {
    /// Changed resources, with their content
    pub loaded: Vec<Todo>,
    /// Changed resources the caller must fetch by itself
    pub stubs: Vec<TodoStub>,
    /// Resources that have been removed
    pub removed: Vec<Url>,
    /// The token to use next time, if the server sent one
    pub token: Option<String>,
}

impl SyncDelta {
    /// Whether nothing changed since the token this delta has been asked for
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty() && self.stubs.is_empty() && self.removed.is_empty()
    }
}


pub type CalendarId = url::Url;

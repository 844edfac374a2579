//! A module to parse ICal files

use ical::parser::ical::component::IcalCalendar;
use ical::parser::ical::component::IcalTodo;
use url::Url;

use crate::calendar::CalendarId;
use crate::error::DavError;
use crate::todo::{Property, PropertyBag, Todo, VersionTag};


/// Parse an iCal file into a [`Todo`]
pub fn parse(content: &str, href: Url, version_tag: Option<VersionTag>, calendar: &CalendarId) -> Result<Todo, DavError> {
    let mut reader = ical::IcalParser::new(content.as_bytes());
    let parsed_item = match reader.next() {
        None => return Err(DavError::Ical(format!("Invalid iCal data to parse for item {}", href))),
        Some(item) => match item {
            Err(err) => return Err(DavError::Ical(format!("Unable to parse iCal data for item {}: {}", href, err))),
            Ok(item) => item,
        }
    };

    // What to do with multiple items?
    if reader.next().map(|r| r.is_ok()) == Some(true) {
        return Err(DavError::Ical(format!("Parsing multiple items is not supported (item {})", href)));
    }

    let todo = single_todo(&parsed_item)
        .map_err(|msg| DavError::Ical(format!("{} (item {})", msg, href)))?;

    let mut props = PropertyBag::new();
    for prop in &todo.properties {
        let mut converted = Property::new(prop.name.as_str(), prop.value.clone().unwrap_or_default());
        if let Some(params) = &prop.params {
            converted.set_params(params.clone());
        }
        props.push(converted);
    }

    let uid = match props.get("UID") {
        None => return Err(DavError::Ical(format!("Missing UID for item {}", href))),
        Some(p) => p.value().trim().to_string(),
    };

    Ok(Todo::from_server(uid, calendar.clone(), href, version_tag, props, Some(content.to_string())))
}

fn single_todo(item: &IcalCalendar) -> Result<&IcalTodo, &'static str> {
    let n_events = item.events.len();
    let n_todos = item.todos.len();
    let n_journals = item.journals.len();

    if n_todos == 1 && n_events == 0 && n_journals == 0 {
        return Ok(&item.todos[0]);
    }
    Err("Only a single VTODO is supported")
}

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::todo::{Property, Todo};

pub(super) fn read_remote_last_modified(todo: &Todo) -> Option<DateTime<Utc>> {
    let value = todo.props().get("LAST-MODIFIED")?.value().trim().trim_end_matches('Z').to_string();
    match NaiveDateTime::parse_from_str(&value, "%Y%m%dT%H%M%S") {
        Err(err) => {
            log::debug!("Invalid LAST-MODIFIED {:?} in {}: {}", value, todo.uid(), err);
            None
        },
        Ok(dt) => Some(DateTime::<Utc>::from_utc(dt, Utc)),
    }
}

pub(super) fn write_remote_last_modified(todo: &mut Todo, timestamp: Option<&DateTime<Utc>>) {
    match timestamp {
        None => todo.props_mut().remove_all("LAST-MODIFIED"),
        Some(ts) => todo.props_mut().set(Property::new("LAST-MODIFIED", crate::ical::format_date_time(ts))),
    }
}

pub(super) fn truncate(timestamp: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    timestamp.map(|ts| ts.with_nanosecond(0).unwrap_or(ts))
}

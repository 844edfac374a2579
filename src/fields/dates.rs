use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::DateSlot;
use crate::date::{FuzzyTerm, TaskDate};
use crate::task::Task;
use crate::todo::{Property, Todo};

/// The parameter that keeps a fuzzy term next to its best-effort date
pub const FUZZY_PARAM: &str = "X-FUZZY";

/// Dates this far away mean "no date" for some clients
const NO_DATE_YEAR: i32 = 9999;

pub(super) fn read_local(task: &Task, slot: DateSlot) -> TaskDate {
    let date = match slot {
        DateSlot::Due => task.due(),
        DateSlot::Start => task.start(),
        DateSlot::Closed => task.closed(),
    };
    date.normalized()
}

pub(super) fn write_local(task: &mut Task, slot: DateSlot, date: &TaskDate) {
    if &read_local(task, slot) == date {
        return;
    }
    match slot {
        DateSlot::Due => task.set_due(date.clone()),
        DateSlot::Start => task.set_start(date.clone()),
        DateSlot::Closed => task.set_closed(date.clone()),
    }
}

/// Parse a date property. Times with a known TZID are converted to UTC, floating times are read as UTC
pub(super) fn read_remote(todo: &Todo, key: &str, _slot: DateSlot) -> TaskDate {
    let prop = match todo.props().get(key) {
        None => return TaskDate::NoDate,
        Some(p) => p,
    };

    if let Some(term) = prop.param(FUZZY_PARAM).and_then(FuzzyTerm::parse) {
        return TaskDate::Fuzzy(term);
    }

    let value = prop.value().trim();
    let date_only = prop.param("VALUE").map(|v| v.eq_ignore_ascii_case("DATE")).unwrap_or(false)
        || value.len() == 8;

    if date_only {
        return match NaiveDate::parse_from_str(value, "%Y%m%d") {
            Err(err) => {
                log::warn!("Invalid {} date {:?} in {}: {}", key, value, todo.uid(), err);
                TaskDate::NoDate
            },
            Ok(date) if date.year() >= NO_DATE_YEAR => TaskDate::NoDate,
            Ok(date) => TaskDate::Date(date),
        };
    }

    match NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S") {
        Err(err) => {
            log::warn!("Invalid {} timestamp {:?} in {}: {}", key, value, todo.uid(), err);
            TaskDate::NoDate
        },
        Ok(dt) if dt.year() >= NO_DATE_YEAR => TaskDate::NoDate,
        Ok(dt) if value.ends_with('Z') => TaskDate::Timestamp(DateTime::<Utc>::from_utc(dt, Utc)),
        Ok(dt) => TaskDate::Timestamp(zoned_to_utc(dt, prop.param("TZID"), todo.uid())),
    }
}

/// Write a date property.
///
/// A property that already holds this date is kept as it is, so that its TZID, its floating
/// form or the concrete date of its fuzzy term survive. A changed time is written in the
/// time zone of the previous value when it had one.
pub(super) fn write_remote(todo: &mut Todo, key: &str, slot: DateSlot, date: &TaskDate) {
    let date = date.normalized();
    if todo.props().get_all(key).count() == 1 && read_remote(todo, key, slot) == date {
        return;
    }

    let previous_zone = todo.props().get(key)
        .and_then(|p| p.param("TZID"))
        .and_then(|tzid| resolve_tzid(tzid).map(|tz| (tzid.to_string(), tz)));
    todo.props_mut().remove_all(key);

    let prop = match date {
        TaskDate::NoDate => return,
        // COMPLETED must be in UTC
        TaskDate::Timestamp(dt) => match previous_zone {
            Some((tzid, tz)) if slot != DateSlot::Closed => {
                Property::new(key, dt.with_timezone(&tz).format("%Y%m%dT%H%M%S").to_string()).with_param("TZID", tzid)
            },
            _ => Property::new(key, format_timestamp(&dt)),
        },
        // COMPLETED must be a date-time
        TaskDate::Date(d) if slot == DateSlot::Closed => Property::new(key, format_timestamp(&midnight(d))),
        TaskDate::Date(d) => Property::new(key, d.format("%Y%m%d").to_string()).with_param("VALUE", "DATE"),
        TaskDate::Fuzzy(term) => {
            let today = Utc::now().naive_utc().date();
            let concrete = term.concrete_date(today);
            if slot == DateSlot::Closed {
                Property::new(key, format_timestamp(&midnight(concrete))).with_param(FUZZY_PARAM, term.as_str())
            } else {
                Property::new(key, concrete.format("%Y%m%d").to_string())
                    .with_param("VALUE", "DATE")
                    .with_param(FUZZY_PARAM, term.as_str())
            }
        },
    };
    todo.props_mut().push(prop);
}

/// Resolve a TZID such as `Europe/Paris` or `/mozilla.org/Europe/Paris`
fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let name = tzid.strip_prefix("/mozilla.org/")
        .or_else(|| tzid.strip_prefix("/softwarestudio.org/"))
        .unwrap_or(tzid);
    name.parse::<Tz>().ok()
}

fn zoned_to_utc(dt: NaiveDateTime, tzid: Option<&str>, uid: &str) -> DateTime<Utc> {
    let tzid = match tzid {
        None => return DateTime::<Utc>::from_utc(dt, Utc),
        Some(tzid) => tzid,
    };
    match resolve_tzid(tzid).and_then(|tz| tz.from_local_datetime(&dt).earliest()) {
        Some(zoned) => zoned.with_timezone(&Utc),
        None => {
            log::warn!("Unable to place {} in time zone {:?} for {}, reading it as UTC", dt, tzid, uid);
            DateTime::<Utc>::from_utc(dt, Utc)
        },
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_utc(date.and_hms(0, 0, 0), Utc)
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    crate::ical::format_date_time(dt)
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn todo_with(prop: Property) -> Todo {
        let cal = "https://example.com/cal/".parse().unwrap();
        let mut todo = Todo::new("abc", &cal);
        todo.props_mut().push(prop);
        todo
    }

    #[test]
    fn test_remote_dates() {
        let todo = todo_with(Property::new("DUE", "20210402T101500Z"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Timestamp(Utc.ymd(2021, 4, 2).and_hms(10, 15, 0)));

        // Summer time in Paris
        let todo = todo_with(Property::new("DUE", "20210402T101500").with_param("TZID", "Europe/Paris"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Timestamp(Utc.ymd(2021, 4, 2).and_hms(8, 15, 0)));

        let todo = todo_with(Property::new("DUE", "20210102T101500").with_param("TZID", "/mozilla.org/Europe/Paris"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Timestamp(Utc.ymd(2021, 1, 2).and_hms(9, 15, 0)));

        // Floating, or in a zone nobody knows
        let todo = todo_with(Property::new("DUE", "20210402T101500"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Timestamp(Utc.ymd(2021, 4, 2).and_hms(10, 15, 0)));
        let todo = todo_with(Property::new("DUE", "20210402T101500").with_param("TZID", "Middle/Earth"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Timestamp(Utc.ymd(2021, 4, 2).and_hms(10, 15, 0)));

        let todo = todo_with(Property::new("DUE", "20210402").with_param("VALUE", "DATE"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Date(NaiveDate::from_ymd(2021, 4, 2)));

        let todo = todo_with(Property::new("DUE", "99991231T000000Z"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::NoDate);

        let todo = todo_with(Property::new("DUE", "20210402").with_param("VALUE", "DATE").with_param(FUZZY_PARAM, "someday"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::Fuzzy(FuzzyTerm::Someday));

        let todo = todo_with(Property::new("DUE", "garbage"));
        assert_eq!(read_remote(&todo, "DUE", DateSlot::Due), TaskDate::NoDate);
    }

    #[test]
    fn test_fuzzy_round_trip() {
        let cal = "https://example.com/cal/".parse().unwrap();
        for term in &[FuzzyTerm::Now, FuzzyTerm::Soon, FuzzyTerm::NextWeek, FuzzyTerm::Someday] {
            for slot in &[DateSlot::Due, DateSlot::Start, DateSlot::Closed] {
                let mut todo = Todo::new("abc", &cal);
                write_remote(&mut todo, "X-DATE", *slot, &TaskDate::Fuzzy(*term));
                write_remote(&mut todo, "X-DATE", *slot, &TaskDate::Fuzzy(*term));
                assert_eq!(todo.props().get_all("X-DATE").count(), 1);
                assert_eq!(read_remote(&todo, "X-DATE", *slot), TaskDate::Fuzzy(*term));
            }
        }
    }

    #[test]
    fn test_unchanged_dates_keep_their_form() {
        let zoned = Property::new("DUE", "20210402T101500").with_param("TZID", "Europe/Paris");
        let floating = Property::new("DTSTART", "20210402T101500");

        let mut todo = todo_with(zoned.clone());
        todo.props_mut().push(floating.clone());
        let due = read_remote(&todo, "DUE", DateSlot::Due);
        let start = read_remote(&todo, "DTSTART", DateSlot::Start);
        write_remote(&mut todo, "DUE", DateSlot::Due, &due);
        write_remote(&mut todo, "DTSTART", DateSlot::Start, &start);
        assert_eq!(todo.props().get("DUE"), Some(&zoned));
        assert_eq!(todo.props().get("DTSTART"), Some(&floating));

        // A new time stays in the zone of the former one
        write_remote(&mut todo, "DUE", DateSlot::Due, &TaskDate::Timestamp(Utc.ymd(2021, 4, 3).and_hms(16, 0, 0)));
        let due = todo.props().get("DUE").unwrap();
        assert_eq!(due.value(), "20210403T180000");
        assert_eq!(due.param("TZID"), Some("Europe/Paris"));
        assert_eq!(todo.props().get_all("DUE").count(), 1);
    }
}

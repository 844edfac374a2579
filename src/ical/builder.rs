//! A module to build ICal files

use chrono::{DateTime, Utc};
use ics::components::{Parameter, Property as IcsProperty};
use ics::{ICalendar, ToDo};

use crate::todo::Todo;

/// Create an iCal item from a [`Todo`]
pub fn build_from(todo: &Todo) -> String {
    let dtstamp = todo.props().get("DTSTAMP")
        .map(|p| p.value().to_string())
        .unwrap_or_else(|| format_date_time(&Utc::now()));

    let mut ics_todo = ToDo::new(todo.uid().to_string(), dtstamp);
    for prop in todo.props().iter() {
        if prop.name() == "UID" || prop.name() == "DTSTAMP" {
            continue;
        }
        let mut ics_prop = IcsProperty::new(prop.name().to_string(), prop.value().to_string());
        for (key, values) in prop.params() {
            ics_prop.add(Parameter::new(key.clone(), values.join(",")));
        }
        ics_todo.push(ics_prop);
    }

    let mut calendar = ICalendar::new("2.0", crate::config::prod_id());
    calendar.add_todo(ics_todo);

    calendar.to_string()
}

/// Format a timestamp the way iCal expects UTC date-times
pub fn format_date_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ORG_NAME, PRODUCT_NAME};
    use crate::todo::Property;

    #[test]
    fn test_ical_from_todo() {
        let cal_id = "http://my.calend.ar/id/".parse().unwrap();
        let mut todo = Todo::new("some-uid", &cal_id);
        todo.props_mut().set(Property::new("DTSTAMP", "20210321T001600Z"));
        todo.props_mut().set_text("SUMMARY", "This is a task with ÜTF-8 characters");
        todo.props_mut().set(Property::new("DUE", "20210402").with_param("VALUE", "DATE"));

        let expected_ical = format!("BEGIN:VCALENDAR\r\n\
            VERSION:2.0\r\n\
            PRODID:-//{}//{}//EN\r\n\
            BEGIN:VTODO\r\n\
            UID:some-uid\r\n\
            DTSTAMP:20210321T001600Z\r\n\
            SUMMARY:This is a task with ÜTF-8 characters\r\n\
            DUE;VALUE=DATE:20210402\r\n\
            END:VTODO\r\n\
            END:VCALENDAR\r\n", ORG_NAME.lock().unwrap(), PRODUCT_NAME.lock().unwrap());

        assert_eq!(build_from(&todo), expected_ical);
    }

    #[test]
    fn test_build_then_parse() {
        let cal_id: url::Url = "http://my.calend.ar/id/".parse().unwrap();
        let mut todo = Todo::new("round", &cal_id);
        todo.props_mut().set_text("DESCRIPTION", "two\nlines, with a comma");
        todo.set_sequence(7);

        let text = build_from(&todo);
        let parsed = crate::ical::parse(&text, todo.href().clone(), None, &cal_id).unwrap();
        assert_eq!(parsed.props().get_text("DESCRIPTION").as_deref(), Some("two\nlines, with a comma"));
        assert_eq!(parsed.sequence(), 7);
    }
}

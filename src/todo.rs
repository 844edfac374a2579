//! Remote task resources (iCal `VTODO` items), seen as property bags

use serde::{Deserialize, Serialize};
use url::Url;

use crate::calendar::CalendarId;

/// A `RELATED-TO` link type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelType {
    Parent,
    Child,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Parent => "PARENT",
            RelType::Child => "CHILD",
        }
    }

    /// Parse a RELTYPE parameter. A missing parameter means `PARENT` (RFC 5545)
    pub fn from_param(param: Option<&str>) -> Option<Self> {
        match param.map(|p| p.to_uppercase()) {
            None => Some(RelType::Parent),
            Some(p) if p == "PARENT" => Some(RelType::Parent),
            Some(p) if p == "CHILD" => Some(RelType::Child),
            Some(_) => None,
        }
    }
}


/// A single content line of a calendar component, e.g. `DUE;VALUE=DATE:20210402`.
///
/// Values are kept in their iCal-escaped form. Use [`PropertyBag::get_text`] and
/// [`PropertyBag::set_text`] for TEXT values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    name: String,
    params: Vec<(String, Vec<String>)>,
    value: String,
}

impl Property {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self { name: name.into().to_uppercase(), params: Vec::new(), value: value.into() }
    }

    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn value(&self) -> &str { &self.value }
    pub fn params(&self) -> &[(String, Vec<String>)] { &self.params }

    /// The (first) value of a parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, values)| values.first())
            .map(|v| v.as_str())
    }

    /// Replace every value of a parameter
    pub fn set_param<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into().to_uppercase();
        self.params.retain(|(k, _)| k.eq_ignore_ascii_case(&key) == false);
        self.params.push((key, vec![value.into()]));
    }

    pub fn set_params(&mut self, params: Vec<(String, Vec<String>)>) {
        self.params = params;
    }
}


/// The ordered properties of a `VTODO`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyBag {
    props: Vec<Property>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.props.iter()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// The first property with this name
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.props.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Every property with this name, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.props.iter().filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn remove_all(&mut self, name: &str) {
        self.props.retain(|p| p.name.eq_ignore_ascii_case(name) == false);
    }

    /// Remove the properties with this name that match a predicate
    pub fn remove_where<F: Fn(&Property) -> bool>(&mut self, name: &str, predicate: F) {
        self.props.retain(|p| p.name.eq_ignore_ascii_case(name) == false || predicate(p) == false);
    }

    pub fn push(&mut self, prop: Property) {
        self.props.push(prop);
    }

    /// Replace every property with this name by a single one
    pub fn set(&mut self, prop: Property) {
        self.remove_all(&prop.name.clone());
        self.props.push(prop);
    }

    /// The unescaped value of a TEXT property
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).map(|p| crate::ical::unescape_text(p.value()))
    }

    /// Replace a TEXT property, escaping its value
    pub fn set_text(&mut self, name: &str, text: &str) {
        self.set(Property::new(name, crate::ical::escape_text(text)));
    }
}


/// A VersionTag is basically a CalDAV `ctag` or `etag`. Whenever it changes, this means the data has changed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTag {
    tag: String
}

impl From<String> for VersionTag {
    fn from(tag: String) -> VersionTag {
        Self { tag }
    }
}

impl VersionTag {
    /// Get the inner version tag (usually a WebDAV `ctag` or `etag`)
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// Generate a random VersionTag
    pub fn random() -> Self {
        let random = uuid::Uuid::new_v4().to_hyphenated().to_string();
        Self { tag: random }
    }
}


/// A task, as stored on a CalDAV server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    uid: String,
    calendar: CalendarId,
    href: Url,
    version_tag: Option<VersionTag>,
    props: PropertyBag,
    /// The calendar data this item was parsed from, if it has been fetched from a server
    raw: Option<String>,
}

impl Todo {
    /// Create a brand new resource, that is not on a server yet.
    /// Its URL is derived from its UID.
    pub fn new(uid: &str, calendar: &CalendarId) -> Self {
        let href = Self::href_for(uid, calendar);
        let mut props = PropertyBag::new();
        props.set(Property::new("UID", uid));
        Self {
            uid: uid.to_string(),
            calendar: calendar.clone(),
            href,
            version_tag: None,
            props,
            raw: None,
        }
    }

    /// Create a resource instance for data that exists on a server
    pub fn from_server(uid: String, calendar: CalendarId, href: Url, version_tag: Option<VersionTag>, props: PropertyBag, raw: Option<String>) -> Self {
        Self { uid, calendar, href, version_tag, props, raw }
    }

    /// The URL a resource with this UID is created at
    pub fn href_for(uid: &str, calendar: &CalendarId) -> Url {
        let file_name = format!("{}.ics", sanitize_filename::sanitize(uid));
        let mut base = calendar.clone();
        if base.path().ends_with('/') == false {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        match base.join(&file_name) {
            Ok(url) => url,
            Err(err) => {
                log::warn!("Unable to build a URL for {} in {}: {}", uid, calendar, err);
                base
            },
        }
    }

    pub fn uid(&self) -> &str                       { &self.uid }
    pub fn calendar(&self) -> &CalendarId           { &self.calendar }
    pub fn href(&self) -> &Url                      { &self.href }
    pub fn version_tag(&self) -> Option<&VersionTag> { self.version_tag.as_ref() }
    pub fn props(&self) -> &PropertyBag             { &self.props }
    pub fn props_mut(&mut self) -> &mut PropertyBag { &mut self.props }
    pub fn raw(&self) -> Option<&str>               { self.raw.as_deref() }

    pub fn set_version_tag(&mut self, version_tag: Option<VersionTag>) {
        self.version_tag = version_tag;
    }

    pub fn set_href(&mut self, href: Url) {
        self.href = href;
    }

    /// Move this (not yet created) resource to another calendar. Its URL is derived again from its UID
    pub fn set_calendar(&mut self, calendar: &CalendarId) {
        self.calendar = calendar.clone();
        self.href = Self::href_for(&self.uid, calendar);
        self.version_tag = None;
    }

    /// The display name of the task
    pub fn summary(&self) -> String {
        self.props.get_text("SUMMARY").unwrap_or_default()
    }

    /// The revision counter of this resource. Unparsable values count as 0
    pub fn sequence(&self) -> i64 {
        self.props.get("SEQUENCE")
            .and_then(|p| p.value().trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn set_sequence(&mut self, sequence: i64) {
        self.props.set(Property::new("SEQUENCE", sequence.to_string()));
    }

    /// The UIDs linked with a given RELTYPE, in order
    pub fn related(&self, reltype: RelType) -> Vec<String> {
        self.props.get_all("RELATED-TO")
            .filter(|p| RelType::from_param(p.param("RELTYPE")) == Some(reltype))
            .map(|p| p.value().trim().to_string())
            .filter(|uid| uid.is_empty() == false)
            .collect()
    }

    /// Replace every link of a given RELTYPE (links of other types are kept)
    pub fn set_related(&mut self, reltype: RelType, uids: &[String]) {
        self.props.remove_where("RELATED-TO", |p| RelType::from_param(p.param("RELTYPE")) == Some(reltype));
        for uid in uids {
            self.props.push(Property::new("RELATED-TO", uid.as_str()).with_param("RELTYPE", reltype.as_str()));
        }
    }

    /// The parent of this task. A PARENT link names a single UID
    pub fn parent_uid(&self) -> Option<String> {
        self.related(RelType::Parent).into_iter().next()
    }

    /// The `STATUS` of this task, as sent by the server
    pub fn status_label(&self) -> Option<String> {
        self.props.get("STATUS").map(|p| p.value().trim().to_uppercase())
    }

    /// Whether this task is either completed or cancelled.
    ///
    /// This also looks at the raw payload, because some servers do not filter negated conditions properly
    pub fn is_closed(&self) -> bool {
        let by_status = matches!(self.status_label().as_deref(), Some("COMPLETED") | Some("CANCELLED"));
        let by_payload = self.raw.as_deref()
            .map(|raw| raw.lines().any(|l| {
                let l = l.trim().to_uppercase();
                l == "STATUS:COMPLETED" || l == "STATUS:CANCELLED"
            }))
            .unwrap_or(false);
        by_status || by_payload
    }

    /// The position hint some clients give to sort sibling tasks
    pub fn sort_order(&self) -> Option<i64> {
        self.props.get("X-APPLE-SORT-ORDER")
            .and_then(|p| p.value().trim().parse().ok())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> CalendarId {
        "https://example.com/dav/cal/work/".parse().unwrap()
    }

    #[test]
    fn test_href_from_uid() {
        let todo = Todo::new("some/uid", &cal());
        assert_eq!(todo.href().as_str(), "https://example.com/dav/cal/work/someuid.ics");

        let no_slash: CalendarId = "https://example.com/dav/cal/home".parse().unwrap();
        let todo = Todo::new("abc", &no_slash);
        assert_eq!(todo.href().as_str(), "https://example.com/dav/cal/home/abc.ics");
    }

    #[test]
    fn test_sequence() {
        let mut todo = Todo::new("abc", &cal());
        assert_eq!(todo.sequence(), 0);
        todo.set_sequence(5);
        assert_eq!(todo.sequence(), 5);
        todo.props_mut().set(Property::new("SEQUENCE", "garbage"));
        assert_eq!(todo.sequence(), 0);
    }

    #[test]
    fn test_related_links() {
        let mut todo = Todo::new("child", &cal());
        todo.props_mut().push(Property::new("RELATED-TO", "implicit-parent"));
        todo.props_mut().push(Property::new("RELATED-TO", "sibling").with_param("RELTYPE", "SIBLING"));
        assert_eq!(todo.parent_uid(), Some("implicit-parent".to_string()));

        todo.set_related(RelType::Child, &["c1".to_string(), "c2".to_string()]);
        todo.set_related(RelType::Child, &["c2".to_string()]);
        assert_eq!(todo.related(RelType::Child), vec!["c2".to_string()]);

        todo.set_related(RelType::Parent, &["other".to_string()]);
        assert_eq!(todo.related(RelType::Parent), vec!["other".to_string()]);
        // Unknown reltypes are left untouched
        assert_eq!(todo.props().get_all("RELATED-TO").count(), 3);
    }

    #[test]
    fn test_closed_from_payload() {
        let mut props = PropertyBag::new();
        props.set(Property::new("STATUS", "NEEDS-ACTION"));
        let raw = "BEGIN:VTODO\r\nSTATUS:CANCELLED\r\nEND:VTODO\r\n".to_string();
        let todo = Todo::from_server("x".to_string(), cal(), cal(), None, props, Some(raw));
        assert!(todo.is_closed());
    }
}

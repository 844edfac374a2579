//! Translation of single attributes between local tasks and remote resources
//!
//! Every [`Field`] knows how to read and write one logical attribute on both sides, and
//! whether both sides agree. A [`FieldSet`] applies all of them at once.

use chrono::{DateTime, Utc};

use crate::date::TaskDate;
use crate::task::Task;
use crate::todo::{RelType, Todo};
use crate::traits::TaskStore;

mod bookkeeping;
mod categories;
mod dates;
mod related;
mod status;
mod text;

pub use categories::{all_categories, calendar_from_tags, category_to_tag, set_calendar_membership, split_categories, tag_to_category};
pub use dates::FUZZY_PARAM;
pub use status::{derived_label, label_for_status, percent_complete, status_for_label, STATUS_MAPPING};
pub use text::{content_hash, extract_description, HASH_PARAM};

/// Remote properties whose divergence alone never justifies a remote write
pub const SYNC_IGNORABLE: [&str; 4] = ["LAST-MODIFIED", "SEQUENCE", "PERCENT-COMPLETE", "COMPLETED"];

/// What the fields need to know besides the task and the resource
#[derive(Clone, Copy)]
pub struct FieldContext<'a> {
    /// Namespace of the attributes on local tasks
    pub namespace: &'a str,
    /// Categories with this prefix designate a calendar, not a tag
    pub calendar_tag_prefix: &'a str,
    /// Used to look at the other tasks (subtasks, referenced tasks)
    pub store: &'a dyn TaskStore,
}

/// Which date of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DateSlot {
    Due,
    Start,
    Closed,
}

/// The value of a field, read from either side
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Description { text: String, hash: Option<String> },
    Date(TaskDate),
    /// A remote STATUS label
    Status(String),
    Integer(i64),
    List(Vec<String>),
    Timestamp(Option<DateTime<Utc>>),
}

/// A logical attribute that is synced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Summary,
    Description,
    Date(DateSlot),
    Status,
    PercentComplete,
    Categories,
    RelatedTo(RelType),
    Sequence,
    LastModified,
}

impl Field {
    /// The remote property this field is stored in
    pub fn key(&self) -> &'static str {
        match self {
            Field::Summary => "SUMMARY",
            Field::Description => "DESCRIPTION",
            Field::Date(DateSlot::Due) => "DUE",
            Field::Date(DateSlot::Start) => "DTSTART",
            Field::Date(DateSlot::Closed) => "COMPLETED",
            Field::Status => "STATUS",
            Field::PercentComplete => "PERCENT-COMPLETE",
            Field::Categories => "CATEGORIES",
            Field::RelatedTo(_) => "RELATED-TO",
            Field::Sequence => "SEQUENCE",
            Field::LastModified => "LAST-MODIFIED",
        }
    }

    /// Whether a divergence of this field alone should not trigger a remote write
    pub fn is_sync_ignorable(&self) -> bool {
        SYNC_IGNORABLE.contains(&self.key())
    }

    pub fn read_local(&self, task: &Task, ctx: &FieldContext) -> FieldValue {
        match self {
            Field::Summary => FieldValue::Text(task.title().to_string()),
            Field::Description => text::read_local_description(task, ctx),
            Field::Date(slot) => FieldValue::Date(dates::read_local(task, *slot)),
            Field::Status => FieldValue::Status(status::derived_label(task, ctx.store).to_string()),
            Field::PercentComplete => FieldValue::Integer(status::percent_complete(task, ctx.store)),
            Field::Categories => FieldValue::List(categories::read_local(task, ctx)),
            Field::RelatedTo(reltype) => FieldValue::List(related::read_local(task, *reltype)),
            Field::Sequence => FieldValue::Integer(task.sequence(ctx.namespace)),
            Field::LastModified => FieldValue::Timestamp(Some(*task.modified())),
        }
    }

    pub fn read_remote(&self, todo: &Todo, ctx: &FieldContext) -> FieldValue {
        match self {
            Field::Summary => FieldValue::Text(todo.summary()),
            Field::Description => text::read_remote_description(todo),
            Field::Date(slot) => FieldValue::Date(dates::read_remote(todo, self.key(), *slot)),
            Field::Status => FieldValue::Status(status::read_remote(todo)),
            Field::PercentComplete => FieldValue::Integer(status::read_remote_percent(todo)),
            Field::Categories => FieldValue::List(categories::read_remote(todo, ctx)),
            Field::RelatedTo(reltype) => FieldValue::List(related::read_remote(todo, *reltype)),
            Field::Sequence => FieldValue::Integer(todo.sequence()),
            Field::LastModified => FieldValue::Timestamp(bookkeeping::read_remote_last_modified(todo)),
        }
    }

    /// Whether a remote value means "absent", and must not overwrite the local value
    pub fn is_ignored(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Field::Summary, FieldValue::Text(title)) => title.trim().is_empty(),
            (Field::Date(_), FieldValue::Date(date)) => date.is_none(),
            _ => false,
        }
    }

    /// Write a value to a resource. Any previous value of this property is removed first
    pub fn write_remote(&self, todo: &mut Todo, value: &FieldValue, ctx: &FieldContext) {
        match (self, value) {
            (Field::Summary, FieldValue::Text(title)) => todo.props_mut().set_text("SUMMARY", title),
            (Field::Description, FieldValue::Description{ text: body, hash }) => text::write_remote_description(todo, body, hash.as_deref()),
            (Field::Date(slot), FieldValue::Date(date)) => dates::write_remote(todo, self.key(), *slot, date),
            (Field::Status, FieldValue::Status(label)) => todo.props_mut().set(crate::todo::Property::new("STATUS", label.as_str())),
            (Field::PercentComplete, FieldValue::Integer(percent)) => todo.props_mut().set(crate::todo::Property::new("PERCENT-COMPLETE", percent.to_string())),
            (Field::Categories, FieldValue::List(tags)) => categories::write_remote(todo, tags, ctx.calendar_tag_prefix),
            (Field::RelatedTo(reltype), FieldValue::List(uids)) => related::write_remote(todo, *reltype, uids),
            (Field::Sequence, FieldValue::Integer(sequence)) => todo.set_sequence(*sequence),
            (Field::LastModified, FieldValue::Timestamp(ts)) => bookkeeping::write_remote_last_modified(todo, ts.as_ref()),
            (field, value) => log::error!("Cannot write {:?} to field {:?}", value, field),
        }
    }

    /// Write a value read from a resource to a local task. Ignored values are skipped
    pub fn write_local(&self, task: &mut Task, value: &FieldValue, ctx: &FieldContext) {
        if self.is_ignored(value) {
            log::trace!("Not applying the empty {} of {} locally", self.key(), task.uid());
            return;
        }
        match (self, value) {
            (Field::Summary, FieldValue::Text(title)) => {
                if task.title() != title {
                    task.set_title(title);
                }
            },
            (Field::Description, FieldValue::Description{ text, .. }) => {
                if task.text() != text {
                    task.set_text(text);
                }
            },
            (Field::Date(slot), FieldValue::Date(date)) => dates::write_local(task, *slot, date),
            (Field::Status, FieldValue::Status(label)) => {
                let new_status = status::status_for_label(label);
                if task.status() != new_status {
                    task.set_status(new_status);
                }
            },
            // Derived from the subtasks, there is nothing to store
            (Field::PercentComplete, FieldValue::Integer(_)) => (),
            (Field::Categories, FieldValue::List(tags)) => categories::write_local(task, tags, ctx),
            (Field::RelatedTo(reltype), FieldValue::List(uids)) => related::write_local(task, *reltype, uids),
            (Field::Sequence, FieldValue::Integer(sequence)) => task.set_sequence(ctx.namespace, *sequence),
            // Maintained by the local store
            (Field::LastModified, FieldValue::Timestamp(_)) => (),
            (field, value) => log::error!("Cannot write {:?} to field {:?}", value, field),
        }
    }

    /// Whether the task and the resource agree on this field
    pub fn equal(&self, task: &Task, todo: &Todo, ctx: &FieldContext) -> bool {
        let local = self.read_local(task, ctx);
        let remote = self.read_remote(todo, ctx);
        match (local, remote) {
            (FieldValue::Text(l), FieldValue::Text(r)) => l.trim() == r.trim(),
            // The hashes decide when both sides have one
            (FieldValue::Description{ text: lt, hash: lh }, FieldValue::Description{ text: rt, hash: rh }) => match (lh, rh) {
                (Some(lh), Some(rh)) => lh == rh,
                _ => lt.trim() == rt.trim(),
            },
            (FieldValue::Date(l), FieldValue::Date(r)) => l.normalized() == r.normalized(),
            (FieldValue::List(mut l), FieldValue::List(mut r)) => {
                if let Field::Categories = self {
                    l.sort();
                    r.sort();
                }
                l == r
            },
            (FieldValue::Timestamp(l), FieldValue::Timestamp(r)) => {
                bookkeeping::truncate(l) == bookkeeping::truncate(r)
            },
            (l, r) => l == r,
        }
    }
}


/// The fields of a sync namespace
#[derive(Clone, Debug)]
pub struct FieldSet {
    fields: Vec<Field>,
}

impl Default for FieldSet {
    fn default() -> Self {
        Self::new(vec![
            Field::Summary,
            Field::Description,
            Field::Date(DateSlot::Due),
            Field::Date(DateSlot::Start),
            Field::Date(DateSlot::Closed),
            Field::Status,
            Field::PercentComplete,
            Field::Categories,
            Field::RelatedTo(RelType::Parent),
            Field::RelatedTo(RelType::Child),
            Field::Sequence,
            Field::LastModified,
        ])
    }
}

impl FieldSet {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The fields the task and the resource disagree on, sync-ignorable ones included
    pub fn divergent_fields(&self, task: &Task, todo: &Todo, ctx: &FieldContext) -> Vec<Field> {
        self.fields.iter()
            .filter(|field| field.equal(task, todo, ctx) == false)
            .copied()
            .collect()
    }

    /// Whether the resource must be written to match the task
    pub fn should_sync(&self, task: &Task, todo: &Todo, ctx: &FieldContext) -> bool {
        let divergent: Vec<Field> = self.divergent_fields(task, todo, ctx).into_iter()
            .filter(|field| field.is_sync_ignorable() == false)
            .collect();
        if divergent.is_empty() == false {
            log::debug!("{} differs from its remote version on {:?}", task.uid(), divergent);
        }
        divergent.is_empty() == false
    }

    /// Write every field of a task to a resource
    pub fn write_remote_all(&self, task: &Task, todo: &mut Todo, ctx: &FieldContext) {
        for field in &self.fields {
            let value = field.read_local(task, ctx);
            field.write_remote(todo, &value, ctx);
        }
    }

    /// Write every field of a resource to a task
    pub fn write_local_all(&self, todo: &Todo, task: &mut Task, ctx: &FieldContext) {
        for field in &self.fields {
            let value = field.read_remote(todo, ctx);
            field.write_local(task, &value, ctx);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarId;
    use crate::date::FuzzyTerm;
    use crate::store::MemoryStore;
    use crate::task::TaskStatus;
    use crate::todo::Property;

    fn cal() -> CalendarId {
        "https://example.com/dav/cal/work/".parse().unwrap()
    }

    fn ctx(store: &MemoryStore) -> FieldContext {
        FieldContext { namespace: "caldav", calendar_tag_prefix: "DAV_", store }
    }

    #[test]
    fn test_round_trip_is_stable() {
        let store = MemoryStore::new();
        let fields = FieldSet::default();

        let mut task = Task::new("abc");
        task.set_title("Repaint the kitchen");
        task.set_text("Buy paint first");
        task.set_due(TaskDate::Fuzzy(FuzzyTerm::NextWeek));
        task.add_tag("Home Renovation");
        task.add_tag("DAV_Work");
        task.set_sequence("caldav", 2);

        let mut todo = Todo::new("abc", &cal());
        fields.write_remote_all(&task, &mut todo, &ctx(&store));
        assert_eq!(fields.should_sync(&task, &todo, &ctx(&store)), false);
        assert_eq!(todo.props().get("CATEGORIES").unwrap().value(), "Home_Renovation");
        assert_eq!(todo.props().get("DUE").unwrap().param(FUZZY_PARAM), Some("next_week"));

        let mut imported = Task::new("abc");
        fields.write_local_all(&todo, &mut imported, &ctx(&store));
        assert_eq!(imported.title(), "Repaint the kitchen");
        assert_eq!(imported.due(), &TaskDate::Fuzzy(FuzzyTerm::NextWeek));
        assert_eq!(imported.tags(), &["Home Renovation".to_string()]);
        assert_eq!(imported.sequence("caldav"), 2);
    }

    #[test]
    fn test_ignorable_divergences() {
        let store = MemoryStore::new();
        let fields = FieldSet::default();

        let mut task = Task::new("abc");
        task.set_title("Something");
        let mut todo = Todo::new("abc", &cal());
        fields.write_remote_all(&task, &mut todo, &ctx(&store));

        todo.set_sequence(12);
        todo.props_mut().set(Property::new("PERCENT-COMPLETE", "40"));
        todo.props_mut().set(Property::new("LAST-MODIFIED", "19990101T000000Z"));
        todo.props_mut().set(Property::new("COMPLETED", "20200101T000000Z"));
        assert_eq!(fields.should_sync(&task, &todo, &ctx(&store)), false);
        assert_eq!(fields.divergent_fields(&task, &todo, &ctx(&store)).len(), 4);

        todo.props_mut().set_text("SUMMARY", "Something else");
        assert!(fields.should_sync(&task, &todo, &ctx(&store)));
    }

    #[test]
    fn test_ignored_sentinels() {
        let store = MemoryStore::new();
        let mut task = Task::new("abc");
        task.set_title("Keep me");
        task.set_due(TaskDate::Date(chrono::NaiveDate::from_ymd(2021, 4, 2)));
        let todo = Todo::new("abc", &cal());

        FieldSet::default().write_local_all(&todo, &mut task, &ctx(&store));
        assert_eq!(task.title(), "Keep me");
        assert!(task.due().is_none() == false);
        assert_eq!(task.status(), TaskStatus::Active);
    }

    #[test]
    fn test_description_hash_wins_over_text() {
        let store = MemoryStore::new();
        let mut task = Task::new("abc");
        task.set_text("Buy milk");
        let mut todo = Todo::new("abc", &cal());
        todo.props_mut().set(Property::new("DESCRIPTION", "Buy milk").with_param(HASH_PARAM, "stale"));
        assert_eq!(Field::Description.equal(&task, &todo, &ctx(&store)), false);

        let hash = content_hash("Buy milk");
        todo.props_mut().set(Property::new("DESCRIPTION", "Buy milk ").with_param(HASH_PARAM, hash.as_str()));
        assert!(Field::Description.equal(&task, &todo, &ctx(&store)));

        // Without a remote hash only the text is compared
        todo.props_mut().set(Property::new("DESCRIPTION", "Buy milk  "));
        assert!(Field::Description.equal(&task, &todo, &ctx(&store)));
    }
}

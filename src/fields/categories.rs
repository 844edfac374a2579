use super::FieldContext;
use crate::task::Task;
use crate::todo::{Property, Todo};

/// `Home Renovation` is published as `Home_Renovation`
pub fn tag_to_category(tag: &str) -> String {
    tag.replace(' ', "_")
}

pub fn category_to_tag(category: &str) -> String {
    category.replace('_', " ")
}

/// Split a `CATEGORIES` value on its unescaped commas, and unescape every category
pub fn split_categories(value: &str) -> Vec<String> {
    let mut categories = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ',' {
            categories.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    categories.push(current);

    categories.iter()
        .map(|c| crate::ical::unescape_text(c.trim()))
        .filter(|c| c.is_empty() == false)
        .collect()
}

/// Every category of a resource, calendar membership included
pub fn all_categories(todo: &Todo) -> Vec<String> {
    todo.props().get_all("CATEGORIES")
        .flat_map(|p| split_categories(p.value()))
        .collect()
}

pub(super) fn read_local(task: &Task, ctx: &FieldContext) -> Vec<String> {
    task.tags().iter()
        .filter(|t| t.starts_with(ctx.calendar_tag_prefix) == false)
        .cloned()
        .collect()
}

pub(super) fn read_remote(todo: &Todo, ctx: &FieldContext) -> Vec<String> {
    all_categories(todo).iter()
        .filter(|c| c.starts_with(ctx.calendar_tag_prefix) == false)
        .map(|c| category_to_tag(c))
        .collect()
}

/// Replace the user categories. Calendar categories are written back as they were
pub(super) fn write_remote(todo: &mut Todo, tags: &[String], prefix: &str) {
    let kept: Vec<String> = all_categories(todo).into_iter()
        .filter(|c| c.starts_with(prefix))
        .collect();
    todo.props_mut().remove_all("CATEGORIES");

    if tags.is_empty() == false {
        let value = tags.iter()
            .map(|t| crate::ical::escape_text(&tag_to_category(t)))
            .collect::<Vec<_>>()
            .join(",");
        todo.props_mut().push(Property::new("CATEGORIES", value));
    }
    for category in kept {
        todo.props_mut().push(Property::new("CATEGORIES", crate::ical::escape_text(&category)));
    }
}

pub(super) fn write_local(task: &mut Task, tags: &[String], ctx: &FieldContext) {
    let obsolete: Vec<String> = read_local(task, ctx).into_iter()
        .filter(|t| tags.contains(t) == false)
        .collect();
    for tag in obsolete {
        task.remove_tag(&tag);
    }
    for tag in tags {
        task.add_tag(tag);
    }
}

/// Make a resource carry the category of the calendar it belongs to (and no other calendar category)
pub fn set_calendar_membership(todo: &mut Todo, prefix: &str, calendar_name: &str) {
    let membership = format!("{}{}", prefix, calendar_name);
    let others: Vec<Property> = todo.props().get_all("CATEGORIES")
        .filter_map(|p| {
            let remaining: Vec<String> = split_categories(p.value()).into_iter()
                .filter(|c| c.starts_with(prefix) == false)
                .collect();
            if remaining.is_empty() {
                return None;
            }
            let value = remaining.iter().map(|c| crate::ical::escape_text(c)).collect::<Vec<_>>().join(",");
            Some(Property::new("CATEGORIES", value))
        })
        .collect();

    todo.props_mut().remove_all("CATEGORIES");
    for prop in others {
        todo.props_mut().push(prop);
    }
    todo.props_mut().push(Property::new("CATEGORIES", crate::ical::escape_text(&membership)));
}

/// The calendar a set of tags designates, if any
pub fn calendar_from_tags<'a>(tags: &'a [String], prefix: &str) -> Option<&'a str> {
    tags.iter()
        .find_map(|t| t.strip_prefix(prefix))
        .filter(|name| name.is_empty() == false)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_split() {
        assert_eq!(split_categories("a,b\\,c, d "), vec!["a".to_string(), "b,c".to_string(), "d".to_string()]);
        assert_eq!(split_categories(""), Vec::<String>::new());
    }

    #[test]
    fn test_categories_round_trip() {
        let store = MemoryStore::new();
        let ctx = FieldContext { namespace: "caldav", calendar_tag_prefix: "DAV_", store: &store };
        assert_eq!(tag_to_category("Home Renovation"), "Home_Renovation");
        assert_eq!(category_to_tag("Home_Renovation"), "Home Renovation");

        let cal = "https://example.com/cal/".parse().unwrap();
        let mut todo = Todo::new("abc", &cal);
        todo.props_mut().push(Property::new("CATEGORIES", "Home_Renovation,DAV_Work"));
        assert_eq!(read_remote(&todo, &ctx), vec!["Home Renovation".to_string()]);

        let mut task = Task::new("abc");
        task.add_tag("DAV_Personal");
        task.add_tag("obsolete");
        write_local(&mut task, &read_remote(&todo, &ctx), &ctx);
        assert_eq!(task.tags(), &["DAV_Personal".to_string(), "Home Renovation".to_string()]);
        assert_eq!(read_local(&task, &ctx), vec!["Home Renovation".to_string()]);

        set_calendar_membership(&mut todo, "DAV_", "Personal");
        assert_eq!(all_categories(&todo), vec!["Home_Renovation".to_string(), "DAV_Personal".to_string()]);
        assert_eq!(calendar_from_tags(task.tags(), "DAV_"), Some("Personal"));
    }
}

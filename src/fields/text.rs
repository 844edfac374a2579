//! Task descriptions

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::{FieldContext, FieldValue};
use crate::task::{Task, TaskStatus};
use crate::todo::{Property, Todo};

/// The parameter of `DESCRIPTION` that stores the hash of its content
pub const HASH_PARAM: &str = "X-CONTENT-HASH";

static SUBTASK_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{!\s*([^\s!]+)\s*!\}").expect("invalid subtask regex"));
static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?(?:content|tag|subtask)\b[^>]*>").expect("invalid markup regex"));

/// The SHA-256 of a text, as lowercase hex
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn is_tag_line(line: &str) -> bool {
    let mut words = line.split_whitespace().peekable();
    words.peek().is_some() && words.all(|w| w.starts_with('@') && w.len() > 1)
}

/// The text a task body is published as.
///
/// * a first line that only contains `@tags` is dropped,
/// * subtask references (`{! uid !}`) are rendered as `[x] title` or `[ ] title`,
/// * markup is removed.
pub fn extract_description(task: &Task, ctx: &FieldContext) -> String {
    let text = task.text();
    let mut lines = text.lines().peekable();
    if lines.peek().map(|first| is_tag_line(first)) == Some(true) {
        lines.next();
    }
    let body = lines.collect::<Vec<_>>().join("\n");

    let body = SUBTASK_REF.replace_all(&body, |caps: &regex::Captures| {
        match ctx.store.get_task(&caps[1]) {
            None => {
                log::debug!("Dropping the reference to unknown subtask {} from {}", &caps[1], task.uid());
                String::new()
            },
            Some(subtask) => {
                let mark = if subtask.status() == TaskStatus::Done { "x" } else { " " };
                format!("[{}] {}", mark, subtask.title())
            },
        }
    });
    let body = MARKUP.replace_all(&body, "");

    body.trim().to_string()
}

pub(super) fn read_local_description(task: &Task, ctx: &FieldContext) -> FieldValue {
    let text = extract_description(task, ctx);
    let hash = content_hash(&text);
    FieldValue::Description { text, hash: Some(hash) }
}

pub(super) fn read_remote_description(todo: &Todo) -> FieldValue {
    let prop = todo.props().get("DESCRIPTION");
    FieldValue::Description {
        text: todo.props().get_text("DESCRIPTION").unwrap_or_default(),
        hash: prop.and_then(|p| p.param(HASH_PARAM)).map(|h| h.to_string()),
    }
}

pub(super) fn write_remote_description(todo: &mut Todo, text: &str, hash: Option<&str>) {
    let remote_hash = todo.props().get("DESCRIPTION").and_then(|p| p.param(HASH_PARAM));
    if hash.is_some() && remote_hash == hash {
        log::trace!("Description of {} is already up to date", todo.uid());
        return;
    }

    if text.is_empty() {
        todo.props_mut().remove_all("DESCRIPTION");
        return;
    }
    let hash = hash.map(|h| h.to_string()).unwrap_or_else(|| content_hash(text));
    todo.props_mut().set(
        Property::new("DESCRIPTION", crate::ical::escape_text(text)).with_param(HASH_PARAM, hash)
    );
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::traits::TaskStore;

    #[test]
    fn test_extraction() {
        let mut store = MemoryStore::new();
        let mut done = Task::new("sub-1");
        done.set_title("Buy paint");
        done.set_status(TaskStatus::Done);
        let mut open = Task::new("sub-2");
        open.set_title("Paint");
        store.push_task(done).unwrap();
        store.push_task(open).unwrap();

        let mut task = Task::new("main");
        task.set_text("@home @diy\nFirst <tag>things</tag> first\n{! sub-1 !}\n{!sub-2!}\n{! ghost !}\n");
        let ctx = FieldContext { namespace: "caldav", calendar_tag_prefix: "DAV_", store: &store };
        assert_eq!(extract_description(&task, &ctx), "First things first\n[x] Buy paint\n[ ] Paint");

        task.set_text("@not only tags\nbody");
        assert_eq!(extract_description(&task, &ctx), "@not only tags\nbody");
    }

    #[test]
    fn test_hash_skips_write() {
        let cal = "https://example.com/cal/".parse().unwrap();
        let mut todo = Todo::new("abc", &cal);
        let hash = content_hash("Buy milk");
        todo.props_mut().set(Property::new("DESCRIPTION", "Buy milk   ").with_param(HASH_PARAM, hash.as_str()));

        write_remote_description(&mut todo, "Buy milk", Some(&hash));
        assert_eq!(todo.props().get("DESCRIPTION").unwrap().value(), "Buy milk   ");

        write_remote_description(&mut todo, "Buy eggs", Some(&content_hash("Buy eggs")));
        assert_eq!(todo.props().get_text("DESCRIPTION").as_deref(), Some("Buy eggs"));
        assert_eq!(todo.props().get_all("DESCRIPTION").count(), 1);
    }
}

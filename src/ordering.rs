//! Order a flat list of resources so that parents come before their children

use std::collections::HashSet;

use crate::todo::Todo;

/// How many passes are made over unresolved resources before they are dropped
pub const DEFAULT_MAX_PASSES: usize = 500;

/// Sort resources so that the parent of each one either does not exist, is known locally, or comes earlier.
///
/// Each pass yields every resource whose parent is resolved, the ones yielded earlier in the same pass included.
/// Resources that are still unresolved when a pass makes no progress, or after `max_passes` passes,
/// are dropped (they have a dangling or cyclic parent link).
pub fn sort_by_dependencies<F>(todos: Vec<Todo>, is_known_locally: F, max_passes: usize) -> Vec<Todo>
where
    F: Fn(&str) -> bool,
{
    let mut remaining: Vec<Todo> = todos;
    let mut ordered: Vec<Todo> = Vec::with_capacity(remaining.len());
    let mut marked: HashSet<String> = HashSet::new();

    let mut passes = 0;
    while remaining.is_empty() == false && passes < max_passes {
        passes += 1;
        let yielded_before = ordered.len();
        let mut unresolved = Vec::new();

        for todo in remaining {
            let resolved = match todo.parent_uid() {
                None => true,
                Some(parent) => marked.contains(&parent) || is_known_locally(&parent),
            };
            if resolved {
                marked.insert(todo.uid().to_string());
                ordered.push(todo);
            } else {
                unresolved.push(todo);
            }
        }

        remaining = unresolved;
        if ordered.len() == yielded_before {
            break;
        }
    }

    for todo in &remaining {
        log::warn!("Dropping {} ({}): its parent {:?} could not be resolved", todo.uid(), todo.summary(), todo.parent_uid());
    }
    ordered
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarId;
    use crate::todo::RelType;

    fn todo(uid: &str, parent: Option<&str>) -> Todo {
        let cal: CalendarId = "https://example.com/cal/".parse().unwrap();
        let mut todo = Todo::new(uid, &cal);
        if let Some(p) = parent {
            todo.set_related(RelType::Parent, &[p.to_string()]);
        }
        todo
    }

    fn uids(todos: &[Todo]) -> Vec<&str> {
        todos.iter().map(|t| t.uid()).collect()
    }

    #[test]
    fn test_reverse_chain() {
        let batch = vec![todo("C", Some("B")), todo("B", Some("A")), todo("A", None)];
        let sorted = sort_by_dependencies(batch, |_| false, DEFAULT_MAX_PASSES);
        assert_eq!(uids(&sorted), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_known_parents() {
        let batch = vec![todo("C", Some("B")), todo("B", Some("local"))];
        let sorted = sort_by_dependencies(batch, |uid| uid == "local", DEFAULT_MAX_PASSES);
        assert_eq!(uids(&sorted), vec!["B", "C"]);
    }

    #[test]
    fn test_dangling_and_cyclic() {
        let batch = vec![
            todo("orphan", Some("missing")),
            todo("X", Some("Y")),
            todo("Y", Some("X")),
            todo("root", None),
            todo("child", Some("root")),
        ];
        let sorted = sort_by_dependencies(batch, |_| false, DEFAULT_MAX_PASSES);
        assert_eq!(uids(&sorted), vec!["root", "child"]);
    }

    #[test]
    fn test_pass_bound() {
        let batch = vec![todo("D", Some("C")), todo("C", Some("B")), todo("B", Some("A")), todo("A", None)];
        let sorted = sort_by_dependencies(batch, |_| false, 2);
        assert_eq!(uids(&sorted), vec!["A", "B"]);
    }
}

//! Status and completion percentage, both derived from the whole subtask tree

use std::collections::HashSet;

use crate::task::{Task, TaskStatus};
use crate::todo::Todo;
use crate::traits::TaskStore;

/// How local statuses and remote `STATUS` labels map to each other.
///
/// The first matching pair wins, whichever side is matched.
pub const STATUS_MAPPING: [(TaskStatus, &str); 4] = [
    (TaskStatus::Active, "NEEDS-ACTION"),
    (TaskStatus::Active, "IN-PROCESS"),
    (TaskStatus::Done, "COMPLETED"),
    (TaskStatus::Dismissed, "CANCELLED"),
];

const DEFAULT_MAPPING: (TaskStatus, &str) = (TaskStatus::Active, "NEEDS-ACTION");

pub fn status_for_label(label: &str) -> TaskStatus {
    STATUS_MAPPING.iter()
        .find(|(_, l)| l.eq_ignore_ascii_case(label.trim()))
        .unwrap_or(&DEFAULT_MAPPING)
        .0
}

pub fn label_for_status(status: TaskStatus) -> &'static str {
    STATUS_MAPPING.iter()
        .find(|(s, _)| *s == status)
        .unwrap_or(&DEFAULT_MAPPING)
        .1
}

/// The statuses of a task and of all its descendants
fn subtree_statuses(task: &Task, store: &dyn TaskStore) -> Vec<TaskStatus> {
    let mut statuses = vec![task.status()];
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(task.uid().to_string());

    let mut to_visit: Vec<String> = task.children().to_vec();
    while let Some(uid) = to_visit.pop() {
        if visited.insert(uid.clone()) == false {
            continue;
        }
        if let Some(child) = store.get_task(&uid) {
            statuses.push(child.status());
            to_visit.extend(child.children().iter().cloned());
        }
    }
    statuses
}

/// The `STATUS` label a task is published with
pub fn derived_label(task: &Task, store: &dyn TaskStore) -> &'static str {
    let statuses = subtree_statuses(task, store);
    let any_active = statuses.contains(&TaskStatus::Active);
    let any_done = statuses.contains(&TaskStatus::Done);
    match (any_active, any_done) {
        (true, true) => "IN-PROCESS",
        (true, false) => "NEEDS-ACTION",
        (false, true) => "COMPLETED",
        (false, false) => "CANCELLED",
    }
}

/// `round(100 * done / total)` over the task and its descendants, dismissed ones excluded
pub fn percent_complete(task: &Task, store: &dyn TaskStore) -> i64 {
    let statuses: Vec<TaskStatus> = subtree_statuses(task, store).into_iter()
        .filter(|s| *s != TaskStatus::Dismissed)
        .collect();
    if statuses.is_empty() {
        return 0;
    }
    let done = statuses.iter().filter(|s| **s == TaskStatus::Done).count();
    (100.0 * done as f64 / statuses.len() as f64).round() as i64
}

/// The remote label, normalized through the mapping
pub(super) fn read_remote(todo: &Todo) -> String {
    let label = todo.status_label().unwrap_or_default();
    match STATUS_MAPPING.iter().find(|(_, l)| *l == label) {
        Some((_, l)) => l.to_string(),
        None => DEFAULT_MAPPING.1.to_string(),
    }
}

pub(super) fn read_remote_percent(todo: &Todo) -> i64 {
    todo.props().get("PERCENT-COMPLETE")
        .and_then(|p| p.value().trim().parse().ok())
        .unwrap_or(0)
}

use crate::task::Task;
use crate::todo::{RelType, Todo};

pub(super) fn read_local(task: &Task, reltype: RelType) -> Vec<String> {
    match reltype {
        RelType::Parent => task.parent().map(|p| vec![p.to_string()]).unwrap_or_default(),
        RelType::Child => task.children().to_vec(),
    }
}

pub(super) fn read_remote(todo: &Todo, reltype: RelType) -> Vec<String> {
    match reltype {
        // A PARENT link names a single task
        RelType::Parent => todo.parent_uid().into_iter().collect(),
        RelType::Child => todo.related(RelType::Child),
    }
}

pub(super) fn write_remote(todo: &mut Todo, reltype: RelType, uids: &[String]) {
    todo.set_related(reltype, uids);
}

/// Add the missing links, remove the extra ones, and follow the remote order
pub(super) fn write_local(task: &mut Task, reltype: RelType, uids: &[String]) {
    match reltype {
        RelType::Parent => {
            let parent = uids.first().map(|p| p.as_str());
            if task.parent() != parent {
                task.set_parent(parent);
            }
        },
        RelType::Child => {
            if task.children() != uids {
                task.set_children(uids.to_vec());
            }
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_follow_remote_order() {
        let cal = "https://example.com/cal/".parse().unwrap();
        let mut todo = Todo::new("parent", &cal);
        write_remote(&mut todo, RelType::Child, &["c3".to_string(), "c1".to_string()]);

        let mut task = Task::new("parent");
        task.set_children(vec!["c1".to_string(), "c2".to_string()]);
        write_local(&mut task, RelType::Child, &read_remote(&todo, RelType::Child));
        assert_eq!(task.children(), &["c3".to_string(), "c1".to_string()]);

        write_local(&mut task, RelType::Parent, &read_remote(&todo, RelType::Parent));
        assert_eq!(task.parent(), None);
    }
}

//! This module provides an in-memory task store, that can be saved to a local file

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::task::Task;
use crate::traits::TaskStore;


/// A [`TaskStore`] that keeps its tasks in memory, and optionally saves them to a JSON file
#[derive(Debug, Default, PartialEq)]
pub struct MemoryStore {
    backing_file: Option<PathBuf>,
    data: StoredData,
}

#[derive(Default, Debug, PartialEq, Serialize, Deserialize)]
struct StoredData {
    tasks: BTreeMap<String, Task>,
    /// UIDs of the tasks whose deletion has been requested, in order
    deletion_requests: Vec<String>,
}

impl MemoryStore {
    /// Initialize an empty store, that is not backed by any file
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize an empty store, that will be saved to `path`
    pub fn with_file(path: &Path) -> Self {
        Self {
            backing_file: Some(PathBuf::from(path)),
            data: StoredData::default(),
        }
    }

    /// Initialize a store from the content of a valid backing file if it exists.
    /// Returns an error otherwise
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
        let data = match std::fs::File::open(path) {
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            },
            Ok(file) => serde_json::from_reader(file)?,
        };

        Ok(Self{
            backing_file: Some(PathBuf::from(path)),
            data,
        })
    }

    /// Store the current tasks to the backing file (if any)
    pub fn save_to_file(&self) -> Result<(), Box<dyn Error>> {
        let path = match &self.backing_file {
            None => return Ok(()),
            Some(path) => path,
        };
        let file = match std::fs::File::create(path) {
            Err(err) => return Err(format!("Unable to save file {:?}: {}", path, err).into()),
            Ok(f) => f,
        };
        serde_json::to_writer(file, &self.data)?;
        Ok(())
    }

    /// The UIDs of the tasks whose deletion has been requested, in order
    pub fn deletion_requests(&self) -> &[String] {
        &self.data.deletion_requests
    }

    pub fn len(&self) -> usize {
        self.data.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.tasks.is_empty()
    }
}

impl TaskStore for MemoryStore {
    fn get_task(&self, uid: &str) -> Option<Task> {
        self.data.tasks.get(uid).cloned()
    }

    fn has_task(&self, uid: &str) -> bool {
        self.data.tasks.contains_key(uid)
    }

    fn all_task_uids(&self) -> Vec<String> {
        self.data.tasks.keys().cloned().collect()
    }

    fn new_task(&self, uid: &str) -> Task {
        Task::new(uid)
    }

    fn push_task(&mut self, task: Task) -> Result<(), Box<dyn Error>> {
        if task.uid().is_empty() {
            return Err("Cannot store a task without UID".into());
        }
        self.data.tasks.insert(task.uid().to_string(), task);
        Ok(())
    }

    fn request_deletion(&mut self, uid: &str) -> Result<(), Box<dyn Error>> {
        let removed = match self.data.tasks.remove(uid) {
            None => return Err(format!("No task {} in this store", uid).into()),
            Some(task) => task,
        };
        if let Some(parent) = removed.parent().and_then(|p| self.data.tasks.get_mut(p)) {
            parent.remove_child(uid);
        }
        self.data.deletion_requests.push(uid.to_string());
        Ok(())
    }
}

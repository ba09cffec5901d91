use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datetime::to_project_date;
use crate::reorder;
use crate::storage::{KeyValueStore, TAGS_KEY, TASKS_KEY, load_json, save_json};
use crate::tags::TagRegistry;
use crate::task::{
    Priority, Task, ValidationError, parse_tags, tag_name, validate_due_date, validate_title,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no task with id {0}")]
    NotFound(String),
    #[error("id prefix {0} matches more than one task")]
    AmbiguousId(String),
    #[error("invalid import: {0}")]
    InvalidImport(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Owns the task collection and its tag registry. Every mutation is written
/// through to storage before returning.
pub struct TaskStore {
    tasks: Vec<Task>,
    registry: TagRegistry,
    storage: Box<dyn KeyValueStore>,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("tasks", &self.tasks.len())
            .field("tags", &self.registry.len())
            .finish()
    }
}

impl TaskStore {
    #[tracing::instrument(skip(storage, now))]
    pub fn load(mut storage: Box<dyn KeyValueStore>, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let raw: Option<Value> = load_json(storage.as_ref(), TASKS_KEY)?;
        let items = match &raw {
            Some(Value::Array(items)) => items.as_slice(),
            Some(other) => {
                warn!(kind = json_kind(other), "stored tasks are not an array; starting empty");
                &[]
            }
            None => &[],
        };
        let tasks = normalize_all(items, now);

        let stored_registry: Option<TagRegistry> = load_json(storage.as_ref(), TAGS_KEY)?;
        let registry = match stored_registry {
            Some(registry) if registry.is_consistent_with(&tasks) => registry,
            Some(_) => {
                warn!("tag registry drifted from tasks; rebuilding");
                TagRegistry::from_tasks(&tasks)
            }
            None => TagRegistry::from_tasks(&tasks),
        };

        let repaired = match &raw {
            Some(value) => serde_json::to_value(&tasks)? != *value,
            None => false,
        };
        if repaired {
            info!("persisting repaired task collection");
            save_json(storage.as_mut(), TASKS_KEY, &tasks)?;
        }
        save_json(storage.as_mut(), TAGS_KEY, &registry)?;

        debug!(count = tasks.len(), tags = registry.len(), "loaded tasks");
        Ok(Self {
            tasks,
            registry,
            storage,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// Shared with state persisted beside the collection (sort state).
    pub fn storage_mut(&mut self) -> &mut dyn KeyValueStore {
        self.storage.as_mut()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Exact id, else the single task whose id starts with `prefix`.
    pub fn resolve_id(&self, prefix: &str) -> Result<String, StoreError> {
        let prefix = prefix.trim();
        if let Some(task) = self.get(prefix) {
            return Ok(task.id.clone());
        }
        let mut hits = self
            .tasks
            .iter()
            .filter(|t| !prefix.is_empty() && t.id.starts_with(prefix));
        match (hits.next(), hits.next()) {
            (Some(task), None) => Ok(task.id.clone()),
            (Some(_), Some(_)) => Err(StoreError::AmbiguousId(prefix.to_string())),
            _ => Err(StoreError::NotFound(prefix.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[tracing::instrument(skip(self, text, raw_tags, now))]
    pub fn add(
        &mut self,
        text: &str,
        due_date: Option<NaiveDate>,
        priority: Priority,
        raw_tags: &str,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let title = validate_title(text)?;
        validate_due_date(due_date, to_project_date(now))?;

        let tags = parse_tags(raw_tags);
        let mut registry = self.registry.clone();
        for tag in &tags {
            registry.increment(tag);
        }

        let task = Task::new(title, tags, priority, due_date, now);
        let id = task.id.clone();
        let mut tasks = self.tasks.clone();
        tasks.push(task);
        self.commit(tasks, registry)?;

        info!(id = %id, "added task");
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove(&mut self, id: &str) -> Result<Task, StoreError> {
        let idx = self.index_of(id)?;
        let mut tasks = self.tasks.clone();
        let task = tasks.remove(idx);
        let mut registry = self.registry.clone();
        for tag in &task.tags {
            registry.decrement(tag);
        }
        if registry.rebuild_from(&tasks) {
            warn!("tag registry drifted during delete; rebuilt");
        }
        self.commit(tasks, registry)?;

        info!(id = %id, "deleted task");
        Ok(task)
    }

    /// Returns the new completion state.
    #[tracing::instrument(skip(self))]
    pub fn toggle_completed(&mut self, id: &str) -> Result<bool, StoreError> {
        let completed = self.update_task(id, |task| {
            task.completed = !task.completed;
            task.completed
        })?;
        info!(id = %id, completed, "toggled task");
        Ok(completed)
    }

    #[tracing::instrument(skip(self))]
    pub fn set_priority(&mut self, id: &str, priority: Priority) -> Result<(), StoreError> {
        self.update_task(id, |task| task.priority = priority)?;
        info!(id = %id, %priority, "changed priority");
        Ok(())
    }

    /// Rejected titles leave the old text in place.
    #[tracing::instrument(skip(self, text))]
    pub fn rename(&mut self, id: &str, text: &str) -> Result<(), StoreError> {
        let title = validate_title(text)?;
        self.update_task(id, |task| task.text = title)?;
        info!(id = %id, "renamed task");
        Ok(())
    }

    #[tracing::instrument(skip(self, text))]
    pub fn set_description(&mut self, id: &str, text: &str) -> Result<(), StoreError> {
        let description = text.trim().to_string();
        self.update_task(id, |task| task.description = description)?;
        info!(id = %id, "updated description");
        Ok(())
    }

    #[tracing::instrument(skip(self, raw_tags))]
    pub fn set_tags(&mut self, id: &str, raw_tags: &str) -> Result<(), StoreError> {
        let tags = parse_tags(raw_tags);
        let idx = self.index_of(id)?;
        let mut tasks = self.tasks.clone();
        let old = std::mem::replace(&mut tasks[idx].tags, tags.clone());
        let mut registry = self.registry.clone();
        for tag in &old {
            registry.decrement(tag);
        }
        for tag in &tags {
            registry.increment(tag);
        }
        self.commit(tasks, registry)?;
        info!(id = %id, count = tags.len(), "retagged task");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_all(&mut self) -> Result<usize, StoreError> {
        let removed = self.tasks.len();
        self.commit(Vec::new(), TagRegistry::new())?;
        info!(removed, "cleared all tasks");
        Ok(removed)
    }

    /// Replace the whole collection with normalized copies of `value`. Anything
    /// but a top-level array is rejected and the collection is left untouched.
    #[tracing::instrument(skip(self, value, now))]
    pub fn import_replace(&mut self, value: &Value, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let Value::Array(items) = value else {
            return Err(StoreError::InvalidImport(format!(
                "expected a JSON array of tasks, got {}",
                json_kind(value)
            )));
        };

        let tasks = normalize_all(items, now);
        let registry = TagRegistry::from_tasks(&tasks);
        self.commit(tasks, registry)?;

        info!(count = self.tasks.len(), "imported tasks");
        Ok(self.tasks.len())
    }

    pub fn import_json(&mut self, text: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| StoreError::InvalidImport(format!("not valid JSON: {err}")))?;
        self.import_replace(&value, now)
    }

    pub fn export_snapshot(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    pub fn export_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.tasks)?)
    }

    /// Returns the number of tasks rewritten. `new` must already be a usable
    /// tag once a leading `#` is dropped; it is never silently cleaned.
    #[tracing::instrument(skip(self))]
    pub fn rename_tag(&mut self, old: &str, new: &str) -> Result<usize, StoreError> {
        let new = tag_name(new)?;
        let old = old.trim().trim_start_matches('#');

        let mut tasks = self.tasks.clone();
        let mut registry = self.registry.clone();
        let touched = registry.rename(&mut tasks, old, &new);
        if !registry.is_consistent_with(&tasks) {
            warn!("tag registry drifted during rename; rebuilt");
            registry.rebuild_from(&tasks);
        }
        self.commit(tasks, registry)?;

        info!(old, new = %new, touched, "renamed tag");
        Ok(touched)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_tag(&mut self, tag: &str) -> Result<usize, StoreError> {
        let mut tasks = self.tasks.clone();
        let mut registry = self.registry.clone();
        let touched = registry.remove(&mut tasks, tag);
        registry.rebuild_from(&tasks);
        self.commit(tasks, registry)?;
        info!(tag, touched, "deleted tag");
        Ok(touched)
    }

    /// Returns whether the registry had drifted.
    #[tracing::instrument(skip(self))]
    pub fn rebuild_tags(&mut self) -> Result<bool, StoreError> {
        let mut registry = self.registry.clone();
        let changed = registry.rebuild_from(&self.tasks);
        if changed {
            warn!("tag registry drifted; rebuilt");
        }
        save_json(self.storage.as_mut(), TAGS_KEY, &registry)?;
        self.registry = registry;
        Ok(changed)
    }

    /// Move the tasks named in `visible_ids` into that order, leaving every
    /// other task where it was. Returns whether the order changed.
    #[tracing::instrument(skip(self, visible_ids), fields(visible = visible_ids.len()))]
    pub fn apply_visible_order(&mut self, visible_ids: &[String]) -> Result<bool, StoreError> {
        let tasks = reorder::reconcile(self.tasks.clone(), visible_ids);
        let changed = tasks.iter().map(|t| &t.id).ne(self.tasks.iter().map(|t| &t.id));
        if changed {
            self.commit_tasks(tasks)?;
            info!("reordered tasks");
        }
        Ok(changed)
    }

    /// Swap in a previously captured collection (undo/redo).
    #[tracing::instrument(skip(self, snapshot), fields(count = snapshot.len()))]
    pub fn restore(&mut self, snapshot: Vec<Task>) -> Result<(), StoreError> {
        let registry = TagRegistry::from_tasks(&snapshot);
        self.commit(snapshot, registry)?;
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<usize, StoreError> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Edit one task on a copy of the collection; tags stay as they are.
    fn update_task<R>(
        &mut self,
        id: &str,
        change: impl FnOnce(&mut Task) -> R,
    ) -> Result<R, StoreError> {
        let idx = self.index_of(id)?;
        let mut tasks = self.tasks.clone();
        let out = change(&mut tasks[idx]);
        self.commit_tasks(tasks)?;
        Ok(out)
    }

    /// Write the candidate state through, then adopt it. On any failure the
    /// in-memory state is untouched and the stored tasks are put back.
    fn commit(&mut self, tasks: Vec<Task>, registry: TagRegistry) -> anyhow::Result<()> {
        debug!(count = tasks.len(), tags = registry.len(), "saving tasks");
        save_json(self.storage.as_mut(), TASKS_KEY, &tasks)?;
        if let Err(err) = save_json(self.storage.as_mut(), TAGS_KEY, &registry) {
            if let Err(rollback) = save_json(self.storage.as_mut(), TASKS_KEY, &self.tasks) {
                warn!(error = %rollback, "could not restore stored tasks after failed save");
            }
            return Err(err);
        }
        self.tasks = tasks;
        self.registry = registry;
        Ok(())
    }

    fn commit_tasks(&mut self, tasks: Vec<Task>) -> anyhow::Result<()> {
        debug!(count = tasks.len(), "saving tasks");
        save_json(self.storage.as_mut(), TASKS_KEY, &tasks)?;
        self.tasks = tasks;
        Ok(())
    }
}

/// Normalize every record and give duplicate ids fresh ones.
fn normalize_all(items: &[Value], now: DateTime<Utc>) -> Vec<Task> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let mut task = Task::normalize(item, now);
        if !seen.insert(task.id.clone()) {
            let fresh = Uuid::new_v4().to_string();
            warn!(duplicate = %task.id, fresh = %fresh, "reassigned duplicate task id");
            task.id = fresh.clone();
            seen.insert(fresh);
        }
        out.push(task);
    }
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

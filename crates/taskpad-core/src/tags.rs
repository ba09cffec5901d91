use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Reference counts of tags across the collection. Derived from the tasks and
/// always rebuildable from them; insertion order breaks ties in rankings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagRegistry {
    counts: IndexMap<String, u32>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut registry = Self::new();
        registry.rebuild_from(tasks);
        registry
    }

    pub fn count(&self, tag: &str) -> u32 {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(tag, count)| (tag.as_str(), *count))
    }

    pub fn increment(&mut self, tag: &str) {
        *self.counts.entry(tag.to_string()).or_insert(0) += 1;
    }

    /// Floors at zero; a tag reaching zero is dropped.
    pub fn decrement(&mut self, tag: &str) {
        let Some(count) = self.counts.get_mut(tag) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.counts.shift_remove(tag);
        }
    }

    /// Recompute every count from scratch. Returns whether anything changed.
    pub fn rebuild_from(&mut self, tasks: &[Task]) -> bool {
        let mut fresh: IndexMap<String, u32> = IndexMap::new();
        for task in tasks {
            for tag in &task.tags {
                let key = tag.to_ascii_lowercase();
                if key.is_empty() {
                    continue;
                }
                *fresh.entry(key).or_insert(0) += 1;
            }
        }

        let changed = !same_counts(&self.counts, &fresh);
        self.counts = fresh;
        changed
    }

    pub fn is_consistent_with(&self, tasks: &[Task]) -> bool {
        same_counts(&self.counts, &Self::from_tasks(tasks).counts)
    }

    /// Rename `old` to `new` (both case-insensitive) in the registry and in
    /// every task holding `old`. A task that already carries `new` just loses
    /// `old`. Returns the number of tasks rewritten.
    pub fn rename(&mut self, tasks: &mut [Task], old: &str, new: &str) -> usize {
        let old = old.to_ascii_lowercase();
        let new = new.to_ascii_lowercase();
        if old.is_empty() || new.is_empty() || old == new {
            return 0;
        }

        let mut touched = 0;
        let mut overlap = 0;
        for task in tasks.iter_mut() {
            let Some(pos) = task.tags.iter().position(|t| *t == old) else {
                continue;
            };
            touched += 1;
            if task.has_tag(&new) {
                overlap += 1;
                task.tags.remove(pos);
            } else {
                task.tags[pos] = new.clone();
            }
        }

        let old_count = self.counts.shift_remove(&old).unwrap_or(0);
        let new_count = self.count(&new);
        let merged = (old_count + new_count).saturating_sub(overlap);
        if merged > 0 {
            self.counts.insert(new, merged);
        }
        touched
    }

    /// Strip `tag` from every task and drop its entry. Returns the number of
    /// tasks that held it.
    pub fn remove(&mut self, tasks: &mut [Task], tag: &str) -> usize {
        let tag = tag.to_ascii_lowercase();
        let mut touched = 0;
        for task in tasks.iter_mut() {
            let before = task.tags.len();
            task.tags.retain(|t| *t != tag);
            if task.tags.len() != before {
                touched += 1;
            }
        }
        self.counts.shift_remove(&tag);
        touched
    }

    /// Most used tags first; equal counts keep insertion order.
    pub fn top_n(&self, n: usize) -> Vec<(&str, u32)> {
        let mut entries: Vec<(&str, u32)> = self.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(n);
        entries
    }

    pub fn matching_prefix(&self, prefix: &str, limit: usize) -> Vec<&str> {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.is_empty() {
            return Vec::new();
        }
        self.counts
            .keys()
            .filter(|tag| tag.starts_with(&prefix))
            .take(limit)
            .map(String::as_str)
            .collect()
    }
}

fn same_counts(a: &IndexMap<String, u32>, b: &IndexMap<String, u32>) -> bool {
    a.len() == b.len() && a.iter().all(|(tag, count)| b.get(tag) == Some(count))
}

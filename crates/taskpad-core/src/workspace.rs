use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Settings;
use crate::datetime::to_project_date;
use crate::history::History;
use crate::render::{self, Description};
use crate::sort::{QuickSort, SortKey, SortSpec};
use crate::storage::KeyValueStore;
use crate::store::{StoreError, TaskStore};
use crate::task::{Priority, current_tag_prefix, tag_name};
use crate::view::{self, Progress, View, ViewState};

/// The application state: one collection, its sort and view settings, and the
/// undo history. Front ends drive everything through this.
#[derive(Debug)]
pub struct Workspace {
    store: TaskStore,
    sort: SortSpec,
    history: History,
    settings: Settings,
    pub view: ViewState,
}

impl Workspace {
    #[tracing::instrument(skip_all)]
    pub fn open(
        storage: Box<dyn KeyValueStore>,
        settings: Settings,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let sort = SortSpec::load(storage.as_ref())?;
        let store = TaskStore::load(storage, now)?;
        debug!(?sort, "opened workspace");
        Ok(Self {
            store,
            sort,
            history: History::new(settings.history_limit),
            settings,
            view: ViewState::default(),
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn view(&self) -> View<'_> {
        view::derive(self.store.tasks(), &self.view, &self.sort, self.settings.fuzzy_ratio)
    }

    pub fn describe(&self, now: DateTime<Utc>) -> Description {
        render::describe(&self.view(), to_project_date(now), &self.view.query, &self.sort)
    }

    pub fn progress(&self) -> Progress {
        Progress::of(self.store.tasks())
    }

    /// Adding a task the active tag filter would hide clears that filter.
    pub fn add(
        &mut self,
        text: &str,
        due_date: Option<NaiveDate>,
        priority: Priority,
        raw_tags: &str,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let id = self.mutate(|store| store.add(text, due_date, priority, raw_tags, now))?;
        if let Some(tag) = self.view.tag.as_deref() {
            let visible = self.store.get(&id).map(|t| t.has_tag(tag)).unwrap_or(false);
            if !visible {
                info!(tag, "clearing tag filter so the new task shows");
                self.view.tag = None;
            }
        }
        Ok(id)
    }

    pub fn remove(&mut self, id: &str) -> Result<(), StoreError> {
        self.mutate(|store| store.remove(id)).map(|_| ())
    }

    pub fn toggle_completed(&mut self, id: &str) -> Result<bool, StoreError> {
        self.mutate(|store| store.toggle_completed(id))
    }

    pub fn set_priority(&mut self, id: &str, priority: Priority) -> Result<(), StoreError> {
        self.mutate(|store| store.set_priority(id, priority))
    }

    pub fn rename(&mut self, id: &str, text: &str) -> Result<(), StoreError> {
        self.mutate(|store| store.rename(id, text))
    }

    pub fn set_description(&mut self, id: &str, text: &str) -> Result<(), StoreError> {
        self.mutate(|store| store.set_description(id, text))
    }

    pub fn set_tags(&mut self, id: &str, raw_tags: &str) -> Result<(), StoreError> {
        self.mutate(|store| store.set_tags(id, raw_tags))
    }

    pub fn clear_all(&mut self) -> Result<usize, StoreError> {
        let removed = self.mutate(TaskStore::clear_all)?;
        self.view.tag = None;
        Ok(removed)
    }

    pub fn import_replace(&mut self, value: &Value, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.mutate(|store| store.import_replace(value, now))
    }

    pub fn import_json(&mut self, text: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.mutate(|store| store.import_json(text, now))
    }

    pub fn rename_tag(&mut self, old: &str, new: &str) -> Result<usize, StoreError> {
        let touched = self.mutate(|store| store.rename_tag(old, new))?;
        let old = old.trim().trim_start_matches('#').to_ascii_lowercase();
        if touched > 0 && self.view.tag.as_deref() == Some(old.as_str()) {
            self.view.tag = Some(tag_name(new)?);
        }
        Ok(touched)
    }

    pub fn delete_tag(&mut self, tag: &str) -> Result<usize, StoreError> {
        let touched = self.mutate(|store| store.delete_tag(tag))?;
        if self.view.tag.as_deref() == Some(tag.to_ascii_lowercase().as_str()) {
            self.view.tag = None;
        }
        Ok(touched)
    }

    pub fn rebuild_tags(&mut self) -> Result<bool, StoreError> {
        self.store.rebuild_tags()
    }

    /// Apply a new order for the currently visible tasks. Manual order wins
    /// afterwards, so both sorts are cleared.
    #[tracing::instrument(skip(self, visible_ids))]
    pub fn reorder(&mut self, visible_ids: &[String]) -> Result<bool, StoreError> {
        let changed = self.mutate(|store| store.apply_visible_order(visible_ids))?;
        self.sort.clear_for_manual_order();
        self.save_sort()?;
        Ok(changed)
    }

    pub fn click_column(&mut self, key: SortKey) -> Result<(), StoreError> {
        self.sort.click_column(key);
        self.save_sort()
    }

    pub fn toggle_quick_sort(&mut self, mode: QuickSort) -> Result<(), StoreError> {
        self.sort.toggle_quick_sort(mode);
        self.save_sort()
    }

    /// Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, StoreError> {
        let current = self.store.export_snapshot();
        let Some(previous) = self.history.undo(current) else {
            return Ok(false);
        };
        if let Err(err) = self.store.restore(previous.clone()) {
            self.history.redo(previous);
            return Err(err);
        }
        info!("undid last change");
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, StoreError> {
        let current = self.store.export_snapshot();
        let Some(next) = self.history.redo(current) else {
            return Ok(false);
        };
        if let Err(err) = self.store.restore(next.clone()) {
            self.history.undo(next);
            return Err(err);
        }
        info!("redid change");
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn popular_tags(&self) -> Vec<(&str, u32)> {
        self.store.registry().top_n(self.settings.popular_tags)
    }

    /// Registry tags completing the last token of a tag field being typed.
    pub fn tag_suggestions(&self, raw: &str) -> Vec<&str> {
        let prefix = current_tag_prefix(raw);
        self.store
            .registry()
            .matching_prefix(&prefix, self.settings.tag_suggestions)
    }

    fn save_sort(&mut self) -> Result<(), StoreError> {
        let sort = self.sort;
        sort.save(self.store.storage_mut())?;
        Ok(())
    }

    /// Run a store operation, recording the prior collection when it changed.
    fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut TaskStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let before = self.store.export_snapshot();
        let out = op(&mut self.store)?;
        if self.store.tasks() != before.as_slice() {
            self.history.record(before);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::storage::{FailingStore, MemoryStore, TASKS_KEY};
    use crate::view::FilterMode;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).single().expect("valid now")
    }

    fn workspace() -> Workspace {
        Workspace::open(Box::new(MemoryStore::new()), Settings::default(), now()).expect("open")
    }

    #[test]
    fn undo_and_redo_restore_collection_and_tags() {
        let mut ws = workspace();
        let id = ws.add("Buy milk", None, Priority::High, "errand", now()).expect("add");
        ws.toggle_completed(&id).expect("toggle");

        assert!(ws.undo().expect("undo"));
        assert!(!ws.store().get(&id).expect("task").completed);
        assert!(ws.undo().expect("undo add"));
        assert!(ws.store().is_empty());
        assert!(ws.store().registry().is_empty());
        assert!(!ws.undo().expect("nothing left"));

        assert!(ws.redo().expect("redo add"));
        assert_eq!(ws.store().registry().count("errand"), 1);
    }

    #[test]
    fn failed_commands_are_not_recorded() {
        let mut ws = workspace();
        assert!(ws.add("no", None, Priority::Medium, "", now()).is_err());
        assert!(!ws.can_undo());
    }

    #[test]
    fn failed_saves_keep_state_and_history_in_step() {
        let storage = FailingStore::default();
        let mut ws =
            Workspace::open(Box::new(storage.clone()), Settings::default(), now()).expect("open");
        ws.add("Buy milk", None, Priority::High, "errand", now()).expect("add");

        storage.break_writes(TASKS_KEY);
        assert!(ws.add("Book dentist", None, Priority::Medium, "health", now()).is_err());
        assert_eq!(ws.store().tasks().len(), 1);

        assert!(ws.undo().is_err());
        assert_eq!(ws.store().tasks().len(), 1);
        assert!(ws.can_undo());
        assert!(!ws.can_redo());

        storage.heal();
        assert!(ws.undo().expect("undo"));
        assert!(ws.store().is_empty());
        assert!(!ws.can_undo());
    }

    #[test]
    fn adding_untagged_task_clears_tag_filter() {
        let mut ws = workspace();
        ws.add("Tagged one", None, Priority::Medium, "home", now()).expect("add");
        ws.view.tag = Some("home".to_string());
        ws.add("Also home", None, Priority::Medium, "home", now()).expect("add");
        assert_eq!(ws.view.tag.as_deref(), Some("home"));
        ws.add("Something else", None, Priority::Medium, "work", now()).expect("add");
        assert_eq!(ws.view.tag, None);
    }

    #[test]
    fn reorder_clears_sorts() {
        let mut ws = workspace();
        let a = ws.add("Alpha", None, Priority::Medium, "", now()).expect("add");
        let b = ws.add("Bravo", None, Priority::Medium, "", now()).expect("add");
        ws.toggle_quick_sort(QuickSort::Priority).expect("quick");

        assert!(ws.reorder(&[b.clone(), a.clone()]).expect("reorder"));
        assert_eq!(ws.view().ids(), vec![b, a]);
        assert_eq!(ws.sort().key, None);
        assert_eq!(ws.sort().quick_sort_mode, QuickSort::Off);
    }

    #[test]
    fn reorder_of_filtered_subset_keeps_hidden_tasks() {
        let mut ws = workspace();
        let a = ws.add("Alpha", None, Priority::Medium, "", now()).expect("add");
        let b = ws.add("Bravo", None, Priority::Medium, "", now()).expect("add");
        let c = ws.add("Charlie", None, Priority::Medium, "", now()).expect("add");
        ws.toggle_completed(&b).expect("toggle");

        ws.view.filter = FilterMode::Active;
        ws.reorder(&[c.clone(), a.clone()]).expect("reorder");
        let order: Vec<String> = ws.store().tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn tag_helpers_use_settings() {
        let mut ws = workspace();
        ws.add("First task", None, Priority::Medium, "home homework", now()).expect("add");
        ws.add("Second task", None, Priority::Medium, "home", now()).expect("add");
        assert_eq!(ws.popular_tags()[0], ("home", 2));
        assert_eq!(ws.tag_suggestions("errand, hom"), vec!["home", "homework"]);
    }

    #[test]
    fn renaming_filtered_tag_follows_filter() {
        let mut ws = workspace();
        ws.add("First task", None, Priority::Medium, "work", now()).expect("add");
        ws.view.tag = Some("work".to_string());
        ws.rename_tag("work", "job").expect("rename");
        assert_eq!(ws.view.tag.as_deref(), Some("job"));
        ws.delete_tag("job").expect("delete");
        assert_eq!(ws.view.tag, None);
    }

    #[test]
    fn sort_state_persists_across_open() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = crate::storage::FileStore::open(temp.path()).expect("store");
        let mut ws = Workspace::open(Box::new(storage), Settings::default(), now()).expect("open");
        ws.click_column(SortKey::Priority).expect("click");

        let storage = crate::storage::FileStore::open(temp.path()).expect("store");
        let ws = Workspace::open(Box::new(storage), Settings::default(), now()).expect("reopen");
        assert_eq!(ws.sort().key, Some(SortKey::Priority));
    }
}

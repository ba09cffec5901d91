//! Task list state engine: the collection and its tag registry, derived
//! views, reorder reconciliation, sort state and undo history.

pub mod config;
pub mod datetime;
pub mod history;
pub mod render;
pub mod reorder;
pub mod sort;
pub mod storage;
pub mod store;
pub mod tags;
pub mod task;
pub mod view;
pub mod workspace;

pub use config::{Config, Settings};
pub use sort::{Direction, QuickSort, SortKey, SortSpec};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::{StoreError, TaskStore};
pub use task::{Priority, Task, ValidationError};
pub use view::{FilterMode, Progress, View, ViewState};
pub use workspace::Workspace;

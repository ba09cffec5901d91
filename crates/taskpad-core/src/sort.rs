use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};
use tracing::debug;

use crate::storage::{
  KeyValueStore,
  SORT_STATE_KEY,
  load_json,
  save_json
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
  Title,
  Date,
  DueDate,
  Priority,
  Status
}

impl SortKey {
  pub const ALL: [SortKey; 5] = [
    SortKey::Title,
    SortKey::Date,
    SortKey::DueDate,
    SortKey::Priority,
    SortKey::Status
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Title => "title",
      | Self::Date => "date",
      | Self::DueDate => "dueDate",
      | Self::Priority => "priority",
      | Self::Status => "status"
    }
  }

  /// Column header text.
  pub fn header(self) -> &'static str {
    match self {
      | Self::Title => "Title",
      | Self::Date => "Date Added",
      | Self::DueDate => "Due Date",
      | Self::Priority => "Priority",
      | Self::Status => "Status"
    }
  }
}

impl FromStr for SortKey {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "title" => Ok(Self::Title),
      | "date" | "created" => {
        Ok(Self::Date)
      }
      | "duedate" | "due" => {
        Ok(Self::DueDate)
      }
      | "priority" => Ok(Self::Priority),
      | "status" => Ok(Self::Status),
      | other => {
        Err(anyhow!(
          "unknown sort column: {other}"
        ))
      }
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  #[default]
  Asc,
  Desc
}

impl Direction {
  #[must_use]
  pub fn flipped(self) -> Self {
    match self {
      | Self::Asc => Self::Desc,
      | Self::Desc => Self::Asc
    }
  }

  pub fn arrow(self) -> &'static str {
    match self {
      | Self::Asc => "▲",
      | Self::Desc => "▼"
    }
  }
}

/// One-click sort that overrides the
/// column sort while active.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum QuickSort {
  #[default]
  #[serde(rename = "none")]
  Off,
  Priority,
  Date,
  Title
}

impl FromStr for QuickSort {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "none" | "off" => Ok(Self::Off),
      | "priority" => Ok(Self::Priority),
      | "date" => Ok(Self::Date),
      | "title" => Ok(Self::Title),
      | other => {
        Err(anyhow!(
          "unknown quick sort: {other}"
        ))
      }
    }
  }
}

impl fmt::Display for QuickSort {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | Self::Off => "none",
      | Self::Priority => "priority",
      | Self::Date => "date",
      | Self::Title => "title"
    })
  }
}

/// Which ordering the view pipeline
/// applies.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ActiveOrder {
  Quick(QuickSort, Direction),
  Column(SortKey, Direction),
  Manual
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(
  rename_all = "camelCase",
  default
)]
pub struct SortSpec {
  pub key:             Option<SortKey>,
  pub direction:       Direction,
  pub quick_sort_mode: QuickSort
}

impl Default for SortSpec {
  fn default() -> Self {
    Self {
      key:             Some(
        SortKey::Title
      ),
      direction:       Direction::Asc,
      quick_sort_mode: QuickSort::Off
    }
  }
}

impl SortSpec {
  /// Same column flips the direction,
  /// a new column starts ascending.
  /// Either way quick sort is dropped.
  pub fn click_column(
    &mut self,
    key: SortKey
  ) {
    if self.key == Some(key) {
      self.direction =
        self.direction.flipped();
    } else {
      self.key = Some(key);
      self.direction = Direction::Asc;
    }
    self.quick_sort_mode =
      QuickSort::Off;
    debug!(?key, direction = ?self.direction, "column sort");
  }

  /// Toggle `mode` on or off. The column
  /// key survives so switching quick
  /// sort off restores it.
  pub fn toggle_quick_sort(
    &mut self,
    mode: QuickSort
  ) {
    self.quick_sort_mode =
      if self.quick_sort_mode == mode {
        QuickSort::Off
      } else {
        mode
      };
    debug!(mode = %self.quick_sort_mode, "quick sort");
  }

  /// Manual reorder: collection order
  /// becomes the displayed order.
  pub fn clear_for_manual_order(
    &mut self
  ) {
    self.key = None;
    self.quick_sort_mode =
      QuickSort::Off;
  }

  pub fn active_order(
    &self
  ) -> ActiveOrder {
    if self.quick_sort_mode
      != QuickSort::Off
    {
      return ActiveOrder::Quick(
        self.quick_sort_mode,
        self.direction
      );
    }
    match self.key {
      | Some(key) => {
        ActiveOrder::Column(
          key,
          self.direction
        )
      }
      | None => ActiveOrder::Manual
    }
  }

  /// Arrow for a header cell, empty
  /// unless `key` is the column in use.
  pub fn indicator(
    &self,
    key: SortKey
  ) -> &'static str {
    if self.key == Some(key) {
      self.direction.arrow()
    } else {
      ""
    }
  }

  pub fn load(
    store: &dyn KeyValueStore
  ) -> anyhow::Result<Self> {
    let spec: Option<SortSpec> =
      load_json(store, SORT_STATE_KEY)?;
    Ok(spec.unwrap_or_default())
  }

  pub fn save(
    &self,
    store: &mut dyn KeyValueStore
  ) -> anyhow::Result<()> {
    save_json(
      store,
      SORT_STATE_KEY,
      self
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStore;

  #[test]
  fn clicking_same_column_flips() {
    let mut spec = SortSpec::default();
    spec.click_column(SortKey::Title);
    assert_eq!(
      spec.direction,
      Direction::Desc
    );
    spec.click_column(
      SortKey::Priority
    );
    assert_eq!(
      spec.active_order(),
      ActiveOrder::Column(
        SortKey::Priority,
        Direction::Asc
      )
    );
  }

  #[test]
  fn quick_sort_overrides_and_restores()
  {
    let mut spec = SortSpec::default();
    spec.click_column(SortKey::Date);
    spec.toggle_quick_sort(
      QuickSort::Priority
    );
    assert!(matches!(
      spec.active_order(),
      ActiveOrder::Quick(
        QuickSort::Priority,
        _
      )
    ));
    spec.toggle_quick_sort(
      QuickSort::Priority
    );
    assert_eq!(
      spec.active_order(),
      ActiveOrder::Column(
        SortKey::Date,
        Direction::Asc
      )
    );
  }

  #[test]
  fn column_click_clears_quick_sort() {
    let mut spec = SortSpec::default();
    spec.toggle_quick_sort(
      QuickSort::Date
    );
    spec.click_column(SortKey::Status);
    assert_eq!(
      spec.quick_sort_mode,
      QuickSort::Off
    );
  }

  #[test]
  fn manual_order_clears_everything() {
    let mut spec = SortSpec::default();
    spec.toggle_quick_sort(
      QuickSort::Title
    );
    spec.clear_for_manual_order();
    assert_eq!(
      spec.active_order(),
      ActiveOrder::Manual
    );
  }

  #[test]
  fn persists_in_original_shape() {
    let mut store = MemoryStore::new();
    let mut spec = SortSpec::default();
    spec.click_column(SortKey::DueDate);
    spec.save(&mut store).expect("save");

    let raw = store
      .get(SORT_STATE_KEY)
      .expect("get")
      .expect("present");
    let value: serde_json::Value =
      serde_json::from_str(&raw)
        .expect("json");
    assert_eq!(
      value,
      serde_json::json!({
        "key": "dueDate",
        "direction": "asc",
        "quickSortMode": "none"
      })
    );
    assert_eq!(
      SortSpec::load(&store)
        .expect("load"),
      spec
    );
  }

  #[test]
  fn legacy_blob_without_quick_mode() {
    let store = MemoryStore::new()
      .with_entry(
        SORT_STATE_KEY,
        r#"{"key":null,"direction":"desc"}"#
      );
    let spec = SortSpec::load(&store)
      .expect("load");
    assert_eq!(spec.key, None);
    assert_eq!(
      spec.direction,
      Direction::Desc
    );
    assert_eq!(
      spec.active_order(),
      ActiveOrder::Manual
    );
  }

  #[test]
  fn missing_blob_defaults_to_title() {
    let store = MemoryStore::new();
    assert_eq!(
      SortSpec::load(&store)
        .expect("load")
        .active_order(),
      ActiveOrder::Column(
        SortKey::Title,
        Direction::Asc
      )
    );
  }
}

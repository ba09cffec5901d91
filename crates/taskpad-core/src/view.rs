use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use anyhow::anyhow;
use regex::RegexBuilder;

use crate::sort::{ActiveOrder, Direction, QuickSort, SortKey, SortSpec};
use crate::task::{Priority, Task};

pub const DEFAULT_FUZZY_RATIO: f64 = 0.28;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    #[default]
    All,
    Active,
    Completed,
    Priority(Priority),
}

impl FilterMode {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
            Self::Priority(p) => task.priority == p,
        }
    }
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "all" => return Ok(Self::All),
            "active" => return Ok(Self::Active),
            "completed" | "done" => return Ok(Self::Completed),
            _ => {}
        }
        let rank = lower
            .strip_prefix("priority-")
            .or_else(|| lower.strip_prefix("p"))
            .ok_or_else(|| anyhow!("unknown filter: {s}"))?;
        rank.parse::<Priority>()
            .map(Self::Priority)
            .map_err(|_| anyhow!("unknown filter: {s}"))
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Active => f.write_str("active"),
            Self::Completed => f.write_str("completed"),
            Self::Priority(p) => write!(f, "priority-{}", p.rank()),
        }
    }
}

/// Everything besides the collection and sort state that decides what is shown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub filter: FilterMode,
    pub tag: Option<String>,
    pub query: String,
    /// When off, the query only drives the match counter and highlighting.
    pub search_active: bool,
}

#[derive(Debug)]
pub struct View<'a> {
    pub tasks: Vec<&'a Task>,
    /// Tasks passing the filters that also match the query; zero without a query.
    pub matches: usize,
}

impl View<'_> {
    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }
}

/// Filter, search, then sort. The filter mode and the tag filter must both
/// hold for a task to be shown.
pub fn derive<'a>(tasks: &'a [Task], state: &ViewState, sort: &SortSpec, fuzzy_ratio: f64) -> View<'a> {
    let mut shown: Vec<&Task> = tasks
        .iter()
        .filter(|t| state.filter.matches(t))
        .filter(|t| state.tag.as_deref().map(|tag| t.has_tag(tag)).unwrap_or(true))
        .collect();

    let query = state.query.trim();
    let mut matches = 0;
    if !query.is_empty() {
        let hits: Vec<&Task> = shown
            .iter()
            .copied()
            .filter(|t| task_matches(t, query, fuzzy_ratio))
            .collect();
        matches = hits.len();
        if state.search_active {
            shown = hits;
        }
    }

    sort_tasks(&mut shown, sort.active_order());
    View { tasks: shown, matches }
}

fn task_matches(task: &Task, query: &str, ratio: f64) -> bool {
    fuzzy_match(&task.text, query, ratio)
        || fuzzy_match(&task.description, query, ratio)
        || task.tags.iter().any(|tag| fuzzy_match(tag, query, ratio))
}

/// Case-insensitive substring, falling back to edit distance against the
/// whole candidate for queries longer than one character.
pub fn fuzzy_match(text: &str, query: &str, ratio: f64) -> bool {
    if query.is_empty() {
        return false;
    }
    let text = text.to_lowercase();
    let query = query.to_lowercase();
    let query_len = query.chars().count();
    if query_len <= 1 {
        return text.contains(&query);
    }
    if text.contains(&query) {
        return true;
    }
    let threshold = ((query_len as f64 * ratio).floor() as usize).max(1);
    levenshtein_distance(&text, &query) <= threshold
}

pub fn levenshtein_distance(left: &str, right: &str) -> usize {
    if left == right {
        return 0;
    }
    let right_chars: Vec<char> = right.chars().collect();
    if left.is_empty() {
        return right_chars.len();
    }
    if right_chars.is_empty() {
        return left.chars().count();
    }

    let mut previous: Vec<usize> = (0..=right_chars.len()).collect();
    let mut current = vec![0_usize; right_chars.len() + 1];
    for (left_index, left_char) in left.chars().enumerate() {
        current[0] = left_index + 1;
        for (right_index, right_char) in right_chars.iter().enumerate() {
            let cost = usize::from(left_char != *right_char);
            current[right_index + 1] = (current[right_index] + 1)
                .min(previous[right_index + 1] + 1)
                .min(previous[right_index] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right_chars.len()]
}

fn sort_tasks(tasks: &mut [&Task], order: ActiveOrder) {
    match order {
        ActiveOrder::Manual => {}
        ActiveOrder::Quick(QuickSort::Off, _) => {}
        ActiveOrder::Quick(QuickSort::Priority, _) => tasks.sort_by_key(|t| t.priority),
        ActiveOrder::Quick(QuickSort::Date, _) => tasks.sort_by(|a, b| b.created.cmp(&a.created)),
        ActiveOrder::Quick(QuickSort::Title, dir) => {
            tasks.sort_by(|a, b| directed(compare_titles(&a.text, &b.text), dir))
        }
        ActiveOrder::Column(SortKey::DueDate, dir) => tasks.sort_by(|a, b| {
            match (a.due_date, b.due_date) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) => directed(x.cmp(&y), dir),
            }
        }),
        ActiveOrder::Column(key, dir) => tasks.sort_by(|a, b| {
            let ord = match key {
                SortKey::Title => compare_titles(&a.text, &b.text),
                SortKey::Date => a.created.cmp(&b.created),
                SortKey::Priority => a.priority.cmp(&b.priority),
                SortKey::Status => a.completed.cmp(&b.completed),
                SortKey::DueDate => Ordering::Equal,
            };
            directed(ord, dir)
        }),
    }
}

fn directed(ord: Ordering, dir: Direction) -> Ordering {
    match dir {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    pub percent: u8,
}

impl Progress {
    pub fn of(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.completed).count();
        let percent = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            total,
            completed,
            active: total - completed,
            percent,
        }
    }
}

/// Byte ranges of case-insensitive literal occurrences of `query` in `text`.
pub fn highlight_spans(text: &str, query: &str) -> Vec<Range<usize>> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }
    match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.find_iter(text).map(|m| m.range()).collect(),
        Err(err) => {
            tracing::debug!(error = %err, "highlight pattern rejected");
            Vec::new()
        }
    }
}

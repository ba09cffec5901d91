use std::io::{self, IsTerminal, Write};
use std::ops::Range;

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Settings;
use crate::datetime::format_created;
use crate::sort::{SortKey, SortSpec};
use crate::view::{Progress, View, highlight_spans};

pub const EMPTY_STATE: &str = "No tasks here. Add a new one or change your filter!";

pub const SHORT_ID_LEN: usize = 8;

/// Leading characters of a task id, as shown in listings.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCell {
    pub key: SortKey,
    pub label: &'static str,
    /// `▲`, `▼`, or empty.
    pub indicator: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: String,
    pub title: String,
    pub title_highlights: Vec<Range<usize>>,
    pub description: String,
    pub description_highlights: Vec<Range<usize>>,
    pub tags: Vec<String>,
    pub created: String,
    pub due: Option<String>,
    pub priority: &'static str,
    pub status: &'static str,
    pub completed: bool,
    pub overdue: bool,
}

/// Everything a front end needs to draw the list, independent of how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub headers: Vec<HeaderCell>,
    pub rows: Vec<Row>,
    pub empty_message: Option<&'static str>,
    /// Present only while a query is entered.
    pub match_count: Option<usize>,
}

pub fn describe(view: &View<'_>, today: NaiveDate, query: &str, sort: &SortSpec) -> Description {
    let query = query.trim();
    let headers = SortKey::ALL
        .iter()
        .map(|key| HeaderCell {
            key: *key,
            label: key.header(),
            indicator: sort.indicator(*key),
        })
        .collect();

    let rows: Vec<Row> = view
        .tasks
        .iter()
        .map(|task| Row {
            id: task.id.clone(),
            title: task.text.clone(),
            title_highlights: highlight_spans(&task.text, query),
            description: task.description.clone(),
            description_highlights: highlight_spans(&task.description, query),
            tags: task.tags.clone(),
            created: format_created(task.created),
            due: task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
            priority: task.priority.label(),
            status: if task.completed { "Done" } else { "Active" },
            completed: task.completed,
            overdue: task.is_overdue(today),
        })
        .collect();

    Description {
        headers,
        empty_message: rows.is_empty().then_some(EMPTY_STATE),
        rows,
        match_count: (!query.is_empty()).then_some(view.matches),
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Color only when configured and stdout is a terminal.
    pub fn new(settings: &Settings) -> Self {
        Self {
            color: settings.color && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, description), fields(rows = description.rows.len()))]
    pub fn print_description(&self, description: &Description) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_description(&mut out, description)
    }

    pub fn write_description<W: Write>(
        &self,
        mut writer: W,
        description: &Description,
    ) -> anyhow::Result<()> {
        if let Some(count) = description.match_count {
            writeln!(writer, "{count} match(es)")?;
        }
        if let Some(message) = description.empty_message {
            writeln!(writer, "{message}")?;
            return Ok(());
        }

        let mut headers = vec!["ID".to_string()];
        headers.extend(description.headers.iter().map(|cell| {
            if cell.indicator.is_empty() {
                cell.label.to_string()
            } else {
                format!("{} {}", cell.label, cell.indicator)
            }
        }));
        headers.push("Tags".to_string());

        let mut rows = Vec::with_capacity(description.rows.len());
        for row in &description.rows {
            let id = short_id(&row.id);
            let mut title = self.mark(&row.title, &row.title_highlights);
            if !row.description.is_empty() {
                title = format!(
                    "{title} ({})",
                    self.mark(&row.description, &row.description_highlights)
                );
            }

            let due = row.due.clone().unwrap_or_else(|| "-".to_string());
            let due = if row.overdue { self.paint(&due, "31") } else { due };

            let status = if row.completed {
                self.paint(row.status, "2")
            } else {
                row.status.to_string()
            };

            let tags = row
                .tags
                .iter()
                .map(|tag| format!("#{tag}"))
                .collect::<Vec<_>>()
                .join(" ");

            rows.push(vec![
                self.paint(id, "33"),
                title,
                row.created.clone(),
                due,
                row.priority.to_string(),
                status,
                tags,
            ]);
        }

        write_table(&mut writer, headers, rows)
    }

    pub fn write_progress<W: Write>(&self, mut writer: W, progress: &Progress) -> anyhow::Result<()> {
        writeln!(
            writer,
            "{} of {} tasks done ({}%), {} active",
            progress.completed, progress.total, progress.percent, progress.active
        )?;
        Ok(())
    }

    fn mark(&self, text: &str, spans: &[Range<usize>]) -> String {
        if spans.is_empty() || !self.color {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in spans {
            let (Some(before), Some(hit)) = (text.get(cursor..span.start), text.get(span.clone()))
            else {
                continue;
            };
            out.push_str(before);
            out.push_str(&self.paint(hit, "7"));
            cursor = span.end;
        }
        out.push_str(text.get(cursor..).unwrap_or_default());
        out
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
            }
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    };

    writeln!(writer, "{}", line(&headers))?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(writer, "{}", line(&rule))?;
    for row in &rows {
        writeln!(writer, "{}", line(row))?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

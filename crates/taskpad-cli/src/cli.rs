use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use taskpad_core::{FilterMode, Priority, QuickSort, SortKey};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskpad",
    version,
    about = "Taskpad: a tagged task list with sorting, search and undo",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// One line of a batch file. Global flags only apply to the whole run.
#[derive(Parser, Debug, Clone)]
#[command(name = "batch", no_binary_name = true, disable_help_subcommand = true)]
pub struct BatchLine {
    #[command(subcommand)]
    pub command: Command,
}

/// Which slice of the collection a command looks at.
#[derive(Args, Debug, Clone, Default)]
pub struct ViewArgs {
    /// all, active, completed or priority-N
    #[arg(long, default_value = "all")]
    pub filter: FilterMode,

    #[arg(long)]
    pub tag: Option<String>,

    #[arg(long, short = 's')]
    pub search: Option<String>,

    /// Count matches for --search without hiding the others.
    #[arg(long)]
    pub no_search_filter: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task.
    Add {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// YYYY-MM-DD, today, tomorrow, +3d, +1w or a weekday name.
        #[arg(long)]
        due: Option<String>,
        #[arg(long, short = 'p', default_value_t = Priority::Medium)]
        priority: Priority,
        /// Comma-separated tags.
        #[arg(long, short = 't', default_value = "")]
        tags: String,
    },
    /// Show tasks.
    List {
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Toggle a task between done and active.
    Done { id: String },
    /// Change title, description, tags or priority of one task.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long, short = 'p')]
        priority: Option<Priority>,
    },
    Delete { id: String },
    /// Delete every task.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    Tags {
        #[command(subcommand)]
        command: Option<TagsCommand>,
    },
    Sort {
        #[command(subcommand)]
        command: Option<SortCommand>,
    },
    /// Move the listed tasks to the front of the visible set, in that order.
    Reorder {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },
    /// Write all tasks as JSON. `-` prints to stdout.
    Export {
        #[arg(default_value = "tasks-export.json")]
        path: PathBuf,
    },
    /// Replace all tasks with a JSON export. `-` reads stdin.
    Import { path: PathBuf },
    Stats,
    /// Current weather for a city or coordinates.
    Weather {
        #[arg(long, conflicts_with_all = ["lat", "lon"])]
        city: Option<String>,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Zero-based attempt number when retrying a failed lookup.
        #[arg(long, default_value_t = 0)]
        attempt: u32,
    },
    /// Run commands from a file, one per line, in a single session.
    /// `undo` and `redo` lines walk that session's history.
    Batch { path: PathBuf },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TagsCommand {
    /// Every registered tag with its count.
    List,
    /// Most used tags.
    Top,
    /// Completions for the last tag of a comma-separated input.
    Suggest { input: String },
    Rename { old: String, new: String },
    Delete { tag: String },
    /// Recount tags from the tasks themselves.
    Rebuild,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SortCommand {
    Show,
    /// Sort by a column; picking the active column again flips direction.
    Column { key: SortKey },
    /// Toggle a quick sort (priority, date or title).
    Quick { mode: QuickSort },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pull bare `rc.key=value` tokens out of the argument list.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some((k, v)) = s.strip_prefix("rc.").and_then(|rest| rest.split_once('=')) {
            debug!(key = %k, value = %v, "captured positional rc override");
            overrides.push((k.to_string(), v.to_string()));
            continue;
        }
        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}

/// Split one batch line into words. Double quotes group words; there is no
/// other escaping.
pub fn split_line(line: &str) -> anyhow::Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err(anyhow!("unterminated quote in: {line}"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_removed() {
        let pre = preprocess_args(&args(&["taskpad", "rc.color=off", "list"]));
        assert_eq!(pre.cleaned_args, args(&["taskpad", "list"]));
        assert_eq!(pre.rc_overrides, vec![("color".to_string(), "off".to_string())]);
    }

    #[test]
    fn parses_add_with_flags() {
        let cli = GlobalCli::try_parse_from([
            "taskpad", "--rc", "color=off", "add", "Buy", "milk", "-p", "high", "-t", "home, errands",
        ])
        .expect("parse");
        assert_eq!(cli.rc_overrides.len(), 1);
        match cli.command {
            Command::Add { text, priority, tags, due } => {
                assert_eq!(text.join(" "), "Buy milk");
                assert_eq!(priority, Priority::High);
                assert_eq!(tags, "home, errands");
                assert_eq!(due, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_view_flags() {
        let cli = GlobalCli::try_parse_from([
            "taskpad", "list", "--filter", "priority-1", "--tag", "work", "-s", "repot",
        ])
        .expect("parse");
        let Command::List { view } = cli.command else {
            panic!("expected list");
        };
        assert_eq!(view.filter, FilterMode::Priority(Priority::High));
        assert_eq!(view.tag.as_deref(), Some("work"));
        assert_eq!(view.search.as_deref(), Some("repot"));
        assert!(!view.no_search_filter);
    }

    #[test]
    fn batch_lines_honour_quotes() {
        assert_eq!(
            split_line(r#"add "Water the plants" -t "home, garden""#).expect("split"),
            vec!["add", "Water the plants", "-t", "home, garden"]
        );
        assert_eq!(split_line("  undo  ").expect("split"), vec!["undo"]);
        assert!(split_line(r#"add "oops"#).is_err());
    }
}

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use taskpad_core::datetime::parse_due_date;
use taskpad_core::render::{Renderer, short_id};
use taskpad_core::sort::ActiveOrder;
use taskpad_core::task::{sanitize_tag, tag_name};
use taskpad_core::{Config, FileStore, Priority, Settings, ViewState, Workspace};
use taskpad_weather::{
    LookupCoordinator, OpenWeatherClient, RetryPolicy, WeatherError, WeatherQuery, unit_symbol,
};
use tracing::{debug, info, instrument, warn};

use crate::cli::{
    self, BatchLine, Command, GlobalCli, SortCommand, TagsCommand, ViewArgs, split_line,
};

pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args);
    let cli = GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(verbose = cli.verbose, quiet = cli.quiet, "starting taskpad");
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = Config::load(cli.rc_file.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );
    let settings = Settings::from_config(&cfg).context("invalid configuration")?;

    let data_dir = settings.data_dir(cli.data.as_deref());
    let storage = FileStore::open(&data_dir)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;

    let renderer = Renderer::new(&settings);
    let mut ws = Workspace::open(Box::new(storage), settings, Utc::now())?;

    match cli.command {
        Command::Batch { path } => run_batch(&mut ws, &renderer, &path),
        command => dispatch(&mut ws, &renderer, command),
    }
}

#[instrument(skip(ws, renderer, command))]
pub fn dispatch(ws: &mut Workspace, renderer: &Renderer, command: Command) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            text,
            due,
            priority,
            tags,
        } => cmd_add(ws, &text.join(" "), due.as_deref(), priority, &tags, now),
        Command::List { view } => cmd_list(ws, renderer, view, now),
        Command::Done { id } => cmd_done(ws, &id),
        Command::Edit {
            id,
            title,
            description,
            tags,
            priority,
        } => cmd_edit(ws, &id, title, description, tags, priority),
        Command::Delete { id } => cmd_delete(ws, &id),
        Command::Clear { yes } => cmd_clear(ws, yes),
        Command::Tags { command } => cmd_tags(ws, command.unwrap_or(TagsCommand::List)),
        Command::Sort { command } => cmd_sort(ws, command.unwrap_or(SortCommand::Show)),
        Command::Reorder { view, ids } => cmd_reorder(ws, view, &ids),
        Command::Export { path } => cmd_export(ws, &path),
        Command::Import { path } => cmd_import(ws, &path, now),
        Command::Stats => cmd_stats(ws, renderer),
        Command::Weather {
            city,
            lat,
            lon,
            attempt,
        } => cmd_weather(ws.settings(), city, lat.zip(lon), attempt),
        Command::Batch { .. } => Err(anyhow!("batch files cannot run other batch files")),
    }
}

/// Run every line of `path` against one workspace so undo and redo reach
/// back through earlier lines.
#[instrument(skip(ws, renderer))]
fn run_batch(ws: &mut Workspace, renderer: &Renderer, path: &Path) -> anyhow::Result<()> {
    let script = fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;

    for (index, line) in script.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let words = split_line(trimmed).with_context(|| format!("batch line {line_no}"))?;
        debug!(line_no, ?words, "batch line");

        match words.first().map(String::as_str) {
            Some("undo") => {
                if ws.undo()? {
                    println!("Undid last change.");
                } else {
                    println!("Nothing to undo.");
                }
            }
            Some("redo") => {
                if ws.redo()? {
                    println!("Redid change.");
                } else {
                    println!("Nothing to redo.");
                }
            }
            _ => {
                let parsed = BatchLine::try_parse_from(&words)
                    .map_err(|err| anyhow!("batch line {line_no}: {err}"))?;
                dispatch(ws, renderer, parsed.command)
                    .with_context(|| format!("batch line {line_no}"))?;
            }
        }
    }
    Ok(())
}

#[instrument(skip(ws, text, tags, now))]
fn cmd_add(
    ws: &mut Workspace,
    text: &str,
    due: Option<&str>,
    priority: Priority,
    tags: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");
    let due_date = due.map(|expr| parse_due_date(expr, now)).transpose()?;
    let id = ws.add(text, due_date, priority, tags, now)?;
    println!("Created task {}.", short_id(&id));
    Ok(())
}

fn apply_view(ws: &mut Workspace, args: ViewArgs) {
    let search_active = args.search.is_some() && !args.no_search_filter;
    ws.view = ViewState {
        filter: args.filter,
        tag: args
            .tag
            .map(|tag| sanitize_tag(&tag))
            .filter(|tag| !tag.is_empty()),
        query: args.search.unwrap_or_default(),
        search_active,
    };
}

#[instrument(skip(ws, renderer, args, now))]
fn cmd_list(
    ws: &mut Workspace,
    renderer: &Renderer,
    args: ViewArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    apply_view(ws, args);
    let description = ws.describe(now);
    renderer.print_description(&description)?;
    renderer.write_progress(io::stdout().lock(), &ws.progress())
}

fn cmd_done(ws: &mut Workspace, raw_id: &str) -> anyhow::Result<()> {
    let id = ws.store().resolve_id(raw_id)?;
    let completed = ws.toggle_completed(&id)?;
    let verb = if completed { "Completed" } else { "Reopened" };
    println!("{verb} task {}.", short_id(&id));
    Ok(())
}

#[instrument(skip(ws, title, description, tags))]
fn cmd_edit(
    ws: &mut Workspace,
    raw_id: &str,
    title: Option<String>,
    description: Option<String>,
    tags: Option<String>,
    priority: Option<Priority>,
) -> anyhow::Result<()> {
    if title.is_none() && description.is_none() && tags.is_none() && priority.is_none() {
        bail!("nothing to change; pass --title, --description, --tags or --priority");
    }
    let id = ws.store().resolve_id(raw_id)?;

    if let Some(title) = title {
        ws.rename(&id, &title)?;
    }
    if let Some(description) = description {
        ws.set_description(&id, &description)?;
    }
    if let Some(tags) = tags {
        ws.set_tags(&id, &tags)?;
    }
    if let Some(priority) = priority {
        ws.set_priority(&id, priority)?;
    }
    println!("Modified task {}.", short_id(&id));
    Ok(())
}

fn cmd_delete(ws: &mut Workspace, raw_id: &str) -> anyhow::Result<()> {
    let id = ws.store().resolve_id(raw_id)?;
    let text = ws
        .store()
        .get(&id)
        .map(|task| task.text.clone())
        .unwrap_or_default();
    ws.remove(&id)?;
    println!("Deleted task {} '{text}'.", short_id(&id));
    Ok(())
}

fn cmd_clear(ws: &mut Workspace, yes: bool) -> anyhow::Result<()> {
    let count = ws.store().tasks().len();
    if count == 0 {
        println!("No tasks to delete.");
        return Ok(());
    }
    if !yes {
        bail!("refusing to delete {count} task(s) without --yes");
    }
    let removed = ws.clear_all()?;
    println!("Deleted {removed} task(s).");
    Ok(())
}

#[instrument(skip(ws))]
fn cmd_tags(ws: &mut Workspace, command: TagsCommand) -> anyhow::Result<()> {
    match command {
        TagsCommand::List => {
            let registry = ws.store().registry();
            if registry.is_empty() {
                println!("No tags.");
            }
            for (tag, count) in registry.iter() {
                println!("#{tag}\t{count}");
            }
        }
        TagsCommand::Top => {
            for (tag, count) in ws.popular_tags() {
                println!("#{tag}\t{count}");
            }
        }
        TagsCommand::Suggest { input } => {
            for tag in ws.tag_suggestions(&input) {
                println!("{tag}");
            }
        }
        TagsCommand::Rename { old, new } => {
            let (old, new) = (tag_name(&old)?, tag_name(&new)?);
            let touched = ws.rename_tag(&old, &new)?;
            println!("Renamed #{old} to #{new} on {touched} task(s).");
        }
        TagsCommand::Delete { tag } => {
            let tag = tag_name(&tag)?;
            let touched = ws.delete_tag(&tag)?;
            println!("Removed #{tag} from {touched} task(s).");
        }
        TagsCommand::Rebuild => {
            if ws.rebuild_tags()? {
                println!("Tag counts rebuilt.");
            } else {
                println!("Tag counts were already correct.");
            }
        }
    }
    Ok(())
}

#[instrument(skip(ws))]
fn cmd_sort(ws: &mut Workspace, command: SortCommand) -> anyhow::Result<()> {
    match command {
        SortCommand::Show => {}
        SortCommand::Column { key } => ws.click_column(key)?,
        SortCommand::Quick { mode } => ws.toggle_quick_sort(mode)?,
    }

    match ws.sort().active_order() {
        ActiveOrder::Quick(mode, direction) => {
            println!("Quick sort: {mode} {}", direction.arrow());
        }
        ActiveOrder::Column(key, direction) => {
            println!("Sorted by {} {}", key.header(), direction.arrow());
        }
        ActiveOrder::Manual => println!("Manual order"),
    }
    Ok(())
}

/// The named tasks go first, in the given order; the rest of the visible set
/// follows in its current order.
#[instrument(skip(ws, args, raw_ids))]
fn cmd_reorder(ws: &mut Workspace, args: ViewArgs, raw_ids: &[String]) -> anyhow::Result<()> {
    apply_view(ws, args);
    let visible = ws.view().ids();

    let mut ordered: Vec<String> = Vec::with_capacity(visible.len());
    for raw in raw_ids {
        let id = ws.store().resolve_id(raw)?;
        if !visible.contains(&id) {
            bail!("task {} is not in the current view", short_id(&id));
        }
        if ordered.contains(&id) {
            warn!(id = %short_id(&id), "task listed twice; keeping first position");
            continue;
        }
        ordered.push(id);
    }
    let picked = ordered.len();
    for id in visible {
        if !ordered.contains(&id) {
            ordered.push(id);
        }
    }

    let changed = ws.reorder(&ordered)?;
    if changed {
        println!("Reordered {picked} task(s); sorting is off until you pick one.");
    } else {
        println!("Order unchanged; sorting is off until you pick one.");
    }
    Ok(())
}

fn cmd_export(ws: &Workspace, path: &Path) -> anyhow::Result<()> {
    let json = ws.store().export_json()?;
    if path == Path::new("-") {
        println!("{json}");
        return Ok(());
    }
    fs::write(path, format!("{json}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "Exported {} task(s) to {}.",
        ws.store().tasks().len(),
        path.display()
    );
    Ok(())
}

#[instrument(skip(ws, now))]
fn cmd_import(ws: &mut Workspace, path: &Path, now: DateTime<Utc>) -> anyhow::Result<()> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    let count = ws.import_json(&text, now)?;
    println!("Imported {count} task(s).");
    Ok(())
}

fn cmd_stats(ws: &Workspace, renderer: &Renderer) -> anyhow::Result<()> {
    renderer.write_progress(io::stdout().lock(), &ws.progress())?;
    let popular = ws
        .popular_tags()
        .into_iter()
        .map(|(tag, count)| format!("#{tag} ({count})"))
        .collect::<Vec<_>>();
    if !popular.is_empty() {
        println!("Popular tags: {}", popular.join(", "));
    }
    Ok(())
}

#[instrument(skip(settings, city))]
fn cmd_weather(
    settings: &Settings,
    city: Option<String>,
    coords: Option<(f64, f64)>,
    attempt: u32,
) -> anyhow::Result<()> {
    let weather = &settings.weather;
    let client = OpenWeatherClient::new(weather.api_key.as_deref().unwrap_or_default(), &weather.units)
        .map_err(|err| weather_failure(&err, None))?;
    let coordinator = LookupCoordinator::new(
        client,
        Duration::from_millis(weather.timeout_ms),
        RetryPolicy {
            max_retries: weather.max_retries,
        },
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let outcome = runtime.block_on(async {
        match (city, coords) {
            (Some(city), _) => coordinator.lookup_city(&city, attempt).await,
            (None, Some((lat, lon))) => {
                coordinator
                    .lookup(WeatherQuery::Coords { lat, lon }, attempt)
                    .await
            }
            (None, None) => Err(WeatherError::EmptyQuery),
        }
    });

    match outcome {
        Ok(report) => {
            debug!(icon = %report.icon_url(), "weather icon");
            println!(
                "{}: {}{}, {}",
                report.location,
                report.rounded_temperature(),
                unit_symbol(&weather.units),
                report.description
            );
            Ok(())
        }
        Err(err) => {
            let next = coordinator.can_retry(&err, attempt).then_some(attempt + 1);
            Err(weather_failure(&err, next))
        }
    }
}

fn weather_failure(err: &WeatherError, next_attempt: Option<u32>) -> anyhow::Error {
    warn!(error = %err, "weather lookup failed");
    let message = err.user_message().unwrap_or_else(|| err.to_string());
    match next_attempt {
        Some(next) => anyhow!("{message} Retry with --attempt {next}."),
        None => anyhow!(message),
    }
}

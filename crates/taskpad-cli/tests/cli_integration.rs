use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

fn taskpad(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskpad"))
        .arg("--data")
        .arg(data_dir)
        .args(args)
        .env("TASKPADRC", "/dev/null")
        .env("TASKPAD_TIMEZONE", "UTC")
        .env_remove("TASKPAD_WEATHER_KEY")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("run taskpad")
}

fn ok(data_dir: &Path, args: &[&str]) -> String {
    let output = taskpad(data_dir, args);
    assert!(
        output.status.success(),
        "taskpad {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn exported(data_dir: &Path) -> Vec<Value> {
    let raw = ok(data_dir, &["export", "-"]);
    serde_json::from_str(&raw).expect("export is JSON")
}

fn titles(tasks: &[Value]) -> Vec<&str> {
    tasks
        .iter()
        .map(|t| t["text"].as_str().expect("text"))
        .collect()
}

#[test]
fn add_list_and_complete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = ok(dir.path(), &["add", "Water", "the", "plants", "-t", "Home, garden", "-p", "high"]);
    assert!(out.starts_with("Created task "));

    let tasks = exported(dir.path());
    assert_eq!(titles(&tasks), vec!["Water the plants"]);
    assert_eq!(tasks[0]["tags"], serde_json::json!(["home", "garden"]));
    assert_eq!(tasks[0]["priority"], 1);

    let id = tasks[0]["id"].as_str().expect("id");
    ok(dir.path(), &["done", &id[..8]]);

    let listed = ok(dir.path(), &["--rc", "color=off", "list", "--filter", "completed"]);
    assert!(listed.contains("Water the plants"));
    assert!(listed.contains("Done"));
    assert!(listed.contains("1 of 1 tasks done (100%)"));

    let active = ok(dir.path(), &["list", "--filter", "active"]);
    assert!(active.contains("No tasks here."));
}

#[test]
fn validation_errors_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");

    let short = taskpad(dir.path(), &["add", "ab"]);
    assert!(!short.status.success());
    assert!(String::from_utf8_lossy(&short.stderr).contains("at least 3 characters"));

    let past = taskpad(dir.path(), &["add", "File taxes", "--due", "2000-01-01"]);
    assert!(!past.status.success());
    assert!(String::from_utf8_lossy(&past.stderr).contains("cannot be in the past"));

    assert!(exported(dir.path()).is_empty());
}

#[test]
fn clear_requires_confirmation() {
    let dir = tempfile::tempdir().expect("tempdir");
    ok(dir.path(), &["add", "Call the bank"]);

    let refused = taskpad(dir.path(), &["clear"]);
    assert!(!refused.status.success());
    assert!(String::from_utf8_lossy(&refused.stderr).contains("--yes"));
    assert_eq!(exported(dir.path()).len(), 1);

    ok(dir.path(), &["clear", "--yes"]);
    assert!(exported(dir.path()).is_empty());
    assert!(ok(dir.path(), &["tags"]).contains("No tags."));
}

#[test]
fn batch_undo_and_redo_walk_one_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("session.txt");
    std::fs::write(
        &script,
        "# morning\n\
         add \"Buy milk\" -t errands\n\
         add \"Book dentist\" -t health\n\
         undo\n\
         undo\n\
         redo\n",
    )
    .expect("write script");

    let out = ok(dir.path(), &["batch", script.to_str().expect("utf8 path")]);
    assert_eq!(out.matches("Undid last change.").count(), 2);
    assert!(out.contains("Redid change."));

    let tasks = exported(dir.path());
    assert_eq!(titles(&tasks), vec!["Buy milk"]);
    let tags = ok(dir.path(), &["tags"]);
    assert!(tags.contains("#errands\t1"));
    assert!(!tags.contains("health"));
}

#[test]
fn reorder_switches_to_manual_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    for title in ["alpha task", "bravo task", "charlie task"] {
        ok(dir.path(), &["add", title]);
    }
    let tasks = exported(dir.path());
    let charlie = tasks[2]["id"].as_str().expect("id").to_string();

    ok(dir.path(), &["sort", "column", "priority"]);
    ok(dir.path(), &["reorder", &charlie]);

    let tasks = exported(dir.path());
    assert_eq!(titles(&tasks), vec!["charlie task", "alpha task", "bravo task"]);
    assert!(ok(dir.path(), &["sort"]).contains("Manual order"));
}

#[test]
fn reorder_counts_each_task_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    ok(dir.path(), &["add", "alpha task"]);
    ok(dir.path(), &["add", "bravo task"]);
    let tasks = exported(dir.path());
    let bravo = tasks[1]["id"].as_str().expect("id").to_string();

    let out = ok(dir.path(), &["reorder", &bravo, &bravo[..8]]);
    assert!(out.contains("Reordered 1 task(s)"), "unexpected output: {out}");
    assert_eq!(titles(&exported(dir.path())), vec!["bravo task", "alpha task"]);
}

#[test]
fn tag_rename_merges_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    ok(dir.path(), &["add", "Fix bike", "-t", "chores"]);
    ok(dir.path(), &["add", "Mow lawn", "-t", "chores, yard"]);

    let out = ok(dir.path(), &["tags", "rename", "chores", "yard"]);
    assert!(out.contains("on 2 task(s)"));

    let tags = ok(dir.path(), &["tags"]);
    assert!(tags.contains("#yard\t2"));
    assert!(!tags.contains("chores"));
}

#[test]
fn weather_without_key_explains_setup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = taskpad(dir.path(), &["weather", "--city", "Oslo"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("No weather API key configured"));
}

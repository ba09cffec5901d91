use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::view::DEFAULT_FUZZY_RATIO;

const RC_ENV_VAR: &str = "TASKPADRC";
const RC_FILE_NAME: &str = ".taskpadrc";
const WEATHER_KEY_ENV_VAR: &str =
  "TASKPAD_WEATHER_KEY";
const DEFAULT_DATA_LOCATION: &str =
  "~/.taskpad";

/// Every key the rc chain may set. Anything
/// else is reported and dropped.
const KNOWN_KEYS: &[&str] = &[
  "data.location",
  "search.fuzzy_ratio",
  "tags.popular",
  "tags.suggestions",
  "history.limit",
  "color",
  "weather.api_key",
  "weather.timeout_ms",
  "weather.max_retries",
  "weather.units"
];

/// Raw `key=value` pairs gathered from the rc
/// chain and the command line. Only
/// [`Settings`] reads them.
#[derive(Debug, Clone, Default)]
pub struct Config {
  values:           HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

/// A non-blank, non-comment rc line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RcLine {
  Include(String),
  Set(String, String)
}

impl Config {
  /// Read `rc_override`, else `$TASKPADRC`,
  /// else `~/.taskpadrc` when present.
  #[tracing::instrument]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();
    match rc_location(rc_override) {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.read_rc(&path)?;
      }
      | None => {
        debug!("no rc file; using defaults")
      }
    }
    Ok(cfg)
  }

  /// `rc.`-prefixed or bare keys, applied
  /// after every file.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      let key = key
        .strip_prefix("rc.")
        .unwrap_or(&key)
        .trim()
        .to_string();
      self.set(key, value, "command line");
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  fn parsed_or<T>(
    &self,
    key: &str,
    default: T
  ) -> anyhow::Result<T>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    let Some(raw) = self.get(key) else {
      return Ok(default);
    };
    raw.trim().parse::<T>().map_err(|err| {
      anyhow!(
        "invalid value for {key}: {raw:?} \
         ({err})"
      )
    })
  }

  fn set(
    &mut self,
    key: String,
    value: String,
    origin: &str
  ) {
    if !KNOWN_KEYS.contains(&key.as_str()) {
      warn!(key = %key, origin, "unknown setting; ignored");
      return;
    }
    trace!(key = %key, value = %value, origin, "setting");
    self.values.insert(key, value.trim().to_string());
  }

  #[tracing::instrument(skip(self))]
  fn read_rc(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path) {
      warn!(file = %path.display(), "rc file included twice; skipping");
      return Ok(());
    }
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    self.loaded_files.push(path.clone());

    let origin = path.display().to_string();
    for (idx, raw) in text.lines().enumerate()
    {
      let line = parse_rc_line(raw)
        .with_context(|| {
          format!("{origin}:{}", idx + 1)
        })?;
      match line {
        | None => {}
        | Some(RcLine::Set(key, value)) => {
          self.set(key, value, &origin)
        }
        | Some(RcLine::Include(target)) => {
          let target =
            include_target(&path, &target);
          if target.exists() {
            self.read_rc(&target)?;
          } else {
            warn!(include = %target.display(), "included rc file missing; skipping");
          }
        }
      }
    }
    Ok(())
  }
}

/// Everything the workspace and front end
/// read from configuration, validated once.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
  pub data_location:   PathBuf,
  pub fuzzy_ratio:     f64,
  pub popular_tags:    usize,
  pub tag_suggestions: usize,
  pub history_limit:   usize,
  pub color:           bool,
  pub weather:         WeatherSettings
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherSettings {
  pub api_key:     Option<String>,
  pub timeout_ms:  u64,
  pub max_retries: u32,
  pub units:       String
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      data_location:   expand_tilde(
        Path::new(DEFAULT_DATA_LOCATION)
      ),
      fuzzy_ratio:     DEFAULT_FUZZY_RATIO,
      popular_tags:    8,
      tag_suggestions: 8,
      history_limit:   DEFAULT_HISTORY_LIMIT,
      color:           true,
      weather:         WeatherSettings {
        api_key:     None,
        timeout_ms:  8000,
        max_retries: 3,
        units:       "metric".to_string()
      }
    }
  }
}

impl Settings {
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let d = Settings::default();

    let fuzzy_ratio = cfg.parsed_or(
      "search.fuzzy_ratio",
      d.fuzzy_ratio
    )?;
    if !(0.0..=1.0).contains(&fuzzy_ratio) {
      bail!(
        "search.fuzzy_ratio must be between \
         0 and 1, got {fuzzy_ratio}"
      );
    }

    let color = match cfg.get("color") {
      | Some(raw) => switch("color", raw)?,
      | None => d.color
    };

    let units = cfg
      .get("weather.units")
      .map(str::to_ascii_lowercase)
      .unwrap_or(d.weather.units);
    if !matches!(
      units.as_str(),
      "metric" | "imperial" | "standard"
    ) {
      bail!(
        "weather.units must be metric, \
         imperial or standard, got {units:?}"
      );
    }

    let api_key = std::env::var(
      WEATHER_KEY_ENV_VAR
    )
    .ok()
    .or_else(|| {
      cfg.get("weather.api_key").map(str::to_string)
    })
    .map(|k| k.trim().to_string())
    .filter(|k| !k.is_empty());

    Ok(Self {
      data_location: cfg
        .get("data.location")
        .map(|raw| expand_tilde(Path::new(raw)))
        .unwrap_or(d.data_location),
      fuzzy_ratio,
      popular_tags: cfg
        .parsed_or("tags.popular", d.popular_tags)?,
      tag_suggestions: cfg.parsed_or(
        "tags.suggestions",
        d.tag_suggestions
      )?,
      history_limit: cfg
        .parsed_or("history.limit", d.history_limit)?,
      color,
      weather: WeatherSettings {
        api_key,
        timeout_ms: cfg.parsed_or(
          "weather.timeout_ms",
          d.weather.timeout_ms
        )?,
        max_retries: cfg.parsed_or(
          "weather.max_retries",
          d.weather.max_retries
        )?,
        units
      }
    })
  }

  /// `--data` wins over `data.location`.
  pub fn data_dir(
    &self,
    override_dir: Option<&Path>
  ) -> PathBuf {
    override_dir
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        self.data_location.clone()
      })
  }
}

fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }
  if let Some(target) =
    line.strip_prefix("include ")
  {
    let target = target.trim();
    if target.is_empty() {
      bail!("include needs a path");
    }
    return Ok(Some(RcLine::Include(
      target.to_string()
    )));
  }
  let (key, value) =
    line.split_once('=').ok_or_else(|| {
      anyhow!("expected key=value, got {raw:?}")
    })?;
  Ok(Some(RcLine::Set(
    key.trim().to_string(),
    value.trim().to_string()
  )))
}

/// Relative includes resolve against the
/// including file's directory.
fn include_target(
  from: &Path,
  target: &str
) -> PathBuf {
  let target = expand_tilde(Path::new(target));
  match from.parent() {
    | Some(dir) if target.is_relative() => {
      dir.join(target)
    }
    | _ => target
  }
}

fn rc_location(
  rc_override: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = rc_override {
    return Some(path.to_path_buf());
  }
  match std::env::var_os(RC_ENV_VAR) {
    | Some(env) if env == "/dev/null" => None,
    | Some(env) => Some(PathBuf::from(env)),
    | None => dirs::home_dir()
      .map(|home| home.join(RC_FILE_NAME))
      .filter(|path| path.exists())
  }
}

fn expand_tilde(path: &Path) -> PathBuf {
  match (
    path.to_str().and_then(|s| {
      s.strip_prefix("~/")
    }),
    dirs::home_dir()
  ) {
    | (Some(rest), Some(home)) => {
      home.join(rest)
    }
    | _ => path.to_path_buf()
  }
}

fn switch(
  key: &str,
  raw: &str
) -> anyhow::Result<bool> {
  match raw.trim().to_ascii_lowercase().as_str()
  {
    | "on" | "yes" | "true" | "1" => Ok(true),
    | "off" | "no" | "false" | "0" => Ok(false),
    | other => {
      bail!(
        "invalid value for {key}: {other:?} \
         (expected on or off)"
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::Path;

  use super::{
    Config,
    RcLine,
    Settings,
    include_target,
    parse_rc_line
  };

  #[test]
  fn defaults_cover_every_setting() {
    let settings =
      Settings::from_config(&Config::default())
        .expect("settings");
    assert_eq!(settings, Settings {
      weather: settings.weather.clone(),
      ..Settings::default()
    });
    assert_eq!(settings.popular_tags, 8);
    assert_eq!(settings.history_limit, 20);
    assert!(settings.color);
    assert_eq!(settings.weather.units, "metric");
  }

  #[test]
  fn rc_lines_split_into_settings_and_includes()
  {
    assert_eq!(parse_rc_line("  # note").expect("comment"), None);
    assert_eq!(
      parse_rc_line("color = off # quiet")
        .expect("setting"),
      Some(RcLine::Set(
        "color".to_string(),
        "off".to_string()
      ))
    );
    assert_eq!(
      parse_rc_line("include ~/more.rc")
        .expect("include"),
      Some(RcLine::Include(
        "~/more.rc".to_string()
      ))
    );
    assert!(parse_rc_line("include   ").is_err());
    assert!(parse_rc_line("just words").is_err());
  }

  #[test]
  fn relative_includes_follow_the_including_file()
  {
    assert_eq!(
      include_target(
        Path::new("/etc/taskpad/rc"),
        "extra"
      ),
      Path::new("/etc/taskpad/extra")
    );
    assert_eq!(
      include_target(
        Path::new("/etc/taskpad/rc"),
        "/opt/rc"
      ),
      Path::new("/opt/rc")
    );
  }

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let temp =
      tempfile::tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra"),
      "tags.popular = 3\nmystery=1\n"
    )
    .expect("write extra");
    let rc = temp.path().join("rc");
    fs::write(
      &rc,
      "# comment\ncolor=off  # trailing\n\
       include extra\ninclude extra\n\
       history.limit=5\n"
    )
    .expect("write rc");

    let mut cfg =
      Config::load(Some(&rc)).expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(cfg.get("mystery"), None);
    cfg.apply_overrides([(
      "rc.history.limit".to_string(),
      "7".to_string()
    )]);

    let settings = Settings::from_config(&cfg)
      .expect("settings");
    assert!(!settings.color);
    assert_eq!(settings.popular_tags, 3);
    assert_eq!(settings.history_limit, 7);
  }

  #[test]
  fn data_flag_beats_configured_location() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "data.location".to_string(),
      "/srv/tasks".to_string()
    )]);
    let settings = Settings::from_config(&cfg)
      .expect("settings");
    assert_eq!(
      settings.data_dir(None),
      Path::new("/srv/tasks")
    );
    assert_eq!(
      settings
        .data_dir(Some(Path::new("/tmp/t"))),
      Path::new("/tmp/t")
    );
  }

  #[test]
  fn rejects_malformed_lines_and_values()
  {
    let temp =
      tempfile::tempdir().expect("tempdir");
    let rc = temp.path().join("rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    let err =
      Config::load(Some(&rc)).expect_err("bad line");
    assert!(format!("{err:#}").contains(":1"));

    for (key, value) in [
      ("search.fuzzy_ratio", "lots"),
      ("search.fuzzy_ratio", "1.5"),
      ("color", "sometimes"),
      ("weather.units", "kelvin")
    ] {
      let mut cfg = Config::default();
      cfg.apply_overrides([(
        key.to_string(),
        value.to_string()
      )]);
      assert!(
        Settings::from_config(&cfg).is_err(),
        "{key}={value} should be rejected"
      );
    }
  }
}

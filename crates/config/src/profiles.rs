//! Avatar profile loading.
//!
//! One TOML file per avatar in the profiles directory; the file stem is the
//! avatar id. A profile that fails to parse or validate is excluded with an
//! error log and the rest still load.

use aicrew_core::avatar::{ActiveWindow, AvatarProfile, ConnectorSpec, MAX_SCHEDULE_SECS, ScheduleSpec};
use aicrew_core::provider::ModelOptions;
use serde::Deserialize;
use std::path::Path;
use tracing::{error, info, warn};

use crate::{AppConfig, ConfigError};

/// What the rest of the system offers, for cross-checking profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileContext {
    /// Names in the tool registry
    pub known_tools: Vec<String>,

    /// Backends the model gateway can reach
    pub known_backends: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    name: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    tools: Vec<String>,
    backend: Option<String>,
    model: Option<String>,
    #[serde(default)]
    options: OptionsFile,
    history_limit: Option<usize>,
    #[serde(default = "default_true")]
    rag: bool,
    schedule: Option<ScheduleFile>,
    #[serde(default)]
    active_windows: Vec<ActiveWindow>,
    #[serde(default)]
    connectors: Vec<ConnectorSpec>,
    #[serde(default)]
    topics: Vec<String>,
    escalate_to: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct OptionsFile {
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ScheduleFile {
    every_minutes: Option<u64>,
    jitter_seconds: Option<u64>,
    cron: Option<String>,
}

/// Load every profile in `config.avatar.profiles_dir`, sorted by id.
///
/// Only an unreadable directory is an error; bad individual profiles are
/// logged and skipped.
pub fn load_profiles(config: &AppConfig, ctx: &ProfileContext) -> Result<Vec<AvatarProfile>, ConfigError> {
    let dir = &config.avatar.profiles_dir;
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::ReadError {
        path: dir.clone(),
        reason: e.to_string(),
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
        })
        .collect();
    paths.sort();

    let mut profiles = Vec::new();
    for path in paths {
        match load_profile(&path, config, ctx) {
            Ok(profile) => {
                info!(avatar = %profile.id, name = %profile.name, "Loaded avatar profile");
                profiles.push(profile);
            }
            Err(e) => error!(path = %path.display(), error = %e, "Avatar profile excluded"),
        }
    }

    let ids: Vec<String> = profiles.iter().map(|p| p.id.clone()).collect();
    for profile in &mut profiles {
        if let Some(target) = &profile.escalate_to
            && (!ids.contains(target) || target == &profile.id)
        {
            warn!(avatar = %profile.id, escalate_to = %target, "Unknown escalation target, cleared");
            profile.escalate_to = None;
        }
    }

    Ok(profiles)
}

/// Parse and validate a single profile file.
pub fn load_profile(path: &Path, config: &AppConfig, ctx: &ProfileContext) -> Result<AvatarProfile, ConfigError> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::ValidationError(format!("bad profile file name: {}", path.display())))?
        .to_string();

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let file: ProfileFile = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    resolve(id, file, config, ctx)
}

fn resolve(id: String, file: ProfileFile, config: &AppConfig, ctx: &ProfileContext) -> Result<AvatarProfile, ConfigError> {
    let invalid = |msg: String| ConfigError::ValidationError(format!("avatar '{id}': {msg}"));

    if file.name.trim().is_empty() {
        return Err(invalid("name must not be empty".into()));
    }

    let backend = file.backend.unwrap_or_else(|| config.llm.default_backend.clone());
    if !ctx.known_backends.is_empty() && !ctx.known_backends.contains(&backend) {
        return Err(invalid(format!("unknown backend '{backend}'")));
    }

    let options = ModelOptions {
        temperature: file.options.temperature.unwrap_or(config.llm.temperature),
        max_tokens: file.options.max_tokens.or(config.llm.max_tokens),
    };
    if !(0.0..=2.0).contains(&options.temperature) {
        return Err(invalid("options.temperature must be between 0.0 and 2.0".into()));
    }

    let interval = |every_minutes: Option<u64>, jitter_seconds: Option<u64>| -> Result<ScheduleSpec, ConfigError> {
        let every_secs = every_minutes
            .unwrap_or(config.scheduler.default_interval_minutes)
            .checked_mul(60)
            .filter(|secs| *secs <= MAX_SCHEDULE_SECS)
            .ok_or_else(|| invalid(format!("schedule interval must not exceed {} minutes", MAX_SCHEDULE_SECS / 60)))?;
        let jitter_secs = jitter_seconds.unwrap_or(config.scheduler.default_jitter_seconds);
        if jitter_secs > MAX_SCHEDULE_SECS {
            return Err(invalid(format!("schedule jitter must not exceed {MAX_SCHEDULE_SECS} seconds")));
        }
        Ok(ScheduleSpec::Interval { every_secs, jitter_secs })
    };
    let schedule = match file.schedule {
        Some(ScheduleFile { cron: Some(_), every_minutes: Some(_), .. }) => {
            return Err(invalid("schedule takes either cron or every_minutes, not both".into()));
        }
        Some(ScheduleFile { cron: Some(expression), .. }) => ScheduleSpec::Cron { expression },
        Some(ScheduleFile { every_minutes, jitter_seconds, .. }) => interval(every_minutes, jitter_seconds)?,
        None => interval(None, None)?,
    };
    if let ScheduleSpec::Interval { every_secs: 0, .. } = schedule {
        return Err(invalid("schedule interval must be positive".into()));
    }

    for window in &file.active_windows {
        if window.days.iter().any(|d| *d > 6) {
            return Err(invalid("active window days must be 0 (Mon) through 6 (Sun)".into()));
        }
        if window.start_hour >= window.end_hour || window.end_hour > 24 {
            return Err(invalid("active window needs start_hour < end_hour <= 24".into()));
        }
    }

    let mut tools = Vec::new();
    for tool in file.tools {
        if !ctx.known_tools.contains(&tool) {
            warn!(avatar = %id, tool = %tool, "Unregistered tool removed from profile");
        } else if !tools.contains(&tool) {
            tools.push(tool);
        }
    }

    Ok(AvatarProfile {
        id: id.clone(),
        name: file.name,
        personality: file.personality,
        skills: file.skills,
        tools,
        backend,
        model: file.model.unwrap_or_else(|| config.llm.default_model.clone()),
        options,
        history_limit: file.history_limit.unwrap_or(config.avatar.default_history_limit),
        rag: file.rag,
        schedule,
        active_windows: file.active_windows,
        connectors: file.connectors,
        topics: file.topics,
        escalate_to: file.escalate_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx() -> ProfileContext {
        ProfileContext {
            known_tools: vec!["calculator".into(), "web_search".into()],
            known_backends: vec!["ollama".into(), "openai".into()],
        }
    }

    fn config_for(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.avatar.profiles_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn loads_profile_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("alice.toml"),
            r#"
name = "Alice"
personality = "Friendly support engineer"
skills = ["rust", "networking"]
tools = ["calculator", "teleport", "calculator"]
history_limit = 2

[[connectors]]
kind = "inbox"
capacity = 10
"#,
        )
        .unwrap();

        let profiles = load_profiles(&config_for(dir.path()), &ctx()).unwrap();
        assert_eq!(profiles.len(), 1);
        let alice = &profiles[0];
        assert_eq!(alice.id, "alice");
        assert_eq!(alice.tools, vec!["calculator".to_string()]);
        assert_eq!(alice.backend, "ollama");
        assert_eq!(alice.model, "llama3:8b");
        assert_eq!(alice.history_limit, 2);
        assert!(alice.rag);
        assert_eq!(alice.schedule, ScheduleSpec::Interval { every_secs: 240, jitter_secs: 120 });
        assert_eq!(alice.connectors[0].kind, "inbox");
        assert_eq!(alice.connectors[0].settings["capacity"], 10);
    }

    #[test]
    fn bad_profiles_are_excluded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.toml"), "name = \"Good\"\n").unwrap();
        fs::write(dir.path().join("broken.toml"), "name = \n").unwrap();
        fs::write(dir.path().join("nobackend.toml"), "name = \"X\"\nbackend = \"nowhere\"\n").unwrap();
        fs::write(
            dir.path().join("window.toml"),
            "name = \"W\"\n[[active_windows]]\ndays = [7]\n",
        )
        .unwrap();
        fs::write(dir.path().join(".hidden.toml"), "name = \"Hidden\"\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();

        let profiles = load_profiles(&config_for(dir.path()), &ctx()).unwrap();
        let ids: Vec<&str> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["good"]);
    }

    #[test]
    fn cron_schedule_and_windows() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("bob.toml"),
            r#"
name = "Bob"
rag = false
topics = ["item_ignored"]

[schedule]
cron = "*/5 * * * *"

[[active_windows]]
days = [0, 1, 2, 3, 4]
start_hour = 8
end_hour = 18
"#,
        )
        .unwrap();

        let profiles = load_profiles(&config_for(dir.path()), &ctx()).unwrap();
        let bob = &profiles[0];
        assert!(!bob.rag);
        assert_eq!(bob.schedule, ScheduleSpec::Cron { expression: "*/5 * * * *".into() });
        assert_eq!(bob.active_windows[0].end_hour, 18);
        assert_eq!(bob.topics, vec!["item_ignored".to_string()]);
    }

    #[test]
    fn unknown_escalation_target_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.toml"), "name = \"A\"\nescalate_to = \"b\"\n").unwrap();
        fs::write(dir.path().join("b.toml"), "name = \"B\"\nescalate_to = \"ghost\"\n").unwrap();

        let profiles = load_profiles(&config_for(dir.path()), &ctx()).unwrap();
        assert_eq!(profiles[0].escalate_to.as_deref(), Some("b"));
        assert_eq!(profiles[1].escalate_to, None);
    }

    #[test]
    fn oversized_schedule_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.toml"), "name = \"Ok\"\n[schedule]\nevery_minutes = 60\n").unwrap();
        fs::write(
            dir.path().join("huge.toml"),
            "name = \"Huge\"\n[schedule]\nevery_minutes = 1000000000000000\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("jitter.toml"),
            "name = \"Jitter\"\n[schedule]\njitter_seconds = 9223372036854775807\n",
        )
        .unwrap();

        let config = config_for(dir.path());
        let err = load_profile(&dir.path().join("huge.toml"), &config, &ctx()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("interval")), "{err}");
        assert!(load_profile(&dir.path().join("jitter.toml"), &config, &ctx()).is_err());

        let profiles = load_profiles(&config, &ctx()).unwrap();
        let ids: Vec<&str> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let config = config_for(Path::new("/nonexistent/profiles"));
        assert!(load_profiles(&config, &ctx()).is_err());
    }
}

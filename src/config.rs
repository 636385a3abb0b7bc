use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::editor::EditorCommand;
use crate::error::SessionError;
use crate::store::{ConnectOptions, TableBinding};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection and watcher settings that may come from the command line or
/// a defaults file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigFlags {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl ConfigFlags {
    /// Merge `other` over `self`; values set in `other` win.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            host: other.host.clone().or_else(|| self.host.clone()),
            port: other.port.or(self.port),
            user: other.user.clone().or_else(|| self.user.clone()),
            password: other.password.clone().or_else(|| self.password.clone()),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let defaults = ConnectOptions::default();
        ConnectOptions {
            host: self.host.clone().unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            user: self.user.clone().unwrap_or(defaults.user),
            password: self.password.clone().unwrap_or(defaults.password),
            timeout: self
                .connect_timeout_secs
                .map_or(defaults.timeout, Duration::from_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .filter(|&ms| ms > 0)
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis)
    }
}

pub fn global_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("redit").join("config");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("redit")
                .join("config");
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("redit").join("config");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config").join("redit").join("config");
        }
    }

    PathBuf::from(".reditrc")
}

pub fn local_override_path() -> PathBuf {
    PathBuf::from(".reditrc")
}

pub fn load_config_flags(path: &Path) -> Result<ConfigFlags> {
    if !path.exists() {
        return Ok(ConfigFlags::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let tokens = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split_whitespace().map(ToOwned::to_owned))
        .collect::<Vec<_>>();
    Ok(parse_flag_tokens(&tokens))
}

pub fn save_config_flags(path: &Path, flags: &ConfigFlags) -> Result<()> {
    let mut lines = Vec::new();
    lines.push("# redit defaults (saved with --save)".to_string());
    if let Some(host) = &flags.host {
        lines.push(format!("--host {host}"));
    }
    if let Some(port) = flags.port {
        lines.push(format!("--port {port}"));
    }
    if let Some(user) = &flags.user {
        lines.push(format!("--user {user}"));
    }
    if let Some(password) = &flags.password {
        lines.push(format!("--password {password}"));
    }
    if let Some(secs) = flags.connect_timeout_secs {
        lines.push(format!("--connect-timeout {secs}"));
    }
    if let Some(ms) = flags.poll_interval_ms {
        lines.push(format!("--poll-interval {ms}"));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", lines.join("\n")))
        .with_context(|| format!("Failed to write config {}", path.display()))
}

pub fn clear_config_flags(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Pick the known flags out of a token list; everything else is ignored.
/// Accepts both `--flag value` and `--flag=value`.
pub fn parse_flag_tokens(tokens: &[String]) -> ConfigFlags {
    let mut flags = ConfigFlags::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        let (name, inline) = match token.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value.to_string())),
            _ => (token, None),
        };
        if matches!(
            name,
            "--host" | "--port" | "--user" | "--password" | "--connect-timeout" | "--poll-interval"
        ) {
            let value = inline.or_else(|| {
                let next = tokens.get(i + 1).cloned();
                if next.is_some() {
                    i += 1;
                }
                next
            });
            if let Some(value) = value {
                apply_flag(&mut flags, name, value);
            }
        }
        i += 1;
    }
    flags
}

fn apply_flag(flags: &mut ConfigFlags, name: &str, value: String) {
    match name {
        "--host" => flags.host = Some(value),
        "--port" => flags.port = value.parse().ok(),
        "--user" => flags.user = Some(value),
        "--password" => flags.password = Some(value),
        "--connect-timeout" => flags.connect_timeout_secs = value.parse().ok(),
        "--poll-interval" => flags.poll_interval_ms = value.parse().ok(),
        _ => {}
    }
}

/// Raw inputs gathered from the command line, environment and defaults files.
#[derive(Debug, Default, Clone)]
pub struct SessionInputs {
    pub database: Option<String>,
    pub table: Option<String>,
    pub record_id: Option<String>,
    pub editor: Option<String>,
    pub flags: ConfigFlags,
}

/// Everything a session needs, checked.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub binding: TableBinding,
    pub record_id: Option<String>,
    pub editor: EditorCommand,
    pub connect: ConnectOptions,
    pub poll_interval: Duration,
}

impl SessionInputs {
    /// Check the required inputs are present and non-blank.
    ///
    /// # Errors
    /// Returns [`SessionError::Usage`] for a missing database, table or
    /// blank record id, and [`SessionError::MissingEditor`] when no editor
    /// command is configured.
    pub fn validate(self) -> Result<SessionConfig, SessionError> {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let database = present(self.database).ok_or(SessionError::Usage)?;
        let table = present(self.table).ok_or(SessionError::Usage)?;
        let record_id = match self.record_id {
            Some(id) if id.trim().is_empty() => return Err(SessionError::Usage),
            other => other,
        };
        let editor = self
            .editor
            .as_deref()
            .and_then(EditorCommand::parse)
            .ok_or(SessionError::MissingEditor)?;

        Ok(SessionConfig {
            binding: TableBinding::new(database, table),
            record_id,
            editor,
            connect: self.flags.connect_options(),
            poll_interval: self.flags.poll_interval(),
        })
    }
}

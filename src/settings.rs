//! Worker settings, handed over on the command line by the supervisor.

use std::os::unix::io::RawFd;

use thiserror::Error;

/// Default file descriptors for the channel, inherited from the supervisor.
const DEFAULT_READ_FD: RawFd = 3;
const DEFAULT_WRITE_FD: RawFd = 4;

/// Subsystems selectable with `--logTags=`. Each tag raises one tracing
/// target to trace on top of the base level.
const LOG_TAGS: &[(&str, &str)] = &[
    ("rtp", "rtp::packet"),
    ("rtcp", "rtp::rtcp"),
    ("channel", "sfud::channel"),
    ("room", "sfud::room"),
];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Initial log filter, switchable at runtime via `worker.updateSettings`.
    pub log_level: String,
    /// Subsystems logged at trace regardless of the base level.
    pub log_tags: Vec<String>,
    /// Fd the worker reads requests from.
    pub channel_read_fd: RawFd,
    /// Fd the worker writes responses and notifications to.
    pub channel_write_fd: RawFd,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_level: "info".into(),
            log_tags: Vec::new(),
            channel_read_fd: DEFAULT_READ_FD,
            channel_write_fd: DEFAULT_WRITE_FD,
        }
    }
}

impl Settings {
    /// Parse `--key=value` style arguments. The binary name must already be
    /// stripped off. Unknown arguments fail startup (exit code 41).
    pub fn from_args(args: impl Iterator<Item = String>) -> Result<Settings, SettingsError> {
        let mut settings = Settings::default();

        for arg in args {
            let (key, value) = arg
                .strip_prefix("--")
                .and_then(|a| a.split_once('='))
                .ok_or_else(|| SettingsError::UnknownArgument(arg.clone()))?;

            match key {
                "logLevel" => settings.log_level = value.to_string(),
                "logTags" => {
                    for tag in value.split(',').filter(|t| !t.is_empty()) {
                        if !LOG_TAGS.iter().any(|(name, _)| *name == tag) {
                            return Err(SettingsError::InvalidValue(key.to_string()));
                        }
                        settings.log_tags.push(tag.to_string());
                    }
                }
                "channelReadFd" => {
                    settings.channel_read_fd = value
                        .parse()
                        .map_err(|_| SettingsError::InvalidValue(key.to_string()))?;
                }
                "channelWriteFd" => {
                    settings.channel_write_fd = value
                        .parse()
                        .map_err(|_| SettingsError::InvalidValue(key.to_string()))?;
                }
                _ => return Err(SettingsError::UnknownArgument(arg.clone())),
            }
        }

        Ok(settings)
    }

    /// The filter directives the base level and tags amount to, in
    /// `EnvFilter` syntax.
    pub fn env_filter_directives(&self) -> String {
        let mut directives = self.log_level.clone();

        for tag in &self.log_tags {
            let Some((_, target)) = LOG_TAGS.iter().find(|(name, _)| name == tag) else {
                continue;
            };
            directives.push_str(&format!(",{}=trace", target));
        }

        directives
    }
}

//! Bot configuration.
//!
//! Read from a TOML file (by default `~/.config/parley/bot.toml`), then
//! overridden by command-line flags. Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use parley_sdk::session::{Identity, SessionConfig};
use parley_sdk::throttle::FloodConfig;
use serde::Deserialize;

use crate::reconnect::Backoff;

/// Default IRC server.
pub const DEFAULT_SERVER: &str = "irc.libera.chat:6667";
pub const DEFAULT_NICK: &str = "parley";
pub const DEFAULT_PREFIX: &str = "!";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    /// Server address (host:port).
    pub server: String,
    /// Server password, sent as PASS.
    pub password: Option<String>,
    pub nick: String,
    /// Tried when `nick` is taken. Defaults to `nick` with a trailing `_`.
    pub alt_nick: Option<String>,
    /// Defaults to `nick`.
    pub ident: Option<String>,
    pub realname: String,
    /// Channels to join after registration.
    pub channels: Vec<String>,
    pub command_prefix: String,
    /// `nick!ident@host` globs granted admin access.
    pub admins: Vec<String>,
    pub flood: FloodSettings,
    pub reconnect: ReconnectSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            password: None,
            nick: DEFAULT_NICK.to_string(),
            alt_nick: None,
            ident: None,
            realname: "Parley IRC bot".to_string(),
            channels: Vec::new(),
            command_prefix: DEFAULT_PREFIX.to_string(),
            admins: Vec::new(),
            flood: FloodSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FloodSettings {
    /// Lines that may be sent back to back.
    pub burst: u32,
    /// Milliseconds per refilled line. 0 disables limiting.
    pub interval_ms: u64,
}

impl Default for FloodSettings {
    fn default() -> Self {
        let flood = FloodConfig::default();
        Self {
            burst: flood.burst,
            interval_ms: flood.interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSettings {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 2,
            max_delay_secs: 30,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub nick: Option<String>,
    /// Comma-separated channel list.
    pub channels: Option<String>,
    pub command_prefix: Option<String>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley")
        .join("bot.toml")
}

impl BotConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("bad config file {}", path.display()))
    }

    /// Load `path` if given (it must exist), otherwise the default file if
    /// present, otherwise the built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(server) = overrides.server {
            self.server = server;
        }
        if let Some(nick) = overrides.nick {
            self.nick = nick;
        }
        if let Some(channels) = overrides.channels {
            self.channels = channels
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(prefix) = overrides.command_prefix {
            self.command_prefix = prefix;
        }
    }

    /// Checks what the session config cannot: prefix, admin masks and
    /// backoff bounds. The rest is validated by [`SessionConfig::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.is_empty() || self.command_prefix.contains(char::is_whitespace) {
            bail!("command_prefix must be a non-empty word, got {:?}", self.command_prefix);
        }
        for mask in &self.admins {
            if !mask.contains('!') || !mask.contains('@') {
                bail!("admin mask {mask:?} is not of the form nick!ident@host");
            }
        }
        let reconnect = self.reconnect;
        if reconnect.initial_delay_secs == 0 || reconnect.max_delay_secs < reconnect.initial_delay_secs {
            bail!("reconnect delays must satisfy 0 < initial_delay_secs <= max_delay_secs");
        }
        if self.flood.interval_ms > 0 && self.flood.burst == 0 {
            bail!("flood.burst must be at least 1 when flood.interval_ms is set");
        }
        Ok(())
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        self.validate()?;
        let alternate = self.alt_nick.clone().unwrap_or_else(|| format!("{}_", self.nick));
        let ident = self.ident.as_deref().unwrap_or(&self.nick);
        let mut config = SessionConfig::new(
            &self.server,
            Identity::new(&self.nick, &alternate, ident, &self.realname),
        );
        config.password = self.password.clone().filter(|p| !p.is_empty());
        config.channels = self.channels.clone();
        config.flood = if self.flood.interval_ms == 0 {
            FloodConfig::unlimited()
        } else {
            FloodConfig {
                burst: self.flood.burst,
                interval: Duration::from_millis(self.flood.interval_ms),
            }
        };
        config.validate().context("invalid session settings")?;
        Ok(config)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.reconnect.initial_delay_secs),
            Duration::from_secs(self.reconnect.max_delay_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
server = "irc.example.net:6697"
password = "hunter2"
nick = "helper"
realname = "Channel helper"
channels = ["#rust", "#parley"]
command_prefix = "."
admins = ["owner!*@trusted.example"]

[flood]
burst = 5
interval_ms = 1500

[reconnect]
initial_delay_secs = 1
max_delay_secs = 60
"##;

    #[test]
    fn parses_a_full_file() {
        let config = BotConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server, "irc.example.net:6697");
        assert_eq!(config.channels, vec!["#rust", "#parley"]);
        assert_eq!(config.flood, FloodSettings { burst: 5, interval_ms: 1500 });
        assert_eq!(config.reconnect.max_delay_secs, 60);

        let session = config.session_config().unwrap();
        assert_eq!(session.identity.preferred, "helper");
        assert_eq!(session.identity.alternate, "helper_");
        assert_eq!(session.identity.ident, "helper");
        assert_eq!(session.password.as_deref(), Some("hunter2"));
        assert_eq!(session.flood.interval, Duration::from_millis(1500));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = BotConfig::from_toml("nick = \"solo\"").unwrap();
        assert_eq!(config.server, DEFAULT_SERVER);
        assert_eq!(config.command_prefix, DEFAULT_PREFIX);
        assert_eq!(config.reconnect, ReconnectSettings::default());
        assert!(config.session_config().is_ok());
    }

    #[test]
    fn partial_tables_keep_their_other_defaults() {
        let config = BotConfig::from_toml("[flood]\nburst = 1\n\n[reconnect]\nmax_delay_secs = 90").unwrap();
        assert_eq!(config.flood.burst, 1);
        assert_eq!(config.flood.interval_ms, FloodSettings::default().interval_ms);
        assert_eq!(config.reconnect.initial_delay_secs, 2);
        assert_eq!(config.reconnect.max_delay_secs, 90);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(BotConfig::from_toml("nickname = \"typo\"").is_err());
        assert!(BotConfig::from_toml("[flood]\nrate = 3").is_err());
    }

    #[test]
    fn overrides_win_over_the_file() {
        let mut config = BotConfig::from_toml(SAMPLE).unwrap();
        config.apply(Overrides {
            nick: Some("other".into()),
            channels: Some(" #a, ,#b ".into()),
            ..Default::default()
        });
        assert_eq!(config.nick, "other");
        assert_eq!(config.channels, vec!["#a", "#b"]);
        assert_eq!(config.server, "irc.example.net:6697");
        assert_eq!(config.command_prefix, ".");
    }

    #[test]
    fn invalid_settings_are_reported() {
        let mut config = BotConfig::default();
        config.nick = "two words".into();
        assert!(config.session_config().is_err());

        let mut config = BotConfig::default();
        config.channels = vec!["rust".into()];
        assert!(config.session_config().is_err());

        let mut config = BotConfig::default();
        config.admins = vec!["*".into()];
        assert!(config.validate().is_err());

        let mut config = BotConfig::default();
        config.reconnect.max_delay_secs = 1;
        assert!(config.validate().is_err());

        let mut config = BotConfig::default();
        config.command_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_means_unlimited() {
        let mut config = BotConfig::default();
        config.flood.interval_ms = 0;
        assert_eq!(config.session_config().unwrap().flood, FloodConfig::unlimited());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = BotConfig::resolve(Some(file.path())).unwrap();
        assert_eq!(config.nick, "helper");

        let missing = file.path().with_extension("absent");
        let err = BotConfig::resolve(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("can't read"));
    }
}

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use config::Environment;
use config::File;
use reqwest::Url;
use serde::Deserialize;
use serde::Deserializer;

/// Errors raised while loading [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not load settings: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid notification url `{url}`: {reason}")]
    InvalidNotifyUrl { url: String, reason: String },
}

/// Runtime configuration of the quota server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP boundary binds to.
    pub listen: SocketAddr,
    /// SQLite database file.
    pub database: PathBuf,
    /// Notification receiver. `None` or an empty string disables notifications.
    pub notify_url: Option<String>,
    /// Upper bound on a single notification attempt, e.g. `"5s"` or `"250ms"`.
    #[serde(deserialize_with = "humantime_duration")]
    pub notify_timeout: Duration,
    /// Insert a sample task when the database is empty.
    pub seed_sample_task: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3001)),
            database: PathBuf::from("tasks.db"),
            notify_url: Some("http://localhost:8002/notify".to_string()),
            notify_timeout: Duration::from_secs(5),
            seed_sample_task: true,
        }
    }
}

impl Settings {
    /// Layers, lowest priority first: defaults, the optional file,
    /// `QUOTA_*` environment variables, then a bare `PORT` variable.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("QUOTA"));
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("listen", format!("0.0.0.0:{port}"))?;
        }

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// The parsed notification endpoint, if notifications are enabled.
    pub fn notify_endpoint(&self) -> Result<Option<Url>, SettingsError> {
        match self.notify_url.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(url) => Url::parse(url)
                .map(Some)
                .map_err(|err| SettingsError::InvalidNotifyUrl {
                    url: url.to_string(),
                    reason: err.to_string(),
                }),
        }
    }
}

fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

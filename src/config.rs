use anyhow::{anyhow, Result};
use serenity::all::ChannelId;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;

const CONFIG_PATH_REL_HOME: &str = ".config/jinglebot/config.toml";
const CONFIG_PATH_ENV: &str = "JINGLEBOT_CONFIG";

/// Discord returns at most this many messages per request
const MAX_BACKFILL_MESSAGE_COUNT: u8 = 100;

/// Bot configuration
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    pub vote: Vote,
    #[serde(default)]
    pub intro: Intro,
    pub backup: Option<Backup>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct General {
    pub discord_token: String,
    /// Presence text shown as "Playing ..."
    pub status: Option<String>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Vote {
    /// Channel where sound submissions are posted and voted on
    pub request_channel: u64,
    pub votes_required: usize,
    /// How many recent request channel messages to re-adopt on startup
    #[serde(default = "default_backfill_message_count")]
    pub backfill_message_count: u8,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Intro {
    #[serde(default = "default_join_timeout_seconds")]
    pub join_timeout_seconds: u64,
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: PathBuf,
    /// Clips still playing after this long are cut off
    #[serde(default = "default_max_clip_seconds")]
    pub max_clip_seconds: u64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Backup {
    #[serde(default = "default_backup_endpoint")]
    pub endpoint: String,
    pub bucket: String,
    pub bearer_token: Option<String>,
}

fn default_backfill_message_count() -> u8 {
    20
}

fn default_join_timeout_seconds() -> u64 {
    10
}

fn default_max_clip_seconds() -> u64 {
    60
}

fn default_sounds_dir() -> PathBuf {
    PathBuf::from("sounds")
}

fn default_backup_endpoint() -> String {
    "https://storage.googleapis.com".to_owned()
}

impl Default for Intro {
    fn default() -> Self {
        Self {
            join_timeout_seconds: default_join_timeout_seconds(),
            sounds_dir: default_sounds_dir(),
            max_clip_seconds: default_max_clip_seconds(),
        }
    }
}

impl Vote {
    pub fn request_channel(&self) -> ChannelId {
        ChannelId::new(self.request_channel)
    }
}

impl Intro {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_seconds)
    }

    pub fn max_clip_length(&self) -> Duration {
        Duration::from_secs(self.max_clip_seconds)
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            anyhow!(
                "Could not open configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        Self::parse(&contents).map_err(|e| {
            anyhow!(
                "Could not parse configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.vote.votes_required == 0 {
            return Err(anyhow!("`vote.votes_required` must be at least 1"));
        }
        if self.vote.request_channel == 0 {
            return Err(anyhow!("`vote.request_channel` must be a channel id"));
        }
        if self.vote.backfill_message_count > MAX_BACKFILL_MESSAGE_COUNT {
            return Err(anyhow!(
                "`vote.backfill_message_count` can be at most {}",
                MAX_BACKFILL_MESSAGE_COUNT
            ));
        }
        if self.intro.max_clip_seconds == 0 {
            return Err(anyhow!("`intro.max_clip_seconds` must be at least 1"));
        }
        if self.general.discord_token.trim().is_empty() {
            return Err(anyhow!("`general.discord_token` is empty"));
        }
        Ok(())
    }
}

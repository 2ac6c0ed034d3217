use anyhow::{anyhow, Result};
use std::{path::PathBuf, time::Duration};
use tokio::io::AsyncReadExt;

const CONFIG_PATH_REL_HOME: &str = ".config/mila/config.toml";

/// Bot configuration
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    pub openai: OpenAi,
    #[serde(default)]
    pub assistant: Assistant,
    #[serde(default)]
    pub discord: Discord,
    #[serde(default)]
    pub tools: Tools,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct General {
    pub discord_token: String,
    #[serde(default)]
    pub bot_owners: Vec<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Router tick interval
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Handler that receives tasks nobody addressed
    #[serde(default = "default_handler")]
    pub default_handler: String,
    #[serde(default)]
    pub enable_loopback: bool,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OpenAi {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Assistant {
    #[serde(default = "default_model")]
    pub model: String,
    /// Idle conversation threads are forgotten after this long
    #[serde(default = "default_thread_ttl_secs")]
    pub thread_ttl_secs: u64,
    /// Runs still unfinished after this long are cancelled.  Unset polls forever.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Discord {
    /// How many prior channel messages to hand the assistant as context
    #[serde(default = "default_context_message_count")]
    pub context_message_count: u8,
    /// Discord's maximum message length
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Tools {
    #[serde(default)]
    pub openweathermap_api_key: Option<String>,
}

fn default_command_prefix() -> String {
    ";".to_owned()
}

fn default_tick_millis() -> u64 {
    100
}

fn default_handler() -> String {
    crate::assistant::MILA.to_owned()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_owned()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_model() -> String {
    "gpt-3.5-turbo-1106".to_owned()
}

fn default_thread_ttl_secs() -> u64 {
    60 * 60 * 24
}

fn default_context_message_count() -> u8 {
    5
}

fn default_message_limit() -> usize {
    2000
}

impl Default for Assistant {
    fn default() -> Self {
        Self {
            model: default_model(),
            thread_ttl_secs: default_thread_ttl_secs(),
            run_timeout_secs: None,
        }
    }
}

impl Default for Discord {
    fn default() -> Self {
        Self {
            context_message_count: default_context_message_count(),
            message_limit: default_message_limit(),
        }
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
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
        Ok(toml::from_str(contents)?)
    }
}

impl General {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

impl Assistant {
    pub fn thread_ttl(&self) -> Duration {
        Duration::from_secs(self.thread_ttl_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

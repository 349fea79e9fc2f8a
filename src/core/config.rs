use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::Character;
use crate::services::rate_limit::RateLimitConfig;
use crate::services::router::ModelConfig;
use crate::services::script::StoryRequest;
use crate::services::tts::TransportPolicy;

const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub models: ModelConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub story: StoryRequest,

    /// Extra characters on top of the bundled cast.
    #[serde(default)]
    pub characters: Vec<Character>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            group_id: String::new(),
            base_url: default_base_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default)]
    pub transport: TransportPolicy,
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold_chars: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default = "default_script_file")]
    pub script_file: String,
    /// Cast new speakers from the account's voice list instead of the
    /// bundled pools.
    #[serde(default)]
    pub discover_voices: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            transport: TransportPolicy::default(),
            streaming_threshold_chars: default_streaming_threshold(),
            sample_rate: default_sample_rate(),
            bitrate: default_bitrate(),
            format: default_format(),
            channel: default_channel(),
            pause_ms: default_pause_ms(),
            concurrency: default_concurrency(),
            output_folder: default_output_folder(),
            output_file: default_output_file(),
            script_file: default_script_file(),
            discover_voices: false,
        }
    }
}

fn default_base_url() -> String {
    "https://api.minimax.io".to_string()
}
fn default_timeout() -> u64 {
    120
}
fn default_streaming_threshold() -> usize {
    300
}
fn default_sample_rate() -> u32 {
    32000
}
fn default_bitrate() -> u32 {
    128000
}
fn default_format() -> String {
    "mp3".to_string()
}
fn default_channel() -> u8 {
    1
}
fn default_pause_ms() -> u64 {
    500
}
fn default_concurrency() -> usize {
    3
}
fn default_output_folder() -> String {
    "audio_output".to_string()
}
fn default_output_file() -> String {
    "complete_story.mp3".to_string()
}
fn default_script_file() -> String {
    "story_script.json".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        if !matches!(config.audio.format.as_str(), "mp3" | "wav") {
            anyhow::bail!(
                "audio.format '{}' is not supported, use mp3 or wav",
                config.audio.format
            );
        }
        if config.audio.concurrency == 0 {
            anyhow::bail!("audio.concurrency must be at least 1");
        }
        for character in &config.characters {
            character.validate()?;
        }
        Ok(config)
    }

    /// Credentials left empty in the file are taken from the environment.
    fn apply_env(&mut self) {
        if self.api.api_key.is_empty() {
            if let Ok(key) = std::env::var("MINIMAX_API_KEY") {
                self.api.api_key = key;
            }
        }
        if self.api.group_id.is_empty() {
            if let Ok(group) = std::env::var("MINIMAX_GROUP_ID") {
                self.api.group_id = group;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.audio.output_folder)?;
        Ok(())
    }
}

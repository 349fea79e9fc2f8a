use crate::core::config::AudioConfig;
use crate::core::error::ApiError;
use crate::core::state::VoiceParams;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub mod minimax;

/// How synthesis requests are carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportPolicy {
    /// Streaming for long segments, request/response otherwise.
    #[default]
    Auto,
    Sync,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisMode {
    Sync,
    Streaming,
}

impl TransportPolicy {
    pub fn mode_for(&self, text: &str, streaming_threshold_chars: usize) -> SynthesisMode {
        match self {
            TransportPolicy::Sync => SynthesisMode::Sync,
            TransportPolicy::Streaming => SynthesisMode::Streaming,
            TransportPolicy::Auto => {
                if text.chars().count() > streaming_threshold_chars {
                    SynthesisMode::Streaming
                } else {
                    SynthesisMode::Sync
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub bitrate: u32,
    pub format: String,
    pub channel: u8,
}

impl AudioSettings {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            bitrate: config.bitrate,
            format: config.format.clone(),
            channel: config.channel,
        }
    }

    pub fn extension(&self) -> &str {
        match self.format.as_str() {
            "wav" => "wav",
            _ => "mp3",
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub model: String,
    pub text: String,
    pub voice: VoiceParams,
    pub audio: AudioSettings,
}

impl SpeechRequest {
    /// Speech is billed per input character.
    pub fn units(&self) -> u64 {
        self.text.chars().count() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub audio: Vec<u8>,
    /// Characters the service reports billing, when it reports them.
    pub billed_units: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Audio(Vec<u8>),
    Finished { billed_units: Option<u64> },
}

pub type AudioStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub voice_name: String,
    pub description: Vec<String>,
}

impl VoiceInfo {
    pub fn new(voice_id: &str, voice_name: &str) -> Self {
        Self {
            voice_id: voice_id.to_string(),
            voice_name: voice_name.to_string(),
            description: Vec::new(),
        }
    }
}

/// Voices the account may synthesize with. `custom` holds cloned, generated
/// and slotted voices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoiceCatalog {
    pub system: Vec<VoiceInfo>,
    pub custom: Vec<VoiceInfo>,
}

impl VoiceCatalog {
    pub fn voices(&self) -> impl Iterator<Item = &VoiceInfo> {
        self.system.iter().chain(self.custom.iter())
    }

    /// Sorted, without duplicates.
    pub fn voice_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.voices().map(|v| v.voice_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn contains(&self, voice_id: &str) -> bool {
        self.voices().any(|v| v.voice_id == voice_id)
    }

    pub fn len(&self) -> usize {
        self.system.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.custom.is_empty()
    }
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ApiError>;

    /// Opens a streaming synthesis. Audio events arrive as they are produced
    /// and the stream ends with `StreamEvent::Finished`.
    async fn open_stream(&self, request: &SpeechRequest) -> Result<AudioStream, ApiError>;

    async fn list_voices(&self) -> Result<VoiceCatalog, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_transport_uses_length_threshold() {
        let policy = TransportPolicy::Auto;
        assert_eq!(policy.mode_for("short line", 20), SynthesisMode::Sync);
        assert_eq!(policy.mode_for(&"x".repeat(21), 20), SynthesisMode::Streaming);
        assert_eq!(
            TransportPolicy::Sync.mode_for(&"x".repeat(500), 20),
            SynthesisMode::Sync
        );
        assert_eq!(TransportPolicy::Streaming.mode_for("hi", 20), SynthesisMode::Streaming);
    }

    #[test]
    fn test_speech_units_count_characters() {
        let req = SpeechRequest {
            model: "speech-02-hd".to_string(),
            text: "Héllo!".to_string(),
            voice: VoiceParams {
                voice_id: "v".to_string(),
                speed: 1.0,
                volume: 1.0,
                pitch: 0.0,
                emotion: "neutral".to_string(),
            },
            audio: AudioSettings::default(),
        };
        assert_eq!(req.units(), 6);
        assert_eq!(req.audio.extension(), "mp3");
    }

    #[test]
    fn test_catalog_ids_are_sorted_and_unique() {
        let catalog = VoiceCatalog {
            system: vec![
                VoiceInfo::new("English_radiant_girl", "Radiant Girl"),
                VoiceInfo::new("English_CalmWoman", "Calm Woman"),
            ],
            custom: vec![VoiceInfo::new("English_radiant_girl", "My copy")],
        };
        assert_eq!(catalog.voice_ids(), vec!["English_CalmWoman", "English_radiant_girl"]);
        assert!(catalog.contains("English_CalmWoman"));
        assert!(!catalog.contains("English_WiseScholar"));
        assert_eq!(catalog.len(), 3);
        assert!(VoiceCatalog::default().is_empty());
    }
}

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const NARRATOR: &str = "Narrator";

pub const SPEED_RANGE: (f32, f32) = (0.5, 2.0);
pub const VOLUME_RANGE: (f32, f32) = (0.0, 2.0);
pub const PITCH_RANGE: (f32, f32) = (-1.0, 1.0);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub voice_id: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default = "default_emotion")]
    pub emotion: String,
}

fn default_speed() -> f32 {
    1.0
}
fn default_volume() -> f32 {
    1.0
}
fn default_emotion() -> String {
    "neutral".to_string()
}

impl Character {
    pub fn new(
        name: &str,
        description: &str,
        voice_id: &str,
        speed: f32,
        volume: f32,
        pitch: f32,
        emotion: &str,
    ) -> Result<Self> {
        let character = Self {
            name: name.to_string(),
            description: description.to_string(),
            voice_id: voice_id.to_string(),
            speed,
            volume,
            pitch,
            emotion: emotion.to_string(),
        };
        character.validate()?;
        Ok(character)
    }

    /// A neutral character speaking with the given voice.
    pub fn with_voice(name: &str, description: &str, voice_id: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            voice_id: voice_id.to_string(),
            speed: default_speed(),
            volume: default_volume(),
            pitch: 0.0,
            emotion: default_emotion(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Character name must not be empty");
        }
        if self.voice_id.trim().is_empty() {
            bail!("Character '{}' has no voice id", self.name);
        }
        check_range(&self.name, "speed", self.speed, SPEED_RANGE)?;
        check_range(&self.name, "volume", self.volume, VOLUME_RANGE)?;
        check_range(&self.name, "pitch", self.pitch, PITCH_RANGE)?;
        Ok(())
    }

    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            voice_id: self.voice_id.clone(),
            speed: self.speed,
            volume: self.volume,
            pitch: self.pitch,
            emotion: self.emotion.clone(),
        }
    }
}

fn check_range(name: &str, field: &str, value: f32, (min, max): (f32, f32)) -> Result<()> {
    if !(min..=max).contains(&value) {
        bail!(
            "Character '{}': {} {} is outside [{}, {}]",
            name,
            field,
            value,
            min,
            max
        );
    }
    Ok(())
}

/// Voice settings sent along with a synthesis request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VoiceParams {
    pub voice_id: String,
    pub speed: f32,
    pub volume: f32,
    pub pitch: f32,
    pub emotion: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StorySegment {
    pub index: usize,
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    audio_path: Option<PathBuf>,
}

impl StorySegment {
    pub fn new(index: usize, speaker: &str, text: &str) -> Self {
        Self {
            index,
            speaker: speaker.to_string(),
            text: text.to_string(),
            audio_path: None,
        }
    }

    pub fn audio_path(&self) -> Option<&Path> {
        self.audio_path.as_deref()
    }

    /// Sets the produced artifact. A segment gets exactly one.
    pub fn attach_audio(&mut self, path: PathBuf) -> Result<()> {
        if let Some(existing) = &self.audio_path {
            bail!(
                "Segment {} already has audio at {:?}",
                self.index,
                existing
            );
        }
        self.audio_path = Some(path);
        Ok(())
    }

    pub fn is_narration(&self) -> bool {
        self.speaker.eq_ignore_ascii_case(NARRATOR)
    }
}

/// Stock roles: key, description, voice, speed, pitch, emotion.
const TEMPLATES: &[(&str, &str, &str, f32, f32, &str)] = &[
    (
        "narrator",
        "A wise storyteller with a warm, engaging voice who brings the world to life with \
         vivid descriptions",
        "English_expressive_narrator",
        1.0,
        0.0,
        "calm",
    ),
    (
        "hero",
        "A courageous protagonist with a heart of gold, facing inner doubts and external \
         challenges with determination",
        "English_magnetic_voiced_man",
        1.0,
        0.0,
        "brave",
    ),
    (
        "villain",
        "A complex antagonist driven by pain, fear, or misguided beliefs",
        "English_ManWithDeepVoice",
        0.8,
        -0.3,
        "sinister",
    ),
    (
        "friend",
        "A loyal companion who provides emotional support and sometimes tough love",
        "English_radiant_girl",
        1.1,
        0.2,
        "friendly",
    ),
    (
        "wizard",
        "A mysterious mentor figure with ancient wisdom who carries their own secrets",
        "English_WiseScholar",
        0.9,
        0.0,
        "wise",
    ),
    (
        "princess",
        "A strong-willed royal with hidden depths, balancing duty with personal desires",
        "English_Graceful_Lady",
        1.0,
        0.1,
        "noble",
    ),
    (
        "knight",
        "An honorable warrior bound by duty, weighed down by responsibility",
        "English_Trustworth_Man",
        1.0,
        0.1,
        "honorable",
    ),
    (
        "dragon",
        "A powerful ancient being, often misunderstood, capable of great kindness or ruin",
        "English_ManWithDeepVoice",
        0.7,
        -0.4,
        "mysterious",
    ),
    (
        "detective",
        "A sharp-minded investigator with a troubled past, driven by justice",
        "English_Diligent_Man",
        0.9,
        -0.1,
        "determined",
    ),
    (
        "elder",
        "A wise figure with years of experience, offering guidance despite old regrets",
        "English_WiseScholar",
        0.8,
        -0.1,
        "wise",
    ),
    (
        "child",
        "An innocent soul with boundless imagination who sees truths adults miss",
        "English_PlayfulGirl",
        1.3,
        0.3,
        "innocent",
    ),
    (
        "mentor",
        "A guiding figure who teaches through experience, tough but compassionate",
        "English_WiseScholar",
        0.9,
        0.0,
        "wise",
    ),
    (
        "outcast",
        "A misunderstood soul with hidden talents, seeking acceptance",
        "English_ReservedYoungMan",
        1.0,
        -0.2,
        "lonely",
    ),
    (
        "guardian",
        "A fiercely loyal protector, willing to sacrifice everything for those they love",
        "English_Trustworth_Man",
        1.0,
        0.0,
        "protective",
    ),
];

pub fn template_names() -> Vec<&'static str> {
    TEMPLATES.iter().map(|t| t.0).collect()
}

/// Character built from a stock role, named after the role unless `name`
/// is given. Names are title cased.
pub fn character_template(template: &str, name: Option<&str>) -> Option<Character> {
    let &(key, description, voice_id, speed, pitch, emotion) = TEMPLATES
        .iter()
        .find(|t| t.0.eq_ignore_ascii_case(template.trim()))?;
    Some(Character {
        name: title_case(name.unwrap_or(key)),
        description: description.to_string(),
        voice_id: voice_id.to_string(),
        speed,
        volume: default_volume(),
        pitch,
        emotion: emotion.to_string(),
    })
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// The characters bundled with the application, mirroring the stock cast.
pub fn default_characters() -> Vec<Character> {
    ["narrator", "hero", "villain", "friend", "wizard"]
        .iter()
        .filter_map(|key| character_template(key, None))
        .collect()
}

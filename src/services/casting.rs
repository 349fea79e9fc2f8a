use crate::core::state::{default_characters, Character, NARRATOR};
use crate::services::client::ApiClient;
use crate::services::tts::{VoiceCatalog, VoiceInfo};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a character name suggests about its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameProfile {
    #[serde(default = "unknown")]
    pub gender: String,
    #[serde(default = "unknown")]
    pub age_group: String,
    #[serde(default = "unknown")]
    pub personality_trait: String,
    #[serde(default = "unknown")]
    pub voice_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn unknown() -> String {
    "unknown".to_string()
}
fn default_confidence() -> f32 {
    0.5
}

impl NameProfile {
    /// Guess from spelling alone, used when the remote analysis is unavailable.
    pub fn from_name_patterns(name: &str) -> Self {
        let lower = name.trim().to_lowercase();
        let mut profile = Self {
            gender: unknown(),
            age_group: "adult".to_string(),
            personality_trait: "neutral".to_string(),
            voice_type: "neutral".to_string(),
            confidence: 0.3,
        };

        if lower.ends_with(['a', 'e', 'i']) {
            profile.gender = "female".to_string();
            profile.voice_type = "feminine".to_string();
        } else if lower.ends_with(['o', 'u', 'n', 'r']) {
            profile.gender = "male".to_string();
            profile.voice_type = "masculine".to_string();
        }

        let has_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));
        if has_any(&["shadow", "dark", "grim", "vex", "mal"]) {
            profile.personality_trait = "villainous".to_string();
        } else if has_any(&["light", "bright", "sun", "star"]) {
            profile.personality_trait = "heroic".to_string();
        } else if has_any(&["wise", "sage", "elder", "merlin"]) {
            profile.personality_trait = "wise".to_string();
            profile.voice_type = "wise".to_string();
        }
        profile
    }

    pub(crate) fn normalized(mut self) -> Self {
        for field in [
            &mut self.gender,
            &mut self.age_group,
            &mut self.personality_trait,
            &mut self.voice_type,
        ] {
            *field = field.trim().to_lowercase();
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceCategory {
    Narrator,
    Female,
    Male,
    Villain,
    Child,
    Elder,
}

const FEMININE: &[&str] = &["female", "woman", "girl", "lady"];

impl VoiceCategory {
    pub const ALL: [VoiceCategory; 6] = [
        VoiceCategory::Narrator,
        VoiceCategory::Female,
        VoiceCategory::Male,
        VoiceCategory::Villain,
        VoiceCategory::Child,
        VoiceCategory::Elder,
    ];

    pub fn for_profile(profile: &NameProfile) -> Self {
        match profile.personality_trait.as_str() {
            "villainous" | "sinister" | "evil" => return VoiceCategory::Villain,
            "wise" | "scholarly" | "mentor" => return VoiceCategory::Elder,
            _ => {}
        }
        match (profile.gender.as_str(), profile.age_group.as_str()) {
            ("female" | "male", "child") => VoiceCategory::Child,
            ("female" | "male", "elder") => VoiceCategory::Elder,
            ("female", _) => VoiceCategory::Female,
            _ => VoiceCategory::Male,
        }
    }

    pub fn voices(&self) -> &'static [&'static str] {
        match self {
            VoiceCategory::Narrator => &[
                "English_expressive_narrator",
                "English_CaptivatingStoryteller",
                "English_WiseScholar",
            ],
            VoiceCategory::Female => &[
                "English_radiant_girl",
                "English_compelling_lady1",
                "English_captivating_female1",
                "English_Upbeat_Woman",
                "English_CalmWoman",
                "English_Graceful_Lady",
                "English_PlayfulGirl",
                "English_LovelyGirl",
                "English_Wiselady",
                "English_SentimentalLady",
                "English_Soft-spokenGirl",
            ],
            VoiceCategory::Male => &[
                "English_magnetic_voiced_man",
                "English_Aussie_Bloke",
                "English_Trustworth_Man",
                "English_Gentle-voiced_man",
                "English_Diligent_Man",
                "English_ReservedYoungMan",
                "English_ManWithDeepVoice",
                "English_FriendlyPerson",
                "English_Debator",
                "English_Steadymentor",
                "English_Deep-VoicedGentleman",
                "English_DecentYoungMan",
                "English_PassionateWarrior",
            ],
            VoiceCategory::Villain => &[
                "English_ManWithDeepVoice",
                "English_Deep-VoicedGentleman",
                "English_ImposingManner",
            ],
            VoiceCategory::Child => &[
                "English_radiant_girl",
                "English_PlayfulGirl",
                "English_LovelyGirl",
                "English_Soft-spokenGirl",
            ],
            VoiceCategory::Elder => &[
                "English_WiseScholar",
                "English_Wiselady",
                "English_MaturePartner",
                "English_Steadymentor",
            ],
        }
    }

    /// Whether a catalogue voice fits this category, judged by its id and
    /// display name.
    pub fn matches(&self, voice: &VoiceInfo) -> bool {
        let text = format!("{} {}", voice.voice_id, voice.voice_name).to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
        match self {
            VoiceCategory::Narrator => has(&["narrator", "storyteller", "story"]),
            VoiceCategory::Female => has(FEMININE) && !has(&["narrator"]),
            // "woman" and "female" contain the masculine keywords.
            VoiceCategory::Male => {
                has(&["man", "male", "boy", "guy", "gentleman", "bloke"]) && !has(FEMININE)
            }
            VoiceCategory::Villain => has(&["villain", "evil", "dark", "deep", "imposing"]),
            VoiceCategory::Child => has(&["girl", "boy", "child", "kid", "playful"]),
            VoiceCategory::Elder => has(&["wise", "elder", "mature", "mentor", "scholar"]),
        }
    }

    /// Voices for this category that the catalogue offers: bundled voices it
    /// still lists, then its system voices whose names fit.
    pub fn pool_from(&self, catalog: &VoiceCatalog) -> Vec<String> {
        let mut pool: Vec<String> = self
            .voices()
            .iter()
            .filter(|v| catalog.contains(v))
            .map(|v| v.to_string())
            .collect();
        for voice in catalog.system.iter().filter(|v| self.matches(v)) {
            if !pool.contains(&voice.voice_id) {
                pool.push(voice.voice_id.clone());
            }
        }
        pool
    }
}

/// First catalogue voice for each category that has one.
pub fn suggest_voices(catalog: &VoiceCatalog) -> Vec<(VoiceCategory, String)> {
    VoiceCategory::ALL
        .iter()
        .filter_map(|category| {
            let first = category.pool_from(catalog).into_iter().next()?;
            Some((*category, first))
        })
        .collect()
}

/// Gives every speaker of a story a character, and keeps that choice for the
/// rest of the run.
#[derive(Debug)]
pub struct VoiceCaster {
    roster: HashMap<String, Character>,
    assigned: HashMap<String, Character>,
    cursors: HashMap<VoiceCategory, usize>,
    /// Catalogue pools replacing the bundled ones, never empty.
    pools: HashMap<VoiceCategory, Vec<String>>,
}

impl VoiceCaster {
    /// Later entries replace earlier ones with the same name.
    pub fn new(roster: impl IntoIterator<Item = Character>) -> Self {
        let roster = roster
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();
        Self {
            roster,
            assigned: HashMap::new(),
            cursors: HashMap::new(),
            pools: HashMap::new(),
        }
    }

    /// Bundled cast plus the configured extras.
    pub fn with_defaults(extra: &[Character]) -> Self {
        Self::new(default_characters().into_iter().chain(extra.iter().cloned()))
    }

    pub fn roster(&self) -> Vec<Character> {
        let mut cast: Vec<Character> = self.roster.values().cloned().collect();
        cast.sort_by(|a, b| a.name.cmp(&b.name));
        cast
    }

    /// Casts new speakers from the voices `catalog` offers. Categories the
    /// catalogue has nothing for keep their bundled voices.
    pub fn use_catalog(&mut self, catalog: &VoiceCatalog) {
        if catalog.is_empty() {
            warn!("Voice catalogue is empty, keeping bundled voices");
            return;
        }
        for category in VoiceCategory::ALL {
            let pool = category.pool_from(catalog);
            if pool.is_empty() {
                warn!("No catalogue voice fits {:?}, keeping bundled voices", category);
                continue;
            }
            debug!("{:?} pool: {:?}", category, pool);
            self.pools.insert(category, pool);
        }
        for character in self.roster.values() {
            if !catalog.contains(&character.voice_id) {
                warn!(
                    "Character '{}' uses voice {}, which the catalogue does not list",
                    character.name, character.voice_id
                );
            }
        }
        self.cursors.clear();
    }

    pub fn lookup(&self, speaker: &str) -> Option<&Character> {
        let key = speaker.to_lowercase();
        self.roster.get(&key).or_else(|| self.assigned.get(&key))
    }

    pub fn narrator(&mut self) -> Character {
        if let Some(c) = self.lookup(NARRATOR) {
            return c.clone();
        }
        let voice = self.next_voice(VoiceCategory::Narrator);
        let narrator = Character::with_voice(NARRATOR, "Storyteller", &voice);
        self.assigned.insert(NARRATOR.to_lowercase(), narrator.clone());
        narrator
    }

    /// Character for `speaker`, analysing the name through `client` the
    /// first time an unknown speaker shows up.
    pub async fn resolve(&mut self, speaker: &str, client: &ApiClient) -> Character {
        if let Some(c) = self.lookup(speaker) {
            return c.clone();
        }
        if speaker.eq_ignore_ascii_case(NARRATOR) {
            return self.narrator();
        }
        let analysis = client.analyze_name(speaker).await;
        debug!("Name analysis for '{}' ({:?}): {:?}", speaker, analysis.source, analysis.profile);
        self.cast_with(speaker, &analysis.profile)
    }

    pub fn cast_with(&mut self, speaker: &str, profile: &NameProfile) -> Character {
        if let Some(c) = self.lookup(speaker) {
            return c.clone();
        }
        let category = VoiceCategory::for_profile(profile);
        let voice = self.next_voice(category);
        let character = Character::with_voice(
            speaker,
            &format!(
                "{} voice, {} age group, {} personality",
                profile.gender, profile.age_group, profile.personality_trait
            ),
            &voice,
        );
        info!("Cast '{}' as {:?} voice {}", speaker, category, voice);
        self.assigned.insert(speaker.to_lowercase(), character.clone());
        character
    }

    fn next_voice(&mut self, category: VoiceCategory) -> String {
        let cursor = self.cursors.entry(category).or_insert(0);
        let voice = match self.pools.get(&category) {
            Some(pool) => pool[*cursor % pool.len()].clone(),
            None => {
                let pool = category.voices();
                pool[*cursor % pool.len()].to_string()
            }
        };
        *cursor += 1;
        voice
    }
}

use crate::core::config::Config;
use crate::core::state::{character_template, Character};
use crate::services::script::StoryRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct GenreInfo {
    pub name: &'static str,
    pub description: &'static str,
    /// Template keys of roles the genre usually features.
    pub common_characters: &'static [&'static str],
    pub themes: &'static [&'static str],
}

pub const GENRES: &[GenreInfo] = &[
    GenreInfo {
        name: "fantasy",
        description: "Magical worlds with mythical creatures and epic quests, where ordinary \
                      people discover extraordinary powers within themselves",
        common_characters: &["hero", "wizard", "knight", "dragon", "princess"],
        themes: &[
            "discovering inner strength",
            "friendship and loyalty",
            "magical transformation",
            "epic quest",
            "finding one's true identity",
        ],
    },
    GenreInfo {
        name: "adventure",
        description: "Exciting journeys with challenges and discoveries, where characters grow \
                      through facing their fears and overcoming obstacles",
        common_characters: &["hero", "friend", "villain", "guardian"],
        themes: &[
            "overcoming fear and doubt",
            "journey to unknown lands",
            "treasure hunting",
            "survival and resilience",
            "finding courage within",
        ],
    },
    GenreInfo {
        name: "mystery",
        description: "Puzzling stories with clues and revelations, where characters must solve \
                      complex problems while dealing with personal demons",
        common_characters: &["detective", "friend", "villain", "narrator"],
        themes: &[
            "solving a crime",
            "hidden secrets",
            "uncovering the truth",
            "suspense and intrigue",
            "justice and redemption",
        ],
    },
    GenreInfo {
        name: "sci-fi",
        description: "Futuristic stories with technology and space, exploring what it means to \
                      be human in an increasingly complex world",
        common_characters: &["hero", "mentor", "outcast", "villain"],
        themes: &[
            "space exploration",
            "technological advancement",
            "alien contact",
            "time travel",
            "humanity and identity",
        ],
    },
    GenreInfo {
        name: "romance",
        description: "Stories of love and relationships, where characters learn about \
                      themselves through connection with others",
        common_characters: &["hero", "princess", "friend", "outcast"],
        themes: &[
            "finding true love",
            "overcoming obstacles",
            "second chances",
            "destiny",
            "self-discovery through love",
        ],
    },
    GenreInfo {
        name: "comedy",
        description: "Humorous stories with funny situations, where laughter helps characters \
                      overcome challenges and find joy",
        common_characters: &["hero", "friend", "child", "outcast"],
        themes: &[
            "misadventures",
            "funny misunderstandings",
            "pranks",
            "finding joy in chaos",
        ],
    },
    GenreInfo {
        name: "fairy tale",
        description: "Traditional fairy tales with magical elements, where characters learn \
                      important life lessons through magical experiences",
        common_characters: &["princess", "knight", "wizard", "villain"],
        themes: &[
            "magical transformation",
            "true love",
            "good vs evil",
            "wishes come true",
            "learning life lessons",
        ],
    },
];

fn normalize(genre: &str) -> String {
    genre.trim().to_lowercase().replace(['_', '-'], " ")
}

/// Case, `_` and `-` are ignored, so `Fairy_Tale` and `sci fi` both match.
pub fn genre_info(genre: &str) -> Option<&'static GenreInfo> {
    let wanted = normalize(genre);
    GENRES.iter().find(|g| normalize(g.name) == wanted)
}

pub fn genre_names() -> Vec<&'static str> {
    GENRES.iter().map(|g| g.name).collect()
}

/// A ready-made story: request plus the cast it is written for.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryPreset {
    pub title: &'static str,
    pub request: StoryRequest,
    pub cast: Vec<Character>,
}

impl StoryPreset {
    fn new(title: &'static str, genre: &str, theme: &str, roles: &[(&str, Option<&str>)]) -> Self {
        let cast: Vec<Character> = roles
            .iter()
            .filter_map(|(template, name)| character_template(template, *name))
            .collect();
        let request = StoryRequest {
            genre: genre.to_string(),
            theme: theme.to_string(),
            characters: cast.iter().map(|c| c.name.clone()).collect(),
            ..StoryRequest::default()
        };
        Self {
            title,
            request,
            cast,
        }
    }

    pub fn label(&self) -> String {
        format!("{}: {}", self.title, self.request.theme)
    }

    /// Adds the preset's cast to the configured characters, replacing any
    /// with the same name, and returns its request.
    pub fn apply(&self, config: &mut Config) -> StoryRequest {
        for character in &self.cast {
            config
                .characters
                .retain(|c| !c.name.eq_ignore_ascii_case(&character.name));
            config.characters.push(character.clone());
        }
        self.request.clone()
    }
}

pub fn story_presets() -> Vec<StoryPreset> {
    vec![
        StoryPreset::new(
            "Fantasy",
            "fantasy",
            "friendship and courage",
            &[
                ("hero", Some("Alex")),
                ("wizard", Some("Merlin")),
                ("princess", Some("Elena")),
                ("villain", Some("Dark Lord")),
            ],
        ),
        StoryPreset::new(
            "Mystery",
            "mystery",
            "solving a puzzling crime",
            &[
                ("detective", Some("Sherlock")),
                ("friend", Some("Watson")),
                ("villain", Some("Criminal")),
                ("narrator", None),
            ],
        ),
        StoryPreset::new(
            "Adventure",
            "adventure",
            "journey to a magical land",
            &[
                ("hero", Some("Explorer")),
                ("friend", Some("Guide")),
                ("elder", Some("Wise One")),
                ("villain", Some("Rival")),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::template_names;

    #[test]
    fn test_genre_lookup() {
        assert_eq!(genre_info("Fairy_Tale").map(|g| g.name), Some("fairy tale"));
        assert_eq!(genre_info("sci fi").map(|g| g.name), Some("sci-fi"));
        assert!(genre_info("western").is_none());
        assert!(genre_info("mystery").unwrap().description.starts_with("Puzzling stories"));

        let templates = template_names();
        for genre in GENRES {
            assert!(genre.common_characters.iter().all(|c| templates.contains(c)));
        }
    }

    #[test]
    fn test_presets_are_complete() {
        let presets = story_presets();
        assert_eq!(presets.len(), 3);
        for preset in &presets {
            assert_eq!(preset.cast.len(), 4);
            assert_eq!(preset.request.characters.len(), 4);
            assert!(genre_info(&preset.request.genre).is_some());
            for character in &preset.cast {
                character.validate().unwrap();
            }
        }
        let fantasy = &presets[0];
        assert_eq!(fantasy.label(), "Fantasy: friendship and courage");
        assert_eq!(fantasy.request.characters, vec!["Alex", "Merlin", "Elena", "Dark Lord"]);
        assert_eq!(fantasy.cast[3].voice_id, "English_ManWithDeepVoice");
    }

    #[test]
    fn test_apply_merges_cast_into_config() {
        let mut config = Config::parse("characters:\n  - name: watson\n    voice_id: old_voice\n")
            .unwrap();
        let mystery = &story_presets()[1];
        let request = mystery.apply(&mut config);

        assert_eq!(request.genre, "mystery");
        assert_eq!(request.theme, "solving a puzzling crime");
        assert_eq!(config.characters.len(), 4);
        let watson: Vec<&Character> = config
            .characters
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case("watson"))
            .collect();
        assert_eq!(watson.len(), 1);
        assert_eq!(watson[0].voice_id, "English_radiant_girl");
    }
}

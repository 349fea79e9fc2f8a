use crate::core::state::{Character, StorySegment, NARRATOR};
use crate::services::llm::ChatMessage;
use crate::services::presets::genre_info;
use serde::{Deserialize, Serialize};

/// Longest speaker tag, in words, still read as a name.
const MAX_TAG_WORDS: usize = 4;

pub const STORY_SYSTEM_PROMPT: &str = "You are a master storyteller who creates \
emotionally engaging, character-driven stories with deep plots, \
memorable characters, and meaningful growth. Your stories make readers care deeply \
about the characters and their journeys.";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StoryRequest {
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default)]
    pub theme: String,
    /// Names of roster characters to feature.
    #[serde(default = "default_cast")]
    pub characters: Vec<String>,
    /// `short`, `medium` or `long`.
    #[serde(default = "default_length")]
    pub length: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_genre() -> String {
    "fantasy".to_string()
}
fn default_cast() -> Vec<String> {
    ["Hero", "Friend", "Villain", "Wizard"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_length() -> String {
    "medium".to_string()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    8000
}

impl Default for StoryRequest {
    fn default() -> Self {
        Self {
            genre: default_genre(),
            theme: String::new(),
            characters: default_cast(),
            length: default_length(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl StoryRequest {
    pub fn word_limit(&self) -> usize {
        match self.length.to_ascii_lowercase().as_str() {
            "short" => 100,
            "long" => 600,
            _ => 250,
        }
    }

    pub fn user_prompt(&self, roster: &[Character]) -> String {
        let descriptions: Vec<String> = self
            .characters
            .iter()
            .filter_map(|wanted| {
                let found = roster.iter().find(|c| c.name.eq_ignore_ascii_case(wanted));
                if found.is_none() {
                    log::warn!("Character '{}' is not in the roster, skipping", wanted);
                }
                found
            })
            .map(|c| format!("{}: {}", c.name, c.description))
            .collect();

        let setting = genre_info(&self.genre)
            .map(|g| format!("\nGenre: {}\n", g.description))
            .unwrap_or_default();

        format!(
            r#"Create an engaging {genre} story about {theme} with approximately {words} words.
{setting}
Characters: {cast}

Story Requirements:
- Give each character a memorable, realistic name that fits their personality
- Include meaningful dialogue that reveals character traits
- Build tension and conflict that drives the plot
- End with a satisfying resolution that shows character growth

**CRITICAL FORMATTING RULES:**
- Each line must start with the character's name followed by a colon and a space
- Use "{narrator}" for narrative descriptions
- Do NOT use parentheses, stage directions, or any formatting
- Do NOT embed dialogue inside narration
- Example format:
{narrator}: The sun rose over the valley.
Kael: I must find the ancient treasure!
Elara: Be careful, Kael!"#,
            genre = self.genre,
            theme = self.theme,
            words = self.word_limit(),
            cast = descriptions.join(", "),
            narrator = NARRATOR,
            setting = setting,
        )
    }

    pub fn messages(&self, roster: &[Character]) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(STORY_SYSTEM_PROMPT),
            ChatMessage::user(&self.user_prompt(roster)),
        ]
    }
}

/// Removes a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    match s.strip_prefix("```") {
        Some(rest) => {
            let body = match rest.find('\n') {
                Some(pos) if !rest[..pos].trim().contains(' ') => &rest[pos + 1..],
                _ => rest,
            };
            body.trim_end().trim_end_matches("```").trim().to_string()
        }
        None => s.to_string(),
    }
}

/// Splits a generated story into ordered, speaker-tagged segments.
pub struct SegmentParser;

impl SegmentParser {
    /// Every non-empty line yields one segment. Lines opening with a speaker
    /// tag are attributed to that speaker; all others to the narrator.
    pub fn parse(raw: &str) -> Vec<StorySegment> {
        let mut segments = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (speaker, text) = match split_tagged(line) {
                Some((speaker, text)) => (speaker, text),
                None => (NARRATOR.to_string(), line.to_string()),
            };
            if text.is_empty() {
                continue;
            }
            segments.push(StorySegment::new(segments.len(), &speaker, &text));
        }
        log::debug!("Parsed {} segments", segments.len());
        segments
    }

    /// Canonical form of a raw speaker tag, or `None` when the tag does not
    /// look like a name.
    pub fn canonical_speaker(tag: &str) -> Option<String> {
        let without_stage: String = strip_parentheticals(tag);
        let cleaned = without_stage.replace(['*', '_', '"'], " ");
        let words: Vec<&str> = cleaned.split_whitespace().collect();

        if words.is_empty() || words.len() > MAX_TAG_WORDS {
            return None;
        }
        if !words[0].chars().next().is_some_and(char::is_alphabetic) {
            return None;
        }
        let name_chars = |c: char| c.is_alphabetic() || matches!(c, '-' | '\'' | '.');
        if !words.iter().all(|w| w.chars().all(name_chars)) {
            return None;
        }

        Some(
            words
                .iter()
                .map(|w| title_case(w))
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

fn split_tagged(line: &str) -> Option<(String, String)> {
    let (tag, rest) = line.split_once(':')?;
    let speaker = SegmentParser::canonical_speaker(tag)?;
    // `**Kael:**` leaves the closing emphasis on the dialogue side.
    let text = rest.trim().trim_start_matches(['*', '_']).trim();
    Some((speaker, text.to_string()))
}

fn strip_parentheticals(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut capitalize = true;
    for c in word.chars() {
        if capitalize {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        capitalize = c == '-';
    }
    out
}

/// Recovers the script from a model's reasoning text when the answer itself
/// came back empty: everything from the first `Speaker:` tag of a known
/// speaker onward.
pub fn extract_script_from_reasoning(reasoning: &str, speakers: &[String]) -> Option<String> {
    // ASCII lowering keeps byte offsets aligned with the original.
    let haystack = reasoning.to_ascii_lowercase();
    let narrator = NARRATOR.to_string();
    let start = speakers
        .iter()
        .chain(std::iter::once(&narrator))
        .filter_map(|name| {
            let needle = format!("{}:", name.to_ascii_lowercase());
            haystack.match_indices(&needle).map(|(pos, _)| pos).find(|&pos| {
                pos == 0
                    || !haystack[..pos]
                        .chars()
                        .next_back()
                        .is_some_and(char::is_alphanumeric)
            })
        })
        .min()?;

    let script = reasoning[start..].trim();
    if script.is_empty() {
        None
    } else {
        Some(script.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::default_characters;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
        assert_eq!(
            strip_code_blocks("```text\nNarrator: Hi.\nKael: Yo.\n```"),
            "Narrator: Hi.\nKael: Yo."
        );
    }

    #[test]
    fn test_parse_basic_script() {
        let story = "Narrator: The sun rose over the valley.\n\
                     Kael: I must find the ancient treasure!\n\
                     \n\
                     Elara: Be careful, Kael!";
        let segments = SegmentParser::parse(story);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].speaker, "Narrator");
        assert!(segments[0].is_narration());
        assert_eq!(segments[1].speaker, "Kael");
        assert_eq!(segments[1].text, "I must find the ancient treasure!");
        assert_eq!(segments[2].speaker, "Elara");
        assert_eq!(segments[2].text, "Be careful, Kael!");
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(seg.index, i);
            assert!(seg.audio_path().is_none());
        }
    }

    #[test]
    fn test_speaker_canonicalisation() {
        let story = "NARRATOR: One.\n  narrator  : Two.\n**Narrator**: Three.\n\
                     **narrator:** Four.\nNarrator (softly): Five.\nold   MAN: Six.";
        let segments = SegmentParser::parse(story);
        let speakers: Vec<&str> = segments.iter().map(|s| s.speaker.as_str()).collect();
        assert_eq!(
            speakers,
            vec!["Narrator", "Narrator", "Narrator", "Narrator", "Narrator", "Old Man"]
        );
        assert_eq!(segments[3].text, "Four.");
        assert_eq!(segments[4].text, "Five.");
    }

    #[test]
    fn test_untagged_lines_go_to_narrator() {
        let story = "The wind howled.\nChapter 1: The Storm\nAt 3:00 the bells rang.\n\
                     This sentence is much too long to be a name: really.";
        let segments = SegmentParser::parse(story);
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.speaker == NARRATOR));
        assert_eq!(segments[1].text, "Chapter 1: The Storm");
        assert_eq!(segments[2].text, "At 3:00 the bells rang.");
    }

    #[test]
    fn test_parse_is_ordered_and_total() {
        let story = "Narrator: Dawn.\nplain line one\nKael: Go!\n\n**Elara**: Wait.\n\
                     plain line two\nVoryn (laughing): Never.";
        let segments = SegmentParser::parse(story);
        let lines: Vec<&str> = story.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        assert_eq!(segments.len(), lines.len());
        for (seg, line) in segments.iter().zip(&lines) {
            assert!(line.ends_with(&seg.text), "{:?} lost text from {:?}", seg, line);
        }
    }

    #[test]
    fn test_tag_without_dialogue_is_skipped() {
        let segments = SegmentParser::parse("Kael:\nKael: Now.");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[0].text, "Now.");
    }

    #[test]
    fn test_canonical_speaker() {
        assert_eq!(SegmentParser::canonical_speaker("jean-luc").as_deref(), Some("Jean-Luc"));
        assert_eq!(SegmentParser::canonical_speaker("  ").as_deref(), None);
        assert_eq!(SegmentParser::canonical_speaker("Agent 47").as_deref(), None);
        assert_eq!(SegmentParser::canonical_speaker("(aside)").as_deref(), None);
    }

    #[test]
    fn test_extract_script_from_reasoning() {
        let speakers = vec!["Hero".to_string(), "Villain".to_string()];
        let reasoning =
            "Let me plan the superhero arc.\nNARRATOR: Once upon a time.\nHERO: Onward!";
        assert_eq!(
            extract_script_from_reasoning(reasoning, &speakers).as_deref(),
            Some("NARRATOR: Once upon a time.\nHERO: Onward!")
        );
        assert!(extract_script_from_reasoning("no script here", &speakers).is_none());
    }

    #[test]
    fn test_prompt_mentions_roster_descriptions() {
        let request = StoryRequest {
            theme: "a stolen crown".to_string(),
            characters: vec!["hero".to_string(), "Nobody".to_string()],
            length: "short".to_string(),
            ..StoryRequest::default()
        };
        let messages = request.messages(&default_characters());
        assert_eq!(messages[0].role, "system");
        let prompt = &messages[1].content;
        assert!(prompt.contains("fantasy story about a stolen crown"));
        assert!(prompt.contains("approximately 100 words"));
        assert!(prompt.contains("Hero: A courageous protagonist"));
        assert!(!prompt.contains("Nobody"));
        assert!(prompt.contains("Genre: Magical worlds with mythical creatures"));

        let unknown = StoryRequest {
            genre: "western".to_string(),
            ..request
        };
        assert!(!unknown.messages(&default_characters())[1].content.contains("Genre:"));
    }
}

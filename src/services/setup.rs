use crate::core::config::Config;
use crate::services::presets::{genre_info, genre_names, story_presets, StoryPreset};
use crate::services::script::StoryRequest;
use anyhow::Result;
use inquire::validator::ValueRequiredValidator;
use inquire::{Confirm, Select, Text};

const CUSTOM_STORY: &str = "Custom story";
const LENGTHS: &[&str] = &["short", "medium", "long"];

/// Asks for the story to tell, starting from the configured request. A
/// preset brings its own cast, which is merged into the configured one.
pub fn run_setup(config: &mut Config) -> Result<StoryRequest> {
    let defaults = config.story.clone();
    let presets = story_presets();

    let start = Select::new("Start from:", start_options(&presets)).prompt()?;
    let chosen = presets.iter().find(|p| p.label() == start);

    let (genre, theme) = match chosen {
        Some(preset) => {
            let request = preset.apply(config);
            (request.genre, request.theme)
        }
        None => ask_genre_and_theme(&defaults)?,
    };
    let characters = match chosen {
        Some(preset) => preset.request.characters.clone(),
        None => defaults.characters.clone(),
    };

    let length = Select::new("Story length:", LENGTHS.to_vec())
        .with_starting_cursor(cursor_for(LENGTHS, &defaults.length))
        .prompt()?
        .to_string();

    let request = StoryRequest {
        genre,
        theme,
        characters,
        length,
        ..defaults
    };

    if request != config.story
        && Confirm::new("Save these choices as the default story?")
            .with_default(false)
            .prompt()?
    {
        config.story = request.clone();
        config.save()?;
        println!("Configuration saved.");
    }

    Ok(request)
}

fn ask_genre_and_theme(defaults: &StoryRequest) -> Result<(String, String)> {
    let genres = genre_names();
    let genre = Select::new("Story genre:", genres.clone())
        .with_starting_cursor(genre_cursor(&genres, &defaults.genre))
        .prompt()?
        .to_string();

    let mut theme = Text::new("What should the story be about?")
        .with_validator(ValueRequiredValidator::default());
    let help = theme_help(&genre);
    if let Some(help) = help.as_deref() {
        theme = theme.with_help_message(help);
    }
    if !defaults.theme.is_empty() {
        theme = theme.with_default(&defaults.theme);
    }
    Ok((genre, theme.prompt()?))
}

fn start_options(presets: &[StoryPreset]) -> Vec<String> {
    std::iter::once(CUSTOM_STORY.to_string())
        .chain(presets.iter().map(|p| p.label()))
        .collect()
}

fn theme_help(genre: &str) -> Option<String> {
    genre_info(genre).map(|g| format!("e.g. {}", g.themes.join(", ")))
}

fn genre_cursor(genres: &[&str], current: &str) -> usize {
    genre_info(current)
        .and_then(|info| genres.iter().position(|g| *g == info.name))
        .unwrap_or(0)
}

fn cursor_for(options: &[&str], current: &str) -> usize {
    options
        .iter()
        .position(|o| o.eq_ignore_ascii_case(current))
        .unwrap_or(0)
}

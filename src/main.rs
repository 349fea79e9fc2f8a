use anyhow::Result;
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::sync::Arc;
use storyteller::core::config::Config;
use storyteller::core::io::NativeStorage;
use storyteller::services::casting::suggest_voices;
use storyteller::services::client::ApiClient;
use storyteller::services::setup;
use storyteller::services::workflow::{self, StoryWorkflow};

#[derive(Debug, Parser)]
#[command(name = "storyteller")]
#[command(about = "Generates a story and narrates it with a voice per character")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Delete the files of the last story
    Cleanup {
        /// Also delete the merged story audio
        #[arg(long)]
        all: bool,
    },
    /// List the voices the account can use
    Voices,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // 1. Load Config
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid API settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    match cli.command {
        None => {}
        Some(Commands::Cleanup { all }) => return cleanup(&config, all).await,
        Some(Commands::Voices) => return list_voices(&config).await,
    }

    // 2. Story request, asked for unless running unattended
    let request = if config.unattended {
        config.story.clone()
    } else {
        setup::run_setup(&mut config)?
    };
    if request.theme.trim().is_empty() {
        anyhow::bail!("No story theme given. Set story.theme in config.yml.");
    }

    // 3. Initialize client and run
    let client = ApiClient::from_config(&config)?;
    let storage = Arc::new(NativeStorage::new());
    let mut workflow = StoryWorkflow::new(config, client, storage);
    let output = workflow.run(&request).await?;

    println!();
    println!("Audio:    {}", output.audio_path.display());
    println!("Script:   {}", output.manifest_path.display());
    println!(
        "Segments: {} ({:.1} s)",
        output.segments.len(),
        output.report.duration_ms as f64 / 1000.0
    );
    println!(
        "API calls: {}, estimated cost ${:.4}",
        output.usage.total_calls, output.usage.total_cost
    );

    Ok(())
}

async fn cleanup(config: &Config, all: bool) -> Result<()> {
    if !config.unattended
        && !Confirm::new(&format!(
            "Delete the files of the last story in {}?",
            config.audio.output_folder
        ))
        .with_default(false)
        .prompt()?
    {
        println!("Nothing deleted.");
        return Ok(());
    }
    let report = workflow::cleanup(config, &NativeStorage::new(), all).await?;
    println!(
        "Deleted {} files ({} already gone)",
        report.deleted, report.missing
    );
    Ok(())
}

async fn list_voices(config: &Config) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    let catalog = client.list_voices().await?;
    println!("{} voices available:", catalog.len());
    for id in catalog.voice_ids() {
        println!("  {}", id);
    }
    println!();
    println!("Suggested voices:");
    for (category, voice) in suggest_voices(&catalog) {
        println!("  {:<10} {}", format!("{:?}", category), voice);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_commands() {
        let cli = Cli::try_parse_from(["storyteller"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["storyteller", "cleanup", "--all"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Cleanup { all: true })));
        let cli = Cli::try_parse_from(["storyteller", "cleanup"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Cleanup { all: false })));
        let cli = Cli::try_parse_from(["storyteller", "voices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Voices)));
        assert!(Cli::try_parse_from(["storyteller", "cleanup", "--force"]).is_err());
    }
}

use crate::core::config::Config;
use crate::core::io::{partial_path, Storage};
use crate::core::state::{Character, StorySegment, VoiceParams};
use crate::services::casting::VoiceCaster;
use crate::services::client::ApiClient;
use crate::services::ledger::UsageSummary;
use crate::services::manifest::{CleanupReport, ScriptManifest};
use crate::services::script::{SegmentParser, StoryRequest};
use crate::services::tts::{AudioSettings, SynthesisMode};
use crate::utils::audio::{AssemblyReport, AudioAssembler};
use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

const STORY_FILE: &str = "story.txt";

/// Everything a finished run produced.
#[derive(Debug)]
pub struct StoryOutput {
    pub story: String,
    pub segments: Vec<StorySegment>,
    pub manifest_path: PathBuf,
    pub audio_path: PathBuf,
    pub report: AssemblyReport,
    pub usage: UsageSummary,
}

pub struct StoryWorkflow {
    config: Config,
    client: ApiClient,
    caster: VoiceCaster,
    storage: Arc<dyn Storage>,
}

impl StoryWorkflow {
    pub fn new(config: Config, client: ApiClient, storage: Arc<dyn Storage>) -> Self {
        let caster = VoiceCaster::with_defaults(&config.characters);
        Self {
            config,
            client,
            caster,
            storage,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn caster(&self) -> &VoiceCaster {
        &self.caster
    }

    fn output_folder(&self) -> &Path {
        Path::new(&self.config.audio.output_folder)
    }

    pub async fn run(&mut self, request: &StoryRequest) -> Result<StoryOutput> {
        println!("Generating story...");
        let story = self
            .client
            .generate_story(request, &self.caster.roster())
            .await
            .context("Story generation failed")?;
        let story_path = self.output_folder().join(STORY_FILE);
        self.storage.write(&story_path, story.as_bytes()).await?;

        let mut segments = SegmentParser::parse(&story);
        if segments.is_empty() {
            bail!("The generated story contains no speakable text");
        }
        println!("Story parsed into {} segments", segments.len());

        if self.config.audio.discover_voices {
            self.discover_voices().await;
        }
        let cast = self.cast(&segments).await;

        let run_token = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        println!("Synthesizing audio ({} segments)...", segments.len());
        let paths = self.synthesize_all(&segments, &cast, &run_token).await?;
        for (segment, path) in segments.iter_mut().zip(paths) {
            segment.attach_audio(path)?;
        }

        let voices: Vec<String> = cast.iter().map(|c| c.voice_id.clone()).collect();
        let manifest = ScriptManifest::from_segments(&segments, &voices)?;
        let manifest_path = self.output_folder().join(&self.config.audio.script_file);
        manifest.write(&manifest_path, self.storage.as_ref()).await?;

        println!("Merging audio...");
        let audio_path = self
            .output_folder()
            .join(&self.config.audio.output_file)
            .with_extension(self.client.audio_settings().extension());
        let pause_ms = self.config.audio.pause_ms;
        let output = audio_path.clone();
        let report = tokio::task::spawn_blocking(move || {
            AudioAssembler::assemble(&manifest, pause_ms, &output)
        })
        .await
        .context("Audio assembly task failed")?
        .context("Failed to assemble story audio")?;

        println!("Story complete: {:?}", audio_path);
        let ledger = self.client.ledger();
        ledger.log_summary();

        Ok(StoryOutput {
            story,
            segments,
            manifest_path,
            audio_path,
            report,
            usage: ledger.summary(),
        })
    }

    /// Casts from the account's voice catalogue. A failed query keeps the
    /// bundled voices.
    async fn discover_voices(&mut self) {
        match self.client.list_voices().await {
            Ok(catalog) => self.caster.use_catalog(&catalog),
            Err(e) => warn!("Voice discovery failed, keeping bundled voices: {}", e),
        }
    }

    /// One character per segment. Each distinct speaker is resolved once, in
    /// order of first appearance.
    async fn cast(&mut self, segments: &[StorySegment]) -> Vec<Character> {
        let mut by_speaker: HashMap<&str, Character> = HashMap::new();
        for segment in segments {
            if !by_speaker.contains_key(segment.speaker.as_str()) {
                let character = self.caster.resolve(&segment.speaker, &self.client).await;
                by_speaker.insert(&segment.speaker, character);
            }
        }
        info!("Cast {} speakers", by_speaker.len());
        segments
            .iter()
            .map(|s| by_speaker[s.speaker.as_str()].clone())
            .collect()
    }

    /// Synthesizes every segment, at most `audio.concurrency` at a time. The
    /// first failure stops segments that have not started yet; those in
    /// flight finish, and that failure is returned.
    async fn synthesize_all(
        &self,
        segments: &[StorySegment],
        cast: &[Character],
        run_token: &str,
    ) -> Result<Vec<PathBuf>> {
        let pb = ProgressBar::new(segments.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )?
                .progress_chars("#>-"),
        );

        let extension = self.client.audio_settings().extension();
        let folder = self.output_folder();
        let failed = AtomicBool::new(false);
        let failed = &failed;
        let mut results = futures_util::stream::iter(segments.iter().zip(cast).enumerate())
            .map(|(i, (segment, character))| {
                let name = artifact_name(&segment.speaker, run_token, segment.index, extension);
                let path = folder.join(name);
                let pb = pb.clone();
                async move {
                    if failed.load(Ordering::SeqCst) {
                        debug!("Skipping segment {}, an earlier one failed", segment.index);
                        return (i, Ok(None));
                    }
                    let outcome = self
                        .synthesize_segment(segment, &character.voice_params(), &path)
                        .await
                        .with_context(|| {
                            format!("Segment {} ({}) failed", segment.index, segment.speaker)
                        });
                    match outcome {
                        Ok(()) => {
                            pb.inc(1);
                            (i, Ok(Some(path)))
                        }
                        Err(e) => {
                            failed.store(true, Ordering::SeqCst);
                            (i, Err(e))
                        }
                    }
                }
            })
            .buffer_unordered(self.config.audio.concurrency.max(1));

        let mut paths: Vec<Option<PathBuf>> = vec![None; segments.len()];
        let mut first_error = None;
        while let Some((i, result)) = results.next().await {
            match result {
                Ok(path) => paths[i] = path,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!("{:#}", e),
            }
        }

        if let Some(e) = first_error {
            pb.abandon();
            return Err(e);
        }
        pb.finish_with_message("Synthesis complete");
        paths
            .into_iter()
            .zip(segments)
            .map(|(path, segment)| {
                path.with_context(|| format!("Segment {} produced no audio", segment.index))
            })
            .collect()
    }

    async fn synthesize_segment(
        &self,
        segment: &StorySegment,
        voice: &VoiceParams,
        path: &Path,
    ) -> Result<()> {
        match self.client.mode_for(&segment.text) {
            SynthesisMode::Sync => {
                let audio = self.client.synthesize(segment, voice).await?;
                self.storage.write_atomic(path, &audio).await?;
            }
            SynthesisMode::Streaming => self.stream_to_file(segment, voice, path).await?,
        }
        debug!("Segment {} written to {}", segment.index, path.display());
        Ok(())
    }

    /// Streams audio into a `.part` file that is renamed into place once the
    /// stream completes, and removed if it does not.
    async fn stream_to_file(
        &self,
        segment: &StorySegment,
        voice: &VoiceParams,
        path: &Path,
    ) -> Result<()> {
        let part = partial_path(path);
        if let Some(parent) = part.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("Failed to create {}", part.display()))?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
        let producer = self.client.synthesize_streaming(segment, voice, tx);
        let writer = async move {
            while let Some(chunk) = rx.recv().await {
                file.write_all(&chunk).await?;
            }
            file.flush().await
        };
        let (produced, written) = tokio::join!(producer, writer);

        // A failed write closes the channel, so the writer's error comes first.
        let outcome = match (produced, written) {
            (_, Err(e)) => Err(anyhow::Error::from(e).context("Failed to write streamed audio")),
            (Err(e), Ok(())) => Err(e.into()),
            (Ok(()), Ok(())) => Ok(()),
        };
        if let Err(e) = outcome {
            if let Err(cleanup) = self.storage.delete(&part).await {
                warn!("Failed to remove {}: {:#}", part.display(), cleanup);
            }
            return Err(e);
        }

        tokio::fs::rename(&part, path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }
}

/// `{Speaker}_{run token}_{index:04}.{ext}`, with the speaker reduced to
/// characters that are safe in file names.
pub fn artifact_name(speaker: &str, run_token: &str, index: usize, extension: &str) -> String {
    let speaker: String = speaker
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}_{:04}.{}", speaker, run_token, index, extension)
}

/// Removes what a previous run left in the output folder: the segment files
/// its manifest lists, the manifest and the story text. The merged story
/// audio goes too when `include_audio` is set.
pub async fn cleanup(
    config: &Config,
    storage: &dyn Storage,
    include_audio: bool,
) -> Result<CleanupReport> {
    let folder = Path::new(&config.audio.output_folder);
    let manifest_path = folder.join(&config.audio.script_file);
    let mut report = if storage.exists(&manifest_path).await? {
        ScriptManifest::remove_artifacts(&manifest_path, storage).await?
    } else {
        info!("No manifest at {}", manifest_path.display());
        CleanupReport::default()
    };
    report.remove(&folder.join(STORY_FILE), storage).await?;
    if include_audio {
        let extension = AudioSettings::from_config(&config.audio).extension().to_string();
        let audio_path = folder.join(&config.audio.output_file).with_extension(extension);
        report.remove(&audio_path, storage).await?;
    }
    Ok(report)
}

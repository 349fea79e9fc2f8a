use crate::core::io::Storage;
use crate::core::state::StorySegment;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub index: usize,
    pub speaker: String,
    pub voice: String,
    pub text: String,
    pub audio_path: PathBuf,
}

/// Files a cleanup removed, and listed files that were already gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub missing: usize,
}

impl CleanupReport {
    pub(crate) async fn remove(&mut self, path: &Path, storage: &dyn Storage) -> Result<()> {
        if storage.exists(path).await? {
            storage.delete(path).await?;
            self.deleted += 1;
        } else {
            self.missing += 1;
        }
        Ok(())
    }
}

/// The ordered record of a run's segments and their audio files. Assembly
/// order comes from here and nowhere else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScriptManifest {
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub entries: Vec<ManifestEntry>,
}

impl ScriptManifest {
    /// `voices[i]` is the voice used for `segments[i]`. Every segment must
    /// already carry its audio.
    pub fn from_segments(segments: &[StorySegment], voices: &[String]) -> Result<Self> {
        if segments.len() != voices.len() {
            bail!(
                "{} segments but {} voices given for the manifest",
                segments.len(),
                voices.len()
            );
        }
        let entries = segments
            .iter()
            .zip(voices)
            .map(|(segment, voice)| {
                let audio_path = segment
                    .audio_path()
                    .with_context(|| format!("Segment {} has no audio", segment.index))?;
                Ok(ManifestEntry {
                    index: segment.index,
                    speaker: segment.speaker.clone(),
                    voice: voice.clone(),
                    text: segment.text.clone(),
                    audio_path: audio_path.to_path_buf(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            created_at: Some(chrono::Utc::now()),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn write(&self, path: &Path, storage: &dyn Storage) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        storage.write_atomic(path, json.as_bytes()).await?;
        log::info!("Script manifest saved to {}", path.display());
        Ok(())
    }

    pub async fn read(path: &Path, storage: &dyn Storage) -> Result<Self> {
        let content = storage.read(path).await?;
        serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Deletes every audio file the manifest at `path` lists, then the
    /// manifest itself.
    pub async fn remove_artifacts(path: &Path, storage: &dyn Storage) -> Result<CleanupReport> {
        let manifest = Self::read(path, storage).await?;
        let mut report = CleanupReport::default();
        for entry in &manifest.entries {
            report
                .remove(&entry.audio_path, storage)
                .await
                .with_context(|| format!("Failed to delete {}", entry.audio_path.display()))?;
        }
        storage.delete(path).await?;
        report.deleted += 1;
        log::info!(
            "Removed {} files for {} ({} already gone)",
            report.deleted,
            path.display(),
            report.missing
        );
        Ok(report)
    }

    /// Human readable transcript, one `Speaker: text` line per entry.
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    fn segments() -> Vec<StorySegment> {
        let mut a = StorySegment::new(0, "Narrator", "Dawn broke.");
        a.attach_audio(PathBuf::from("out/Narrator_0000.mp3")).unwrap();
        let mut b = StorySegment::new(1, "Kael", "Onward!");
        b.attach_audio(PathBuf::from("out/Kael_0001.mp3")).unwrap();
        vec![a, b]
    }

    #[tokio::test]
    async fn test_write_then_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("story_script.json");
        let storage = NativeStorage::new();

        let voices = vec![
            "English_expressive_narrator".to_string(),
            "English_PassionateWarrior".to_string(),
        ];
        let manifest = ScriptManifest::from_segments(&segments(), &voices)?;
        manifest.write(&path, &storage).await?;

        assert!(!crate::core::io::partial_path(&path).exists());
        let loaded = ScriptManifest::read(&path, &storage).await?;
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.entries[1].speaker, "Kael");
        assert_eq!(loaded.transcript(), "Narrator: Dawn broke.\nKael: Onward!");
        Ok(())
    }

    #[test]
    fn test_segment_without_audio_is_rejected() {
        let mut segs = segments();
        segs.push(StorySegment::new(2, "Elara", "Wait!"));
        let voices = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let err = ScriptManifest::from_segments(&segs, &voices).unwrap_err();
        assert!(err.to_string().contains("Segment 2"));

        assert!(ScriptManifest::from_segments(&segments(), &voices).is_err());
    }

    #[tokio::test]
    async fn test_remove_artifacts_deletes_listed_files_and_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let kept = dir.path().join("complete_story.mp3");
        std::fs::write(&kept, b"final")?;

        let mut segs = Vec::new();
        for (i, speaker) in ["Narrator", "Kael", "Elara"].iter().enumerate() {
            let audio = dir.path().join(format!("{}_{:04}.mp3", speaker, i));
            if i != 2 {
                std::fs::write(&audio, b"clip")?;
            }
            let mut segment = StorySegment::new(i, speaker, "Line.");
            segment.attach_audio(audio)?;
            segs.push(segment);
        }
        let voices = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let path = dir.path().join("story_script.json");
        ScriptManifest::from_segments(&segs, &voices)?
            .write(&path, &storage)
            .await?;

        let report = ScriptManifest::remove_artifacts(&path, &storage).await?;
        assert_eq!(report, CleanupReport { deleted: 3, missing: 1 });
        assert!(!path.exists());
        assert!(segs.iter().all(|s| !s.audio_path().is_some_and(Path::exists)));
        assert!(kept.exists());

        assert!(ScriptManifest::remove_artifacts(&path, &storage).await.is_err());
        Ok(())
    }
}

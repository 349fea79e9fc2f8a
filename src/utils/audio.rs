//! Joins per-segment audio files into one playable file.
//!
//! Only container framing is touched: MP3 files are cut into MPEG Layer III
//! frames, WAV files into their `fmt ` and `data` chunks. Nothing is decoded.

use crate::core::error::AssemblyError;
use crate::core::io::partial_path;
use crate::services::manifest::ScriptManifest;
use log::{debug, info};
use std::fs;
use std::path::Path;

const MPEG1_BITRATES: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const MPEG2_BITRATES: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];
const SAMPLE_RATES: [u32; 3] = [44100, 48000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp3,
    Wav,
}

impl Container {
    fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            Container::Wav
        } else {
            Container::Mp3
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MpegVersion {
    V1,
    V2,
    V25,
}

/// One MPEG Layer III frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    raw: [u8; 4],
    version: MpegVersion,
    bitrate: u32,
    sample_rate: u32,
    padding: bool,
    protected: bool,
    mono: bool,
}

impl FrameHeader {
    fn parse(b: &[u8]) -> Option<Self> {
        if b.len() < 4 || b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (b[1] >> 3) & 0b11 {
            0b00 => MpegVersion::V25,
            0b10 => MpegVersion::V2,
            0b11 => MpegVersion::V1,
            _ => return None,
        };
        // Layer III only.
        if (b[1] >> 1) & 0b11 != 0b01 {
            return None;
        }
        let bitrate_index = (b[2] >> 4) as usize;
        let rate_index = ((b[2] >> 2) & 0b11) as usize;
        if rate_index == 3 {
            return None;
        }
        let kbps = match version {
            MpegVersion::V1 => MPEG1_BITRATES[bitrate_index],
            _ => MPEG2_BITRATES[bitrate_index],
        };
        if kbps == 0 {
            return None;
        }
        let sample_rate = match version {
            MpegVersion::V1 => SAMPLE_RATES[rate_index],
            MpegVersion::V2 => SAMPLE_RATES[rate_index] / 2,
            MpegVersion::V25 => SAMPLE_RATES[rate_index] / 4,
        };

        Some(Self {
            raw: [b[0], b[1], b[2], b[3]],
            version,
            bitrate: kbps * 1000,
            sample_rate,
            padding: b[2] & 0b10 != 0,
            protected: b[1] & 0b1 == 0,
            mono: b[3] >> 6 == 0b11,
        })
    }

    fn frame_len(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::V1 => 144,
            _ => 72,
        };
        (coefficient * self.bitrate / self.sample_rate) as usize + usize::from(self.padding)
    }

    fn samples(&self) -> u64 {
        match self.version {
            MpegVersion::V1 => 1152,
            _ => 576,
        }
    }

    fn side_info_len(&self) -> usize {
        match (self.version, self.mono) {
            (MpegVersion::V1, true) => 17,
            (MpegVersion::V1, false) => 32,
            (_, true) => 9,
            (_, false) => 17,
        }
    }

    /// Encoder metadata frames (Xing/Info, VBRI) carry no audio.
    fn is_metadata_frame(&self, frame: &[u8]) -> bool {
        let xing = 4 + if self.protected { 2 } else { 0 } + self.side_info_len();
        let tag_at = |offset: usize, tag: &[u8]| frame.get(offset..offset + 4) == Some(tag);
        tag_at(xing, b"Xing") || tag_at(xing, b"Info") || tag_at(36, b"VBRI")
    }

    /// A frame of silence in the same stream format: no CRC, no padding and
    /// an all-zero body, which decodes to zero samples.
    fn silent_frame(&self) -> Vec<u8> {
        let header = Self {
            padding: false,
            protected: false,
            ..*self
        };
        let mut frame = vec![0u8; header.frame_len()];
        frame[0] = self.raw[0];
        frame[1] = self.raw[1] | 0b1;
        frame[2] = self.raw[2] & !0b10;
        frame[3] = self.raw[3];
        frame
    }
}

struct Mp3Audio {
    first: FrameHeader,
    frames: Vec<u8>,
    samples: u64,
}

fn strip_tags(mut bytes: &[u8]) -> &[u8] {
    while bytes.len() >= 10 && &bytes[..3] == b"ID3" {
        let size = bytes[6..10]
            .iter()
            .fold(0usize, |acc, b| (acc << 7) | (b & 0x7F) as usize);
        let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
        let end = (10 + size + footer).min(bytes.len());
        bytes = &bytes[end..];
    }
    if bytes.len() >= 128 && &bytes[bytes.len() - 128..bytes.len() - 125] == b"TAG" {
        bytes = &bytes[..bytes.len() - 128];
    }
    bytes
}

fn parse_mp3(path: &Path, bytes: &[u8]) -> Result<Mp3Audio, AssemblyError> {
    let body = strip_tags(bytes);
    let mut first: Option<FrameHeader> = None;
    let mut frames = Vec::with_capacity(body.len());
    let mut samples = 0u64;
    let mut pos = 0usize;

    while pos + 4 <= body.len() {
        let Some(header) = FrameHeader::parse(&body[pos..]) else {
            pos += 1;
            continue;
        };
        let len = header.frame_len();
        if pos + len > body.len() {
            debug!("Dropping truncated frame at end of {}", path.display());
            break;
        }
        let frame = &body[pos..pos + len];
        pos += len;

        match first {
            None if header.is_metadata_frame(frame) => continue,
            None => first = Some(header),
            Some(f) if f.sample_rate != header.sample_rate || f.mono != header.mono => {
                return Err(AssemblyError::FormatMismatch {
                    path: path.to_path_buf(),
                    reason: format!(
                        "frame at byte {} is {} Hz, stream started at {} Hz",
                        pos - len,
                        header.sample_rate,
                        f.sample_rate
                    ),
                });
            }
            Some(_) => {}
        }
        frames.extend_from_slice(frame);
        samples += header.samples();
    }

    let first = first.ok_or_else(|| AssemblyError::InvalidAudio {
        path: path.to_path_buf(),
        reason: "no MPEG Layer III frames found".to_string(),
    })?;
    Ok(Mp3Audio {
        first,
        frames,
        samples,
    })
}

struct WavInfo<'a> {
    fmt: &'a [u8],
    data: &'a [u8],
}

impl WavInfo<'_> {
    fn sample_rate(&self) -> u32 {
        u32::from_le_bytes([self.fmt[4], self.fmt[5], self.fmt[6], self.fmt[7]])
    }

    fn byte_rate(&self) -> u32 {
        u32::from_le_bytes([self.fmt[8], self.fmt[9], self.fmt[10], self.fmt[11]])
    }

    fn block_align(&self) -> usize {
        u16::from_le_bytes([self.fmt[12], self.fmt[13]]) as usize
    }

    fn duration_ms(&self) -> u64 {
        match self.byte_rate() {
            0 => 0,
            rate => self.data.len() as u64 * 1000 / rate as u64,
        }
    }
}

fn scan_wav<'a>(path: &Path, bytes: &'a [u8]) -> Result<WavInfo<'a>, AssemblyError> {
    let invalid = |reason: &str| AssemblyError::InvalidAudio {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if bytes.len() < 12 || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(invalid("not a RIFF/WAVE file"));
    }

    let mut fmt = None;
    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size =
            u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
                as usize;
        let start = pos + 8;
        // Streamed files may declare a larger data chunk than they hold.
        let end = start.saturating_add(size).min(bytes.len());

        match id {
            b"fmt " => {
                if end - start < 16 {
                    return Err(invalid("fmt chunk too short"));
                }
                fmt = Some(&bytes[start..end]);
            }
            b"data" => {
                let fmt = fmt.ok_or_else(|| invalid("data chunk before fmt chunk"))?;
                return Ok(WavInfo {
                    fmt,
                    data: &bytes[start..end],
                });
            }
            _ => {}
        }
        // Chunks are word aligned.
        pos = end + (size & 1);
    }
    Err(invalid("missing data chunk"))
}

fn wav_file(fmt: &[u8], data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let fmt_pad = fmt.len() & 1;
    let data_pad = data.len() & 1;
    let riff_size = 4 + 8 + fmt.len() + fmt_pad + 8 + data.len() + data_pad;
    let too_large =
        || std::io::Error::new(std::io::ErrorKind::InvalidData, "WAV output exceeds 4 GiB");
    let riff_size = u32::try_from(riff_size).map_err(|_| too_large())?;
    let data_len = u32::try_from(data.len()).map_err(|_| too_large())?;

    let mut out = Vec::with_capacity(riff_size as usize + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
    out.extend_from_slice(fmt);
    out.resize(out.len() + fmt_pad, 0);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + data_pad, 0);
    Ok(out)
}

/// What an assembly produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    pub container: Container,
    pub segments: usize,
    pub duration_ms: u64,
    pub bytes: u64,
}

pub struct AudioAssembler;

impl AudioAssembler {
    /// Concatenates the manifest's audio files in manifest order with
    /// `pause_ms` of silence between consecutive segments.
    ///
    /// Every artifact is checked before anything is written, and the output
    /// appears at `output` only once it is complete.
    pub fn assemble(
        manifest: &ScriptManifest,
        pause_ms: u64,
        output: &Path,
    ) -> Result<AssemblyReport, AssemblyError> {
        if manifest.is_empty() {
            return Err(AssemblyError::EmptyManifest);
        }
        for entry in &manifest.entries {
            if !entry.audio_path.is_file() {
                return Err(AssemblyError::MissingArtifact {
                    index: entry.index,
                    path: entry.audio_path.clone(),
                });
            }
        }

        let files = manifest
            .entries
            .iter()
            .map(|e| fs::read(&e.audio_path))
            .collect::<Result<Vec<_>, _>>()?;

        let container = Container::detect(&files[0]);
        let (bytes, duration_ms) = match container {
            Container::Wav => Self::join_wav(manifest, &files, pause_ms)?,
            Container::Mp3 => Self::join_mp3(manifest, &files, pause_ms)?,
        };

        write_atomic(output, &bytes)?;
        info!(
            "Assembled {} segments into {} ({} ms)",
            manifest.len(),
            output.display(),
            duration_ms
        );
        Ok(AssemblyReport {
            container,
            segments: manifest.len(),
            duration_ms,
            bytes: bytes.len() as u64,
        })
    }

    fn join_wav(
        manifest: &ScriptManifest,
        files: &[Vec<u8>],
        pause_ms: u64,
    ) -> Result<(Vec<u8>, u64), AssemblyError> {
        let infos = manifest
            .entries
            .iter()
            .zip(files)
            .map(|(entry, bytes)| scan_wav(&entry.audio_path, bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let base = &infos[0];
        let silence_frames = base.sample_rate() as u64 * pause_ms / 1000;
        let silence = vec![0u8; silence_frames as usize * base.block_align()];

        let mut data = Vec::new();
        for (i, (info, entry)) in infos.iter().zip(&manifest.entries).enumerate() {
            if info.fmt != base.fmt {
                return Err(AssemblyError::FormatMismatch {
                    path: entry.audio_path.clone(),
                    reason: "sample rate, channels or sample size differ from the first segment"
                        .to_string(),
                });
            }
            if i > 0 {
                data.extend_from_slice(&silence);
            }
            data.extend_from_slice(info.data);
        }

        let duration_ms = match base.byte_rate() {
            0 => 0,
            rate => data.len() as u64 * 1000 / rate as u64,
        };
        Ok((wav_file(base.fmt, &data)?, duration_ms))
    }

    fn join_mp3(
        manifest: &ScriptManifest,
        files: &[Vec<u8>],
        pause_ms: u64,
    ) -> Result<(Vec<u8>, u64), AssemblyError> {
        let streams = manifest
            .entries
            .iter()
            .zip(files)
            .map(|(entry, bytes)| parse_mp3(&entry.audio_path, bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let base = streams[0].first;
        let silent_frame = base.silent_frame();
        let frame_samples = base.samples();
        let silent_count =
            (pause_ms * base.sample_rate as u64 + 500 * frame_samples) / (1000 * frame_samples);

        let mut out = Vec::new();
        let mut samples = 0u64;
        for (i, (stream, entry)) in streams.iter().zip(&manifest.entries).enumerate() {
            if stream.first.sample_rate != base.sample_rate || stream.first.mono != base.mono {
                return Err(AssemblyError::FormatMismatch {
                    path: entry.audio_path.clone(),
                    reason: format!(
                        "{} Hz {} differs from {} Hz {}",
                        stream.first.sample_rate,
                        if stream.first.mono { "mono" } else { "stereo" },
                        base.sample_rate,
                        if base.mono { "mono" } else { "stereo" }
                    ),
                });
            }
            if i > 0 {
                for _ in 0..silent_count {
                    out.extend_from_slice(&silent_frame);
                }
                samples += silent_count * base.samples();
            }
            out.extend_from_slice(&stream.frames);
            samples += stream.samples;
        }

        Ok((out, samples * 1000 / base.sample_rate as u64))
    }
}

/// Playing time of an MP3 or WAV file.
pub fn audio_duration_ms(path: &Path) -> Result<u64, AssemblyError> {
    let bytes = fs::read(path)?;
    match Container::detect(&bytes) {
        Container::Wav => Ok(scan_wav(path, &bytes)?.duration_ms()),
        Container::Mp3 => {
            let audio = parse_mp3(path, &bytes)?;
            Ok(audio.samples * 1000 / audio.first.sample_rate as u64)
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = partial_path(path);
    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)
}

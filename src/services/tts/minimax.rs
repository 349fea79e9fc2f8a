use crate::core::config::ApiConfig;
use crate::core::error::ApiError;
use crate::services::llm::BaseResp;
use crate::services::tts::{
    AudioStream, SpeechAudio, SpeechBackend, SpeechRequest, StreamEvent, VoiceCatalog, VoiceInfo,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

/// Emotion labels the synthesis endpoint understands. Other labels are
/// character flavour only and are not sent.
const SUPPORTED_EMOTIONS: &[&str] = &[
    "happy", "sad", "angry", "fearful", "disgusted", "surprised", "neutral",
];

/// Final stream event status; its audio repeats the whole clip.
const STATUS_FINISHED: i64 = 2;

pub struct MiniMaxSpeechClient {
    api_key: String,
    synthesis_url: Url,
    voices_url: Url,
    client: reqwest::Client,
}

impl MiniMaxSpeechClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let mut synthesis_url = Url::parse(&format!("{}/v1/t2a_v2", base))
            .with_context(|| format!("Invalid base_url: {}", config.base_url))?;
        synthesis_url
            .query_pairs_mut()
            .append_pair("GroupId", &config.group_id);
        let voices_url = Url::parse(&format!("{}/v1/get_voice", base))
            .with_context(|| format!("Invalid base_url: {}", config.base_url))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_key: config.api_key.clone(),
            synthesis_url,
            voices_url,
            client,
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let resp = self
            .client
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct SpeechPayload<'a> {
    model: &'a str,
    text: &'a str,
    stream: bool,
    voice_setting: VoiceSetting<'a>,
    audio_setting: AudioSetting<'a>,
}

#[derive(Serialize)]
struct VoiceSetting<'a> {
    voice_id: &'a str,
    speed: f32,
    vol: f32,
    /// Semitones.
    pitch: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<&'a str>,
}

#[derive(Serialize)]
struct AudioSetting<'a> {
    sample_rate: u32,
    bitrate: u32,
    format: &'a str,
    channel: u8,
}

impl<'a> SpeechPayload<'a> {
    fn new(request: &'a SpeechRequest, stream: bool) -> Self {
        let voice = &request.voice;
        let emotion = SUPPORTED_EMOTIONS
            .iter()
            .find(|e| voice.emotion.eq_ignore_ascii_case(e))
            .copied();
        Self {
            model: &request.model,
            text: &request.text,
            stream,
            voice_setting: VoiceSetting {
                voice_id: &voice.voice_id,
                speed: voice.speed,
                vol: voice.volume,
                pitch: (voice.pitch * 12.0).round() as i32,
                emotion,
            },
            audio_setting: AudioSetting {
                sample_rate: request.audio.sample_rate,
                bitrate: request.audio.bitrate,
                format: &request.audio.format,
                channel: request.audio.channel,
            },
        }
    }
}

#[derive(Deserialize)]
struct SpeechResponse {
    data: Option<SpeechData>,
    extra_info: Option<ExtraInfo>,
    base_resp: Option<BaseResp>,
}

#[derive(Deserialize)]
struct SpeechData {
    audio: Option<String>,
    status: Option<i64>,
}

#[derive(Deserialize)]
struct ExtraInfo {
    usage_characters: Option<u64>,
}

fn parse_speech_json(body: &str) -> Result<SpeechResponse, ApiError> {
    let resp: SpeechResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::malformed(format!("Failed to parse speech response: {}", e)))?;
    if let Some(base) = &resp.base_resp {
        base.check()?;
    }
    Ok(resp)
}

fn decode_audio(hex_audio: &str) -> Result<Vec<u8>, ApiError> {
    hex::decode(hex_audio)
        .map_err(|e| ApiError::malformed(format!("Audio payload is not valid hex: {}", e)))
}

pub(crate) fn parse_speech_response(body: &str) -> Result<SpeechAudio, ApiError> {
    let resp = parse_speech_json(body)?;
    let audio_hex = resp
        .data
        .and_then(|d| d.audio)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::malformed("No audio data in speech response"))?;

    Ok(SpeechAudio {
        audio: decode_audio(&audio_hex)?,
        billed_units: resp.extra_info.and_then(|e| e.usage_characters),
    })
}

/// Decodes one `data:` payload of the event stream.
pub(crate) fn parse_stream_event(payload: &str) -> Result<Option<StreamEvent>, ApiError> {
    let resp = parse_speech_json(payload)?;
    let billed_units = resp.extra_info.and_then(|e| e.usage_characters);
    let Some(data) = resp.data else {
        return Ok(None);
    };

    if data.status == Some(STATUS_FINISHED) {
        return Ok(Some(StreamEvent::Finished { billed_units }));
    }
    match data.audio.filter(|a| !a.is_empty()) {
        Some(hex_audio) => Ok(Some(StreamEvent::Audio(decode_audio(&hex_audio)?))),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
struct VoiceListResponse {
    system_voice: Option<Vec<VoiceEntry>>,
    voice_cloning: Option<Vec<VoiceEntry>>,
    voice_generation: Option<Vec<VoiceEntry>>,
    voice_slots: Option<Vec<VoiceEntry>>,
    base_resp: Option<BaseResp>,
}

#[derive(Deserialize)]
struct VoiceEntry {
    voice_id: Option<String>,
    voice_name: Option<String>,
    description: Option<Vec<String>>,
}

fn into_voices(entries: Option<Vec<VoiceEntry>>) -> Vec<VoiceInfo> {
    entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| {
            let voice_id = e.voice_id.filter(|id| !id.is_empty())?;
            Some(VoiceInfo {
                voice_id,
                voice_name: e.voice_name.unwrap_or_default(),
                description: e.description.unwrap_or_default(),
            })
        })
        .collect()
}

/// Empty categories come back as `null`; music voices are not speech voices
/// and are left out.
pub(crate) fn parse_voice_catalog(body: &str) -> Result<VoiceCatalog, ApiError> {
    let resp: VoiceListResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::malformed(format!("Failed to parse voice list: {}", e)))?;
    if let Some(base) = &resp.base_resp {
        base.check()?;
    }
    let mut custom = into_voices(resp.voice_cloning);
    custom.extend(into_voices(resp.voice_generation));
    custom.extend(into_voices(resp.voice_slots));
    Ok(VoiceCatalog {
        system: into_voices(resp.system_voice),
        custom,
    })
}

/// Splits a server-sent event byte stream into `data:` payloads, across
/// arbitrary network chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_line(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Whatever trailing line the stream ended on without a newline.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_line(&line)
    }
}

fn data_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

struct EventStreamState {
    bytes: BoxStream<'static, Result<Vec<u8>, ApiError>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

fn event_stream(bytes: BoxStream<'static, Result<Vec<u8>, ApiError>>) -> AudioStream {
    let state = EventStreamState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    let events = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                match parse_stream_event(&payload) {
                    Ok(Some(event)) => return Some((Ok(event), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.pending.clear();
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = st.decoder.push(&chunk);
                    st.pending.extend(payloads);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    });
    Box::pin(events)
}

#[async_trait]
impl SpeechBackend for MiniMaxSpeechClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ApiError> {
        let resp = self
            .post(&self.synthesis_url, &SpeechPayload::new(request, false))
            .await?;
        let text = resp.text().await?;
        let audio = parse_speech_response(&text)?;
        debug!("Received {} bytes of audio", audio.audio.len());
        Ok(audio)
    }

    async fn open_stream(&self, request: &SpeechRequest) -> Result<AudioStream, ApiError> {
        let resp = self
            .post(&self.synthesis_url, &SpeechPayload::new(request, true))
            .await?;

        // Errors come back as a plain JSON body instead of an event stream.
        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if is_json {
            let text = resp.text().await?;
            parse_speech_json(&text)?;
            return Err(ApiError::malformed(format!(
                "Expected an event stream, got: {}",
                text
            )));
        }

        let bytes = resp
            .bytes_stream()
            .map(|item| item.map(|b| b.to_vec()).map_err(ApiError::from))
            .boxed();
        Ok(event_stream(bytes))
    }

    async fn list_voices(&self) -> Result<VoiceCatalog, ApiError> {
        let body = serde_json::json!({ "voice_type": "all" });
        let resp = self.post(&self.voices_url, &body).await?;
        let text = resp.text().await?;
        let catalog = parse_voice_catalog(&text)?;
        debug!("Voice list: {} system, {} custom", catalog.system.len(), catalog.custom.len());
        Ok(catalog)
    }
}

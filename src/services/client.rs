//! The one place remote calls are made: every call is routed to a model,
//! paced by the rate limiter, retried under the retry policy and, once it
//! succeeds, recorded in the usage ledger.

use crate::core::config::Config;
use crate::core::error::{ApiError, Endpoint, ErrorKind};
use crate::core::state::{Character, StorySegment, VoiceParams};
use crate::services::casting::NameProfile;
use crate::services::ledger::{PricingTable, UsageLedger, VOICE_CATALOG};
use crate::services::llm::{
    ChatMessage, GenerationBackend, GenerationRequest, GenerationResponse, MiniMaxChatClient,
};
use crate::services::rate_limit::RateLimiter;
use crate::services::retry::RetryPolicy;
use crate::services::router::{ModelRouter, TaskKind};
use crate::services::script::{extract_script_from_reasoning, strip_code_blocks, StoryRequest};
use crate::services::tts::minimax::MiniMaxSpeechClient;
use crate::services::tts::{
    AudioSettings, SpeechBackend, SpeechRequest, StreamEvent, SynthesisMode, TransportPolicy,
    VoiceCatalog,
};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

const NAME_ANALYSIS_SYSTEM_PROMPT: &str = "You are a name analysis expert. Analyze character \
names and provide structured information about their likely characteristics. Respond only with \
valid JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSource {
    CachedHit,
    RemoteHit,
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameAnalysis {
    pub profile: NameProfile,
    pub source: AnalysisSource,
}

pub struct ApiClient {
    router: ModelRouter,
    limiter: RateLimiter,
    retry: RetryPolicy,
    ledger: Arc<UsageLedger>,
    chat: Box<dyn GenerationBackend>,
    speech: Box<dyn SpeechBackend>,
    transport: TransportPolicy,
    streaming_threshold_chars: usize,
    audio: AudioSettings,
    name_cache: Mutex<HashMap<String, NameProfile>>,
}

impl ApiClient {
    pub fn new(
        config: &Config,
        chat: Box<dyn GenerationBackend>,
        speech: Box<dyn SpeechBackend>,
    ) -> Self {
        let mut rates = crate::services::ledger::default_pricing();
        rates.extend(config.models.pricing.clone());

        Self {
            router: ModelRouter::new(&config.models),
            limiter: RateLimiter::from_config(&config.rate_limits),
            retry: RetryPolicy::from_config(&config.rate_limits),
            ledger: Arc::new(UsageLedger::new(PricingTable::new(rates))),
            chat,
            speech,
            transport: config.audio.transport,
            streaming_threshold_chars: config.audio.streaming_threshold_chars,
            audio: AudioSettings::from_config(&config.audio),
            name_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Client talking to the MiniMax service configured in `config.api`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        if config.api.api_key.is_empty() {
            anyhow::bail!(
                "No API key configured. Set api.api_key in config.yml or MINIMAX_API_KEY."
            );
        }
        let chat = MiniMaxChatClient::new(&config.api)?;
        let speech = MiniMaxSpeechClient::new(&config.api)?;
        Ok(Self::new(config, Box::new(chat), Box::new(speech)))
    }

    pub fn ledger(&self) -> Arc<UsageLedger> {
        self.ledger.clone()
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn audio_settings(&self) -> &AudioSettings {
        &self.audio
    }

    pub fn mode_for(&self, text: &str) -> SynthesisMode {
        self.transport.mode_for(text, self.streaming_threshold_chars)
    }

    async fn chat_call(
        &self,
        task: TaskKind,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        operation: &'static str,
    ) -> Result<GenerationResponse, ApiError> {
        let model = self.router.select(task).to_string();
        let request = GenerationRequest {
            model: model.clone(),
            messages,
            temperature,
            max_tokens,
        };
        let units = request.estimated_units();

        let limiter = &self.limiter;
        let chat = self.chat.as_ref();
        let req = &request;
        let response = self
            .retry
            .execute(Endpoint::Chat, move || async move {
                limiter.acquire(Endpoint::Chat, units).await;
                chat.complete(req).await
            })
            .await
            .map_err(|e| e.with_context(Endpoint::Chat, &model, operation))?;

        // Some responses omit usage; fall back to a character estimate.
        let unreported = response.input_units == 0 && response.output_units == 0;
        let (input_units, output_units) = if unreported {
            let prompt: usize = request
                .messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum();
            let answer = response.content.chars().count()
                + response.reasoning.as_deref().map_or(0, |r| r.chars().count());
            ((prompt / 4) as u64, (answer / 4) as u64)
        } else {
            (response.input_units, response.output_units)
        };
        self.ledger.record(&model, Endpoint::Chat, input_units, output_units);
        Ok(response)
    }

    /// Generates the raw story script for `request`, describing the requested
    /// cast from `roster`.
    pub async fn generate_story(
        &self,
        request: &StoryRequest,
        roster: &[Character],
    ) -> Result<String, ApiError> {
        info!(
            "Generating {} story about '{}' ({})",
            request.genre, request.theme, request.length
        );
        let response = self
            .chat_call(
                TaskKind::StoryGeneration,
                request.messages(roster),
                request.temperature,
                request.max_tokens,
                "generate_story",
            )
            .await?;

        let content = strip_code_blocks(&response.content);
        if !content.is_empty() {
            debug!("Story length: {} characters", content.chars().count());
            return Ok(content);
        }

        let model = self.router.select(TaskKind::StoryGeneration);
        let speakers: Vec<String> = roster.iter().map(|c| c.name.clone()).collect();
        if let Some(script) = response
            .reasoning
            .as_deref()
            .and_then(|r| extract_script_from_reasoning(r, &speakers))
        {
            warn!("Story content was empty; recovered the script from the reasoning text");
            return Ok(script);
        }

        let err = if response.finish_reason.as_deref() == Some("length") {
            ApiError::malformed("Story generation hit the output token limit; try a shorter story")
        } else {
            ApiError::malformed("Story content is empty")
        };
        Err(err.with_context(Endpoint::Chat, model, "generate_story"))
    }

    /// Never fails: when the service cannot answer, the name is classified
    /// by spelling instead. Only remote answers are cached.
    pub async fn analyze_name(&self, name: &str) -> NameAnalysis {
        let key = name.trim().to_lowercase();
        let cached = self
            .name_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(profile) = cached {
            return NameAnalysis {
                profile,
                source: AnalysisSource::CachedHit,
            };
        }

        let prompt = format!(
            r#"Analyze the character name "{}" and provide the following information in JSON format:

{{
    "gender": "male/female/neutral/unknown",
    "age_group": "child/young_adult/adult/elder/unknown",
    "personality_trait": "heroic/friendly/villainous/wise/mysterious/neutral",
    "voice_type": "masculine/feminine/neutral/deep/soft/wise",
    "confidence": 0.0-1.0
}}

Respond with ONLY the JSON object, no additional text."#,
            name.trim()
        );
        let messages = vec![
            ChatMessage::system(NAME_ANALYSIS_SYSTEM_PROMPT),
            ChatMessage::user(&prompt),
        ];

        let remote = self
            .chat_call(TaskKind::NameAnalysis, messages, 0.3, 200, "analyze_name")
            .await;
        let parsed = match remote {
            Ok(response) => {
                serde_json::from_str::<NameProfile>(&strip_code_blocks(&response.content))
                    .map(NameProfile::normalized)
                    .map_err(|e| format!("unparsable analysis: {}", e))
            }
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(profile) => {
                self.name_cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, profile.clone());
                NameAnalysis {
                    profile,
                    source: AnalysisSource::RemoteHit,
                }
            }
            Err(reason) => {
                warn!("Name analysis for '{}' failed ({}), using pattern fallback", name, reason);
                NameAnalysis {
                    profile: NameProfile::from_name_patterns(name),
                    source: AnalysisSource::LocalFallback,
                }
            }
        }
    }

    fn speech_request(&self, segment: &StorySegment, voice: &VoiceParams) -> SpeechRequest {
        SpeechRequest {
            model: self.router.select(TaskKind::SpeechSynthesis).to_string(),
            text: segment.text.clone(),
            voice: voice.clone(),
            audio: self.audio.clone(),
        }
    }

    /// Whole audio clip for `segment`, over whichever transport the policy
    /// picks for its length.
    pub async fn synthesize(
        &self,
        segment: &StorySegment,
        voice: &VoiceParams,
    ) -> Result<Vec<u8>, ApiError> {
        if self.mode_for(&segment.text) == SynthesisMode::Streaming {
            let (tx, mut rx) = mpsc::channel(32);
            let producer = self.synthesize_streaming(segment, voice, tx);
            let consumer = async {
                let mut audio = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    audio.extend_from_slice(&chunk);
                }
                audio
            };
            let (result, audio) = tokio::join!(producer, consumer);
            result?;
            return Ok(audio);
        }

        let request = self.speech_request(segment, voice);
        let units = request.units();
        let limiter = &self.limiter;
        let speech = self.speech.as_ref();
        let req = &request;
        let audio = self
            .retry
            .execute(Endpoint::Speech, move || async move {
                limiter.acquire(Endpoint::Speech, units).await;
                speech.synthesize(req).await
            })
            .await
            .map_err(|e| e.with_context(Endpoint::Speech, &request.model, "synthesize"))?;

        self.ledger.record(
            &request.model,
            Endpoint::Speech,
            audio.billed_units.unwrap_or(units),
            0,
        );
        Ok(audio.audio)
    }

    /// Forwards audio chunks into `sink` as the service produces them.
    ///
    /// Only opening the stream is retried. Usage is recorded once, when the
    /// final event arrives; if `sink` is closed first the call ends with
    /// `ErrorKind::Cancelled` and nothing is recorded.
    pub async fn synthesize_streaming(
        &self,
        segment: &StorySegment,
        voice: &VoiceParams,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), ApiError> {
        let request = self.speech_request(segment, voice);
        let units = request.units();
        let model = request.model.clone();
        let context =
            |e: ApiError| e.with_context(Endpoint::Speech, &model, "synthesize_streaming");

        let limiter = &self.limiter;
        let speech = self.speech.as_ref();
        let req = &request;
        let mut stream = self
            .retry
            .execute(Endpoint::Speech, move || async move {
                limiter.acquire(Endpoint::Speech, units).await;
                speech.open_stream(req).await
            })
            .await
            .map_err(context)?;

        let mut chunks = 0usize;
        while let Some(event) = stream.next().await {
            match event.map_err(context)? {
                StreamEvent::Audio(chunk) => {
                    if sink.send(chunk).await.is_err() {
                        return Err(context(ApiError::new(
                            ErrorKind::Cancelled,
                            format!("receiver closed after {} chunks", chunks),
                        )));
                    }
                    chunks += 1;
                }
                StreamEvent::Finished { billed_units } => {
                    debug!("Stream for segment {} finished after {} chunks", segment.index, chunks);
                    self.ledger
                        .record(&model, Endpoint::Speech, billed_units.unwrap_or(units), 0);
                    return Ok(());
                }
            }
        }

        Err(context(ApiError::transient("stream ended without a final event")))
    }

    /// The voices this account can use. Paced and retried like synthesis, and
    /// recorded at no cost.
    pub async fn list_voices(&self) -> Result<VoiceCatalog, ApiError> {
        let limiter = &self.limiter;
        let speech = self.speech.as_ref();
        let catalog = self
            .retry
            .execute(Endpoint::Speech, move || async move {
                limiter.acquire(Endpoint::Speech, 0).await;
                speech.list_voices().await
            })
            .await
            .map_err(|e| e.with_context(Endpoint::Speech, VOICE_CATALOG, "list_voices"))?;

        self.ledger.record(VOICE_CATALOG, Endpoint::Speech, 0, 0);
        info!("Voice catalogue lists {} voices", catalog.len());
        Ok(catalog)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::state::default_characters;
    use crate::services::tts::{AudioStream, SpeechAudio, VoiceInfo};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    pub(crate) struct MockChat {
        pub responses: Mutex<VecDeque<Result<GenerationResponse, ApiError>>>,
        pub calls: AtomicUsize,
    }

    impl MockChat {
        pub fn with(responses: Vec<Result<GenerationResponse, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    pub(crate) fn reply(content: &str) -> GenerationResponse {
        GenerationResponse {
            content: content.to_string(),
            finish_reason: Some("stop".to_string()),
            input_units: 100,
            output_units: 50,
            ..GenerationResponse::default()
        }
    }

    #[async_trait]
    impl GenerationBackend for MockChat {
        async fn complete(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::malformed("no scripted response")))
        }
    }

    /// Returns `audio` for every request: whole for sync calls, in
    /// `chunk_size` pieces for streams.
    #[derive(Default)]
    pub(crate) struct MockSpeech {
        pub audio: Vec<u8>,
        pub chunk_size: usize,
        pub open_failures: Mutex<VecDeque<ApiError>>,
        pub sync_calls: AtomicUsize,
        pub stream_calls: AtomicUsize,
        pub catalog: Option<VoiceCatalog>,
    }

    impl MockSpeech {
        pub fn new(audio: Vec<u8>, chunk_size: usize) -> Self {
            Self {
                audio,
                chunk_size,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SpeechBackend for MockSpeech {
        async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ApiError> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.open_failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(SpeechAudio {
                audio: self.audio.clone(),
                billed_units: Some(request.units()),
            })
        }

        async fn open_stream(&self, request: &SpeechRequest) -> Result<AudioStream, ApiError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.open_failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            let mut events: Vec<Result<StreamEvent, ApiError>> = self
                .audio
                .chunks(self.chunk_size.max(1))
                .map(|c| Ok(StreamEvent::Audio(c.to_vec())))
                .collect();
            events.push(Ok(StreamEvent::Finished {
                billed_units: Some(request.units()),
            }));
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        async fn list_voices(&self) -> Result<VoiceCatalog, ApiError> {
            if let Some(e) = self.open_failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            self.catalog
                .clone()
                .ok_or_else(|| ApiError::malformed("no catalog scripted"))
        }
    }

    pub(crate) fn test_config(transport: TransportPolicy) -> Config {
        let mut config = Config::parse("rate_limits:\n  retry_delay_seconds: 1\n").unwrap();
        config.audio.transport = transport;
        config
    }

    fn voice() -> VoiceParams {
        default_characters()[0].voice_params()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_is_recorded_once() {
        let chat = MockChat::with(vec![
            Err(ApiError::rate_limited("429")),
            Ok(reply("Narrator: The valley woke.\nKael: Onward!")),
        ]);
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(chat),
            Box::new(MockSpeech::default()),
        );

        let story = client
            .generate_story(&StoryRequest::default(), &default_characters())
            .await
            .unwrap();
        assert!(story.starts_with("Narrator:"));

        let records = client.ledger().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model, "MiniMax-M1");
        assert_eq!(records[0].endpoint, Endpoint::Chat);
        assert_eq!((records[0].input_units, records[0].output_units), (100, 50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_is_not_recorded() {
        let chat = MockChat::with(vec![Err(ApiError::auth("bad key"))]);
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(chat),
            Box::new(MockSpeech::default()),
        );
        let err = client
            .generate_story(&StoryRequest::default(), &default_characters())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailure);
        assert_eq!(err.operation, Some("generate_story"));
        assert_eq!(err.model.as_deref(), Some("MiniMax-M1"));
        assert!(client.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_story_recovered_from_reasoning() {
        let response = GenerationResponse {
            content: String::new(),
            reasoning: Some("Plan first.\nNARRATOR: Rain fell.\nHERO: Run!".to_string()),
            finish_reason: Some("length".to_string()),
            input_units: 10,
            output_units: 8000,
        };
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(MockChat::with(vec![Ok(response)])),
            Box::new(MockSpeech::default()),
        );
        let story = client
            .generate_story(&StoryRequest::default(), &default_characters())
            .await
            .unwrap();
        assert_eq!(story, "NARRATOR: Rain fell.\nHERO: Run!");
    }

    #[tokio::test]
    async fn test_truncated_empty_story_is_an_error() {
        let response = GenerationResponse {
            finish_reason: Some("length".to_string()),
            ..GenerationResponse::default()
        };
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(MockChat::with(vec![Ok(response)])),
            Box::new(MockSpeech::default()),
        );
        let err = client
            .generate_story(&StoryRequest::default(), &default_characters())
            .await
            .unwrap_err();
        assert!(err.message.contains("shorter story"));
    }

    #[tokio::test]
    async fn test_cached_name_analysis_skips_remote_and_ledger() {
        let json = r#"{"gender":"Female","age_group":"adult","personality_trait":"heroic",
            "voice_type":"soft","confidence":0.9}"#;
        let chat = Arc::new(MockChat::with(vec![Ok(reply(json))]));
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(SharedChat(chat.clone())),
            Box::new(MockSpeech::default()),
        );

        let first = client.analyze_name("Elara").await;
        assert_eq!(first.source, AnalysisSource::RemoteHit);
        assert_eq!(first.profile.gender, "female");
        assert_eq!(client.ledger().len(), 1);

        let second = client.analyze_name("  ELARA ").await;
        assert_eq!(second.source, AnalysisSource::CachedHit);
        assert_eq!(second.profile, first.profile);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_name_analysis_falls_back_without_caching() {
        let chat = Arc::new(MockChat::with(vec![
            Ok(reply("I think this is a girl's name.")),
            Ok(reply("```json\n{\"gender\":\"male\",\"age_group\":\"elder\"}\n```")),
        ]));
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(SharedChat(chat.clone())),
            Box::new(MockSpeech::default()),
        );

        let first = client.analyze_name("Elara").await;
        assert_eq!(first.source, AnalysisSource::LocalFallback);
        assert_eq!(first.profile, NameProfile::from_name_patterns("Elara"));

        let second = client.analyze_name("Elara").await;
        assert_eq!(second.source, AnalysisSource::RemoteHit);
        assert_eq!(second.profile.age_group, "elder");
        assert_eq!(second.profile.personality_trait, "unknown");
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_streaming_forwards_chunks_in_order_and_records_once() {
        let audio: Vec<u8> = (0..=255).collect();
        let client = ApiClient::new(
            &test_config(TransportPolicy::Streaming),
            Box::new(MockChat::default()),
            Box::new(MockSpeech::new(audio.clone(), 10)),
        );
        let segment = StorySegment::new(0, "Narrator", "The sun rose over the valley.");

        let (tx, mut rx) = mpsc::channel(4);
        let voice = voice();
        let producer = client.synthesize_streaming(&segment, &voice, tx);
        let consumer = async {
            let mut chunks = Vec::new();
            while let Some(c) = rx.recv().await {
                chunks.push(c);
            }
            chunks
        };
        let (result, chunks) = tokio::join!(producer, consumer);
        result.unwrap();

        assert_eq!(chunks.len(), 26);
        assert_eq!(chunks.concat(), audio);
        let records = client.ledger().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input_units, segment.text.chars().count() as u64);
        assert_eq!(records[0].model, "speech-02-hd");
    }

    #[tokio::test]
    async fn test_closed_receiver_cancels_without_record() {
        let client = ApiClient::new(
            &test_config(TransportPolicy::Streaming),
            Box::new(MockChat::default()),
            Box::new(MockSpeech::new(vec![1; 100], 10)),
        );
        let segment = StorySegment::new(3, "Kael", "Onward!");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = client.synthesize_streaming(&segment, &voice(), tx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(client.ledger().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_open_is_retried() {
        let speech = MockSpeech::new(vec![7; 30], 8);
        speech
            .open_failures
            .lock()
            .unwrap()
            .push_back(ApiError::transient("connection reset"));
        let client = ApiClient::new(
            &test_config(TransportPolicy::Streaming),
            Box::new(MockChat::default()),
            Box::new(speech),
        );
        let segment = StorySegment::new(0, "Kael", "Hold the line!");
        let audio = client.synthesize(&segment, &voice()).await.unwrap();
        assert_eq!(audio, vec![7; 30]);
        assert_eq!(client.ledger().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_synthesis_is_retried_and_recorded_once() {
        let speech = Arc::new(MockSpeech::new(vec![9; 12], 4));
        speech
            .open_failures
            .lock()
            .unwrap()
            .push_back(ApiError::transient("connection reset"));
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(MockChat::default()),
            Box::new(SharedSpeech(speech.clone())),
        );
        let segment = StorySegment::new(0, "Kael", "Hold the line!");

        let audio = client.synthesize(&segment, &voice()).await.unwrap();
        assert_eq!(audio, vec![9; 12]);
        assert_eq!(speech.sync_calls.load(Ordering::SeqCst), 2);
        assert_eq!(speech.stream_calls.load(Ordering::SeqCst), 0);

        let records = client.ledger().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].endpoint, Endpoint::Speech);
        assert_eq!(records[0].input_units, segment.text.chars().count() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_list_is_paced_and_recorded_free() {
        let speech = MockSpeech {
            catalog: Some(VoiceCatalog {
                system: vec![VoiceInfo::new("English_CalmWoman", "Calm Woman")],
                custom: Vec::new(),
            }),
            ..MockSpeech::default()
        };
        speech
            .open_failures
            .lock()
            .unwrap()
            .push_back(ApiError::rate_limited("429"));
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(MockChat::default()),
            Box::new(speech),
        );

        let catalog = client.list_voices().await.unwrap();
        assert!(catalog.contains("English_CalmWoman"));
        let records = client.ledger().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model, VOICE_CATALOG);
        assert_eq!(records[0].cost, 0.0);
    }

    #[tokio::test]
    async fn test_voice_list_failure_is_not_recorded() {
        let client = ApiClient::new(
            &test_config(TransportPolicy::Sync),
            Box::new(MockChat::default()),
            Box::new(MockSpeech::default()),
        );
        let err = client.list_voices().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRequest);
        assert_eq!(err.operation, Some("list_voices"));
        assert!(client.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_auto_transport_picks_by_length() {
        let mut config = test_config(TransportPolicy::Auto);
        config.audio.streaming_threshold_chars = 10;
        let speech = Arc::new(MockSpeech::new(vec![1, 2, 3], 2));
        let client = ApiClient::new(
            &config,
            Box::new(MockChat::default()),
            Box::new(SharedSpeech(speech.clone())),
        );

        let short = StorySegment::new(0, "Kael", "Go!");
        let long = StorySegment::new(1, "Narrator", "The long road wound through the hills.");
        assert_eq!(client.synthesize(&short, &voice()).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(client.synthesize(&long, &voice()).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(speech.sync_calls.load(Ordering::SeqCst), 1);
        assert_eq!(speech.stream_calls.load(Ordering::SeqCst), 1);

        let summary = client.ledger().summary();
        assert_eq!(summary.total_calls, 2);
        assert_eq!(summary.total_units, 3 + long.text.chars().count() as u64);
    }

    /// Lets a test keep a handle on a mock the client owns.
    #[derive(Debug)]
    pub(crate) struct SharedChat(pub Arc<MockChat>);

    #[async_trait]
    impl GenerationBackend for SharedChat {
        async fn complete(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationResponse, ApiError> {
            self.0.complete(request).await
        }
    }

    pub(crate) struct SharedSpeech(pub Arc<MockSpeech>);

    #[async_trait]
    impl SpeechBackend for SharedSpeech {
        async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ApiError> {
            self.0.synthesize(request).await
        }

        async fn open_stream(&self, request: &SpeechRequest) -> Result<AudioStream, ApiError> {
            self.0.open_stream(request).await
        }

        async fn list_voices(&self) -> Result<VoiceCatalog, ApiError> {
            self.0.list_voices().await
        }
    }
}

//! Shared test doubles: counting fakes for the three external engines
//! plus a fully wired in-memory `Services`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use jimaku_core::{
    ChatCompletionPort, ChatError, ChatMessage, MediaDownloaderPort, MediaError, MediaMetadata,
    Segment, SpeechEnginePort, SpeechError, TranscribeOptions,
};
use jimaku_db::{SqliteStepCache, SqliteTaskStore, SqliteWorkQueue, setup_test_database};
use jimaku_storage::FsBlobStore;

use crate::adapters::ffmpeg::AudioSlicer;
use crate::{PipelineSettings, Services};
use jimaku_core::PipelineError;

/// Downloader fake: writes a fixed mp3 into the destination directory.
pub(crate) struct FakeMedia {
    pub title: String,
    pub audio_bytes: Vec<u8>,
    pub probe_calls: AtomicU32,
    pub download_calls: AtomicU32,
}

impl FakeMedia {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            audio_bytes: b"fake-mp3-bytes".to_vec(),
            probe_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MediaDownloaderPort for FakeMedia {
    async fn probe(&self, _url: &str) -> Result<MediaMetadata, MediaError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MediaMetadata {
            title: self.title.clone(),
            duration_seconds: Some(12.0),
        })
    }

    async fn download_audio(
        &self,
        _url: &str,
        dest_dir: &Path,
        progress: jimaku_core::ports::media::ByteProgressFn<'_>,
    ) -> Result<PathBuf, MediaError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let total = self.audio_bytes.len() as u64;
        progress(total / 2, total);
        progress(total, total);
        // Media tools write their own sanitized file names.
        let path = dest_dir.join(format!("{}.mp3", self.title.replace('/', "_")));
        tokio::fs::write(&path, &self.audio_bytes)
            .await
            .map_err(|e| MediaError::Interrupted(e.to_string()))?;
        Ok(path)
    }
}

/// Speech fake: returns a scripted word-level segment list and counts
/// invocations (the cache-hit scenarios assert on the count).
pub(crate) struct FakeSpeech {
    pub segments: Vec<Segment>,
    pub calls: AtomicU32,
}

impl FakeSpeech {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            calls: AtomicU32::new(0),
        }
    }

    pub fn words(words: &[(&str, i64, i64)]) -> Self {
        Self::new(
            words
                .iter()
                .map(|(text, start, end)| Segment::word(*start, *end, *text))
                .collect(),
        )
    }
}

#[async_trait]
impl SpeechEnginePort for FakeSpeech {
    async fn transcribe(
        &self,
        _audio: &Path,
        _options: &TranscribeOptions,
        progress: jimaku_core::ports::speech::ProgressFn<'_>,
    ) -> Result<Vec<Segment>, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress(50, "transcribing");
        progress(100, "done");
        Ok(self.segments.clone())
    }
}

/// Chat fake: pops scripted responses in order (or computes them from
/// the request when batches run concurrently) and records requests.
pub(crate) struct FakeChat {
    responses: Mutex<VecDeque<String>>,
    responder: Option<Box<dyn Fn(&[ChatMessage]) -> String + Send + Sync>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub calls: AtomicU32,
}

impl FakeChat {
    pub fn scripted<I: IntoIterator<Item = S>, S: Into<String>>(responses: I) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::scripted(Vec::<String>::new())
    }

    /// Compute each reply from the request, for tests where concurrent
    /// batches make scripted ordering nondeterministic.
    pub fn responding(f: impl Fn(&[ChatMessage]) -> String + Send + Sync + 'static) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ChatCompletionPort for FakeChat {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(responder) = &self.responder {
            return Ok(responder(messages));
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::Unavailable("no scripted response left".to_string()))
    }
}

/// Slicer fake: every file is one chunk.
pub(crate) struct SingleChunkSlicer;

#[async_trait]
impl AudioSlicer for SingleChunkSlicer {
    async fn duration_seconds(&self, _audio: &Path) -> Result<f64, PipelineError> {
        Ok(30.0)
    }

    async fn split(
        &self,
        audio: &Path,
        _chunk_seconds: u32,
        _out_dir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        Ok(vec![audio.to_path_buf()])
    }
}

/// A fully wired `Services` over in-memory SQLite, a tempdir blob
/// bucket, and the given engine fakes. The returned `TempDir` guard
/// must be kept alive for the duration of the test.
pub(crate) async fn services_with(
    media: Arc<dyn MediaDownloaderPort>,
    speech: Arc<dyn SpeechEnginePort>,
    chat: Arc<dyn ChatCompletionPort>,
) -> (Arc<Services>, TempDir) {
    let dir = TempDir::new().unwrap();
    let pool = setup_test_database().await.unwrap();

    let services = Arc::new(Services {
        tasks: Arc::new(SqliteTaskStore::new(pool.clone())),
        blob: Arc::new(FsBlobStore::new(dir.path().join("bucket")).unwrap()),
        cache: Arc::new(SqliteStepCache::new(pool.clone())),
        queue: Arc::new(SqliteWorkQueue::new(pool)),
        media,
        speech,
        chat,
        slicer: Arc::new(SingleChunkSlicer),
        settings: PipelineSettings::new(dir.path().join("work"), "test-model"),
    });
    (services, dir)
}

/// Default `Services`: a two-word clip, an empty chat script.
pub(crate) async fn test_services() -> (Arc<Services>, TempDir) {
    services_with(
        Arc::new(FakeMedia::new("clip")),
        Arc::new(FakeSpeech::words(&[("母親", 0, 400), ("が", 400, 600)])),
        Arc::new(FakeChat::empty()),
    )
    .await
}

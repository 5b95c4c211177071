//! Route-level integration tests: real router, in-memory SQLite,
//! tempdir blob bucket, fake engines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use jimaku_axum::{AppContext, build_router};
use jimaku_core::{
    ChatCompletionPort, ChatError, ChatMessage, MediaDownloaderPort, MediaError, MediaMetadata,
    PipelineError, Segment, SpeechEnginePort, SpeechError, TranscribeOptions,
};
use jimaku_db::{SqliteStepCache, SqliteTaskStore, SqliteWorkQueue, setup_test_database};
use jimaku_pipeline::handlers::{DownloadHandler, EnrichHandler, TranscribeHandler};
use jimaku_pipeline::{AudioSlicer, Coordinator, PipelineSettings, Services};
use jimaku_queue::{WorkerPool, WorkerPoolConfig};
use jimaku_storage::FsBlobStore;

struct StubMedia;

#[async_trait]
impl MediaDownloaderPort for StubMedia {
    async fn probe(&self, _url: &str) -> Result<MediaMetadata, MediaError> {
        Ok(MediaMetadata {
            title: "clip".to_string(),
            duration_seconds: Some(6.0),
        })
    }

    async fn download_audio(
        &self,
        _url: &str,
        dest_dir: &Path,
        _progress: jimaku_core::ports::media::ByteProgressFn<'_>,
    ) -> Result<PathBuf, MediaError> {
        let path = dest_dir.join("clip.mp3");
        tokio::fs::write(&path, b"audio")
            .await
            .map_err(|e| MediaError::Interrupted(e.to_string()))?;
        Ok(path)
    }
}

struct StubSpeech;

#[async_trait]
impl SpeechEnginePort for StubSpeech {
    async fn transcribe(
        &self,
        _audio: &Path,
        _options: &TranscribeOptions,
        _progress: jimaku_core::ports::speech::ProgressFn<'_>,
    ) -> Result<Vec<Segment>, SpeechError> {
        Ok(vec![
            Segment::word(0, 400, "母親"),
            Segment::word(400, 600, "が"),
        ])
    }
}

/// Chat stub answering each protocol by inspecting the prompt.
struct StubChat;

#[async_trait]
impl ChatCompletionPort for StubChat {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, ChatError> {
        let prompt = &messages.last().unwrap().content;
        if prompt.contains("Segment the following") {
            Ok(r#"["母親が"]"#.to_string())
        } else if prompt.contains("extract word-level information") {
            Ok(r#"[
                {"text": "母親", "furigana": "ははおや", "romaji": "hahaoya", "type": "noun"},
                {"text": "が", "furigana": "が", "romaji": "ga", "type": "particle"}
            ]"#
            .to_string())
        } else if prompt.contains("Translate the following") {
            Ok(r#"{"0": "Mother"}"#.to_string())
        } else if prompt.contains("Look up this Japanese word") {
            Ok(r#"{"word": "母親", "pronunciation": {"furigana": "ははおや", "romaji": "hahaoya"},
                 "part_of_speech": "noun", "meanings": [{"definition": "mother", "example": "母親が来た。"}]}"#
                .to_string())
        } else {
            Err(ChatError::Rejected(format!("unexpected prompt: {prompt}")))
        }
    }
}

struct StubSlicer;

#[async_trait]
impl AudioSlicer for StubSlicer {
    async fn duration_seconds(&self, _audio: &Path) -> Result<f64, PipelineError> {
        Ok(6.0)
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

struct TestApp {
    router: Router,
    services: Arc<Services>,
    coordinator: Arc<Coordinator>,
    _guard: TempDir,
}

async fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let pool = setup_test_database().await.unwrap();

    let services = Arc::new(Services {
        tasks: Arc::new(SqliteTaskStore::new(pool.clone())),
        blob: Arc::new(FsBlobStore::new(dir.path().join("bucket")).unwrap()),
        cache: Arc::new(SqliteStepCache::new(pool.clone())),
        queue: Arc::new(SqliteWorkQueue::new(pool)),
        media: Arc::new(StubMedia),
        speech: Arc::new(StubSpeech),
        chat: Arc::new(StubChat),
        slicer: Arc::new(StubSlicer),
        settings: PipelineSettings::new(dir.path().join("work"), "test-model"),
    });

    let context = AppContext::new(services.clone());
    let coordinator = context.coordinator.clone();
    TestApp {
        router: build_router(Arc::new(context)),
        services,
        coordinator,
        _guard: dir,
    }
}

/// Run every queue until all stages settle (the happy-path worker).
async fn drain(app: &TestApp) {
    let config = WorkerPoolConfig {
        retry_base: std::time::Duration::ZERO,
        retry_cap: std::time::Duration::ZERO,
        ..WorkerPoolConfig::default()
    };
    let pools = [
        WorkerPool::new(
            app.services.queue.clone(),
            Arc::new(DownloadHandler::new(app.services.clone(), app.coordinator.clone())),
            config.clone(),
        ),
        WorkerPool::new(
            app.services.queue.clone(),
            Arc::new(TranscribeHandler::new(app.services.clone(), app.coordinator.clone())),
            config.clone(),
        ),
        WorkerPool::new(
            app.services.queue.clone(),
            Arc::new(EnrichHandler::new(app.services.clone(), app.coordinator.clone())),
            config,
        ),
    ];

    loop {
        let mut any = false;
        for pool in &pools {
            any |= pool.run_once().await.unwrap();
        }
        if !any {
            break;
        }
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    let app = test_app().await;
    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn analyze_rejects_non_urls() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(post("/api/v1/video/analyze?url=not-a-url"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_of_unknown_task_is_404() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(get(
            "/api/v1/video/analyze/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analyze_creates_a_pending_task() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(post("/api/v1/video/analyze?url=https://example.com/v"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // The snapshot starts at 0%.
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/v1/video/analyze/{task_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["progress"], 0);

    // Content answers the polling form while incomplete.
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/v1/subtitle/{task_id}/content")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], serde_json::json!([]));
}

#[tokio::test]
async fn full_pipeline_serves_the_artifact() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(post("/api/v1/video/analyze?url=https://example.com/v"))
        .await
        .unwrap();
    let task_id = body_json(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    drain(&app).await;

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/v1/video/analyze/{task_id}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);

    // Content accepts the root id and serves the artifact.
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/v1/subtitle/{task_id}/content")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let content = body["content"].as_array().unwrap();
    assert!(!content.is_empty());

    // First segment's first token text is a substring of its text.
    let segment = &content[0];
    let token_text = segment["tokens"][0]["text"].as_str().unwrap();
    assert!(segment["text"].as_str().unwrap().contains(token_text));
    assert_eq!(segment["translation"], "Mother");
}

#[tokio::test]
async fn failed_pipeline_answers_400_on_content() {
    let app = test_app().await;
    let root = app
        .coordinator
        .start("https://example.com/v")
        .await
        .unwrap();
    app.coordinator
        .propagate_failure(root, "unreachable URL: 404")
        .await;

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/api/v1/subtitle/{root}/content")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("unreachable URL"));
}

#[tokio::test]
async fn dictionary_query_roundtrip() {
    let app = test_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/subtitle/dictionary/query")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"word": "母親", "furigana": "ははおや"}"#,
        ))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["word"], "母親");
    assert_eq!(body["meanings"][0]["definition"], "mother");
}

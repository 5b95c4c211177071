//! Queue handlers binding the stages to the worker pools.
//!
//! Delivery is at-least-once, so every handler starts by looking at the
//! task: a redelivered unit whose task already completed only re-runs
//! the (idempotent) chaining step, and one whose task already failed is
//! dropped. Terminal failures are recorded on the child and propagated
//! to the root through the coordinator.

use std::sync::Arc;

use async_trait::async_trait;

use jimaku_core::{
    DownloadPayload, EnrichPayload, PipelineError, TaskStatus, TaskStorePort, TaskUpdate,
    TranscribePayload, WorkKind, WorkUnit,
};
use jimaku_queue::WorkHandler;

use crate::coordinator::Coordinator;
use crate::download::DownloadStage;
use crate::enrich::EnrichStage;
use crate::transcribe::TranscribeStage;
use crate::Services;

/// What a redelivery check decided.
enum Redelivery {
    /// Fresh work: the task is marked Running, proceed.
    Run,
    /// The task already completed with this output; only re-chain.
    AlreadyCompleted(String),
    /// The task is failed/cancelled or gone; drop the unit.
    Drop,
}

async fn begin(services: &Services, unit: &WorkUnit, message: &str) -> Result<Redelivery, PipelineError> {
    let Some(task) = services.tasks.get(unit.task_id).await? else {
        tracing::warn!(task_id = %unit.task_id, "work unit for an unknown task, dropping");
        return Ok(Redelivery::Drop);
    };

    match task.status {
        TaskStatus::Completed => Ok(match task.output_ref {
            Some(output_ref) => Redelivery::AlreadyCompleted(output_ref),
            None => Redelivery::Drop,
        }),
        TaskStatus::Failed | TaskStatus::Cancelled => Ok(Redelivery::Drop),
        TaskStatus::Pending | TaskStatus::Running => {
            services
                .tasks
                .update(
                    unit.task_id,
                    TaskUpdate::status(TaskStatus::Running).with_message(message),
                )
                .await?;
            Ok(Redelivery::Run)
        }
    }
}

async fn record_failure(services: &Services, unit: &WorkUnit, error: &str, message: &str) {
    let update = TaskUpdate::failed(error, message);
    if let Err(e) = services.tasks.update(unit.task_id, update).await {
        tracing::debug!(task_id = %unit.task_id, error = %e, "terminal failure write dropped");
    }
}

/// Download queue handler.
pub struct DownloadHandler {
    services: Arc<Services>,
    coordinator: Arc<Coordinator>,
    stage: DownloadStage,
}

impl DownloadHandler {
    pub fn new(services: Arc<Services>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            stage: DownloadStage::new(services.clone()),
            services,
            coordinator,
        }
    }
}

#[async_trait]
impl WorkHandler for DownloadHandler {
    fn kind(&self) -> WorkKind {
        WorkKind::Download
    }

    async fn handle(&self, unit: &WorkUnit) -> Result<(), PipelineError> {
        let payload: DownloadPayload = unit.payload_as()?;
        match begin(&self.services, unit, "downloading audio").await? {
            Redelivery::Drop => return Ok(()),
            Redelivery::AlreadyCompleted(output_ref) => {
                // The crash happened between completion and chaining.
                return self
                    .coordinator
                    .on_download_complete(unit.task_id, &output_ref)
                    .await;
            }
            Redelivery::Run => {}
        }

        let key = self.stage.run(unit.task_id, &payload).await?;
        self.services
            .tasks
            .update(unit.task_id, TaskUpdate::completed("audio download complete", &key))
            .await?;
        self.coordinator.on_download_complete(unit.task_id, &key).await
    }

    async fn fail_terminal(&self, unit: &WorkUnit, error: &str) {
        record_failure(&self.services, unit, error, "audio download failed").await;
        self.coordinator.propagate_failure(unit.task_id, error).await;
    }
}

/// Transcribe queue handler.
pub struct TranscribeHandler {
    services: Arc<Services>,
    coordinator: Arc<Coordinator>,
    stage: TranscribeStage,
}

impl TranscribeHandler {
    pub fn new(services: Arc<Services>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            stage: TranscribeStage::new(services.clone()),
            services,
            coordinator,
        }
    }
}

#[async_trait]
impl WorkHandler for TranscribeHandler {
    fn kind(&self) -> WorkKind {
        WorkKind::Transcribe
    }

    async fn handle(&self, unit: &WorkUnit) -> Result<(), PipelineError> {
        let payload: TranscribePayload = unit.payload_as()?;
        match begin(&self.services, unit, "transcribing").await? {
            Redelivery::Drop => return Ok(()),
            Redelivery::AlreadyCompleted(output_ref) => {
                return self
                    .coordinator
                    .on_transcribe_complete(unit.task_id, &output_ref)
                    .await;
            }
            Redelivery::Run => {}
        }

        let key = self.stage.run(unit.task_id, &payload).await?;
        self.services
            .tasks
            .update(unit.task_id, TaskUpdate::completed("transcription complete", &key))
            .await?;
        self.coordinator
            .on_transcribe_complete(unit.task_id, &key)
            .await
    }

    async fn fail_terminal(&self, unit: &WorkUnit, error: &str) {
        record_failure(&self.services, unit, error, "transcription failed").await;
        self.coordinator.propagate_failure(unit.task_id, error).await;
    }
}

/// Enrich queue handler.
pub struct EnrichHandler {
    services: Arc<Services>,
    coordinator: Arc<Coordinator>,
    stage: EnrichStage,
}

impl EnrichHandler {
    pub fn new(services: Arc<Services>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            stage: EnrichStage::new(services.clone()),
            services,
            coordinator,
        }
    }
}

#[async_trait]
impl WorkHandler for EnrichHandler {
    fn kind(&self) -> WorkKind {
        WorkKind::Enrich
    }

    async fn handle(&self, unit: &WorkUnit) -> Result<(), PipelineError> {
        let payload: EnrichPayload = unit.payload_as()?;
        match begin(&self.services, unit, "processing subtitles").await? {
            Redelivery::Drop => return Ok(()),
            Redelivery::AlreadyCompleted(output_ref) => {
                return self
                    .coordinator
                    .on_enrich_complete(unit.task_id, &output_ref)
                    .await;
            }
            Redelivery::Run => {}
        }

        let key = self.stage.run(unit.task_id, &payload).await?;
        self.services
            .tasks
            .update(
                unit.task_id,
                TaskUpdate::completed("subtitle processing complete", &key),
            )
            .await?;
        self.coordinator.on_enrich_complete(unit.task_id, &key).await
    }

    async fn fail_terminal(&self, unit: &WorkUnit, error: &str) {
        record_failure(&self.services, unit, error, "subtitle processing failed").await;
        self.coordinator.propagate_failure(unit.task_id, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChat, FakeMedia, FakeSpeech, services_with};
    use jimaku_core::domain::segment::{squashed_text, squashed_token_text};
    use jimaku_core::{BlobStorePort, EdgeKind, Segment, WorkQueuePort};
    use jimaku_queue::{WorkerPool, WorkerPoolConfig};
    use std::time::Duration;

    const SPLIT_REPLY: &str = r#"["母親が"]"#;
    const ANALYZE_REPLY: &str = r#"[
        {"text": "母親", "furigana": "ははおや", "romaji": "hahaoya", "type": "noun"},
        {"text": "が", "furigana": "が", "romaji": "ga", "type": "particle"}
    ]"#;
    const TRANSLATE_REPLY: &str = r#"{"0": "Mother"}"#;

    fn fast_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            retry_base: Duration::ZERO,
            retry_cap: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            ..WorkerPoolConfig::default()
        }
    }

    /// Drive all three queues until nothing is leasable.
    async fn drain(services: &Arc<Services>, coordinator: &Arc<Coordinator>) {
        let download = WorkerPool::new(
            services.queue.clone(),
            Arc::new(DownloadHandler::new(services.clone(), coordinator.clone())),
            fast_config(),
        );
        let transcribe = WorkerPool::new(
            services.queue.clone(),
            Arc::new(TranscribeHandler::new(services.clone(), coordinator.clone())),
            fast_config(),
        );
        let enrich = WorkerPool::new(
            services.queue.clone(),
            Arc::new(EnrichHandler::new(services.clone(), coordinator.clone())),
            fast_config(),
        );

        loop {
            let mut any = false;
            any |= download.run_once().await.unwrap();
            any |= transcribe.run_once().await.unwrap();
            any |= enrich.run_once().await.unwrap();
            if !any {
                break;
            }
        }
    }

    #[tokio::test]
    async fn happy_path_runs_end_to_end() {
        let chat = Arc::new(FakeChat::scripted([
            SPLIT_REPLY,
            ANALYZE_REPLY,
            TRANSLATE_REPLY,
        ]));
        let (services, _guard) = services_with(
            Arc::new(FakeMedia::new("clip")),
            Arc::new(FakeSpeech::words(&[("母親", 0, 400), ("が", 400, 600)])),
            chat,
        )
        .await;
        let coordinator = Arc::new(Coordinator::new(services.clone()));

        let root = coordinator.start("https://example.com/v").await.unwrap();
        drain(&services, &coordinator).await;

        let state = coordinator.snapshot(root).await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.progress, 100);

        // Every stage task reached Completed exactly once, in order.
        for kind in [EdgeKind::Download, EdgeKind::Transcribe, EdgeKind::Enrich] {
            let child = services.tasks.get_edge(root, kind).await.unwrap().unwrap();
            let task = services.tasks.get(child).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed, "{kind:?}");
            assert_eq!(task.progress, 100);
            let queued = task.queued_at.unwrap();
            let started = task.started_at.unwrap();
            let completed = task.completed_at.unwrap();
            assert!(queued <= started && started <= completed);
        }

        // The artifact is fetchable and satisfies the token invariant.
        let output_ref = state.output_ref.unwrap();
        let artifact: Vec<Segment> =
            serde_json::from_slice(&services.blob.get_bytes(&output_ref).await.unwrap()).unwrap();
        assert!(!artifact.is_empty());
        assert_eq!(
            squashed_token_text(&artifact[0].tokens),
            squashed_text(&artifact[0].text)
        );
    }

    #[tokio::test]
    async fn downloader_failure_fails_the_root() {
        struct BrokenMedia;

        #[async_trait]
        impl jimaku_core::MediaDownloaderPort for BrokenMedia {
            async fn probe(
                &self,
                url: &str,
            ) -> Result<jimaku_core::MediaMetadata, jimaku_core::MediaError> {
                Err(jimaku_core::MediaError::UnreachableUrl(url.to_string()))
            }
            async fn download_audio(
                &self,
                _url: &str,
                _dest_dir: &std::path::Path,
                _progress: jimaku_core::ports::media::ByteProgressFn<'_>,
            ) -> Result<std::path::PathBuf, jimaku_core::MediaError> {
                unreachable!("probe always fails")
            }
        }

        let (services, _guard) = services_with(
            Arc::new(BrokenMedia),
            Arc::new(FakeSpeech::words(&[])),
            Arc::new(FakeChat::empty()),
        )
        .await;
        let coordinator = Arc::new(Coordinator::new(services.clone()));

        let root = coordinator.start("https://bad.example/v").await.unwrap();
        drain(&services, &coordinator).await;

        let state = coordinator.snapshot(root).await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state.error.unwrap().contains("unreachable URL"));
    }

    #[tokio::test]
    async fn redelivered_unit_after_completion_only_rechains() {
        let chat = Arc::new(FakeChat::scripted([
            SPLIT_REPLY,
            ANALYZE_REPLY,
            TRANSLATE_REPLY,
        ]));
        let media = Arc::new(FakeMedia::new("clip"));
        let (services, _guard) = services_with(
            media.clone(),
            Arc::new(FakeSpeech::words(&[("母親", 0, 400), ("が", 400, 600)])),
            chat,
        )
        .await;
        let coordinator = Arc::new(Coordinator::new(services.clone()));

        let root = coordinator.start("https://example.com/v").await.unwrap();
        drain(&services, &coordinator).await;
        let download = services
            .tasks
            .get_edge(root, EdgeKind::Download)
            .await
            .unwrap()
            .unwrap();

        // Simulate an at-least-once duplicate of the finished download.
        let payload = serde_json::to_value(DownloadPayload {
            url: "https://example.com/v".to_string(),
            work_dir_hint: None,
        })
        .unwrap();
        services
            .queue
            .enqueue(WorkKind::Download, download, payload)
            .await
            .unwrap();

        let calls_before = media.download_calls.load(std::sync::atomic::Ordering::SeqCst);
        drain(&services, &coordinator).await;

        // No second download ran, the root stayed completed.
        assert_eq!(
            media.download_calls.load(std::sync::atomic::Ordering::SeqCst),
            calls_before
        );
        let state = coordinator.snapshot(root).await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
    }
}

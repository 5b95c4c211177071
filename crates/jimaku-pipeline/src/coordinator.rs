//! Pipeline coordinator: builds the Download -> Transcribe -> Enrich
//! graph, creates child tasks and edges, and chains the next stage when
//! a predecessor completes.
//!
//! Chaining is driven by the completing worker itself after it persists
//! its terminal status, so every operation here is idempotent: a
//! retried worker finds the existing edge and reuses the existing
//! child. The edge table is the only parent/child channel; `message`
//! stays free-form human text.

use std::sync::Arc;

use jimaku_core::{
    DownloadPayload, EdgeKind, EnrichPayload, PipelineError, ReconciledState, StoreError, TaskId,
    TaskStatus, TaskStorePort, TaskType, TaskUpdate, TranscribePayload, WorkKind, WorkQueuePort,
    reconcile,
};

use crate::Services;

/// Per-root state machine over the task graph.
pub struct Coordinator {
    services: Arc<Services>,
}

impl Coordinator {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Create the root task and kick off the download stage.
    pub async fn start(&self, url: &str) -> Result<TaskId, PipelineError> {
        let tasks = &self.services.tasks;
        let root = tasks.create_task(TaskType::Root, Some(url)).await?;
        let download = self.ensure_child(root, EdgeKind::Download, TaskType::Download).await?;

        self.services
            .queue
            .enqueue(
                WorkKind::Download,
                download,
                serde_json::to_value(DownloadPayload {
                    url: url.to_string(),
                    work_dir_hint: None,
                })
                .map_err(|e| PipelineError::Internal(e.to_string()))?,
            )
            .await?;

        tracing::info!(root = %root, download = %download, url, "pipeline started");
        Ok(root)
    }

    /// Download finished: create the transcribe child and enqueue it.
    pub async fn on_download_complete(
        &self,
        download_id: TaskId,
        audio_ref: &str,
    ) -> Result<(), PipelineError> {
        let Some(root) = self.root_of(download_id).await? else {
            tracing::warn!(child = %download_id, "download task has no root edge");
            return Ok(());
        };

        let transcribe = self
            .ensure_child(root, EdgeKind::Transcribe, TaskType::Transcribe)
            .await?;

        self.services
            .queue
            .enqueue(
                WorkKind::Transcribe,
                transcribe,
                serde_json::to_value(TranscribePayload {
                    audio_ref: audio_ref.to_string(),
                    options: self.services.settings.transcribe.clone(),
                })
                .map_err(|e| PipelineError::Internal(e.to_string()))?,
            )
            .await?;

        self.touch_root(root, "audio downloaded, transcribing").await;
        tracing::info!(root = %root, transcribe = %transcribe, "chained transcribe stage");
        Ok(())
    }

    /// Transcription finished: create the enrich child and enqueue it.
    pub async fn on_transcribe_complete(
        &self,
        transcribe_id: TaskId,
        subtitle_ref: &str,
    ) -> Result<(), PipelineError> {
        let Some(root) = self.root_of(transcribe_id).await? else {
            tracing::warn!(child = %transcribe_id, "transcribe task has no root edge");
            return Ok(());
        };

        let enrich = self
            .ensure_child(root, EdgeKind::Enrich, TaskType::Enrich)
            .await?;

        self.services
            .queue
            .enqueue(
                WorkKind::Enrich,
                enrich,
                serde_json::to_value(EnrichPayload {
                    subtitle_ref: subtitle_ref.to_string(),
                    options: self.services.settings.enrich.clone(),
                })
                .map_err(|e| PipelineError::Internal(e.to_string()))?,
            )
            .await?;

        self.touch_root(root, "transcription complete, processing subtitles")
            .await;
        tracing::info!(root = %root, enrich = %enrich, "chained enrich stage");
        Ok(())
    }

    /// Enrichment finished: the pipeline is done, complete the root.
    pub async fn on_enrich_complete(
        &self,
        enrich_id: TaskId,
        output_ref: &str,
    ) -> Result<(), PipelineError> {
        let Some(root) = self.root_of(enrich_id).await? else {
            tracing::warn!(child = %enrich_id, "enrich task has no root edge");
            return Ok(());
        };

        match self
            .services
            .tasks
            .update(root, TaskUpdate::completed("analysis complete", output_ref))
            .await
        {
            Ok(_) => tracing::info!(root = %root, output_ref, "pipeline completed"),
            // A concurrent retry already finished the root.
            Err(StoreError::IllegalTransition { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Propagate a child's terminal failure to its root.
    pub async fn propagate_failure(&self, child_id: TaskId, error: &str) {
        let root = match self.root_of(child_id).await {
            Ok(Some(root)) => root,
            Ok(None) => child_id,
            Err(e) => {
                tracing::error!(child = %child_id, error = %e, "failure propagation lost");
                return;
            }
        };

        match self
            .services
            .tasks
            .update(root, TaskUpdate::failed(error, "analysis failed"))
            .await
        {
            Ok(_) => tracing::warn!(root = %root, child = %child_id, error, "pipeline failed"),
            Err(StoreError::IllegalTransition { .. }) => {}
            Err(e) => tracing::error!(root = %root, error = %e, "failed to record root failure"),
        }
    }

    /// Reconciled (status, progress, message) snapshot for a root task.
    pub async fn snapshot(&self, root_id: TaskId) -> Result<Option<ReconciledState>, StoreError> {
        let tasks = &self.services.tasks;
        let Some(root) = tasks.get(root_id).await? else {
            return Ok(None);
        };

        let download = self.child_record(root_id, EdgeKind::Download).await?;
        let transcribe = self.child_record(root_id, EdgeKind::Transcribe).await?;
        let enrich = self.child_record(root_id, EdgeKind::Enrich).await?;

        Ok(Some(reconcile(
            &root,
            download.as_ref(),
            transcribe.as_ref(),
            enrich.as_ref(),
        )))
    }

    /// The root of a child task, through its back-edge.
    pub async fn root_of(&self, child: TaskId) -> Result<Option<TaskId>, StoreError> {
        self.services.tasks.get_edge(child, EdgeKind::Root).await
    }

    async fn child_record(
        &self,
        root: TaskId,
        kind: EdgeKind,
    ) -> Result<Option<jimaku_core::TaskRecord>, StoreError> {
        let Some(child) = self.services.tasks.get_edge(root, kind).await? else {
            return Ok(None);
        };
        self.services.tasks.get(child).await
    }

    /// Find or create the child for one stage of a root.
    ///
    /// Tolerates every partial-crash interleaving: an existing edge with
    /// a live child is reused; an edge whose child row was lost is
    /// overwritten by the upsert.
    async fn ensure_child(
        &self,
        root: TaskId,
        kind: EdgeKind,
        task_type: TaskType,
    ) -> Result<TaskId, PipelineError> {
        let tasks = &self.services.tasks;

        if let Some(existing) = tasks.get_edge(root, kind).await? {
            if tasks.get(existing).await?.is_some() {
                return Ok(existing);
            }
            tracing::warn!(root = %root, child = %existing, "edge points at a lost task, recreating");
        }

        let child = tasks.create_task(task_type, None).await?;
        tasks.set_edge(root, kind, child).await?;
        tasks.set_edge(child, EdgeKind::Root, root).await?;
        Ok(child)
    }

    /// Best-effort root message refresh; never fails the caller.
    async fn touch_root(&self, root: TaskId, message: &str) {
        let update = TaskUpdate {
            status: Some(TaskStatus::Running),
            message: Some(message.to_string()),
            ..TaskUpdate::default()
        };
        if let Err(e) = self.services.tasks.update(root, update).await {
            tracing::debug!(root = %root, error = %e, "root message refresh dropped");
        }
    }
}

//! Per-job progress tracking.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use super::{job_address, Subscriptions};
use crate::api::{ApiClient, ScriptStatus, STATUS_READY};
use crate::frame::FrameBody;
use crate::registry::{handler, Category, ConnectionHandle, ConnectionRegistry, SubjectEvent};

/// Everything known about one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobProgress {
    /// Transport currently open.
    pub connected: bool,
    /// Last reported error, cleared on reconnect.
    pub error: Option<String>,
    /// Last backend status label.
    pub status: Option<String>,
    /// Final script text.
    pub script_text: Option<String>,
    /// Narration audio location.
    pub audio_url: Option<String>,
    /// Generated image locations.
    pub image_urls: Vec<String>,
    /// The job finished.
    pub complete: bool,
}

impl JobProgress {
    fn apply_status(&mut self, status: &ScriptStatus) {
        self.status = Some(status.status.clone());
        if status.is_ready() {
            self.script_text.clone_from(&status.script_text);
            self.audio_url.clone_from(&status.audio_url);
            self.image_urls = status.image_urls.clone().unwrap_or_default();
            self.complete = true;
        }
    }
}

/// Watches one job over the shared registry.
///
/// State is published through a `watch` channel; see
/// [`JobWatcher::subscribe_progress`].
#[derive(Debug)]
pub struct JobWatcher {
    job_id: String,
    progress: Arc<watch::Sender<JobProgress>>,
    subscriptions: Subscriptions,
}

impl JobWatcher {
    /// Subscribe to `job_id` and make sure a connection exists.
    ///
    /// The connection may be refused by the cooldown; the watcher still
    /// receives events once any caller opens one for this job.
    pub fn start(registry: &ConnectionRegistry, ws_base: &str, job_id: &str) -> Self {
        let progress = Arc::new(watch::Sender::new(JobProgress::default()));
        let mut subscriptions =
            Subscriptions::new(registry.clone(), job_id, job_address(ws_base, job_id));

        let tx = Arc::clone(&progress);
        subscriptions.add(
            Category::Status,
            handler(move |event| {
                if let SubjectEvent::Status(connected) = event {
                    tx.send_modify(|p| {
                        p.connected = *connected;
                        if *connected {
                            p.error = None;
                        }
                    });
                }
            }),
        );

        let tx = Arc::clone(&progress);
        subscriptions.add(
            Category::Error,
            handler(move |event| {
                if let SubjectEvent::Error(err) = event {
                    tx.send_modify(|p| p.error = Some(err.to_string()));
                }
            }),
        );

        let tx = Arc::clone(&progress);
        let id = job_id.to_string();
        subscriptions.add(
            Category::Message,
            handler(move |event| {
                let SubjectEvent::Message(frame) = event else {
                    return;
                };
                match frame.body() {
                    FrameBody::JobStatus { status } => {
                        log::debug!("[JobWatcher] {} status: {:?}", id, status);
                        tx.send_modify(|p| p.status.clone_from(status));
                    }
                    FrameBody::JobComplete(job) => {
                        log::info!("[JobWatcher] {} complete", id);
                        tx.send_modify(|p| {
                            p.status = Some(STATUS_READY.to_string());
                            p.script_text.clone_from(&job.script_text);
                            p.audio_url.clone_from(&job.audio_url);
                            p.image_urls = job.image_urls().to_vec();
                            p.complete = true;
                        });
                    }
                    _ => {}
                }
            }),
        );

        if let Some(handle) = subscriptions.connect() {
            if handle.is_open() {
                progress.send_modify(|p| p.connected = true);
            }
        }

        Self {
            job_id: job_id.to_string(),
            progress,
            subscriptions,
        }
    }

    /// Job being watched.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current progress.
    #[must_use]
    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    /// Receiver that sees every progress change.
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<JobProgress> {
        self.progress.subscribe()
    }

    /// Close the job's transport and open a fresh one.
    pub fn reconnect(&self) -> Option<ConnectionHandle> {
        self.subscriptions.reconnect()
    }

    /// Poll the HTTP API and fold the result into the progress.
    ///
    /// # Errors
    ///
    /// Returns the request error; progress is left unchanged in that case.
    pub async fn check_status(&self, api: &ApiClient) -> Result<ScriptStatus> {
        let status = api.script_status(&self.job_id).await?;
        self.progress.send_modify(|p| p.apply_status(&status));
        Ok(status)
    }
}

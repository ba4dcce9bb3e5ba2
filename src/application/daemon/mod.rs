//! Render worker daemon: claims jobs, renders their cards, uploads the
//! artifacts, writes the ledger and reports back to the queue.

mod backoff;

pub use backoff::{Backoff, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gambit_export_types::{JobOutput, RenderJob, RenderManifest};
use metrics::{counter, gauge};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::application::compose::ComposeInput;
use crate::application::exports::ExportLedgerService;
use crate::application::pipeline::{CardResolver, PipelineError, ResolvedCard};
use crate::application::queue::RenderQueueService;
use crate::application::rasterize::CardRasterizer;
use crate::application::storage::ObjectStorage;
use crate::domain::entities::ExportUpsert;

const METRIC_CARDS_RENDERED_TOTAL: &str = "gambit_export_cards_rendered_total";
const METRIC_DAEMON_BACKOFF_MS: &str = "gambit_export_daemon_backoff_ms";

const UPLOAD_PURPOSE: &str = "export";
const PNG_CONTENT_TYPE: &str = "image/png";

/// Cloneable view of the daemon's state for health reporting.
#[derive(Debug, Clone)]
pub struct DaemonHealth {
    enabled: bool,
    last_error: Arc<Mutex<Option<String>>>,
}

impl DaemonHealth {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Owned stop signal; backoff sleeps wake as soon as it is raised.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `delay` unless stopped first.
    pub async fn sleep(&self, delay: Duration) {
        let notified = self.inner.notify.notified();
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = notified => {}
        }
    }
}

/// A daemon running on its own task.
pub struct DaemonTask {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl DaemonTask {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Raise the stop flag and wait until the job in flight is recorded.
    /// Past `patience` a warning is logged, but the wait continues.
    pub async fn shutdown(mut self, patience: Duration) -> Result<(), JoinError> {
        self.stop.stop();
        match tokio::time::timeout(patience, &mut self.handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    target = "application::daemon",
                    op = "shutdown",
                    patience_ms = patience.as_millis() as u64,
                    "Render daemon still finishing its current job"
                );
                self.handle.await
            }
        }
    }
}

/// What a single loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No queued job.
    Idle,
    /// The queue could not be reached.
    QueueUnavailable(String),
    Succeeded { job_id: String, cards: usize },
    Failed { job_id: String, error: String },
}

impl TickOutcome {
    pub fn needs_backoff(&self) -> bool {
        !matches!(self, TickOutcome::Succeeded { .. })
    }
}

struct RenderedOutput {
    output: JobOutput,
    manifest: RenderManifest,
}

pub struct RenderDaemon {
    queue: RenderQueueService,
    resolver: CardResolver,
    rasterizer: CardRasterizer,
    storage: Arc<dyn ObjectStorage>,
    ledger: ExportLedgerService,
    backoff: Backoff,
    health: DaemonHealth,
    stop: StopHandle,
}

impl RenderDaemon {
    pub fn new(
        queue: RenderQueueService,
        resolver: CardResolver,
        rasterizer: CardRasterizer,
        storage: Arc<dyn ObjectStorage>,
        ledger: ExportLedgerService,
        backoff: Backoff,
    ) -> Self {
        Self {
            queue,
            resolver,
            rasterizer,
            storage,
            ledger,
            backoff,
            health: DaemonHealth::new(true),
            stop: StopHandle::default(),
        }
    }

    pub fn health(&self) -> DaemonHealth {
        self.health.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn spawn(self) -> DaemonTask {
        let stop = self.stop_handle();
        DaemonTask {
            stop,
            handle: tokio::spawn(self.run_until_stopped()),
        }
    }

    /// Loop until the stop handle is raised. The job in flight always
    /// finishes before the flag is checked again.
    pub async fn run_until_stopped(mut self) {
        info!(target = "application::daemon", "Render daemon started");
        while !self.stop.is_stopped() {
            let outcome = self.run_once().await;
            if outcome.needs_backoff() {
                let delay = self.backoff.advance();
                gauge!(METRIC_DAEMON_BACKOFF_MS).set(delay.as_millis() as f64);
                self.stop.sleep(delay).await;
            }
        }
        info!(target = "application::daemon", "Render daemon stopped");
    }

    /// Claim and fully process at most one job, without sleeping.
    pub async fn run_once(&mut self) -> TickOutcome {
        let job = match self.queue.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => return TickOutcome::Idle,
            Err(err) => {
                let message = err.to_string();
                warn!(
                    target = "application::daemon",
                    op = "claim_next",
                    result = "error",
                    error = %message,
                    "Failed to claim render job"
                );
                self.health.set_last_error(Some(message.clone()));
                return TickOutcome::QueueUnavailable(message);
            }
        };

        self.backoff.reset();
        let job_id = job.job_id.clone();

        match self.process(&job).await {
            Ok(outputs) => {
                let cards = outputs.len();
                match self.queue.complete(&job_id, outputs, None).await {
                    Ok(_) => {
                        self.health.set_last_error(None);
                        info!(
                            target = "application::daemon",
                            op = "process_job",
                            result = "succeeded",
                            job_id = %job_id,
                            cards,
                            "Render job succeeded"
                        );
                        TickOutcome::Succeeded { job_id, cards }
                    }
                    Err(err) => {
                        let error = err.to_string();
                        warn!(
                            target = "application::daemon",
                            op = "complete",
                            result = "error",
                            job_id = %job_id,
                            error = %error,
                            "Failed to record job success"
                        );
                        self.health.set_last_error(Some(error.clone()));
                        TickOutcome::Failed { job_id, error }
                    }
                }
            }
            Err(err) => {
                let error = err.to_string();
                warn!(
                    target = "application::daemon",
                    op = "process_job",
                    result = "failed",
                    job_id = %job_id,
                    transport = err.is_transport(),
                    error = %error,
                    "Render job failed"
                );
                self.health.set_last_error(Some(error.clone()));
                if let Err(complete_err) = self
                    .queue
                    .complete(&job_id, Vec::new(), Some(error.clone()))
                    .await
                {
                    warn!(
                        target = "application::daemon",
                        op = "complete",
                        result = "error",
                        job_id = %job_id,
                        error = %complete_err,
                        "Failed to record job failure"
                    );
                }
                TickOutcome::Failed { job_id, error }
            }
        }
    }

    /// Resolve every card, then render and upload every card, then write
    /// the ledger in one batch. Any failure leaves the ledger untouched.
    async fn process(&self, job: &RenderJob) -> Result<Vec<JobOutput>, PipelineError> {
        let mut resolved = Vec::with_capacity(job.card_ids.len());
        for card_id in &job.card_ids {
            resolved.push(self.resolver.resolve(card_id).await?);
        }

        let mut rendered = Vec::with_capacity(resolved.len());
        for card in &resolved {
            rendered.push(self.render_and_upload(card).await?);
        }

        let mut outputs = Vec::with_capacity(rendered.len());
        let mut exports = Vec::with_capacity(rendered.len());
        for RenderedOutput { output, manifest } in rendered {
            exports.push(ExportUpsert {
                card_id: output.card_id.clone(),
                fingerprint: (&output).into(),
                artifact_ref: output.artifact_ref.clone(),
                checksum_sha256: output.checksum_sha256.clone(),
                manifest,
            });
            outputs.push(output);
        }
        self.ledger.upsert_exports(exports).await?;
        Ok(outputs)
    }

    async fn render_and_upload(
        &self,
        resolved: &ResolvedCard,
    ) -> Result<RenderedOutput, PipelineError> {
        let card = &resolved.card.value;
        let rendered = self
            .rasterizer
            .render(ComposeInput {
                template: &resolved.template,
                card,
                runtime: &resolved.runtime,
                art_url: resolved.art.url.as_deref(),
            })
            .await
            .map_err(|source| PipelineError::RenderFailure {
                card_id: card.card_id.clone(),
                source,
            })?;
        counter!(METRIC_CARDS_RENDERED_TOTAL).increment(1);

        let upload_url = self.storage.generate_upload_url(UPLOAD_PURPOSE).await?;
        let artifact_ref = self
            .storage
            .upload(&upload_url, PNG_CONTENT_TYPE, rendered.png)
            .await?;

        let fingerprint = resolved.fingerprint();
        Ok(RenderedOutput {
            output: JobOutput {
                card_id: card.card_id.clone(),
                artifact_ref,
                checksum_sha256: rendered.checksum_sha256,
                template_version: fingerprint.template_version,
                card_version: fingerprint.card_version,
                art_version: fingerprint.art_version,
            },
            manifest: rendered.manifest,
        })
    }
}

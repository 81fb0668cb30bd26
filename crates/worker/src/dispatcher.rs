//! Conversion job dispatcher.
//!
//! Claims Pending conversions one at a time and drives each through
//! Processing, Downloading and (for multi-part sources) Stitching to Done.
//! Every status change is a compare-and-set against the store, so a job
//! dismissed while it is being worked on is abandoned at the next step
//! instead of being overwritten.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use pix360_core::error::{error_report, ConversionError, DispatchError};
use pix360_core::stitching::StitchingEngine;
use pix360_db::models::conversion::Conversion;
use pix360_db::models::status::ConversionStatus;
use pix360_db::store::{ConversionStore, StoreError};
use pix360_modules::{Download, Downloader, ModuleRegistry};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Default sleep between claim attempts while the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts at recording a job failure before giving up on the write.
const FAIL_WRITE_ATTEMPTS: u32 = 3;

/// Pause between failure-write attempts.
const FAIL_WRITE_BACKOFF: Duration = Duration::from_millis(200);

/// Why a single job stopped short of Done.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Conversion worker panicked: {0}")]
    Panicked(String),
}

impl From<DispatchError> for JobError {
    fn from(err: DispatchError) -> Self {
        Self::Conversion(err.into())
    }
}

/// Sequential job runner over a [`ConversionStore`].
pub struct Dispatcher {
    store: Arc<dyn ConversionStore>,
    registry: Arc<ModuleRegistry>,
    engine: StitchingEngine,
    poll_interval: Duration,
    keep_intermediate_assets: bool,
    span: tracing::Span,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ConversionStore>,
        registry: Arc<ModuleRegistry>,
        engine: StitchingEngine,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
            keep_intermediate_assets: false,
            span: tracing::Span::none(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Persist the raw inputs of a stitched job as non-result assets.
    pub fn with_intermediate_assets(mut self, keep: bool) -> Self {
        self.keep_intermediate_assets = keep;
        self
    }

    /// Parent span for every per-job span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Run the claim loop until `cancel` is triggered.
    ///
    /// The queue is drained back to back; the poll interval only applies
    /// once it is empty or a cycle failed. A job already in flight is
    /// finished before the loop observes cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            projector = self.engine.projector_name(),
            downloaders = self.registry.len(),
            "Job dispatcher started",
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        tracing::info!("Job dispatcher stopped");
    }

    /// Claim and run at most one job. Returns the claimed id, if any.
    ///
    /// Only store failures outside of a job (claiming, recording the
    /// failure) surface as errors; everything that goes wrong inside a
    /// job is written to that job's log.
    pub async fn run_once(&self) -> Result<Option<Uuid>, StoreError> {
        let Some(conversion) = self.store.claim_next().await? else {
            return Ok(None);
        };
        let id = conversion.id;
        let span = tracing::info_span!(parent: &self.span, "conversion", conversion_id = %id);

        async {
            tracing::info!(url = %conversion.url, "Conversion claimed");

            let outcome = AssertUnwindSafe(self.process(&conversion))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))));

            match outcome {
                Ok(()) => {
                    tracing::info!("Conversion done");
                    Ok(())
                }
                Err(JobError::Store(e)) if e.is_stale() => {
                    tracing::warn!(
                        error = %e,
                        "Conversion changed underneath the worker, abandoning",
                    );
                    Ok(())
                }
                Err(e) => self.record_failure(id, &e).await,
            }
        }
        .instrument(span)
        .await?;

        Ok(Some(id))
    }

    /// Move the job to Failed with the rendered error as its log.
    ///
    /// Database errors are retried a few times: `claim_next` only picks up
    /// Pending jobs, so a job whose failure is never written stays active.
    async fn record_failure(&self, id: Uuid, err: &JobError) -> Result<(), StoreError> {
        let kind = match err {
            JobError::Conversion(e) => e.kind(),
            JobError::Store(_) => "store",
            JobError::Panicked(_) => "panic",
        };
        let log = error_report(err);
        tracing::error!(kind, error = %log, "Conversion failed");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.fail(id, &log).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_stale() => {
                    tracing::warn!(
                        error = %e,
                        "Conversion left active states before the failure was recorded",
                    );
                    return Ok(());
                }
                Err(StoreError::Database(e)) if attempt < FAIL_WRITE_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Recording failure failed, retrying");
                    tokio::time::sleep(FAIL_WRITE_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(
                        attempt,
                        error = %e,
                        "Could not record failure, conversion stays active",
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Drive one claimed conversion to Done.
    async fn process(&self, conversion: &Conversion) -> Result<(), JobError> {
        let id = conversion.id;
        let downloader = self.resolve_downloader(conversion).await?;

        self.store
            .transition(id, ConversionStatus::Processing, ConversionStatus::Downloading)
            .await?;
        tracing::info!(downloader = downloader.identifier(), "Downloading");

        let download = downloader.process(conversion).await?;
        tracing::debug!(result = download.kind(), "Download finished");

        match download {
            Download::Assembled(asset) => {
                self.store
                    .complete(id, ConversionStatus::Downloading, &asset)
                    .await?;
            }
            Download::Stitch(request) => {
                self.store
                    .transition(id, ConversionStatus::Downloading, ConversionStatus::Stitching)
                    .await?;

                if self.keep_intermediate_assets {
                    for input in request.inputs() {
                        self.store.add_asset(id, input).await?;
                    }
                }

                let result = self
                    .engine
                    .stitch(id, request)
                    .await
                    .map_err(ConversionError::from)?;
                self.store
                    .complete(id, ConversionStatus::Stitching, &result)
                    .await?;
            }
        }

        Ok(())
    }

    /// A pinned downloader must be installed; otherwise the best scoring
    /// one is chosen and recorded on the conversion.
    async fn resolve_downloader(
        &self,
        conversion: &Conversion,
    ) -> Result<Arc<dyn Downloader>, JobError> {
        if let Some(identifier) = conversion.downloader.as_deref() {
            return self
                .registry
                .resolve_by_identifier(identifier)
                .ok_or_else(|| {
                    DispatchError::DownloaderNotFound {
                        identifier: identifier.to_string(),
                    }
                    .into()
                });
        }

        let candidate = self.registry.select(&conversion.url)?;
        tracing::info!(
            downloader = candidate.downloader.identifier(),
            score = %candidate.score,
            "Downloader selected",
        );
        self.store
            .set_downloader(conversion.id, candidate.downloader.identifier())
            .await?;
        Ok(candidate.downloader)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn dispatch_errors_become_conversion_errors() {
        let err: JobError = DispatchError::NoCapableDownloader {
            url: "https://example.com".to_string(),
        }
        .into();
        assert!(matches!(err, JobError::Conversion(ConversionError::Dispatch(_))));
        assert_eq!(err.to_string(), "No capable downloader found for https://example.com");
    }
}

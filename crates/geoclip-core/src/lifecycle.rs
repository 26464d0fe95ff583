//! Extraction lifecycle coordination.
//!
//! At most one extraction runs at a time. Starting a new one first stops
//! the current one and waits for its task to exit, so two extractions
//! never touch files concurrently. A stopped extraction reports no
//! success or failure, only completion of its task.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::executor::{ExtractionOutcome, run_extraction};
use crate::query::ExtractionRequest;

/// Notifications emitted by a running extraction task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionEvent {
    /// The output file was written. Never sent after a stop request.
    Succeeded(PathBuf),
    /// The extraction failed with this message. Never sent after a stop
    /// request.
    Failed(String),
    /// The task has exited, whatever the outcome. Always sent last.
    Finished,
}

/// The unit of work a [`Coordinator`] runs.
///
/// The engine implementation is [`EngineJob`]; tests substitute stubs to
/// exercise lifecycle ordering without touching real data.
#[async_trait]
pub trait ExtractionJob: Send + Sync + 'static {
    /// Runs one extraction to completion, honoring the token.
    async fn run(
        &self,
        request: ExtractionRequest,
        cancel: CancellationToken,
    ) -> Result<ExtractionOutcome>;
}

/// The real extraction engine as a coordinator job.
pub struct EngineJob;

#[async_trait]
impl ExtractionJob for EngineJob {
    async fn run(
        &self,
        request: ExtractionRequest,
        cancel: CancellationToken,
    ) -> Result<ExtractionOutcome> {
        run_extraction(&request, &cancel).await
    }
}

struct Active {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Serializes extractions and routes their events to one receiver.
pub struct Coordinator<J: ExtractionJob> {
    job: Arc<J>,
    events: mpsc::UnboundedSender<ExtractionEvent>,
    active: Option<Active>,
}

impl<J: ExtractionJob> Coordinator<J> {
    /// Creates a coordinator and the receiving end of its event stream.
    pub fn new(job: J) -> (Self, mpsc::UnboundedReceiver<ExtractionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Coordinator {
                job: Arc::new(job),
                events,
                active: None,
            },
            receiver,
        )
    }

    /// Starts an extraction, first stopping any extraction in flight.
    pub async fn start(&mut self, request: ExtractionRequest) {
        self.shutdown().await;

        let job = self.job.clone();
        let events = self.events.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = job.run(request, task_cancel.clone()).await;
            if !task_cancel.is_cancelled() {
                match result {
                    Ok(ExtractionOutcome::Completed(path)) => {
                        let _ = events.send(ExtractionEvent::Succeeded(path));
                    }
                    Ok(ExtractionOutcome::Cancelled) => {}
                    Err(e) => {
                        let _ = events.send(ExtractionEvent::Failed(e.to_string()));
                    }
                }
            }
            let _ = events.send(ExtractionEvent::Finished);
        });
        self.active = Some(Active { cancel, handle });
    }

    /// Stops the extraction in flight, if any, and waits for its task to
    /// exit. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            info!("stopping extraction in flight");
            let _ = active.handle.await;
        }
    }

    /// Whether an extraction task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }
}

//! Message-passing front end for the keying engine
//!
//! [`Worker::spawn`] starts an actor task that owns a [`JobRunner`]. Callers
//! talk to it through a [`WorkerHandle`]: typed [`Request`]s go in over a
//! bounded channel and [`Response`]s come back over an unbounded one. Buffers
//! are moved through the channels, never shared.
//!
//! A `process` request yields zero or more `progress` responses followed by
//! exactly one of `complete`, `cancelled` or `error`. A `cancel` request has
//! no direct response; it is observed through the running job's `cancelled`
//! response.

use crate::{
    color::ColorSample,
    config::{EngineConfig, ProcessingSettings},
    error::{BgKeyError, Result},
    processor::{JobOutcome, JobRunner},
    selection::{select, MagicRegion},
    services::{ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate},
    threshold::calculate_auto_threshold,
    types::{PixelBuffer, ProcessingTimings},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Requests accepted by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Process {
        buffer: PixelBuffer,
        #[serde(default)]
        settings: ProcessingSettings,
    },
    CalculateAutoThreshold {
        buffer: PixelBuffer,
    },
    MagicSelect {
        buffer: PixelBuffer,
        #[serde(rename = "seedX")]
        seed_x: u32,
        #[serde(rename = "seedY")]
        seed_y: u32,
        tolerance: f32,
    },
    Cancel,
}

impl Request {
    /// Wire names of every request kind
    pub const KINDS: [&'static str; 4] = ["process", "calculateAutoThreshold", "magicSelect", "cancel"];

    /// Wire name of this request
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process { .. } => "process",
            Self::CalculateAutoThreshold { .. } => "calculateAutoThreshold",
            Self::MagicSelect { .. } => "magicSelect",
            Self::Cancel => "cancel",
        }
    }
}

/// Responses emitted by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Progress {
        percent: u8,
    },
    Complete {
        buffer: PixelBuffer,
    },
    Cancelled,
    Error {
        message: String,
    },
    AutoThreshold {
        threshold: f32,
        #[serde(rename = "dominantColor")]
        dominant_color: ColorSample,
    },
    MagicSelectResult {
        region: MagicRegion,
    },
}

impl Response {
    /// Whether this response ends a `process` job
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Cancelled | Self::Error { .. }
        )
    }

    fn error(err: &BgKeyError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

/// Messages carried to the actor; unknown wire kinds travel as `Unsupported`
#[derive(Debug)]
enum Envelope {
    Request(Request),
    Unsupported(String),
}

/// Forwards throttled progress as `progress` responses
pub struct ChannelProgressReporter {
    responses: mpsc::UnboundedSender<Response>,
}

impl ChannelProgressReporter {
    #[must_use]
    pub fn new(responses: mpsc::UnboundedSender<Response>) -> Self {
        Self { responses }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        // A closed channel means the caller went away; the job result is moot
        let _ = self.responses.send(Response::Progress {
            percent: update.progress,
        });
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        debug!(total_ms = timings.total_ms, "Job completion reported");
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        debug!(stage = ?stage, error, "Job error reported");
    }
}

/// Entry point for starting the actor
pub struct Worker;

impl Worker {
    /// Start a worker on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns [`BgKeyError::WorkerInit`] when called outside a tokio runtime
    /// or with an invalid engine configuration. The error is not retryable;
    /// callers fall back on their own.
    pub fn spawn(config: EngineConfig) -> Result<WorkerHandle> {
        config
            .validate()
            .map_err(|e| BgKeyError::worker_init(e.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BgKeyError::worker_init(format!("no tokio runtime available: {e}")))?;

        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity);
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let actor = WorkerActor {
            runner: JobRunner::new(config),
            requests: request_rx,
            responses: response_tx,
        };
        runtime.spawn(actor.run());
        info!("Keying worker started");

        Ok(WorkerHandle {
            requests: request_tx,
            responses: response_rx,
        })
    }
}

/// Caller side of a running worker
///
/// Dropping the handle stops the actor once queued requests are drained.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: mpsc::Sender<Envelope>,
    responses: mpsc::UnboundedReceiver<Response>,
}

impl WorkerHandle {
    /// Queue a typed request
    ///
    /// # Errors
    ///
    /// Returns [`BgKeyError::WorkerClosed`] if the actor has stopped.
    pub async fn send(&self, request: Request) -> Result<()> {
        self.forward(Envelope::Request(request)).await
    }

    /// Queue a request in its JSON wire form
    ///
    /// An unknown `type` is answered with an `error` response naming it and
    /// leaves any running job alone.
    ///
    /// # Errors
    ///
    /// Returns [`BgKeyError::Serialization`] for malformed JSON or a known kind
    /// with invalid fields, and [`BgKeyError::WorkerClosed`] if the actor has
    /// stopped.
    pub async fn send_json(&self, json: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<missing>")
            .to_string();

        if Request::KINDS.contains(&kind.as_str()) {
            let request: Request = serde_json::from_value(value)?;
            self.forward(Envelope::Request(request)).await
        } else {
            self.forward(Envelope::Unsupported(kind)).await
        }
    }

    /// Next response, or `None` once the worker and all its jobs are gone
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    async fn forward(&self, envelope: Envelope) -> Result<()> {
        self.requests
            .send(envelope)
            .await
            .map_err(|_| BgKeyError::WorkerClosed)
    }
}

struct WorkerActor {
    runner: JobRunner,
    requests: mpsc::Receiver<Envelope>,
    responses: mpsc::UnboundedSender<Response>,
}

impl WorkerActor {
    async fn run(mut self) {
        while let Some(envelope) = self.requests.recv().await {
            match envelope {
                Envelope::Request(request) => self.handle(request),
                Envelope::Unsupported(kind) => {
                    warn!(kind = %kind, "Rejected unsupported request");
                    self.respond(Response::error(&BgKeyError::unsupported_request(kind)));
                },
            }
        }
        debug!("Keying worker stopped");
    }

    fn handle(&self, request: Request) {
        debug!(kind = request.kind(), "Handling request");
        match request {
            Request::Process { buffer, settings } => self.start_job(buffer, settings),
            Request::CalculateAutoThreshold { buffer } => {
                let response = match calculate_auto_threshold(&buffer) {
                    Ok(auto) => Response::AutoThreshold {
                        threshold: auto.threshold,
                        dominant_color: auto.dominant_color,
                    },
                    Err(e) => Response::error(&e),
                };
                self.respond(response);
            },
            Request::MagicSelect {
                buffer,
                seed_x,
                seed_y,
                tolerance,
            } => {
                let response = match select(&buffer, seed_x, seed_y, tolerance) {
                    Ok(region) => Response::MagicSelectResult { region },
                    Err(e) => Response::error(&e),
                };
                self.respond(response);
            },
            Request::Cancel => {
                if !self.runner.cancel() {
                    debug!("Cancel ignored, no job running");
                }
            },
        }
    }

    fn start_job(&self, buffer: PixelBuffer, settings: ProcessingSettings) {
        let reporter = ChannelProgressReporter::new(self.responses.clone());
        let tracker = ProgressTracker::new(Box::new(reporter), self.runner.config().progress_step);

        let job = match self.runner.submit(buffer, settings, tracker) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Rejected process request");
                self.respond(Response::error(&e));
                return;
            },
        };

        // The job runs on its own task so a panic still yields a terminal response
        let responses = self.responses.clone();
        let job = tokio::spawn(job);
        tokio::spawn(async move {
            let response = match job.await {
                Ok(Ok(JobOutcome::Complete(buffer))) => Response::Complete { buffer },
                Ok(Ok(JobOutcome::Cancelled)) => Response::Cancelled,
                Ok(Err(e)) => Response::error(&e),
                Err(join_error) => {
                    warn!(error = %join_error, "Keying job task failed");
                    Response::Error {
                        message: format!("Keying job aborted: {join_error}"),
                    }
                },
            };
            let _ = responses.send(response);
        });
    }

    fn respond(&self, response: Response) {
        if self.responses.send(response).is_err() {
            debug!("Response dropped, handle is gone");
        }
    }
}

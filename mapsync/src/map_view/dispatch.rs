//! Rendering-context job queue.

use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Work to run on the rendering context.
pub type RenderJob = Box<dyn FnOnce() + Send + 'static>;

/// Sender half: cloneable, usable from any thread.
#[derive(Clone)]
pub struct RenderContext {
    tx: mpsc::UnboundedSender<RenderJob>,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl RenderContext {
    /// Create a context and the loop that executes its jobs.
    pub fn new() -> (Self, RenderLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, RenderLoop { rx })
    }

    /// Queue a job. Returns `false` if the loop has gone away.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }
}

/// Receiver half: owned by whoever drives the rendering context.
pub struct RenderLoop {
    rx: mpsc::UnboundedReceiver<RenderJob>,
}

impl fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLoop").finish_non_exhaustive()
    }
}

impl RenderLoop {
    /// Run jobs in order until shutdown or until every context is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("Render loop starting");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Render loop shutting down");
                    break;
                }

                job = self.rx.recv() => {
                    match job {
                        Some(job) => job(),
                        None => {
                            debug!("All render contexts dropped");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run every job queued right now, for hosts that pump the rendering
    /// context from their own UI loop. Returns the number of jobs run.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        if ran > 0 {
            trace!(jobs = ran, "Drained render jobs");
        }
        ran
    }
}

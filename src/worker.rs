use crate::diffusion::{AdiSolver, AdvanceReport, DiffusionField, FieldGeometry};
use anyhow::Result;
use log::{debug, error, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct AdvanceRequest {
    sequence: u64,
    geometry: FieldGeometry,
    grid: Vec<f64>,
    sources: Vec<f64>,
    sinks: Vec<f64>,
    elapsed: f64,
}

struct AdvanceReply {
    sequence: u64,
    result: Result<(Vec<f64>, AdvanceReport)>,
}

/// Runs field advances on a dedicated thread.
///
/// Each request carries copies of the field buffers and a sequence number. The
/// caller waits a bounded time; if no matching reply arrives the field is left
/// as it was, and the late reply is dropped when it finally shows up.
pub struct DiffusionWorker {
    requests: Option<Sender<AdvanceRequest>>,
    replies: Receiver<AdvanceReply>,
    handle: Option<JoinHandle<()>>,
    next_sequence: u64,
}

impl DiffusionWorker {
    pub fn spawn() -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<AdvanceRequest>();
        let (reply_tx, reply_rx) = mpsc::channel::<AdvanceReply>();
        let handle = std::thread::Builder::new()
            .name("diffusion-worker".to_string())
            .spawn(move || serve(request_rx, reply_tx))
            .map_err(|e| anyhow::anyhow!("Failed to spawn diffusion worker: {}", e))?;
        debug!("Diffusion worker started.");
        Ok(DiffusionWorker {
            requests: Some(request_tx),
            replies: reply_rx,
            handle: Some(handle),
            next_sequence: 0,
        })
    }

    /// Advances `field` on the worker thread, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout; the field is then unchanged.
    pub fn advance(&mut self, field: &mut DiffusionField, elapsed: f64, timeout: Duration) -> Result<Option<AdvanceReport>> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let request = AdvanceRequest {
            sequence,
            geometry: *field.geometry(),
            grid: field.snapshot(),
            sources: field.sources().to_vec(),
            sinks: field.sinks().to_vec(),
            elapsed,
        };
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Diffusion worker has been shut down."))?;
        sender
            .send(request)
            .map_err(|_| anyhow::anyhow!("Diffusion worker is no longer running."))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.sequence == sequence => {
                    let (grid, report) = reply.result?;
                    field.commit(grid)?;
                    return Ok(Some(report));
                }
                Ok(reply) => {
                    debug!("Discarding stale diffusion reply {} (waiting for {}).", reply.sequence, sequence);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Diffusion worker did not answer request {} for '{}' within {} ms; field not advanced.",
                        sequence,
                        field.name(),
                        timeout.as_millis()
                    );
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    anyhow::bail!("Diffusion worker terminated unexpectedly.");
                }
            }
        }
    }
}

impl Drop for DiffusionWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the serve loop
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Diffusion worker panicked.");
            }
        }
    }
}

fn serve(requests: Receiver<AdvanceRequest>, replies: Sender<AdvanceReply>) {
    let mut solver: Option<AdiSolver> = None;
    for mut request in requests {
        let result = solve(&mut solver, &mut request).map(|report| (request.grid, report));
        if replies.send(AdvanceReply { sequence: request.sequence, result }).is_err() {
            break;
        }
    }
    debug!("Diffusion worker stopped.");
}

fn solve(solver: &mut Option<AdiSolver>, request: &mut AdvanceRequest) -> Result<AdvanceReport> {
    let reusable = matches!(solver, Some(s) if *s.geometry() == request.geometry);
    if !reusable {
        *solver = Some(AdiSolver::new(request.geometry)?);
    }
    match solver {
        Some(s) => s.advance(&mut request.grid, &request.sources, &request.sinks, request.elapsed),
        None => anyhow::bail!("Diffusion worker has no solver."),
    }
}

//! Capture sources: where live input streams come from.
//!
//! A request never blocks. The source answers through the
//! [`CaptureCompletion`] it was handed, from any thread, whenever the device is
//! ready or has failed. The visualizer picks answers up on its own loop.

mod cpal_backend;
mod synthetic;

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

pub use cpal_backend::{default_input_device_name, list_input_devices, CpalCaptureBackend, CpalStream};
pub use synthetic::{SyntheticCaptureSource, SyntheticStream};

use crate::{CaptureConstraints, CaptureError, MediaStreamRef};

/// Provider of live input streams.
pub trait CaptureSource: Send + Sync {
    /// Asks for a stream matching `constraints`. Must return promptly and
    /// answer through `completion` exactly once, resolving or rejecting.
    fn request_capture(&self, constraints: CaptureConstraints, completion: CaptureCompletion);
}

/// A capture source that may or may not be usable on the current host.
pub trait CaptureBackend: CaptureSource {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;
}

/// Answer to one capture request.
pub(crate) struct CaptureOutcome {
    pub request_id: u64,
    pub result: Result<MediaStreamRef, CaptureError>,
}

/// One-shot reply channel for a capture request.
///
/// Resolving or rejecting consumes the completion. A completion dropped
/// without an answer rejects with [`CaptureError::Abandoned`], so a
/// misbehaving source cannot leave the requester waiting forever.
pub struct CaptureCompletion {
    request_id: u64,
    tx: Option<Sender<CaptureOutcome>>,
}

impl CaptureCompletion {
    pub(crate) fn new(request_id: u64, tx: Sender<CaptureOutcome>) -> Self {
        Self {
            request_id,
            tx: Some(tx),
        }
    }

    /// Creates a completion whose answer is read through the returned
    /// [`PendingCapture`], for driving a source outside a visualizer.
    pub fn detached() -> (Self, PendingCapture) {
        let (tx, rx) = mpsc::channel();
        (Self::new(0, tx), PendingCapture { rx })
    }

    /// Identifier of the request this completion answers.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Answers with a live stream.
    pub fn resolve(mut self, stream: MediaStreamRef) {
        self.send(Ok(stream));
    }

    /// Answers with a failure.
    pub fn reject(mut self, error: CaptureError) {
        self.send(Err(error));
    }

    fn send(&mut self, result: Result<MediaStreamRef, CaptureError>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let outcome = CaptureOutcome {
            request_id: self.request_id,
            result,
        };
        // Nobody is waiting any more: free a device that was just opened.
        if let Err(mpsc::SendError(outcome)) = tx.send(outcome) {
            if let Ok(stream) = outcome.result {
                for track in stream.tracks() {
                    track.stop();
                }
            }
        }
    }
}

impl Drop for CaptureCompletion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(request = self.request_id, "capture request dropped unanswered");
            self.send(Err(CaptureError::Abandoned));
        }
    }
}

impl fmt::Debug for CaptureCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureCompletion")
            .field("request_id", &self.request_id)
            .field("answered", &self.tx.is_none())
            .finish()
    }
}

/// Receiving side of a [`CaptureCompletion::detached`] request.
pub struct PendingCapture {
    rx: Receiver<CaptureOutcome>,
}

impl PendingCapture {
    /// Returns the answer if it has arrived.
    pub fn try_result(&self) -> Option<Result<MediaStreamRef, CaptureError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome.result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CaptureError::Abandoned)),
        }
    }

    /// Blocks until the answer arrives.
    pub fn wait(self) -> Result<MediaStreamRef, CaptureError> {
        self.rx
            .recv()
            .map_err(|_| CaptureError::Abandoned)
            .and_then(|outcome| outcome.result)
    }
}

/// Picks the first backend usable right now. Evaluated on every request, so
/// devices plugged in later are found without restarting.
pub fn resolve_backend(backends: &[Arc<dyn CaptureBackend>]) -> Option<Arc<dyn CaptureBackend>> {
    backends.iter().find(|backend| backend.is_available()).cloned()
}

/// Capture source that forwards each request to the first available backend
/// and rejects uniformly when there is none.
#[derive(Clone)]
pub struct ResolvingCaptureSource {
    backends: Vec<Arc<dyn CaptureBackend>>,
}

impl ResolvingCaptureSource {
    /// Backends in order of preference.
    pub fn new(backends: Vec<Arc<dyn CaptureBackend>>) -> Self {
        Self { backends }
    }

    /// The platform's native audio host, followed by every other compiled-in
    /// host as a fallback.
    pub fn system(device_name: Option<String>) -> Self {
        Self::new(CpalCaptureBackend::all_hosts(device_name))
    }

    /// Backends in the order they are tried.
    pub fn backends(&self) -> &[Arc<dyn CaptureBackend>] {
        &self.backends
    }
}

impl CaptureSource for ResolvingCaptureSource {
    fn request_capture(&self, constraints: CaptureConstraints, completion: CaptureCompletion) {
        match resolve_backend(&self.backends) {
            Some(backend) => {
                tracing::debug!(backend = backend.name(), "resolved capture backend");
                backend.request_capture(constraints, completion);
            }
            None => completion.reject(CaptureError::unavailable(
                "no audio capture backend is available on this host",
            )),
        }
    }
}

impl fmt::Debug for ResolvingCaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|backend| backend.name()).collect();
        f.debug_struct("ResolvingCaptureSource")
            .field("backends", &names)
            .finish()
    }
}

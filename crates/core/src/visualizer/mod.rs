//! Lifecycle adapter between a capture device and a waveform renderer.
//!
//! ```text
//!   Idle ──start──▶ (request pending) ──ready──▶ Active ◀──play/pause──▶ Paused
//!    ▲                                             │                       │
//!    └──────────── Stopped ◀────────stop───────────┴───────────────────────┘
//! ```
//!
//! Nothing here blocks. Capture answers are queued by the capture source and
//! applied when the owner calls [`DeviceVisualizer::process_pending`] from its
//! event loop. Frames are delivered on whichever thread the stream produces
//! audio on.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::capture::{CaptureCompletion, CaptureOutcome};
use crate::{
    AudioProcessingContext, CaptureConstraints, CaptureError, CaptureSource, DeviceHandle,
    EventCallback, EventKind, FrameCallback, FrameEvent, FrameSink, FrameSinkSpec,
    MediaStreamRef, Observer, Renderer, ResolvingCaptureSource, Result, SourceTap,
    SubscriptionId, VisualizerConfig, VisualizerEvent, VisualizerOptions,
};

/// Lifecycle state of a [`DeviceVisualizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizerState {
    Idle,
    Active,
    Paused,
    Stopped,
}

/// Construction parameters.
#[derive(Default)]
pub struct VisualizerParams {
    /// Required.
    pub renderer: Option<Arc<dyn Renderer>>,
    /// Defaults to the system audio hosts.
    pub capture: Option<Arc<dyn CaptureSource>>,
    pub options: VisualizerOptions,
}

impl VisualizerParams {
    /// Parameters with the required renderer and everything else defaulted.
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer: Some(renderer),
            ..Default::default()
        }
    }

    /// Replaces the system capture source, e.g. with a synthetic one.
    pub fn with_capture(mut self, capture: Arc<dyn CaptureSource>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Frame size and channel counts.
    pub fn with_options(mut self, options: VisualizerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Pause flag shared with the frame callback. Delivery runs with the flag
/// locked, so once `set_paused(true)` returns no frame is being drawn and
/// none will be until the flag is lowered.
#[derive(Debug, Default)]
struct DeliveryGate {
    paused: Mutex<bool>,
}

impl DeliveryGate {
    fn set_paused(&self, paused: bool) {
        *self.lock() = paused;
    }

    fn is_paused(&self) -> bool {
        *self.lock()
    }

    fn run_unless_paused(&self, deliver: impl FnOnce()) {
        let paused = self.lock();
        if !*paused {
            deliver();
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handler the frame sink calls back into. Dropping the sink's reference to it
/// is what cancels delivery.
struct FrameDelivery {
    renderer: Arc<dyn Renderer>,
    gate: Arc<DeliveryGate>,
}

impl FrameDelivery {
    fn on_frame(&self, event: &FrameEvent) {
        self.gate.run_unless_paused(|| {
            self.renderer.empty();
            self.renderer.load_decoded_buffer(&event.input_buffer);
        });
    }
}

/// Source tap plus frame sink wired to one device. Rebuilt on every connect.
struct ProcessingLink {
    source: Box<dyn SourceTap>,
    sink: Box<dyn FrameSink>,
    torn_down: bool,
}

impl ProcessingLink {
    fn build(
        context: &dyn AudioProcessingContext,
        device: &DeviceHandle,
        config: &VisualizerConfig,
        delivery: Arc<FrameDelivery>,
    ) -> Result<Self> {
        let source = context.create_media_stream_source(device.stream())?;
        let sink = context.create_frame_sink(FrameSinkSpec::from(config))?;
        let mut link = Self {
            source,
            sink,
            torn_down: false,
        };

        // Dropping `link` on error tears down whatever was wired.
        link.source.connect(link.sink.as_ref())?;
        link.sink.connect(context.destination())?;
        let on_frame: FrameCallback = Arc::new(move |event: &FrameEvent| delivery.on_frame(event));
        link.sink.set_on_frame(Some(on_frame));

        Ok(link)
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.source.disconnect();
        self.sink.disconnect();
        self.sink.set_on_frame(None);
        self.torn_down = true;
    }
}

impl Drop for ProcessingLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Streams live input audio into a [`Renderer`], one frame at a time.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use mic_visualiser_core::{
///     DeviceVisualizer, FrameGraph, SyntheticCaptureSource, VisualizerParams, VisualizerState,
///     WaveformCanvas,
/// };
///
/// let canvas = Arc::new(WaveformCanvas::new(Arc::new(FrameGraph::new(8_000)), 32));
/// let capture = Arc::new(SyntheticCaptureSource::new(8_000, 1, 440.0));
/// let mut visualizer =
///     DeviceVisualizer::init(VisualizerParams::new(canvas.clone()).with_capture(capture.clone()))?;
///
/// visualizer.toggle_play()?;
/// visualizer.process_pending();
/// assert_eq!(visualizer.state(), VisualizerState::Active);
///
/// capture.pump(4096);
/// assert_eq!(canvas.snapshot().frames_drawn, 1);
///
/// visualizer.stop();
/// assert_eq!(visualizer.state(), VisualizerState::Stopped);
/// # Ok::<(), mic_visualiser_core::MicVizError>(())
/// ```
pub struct DeviceVisualizer {
    config: VisualizerConfig,
    renderer: Arc<dyn Renderer>,
    context: Arc<dyn AudioProcessingContext>,
    capture: Arc<dyn CaptureSource>,
    state: VisualizerState,
    gate: Arc<DeliveryGate>,
    device: Option<DeviceHandle>,
    link: Option<ProcessingLink>,
    observer: Observer,
    outcomes_tx: Sender<CaptureOutcome>,
    outcomes_rx: Receiver<CaptureOutcome>,
    next_request: u64,
    pending_request: Option<u64>,
}

impl DeviceVisualizer {
    /// Builds an idle visualizer. No device is touched.
    ///
    /// Fails with [`MicVizError::Config`](crate::MicVizError::Config) when no
    /// renderer is supplied or an option is out of range.
    pub fn init(params: VisualizerParams) -> Result<Self> {
        let renderer = params
            .renderer
            .ok_or_else(|| crate::MicVizError::config("no renderer provided"))?;
        let config = VisualizerConfig::resolve(&params.options)?;
        let context = renderer.audio_context();
        let capture = match params.capture {
            Some(capture) => capture,
            None => Arc::new(ResolvingCaptureSource::system(None)),
        };
        let (outcomes_tx, outcomes_rx) = mpsc::channel();

        tracing::debug!(
            frame_size = config.frame_size(),
            input_channels = config.input_channels(),
            output_channels = config.output_channels(),
            "visualizer initialised"
        );

        Ok(Self {
            config,
            renderer,
            context,
            capture,
            state: VisualizerState::Idle,
            gate: Arc::new(DeliveryGate::default()),
            device: None,
            link: None,
            observer: Observer::new(),
            outcomes_tx,
            outcomes_rx,
            next_request: 1,
            pending_request: None,
        })
    }

    /// Settings resolved at construction.
    pub fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VisualizerState {
        self.state
    }

    /// `true` while frames reaching the renderer are dropped.
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// `true` while a capture device is reserved, connected or not.
    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// `true` while the device is wired to the renderer.
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// `true` between `start()` and the arrival of its answer.
    pub fn has_pending_request(&self) -> bool {
        self.pending_request.is_some()
    }

    /// Stream of the reserved device, if any.
    pub fn device_stream(&self) -> Option<&MediaStreamRef> {
        self.device.as_ref().map(DeviceHandle::stream)
    }

    /// Subscribes `callback` to every event of `kind`.
    pub fn on(&mut self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.observer.on(kind, callback)
    }

    /// Subscribes `callback` to the next event of `kind` only.
    pub fn once(&mut self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.observer.once(kind, callback)
    }

    /// Removes one subscription. Returns `false` if it was already gone.
    pub fn un(&mut self, id: SubscriptionId) -> bool {
        self.observer.un(id)
    }

    /// Removes every subscription.
    pub fn un_all(&mut self) {
        self.observer.un_all();
    }

    /// Requests an audio-only capture stream. Returns immediately; the answer
    /// is applied by [`process_pending`](Self::process_pending).
    ///
    /// Ignored while a device is held or a request is already outstanding.
    pub fn start(&mut self) {
        if self.is_active() {
            tracing::warn!(state = ?self.state, "start ignored: a device is already held");
            return;
        }
        if let Some(request) = self.pending_request {
            tracing::debug!(request, "start ignored: capture request already pending");
            return;
        }

        let request = self.next_request;
        self.next_request += 1;
        self.pending_request = Some(request);

        tracing::info!(request, "requesting audio capture");
        self.capture.request_capture(
            CaptureConstraints::audio_only(),
            CaptureCompletion::new(request, self.outcomes_tx.clone()),
        );
    }

    /// Applies every capture answer that has arrived. Returns how many were
    /// handled, including stale ones.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            handled += 1;

            if self.pending_request != Some(outcome.request_id) {
                // Cancelled by destroy(); the device must not stay reserved.
                if let Ok(stream) = outcome.result {
                    tracing::debug!(stream = stream.id(), "releasing stale capture stream");
                    DeviceHandle::new(stream).release();
                }
                continue;
            }

            self.pending_request = None;
            match outcome.result {
                Ok(stream) => self.on_device_ready(stream),
                Err(err) => self.device_error(err),
            }
        }
        handled
    }

    /// Pause/resume. Starts capture first when no device is held.
    pub fn toggle_play(&mut self) -> Result<()> {
        if !self.is_active() {
            self.start();
            return Ok(());
        }

        if self.gate.is_paused() {
            self.play()
        } else {
            self.pause();
            Ok(())
        }
    }

    /// Resumes frame delivery by rebuilding the processing link. Does nothing
    /// without a device. On failure the visualizer stays paused, so the next
    /// `toggle_play()` retries.
    pub fn play(&mut self) -> Result<()> {
        if self.device.is_none() {
            tracing::debug!("play ignored: no capture device");
            return Ok(());
        }

        self.connect()?;
        self.gate.set_paused(false);
        self.state = VisualizerState::Active;
        tracing::debug!("visualization playing");
        Ok(())
    }

    /// Suspends frame delivery and tears down the processing link. The
    /// device stays reserved so resuming is cheap.
    pub fn pause(&mut self) {
        self.gate.set_paused(true);
        self.disconnect();
        if self.device.is_some() {
            self.state = VisualizerState::Paused;
            tracing::debug!("visualization paused");
        }
    }

    /// Releases the device and clears the renderer. No-op unless a device is
    /// held.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }

        self.disconnect();
        if let Some(mut device) = self.device.take() {
            device.release();
        }
        self.renderer.empty();
        self.state = VisualizerState::Stopped;
        tracing::info!("visualization stopped");
    }

    /// Stops everything and cancels an outstanding capture request. Safe to
    /// call repeatedly and from any state.
    pub fn destroy(&mut self) {
        self.gate.set_paused(true);
        if let Some(request) = self.pending_request.take() {
            tracing::debug!(request, "cancelled pending capture request");
        }
        self.stop();
        self.process_pending();
    }

    fn is_active(&self) -> bool {
        matches!(self.state, VisualizerState::Active | VisualizerState::Paused)
    }

    fn on_device_ready(&mut self, stream: MediaStreamRef) {
        let previous = self.state;
        self.device = Some(DeviceHandle::new(stream.clone()));
        self.state = VisualizerState::Active;

        if let Err(err) = self.play() {
            tracing::error!(%err, "could not connect capture stream to the renderer");
            self.disconnect();
            self.device = None;
            self.state = previous;
            self.device_error(CaptureError::failed(err.to_string()));
            return;
        }

        tracing::info!(stream = stream.id(), "capture device ready");
        self.observer
            .fire_event(&VisualizerEvent::DeviceReady(stream));
    }

    fn device_error(&mut self, error: CaptureError) {
        tracing::warn!(%error, "capture device error");
        self.observer.fire_event(&VisualizerEvent::DeviceError(error));
    }

    fn connect(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };

        let delivery = Arc::new(FrameDelivery {
            renderer: self.renderer.clone(),
            gate: self.gate.clone(),
        });
        let link = ProcessingLink::build(self.context.as_ref(), device, &self.config, delivery)?;
        self.link = Some(link);
        tracing::debug!("processing link connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.teardown();
            tracing::debug!("processing link disconnected");
        }
    }
}

impl Drop for DeviceVisualizer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for DeviceVisualizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceVisualizer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("paused", &self.is_paused())
            .field("device", &self.device)
            .field("link", &self.link.is_some())
            .field("pending_request", &self.pending_request)
            .field("observer", &self.observer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameGraph, MicVizError, SyntheticCaptureSource, WaveformCanvas};

    fn visualizer() -> (DeviceVisualizer, Arc<SyntheticCaptureSource>, Arc<WaveformCanvas>) {
        let canvas = Arc::new(WaveformCanvas::new(Arc::new(FrameGraph::new(8_000)), 8));
        let capture = Arc::new(SyntheticCaptureSource::new(8_000, 1, 440.0));
        let params = VisualizerParams::new(canvas.clone())
            .with_capture(capture.clone())
            .with_options(VisualizerOptions {
                buffer_size: Some(256),
                ..Default::default()
            });
        (DeviceVisualizer::init(params).unwrap(), capture, canvas)
    }

    #[test]
    fn init_requires_a_renderer() {
        let err = DeviceVisualizer::init(VisualizerParams::default()).unwrap_err();
        assert!(matches!(err, MicVizError::Config(_)));
    }

    #[test]
    fn init_rejects_invalid_options() {
        let canvas = Arc::new(WaveformCanvas::new(Arc::new(FrameGraph::default()), 8));
        let params = VisualizerParams::new(canvas).with_options(VisualizerOptions {
            number_of_input_channels: Some(0),
            ..Default::default()
        });
        assert!(matches!(
            DeviceVisualizer::init(params),
            Err(MicVizError::Config(_))
        ));
    }

    #[test]
    fn starts_idle_without_touching_a_device() {
        let (visualizer, capture, _) = visualizer();
        assert_eq!(visualizer.state(), VisualizerState::Idle);
        assert!(!visualizer.has_device());
        assert!(!visualizer.has_link());
        assert_eq!(capture.streams_issued(), 0);
        assert_eq!(visualizer.config().frame_size(), 256);
    }

    #[test]
    fn answer_is_applied_only_when_processed() {
        let (mut visualizer, capture, _) = visualizer();
        visualizer.start();

        assert!(visualizer.has_pending_request());
        assert_eq!(visualizer.state(), VisualizerState::Idle);
        assert_eq!(capture.streams_issued(), 1);

        assert_eq!(visualizer.process_pending(), 1);
        assert_eq!(visualizer.state(), VisualizerState::Active);
        assert!(!visualizer.has_pending_request());
    }

    #[test]
    fn repeated_start_does_not_acquire_twice() {
        let (mut visualizer, capture, _) = visualizer();
        visualizer.start();
        visualizer.start();
        visualizer.process_pending();
        visualizer.start();
        visualizer.process_pending();

        assert_eq!(capture.streams_issued(), 1);
        assert_eq!(visualizer.state(), VisualizerState::Active);
    }

    #[test]
    fn play_without_device_creates_no_link() {
        let (mut visualizer, _, _) = visualizer();
        visualizer.play().unwrap();
        assert!(!visualizer.has_link());
        assert_eq!(visualizer.state(), VisualizerState::Idle);
    }

    #[test]
    fn pause_keeps_the_device_and_play_reconnects() {
        let (mut visualizer, capture, canvas) = visualizer();
        visualizer.toggle_play().unwrap();
        visualizer.process_pending();

        visualizer.pause();
        assert!(visualizer.has_device());
        assert!(!visualizer.has_link());
        capture.pump(512);
        assert_eq!(canvas.snapshot().frames_drawn, 0);

        visualizer.play().unwrap();
        visualizer.play().unwrap();
        assert!(visualizer.has_link());
        capture.pump(512);
        assert_eq!(canvas.snapshot().frames_drawn, 2);
    }

    #[test]
    fn dropping_releases_the_device() {
        let (mut visualizer, capture, _) = visualizer();
        visualizer.toggle_play().unwrap();
        visualizer.process_pending();
        assert_eq!(capture.live_streams(), 1);

        drop(visualizer);

        assert_eq!(capture.live_streams(), 0);
    }

    #[test]
    fn failed_resume_stays_paused_and_retries_on_toggle() {
        let (mut visualizer, _, _) = visualizer();
        visualizer.toggle_play().unwrap();
        visualizer.process_pending();
        visualizer.pause();

        for track in visualizer.device_stream().unwrap().tracks() {
            track.stop();
        }

        assert!(matches!(visualizer.play(), Err(MicVizError::Graph(_))));
        assert!(visualizer.is_paused());
        assert_eq!(visualizer.state(), VisualizerState::Paused);
        assert!(!visualizer.has_link());

        // Still paused, so toggling tries to resume again rather than pausing.
        assert!(visualizer.toggle_play().is_err());
        assert!(visualizer.is_paused());
        assert_eq!(visualizer.state(), VisualizerState::Paused);
    }

    #[test]
    fn delivery_gate_blocks_while_paused() {
        let gate = DeliveryGate::default();
        let mut runs = 0;
        gate.run_unless_paused(|| runs += 1);
        gate.set_paused(true);
        gate.run_unless_paused(|| runs += 1);
        assert_eq!(runs, 1);
        assert!(gate.is_paused());
    }
}

//! Generated tone source for running without hardware.

use std::f64::consts::PI;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CaptureBackend, CaptureCompletion, CaptureSource};
use crate::{
    CaptureConstraints, CaptureError, MediaStream, MediaTrack, SampleBlock, SampleConsumer,
    SampleConsumerSlot,
};

/// Capture source producing sine-wave streams.
///
/// Requests resolve immediately. Audio only flows when the owner calls
/// [`pump`](Self::pump), which keeps timing under the caller's control.
///
/// # Example
///
/// ```
/// use mic_visualiser_core::{
///     CaptureCompletion, CaptureConstraints, CaptureSource, MediaStream, SyntheticCaptureSource,
/// };
///
/// let source = SyntheticCaptureSource::new(8_000, 1, 440.0);
/// let (completion, pending) = CaptureCompletion::detached();
/// source.request_capture(CaptureConstraints::audio_only(), completion);
///
/// let stream = pending.wait().unwrap();
/// assert!(stream.is_active());
/// assert_eq!(source.live_streams(), 1);
/// ```
pub struct SyntheticCaptureSource {
    sample_rate: u32,
    channels: u16,
    frequency_hz: f64,
    amplitude: f32,
    streams: Mutex<Vec<Arc<SyntheticStream>>>,
    issued: AtomicUsize,
}

impl SyntheticCaptureSource {
    /// Source of `frequency_hz` sine streams with `channels` identical channels.
    pub fn new(sample_rate: u32, channels: u16, frequency_hz: f32) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            frequency_hz: f64::from(frequency_hz),
            amplitude: 0.8,
            streams: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
        }
    }

    /// Peak amplitude, clamped to `0.0..=1.0`. Defaults to 0.8.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Sample rate of every stream this source issues.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Pushes `frames` sample-frames through every live stream and forgets
    /// streams whose track was stopped. Returns how many streams produced audio.
    pub fn pump(&self, frames: usize) -> usize {
        let mut streams = self.lock_streams();
        streams.retain(|stream| stream.is_active());
        streams
            .iter()
            .filter(|stream| stream.generate(frames))
            .count()
    }

    /// Streams handed out so far, live or not.
    pub fn streams_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Streams whose track has not been stopped.
    pub fn live_streams(&self) -> usize {
        self.lock_streams()
            .iter()
            .filter(|stream| stream.is_active())
            .count()
    }

    fn lock_streams(&self) -> MutexGuard<'_, Vec<Arc<SyntheticStream>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureSource for SyntheticCaptureSource {
    fn request_capture(&self, constraints: CaptureConstraints, completion: CaptureCompletion) {
        if !constraints.audio || constraints.video {
            completion.reject(CaptureError::failed(
                "synthetic source only produces audio-only streams",
            ));
            return;
        }

        let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let stream = Arc::new(SyntheticStream::new(
            format!("synthetic-{serial}"),
            self.sample_rate,
            self.channels,
            self.frequency_hz,
            self.amplitude,
        ));
        self.lock_streams().push(stream.clone());
        tracing::debug!(stream = stream.id(), "issued synthetic stream");
        completion.resolve(stream);
    }
}

impl CaptureBackend for SyntheticCaptureSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_available(&self) -> bool {
        true
    }
}

impl fmt::Debug for SyntheticCaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticCaptureSource")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frequency_hz", &self.frequency_hz)
            .field("issued", &self.streams_issued())
            .finish()
    }
}

/// Sine-wave stream with a single track.
pub struct SyntheticStream {
    id: String,
    sample_rate: u32,
    channels: u16,
    frequency_hz: f64,
    amplitude: f32,
    position: AtomicU64,
    track: Arc<SyntheticTrack>,
    slot: SampleConsumerSlot,
}

impl SyntheticStream {
    fn new(id: String, sample_rate: u32, channels: u16, frequency_hz: f64, amplitude: f32) -> Self {
        Self {
            id,
            sample_rate,
            channels,
            frequency_hz,
            amplitude,
            position: AtomicU64::new(0),
            track: Arc::new(SyntheticTrack {
                live: AtomicBool::new(true),
            }),
            slot: SampleConsumerSlot::new(),
        }
    }

    /// Produces `frames` sample-frames for the current consumer. Returns
    /// `false` when the track is stopped or nobody is listening.
    pub fn generate(&self, frames: usize) -> bool {
        if !self.track.is_live() || frames == 0 {
            return false;
        }

        let start = self.position.fetch_add(frames as u64, Ordering::SeqCst);
        let rate = f64::from(self.sample_rate.max(1));
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for offset in 0..frames as u64 {
            let t = (start + offset) as f64 / rate;
            let value = (2.0 * PI * self.frequency_hz * t).sin() as f32 * self.amplitude;
            samples.extend(std::iter::repeat(value).take(self.channels as usize));
        }

        self.slot.deliver(SampleBlock {
            samples: &samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
        })
    }

    /// `true` while something is listening to this stream.
    pub fn has_consumer(&self) -> bool {
        self.slot.is_set()
    }
}

impl MediaStream for SyntheticStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![self.track.clone() as Arc<dyn MediaTrack>]
    }

    fn set_sample_consumer(&self, consumer: Option<SampleConsumer>) {
        self.slot.set(consumer);
    }
}

impl fmt::Debug for SyntheticStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticStream")
            .field("id", &self.id)
            .field("live", &self.track.is_live())
            .finish()
    }
}

struct SyntheticTrack {
    live: AtomicBool,
}

impl MediaTrack for SyntheticTrack {
    fn label(&self) -> &str {
        "synthetic tone"
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::sample_consumer;

    fn acquire(source: &SyntheticCaptureSource) -> crate::MediaStreamRef {
        let (completion, pending) = CaptureCompletion::detached();
        source.request_capture(CaptureConstraints::audio_only(), completion);
        pending.wait().unwrap()
    }

    #[test]
    fn pumped_samples_reach_the_consumer() {
        let source = SyntheticCaptureSource::new(8_000, 2, 1_000.0);
        let stream = acquire(&source);
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        stream.set_sample_consumer(Some(sample_consumer(move |block| {
            assert_eq!(block.channels, 2);
            sink.lock().unwrap().extend_from_slice(block.samples);
        })));

        assert_eq!(source.pump(16), 1);
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 32);
        assert!(received.iter().any(|sample| *sample > 0.0));
        assert!(received.iter().all(|sample| sample.abs() <= 0.8 + f32::EPSILON));
    }

    #[test]
    fn stopped_streams_are_forgotten() {
        let source = SyntheticCaptureSource::new(8_000, 1, 440.0);
        let first = acquire(&source);
        let _second = acquire(&source);
        assert_eq!(source.streams_issued(), 2);
        assert_eq!(source.live_streams(), 2);

        for track in first.tracks() {
            track.stop();
        }

        assert_eq!(source.live_streams(), 1);
        assert_eq!(source.pump(8), 0);
    }

    #[test]
    fn rejects_video_requests() {
        let source = SyntheticCaptureSource::new(8_000, 1, 440.0);
        let (completion, pending) = CaptureCompletion::detached();
        source.request_capture(
            CaptureConstraints {
                audio: true,
                video: true,
            },
            completion,
        );
        assert!(matches!(pending.wait(), Err(CaptureError::Failed(_))));
        assert_eq!(source.streams_issued(), 0);
    }
}

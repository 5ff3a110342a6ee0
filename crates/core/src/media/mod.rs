//! Live capture streams and the handle that owns one while it is in use.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// What a capture request asks the host for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
}

impl CaptureConstraints {
    /// Audio input only. This is the only request the visualizer makes.
    pub const fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Interleaved block of samples pushed by a live stream.
#[derive(Debug, Clone, Copy)]
pub struct SampleBlock<'a> {
    pub samples: &'a [f32],
    pub channels: u16,
    pub sample_rate: u32,
}

impl SampleBlock<'_> {
    /// Number of sample-frames (samples per channel) in the block.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Receives every block a stream produces. Called from whatever thread the
/// stream's backend delivers audio on.
pub type SampleConsumer = Arc<dyn for<'a> Fn(SampleBlock<'a>) + Send + Sync>;

/// Wraps a closure into a [`SampleConsumer`].
pub fn sample_consumer<F>(f: F) -> SampleConsumer
where
    F: for<'a> Fn(SampleBlock<'a>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Holder for a stream's current consumer, for use by stream implementations.
///
/// Blocks are delivered with the slot locked, so replacing or clearing the
/// consumer waits for an in-flight delivery to finish.
#[derive(Default)]
pub struct SampleConsumerSlot {
    consumer: Mutex<Option<SampleConsumer>>,
}

impl SampleConsumerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the consumer, waiting for any in-flight delivery.
    pub fn set(&self, consumer: Option<SampleConsumer>) {
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = consumer;
    }

    /// `true` while a consumer is installed.
    pub fn is_set(&self) -> bool {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hands `block` to the current consumer. Returns `false` when none is
    /// installed.
    pub fn deliver(&self, block: SampleBlock<'_>) -> bool {
        let guard = self.consumer.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(consumer) => {
                consumer(block);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for SampleConsumerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleConsumerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

/// One track of a capture stream.
pub trait MediaTrack: Send + Sync {
    fn label(&self) -> &str;

    /// Stops the track and frees whatever device resource backs it. Must be
    /// safe to call more than once.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// A live capture stream made of one or more tracks.
pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Installs (or with `None`, removes) the consumer that receives the
    /// stream's samples. Removal must not return while a block is still being
    /// handed to the previous consumer.
    fn set_sample_consumer(&self, consumer: Option<SampleConsumer>);

    /// Returns `true` while at least one track is live.
    fn is_active(&self) -> bool {
        self.tracks().iter().any(|track| track.is_live())
    }
}

/// Shared reference to a capture stream.
pub type MediaStreamRef = Arc<dyn MediaStream>;

/// Exclusive owner of an acquired capture stream.
///
/// Releasing stops every track of the stream individually. A handle that is
/// dropped without an explicit release is released on drop.
pub struct DeviceHandle {
    stream: MediaStreamRef,
    released: bool,
}

impl DeviceHandle {
    /// Takes exclusive ownership of `stream`.
    pub fn new(stream: MediaStreamRef) -> Self {
        Self {
            stream,
            released: false,
        }
    }

    /// The owned stream.
    pub fn stream(&self) -> &MediaStreamRef {
        &self.stream
    }

    /// `true` once `release` has run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stops every track of the stream, freeing the physical device.
    pub fn release(&mut self) {
        if self.released {
            return;
        }

        let tracks = self.stream.tracks();
        for track in &tracks {
            track.stop();
        }
        self.released = true;

        tracing::info!(
            stream = self.stream.id(),
            tracks = tracks.len(),
            "released capture device"
        );
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("stream", &self.stream.id())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    struct CountingTrack {
        live: AtomicBool,
        stops: AtomicUsize,
    }

    impl CountingTrack {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                live: AtomicBool::new(true),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl MediaTrack for CountingTrack {
        fn label(&self) -> &str {
            "counting"
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.live.store(false, Ordering::SeqCst);
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    struct MultiTrackStream {
        tracks: Vec<Arc<CountingTrack>>,
    }

    impl MediaStream for MultiTrackStream {
        fn id(&self) -> &str {
            "multi"
        }

        fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
            self.tracks
                .iter()
                .map(|track| track.clone() as Arc<dyn MediaTrack>)
                .collect()
        }

        fn set_sample_consumer(&self, _consumer: Option<SampleConsumer>) {}
    }

    #[test]
    fn release_stops_every_track_once() {
        let tracks = vec![CountingTrack::new(), CountingTrack::new()];
        let stream = Arc::new(MultiTrackStream {
            tracks: tracks.clone(),
        });
        let mut handle = DeviceHandle::new(stream.clone());
        assert!(stream.is_active());

        handle.release();
        handle.release();
        drop(handle);

        assert!(!stream.is_active());
        for track in tracks {
            assert_eq!(track.stops.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn dropping_an_unreleased_handle_frees_the_device() {
        let track = CountingTrack::new();
        let stream = Arc::new(MultiTrackStream {
            tracks: vec![track.clone()],
        });

        drop(DeviceHandle::new(stream));

        assert!(!track.is_live());
    }

    #[test]
    fn slot_delivers_only_to_the_installed_consumer() {
        let received = Arc::new(AtomicUsize::new(0));
        let slot = SampleConsumerSlot::new();
        let block = SampleBlock {
            samples: &[0.0; 4],
            channels: 1,
            sample_rate: 8_000,
        };
        assert!(!slot.deliver(block));

        let counter = received.clone();
        slot.set(Some(sample_consumer(move |block| {
            counter.fetch_add(block.frames(), Ordering::SeqCst);
        })));
        assert!(slot.deliver(block));
        slot.set(None);
        assert!(!slot.deliver(block));

        assert_eq!(received.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn sample_block_counts_frames_per_channel() {
        let samples = [0.0_f32; 12];
        let block = SampleBlock {
            samples: &samples,
            channels: 2,
            sample_rate: 48_000,
        };
        assert_eq!(block.frames(), 6);
    }
}

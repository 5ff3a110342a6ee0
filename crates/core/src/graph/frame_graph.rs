use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    AudioBuffer, AudioProcessingContext, FrameCallback, FrameEvent, FrameSink, FrameSinkSpec,
    SourceTap, Terminus,
};
use crate::media::sample_consumer;
use crate::{MediaStreamRef, MicVizError, Result, SampleBlock, SampleConsumer};

/// Built-in processing context: taps read straight from the stream's sample
/// consumer and sinks deliver frames on the thread that pushed the samples.
#[derive(Debug)]
pub struct FrameGraph {
    sample_rate: u32,
    destination: Arc<NullDestination>,
    live_sinks: Arc<AtomicUsize>,
}

impl FrameGraph {
    /// Context whose sinks stamp frames with `sample_rate` until a stream reports its own.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            destination: Arc::new(NullDestination::default()),
            live_sinks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of sinks currently routed to a terminus.
    pub fn live_sinks(&self) -> usize {
        self.live_sinks.load(Ordering::SeqCst)
    }

    /// Terminus every sink of this graph is routed to.
    pub fn null_destination(&self) -> &NullDestination {
        &self.destination
    }
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl AudioProcessingContext for FrameGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_media_stream_source(&self, stream: &MediaStreamRef) -> Result<Box<dyn SourceTap>> {
        if !stream.is_active() {
            return Err(MicVizError::graph(format!(
                "stream `{}` has no live tracks",
                stream.id()
            )));
        }
        Ok(Box::new(StreamTap::new(stream.clone())))
    }

    fn create_frame_sink(&self, spec: FrameSinkSpec) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FrameAccumulator::new(
            spec,
            self.sample_rate,
            self.live_sinks.clone(),
        )?))
    }

    fn destination(&self) -> Arc<dyn Terminus> {
        self.destination.clone()
    }
}

/// Terminus that discards sink output and counts the frames it received.
#[derive(Debug, Default)]
pub struct NullDestination {
    frames: AtomicU64,
}

impl NullDestination {
    /// Frames accepted since creation.
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl Terminus for NullDestination {
    fn accept(&self, _output: &AudioBuffer) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

/// Source node bound to one capture stream.
pub struct StreamTap {
    stream: MediaStreamRef,
    connected: bool,
}

impl StreamTap {
    /// Unconnected tap on `stream`.
    pub fn new(stream: MediaStreamRef) -> Self {
        Self {
            stream,
            connected: false,
        }
    }

    /// `true` while the stream's samples flow into a sink.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl SourceTap for StreamTap {
    fn connect(&mut self, sink: &dyn FrameSink) -> Result<()> {
        self.stream.set_sample_consumer(Some(sink.input()));
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.stream.set_sample_consumer(None);
            self.connected = false;
        }
    }
}

impl Drop for StreamTap {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for StreamTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTap")
            .field("stream", &self.stream.id())
            .field("connected", &self.connected)
            .finish()
    }
}

struct AccumulatorState {
    pending: Vec<Vec<f32>>,
    sample_rate: u32,
    on_frame: Option<FrameCallback>,
    terminus: Option<Arc<dyn Terminus>>,
    frames_emitted: u64,
}

/// Sink that groups pushed samples into frames of exactly `frame_size`
/// sample-frames and hands each one to the per-frame callback.
pub struct FrameAccumulator {
    spec: FrameSinkSpec,
    state: Arc<Mutex<AccumulatorState>>,
    live_sinks: Arc<AtomicUsize>,
}

impl FrameAccumulator {
    /// Fails when any dimension of `spec` is zero. `live_sinks` counts the
    /// sinks currently routed to a terminus.
    pub fn new(spec: FrameSinkSpec, sample_rate: u32, live_sinks: Arc<AtomicUsize>) -> Result<Self> {
        if spec.frame_size == 0 || spec.input_channels == 0 || spec.output_channels == 0 {
            return Err(MicVizError::graph(format!(
                "frame sink needs a non-empty shape, got {spec:?}"
            )));
        }

        let state = AccumulatorState {
            pending: vec![Vec::with_capacity(spec.frame_size); spec.input_channels],
            sample_rate,
            on_frame: None,
            terminus: None,
            frames_emitted: 0,
        };

        Ok(Self {
            spec,
            state: Arc::new(Mutex::new(state)),
            live_sinks,
        })
    }

    /// Frames produced since the sink was created, whether or not a callback
    /// was installed.
    pub fn frames_emitted(&self) -> u64 {
        lock_state(&self.state).frames_emitted
    }
}

impl FrameSink for FrameAccumulator {
    fn spec(&self) -> FrameSinkSpec {
        self.spec
    }

    fn input(&self) -> SampleConsumer {
        let state = self.state.clone();
        let spec = self.spec;
        sample_consumer(move |block| {
            let mut guard = lock_state(&state);
            push_block(&mut guard, spec, block);
        })
    }

    fn connect(&mut self, terminus: Arc<dyn Terminus>) -> Result<()> {
        let mut state = lock_state(&self.state);
        if state.terminus.is_none() {
            self.live_sinks.fetch_add(1, Ordering::SeqCst);
        }
        state.terminus = Some(terminus);
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock_state(&self.state);
        if state.terminus.take().is_some() {
            self.live_sinks.fetch_sub(1, Ordering::SeqCst);
        }
        for channel in &mut state.pending {
            channel.clear();
        }
    }

    fn set_on_frame(&mut self, callback: Option<FrameCallback>) {
        lock_state(&self.state).on_frame = callback;
    }
}

impl Drop for FrameAccumulator {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for FrameAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAccumulator")
            .field("spec", &self.spec)
            .finish()
    }
}

// Frame delivery happens with the state lock held, so clearing the callback
// or disconnecting waits for an in-flight frame to finish.
fn push_block(state: &mut AccumulatorState, spec: FrameSinkSpec, block: SampleBlock<'_>) {
    let Some(terminus) = state.terminus.clone() else {
        return;
    };
    if block.channels == 0 {
        return;
    }

    state.sample_rate = block.sample_rate;
    mix_into(&mut state.pending, block);

    while state.pending[0].len() >= spec.frame_size {
        let channels: Vec<Vec<f32>> = state
            .pending
            .iter_mut()
            .map(|channel| channel.drain(..spec.frame_size).collect::<Vec<f32>>())
            .collect();
        let input_buffer = AudioBuffer::new(state.sample_rate, channels);
        let frame_index = state.frames_emitted;
        state.frames_emitted += 1;

        terminus.accept(&AudioBuffer::silent(
            state.sample_rate,
            spec.output_channels,
            spec.frame_size,
        ));

        if let Some(callback) = state.on_frame.clone() {
            callback(&FrameEvent {
                input_buffer,
                frame_index,
            });
        }
    }
}

/// De-interleaves `block` into `pending`, adapting the channel count: many to
/// one averages, one to many copies, anything else maps channel by channel and
/// zero-fills.
fn mix_into(pending: &mut [Vec<f32>], block: SampleBlock<'_>) {
    let source_channels = block.channels as usize;
    let target_channels = pending.len();

    for frame in block.samples.chunks_exact(source_channels) {
        if source_channels == target_channels {
            for (channel, sample) in pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        } else if target_channels == 1 {
            pending[0].push(frame.iter().sum::<f32>() / source_channels as f32);
        } else if source_channels == 1 {
            for channel in pending.iter_mut() {
                channel.push(frame[0]);
            }
        } else {
            for (index, channel) in pending.iter_mut().enumerate() {
                channel.push(frame.get(index).copied().unwrap_or(0.0));
            }
        }
    }
}

fn lock_state(state: &Mutex<AccumulatorState>) -> MutexGuard<'_, AccumulatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Audio processing graph seams: a source tap reading a capture stream, a
//! fixed-size frame sink, and the terminus the sink is routed to.
//!
//! The renderer supplies an [`AudioProcessingContext`] that creates these
//! nodes. [`FrameGraph`] is the built-in context used when no other graph
//! engine is involved.

mod frame_graph;

use std::sync::Arc;

pub use frame_graph::{FrameAccumulator, FrameGraph, NullDestination, StreamTap};

use crate::{MediaStreamRef, Result, SampleConsumer, VisualizerConfig};

/// Decoded, de-interleaved audio for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Builds a buffer from per-channel sample data. Channels are expected to
    /// share one length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Zero-filled buffer of `channels` x `length` samples.
    pub fn silent(sample_rate: u32, channels: usize, length: usize) -> Self {
        Self::new(sample_rate, vec![vec![0.0; length]; channels])
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in sample-frames.
    pub fn length(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Number of channels.
    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel, `None` past the last channel.
    pub fn channel_data(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    /// Playback length of the buffer; zero when the sample rate is unknown.
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.length() as f32 / self.sample_rate as f32
        }
    }
}

/// Payload handed to the per-frame callback.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// Input audio of the frame that was just produced.
    pub input_buffer: AudioBuffer,
    /// Position of the frame since the sink was created, starting at zero.
    pub frame_index: u64,
}

pub type FrameCallback = Arc<dyn Fn(&FrameEvent) + Send + Sync>;

/// Shape of a frame sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSinkSpec {
    pub frame_size: usize,
    pub input_channels: usize,
    pub output_channels: usize,
}

impl From<&VisualizerConfig> for FrameSinkSpec {
    fn from(config: &VisualizerConfig) -> Self {
        Self {
            frame_size: config.frame_size() as usize,
            input_channels: config.input_channels() as usize,
            output_channels: config.output_channels() as usize,
        }
    }
}

/// Factory for graph nodes. Supplied by the renderer.
pub trait AudioProcessingContext: Send + Sync {
    /// Nominal rate of the context. Frames carry the rate of the stream that
    /// produced them.
    fn sample_rate(&self) -> u32;

    /// Creates a tap that reads samples from `stream`.
    fn create_media_stream_source(&self, stream: &MediaStreamRef) -> Result<Box<dyn SourceTap>>;

    /// Creates a sink that groups incoming samples into fixed-size frames.
    fn create_frame_sink(&self, spec: FrameSinkSpec) -> Result<Box<dyn FrameSink>>;

    /// Neutral routing end point. Sinks only run while routed to one.
    fn destination(&self) -> Arc<dyn Terminus>;
}

pub trait SourceTap: Send {
    /// Starts feeding the stream's samples into `sink`.
    fn connect(&mut self, sink: &dyn FrameSink) -> Result<()>;

    /// Stops feeding samples. Safe to call when not connected.
    fn disconnect(&mut self);
}

pub trait FrameSink: Send {
    fn spec(&self) -> FrameSinkSpec;

    /// Entry point sources push interleaved samples into.
    fn input(&self) -> SampleConsumer;

    /// Routes the sink's output to `terminus`, which keeps the sink running.
    fn connect(&mut self, terminus: Arc<dyn Terminus>) -> Result<()>;

    /// Unroutes the sink and drops any partially filled frame. Safe to call
    /// when not connected.
    fn disconnect(&mut self);

    /// Installs or clears the per-frame callback. Clearing does not return
    /// while a delivery to the previous callback is in flight.
    fn set_on_frame(&mut self, callback: Option<FrameCallback>);
}

/// Receives the (unused) output of a frame sink.
pub trait Terminus: Send + Sync {
    fn accept(&self, output: &AudioBuffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_reports_shape_and_duration() {
        let buffer = AudioBuffer::new(1000, vec![vec![0.5; 250], vec![-0.5; 250]]);
        assert_eq!(buffer.length(), 250);
        assert_eq!(buffer.number_of_channels(), 2);
        assert_eq!(buffer.channel_data(1).unwrap()[0], -0.5);
        assert!(buffer.channel_data(2).is_none());
        assert!((buffer.duration_seconds() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn sink_spec_follows_config() {
        let spec = FrameSinkSpec::from(&VisualizerConfig::default());
        assert_eq!(
            spec,
            FrameSinkSpec {
                frame_size: 4096,
                input_channels: 1,
                output_channels: 1,
            }
        );
    }
}

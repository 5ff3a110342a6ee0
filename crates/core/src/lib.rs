//! Core library for the microphone visualiser.
//!
//! A [`DeviceVisualizer`] asks a [`CaptureSource`] for a live input stream,
//! wires it through a fixed-size frame sink created by the renderer's
//! [`AudioProcessingContext`], and hands every completed frame to a
//! [`Renderer`]. Capture backends, the processing graph and the renderer are
//! all traits so the lifecycle can be driven without audio hardware.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod media;
pub mod render;
pub mod visualizer;

pub use analysis::{FrameAnalyser, FrameSummary};
pub use capture::{
    default_input_device_name, list_input_devices, resolve_backend, CaptureBackend,
    CaptureCompletion, CaptureSource, CpalCaptureBackend, PendingCapture, ResolvingCaptureSource,
    SyntheticCaptureSource,
};
pub use config::{AppConfig, CaptureSettings, DisplaySettings, VisualizerConfig, VisualizerOptions};
pub use error::{CaptureError, MicVizError, Result};
pub use event::{event_callback, EventCallback, EventKind, Observer, SubscriptionId, VisualizerEvent};
pub use graph::{
    AudioBuffer, AudioProcessingContext, FrameCallback, FrameEvent, FrameGraph, FrameSink,
    FrameSinkSpec, SourceTap, Terminus,
};
pub use media::{
    CaptureConstraints, DeviceHandle, MediaStream, MediaStreamRef, MediaTrack, SampleBlock,
    SampleConsumer, SampleConsumerSlot,
};
pub use render::{CanvasSnapshot, Peak, Renderer, WaveformCanvas};
pub use visualizer::{DeviceVisualizer, VisualizerParams, VisualizerState};

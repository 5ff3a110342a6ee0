use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{AudioBuffer, AudioProcessingContext, FrameAnalyser, FrameSummary};

/// Surface that draws waveforms. The visualizer clears it and loads one
/// decoded buffer per frame.
///
/// Methods may be called from the thread that produces audio, so
/// implementations use interior mutability.
pub trait Renderer: Send + Sync {
    /// Processing context new graph nodes are created from.
    fn audio_context(&self) -> Arc<dyn AudioProcessingContext>;

    /// Removes whatever is currently drawn.
    fn empty(&self);

    /// Draws `buffer` immediately, replacing the current content.
    fn load_decoded_buffer(&self, buffer: &AudioBuffer);
}

/// Min/max pair for one column of the waveform.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Peak {
    pub min: f32,
    pub max: f32,
}

/// Copy of what a [`WaveformCanvas`] currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanvasSnapshot {
    pub peaks: Vec<Peak>,
    pub summary: Option<FrameSummary>,
    pub frames_drawn: u64,
    pub clears: u64,
}

struct CanvasState {
    snapshot: CanvasSnapshot,
    analyser: FrameAnalyser,
}

/// In-memory renderer that reduces each buffer to `width` peak columns.
pub struct WaveformCanvas {
    context: Arc<dyn AudioProcessingContext>,
    width: usize,
    state: Mutex<CanvasState>,
}

impl WaveformCanvas {
    /// Canvas drawing `width` peak columns per frame (at least one).
    pub fn new(context: Arc<dyn AudioProcessingContext>, width: usize) -> Self {
        Self {
            context,
            width: width.max(1),
            state: Mutex::new(CanvasState {
                snapshot: CanvasSnapshot::default(),
                analyser: FrameAnalyser::new(),
            }),
        }
    }

    /// Number of peak columns per frame.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Copy of the current drawing and counters.
    pub fn snapshot(&self) -> CanvasSnapshot {
        self.lock().snapshot.clone()
    }

    /// `true` when nothing is drawn.
    pub fn is_empty(&self) -> bool {
        self.lock().snapshot.peaks.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CanvasState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Renderer for WaveformCanvas {
    fn audio_context(&self) -> Arc<dyn AudioProcessingContext> {
        self.context.clone()
    }

    fn empty(&self) {
        let mut state = self.lock();
        state.snapshot.peaks.clear();
        state.snapshot.summary = None;
        state.snapshot.clears += 1;
    }

    fn load_decoded_buffer(&self, buffer: &AudioBuffer) {
        let peaks = compute_peaks(buffer, self.width);
        let mut state = self.lock();
        let summary = match state.analyser.analyse(buffer) {
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::debug!(%err, "skipping frame summary");
                None
            }
        };
        state.snapshot.peaks = peaks;
        state.snapshot.summary = summary;
        state.snapshot.frames_drawn += 1;
    }
}

impl fmt::Debug for WaveformCanvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveformCanvas")
            .field("width", &self.width)
            .finish()
    }
}

/// Splits the buffer into at most `width` equal columns and records the
/// minimum and maximum sample of each, merged across channels.
pub fn compute_peaks(buffer: &AudioBuffer, width: usize) -> Vec<Peak> {
    let length = buffer.length();
    if length == 0 || width == 0 {
        return Vec::new();
    }

    let columns = width.min(length);
    let mut peaks = Vec::with_capacity(columns);
    for column in 0..columns {
        let start = column * length / columns;
        let end = ((column + 1) * length / columns).max(start + 1);
        let mut peak = Peak {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        };
        for channel in 0..buffer.number_of_channels() {
            let Some(data) = buffer.channel_data(channel) else {
                continue;
            };
            // Channels may be shorter than the first one.
            let end = end.min(data.len());
            if start >= end {
                continue;
            }
            for sample in &data[start..end] {
                peak.min = peak.min.min(*sample);
                peak.max = peak.max.max(*sample);
            }
        }
        if peak.min > peak.max {
            peak = Peak::default();
        }
        peaks.push(peak);
    }
    peaks
}

use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AudioBuffer, MicVizError, Result};

/// Level and brightness of a single delivered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub rms: f32,
    /// Largest absolute sample value.
    pub peak: f32,
    pub spectral_centroid_hz: f32,
    pub duration_seconds: f32,
}

/// Per-frame feature extraction. Frames arrive with a fixed size, so the FFT
/// plan is built once and reused until the size changes.
pub struct FrameAnalyser {
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl Default for FrameAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAnalyser {
    pub fn new() -> Self {
        Self {
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Summarises the first channel of `buffer`.
    pub fn analyse(&mut self, buffer: &AudioBuffer) -> Result<FrameSummary> {
        let samples = buffer
            .channel_data(0)
            .ok_or_else(|| MicVizError::msg("frame has no channels"))?;

        if samples.len() < 2 {
            return Err(MicVizError::msg(
                "analysis requires frames with at least two samples",
            ));
        }

        Ok(FrameSummary {
            rms: compute_rms(samples),
            peak: compute_peak(samples),
            spectral_centroid_hz: self.compute_spectral_centroid(samples, buffer.sample_rate())?,
            duration_seconds: buffer.duration_seconds(),
        })
    }

    fn compute_spectral_centroid(&mut self, samples: &[f32], sample_rate: u32) -> Result<f32> {
        let len = samples.len();
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|e| MicVizError::msg(format!("fft failed: {e}")))?;

        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bin_hz = sample_rate as f32 / len as f32;

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
        }

        if magnitude_sum <= f32::EPSILON {
            Ok(0.0)
        } else {
            Ok(weighted_sum / magnitude_sum)
        }
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::plan(planner, size));
        if fft.size != size {
            *fft = FftResources::plan(planner, size);
        }
        fft
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for FrameAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAnalyser")
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn compute_peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: u32, frequency: f32, len: usize) -> AudioBuffer {
        let samples = (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioBuffer::new(sample_rate, vec![samples])
    }

    #[test]
    fn silent_frame_has_zero_features() {
        let mut analyser = FrameAnalyser::new();
        let summary = analyser.analyse(&AudioBuffer::silent(48_000, 1, 1024)).unwrap();

        assert_eq!(summary.rms, 0.0);
        assert_eq!(summary.peak, 0.0);
        assert_eq!(summary.spectral_centroid_hz, 0.0);
    }

    #[test]
    fn centroid_tracks_tone_frequency() {
        let mut analyser = FrameAnalyser::new();
        let summary = analyser.analyse(&sine(8_000, 1_000.0, 1024)).unwrap();

        assert!((summary.spectral_centroid_hz - 1_000.0).abs() < 100.0);
        assert!((summary.peak - 1.0).abs() < 0.01);
        assert!((summary.rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
        assert!((summary.duration_seconds - 0.128).abs() < 1e-4);
    }

    #[test]
    fn replans_when_frame_size_changes() {
        let mut analyser = FrameAnalyser::new();
        analyser.analyse(&sine(8_000, 500.0, 256)).unwrap();
        analyser.analyse(&sine(8_000, 500.0, 512)).unwrap();

        assert_eq!(analyser.fft.as_ref().map(|fft| fft.size), Some(512));
    }

    #[test]
    fn rejects_empty_frames() {
        let mut analyser = FrameAnalyser::new();
        assert!(analyser.analyse(&AudioBuffer::new(8_000, Vec::new())).is_err());
        assert!(analyser.analyse(&AudioBuffer::silent(8_000, 1, 1)).is_err());
    }
}

//! Input devices opened through cpal.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, HostId, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::{CaptureBackend, CaptureCompletion, CaptureSource};
use crate::{
    CaptureConstraints, CaptureError, MediaStream, MediaTrack, MicVizError, Result, SampleBlock,
    SampleConsumer, SampleConsumerSlot,
};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Lists the input devices of the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| MicVizError::msg(format!("failed to enumerate input devices: {e}")))?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Name of the default host's default input device, if any.
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|device| device.name().ok())
}

/// Capture backend for one cpal host.
///
/// Each accepted request opens the device on its own owner thread: cpal
/// streams cannot move between threads, so the thread keeps the stream alive
/// until the returned track is stopped.
#[derive(Debug, Clone)]
pub struct CpalCaptureBackend {
    host_id: Option<HostId>,
    device_name: Option<String>,
    name: String,
}

impl CpalCaptureBackend {
    /// Backend for the platform's default host.
    pub fn native(device_name: Option<String>) -> Self {
        Self {
            host_id: None,
            device_name,
            name: "cpal:default".to_string(),
        }
    }

    /// Backend for a specific cpal host, used as a fallback.
    pub fn for_host(host_id: HostId, device_name: Option<String>) -> Self {
        Self {
            host_id: Some(host_id),
            device_name,
            name: format!("cpal:{}", host_id.name()),
        }
    }

    /// The native host first, then every other compiled-in host.
    pub fn all_hosts(device_name: Option<String>) -> Vec<Arc<dyn CaptureBackend>> {
        let default_id = cpal::default_host().id();
        let mut backends: Vec<Arc<dyn CaptureBackend>> =
            vec![Arc::new(Self::native(device_name.clone())) as Arc<dyn CaptureBackend>];
        for host_id in cpal::available_hosts() {
            if host_id != default_id {
                backends.push(Arc::new(Self::for_host(host_id, device_name.clone())));
            }
        }
        backends
    }

    fn host(&self) -> std::result::Result<Host, CaptureError> {
        match self.host_id {
            None => Ok(cpal::default_host()),
            Some(id) => cpal::host_from_id(id).map_err(|e| CaptureError::unavailable(e.to_string())),
        }
    }

    fn device(&self, host: &Host) -> std::result::Result<Device, CaptureError> {
        match self.device_name.as_deref() {
            Some(name) => host
                .input_devices()
                .map_err(|e| classify(e.to_string()))?
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::failed(format!("input device not found: {name}"))),
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::unavailable("no default input device configured")),
        }
    }

    fn open(&self, slot: Arc<SampleConsumerSlot>) -> std::result::Result<(Stream, String), CaptureError> {
        let host = self.host()?;
        let device = self.device(&host)?;
        let label = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| classify(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        tracing::info!(
            device = %label,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?sample_format,
            "opening input device"
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, slot)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, slot)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, slot)?,
            format => {
                return Err(CaptureError::failed(format!(
                    "unsupported sample format: {format:?}"
                )))
            }
        };
        stream.play().map_err(|e| classify(e.to_string()))?;

        Ok((stream, label))
    }

    fn run_device(self, completion: CaptureCompletion) {
        let slot = Arc::new(SampleConsumerSlot::new());
        let (stream, label) = match self.open(slot.clone()) {
            Ok(opened) => opened,
            Err(err) => {
                tracing::warn!(backend = %self.name, %err, "could not open input device");
                completion.reject(err);
                return;
            }
        };

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let media = Arc::new(CpalStream::new(label, slot, stop_tx));
        completion.resolve(media);

        // Returns once the track is stopped or every handle to it is gone.
        let _ = stop_rx.recv();
        drop(stream);
        tracing::debug!(backend = %self.name, "input device closed");
    }
}

impl CaptureSource for CpalCaptureBackend {
    fn request_capture(&self, constraints: CaptureConstraints, completion: CaptureCompletion) {
        if !constraints.audio {
            completion.reject(CaptureError::failed("no audio track requested"));
            return;
        }
        if constraints.video {
            completion.reject(CaptureError::failed("video capture is not supported"));
            return;
        }

        // A failed spawn drops the completion with the closure, which rejects
        // the request as abandoned.
        let backend = self.clone();
        let spawned = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || backend.run_device(completion));
        if let Err(err) = spawned {
            tracing::error!(%err, "failed to spawn capture thread");
        }
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// Only checks that the host can be reached. Device lookup happens on the
    /// capture thread, so a missing device rejects as `Failed` without
    /// blocking the caller.
    fn is_available(&self) -> bool {
        self.host().is_ok()
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    slot: Arc<SampleConsumerSlot>,
) -> std::result::Result<Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels;
    let sample_rate = config.sample_rate.0;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|sample| f32::from_sample(*sample)));
                slot.deliver(SampleBlock {
                    samples: &scratch,
                    channels,
                    sample_rate,
                });
            },
            |err| {
                tracing::error!(%err, "audio input stream error");
            },
            None,
        )
        .map_err(|e| classify(e.to_string()))
}

/// cpal reports permission problems as backend-specific text.
fn classify(message: String) -> CaptureError {
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("not authorized") {
        CaptureError::Denied(message)
    } else {
        CaptureError::Failed(message)
    }
}

/// Live stream of one cpal input device.
pub struct CpalStream {
    id: String,
    track: Arc<CpalTrack>,
    slot: Arc<SampleConsumerSlot>,
}

impl CpalStream {
    fn new(label: String, slot: Arc<SampleConsumerSlot>, stop_tx: Sender<()>) -> Self {
        let id = format!("cpal-{}", NEXT_STREAM_ID.fetch_add(1, Ordering::SeqCst));
        Self {
            id,
            track: Arc::new(CpalTrack {
                label,
                live: AtomicBool::new(true),
                stop_tx: Mutex::new(Some(stop_tx)),
            }),
            slot,
        }
    }
}

impl MediaStream for CpalStream {
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

impl fmt::Debug for CpalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalStream")
            .field("id", &self.id)
            .field("device", &self.track.label)
            .field("live", &self.track.is_live())
            .finish()
    }
}

struct CpalTrack {
    label: String,
    live: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
}

impl MediaTrack for CpalTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        let sender = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

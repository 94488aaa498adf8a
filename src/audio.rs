//! Audio capture and frame delivery.
//!
//! Acquires the microphone, downmixes to mono, resamples to 16 kHz, and
//! delivers fixed-size sample blocks to the recording session through a
//! channel subscription.

use crate::error::SessionError;
use anyhow::{Context, Result};
use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Sample rate of every block delivered to the session.
pub const SAMPLE_RATE: u32 = 16000;

/// Number of samples per delivered block.
pub const BLOCK_SIZE: usize = 4096;

/// Input chunk size fed to the resampler.
const RESAMPLER_CHUNK: usize = 1024;

/// One fixed-size block of normalized mono samples at [`SAMPLE_RATE`].
pub type SampleBlock = Vec<f32>;

/// Source of fixed-size audio blocks.
///
/// `open()` acquires the device and returns a subscription delivering
/// [`SampleBlock`]s asynchronously until `close()` releases the device.
/// Re-opening after a close must succeed while hardware is available.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<UnboundedReceiver<SampleBlock>, SessionError>;
    fn close(&mut self);
}

/// Convert multi-channel interleaved samples to mono by averaging all channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resampler for converting audio between sample rates.
pub struct AudioResampler {
    resampler: Fft<f32>,
    chunk_size_in: usize,
}

impl AudioResampler {
    /// Create a resampler converting `input_rate` to `output_rate`,
    /// processing `chunk_size` input samples at a time.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        let resampler = Fft::new(
            input_rate as usize,
            output_rate as usize,
            chunk_size,
            1, // sub_chunks
            1, // channels
            FixedSync::Input,
        )
        .context("Failed to create resampler")?;

        Ok(Self {
            resampler,
            chunk_size_in: chunk_size,
        })
    }

    /// Resample audio data. Only complete input chunks are consumed; pass
    /// input lengths that are a multiple of the chunk size.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let mut output = Vec::new();

        for chunk in input.chunks_exact(self.chunk_size_in) {
            let input_vecs = vec![chunk.to_vec()];
            let input_adapter =
                SequentialSliceOfVecs::new(&input_vecs, 1, chunk.len()).expect("valid input");
            let resampled = self
                .resampler
                .process(&input_adapter, 0, None)
                .context("Resampling failed")?;

            for frame_idx in 0..resampled.frames() {
                output.push(resampled.read_sample(0, frame_idx).unwrap_or(0.0));
            }
        }

        Ok(output)
    }

    /// Get the required input chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_in
    }
}

/// Accumulates mono 16 kHz samples and emits complete fixed-size blocks.
#[derive(Debug, Default)]
pub struct BlockSlicer {
    pending: Vec<f32>,
}

impl BlockSlicer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append samples and return every complete block they yield.
    pub fn push(&mut self, samples: &[f32]) -> Vec<SampleBlock> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= BLOCK_SIZE {
            blocks.push(self.pending.drain(..BLOCK_SIZE).collect());
        }
        blocks
    }

    /// Number of buffered samples not yet forming a complete block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Raw capture from the default input device at its native configuration.
pub struct DeviceCapture {
    stream: cpal::Stream,
    receiver: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
}

impl DeviceCapture {
    /// Start capturing audio from the default input device.
    pub fn start() -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input device available")?;

        let config = device
            .default_input_config()
            .context("Failed to get default input config")?;

        let sample_rate = config.sample_rate();
        let channels = config.channels();

        let (sender, receiver) = mpsc::channel();

        let err_fn = |err| warn!(error = %err, "Audio stream error");

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    let _ = sender.send(data.to_vec());
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _| {
                    let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let _ = sender.send(samples);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config.into(),
                move |data: &[u16], _| {
                    let samples: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    let _ = sender.send(samples);
                },
                err_fn,
                None,
            ),
            format => anyhow::bail!("Unsupported sample format: {:?}", format),
        }
        .context("Failed to build input stream")?;

        stream.play().context("Failed to start audio stream")?;

        Ok(Self {
            stream,
            receiver,
            sample_rate,
            channels,
        })
    }

    /// Native sample rate of the input device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Wait up to `timeout` for captured samples, downmixed to mono.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<f32>> {
        let mut all_samples = self.receiver.recv_timeout(timeout).ok()?;

        // Drain whatever else has already arrived
        while let Ok(samples) = self.receiver.try_recv() {
            all_samples.extend(samples);
        }

        Some(to_mono(&all_samples, self.channels))
    }

    /// Stop the audio stream and release the device.
    pub fn stop(self) {
        use cpal::traits::StreamTrait;
        let _ = self.stream.pause();
        drop(self);
    }
}

struct CaptureWorker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`FrameSource`] backed by the default `cpal` input device.
///
/// The device stream lives on a dedicated capture thread (cpal streams are
/// not `Send`); the thread downmixes, resamples to 16 kHz, and forwards
/// complete blocks to the subscriber. `close()` stops the thread and is
/// guaranteed to release the device even after a partial initialization
/// failure, since the stream never outlives the thread.
pub struct CpalFrameSource {
    worker: Option<CaptureWorker>,
}

impl CpalFrameSource {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for CpalFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for CpalFrameSource {
    fn open(&mut self) -> Result<UnboundedReceiver<SampleBlock>, SessionError> {
        self.close();

        let (block_tx, block_rx) = tokio::sync::mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("ordervoice-capture".to_string())
            .spawn(move || capture_loop(block_tx, ready_tx, thread_shutdown))
            .map_err(|e| SessionError::Permission(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { shutdown, handle });
                Ok(block_rx)
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::Permission(
                    "capture thread exited during initialization".to_string(),
                ))
            }
        }
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown.store(true, Ordering::Relaxed);
            let _ = worker.handle.join();
            debug!("Capture device released");
        }
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture thread body: owns the device stream for its whole lifetime.
fn capture_loop(
    blocks: UnboundedSender<SampleBlock>,
    ready: mpsc::Sender<Result<(), SessionError>>,
    shutdown: Arc<AtomicBool>,
) {
    let capture = match DeviceCapture::start() {
        Ok(capture) => capture,
        Err(err) => {
            let _ = ready.send(Err(SessionError::Permission(format!("{err:#}"))));
            return;
        }
    };

    let native_rate = capture.sample_rate();
    let mut resampler = if native_rate == SAMPLE_RATE {
        None
    } else {
        match AudioResampler::new(native_rate, SAMPLE_RATE, RESAMPLER_CHUNK) {
            Ok(resampler) => Some(resampler),
            Err(err) => {
                let _ = ready.send(Err(SessionError::Permission(format!(
                    "audio pipeline setup failed: {err:#}"
                ))));
                capture.stop();
                return;
            }
        }
    };

    let _ = ready.send(Ok(()));
    info!(
        native_rate = native_rate,
        target_rate = SAMPLE_RATE,
        block_size = BLOCK_SIZE,
        "Capture started"
    );

    let mut raw_pending: Vec<f32> = Vec::new();
    let mut slicer = BlockSlicer::new();

    'capture: while !shutdown.load(Ordering::Relaxed) {
        let Some(mono) = capture.recv_timeout(Duration::from_millis(50)) else {
            continue;
        };

        let resampled = match resampler.as_mut() {
            Some(resampler) => {
                raw_pending.extend(mono);
                let whole = raw_pending.len() - raw_pending.len() % resampler.chunk_size();
                let chunk: Vec<f32> = raw_pending.drain(..whole).collect();
                match resampler.process(&chunk) {
                    Ok(resampled) => resampled,
                    Err(err) => {
                        warn!(error = %err, "Resampling error, dropping chunk");
                        continue;
                    }
                }
            }
            None => mono,
        };

        for block in slicer.push(&resampled) {
            if blocks.send(block).is_err() {
                // Subscriber went away; stop capturing.
                break 'capture;
            }
        }
    }

    capture.stop();
    debug!("Capture stopped");
}

#[cfg(test)]
#[path = "audio_test.rs"]
mod tests;

//! CPAL-backed output endpoint.
//!
//! The public handle talks to a worker thread over a control channel; the
//! worker owns the CPAL stream so no non-`Send` objects cross thread
//! boundaries. The realtime callback only touches the installed render
//! function and an atomic frame counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, warn};

use crate::{AudioBackend, BackendError, DiagnosticEvent, DiagnosticsCb, DeviceInfo, RenderFn};

pub struct CpalAudioBackend {
    info: DeviceInfo,
    frames: Arc<AtomicU64>,
    ctrl_tx: Sender<CtrlMsg>,
}

enum CtrlMsg {
    Start(RenderFn),
    Stop,
    SetDiagnostics(Option<DiagnosticsCb>),
    Shutdown,
}

impl CpalAudioBackend {
    pub fn new() -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(BackendError::DeviceNotFound)?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| BackendError::Other(e.to_string()))?
            .collect::<Vec<_>>();
        if supported.is_empty() {
            return Err(BackendError::UnsupportedFormat(
                "no supported output configs".into(),
            ));
        }

        // Prefer interleaved f32 stereo at the device's default rate.
        let chosen = supported
            .iter()
            .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() == 2)
            .or_else(|| {
                supported
                    .iter()
                    .find(|c| c.sample_format() == SampleFormat::F32)
            })
            .cloned()
            .ok_or_else(|| BackendError::UnsupportedFormat("no f32 output config".into()))?;

        let config = chosen.with_max_sample_rate().config();
        let block_frames = match config.buffer_size {
            cpal::BufferSize::Fixed(n) => n as usize,
            cpal::BufferSize::Default => 0,
        };

        let info = DeviceInfo {
            sample_rate: config.sample_rate.0,
            block_frames,
            channels: config.channels,
            device_name: device.name().ok(),
        };

        let frames = Arc::new(AtomicU64::new(0));
        let (ctrl_tx, ctrl_rx) = unbounded::<CtrlMsg>();

        let worker_frames = frames.clone();
        thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || worker_loop(device, config, ctrl_rx, worker_frames))
            .map_err(|e| BackendError::Other(e.to_string()))?;

        Ok(Self {
            info,
            frames,
            ctrl_tx,
        })
    }
}

impl Drop for CpalAudioBackend {
    fn drop(&mut self) {
        let _ = self.ctrl_tx.send(CtrlMsg::Shutdown);
    }
}

impl AudioBackend for CpalAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        self.ctrl_tx
            .send(CtrlMsg::Start(render))
            .map_err(|_| BackendError::PlaybackError("device worker is gone".into()))
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.ctrl_tx
            .send(CtrlMsg::Stop)
            .map_err(|_| BackendError::PlaybackError("device worker is gone".into()))
    }

    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    fn block_frames(&self) -> usize {
        self.info.block_frames
    }

    fn channels(&self) -> u16 {
        self.info.channels
    }

    fn frames_since_start(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        let _ = self.ctrl_tx.send(CtrlMsg::SetDiagnostics(cb));
    }

    fn device_name(&self) -> Option<String> {
        self.info.device_name.clone()
    }
}

fn worker_loop(
    device: Device,
    config: StreamConfig,
    ctrl_rx: Receiver<CtrlMsg>,
    frames: Arc<AtomicU64>,
) {
    let channels = config.channels as usize;
    let mut diagnostics: Option<DiagnosticsCb> = None;
    let mut stream: Option<cpal::Stream> = None;
    // Held by the realtime callback; swapped under the mutex on start/stop.
    let render_slot: Arc<Mutex<Option<RenderFn>>> = Arc::new(Mutex::new(None));

    loop {
        let msg = match ctrl_rx.recv() {
            Ok(msg) => msg,
            Err(_) => break,
        };

        match msg {
            CtrlMsg::Start(render) => {
                *render_slot.lock().unwrap() = Some(render);
                if stream.is_none() {
                    let cb_slot = render_slot.clone();
                    let cb_frames = frames.clone();
                    let err_diag = diagnostics.clone();
                    let built = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _| {
                            let frame_count = data.len() / channels;
                            let mut slot = match cb_slot.try_lock() {
                                Ok(slot) => slot,
                                // Start/stop in progress; emit silence.
                                Err(_) => {
                                    data.fill(0.0);
                                    return;
                                }
                            };
                            match slot.as_mut() {
                                Some(render) => {
                                    render(data, frame_count, channels);
                                    cb_frames.fetch_add(frame_count as u64, Ordering::Relaxed);
                                }
                                None => data.fill(0.0),
                            }
                        },
                        move |e| {
                            error!(target: "audio::backend", "stream error: {e}");
                            if let Some(cb) = &err_diag {
                                cb(DiagnosticEvent::Other(e.to_string()));
                            }
                        },
                        None,
                    );
                    match built {
                        Ok(s) => {
                            if let Err(e) = s.play() {
                                error!(target: "audio::backend", "failed to start stream: {e}");
                            } else {
                                stream = Some(s);
                            }
                        }
                        Err(e) => {
                            error!(target: "audio::backend", "failed to build stream: {e}");
                        }
                    }
                }
            }
            CtrlMsg::Stop => {
                *render_slot.lock().unwrap() = None;
                if let Some(s) = stream.take() {
                    if let Err(e) = s.pause() {
                        warn!(target: "audio::backend", "failed to pause stream: {e}");
                    }
                }
            }
            CtrlMsg::SetDiagnostics(cb) => diagnostics = cb,
            CtrlMsg::Shutdown => break,
        }
    }
}

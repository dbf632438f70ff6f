//! Audio capture via cpal.
//!
//! The device callback delivers samples in whatever sizes the host favours;
//! this module re-blocks them to the configured analysis block size and
//! hands complete blocks to the orchestrator. The callback performs no
//! blocking I/O and, past a brief warm-up, no allocation.

use bellrig_core::{AudioConfig, BellRigError, Orchestrator, Result, ShutdownFlag};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Reassembles arbitrarily sized sample chunks into exact analysis blocks.
///
/// Carry-over samples and the scratch block are reused between calls, so the
/// capture callback stays allocation-free once the pending buffer reaches
/// its steady-state capacity.
struct BlockAssembler {
    pending: Vec<i16>,
    block: Vec<i16>,
}

impl BlockAssembler {
    fn new(block_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(block_size * 2),
            block: vec![0; block_size],
        }
    }

    /// Appends `data` and invokes `handle` once per completed block.
    fn push(&mut self, data: &[i16], mut handle: impl FnMut(&[i16])) {
        self.pending.extend_from_slice(data);
        let block_size = self.block.len();
        while self.pending.len() >= block_size {
            self.block.copy_from_slice(&self.pending[..block_size]);
            self.pending.copy_within(block_size.., 0);
            self.pending.truncate(self.pending.len() - block_size);
            handle(&self.block);
        }
    }
}

/// Opens the input device and starts streaming blocks into the
/// orchestrator. The returned stream must be kept alive; dropping it stops
/// capture.
pub fn start(
    config: &AudioConfig,
    mut orchestrator: Orchestrator,
    shutdown: ShutdownFlag,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match &config.input_device {
        Some(name) => host
            .input_devices()
            .map_err(|err| BellRigError::config(format!("cannot enumerate input devices: {err}")))?
            .find(|device| device.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| BellRigError::config(format!("audio input device {name:?} not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| BellRigError::config("no default audio input device"))?,
    };
    if let Ok(name) = device.name() {
        tracing::info!(device = %name, "capturing audio");
    }

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut assembler = BlockAssembler::new(config.block_size);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if shutdown.is_requested() {
                    return;
                }
                assembler.push(data, |block| {
                    if let Err(err) = orchestrator.process_block(block) {
                        tracing::warn!(%err, "analysis step failed");
                    }
                });
            },
            |err| tracing::warn!(%err, "audio stream error"),
            None,
        )
        .map_err(|err| BellRigError::config(format!("cannot build input stream: {err}")))?;

    stream
        .play()
        .map_err(|err| BellRigError::config(format!("cannot start capture: {err}")))?;
    Ok(stream)
}

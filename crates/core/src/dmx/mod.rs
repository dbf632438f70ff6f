use std::{fmt, io::Write, time::Duration};

use crate::{BellRigError, Result};

/// Number of addressable channels in one DMX universe.
pub const UNIVERSE_SIZE: usize = 512;

/// Start-of-message byte for the serial adapter protocol.
pub const DMX_OPEN: u8 = 0x7E;
/// End-of-message byte.
pub const DMX_CLOSE: u8 = 0xE7;
/// Command header for a full-universe intensity payload.
const DMX_INTENSITY: [u8; 3] = [0x06, 0x01, 0x02];
/// Vendor init sequences sent once before the first frame.
const DMX_INIT1: [u8; 5] = [0x03, 0x02, 0x00, 0x00, 0x00];
const DMX_INIT2: [u8; 5] = [0x0A, 0x02, 0x00, 0x00, 0x00];

/// Offset of the spacer byte inside a pre-framed intensity message.
const FRAME_DATA: usize = 1 + DMX_INTENSITY.len();
/// Full length of one intensity frame on the wire.
const FRAME_LEN: usize = FRAME_DATA + 1 + UNIVERSE_SIZE + 1;

/// One complete frame of channel intensities, produced by the animation
/// engine and consumed by the transmitter as an immutable snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct LightUniverse([u8; UNIVERSE_SIZE]);

impl LightUniverse {
    /// A dark universe: every channel at zero.
    pub fn new() -> Self {
        Self([0; UNIVERSE_SIZE])
    }

    pub fn from_channels(channels: [u8; UNIVERSE_SIZE]) -> Self {
        Self(channels)
    }

    pub fn channels(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.0
    }

    /// Sets one channel intensity. Out-of-range channels are ignored.
    pub fn set(&mut self, channel: usize, intensity: u8) {
        if let Some(slot) = self.0.get_mut(channel) {
            *slot = intensity;
        }
    }
}

impl Default for LightUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LightUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lit = self.0.iter().filter(|&&value| value > 0).count();
        f.debug_struct("LightUniverse").field("lit", &lit).finish()
    }
}

/// Owns the serial link and encodes frames into the adapter's wire format.
///
/// The transmitter is generic over the byte sink so tests can capture the
/// exact wire bytes; production code opens a [`serialport`] handle via
/// [`DmxTransmitter::open`]. Construction sends the two vendor init
/// sequences that put the adapter into its operating mode.
pub struct DmxTransmitter<W: Write> {
    link: W,
    // Complete intensity message kept pre-framed so the transmit loop never
    // allocates: framing and header are written once, only the channel
    // bytes change between frames.
    frame: [u8; FRAME_LEN],
}

impl<W: Write> DmxTransmitter<W> {
    pub fn new(link: W) -> Result<Self> {
        let mut frame = [0; FRAME_LEN];
        frame[0] = DMX_OPEN;
        frame[1..FRAME_DATA].copy_from_slice(&DMX_INTENSITY);
        frame[FRAME_LEN - 1] = DMX_CLOSE;
        let mut transmitter = Self { link, frame };
        transmitter.send_command(&DMX_INIT1)?;
        transmitter.send_command(&DMX_INIT2)?;
        Ok(transmitter)
    }

    /// Sets one channel in the local buffer. Out-of-range values are
    /// silently clamped to [0, 512] / [0, 255]; callers get no error signal
    /// for bad input.
    pub fn set_channel(&mut self, channel: usize, intensity: i32) {
        let channel = channel.min(UNIVERSE_SIZE);
        self.frame[FRAME_DATA + channel] = intensity.clamp(0, 255) as u8;
    }

    /// Zeroes all 512 channels in the local buffer without sending; the
    /// caller still has to render for the rig to go dark.
    pub fn blackout(&mut self) {
        for slot in &mut self.frame[FRAME_DATA + 1..FRAME_LEN - 1] {
            *slot = 0;
        }
    }

    /// Encodes the given frame and synchronously writes it over the link.
    pub fn render(&mut self, universe: &LightUniverse) -> Result<()> {
        self.frame[FRAME_DATA + 1..FRAME_LEN - 1].copy_from_slice(universe.channels());
        self.render_buffer()
    }

    /// Writes whatever the local buffer currently holds.
    pub fn render_buffer(&mut self) -> Result<()> {
        self.link.write_all(&self.frame)?;
        self.link.flush()?;
        Ok(())
    }

    fn send_command(&mut self, payload: &[u8]) -> Result<()> {
        let mut message = Vec::with_capacity(payload.len() + 2);
        message.push(DMX_OPEN);
        message.extend_from_slice(payload);
        message.push(DMX_CLOSE);
        self.link.write_all(&message)?;
        self.link.flush()?;
        Ok(())
    }

    /// Consumes the transmitter and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.link
    }
}

impl DmxTransmitter<Box<dyn serialport::SerialPort>> {
    /// Opens the serial device and initialises the adapter.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let link = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;
        Self::new(link)
    }
}

impl<W: Write> fmt::Debug for DmxTransmitter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmxTransmitter").finish()
    }
}

/// Lists the serial devices visible to the process.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// Picks the serial device to drive. Zero devices is fatal; more than one
/// logs a warning and takes the first.
pub fn detect_port() -> Result<String> {
    let ports = list_ports()?;
    match ports.as_slice() {
        [] => Err(BellRigError::config("no serial devices found")),
        [only] => Ok(only.clone()),
        [first, ..] => {
            tracing::warn!(port = %first, "multiple serial devices found, using the first one");
            Ok(first.clone())
        }
    }
}

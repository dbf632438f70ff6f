/// Result alias that carries the custom [`BellRigError`] type.
pub type Result<T> = std::result::Result<T, BellRigError>;

/// Common error type for the core crate.
///
/// Configuration problems are fatal and surface before the analysis and
/// transmit loops start. Serial and IO failures are transient: the loops log
/// them and carry on with the next tick instead of propagating them upward.
#[derive(Debug, thiserror::Error)]
pub enum BellRigError {
    /// Invalid or incomplete configuration (missing serial device, empty
    /// scene catalogue, nonsensical rates).
    #[error("configuration error: {0}")]
    Config(String),
    /// Failure on the DMX serial link.
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Failure while computing a magnitude spectrum.
    #[error("fft error: {0}")]
    Fft(#[from] realfft::FftError),
    /// A caller handed a component data that violates its contract.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

impl BellRigError {
    /// Creates a configuration error from any displayable message.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

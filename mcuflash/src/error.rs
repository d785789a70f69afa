//! Error types for mcuflash.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Result type for mcuflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mcuflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port could not be opened (wrong name, busy, permission denied).
    #[cfg(feature = "native")]
    #[error("Failed to open serial port {port}")]
    PortOpen {
        /// Port name that was requested.
        port: String,
        /// Underlying driver error.
        #[source]
        source: serialport::Error,
    },

    /// A chunk write failed part way through a transfer.
    #[error("Transfer aborted after {sent} bytes")]
    Transfer {
        /// Bytes accepted by the port before the failure.
        sent: u64,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Malformed hexadecimal byte pattern.
    #[error("Invalid hex pattern: {0}")]
    InvalidHex(String),

    /// Patching a firmware image failed.
    #[error("Patch failed for {}", path.display())]
    Patch {
        /// Source image that was being patched.
        path: PathBuf,
        /// Cause of the failure.
        #[source]
        source: Box<Error>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error was raised before any I/O took place.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::InvalidHex(_) => true,
            Self::Patch { source, .. } => source.is_config(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::error::Error as _};

    /// Render an error and its causes the way `{:#}` on an error chain does.
    fn render_chain(err: &Error) -> String {
        let mut text = err.to_string();
        let mut cause = err.source();
        while let Some(inner) = cause {
            text.push_str(": ");
            text.push_str(&inner.to_string());
            cause = inner.source();
        }
        text
    }

    #[test]
    fn test_patch_chain_names_each_cause_once() {
        let err = Error::Patch {
            path: PathBuf::from("fw.bin"),
            source: Box::new(Error::InvalidHex("odd number of digits".into())),
        };
        let text = render_chain(&err);
        assert_eq!(text, "Patch failed for fw.bin: Invalid hex pattern: odd number of digits");
        assert!(err.is_config());
    }

    #[test]
    fn test_transfer_chain_names_io_cause_once() {
        let err = Error::Transfer {
            sent: 8,
            source: io::Error::other("cable pulled"),
        };
        let text = render_chain(&err);
        assert_eq!(text.matches("cable pulled").count(), 1);
        assert!(text.starts_with("Transfer aborted after 8 bytes"));
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_port_open_chain_names_driver_cause_once() {
        let err = Error::PortOpen {
            port: "/dev/ttyX".into(),
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device"),
        };
        let text = render_chain(&err);
        assert_eq!(text, "Failed to open serial port /dev/ttyX: no such device");
    }
}

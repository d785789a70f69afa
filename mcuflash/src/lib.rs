//! # mcuflash
//!
//! A library for loading firmware images into microcontrollers over a plain
//! UART link.
//!
//! The crate is split along the three things a UART loader does:
//!
//! - [`patch`]: optional byte-pattern find/replace on the image before it is
//!   sent (e.g. to stamp a serial number or flip a build flag)
//! - [`transfer`]: the send path, writing the image in fixed-size chunks
//! - [`monitor`]: the response path, reading newline-terminated text the
//!   device prints back
//!
//! [`session`] ties the two paths to a single open port so responses are
//! received while the image is still being written.
//!
//! ## Features
//!
//! - `native` (default): Serial port support via the `serialport` crate
//! - `serde`: Serialization support for events and reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcuflash::{ListenConfig, PatchSpec, TransferJob, patch_file};
//! use std::{path::Path, time::Duration};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Replace a placeholder ID in the image
//!     let spec = PatchSpec::from_hex("DEADBEEF", "00C0FFEE")?;
//!     let patched = patch_file(Path::new("app.bin"), &spec, Path::new("out"))?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let job = TransferJob::new("/dev/ttyUSB0", 115200, &patched.path);
//!         let mut session = mcuflash::FlashSession::open(job)?;
//!
//!         let listener = session.spawn_listener(ListenConfig::default(), |event| {
//!             println!("{event:?}");
//!         })?;
//!         session.send(|p| println!("{}/{}", p.sent, p.total))?;
//!
//!         std::thread::sleep(Duration::from_secs(2));
//!         listener.stop(Duration::from_secs(1));
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod monitor;
pub mod patch;
pub mod port;
pub mod session;
pub mod transfer;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use {
    port::NativePort,
    session::{FlashSession, open_monitor},
    transfer::send,
};
pub use {
    device::{DetectedPort, DeviceKind, detect_ports, pick_port},
    error::{Error, Result},
    monitor::{CancelToken, ListenConfig, ListenExit, ResponseEvent, ResponseListener, decode_line},
    patch::{PatchOutcome, PatchSpec, decode_hex, patch_file, patched_path, replace_all},
    port::{Port, SerialConfig},
    session::{ListenerHandle, SessionEvent},
    transfer::{
        SendConfig, Sender, TransferJob, TransferProgress, TransferSummary, chunk_count,
    },
};

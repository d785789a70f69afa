//! Flash session: one serial link shared by the send and response paths.
//!
//! The port is opened once. A cloned handle of it is moved to a background
//! thread running [`ResponseListener`], while the caller's thread pushes the
//! image through [`Sender`]. Chunks are written strictly in order; responses
//! arrive whenever the device produces them.

use {
    crate::{
        error::Result,
        monitor::{CancelToken, ListenConfig, ListenExit, ResponseEvent, ResponseListener},
        patch::PatchOutcome,
        transfer::{TransferProgress, TransferSummary},
    },
    log::{debug, warn},
    std::{
        io::Read,
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

#[cfg(feature = "native")]
use {
    crate::{
        error::Error,
        port::{NativePort, Port, SerialConfig},
        transfer::{Sender, TransferJob},
    },
};

/// Shortest read timeout given to the listener's port handle.
#[cfg(feature = "native")]
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Everything a session reports to its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(tag = "event", content = "data", rename_all = "snake_case")
)]
pub enum SessionEvent {
    /// The image was patched before sending.
    Patched(PatchOutcome),
    /// One chunk was written.
    Sent(TransferProgress),
    /// The whole image was written.
    Finished(TransferSummary),
    /// The device said something.
    Response(ResponseEvent),
}

/// A response listener running on its own thread.
///
/// Dropping the handle cancels the listener without waiting for it.
pub struct ListenerHandle {
    cancel: CancelToken,
    handle: Option<JoinHandle<ListenExit>>,
}

impl ListenerHandle {
    /// Start a listener over `reader` on a new thread.
    pub fn spawn<R, F>(reader: R, config: ListenConfig, sink: F) -> Result<Self>
    where
        R: Read + Send + 'static,
        F: FnMut(ResponseEvent) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("response-listener".to_string())
            .spawn(move || ResponseListener::with_config(reader, config).run(&token, sink))?;

        debug!("Response listener started");
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Token that stops this listener when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the listener thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the listener and wait at most `timeout` for it to return.
    ///
    /// Returns `None` if the thread did not finish in time (it is detached)
    /// or panicked.
    pub fn stop(self, timeout: Duration) -> Option<ListenExit> {
        self.cancel.cancel();
        self.wait(timeout)
    }

    /// Wait at most `timeout` for the listener to return on its own.
    ///
    /// The listener is cancelled if it is still running when the wait ends.
    pub fn wait(mut self, timeout: Duration) -> Option<ListenExit> {
        let handle = self.handle.take()?;
        let deadline = Instant::now() + timeout;

        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Response listener did not stop within {timeout:?}, detaching");
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }

        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                warn!("Response listener panicked");
                None
            },
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// An open link to the device for one transfer.
#[cfg(feature = "native")]
pub struct FlashSession {
    job: TransferJob,
    writer: NativePort,
    reader: Option<NativePort>,
}

#[cfg(feature = "native")]
impl FlashSession {
    /// Validate `job` and open its port.
    ///
    /// Nothing is written to the port here.
    pub fn open(job: TransferJob) -> Result<Self> {
        job.validate()?;
        let writer = NativePort::open(&job.serial_config())?;
        let reader = writer.try_clone_port()?;
        debug!("Opened {} at {} baud", writer.name(), writer.baud_rate());

        Ok(Self {
            job,
            writer,
            reader: Some(reader),
        })
    }

    /// The job this session was opened for.
    pub fn job(&self) -> &TransferJob {
        &self.job
    }

    /// Start the response path on its own thread.
    ///
    /// Can be called once per session.
    pub fn spawn_listener<F>(&mut self, config: ListenConfig, sink: F) -> Result<ListenerHandle>
    where
        F: FnMut(ResponseEvent) + Send + 'static,
    {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| Error::Config("response listener already started".into()))?;
        reader.set_timeout(config.poll_interval.max(MIN_READ_TIMEOUT))?;
        debug!("Listening on {} (read timeout {:?})", reader.name(), reader.timeout());
        ListenerHandle::spawn(reader, config, sink)
    }

    /// Send the job's file on the calling thread.
    pub fn send<F>(&mut self, progress: F) -> Result<TransferSummary>
    where
        F: FnMut(TransferProgress),
    {
        debug!(
            "Sending {} to {} at {} baud",
            self.job.source.display(),
            self.writer.name(),
            self.writer.baud_rate()
        );
        let summary = Sender::with_config(&mut self.writer, self.job.send_config())
            .send_file(&self.job.source, progress)?;
        debug!(
            "Transfer complete: {} bytes in {} chunks",
            summary.bytes_sent, summary.chunks
        );
        Ok(summary)
    }

    /// Close the writer handle. A running listener keeps its own handle.
    pub fn close(mut self) -> Result<()> {
        self.writer.close()
    }
}

/// Open `config`'s port and run only the response path on it.
#[cfg(feature = "native")]
pub fn open_monitor<F>(config: &SerialConfig, listen: ListenConfig, sink: F) -> Result<ListenerHandle>
where
    F: FnMut(ResponseEvent) + Send + 'static,
{
    config.validate()?;
    let mut port = NativePort::open(config)?;
    port.set_timeout(listen.poll_interval.max(MIN_READ_TIMEOUT))?;
    debug!(
        "Monitoring {} at {} baud (read timeout {:?})",
        port.name(),
        port.baud_rate(),
        port.timeout()
    );
    ListenerHandle::spawn(port, listen, sink)
}

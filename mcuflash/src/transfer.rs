//! Chunked file-to-serial transmission.
//!
//! The send path has no framing of its own: the image is cut into
//! fixed-size chunks which are written to the port back to back, optionally
//! with a pause in between. Nothing is awaited from the receiver.
//!
//! ```text
//!  file:  | c0 (N) | c1 (N) | c2 (N) | c3 (<= N) |
//!            |        |        |        |
//!  port:  write -> write -> write -> write
//! ```

use {
    crate::error::{Error, Result},
    log::debug,
    std::{
        fs::File,
        io::{self, BufReader, Read, Write},
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Bytes per write when the caller does not choose.
pub const DEFAULT_CHUNK_SIZE: usize = 4;

/// Send path configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendConfig {
    /// Bytes per write call. The last chunk may be shorter.
    pub chunk_size: usize,
    /// Pause between two consecutive chunks.
    pub chunk_delay: Option<Duration>,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
        }
    }
}

impl SendConfig {
    /// Check the configuration before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be at least 1 byte".into()));
        }
        Ok(())
    }
}

/// Progress observation emitted after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferProgress {
    /// Zero-based index of the chunk just written.
    pub chunk_index: usize,
    /// Length of that chunk.
    pub chunk_len: usize,
    /// Bytes written so far, including this chunk.
    pub sent: u64,
    /// Size of the whole image.
    pub total: u64,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferSummary {
    /// Bytes written to the port.
    pub bytes_sent: u64,
    /// Number of write calls.
    pub chunks: usize,
}

/// Number of chunks needed for `len` bytes.
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size as u64)
}

/// Everything needed to push one image to one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    /// Port name/path.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Image to send.
    pub source: PathBuf,
    /// Bytes per write call.
    pub chunk_size: usize,
    /// Optional pause between chunks.
    pub chunk_delay: Option<Duration>,
}

impl TransferJob {
    /// Create a job with the default chunk size and no delay.
    pub fn new(port: impl Into<String>, baud_rate: u32, source: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            source: source.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
        }
    }

    /// Set the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the pause between chunks.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Option<Duration>) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Send path settings of this job.
    pub fn send_config(&self) -> SendConfig {
        SendConfig {
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay,
        }
    }

    /// Serial settings of this job.
    pub fn serial_config(&self) -> crate::port::SerialConfig {
        crate::port::SerialConfig::new(&self.port, self.baud_rate)
    }

    /// Reject invalid input before touching the port or the file.
    pub fn validate(&self) -> Result<()> {
        self.serial_config().validate()?;
        if !self.source.is_file() {
            return Err(Error::Config(format!(
                "firmware file not found: {}",
                self.source.display()
            )));
        }
        self.send_config().validate()
    }
}

/// Chunked writer over any byte sink.
pub struct Sender<'a, W: Write> {
    port: &'a mut W,
    config: SendConfig,
}

impl<'a, W: Write> Sender<'a, W> {
    /// Create a sender with the default configuration.
    pub fn new(port: &'a mut W) -> Self {
        Self {
            port,
            config: SendConfig::default(),
        }
    }

    /// Create a sender with custom configuration.
    pub fn with_config(port: &'a mut W, config: SendConfig) -> Self {
        Self { port, config }
    }

    /// Fill `buf` from `reader`, stopping early only at end of input.
    fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Stream everything `reader` yields to the port.
    ///
    /// # Arguments
    ///
    /// * `reader` - Source of the image bytes
    /// * `total` - Expected image size, only used for progress reporting
    /// * `progress` - Called once per written chunk
    pub fn send<R, F>(&mut self, reader: &mut R, total: u64, mut progress: F) -> Result<TransferSummary>
    where
        R: Read,
        F: FnMut(TransferProgress),
    {
        self.config.validate()?;

        let chunk_size = self.config.chunk_size;
        let mut buf = vec![0u8; chunk_size];
        let mut sent: u64 = 0;
        let mut chunks = 0usize;

        debug!(
            "Sending {total} bytes in {} chunks of {chunk_size}",
            chunk_count(total, chunk_size)
        );

        loop {
            let n = Self::read_chunk(reader, &mut buf)?;
            if n == 0 {
                break;
            }

            if chunks > 0 {
                if let Some(delay) = self.config.chunk_delay {
                    std::thread::sleep(delay);
                }
            }

            self.port
                .write_all(&buf[..n])
                .and_then(|()| self.port.flush())
                .map_err(|source| Error::Transfer { sent, source })?;

            sent += n as u64;
            debug!("Sent {n} bytes to microcontroller ({sent}/{total})");
            progress(TransferProgress {
                chunk_index: chunks,
                chunk_len: n,
                sent,
                total,
            });
            chunks += 1;

            if n < chunk_size {
                break;
            }
        }

        Ok(TransferSummary {
            bytes_sent: sent,
            chunks,
        })
    }

    /// Stream a whole file to the port.
    pub fn send_file<F>(&mut self, path: &Path, progress: F) -> Result<TransferSummary>
    where
        F: FnMut(TransferProgress),
    {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        self.send(&mut reader, total, progress)
    }
}

/// Open the job's port, send its file, and close the port again.
///
/// Nothing is written when the port cannot be opened.
#[cfg(feature = "native")]
pub fn send<F>(job: &TransferJob, progress: F) -> Result<TransferSummary>
where
    F: FnMut(TransferProgress),
{
    use crate::port::{NativePort, Port as _};

    job.validate()?;

    let mut port = NativePort::open(&job.serial_config())?;
    debug!(
        "Sending {} to {} at {} baud",
        job.source.display(),
        port.name(),
        port.baud_rate()
    );

    let result = Sender::with_config(&mut port, job.send_config()).send_file(&job.source, progress);
    port.close()?;

    let summary = result?;
    debug!("Transfer complete: {} bytes in {} chunks", summary.bytes_sent, summary.chunks);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every write call separately.
    #[derive(Default)]
    struct RecordingPort {
        writes: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl Write for RecordingPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    /// Accepts a fixed number of writes, then reports a disconnect.
    struct FailingPort {
        remaining: usize,
    }

    impl Write for FailingPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            self.remaining -= 1;
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out at most one byte per read call.
    struct TrickleReader<'a> {
        data: &'a [u8],
    }

    impl Read for TrickleReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[0];
            self.data = &self.data[1..];
            Ok(1)
        }
    }

    fn send_bytes(data: &[u8], config: SendConfig) -> (RecordingPort, TransferSummary) {
        let mut port = RecordingPort::default();
        let summary = Sender::with_config(&mut port, config)
            .send(&mut io::Cursor::new(data), data.len() as u64, |_| {})
            .unwrap();
        (port, summary)
    }

    fn chunked(chunk_size: usize) -> SendConfig {
        SendConfig {
            chunk_size,
            chunk_delay: None,
        }
    }

    #[test]
    fn test_chunks_reconstruct_file_in_order() {
        let data: Vec<u8> = (0..103u8).collect();
        for chunk_size in [1, 2, 4, 7, 16, 103, 500] {
            let (port, summary) = send_bytes(&data, chunked(chunk_size));
            let joined: Vec<u8> = port.writes.concat();
            assert_eq!(joined, data, "chunk size {chunk_size}");
            assert_eq!(port.writes.len() as u64, chunk_count(data.len() as u64, chunk_size));
            assert_eq!(summary.chunks, port.writes.len());
            assert_eq!(summary.bytes_sent, data.len() as u64);
            assert!(port.writes[..port.writes.len() - 1]
                .iter()
                .all(|w| w.len() == chunk_size));
        }
    }

    #[test]
    fn test_single_byte_chunks() {
        let (port, _) = send_bytes(b"HELLO", chunked(1));
        assert_eq!(
            port.writes,
            vec![b"H".to_vec(), b"E".to_vec(), b"L".to_vec(), b"L".to_vec(), b"O".to_vec()]
        );
    }

    #[test]
    fn test_chunk_larger_than_file_is_one_write() {
        let (port, summary) = send_bytes(b"HELLO", chunked(64));
        assert_eq!(port.writes, vec![b"HELLO".to_vec()]);
        assert_eq!(summary.chunks, 1);
    }

    #[test]
    fn test_default_chunk_size_is_four() {
        let (port, _) = send_bytes(b"0123456789", SendConfig::default());
        assert_eq!(port.writes.len(), 3);
        assert_eq!(port.writes[2], b"89");
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let (port, summary) = send_bytes(b"", chunked(4));
        assert!(port.writes.is_empty());
        assert_eq!(summary, TransferSummary { bytes_sent: 0, chunks: 0 });
    }

    #[test]
    fn test_every_chunk_is_flushed() {
        let (port, _) = send_bytes(b"abcdefgh", chunked(2));
        assert_eq!(port.flushes, 4);
    }

    #[test]
    fn test_short_reads_still_produce_full_chunks() {
        let data = b"abcdefghij";
        let mut port = RecordingPort::default();
        let mut reader = TrickleReader { data };
        Sender::with_config(&mut port, chunked(4))
            .send(&mut reader, data.len() as u64, |_| {})
            .unwrap();
        assert_eq!(
            port.writes,
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
        );
    }

    #[test]
    fn test_progress_reported_per_chunk() {
        let data = [0xAAu8; 10];
        let mut port = RecordingPort::default();
        let mut seen = Vec::new();
        Sender::with_config(&mut port, chunked(4))
            .send(&mut io::Cursor::new(&data[..]), 10, |p| seen.push(p))
            .unwrap();

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], TransferProgress { chunk_index: 0, chunk_len: 4, sent: 4, total: 10 });
        assert_eq!(seen[2], TransferProgress { chunk_index: 2, chunk_len: 2, sent: 10, total: 10 });
    }

    #[test]
    fn test_chunk_delay_between_chunks_only() {
        let delay = Duration::from_millis(20);
        let config = SendConfig {
            chunk_size: 2,
            chunk_delay: Some(delay),
        };
        let start = std::time::Instant::now();
        let (port, _) = send_bytes(b"abcdef", config);
        assert_eq!(port.writes.len(), 3);
        assert!(start.elapsed() >= delay * 2);
    }

    #[test]
    fn test_zero_chunk_size_rejected_before_writing() {
        let mut port = RecordingPort::default();
        let err = Sender::with_config(&mut port, chunked(0))
            .send(&mut io::Cursor::new(b"abc"), 3, |_| {})
            .unwrap_err();
        assert!(err.is_config());
        assert!(port.writes.is_empty());
    }

    #[test]
    fn test_write_failure_reports_bytes_sent() {
        let mut port = FailingPort { remaining: 2 };
        let err = Sender::with_config(&mut port, chunked(3))
            .send(&mut io::Cursor::new(b"abcdefghi"), 9, |_| {})
            .unwrap_err();
        match err {
            Error::Transfer { sent, source } => {
                assert_eq!(sent, 6);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            },
            other => panic!("expected Transfer error, got {other:?}"),
        }
    }

    #[test]
    fn test_send_file_streams_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.hex");
        std::fs::write(&path, b":00000001FF\n").unwrap();

        let mut port = RecordingPort::default();
        let summary = Sender::new(&mut port).send_file(&path, |_| {}).unwrap();
        assert_eq!(summary.bytes_sent, 12);
        assert_eq!(port.writes.concat(), b":00000001FF\n");
    }

    #[test]
    fn test_send_file_missing_is_io_error() {
        let mut port = RecordingPort::default();
        let err = Sender::new(&mut port)
            .send_file(Path::new("/nonexistent/app.bin"), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(port.writes.is_empty());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 4), 0);
        assert_eq!(chunk_count(4, 4), 1);
        assert_eq!(chunk_count(5, 4), 2);
        assert_eq!(chunk_count(5, 1), 5);
        assert_eq!(chunk_count(5, 0), 0);
    }

    #[test]
    fn test_job_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, b"x").unwrap();

        assert!(TransferJob::new("/dev/ttyUSB0", 115200, &path).validate().is_ok());
        assert!(TransferJob::new("", 115200, &path).validate().unwrap_err().is_config());
        assert!(TransferJob::new("COM3", 0, &path).validate().unwrap_err().is_config());
        assert!(TransferJob::new("COM3", 9600, &path)
            .with_chunk_size(0)
            .validate()
            .unwrap_err()
            .is_config());
        assert!(TransferJob::new("COM3", 9600, dir.path().join("missing.bin"))
            .validate()
            .unwrap_err()
            .is_config());
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_send_to_unavailable_port_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, b"payload").unwrap();

        let job = TransferJob::new("/nonexistent/mcuflash-port", 115200, &path);
        let mut chunks = 0;
        let err = send(&job, |_| chunks += 1).unwrap_err();
        assert!(matches!(err, Error::PortOpen { .. }));
        assert_eq!(chunks, 0);
    }
}

// src/exec/capture.rs

//! Output capture sinks.
//!
//! A sink collects the merged stdout/stderr of one process. The task keeps
//! the read cursor; sinks only answer "what bytes exist from offset N".
//!
//! - [`MemoryCapture`]: append-only buffer filled by one tokio reader task
//!   per pipe.
//! - [`FileCapture`]: a named temp file that stdout and stderr share, read
//!   back through an independent handle.
//! - [`NullCapture`]: used when a temp file cannot be created; always empty.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Storage for one process's captured output.
pub trait OutputSink {
    /// Bytes captured from `offset` to the current end.
    fn read_from(&mut self, offset: u64) -> io::Result<Vec<u8>>;

    /// Whether everything the process wrote has reached the sink.
    ///
    /// Checked after a natural exit; must not block.
    fn is_drained(&self) -> bool {
        true
    }

    /// Release the sink's resources (delete files, stop readers).
    fn release(self: Box<Self>) -> io::Result<()>;
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// In-memory capture fed by background pipe readers.
#[derive(Debug, Default)]
pub struct MemoryCapture {
    buffer: SharedBuffer,
    readers: Vec<JoinHandle<()>>,
}

impl MemoryCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a reader task on `runtime` that appends everything from `pipe`
    /// to the shared buffer until EOF.
    pub fn attach<R>(&mut self, runtime: &Handle, name: &'static str, mut pipe: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::clone(&self.buffer);
        let reader = runtime.spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => buffer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(pipe = name, error = %e, "output reader stopped");
                        break;
                    }
                }
            }
        });
        self.readers.push(reader);
    }

    /// Append bytes directly, bypassing the readers.
    pub fn push(&self, bytes: &[u8]) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }
}

impl OutputSink for MemoryCapture {
    fn read_from(&mut self, offset: u64) -> io::Result<Vec<u8>> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buffer.len());
        Ok(buffer[start..].to_vec())
    }

    fn is_drained(&self) -> bool {
        // A pipe only reaches EOF once every writer is gone, so a background
        // grandchild can keep a reader busy long after the child exited.
        self.readers.iter().all(JoinHandle::is_finished)
    }

    fn release(self: Box<Self>) -> io::Result<()> {
        for reader in self.readers {
            if !reader.is_finished() {
                debug!("stopping output reader whose pipe is still open");
                reader.abort();
            }
        }
        Ok(())
    }
}

/// Temp-file capture shared by stdout and stderr.
#[derive(Debug)]
pub struct FileCapture {
    file: NamedTempFile,
    reader: File,
}

impl FileCapture {
    /// Create the temp file and the two write handles for the child.
    pub fn create() -> io::Result<(Self, Stdio, Stdio)> {
        let file = tempfile::Builder::new()
            .prefix("runwatch_output_")
            .suffix(".txt")
            .tempfile()?;
        debug!(path = %file.path().display(), "created output capture file");

        // Both handles share one file description, so writes from stdout and
        // stderr interleave at a single offset.
        let stdout = file.as_file().try_clone()?;
        let stderr = file.as_file().try_clone()?;
        let reader = file.reopen()?;

        Ok((Self { file, reader }, Stdio::from(stdout), Stdio::from(stderr)))
    }
}

impl OutputSink for FileCapture {
    fn read_from(&mut self, offset: u64) -> io::Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn release(self: Box<Self>) -> io::Result<()> {
        let FileCapture { file, reader } = *self;
        drop(reader);
        let path = file.path().to_path_buf();
        file.close()?;
        debug!(path = %path.display(), "removed output capture file");
        Ok(())
    }
}

/// Capture that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCapture;

impl OutputSink for NullCapture {
    fn read_from(&mut self, _offset: u64) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn release(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

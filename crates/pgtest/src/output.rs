//! Captured stdout/stderr of PostgreSQL child processes.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::SERVER_TARGET;

/// Bytes retained per stream; older output is discarded first.
pub(crate) const CAPTURE_LIMIT: usize = 64 * 1024;

/// Output collected from a child process, kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Wraps raw stream contents.
    #[must_use]
    pub const fn new(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self { stdout, stderr }
    }

    /// Captured standard output, lossily decoded.
    #[must_use]
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured standard error, lossily decoded.
    #[must_use]
    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Whether neither stream produced any output.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

impl fmt::Display for ProcessOutput {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "OUT: {}\nERR: {}",
            self.stdout().trim_end(),
            self.stderr().trim_end()
        )
    }
}

/// Drains one child stream on a helper thread.
///
/// The server writes its log to these pipes for its whole lifetime, so they
/// must be read continuously or the server blocks once the pipe buffer fills.
#[derive(Debug)]
pub(crate) struct StreamCapture {
    handle: JoinHandle<Vec<u8>>,
}

impl StreamCapture {
    pub(crate) fn spawn<R>(stream: &'static str, reader: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("pgtest-{stream}"))
            .spawn(move || drain(stream, reader))?;
        Ok(Self { handle })
    }

    /// Waits for the stream to reach end-of-file and returns its tail.
    ///
    /// End-of-file only arrives once every process holding the pipe has
    /// exited, so call this after the child has been reaped.
    pub(crate) fn finish(self) -> io::Result<Vec<u8>> {
        self.handle
            .join()
            .map_err(|_| io::Error::other("output capture thread panicked"))
    }
}

fn drain<R: Read>(stream: &'static str, reader: R) -> Vec<u8> {
    let mut reader = BufReader::new(reader);
    let mut retained = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                debug!(
                    target: SERVER_TARGET,
                    stream,
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "server output"
                );
                retain_tail(&mut retained, &line, CAPTURE_LIMIT);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                debug!(
                    target: SERVER_TARGET,
                    stream,
                    error = %error,
                    "stopped reading server output"
                );
                break;
            }
        }
    }
    retained
}

fn retain_tail(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize) {
    buffer.extend_from_slice(chunk);
    if buffer.len() > limit {
        let excess = buffer.len() - limit;
        buffer.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn drains_everything_below_the_limit() {
        let capture = StreamCapture::spawn("stdout", Cursor::new(b"one\ntwo\nthree".to_vec()))
            .expect("spawn capture thread");
        let bytes = capture.finish().expect("capture finishes");
        assert_eq!(bytes, b"one\ntwo\nthree");
    }

    #[test]
    fn keeps_only_the_most_recent_bytes() {
        let mut buffer = Vec::new();
        retain_tail(&mut buffer, b"abcdef", 4);
        assert_eq!(buffer, b"cdef");
        retain_tail(&mut buffer, b"gh", 4);
        assert_eq!(buffer, b"efgh");
    }

    #[test]
    fn display_labels_both_streams() {
        let output = ProcessOutput::new(b"ready\n".to_vec(), b"FATAL: nope\n".to_vec());
        assert_eq!(output.to_string(), "OUT: ready\nERR: FATAL: nope");
        assert!(!output.is_empty());
        assert!(ProcessOutput::default().is_empty());
    }
}

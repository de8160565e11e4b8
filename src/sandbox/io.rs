//! Output capture for sandboxed child processes.

use tokio::io::{AsyncRead, AsyncReadExt};

/// How many bytes from the end of a stream are kept once it overflows its
/// cap. The harness result line is found here.
pub const TAIL_WINDOW: usize = 64 * 1024;

/// Bytes read from one child stream, capped at a maximum length.
///
/// Besides the capped head, the last [`TAIL_WINDOW`] bytes of the stream are
/// retained so the trailing result line survives truncation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    buffer: Vec<u8>,
    tail: Vec<u8>,
    truncated: bool,
}

impl CapturedOutput {
    /// Drain `reader` to EOF, keeping at most `limit` bytes plus the tail
    /// window.
    ///
    /// Reading continues past the cap so the child never blocks on a full
    /// pipe; bytes between the head and the tail are discarded.
    pub async fn read_from<R>(mut reader: R, limit: usize) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut output = Self::default();
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let room = limit.saturating_sub(output.buffer.len());
            if n > room {
                output.truncated = true;
            }
            output.buffer.extend_from_slice(&chunk[..n.min(room)]);

            output.tail.extend_from_slice(&chunk[..n]);
            if output.tail.len() > 2 * TAIL_WINDOW {
                let excess = output.tail.len() - TAIL_WINDOW;
                output.tail.drain(..excess);
            }
        }
        if output.tail.len() > TAIL_WINDOW {
            let excess = output.tail.len() - TAIL_WINDOW;
            output.tail.drain(..excess);
        }
        Ok(output)
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// The end of the stream, present only when the head was truncated.
    pub fn tail_lossy(&self) -> Option<String> {
        self.truncated
            .then(|| String::from_utf8_lossy(&self.tail).into_owned())
    }

    /// Whether bytes were dropped at the cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Split captured stdout into the program's own output and the trailing
/// result line.
///
/// The result line is the last non-empty line. It is removed together with
/// the newline that separated it from the preceding output.
pub fn split_result_line(stdout: &str) -> (String, Option<&str>) {
    let trimmed = stdout.trim_end_matches(['\n', '\r']);
    if trimmed.trim().is_empty() {
        return (stdout.to_string(), None);
    }
    let (head, line) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return (stdout.to_string(), None);
    }
    let mut head = head.to_string();
    if !head.is_empty() && !head.ends_with('\n') {
        head.push('\n');
    }
    (head, Some(line))
}

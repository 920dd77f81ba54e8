//! Record-oriented reading of child process output.
//!
//! Tools that draw progress bars rewrite the terminal line with `\r`. Reading
//! with `lines()` would hold those updates back until the next `\n`, so both
//! bytes are treated as record terminators here.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Records longer than this are split.
const MAX_RECORD_BYTES: usize = 64 * 1024;

fn is_terminator(byte: u8) -> bool {
    matches!(byte, b'\n' | b'\r')
}

/// Yields trimmed, non-empty text records delimited by `\n` or `\r`.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Returns the next record, or `None` at end of stream.
    ///
    /// Cancel-safe: bytes already pulled from the stream stay buffered if the
    /// returned future is dropped.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                let record = take_record(&mut self.pending);
                return Ok(record);
            }

            match available.iter().position(|&b| is_terminator(b)) {
                Some(end) => {
                    self.pending.extend_from_slice(&available[..end]);
                    self.reader.consume(end + 1);
                    if let Some(record) = take_record(&mut self.pending) {
                        return Ok(Some(record));
                    }
                }
                None => {
                    let len = available.len();
                    self.pending.extend_from_slice(available);
                    self.reader.consume(len);
                    if self.pending.len() >= MAX_RECORD_BYTES {
                        if let Some(record) = take_record(&mut self.pending) {
                            return Ok(Some(record));
                        }
                    }
                }
            }
        }
    }
}

fn take_record(pending: &mut Vec<u8>) -> Option<String> {
    let record = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    (!record.is_empty()).then_some(record)
}

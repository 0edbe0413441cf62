//! Line-oriented record reader for JSONL streams.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Pulls one JSONL record at a time from a buffered async source. Memory use
/// is bounded by the longest single line, never by the stream length.
pub struct RecordLines<R> {
    lines: Lines<R>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin> RecordLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next non-blank line, or `None` at end of stream. Whitespace-only lines
    /// are skipped without being surfaced to the caller.
    pub async fn next_record(&mut self) -> Result<Option<String>> {
        loop {
            self.line_no += 1;
            match self
                .lines
                .next_line()
                .await
                .with_context(|| format!("read failed at line {}", self.line_no))?
            {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

//! Line framing and decoding of the harness's log stream.
//!
//! The container runtime multiplexes stdout/stderr with small per-chunk
//! framing headers, and chunk boundaries fall anywhere, including inside a
//! line. The parser buffers raw bytes, strips control characters, reframes
//! on LF, and decodes whatever lines turn out to be harness events. Anything
//! else on the stream is noise by definition and never fatal.

use super::model::{ResultEvent, Summary};

pub struct ResultParser {
    buf: Vec<u8>,
    summary: Option<Summary>,
    cases_seen: usize,
}

impl ResultParser {
    pub fn new() -> ResultParser {
        ResultParser {
            buf: Vec::new(),
            summary: None,
            cases_seen: 0,
        }
    }

    /// Feed one chunk of raw log bytes. Complete lines are decoded
    /// immediately; a trailing partial line stays buffered for the next
    /// chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf
            .extend(chunk.iter().copied().filter(|&b| !is_stripped_control(b)));

        while let Some(lf) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=lf).collect();
            self.decode_line(&line[..lf]);
        }
    }

    /// The most recent `final_result` payload, if any was decoded.
    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn into_summary(self) -> Option<Summary> {
        self.summary
    }

    fn decode_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        // The runtime's log multiplex prepends framing bytes; whatever
        // printable residue survives the control strip sits before the
        // JSON payload.
        let Some(start) = text.find('{') else {
            tracing::trace!(line = %text, "Ignoring non-event log line");
            return;
        };
        match serde_json::from_str::<ResultEvent>(&text[start..]) {
            Ok(ResultEvent::FinalResult(summary)) => {
                tracing::debug!(
                    total = summary.total,
                    passed = summary.passed,
                    failed = summary.failed,
                    streamed = self.cases_seen,
                    "Final result received"
                );
                self.summary = Some(summary);
            }
            Ok(ResultEvent::TestResult(case)) => {
                // Observed only; the final summary's case list is the
                // authoritative record.
                self.cases_seen += 1;
                tracing::trace!(case = case.id, status = ?case.status, "Case completed");
            }
            Err(e) => {
                tracing::debug!(line = %text, error = %e, "Skipping undecodable log line");
            }
        }
    }
}

impl Default for ResultParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Control bytes dropped from the stream. TAB, LF and CR survive.
fn is_stripped_control(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F)
}

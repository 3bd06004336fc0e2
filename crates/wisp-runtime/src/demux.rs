//! Demultiplexing of worker output into log lines and the result record.
//!
//! Standard output carries both user logging and the single
//! `__RESULT__<json>__END_RESULT__` record. Chunks are reassembled into
//! lines per channel before they are classified, so a record split across
//! writes is recognized as a whole. Every line is decided as soon as it is
//! complete: text without a delimiter is forwarded right away, and marker
//! text never reaches the log stream. Text in front of an opener on the same
//! line is still forwarded. Once the process has finished, the record is the
//! last closer in the captured output together with the nearest opener
//! before it.

use std::ops::Range;

use wisp_build::protocol::{ERROR_FLAG, RESULT_END, RESULT_START};

use crate::error::{NO_RESULT, RuntimeError};
use crate::event::{Channel, LogLine, ResultEnvelope};
use crate::provider::OutputChunk;

#[derive(Default)]
struct LineBuffer {
    partial: Vec<u8>,
    /// How much of `partial` is known to hold no newline.
    scanned: usize,
    /// Offset of `partial` within the captured stdout bytes.
    offset: usize,
}

impl LineBuffer {
    /// Append `data` and return every completed line with its byte range
    /// (newline included) relative to the start of the stream.
    fn push(&mut self, data: &[u8]) -> Vec<(Vec<u8>, Range<usize>)> {
        self.partial.extend_from_slice(data);
        let mut lines = Vec::new();
        let mut line_start = 0;
        let mut pos = self.scanned;
        while let Some(found) = self.partial[pos..].iter().position(|&b| b == b'\n') {
            let line_end = pos + found + 1;
            let range = self.offset + line_start..self.offset + line_end;
            lines.push((self.partial[line_start..line_end].to_vec(), range));
            line_start = line_end;
            pos = line_end;
        }
        if line_start > 0 {
            self.partial.drain(..line_start);
            self.offset += line_start;
        }
        self.scanned = self.partial.len();
        lines
    }

    fn take_rest(&mut self) -> Option<(Vec<u8>, Range<usize>)> {
        if self.partial.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial);
        let range = self.offset..self.offset + line.len();
        self.offset = range.end;
        self.scanned = 0;
        Some((line, range))
    }
}

/// What is left once the process has finished.
#[derive(Debug)]
pub struct Demuxed {
    /// Unterminated trailing output of either channel.
    pub lines: Vec<LogLine>,
    pub result: Result<ResultEnvelope, RuntimeError>,
}

#[derive(Default)]
pub struct OutputDemux {
    stdout: LineBuffer,
    stderr: LineBuffer,
    captured: Vec<u8>,
    /// Stdout lines kept out of the log stream because they carry a delimiter.
    suppressed: Vec<Range<usize>>,
}

impl OutputDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the lines to forward, in arrival order.
    pub fn push(&mut self, chunk: &OutputChunk) -> Vec<LogLine> {
        match chunk.channel {
            Channel::Stderr => self
                .stderr
                .push(&chunk.data)
                .into_iter()
                .map(|(line, _)| LogLine::new(Channel::Stderr, line_text(&line)))
                .collect(),
            Channel::Stdout => {
                self.captured.extend_from_slice(&chunk.data);
                let lines = self.stdout.push(&chunk.data);
                lines
                    .into_iter()
                    .filter_map(|(line, range)| self.classify(&line, range))
                    .collect()
            }
        }
    }

    /// Route a complete stdout line. A line carrying either delimiter is
    /// suppressed; text in front of an opener is still forwarded, while text
    /// in front of a closer is the tail of a record and is not.
    fn classify(&mut self, line: &[u8], range: Range<usize>) -> Option<LogLine> {
        let text = line_text(line);
        let (start, end) = (text.find(RESULT_START), text.find(RESULT_END));
        if start.is_none() && end.is_none() {
            return Some(LogLine::new(Channel::Stdout, text));
        }

        tracing::trace!(bytes = line.len(), "Suppressing stdout line carrying a result delimiter");
        self.suppressed.push(range);
        let cut = match (start, end) {
            (Some(start), Some(end)) if end < start => return None,
            (Some(start), _) => start,
            _ => return None,
        };
        let before = text[..cut].trim_end();
        (!before.is_empty()).then(|| LogLine::new(Channel::Stdout, before.to_string()))
    }

    /// Flush partial lines and decode the result record.
    pub fn finish(mut self) -> Demuxed {
        let mut lines = Vec::new();
        if let Some((line, range)) = self.stdout.take_rest()
            && let Some(forward) = self.classify(&line, range)
        {
            lines.push(forward);
        }
        if let Some((line, _)) = self.stderr.take_rest() {
            lines.push(LogLine::new(Channel::Stderr, line_text(&line)));
        }

        let record = find_record(&self.captured);
        let stray = self
            .suppressed
            .iter()
            .filter(|line| {
                record
                    .as_ref()
                    .is_none_or(|r| line.end <= r.start || line.start >= r.end)
            })
            .count();
        if stray > 0 {
            tracing::warn!(
                lines = stray,
                "Worker printed result delimiters outside its result record; those lines were not forwarded"
            );
        }

        let result = match record {
            None => Err(RuntimeError::Transport(NO_RESULT.into())),
            Some(record) => {
                let payload = record.start + RESULT_START.len()..record.end - RESULT_END.len();
                decode_record(&self.captured[payload])
            }
        };
        Demuxed { lines, result }
    }
}

/// Byte range of the result record: the last closer and the nearest opener
/// in front of it.
fn find_record(captured: &[u8]) -> Option<Range<usize>> {
    let close = rfind(captured, RESULT_END.as_bytes())?;
    let open = rfind(&captured[..close], RESULT_START.as_bytes())?;
    Some(open..close + RESULT_END.len())
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Interpret the JSON inside a result record.
pub fn decode_record(payload: &[u8]) -> Result<ResultEnvelope, RuntimeError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| RuntimeError::Transport(format!("malformed result record: {e}")))?;

    let is_error = value
        .get(ERROR_FLAG)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if !is_error {
        return Ok(ResultEnvelope::Success(value));
    }

    let message = match value.get("message") {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => "unknown error".into(),
    };
    Ok(ResultEnvelope::Error { message })
}

fn line_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    fn feed(demux: &mut OutputDemux, chunks: &[OutputChunk]) -> Vec<LogLine> {
        chunks.iter().flat_map(|c| demux.push(c)).collect()
    }

    #[test]
    fn split_record_is_reassembled_and_hidden() {
        let mut demux = OutputDemux::new();
        let mut forwarded = feed(
            &mut demux,
            &[
                OutputChunk::stdout("one\ntwo\nthr"),
                OutputChunk::stdout("ee\nfour\nfive\n__RESULT__{\"a\""),
                OutputChunk::stdout(":1}__END_RESULT__\n"),
            ],
        );
        let done = demux.finish();
        forwarded.extend(done.lines);

        assert_eq!(texts(&forwarded), ["one", "two", "three", "four", "five"]);
        assert_eq!(done.result.unwrap(), ResultEnvelope::Success(json!({ "a": 1 })));
    }

    #[test]
    fn record_split_over_lines_is_hidden() {
        let mut demux = OutputDemux::new();
        let forwarded = feed(
            &mut demux,
            &[
                OutputChunk::stdout("__RESULT__{\"a\":\n"),
                OutputChunk::stdout("1}__END_RESULT__\n"),
            ],
        );
        let done = demux.finish();
        assert!(forwarded.is_empty());
        assert!(done.lines.is_empty());
        assert_eq!(done.result.unwrap(), ResultEnvelope::Success(json!({ "a": 1 })));
    }

    #[test]
    fn missing_record_is_a_transport_error() {
        let mut demux = OutputDemux::new();
        let forwarded = feed(&mut demux, &[OutputChunk::stdout("partial output")]);
        let done = demux.finish();

        assert!(forwarded.is_empty());
        assert_eq!(texts(&done.lines), ["partial output"]);
        match done.result {
            Err(RuntimeError::Transport(message)) => assert_eq!(message, NO_RESULT),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn thrown_error_is_decoded() {
        let mut demux = OutputDemux::new();
        demux.push(&OutputChunk::stdout(
            "__RESULT__{\"__error\":true,\"message\":\"boom\"}__END_RESULT__\n",
        ));
        let done = demux.finish();
        assert!(done.lines.is_empty());
        assert_eq!(
            done.result.unwrap(),
            ResultEnvelope::Error {
                message: "boom".into()
            }
        );
    }

    #[test]
    fn malformed_record_is_a_transport_error() {
        let mut demux = OutputDemux::new();
        demux.push(&OutputChunk::stdout("__RESULT__{not json__END_RESULT__\n"));
        let done = demux.finish();
        assert!(matches!(done.result, Err(RuntimeError::Transport(m)) if m.starts_with("malformed")));
    }

    #[test]
    fn dangling_opener_does_not_hold_back_later_lines() {
        let mut demux = OutputDemux::new();
        let forwarded = feed(
            &mut demux,
            &[
                OutputChunk::stdout("prefix is __RESULT__\n"),
                OutputChunk::stdout("progress 1\n"),
                OutputChunk::stdout("progress 2\n"),
                OutputChunk::stdout("__RESULT__{\"ok\":true}__END_RESULT__\n"),
            ],
        );
        let done = demux.finish();

        assert_eq!(texts(&forwarded), ["prefix is", "progress 1", "progress 2"]);
        assert!(done.lines.is_empty());
        assert_eq!(done.result.unwrap(), ResultEnvelope::Success(json!({ "ok": true })));
    }

    #[test]
    fn marker_text_in_user_output_keeps_arrival_order() {
        let mut demux = OutputDemux::new();
        let mut forwarded = Vec::new();
        forwarded.extend(demux.push(&OutputChunk::stdout(
            "first: __RESULT__ docs __END_RESULT__\n",
        )));
        assert_eq!(texts(&forwarded), ["first:"]);
        forwarded.extend(demux.push(&OutputChunk::stdout("second\n")));
        assert_eq!(texts(&forwarded), ["first:", "second"]);
        forwarded.extend(demux.push(&OutputChunk::stdout("__RESULT__1__END_RESULT__\n")));
        let done = demux.finish();

        assert_eq!(texts(&forwarded), ["first:", "second"]);
        assert!(done.lines.is_empty());
        assert_eq!(done.result.unwrap(), ResultEnvelope::Success(json!(1)));
    }

    #[test]
    fn text_before_the_record_on_its_line_is_forwarded() {
        let mut demux = OutputDemux::new();
        let forwarded = feed(
            &mut demux,
            &[
                OutputChunk::stdout("no newline yet"),
                OutputChunk::stdout("__RESULT__[1,2]__END_RESULT__\n"),
            ],
        );
        let done = demux.finish();
        assert_eq!(texts(&forwarded), ["no newline yet"]);
        assert_eq!(done.result.unwrap(), ResultEnvelope::Success(json!([1, 2])));
    }

    #[test]
    fn long_unterminated_line_is_reassembled() {
        let mut demux = OutputDemux::new();
        let piece = "x".repeat(1024);
        for _ in 0..64 {
            assert!(demux.push(&OutputChunk::stdout(piece.as_str())).is_empty());
        }
        let forwarded = demux.push(&OutputChunk::stdout("\nnext\n"));
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[0].text.len(), 64 * 1024);
        assert_eq!(forwarded[1].text, "next");
    }

    #[test]
    fn stderr_lines_are_forwarded_in_order() {
        let mut demux = OutputDemux::new();
        let forwarded = feed(
            &mut demux,
            &[
                OutputChunk::stderr("warn: a\r\nwarn"),
                OutputChunk::stderr(": b\n"),
                OutputChunk::stderr("tail"),
            ],
        );
        let done = demux.finish();
        assert_eq!(texts(&forwarded), ["warn: a", "warn: b"]);
        assert_eq!(texts(&done.lines), ["tail"]);
        assert!(forwarded.iter().all(|l| l.channel == Channel::Stderr));
    }
}

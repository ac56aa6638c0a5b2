//! Container log demultiplexing
//!
//! The engine hands out either a framed stream (8-byte header: stream tag,
//! three zero bytes, big-endian payload length) or raw text when the
//! container has a TTY attached. The first chunk starting with a stream tag
//! switches the session to framed mode for good, so frames split across
//! arbitrary chunk boundaries are reassembled.

use serde::{Deserialize, Serialize};

const HEADER_LEN: usize = 8;
const TAG_STDIN: u8 = 0x00;
const TAG_STDOUT: u8 = 0x01;
const TAG_STDERR: u8 = 0x02;

/// Which stream a log frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Unframed TTY output
    Raw,
}

/// One decoded log message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub stream: LogStream,
    pub text: String,
}

/// Event sent to log stream subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEvent {
    Connected { container: String },
    Log { message: String },
    End { message: String },
    Error { message: String },
}

impl LogEvent {
    pub fn log(message: impl Into<String>) -> Self {
        LogEvent::Log { message: message.into() }
    }

    pub fn end() -> Self {
        LogEvent::End {
            message: "Log stream ended".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        LogEvent::Error { message: message.into() }
    }

    /// Whether this event closes the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogEvent::End { .. } | LogEvent::Error { .. })
    }

    /// JSON body of the event
    pub fn to_json(&self) -> String {
        // a tagged enum of strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Incremental decoder for one container log session
#[derive(Debug, Default)]
pub struct LogDemuxer {
    framed: bool,
    buffer: Vec<u8>,
}

impl LogDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session has been detected as framed
    pub fn is_framed(&self) -> bool {
        self.framed
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk and return every complete, non-blank message
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogFrame> {
        if chunk.is_empty() {
            return Vec::new();
        }

        if !self.framed && matches!(chunk[0], TAG_STDOUT | TAG_STDERR) {
            self.framed = true;
        }

        if !self.framed {
            return non_blank(LogStream::Raw, chunk).into_iter().collect();
        }

        self.buffer.extend_from_slice(chunk);
        self.drain_frames()
    }

    fn drain_frames(&mut self) -> Vec<LogFrame> {
        let mut frames = Vec::new();
        let mut offset = 0;

        while self.buffer.len() - offset >= HEADER_LEN {
            let header = &self.buffer[offset..offset + HEADER_LEN];
            let stream = match header[0] {
                TAG_STDERR => LogStream::Stderr,
                TAG_STDOUT | TAG_STDIN => LogStream::Stdout,
                _ => {
                    // lost sync: surface the rest as text instead of stalling
                    frames.extend(non_blank(LogStream::Raw, &self.buffer[offset..]));
                    offset = self.buffer.len();
                    break;
                }
            };
            let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if self.buffer.len() - offset < HEADER_LEN + size {
                break;
            }

            let start = offset + HEADER_LEN;
            frames.extend(non_blank(stream, &self.buffer[start..start + size]));
            offset = start + size;
        }

        self.buffer.drain(..offset);
        frames
    }
}

fn non_blank(stream: LogStream, payload: &[u8]) -> Option<LogFrame> {
    let text = String::from_utf8_lossy(payload);
    if text.trim().is_empty() {
        None
    } else {
        Some(LogFrame {
            stream,
            text: text.into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, payload: &str) -> Vec<u8> {
        let mut bytes = vec![tag, 0, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload.as_bytes());
        bytes
    }

    fn stream_of(payloads: &[&str]) -> Vec<u8> {
        payloads
            .iter()
            .enumerate()
            .flat_map(|(i, p)| frame(if i % 2 == 0 { TAG_STDOUT } else { TAG_STDERR }, p))
            .collect()
    }

    #[test]
    fn test_whole_frames() {
        let mut demux = LogDemuxer::new();
        let frames = demux.push(&stream_of(&["one\n", "two\n"]));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].text, "one\n");
        assert_eq!(frames[0].stream, LogStream::Stdout);
        assert_eq!(frames[1].stream, LogStream::Stderr);
        assert_eq!(demux.pending(), 0);
    }

    #[test]
    fn test_frames_split_at_every_chunk_size() {
        let payloads = ["first line\n", "second ✓\n", "third\n", "x"];
        let bytes = stream_of(&payloads);

        for size in 1..=bytes.len() {
            let mut demux = LogDemuxer::new();
            let texts: Vec<String> = bytes
                .chunks(size)
                .flat_map(|chunk| demux.push(chunk))
                .map(|f| f.text)
                .collect();
            assert_eq!(texts, payloads, "chunk size {}", size);
            assert_eq!(demux.pending(), 0);
        }
    }

    #[test]
    fn test_frames_split_at_uneven_boundaries() {
        let payloads = ["alpha\n", "beta\n", "gamma\n"];
        let bytes = stream_of(&payloads);
        let cuts = [3, 9, 10, 22, 23, 30];

        let mut demux = LogDemuxer::new();
        let mut texts = Vec::new();
        let mut start = 0;
        for cut in cuts.iter().copied().chain(std::iter::once(bytes.len())) {
            let end = cut.min(bytes.len());
            texts.extend(demux.push(&bytes[start..end]).into_iter().map(|f| f.text));
            start = end;
        }
        assert_eq!(texts, payloads);
    }

    #[test]
    fn test_blank_payloads_are_dropped() {
        let mut demux = LogDemuxer::new();
        let frames = demux.push(&stream_of(&["  \n", "kept", "\n"]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].text, "kept");
    }

    #[test]
    fn test_raw_chunks_emit_once_each() {
        let mut demux = LogDemuxer::new();
        assert_eq!(demux.push(b"hello\n").len(), 1);
        assert!(demux.push(b"   \n").is_empty());
        let frames = demux.push(b"world");
        assert_eq!(frames[0].stream, LogStream::Raw);
        assert_eq!(frames[0].text, "world");
        assert!(!demux.is_framed());
    }

    #[test]
    fn test_framed_mode_is_latched() {
        let mut demux = LogDemuxer::new();
        let bytes = frame(TAG_STDOUT, "payload that starts with text");
        // the second chunk starts with payload bytes, not a tag
        assert!(demux.push(&bytes[..10]).is_empty());
        let frames = demux.push(&bytes[10..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].text, "payload that starts with text");
    }

    #[test]
    fn test_event_wire_format() {
        assert_eq!(
            LogEvent::log("hi").to_json(),
            r#"{"type":"log","message":"hi"}"#
        );
        assert_eq!(
            LogEvent::Connected { container: "dl_p1_app".into() }.to_json(),
            r#"{"type":"connected","container":"dl_p1_app"}"#
        );
        assert!(LogEvent::end().is_terminal());
        assert!(!LogEvent::log("x").is_terminal());
    }
}

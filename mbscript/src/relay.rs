//! Relay of the child's merged stdout/stderr into log events.
//!
//! The read end of the pipe is non-blocking; each drain reads whatever is
//! available, splits it into lines and hands them to a [`LogSink`].

use crate::event::{LogLine, SessionEvent};
use mbscript_common::consts::{LOG_SOURCE, MAX_LOG_LINE};
use std::fs::File;
use std::io::{self, Read};
use tracing::info;

/// Receiver of completed output lines.
pub trait LogSink: Send + Sync {
    /// Handle one line.
    fn emit(&self, line: &LogLine);
}

/// Writes every line to `tracing` at info level.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, line: &LogLine) {
        info!(source = line.source, device = %line.device, "{}", line.text);
    }
}

/// Forwards every line as [`SessionEvent::Log`].
pub struct EventSink {
    sender: flume::Sender<SessionEvent>,
}

impl EventSink {
    /// Sink sending into `sender`.
    pub fn new(sender: flume::Sender<SessionEvent>) -> Self {
        Self { sender }
    }
}

impl LogSink for EventSink {
    fn emit(&self, line: &LogLine) {
        // A dropped receiver only means nobody listens any more.
        let _ = self.sender.send(SessionEvent::Log(line.clone()));
    }
}

impl<A: LogSink, B: LogSink> LogSink for (A, B) {
    fn emit(&self, line: &LogLine) {
        self.0.emit(line);
        self.1.emit(line);
    }
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes`, returning every line they complete.
    ///
    /// A run longer than the line cap without a newline is cut and returned
    /// as a line on its own.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                lines.push(Self::decode(&mut self.pending));
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_LOG_LINE {
                    let tail = self.pending.split_off(char_boundary(&self.pending));
                    lines.push(Self::decode(&mut self.pending));
                    self.pending = tail;
                }
            }
        }
        lines
    }

    /// Take the unterminated tail, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Self::decode(&mut self.pending))
        }
    }

    fn decode(buf: &mut Vec<u8>) -> String {
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let text = String::from_utf8_lossy(buf).into_owned();
        buf.clear();
        text
    }
}

/// Length of `buf` without an incomplete UTF-8 sequence at its end.
fn char_boundary(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let byte = buf[len - back];
        if byte & 0xC0 != 0x80 {
            let width = match byte {
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => 1,
            };
            return if width > back { len - back } else { len };
        }
    }
    len
}

/// Non-blocking reader over the child's merged output.
pub struct LogRelay {
    reader: File,
    assembler: LineAssembler,
    device: String,
    eof: bool,
}

impl LogRelay {
    /// Relay reading from `reader`, which must be in non-blocking mode.
    pub fn new(reader: File, device: impl Into<String>) -> Self {
        Self {
            reader,
            assembler: LineAssembler::new(),
            device: device.into(),
            eof: false,
        }
    }

    /// `true` once the write side has closed and the tail was flushed.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Read everything currently available and emit the completed lines.
    ///
    /// Returns the number of lines emitted. Reaching end of file flushes a
    /// partial last line.
    pub fn drain(&mut self, sink: &dyn LogSink) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut buf = [0u8; 4096];
        let mut emitted = 0;
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.eof = true;
                    if let Some(tail) = self.assembler.flush() {
                        self.emit(sink, tail);
                        emitted += 1;
                    }
                    return Ok(emitted);
                }
                Ok(n) => {
                    for text in self.assembler.push(&buf[..n]) {
                        self.emit(sink, text);
                        emitted += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(emitted),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Emit a pending partial line without waiting for end of file.
    pub fn flush(&mut self, sink: &dyn LogSink) {
        if let Some(tail) = self.assembler.flush() {
            self.emit(sink, tail);
        }
    }

    fn emit(&self, sink: &dyn LogSink, text: String) {
        sink.emit(&LogLine {
            source: LOG_SOURCE,
            device: self.device.clone(),
            text,
        });
    }
}

//! Per-stream output buffers

use std::fmt;

/// Which output stream of the child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

/// How raw reads are turned into buffer entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Every raw read becomes one entry, newlines included
    #[default]
    Chunks,
    /// Reads are split on `\n`; a trailing `\r` is dropped and an unterminated
    /// tail is held back until the next read (or until [`LineBuffer::flush`])
    Lines,
}

/// Append-only ordered output of one stream
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    mode: CaptureMode,
    lines: Vec<String>,
    partial: String,
}

impl LineBuffer {
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            lines: Vec::new(),
            partial: String::new(),
        }
    }

    /// Record a raw chunk. Returns the number of entries appended.
    pub fn push_chunk(&mut self, chunk: &str) -> usize {
        match self.mode {
            CaptureMode::Chunks => {
                self.lines.push(chunk.to_string());
                1
            }
            CaptureMode::Lines => {
                let before = self.lines.len();
                self.partial.push_str(chunk);
                while let Some(pos) = self.partial.find('\n') {
                    let mut line: String = self.partial.drain(..=pos).collect();
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                    self.lines.push(line);
                }
                self.lines.len() - before
            }
        }
    }

    /// Emit a held-back unterminated line, if any
    pub fn flush(&mut self) -> usize {
        if self.partial.is_empty() {
            return 0;
        }
        let line = std::mem::take(&mut self.partial);
        self.lines.push(line);
        1
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|s| s.as_str())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(|s| s.as_str())
    }
}

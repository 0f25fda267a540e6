//! Runtime configuration handed to `Driver::load`.

use crate::cbuf::LineEnding;
use crate::constants::{CBUF_FILENAME, CBUF_RAW_FILENAME, CBUF_SIZE};

/// Driver load options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplConfig {
    /// Debug log capacity in bytes
    pub cbuf_size: usize,
    /// Destination of `cbuf_save`
    pub save_path: &'static str,
    /// Destination of the unordered crash-time dump
    pub raw_dump_path: &'static str,
    /// Terminator appended after every debug log line
    pub line_ending: LineEnding,
}

impl SplConfig {
    pub const fn new() -> Self {
        Self {
            cbuf_size: CBUF_SIZE,
            save_path: CBUF_FILENAME,
            raw_dump_path: CBUF_RAW_FILENAME,
            line_ending: LineEnding::DEFAULT,
        }
    }

    pub const fn with_cbuf_size(mut self, cbuf_size: usize) -> Self {
        self.cbuf_size = cbuf_size;
        self
    }

    pub const fn with_save_path(mut self, save_path: &'static str) -> Self {
        self.save_path = save_path;
        self
    }

    pub const fn with_raw_dump_path(mut self, raw_dump_path: &'static str) -> Self {
        self.raw_dump_path = raw_dump_path;
        self
    }

    pub const fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }
}

impl Default for SplConfig {
    fn default() -> Self {
        Self::new()
    }
}

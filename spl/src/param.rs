//! `cbuf_save` tunable.
//!
//! Writing a value starting with `1` saves the debug log and replaces the
//! text with the outcome. Values starting with `*` are the outcome text
//! being written back and leave it alone; anything else restores the hint.

use alloc::string::String;
use core::fmt::{self, Write};

use crate::cbuf::{DebugLog, DumpTarget};
use crate::constants::{CBUF_SAVE_DEFAULT, CBUF_SAVE_LEN};
use crate::error::SplError;
use crate::Spinlock;

/// Fixed-capacity parameter text
struct ParamText {
    bytes: [u8; CBUF_SAVE_LEN],
    len: usize,
}

impl ParamText {
    const fn empty() -> Self {
        Self {
            bytes: [0; CBUF_SAVE_LEN],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // Only whole chars are ever copied in
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    fn set(&mut self, args: fmt::Arguments<'_>) {
        self.len = 0;
        let _ = self.write_fmt(args);
    }
}

impl fmt::Write for ParamText {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            let mut utf8 = [0u8; 4];
            let encoded = ch.encode_utf8(&mut utf8).as_bytes();
            if self.len + encoded.len() > CBUF_SAVE_LEN {
                return Err(fmt::Error);
            }
            self.bytes[self.len..self.len + encoded.len()].copy_from_slice(encoded);
            self.len += encoded.len();
        }
        Ok(())
    }
}

/// The `cbuf_save` control parameter
pub struct CbufSaveParam {
    text: Spinlock<ParamText>,
}

impl CbufSaveParam {
    pub fn new() -> Self {
        let mut text = ParamText::empty();
        text.set(format_args!("{}", CBUF_SAVE_DEFAULT));
        Self {
            text: Spinlock::new(text),
        }
    }

    pub fn get(&self) -> String {
        String::from(self.text.lock().as_str())
    }

    /// Apply a write of `value` made by `thread_id`.
    ///
    /// A save request is noted in the debug log first, so the saved file
    /// records it. Only a save request can fail; the text describes the
    /// outcome either way.
    pub fn set<T: DumpTarget>(
        &self,
        value: &str,
        log: &DebugLog,
        thread_id: usize,
        target: &T,
        path: &str,
    ) -> Result<(), SplError> {
        match value.as_bytes().first() {
            Some(b'1') => {
                let _ = log.format_and_append(
                    thread_id,
                    format_args!("Saving cbuf to {}\n", path),
                );
                let result = log.save_to_file(target, path);
                let mut text = self.text.lock();
                match result {
                    Ok(()) => text.set(format_args!("* Saved {}", path)),
                    Err(SplError::OpenFailed) => {
                        text.set(format_args!("* Unable to open {}", path))
                    }
                    Err(err) => text.set(format_args!("* Unable to save {}: {}", path, err)),
                }
                result
            }
            Some(b'*') => Ok(()),
            _ => {
                self.text.lock().set(format_args!("{}", CBUF_SAVE_DEFAULT));
                Ok(())
            }
        }
    }
}

impl Default for CbufSaveParam {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbuf::LineEnding;

    struct NoDisk;

    impl DumpTarget for NoDisk {
        type Sink = Vec<u8>;

        fn create(&self, _path: &str) -> Result<Vec<u8>, SplError> {
            Err(SplError::OpenFailed)
        }
    }

    struct Discard;

    impl DumpTarget for Discard {
        type Sink = Vec<u8>;

        fn create(&self, _path: &str) -> Result<Vec<u8>, SplError> {
            Ok(Vec::new())
        }
    }

    fn active_log() -> DebugLog {
        let log = DebugLog::new();
        log.init(64, LineEnding::Empty).unwrap();
        log
    }

    #[test]
    fn starts_with_hint() {
        assert_eq!(CbufSaveParam::new().get(), "Set this to 1 to save cbuf");
    }

    #[test]
    fn one_saves_and_reports_path() {
        let param = CbufSaveParam::new();
        let log = active_log();
        param.set("1", &log, 1, &Discard, "C:\\cbuf.txt").unwrap();
        assert_eq!(param.get(), "* Saved C:\\cbuf.txt");
    }

    #[test]
    fn open_failure_is_reported_in_text() {
        let param = CbufSaveParam::new();
        let log = active_log();
        assert_eq!(
            param.set("1\n", &log, 1, &NoDisk, "D:\\nope.txt"),
            Err(SplError::OpenFailed)
        );
        assert_eq!(param.get(), "* Unable to open D:\\nope.txt");
    }

    #[test]
    fn save_request_is_recorded_before_saving() {
        let param = CbufSaveParam::new();
        let log = active_log();
        param.set("1", &log, 0x2c, &Discard, "C:\\cbuf.txt").unwrap();

        let mut out = Vec::new();
        log.save_to(&mut out).unwrap();
        assert_eq!(out, b"0x2c: Saving cbuf to C:\\cbuf.txt\n".to_vec());
    }

    #[test]
    fn star_keeps_outcome_and_other_values_reset() {
        let param = CbufSaveParam::new();
        let log = active_log();
        param.set("1", &log, 1, &Discard, "x").unwrap();
        param.set("* Saved x", &log, 1, &Discard, "x").unwrap();
        assert_eq!(param.get(), "* Saved x");

        param.set("0", &log, 1, &Discard, "x").unwrap();
        assert_eq!(param.get(), CBUF_SAVE_DEFAULT);
        param.set("", &log, 1, &Discard, "x").unwrap();
        assert_eq!(param.get(), CBUF_SAVE_DEFAULT);
    }

    #[test]
    fn long_path_is_cut_to_parameter_size() {
        let param = CbufSaveParam::new();
        let log = active_log();
        let path = "é".repeat(80);
        param.set("1", &log, 1, &Discard, &path).unwrap();

        let text = param.get();
        assert!(text.len() <= CBUF_SAVE_LEN);
        assert!(text.starts_with("* Saved éé"));
    }

    #[test]
    fn save_of_inactive_log_is_reported() {
        let param = CbufSaveParam::new();
        let log = DebugLog::new();
        assert_eq!(
            param.set("1", &log, 1, &Discard, "x"),
            Err(SplError::NotActive)
        );
        assert_eq!(param.get(), "* Unable to save x: debug log not active");
    }
}

//! `cmn_err` severity routing and the fatal path.

use core::fmt;

use crate::cbuf::DebugLog;

/// `log` target for messages `cmn_err` has already put in the debug log
pub const CMN_ERR_TARGET: &str = "spl::cmn_err";

/// `cmn_err` severities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CeLevel {
    Ignore,
    /// Continuation of a previous message, printed as-is
    Cont,
    Note,
    Warn,
    Panic,
}

/// Report a message at `level`.
///
/// Everything but `Ignore` lands in the debug log. Warnings are also
/// passed to the `log` facade. A failure to record the message is never
/// reported to the caller.
pub fn cmn_err(log: &DebugLog, thread_id: usize, level: CeLevel, args: fmt::Arguments<'_>) {
    match level {
        CeLevel::Ignore => {}
        CeLevel::Cont => {
            let _ = log.format_and_append(thread_id, args);
        }
        CeLevel::Note => {
            let _ = log.format_and_append(thread_id, format_args!("SPL: Notice: {}\n", args));
        }
        CeLevel::Warn => {
            log::warn!(target: CMN_ERR_TARGET, "SPL: Warning: {}", args);
            let _ =
                log.format_and_append(thread_id, format_args!("SPL: Warning: {}\n", args));
        }
        CeLevel::Panic => spl_panic(log, thread_id, args),
    }
}

/// Record `args` in the debug log and stop.
pub fn spl_panic(log: &DebugLog, thread_id: usize, args: fmt::Arguments<'_>) -> ! {
    log::error!(target: CMN_ERR_TARGET, "SPL: panic: {}", args);
    let _ = log.format_and_append(thread_id, format_args!("{}\n", args));
    let _ = log.format_and_append(
        thread_id,
        format_args!("SPL version {}\n", env!("CARGO_PKG_VERSION")),
    );
    panic!("SPL: {}", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbuf::LineEnding;

    fn contents(log: &DebugLog) -> String {
        let mut out = Vec::new();
        log.save_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn active_log() -> DebugLog {
        let log = DebugLog::new();
        log.init(512, LineEnding::Empty).unwrap();
        log
    }

    #[test]
    fn levels_route_to_the_debug_log() {
        let log = active_log();
        cmn_err(&log, 3, CeLevel::Ignore, format_args!("dropped\n"));
        cmn_err(&log, 3, CeLevel::Cont, format_args!("as is"));
        cmn_err(&log, 3, CeLevel::Note, format_args!("pool {} imported", "tank"));
        cmn_err(&log, 3, CeLevel::Warn, format_args!("vdev {} degraded", 2));

        assert_eq!(
            contents(&log),
            "0x3: as is0x3: SPL: Notice: pool tank imported\n0x3: SPL: Warning: vdev 2 degraded\n"
        );
    }

    #[test]
    fn inactive_log_swallows_messages() {
        let log = DebugLog::new();
        cmn_err(&log, 1, CeLevel::Note, format_args!("nobody listening"));
        assert!(!log.is_active());
    }

    #[test]
    #[should_panic(expected = "SPL: zio 7 failed")]
    fn panic_level_panics() {
        let log = active_log();
        cmn_err(&log, 1, CeLevel::Panic, format_args!("zio {} failed", 7));
    }

    #[test]
    fn panic_leaves_message_in_ring() {
        let log = std::sync::Arc::new(active_log());
        let ring = std::sync::Arc::clone(&log);
        let result = std::thread::spawn(move || {
            spl_panic(&ring, 9, format_args!("assertion failed"));
        })
        .join();
        assert!(result.is_err());

        let text = contents(&log);
        assert!(text.starts_with("0x9: assertion failed\n"));
        assert!(text.contains("SPL version"));
    }
}

//! `log` facade backend that records into the debug log.

use alloc::sync::Arc;

use crate::cbuf::DebugLog;
use crate::err::CMN_ERR_TARGET;
use crate::platform::Platform;
use crate::Spinlock;

static LOGGER: CbufLogger = CbufLogger::new();

#[derive(Clone)]
struct Attached {
    log: Arc<DebugLog>,
    platform: Arc<dyn Platform>,
}

/// Routes `log` records into a `DebugLog`, tagged with their level.
///
/// Records are dropped while no log is attached, and records from
/// `cmn_err` are skipped since it writes the debug log itself.
pub struct CbufLogger {
    attached: Spinlock<Option<Attached>>,
}

impl CbufLogger {
    pub const fn new() -> Self {
        Self {
            attached: Spinlock::new(None),
        }
    }

    pub fn attach(&self, log: Arc<DebugLog>, platform: Arc<dyn Platform>) {
        *self.attached.lock() = Some(Attached { log, platform });
    }

    pub fn detach(&self) {
        let previous = self.attached.lock().take();
        drop(previous);
    }
}

impl Default for CbufLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl log::Log for CbufLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) || record.target() == CMN_ERR_TARGET {
            return;
        }
        // Appending must not nest inside our own spinlock
        let Some(attached) = self.attached.lock().clone() else {
            return;
        };
        let _ = attached.log.format_and_append(
            attached.platform.current_thread_id(),
            format_args!("[{}] {}: {}\n", record.level(), record.target(), record.args()),
        );
    }

    fn flush(&self) {}
}

/// Install the debug-log backend (call once at driver load)
pub fn init_logger(log: Arc<DebugLog>, platform: Arc<dyn Platform>, level: log::LevelFilter) {
    LOGGER.attach(log, platform);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Stop recording into the debug log (call before it is shut down)
pub fn detach_logger() {
    LOGGER.detach();
}

#[cfg(test)]
mod tests {
    use log::Log;

    use super::*;
    use crate::cbuf::LineEnding;
    use crate::platform::HostPlatform;

    fn saved(log: &DebugLog) -> String {
        let mut out = Vec::new();
        log.save_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn records_are_tagged_with_level_and_target() {
        let ring = Arc::new(DebugLog::new());
        ring.init(256, LineEnding::Empty).unwrap();

        log::set_max_level(log::LevelFilter::Trace);
        let logger = CbufLogger::new();
        logger.attach(Arc::clone(&ring), Arc::new(HostPlatform::new()));
        logger.log(
            &log::Record::builder()
                .level(log::Level::Warn)
                .target("spl::mount")
                .args(format_args!("gate held"))
                .build(),
        );

        let text = saved(&ring);
        assert!(text.starts_with("0x"));
        assert!(text.ends_with(": [WARN] spl::mount: gate held\n"));
    }

    #[test]
    fn cmn_err_records_are_not_doubled() {
        let ring = Arc::new(DebugLog::new());
        ring.init(256, LineEnding::Empty).unwrap();

        log::set_max_level(log::LevelFilter::Trace);
        let logger = CbufLogger::new();
        logger.attach(Arc::clone(&ring), Arc::new(HostPlatform::new()));
        logger.log(
            &log::Record::builder()
                .level(log::Level::Warn)
                .target(CMN_ERR_TARGET)
                .args(format_args!("SPL: Warning: vdev degraded"))
                .build(),
        );

        assert_eq!(saved(&ring), "");
    }

    #[test]
    fn detached_logger_drops_records() {
        let ring = Arc::new(DebugLog::new());
        ring.init(256, LineEnding::Empty).unwrap();

        let logger = CbufLogger::new();
        logger.attach(Arc::clone(&ring), Arc::new(HostPlatform::new()));
        logger.detach();
        logger.log(
            &log::Record::builder()
                .level(log::Level::Error)
                .args(format_args!("lost"))
                .build(),
        );

        assert_eq!(saved(&ring), "");
    }
}

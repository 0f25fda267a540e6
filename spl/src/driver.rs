//! Driver load/unload lifecycle.
//!
//! `Driver::load` builds every piece of process-wide state into one
//! `SplContext`; call sites borrow it from the driver. `Driver::unload`
//! tears it down in reverse and turns a fatal teardown error into
//! `spl_panic`.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::cbuf::{AppendStatus, CbufSink, DebugLog, DumpTarget};
use crate::config::SplConfig;
use crate::err::{self, CeLevel};
use crate::error::{FatalReason, SplError};
use crate::logger;
use crate::mount::MountRegistry;
use crate::param::CbufSaveParam;
use crate::platform::Platform;
use crate::time::HrClock;

/// Append a formatted line to the context's debug log.
#[macro_export]
macro_rules! dprintf {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.dprintf(core::format_args!($($arg)*))
    };
}

/// State shared by every subsystem while the driver is loaded
pub struct SplContext {
    config: SplConfig,
    platform: Arc<dyn Platform>,
    registry: MountRegistry,
    debug_log: Arc<DebugLog>,
    clock: HrClock,
    cbuf_save: CbufSaveParam,
}

impl SplContext {
    pub fn config(&self) -> &SplConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    pub fn debug_log(&self) -> &Arc<DebugLog> {
        &self.debug_log
    }

    pub fn clock(&self) -> &HrClock {
        &self.clock
    }

    /// Append `0x<thread>: <args>` to the debug log.
    pub fn dprintf(&self, args: fmt::Arguments<'_>) -> Result<AppendStatus, SplError> {
        self.debug_log
            .format_and_append(self.platform.current_thread_id(), args)
    }

    pub fn cmn_err(&self, level: CeLevel, args: fmt::Arguments<'_>) {
        err::cmn_err(
            &self.debug_log,
            self.platform.current_thread_id(),
            level,
            args,
        );
    }

    pub fn panic(&self, args: fmt::Arguments<'_>) -> ! {
        err::spl_panic(&self.debug_log, self.platform.current_thread_id(), args)
    }

    /// Current text of the `cbuf_save` parameter
    pub fn cbuf_save(&self) -> String {
        self.cbuf_save.get()
    }

    /// Write the `cbuf_save` parameter, saving to `config().save_path`.
    pub fn set_cbuf_save<T: DumpTarget>(&self, value: &str, target: &T) -> Result<(), SplError> {
        self.cbuf_save.set(
            value,
            &self.debug_log,
            self.platform.current_thread_id(),
            target,
            self.config.save_path,
        )
    }

    /// Write the unordered ring image to `sink`.
    pub fn save_raw<S: CbufSink>(&self, sink: &mut S) -> Result<(), SplError> {
        self.debug_log.save_raw(sink)
    }

    /// Write the unordered ring image to `config().raw_dump_path`.
    pub fn dump_raw<T: DumpTarget>(&self, target: &T) -> Result<(), SplError> {
        let mut sink = target.create(self.config.raw_dump_path)?;
        self.debug_log.save_raw(&mut sink)?;
        log::info!("cbuf: raw image written to {}", self.config.raw_dump_path);
        Ok(())
    }
}

/// A loaded driver instance
pub struct Driver {
    context: SplContext,
}

impl Driver {
    /// Bring up the debug log, clock and mount registry.
    ///
    /// Failing to allocate the debug log is fatal and reported as
    /// `SplError::Fatal`.
    pub fn load(config: SplConfig, platform: Arc<dyn Platform>) -> Result<Self, SplError> {
        let debug_log = Arc::new(DebugLog::new());
        debug_log
            .init(config.cbuf_size, config.line_ending)
            .map_err(|err| match err {
                SplError::OutOfMemory => {
                    SplError::Fatal(FatalReason::CbufAllocation(config.cbuf_size))
                }
                other => other,
            })?;

        let clock = HrClock::new(Arc::clone(&platform));
        if let Err(err) = clock.try_calibrate() {
            log::warn!("spl: {}", err);
        }

        let context = SplContext {
            config,
            platform,
            registry: MountRegistry::init(),
            debug_log,
            clock,
            cbuf_save: CbufSaveParam::new(),
        };
        if let Err(err) = dprintf!(
            context,
            "SPL: loaded, debug buffer {} bytes\n",
            config.cbuf_size
        ) {
            log::warn!("spl: load banner not recorded: {}", err);
        }
        log::info!("spl: loaded");

        Ok(Self { context })
    }

    pub fn context(&self) -> &SplContext {
        &self.context
    }

    /// Route the `log` facade into this driver's debug log.
    pub fn install_logger(&self, level: log::LevelFilter) {
        logger::init_logger(
            Arc::clone(&self.context.debug_log),
            Arc::clone(&self.context.platform),
            level,
        );
    }

    /// Tear everything down. Mounts left registered are fatal.
    pub fn unload(self) {
        let SplContext {
            platform,
            registry,
            debug_log,
            ..
        } = self.context;

        if let Err(err) = registry.shutdown() {
            err::spl_panic(
                &debug_log,
                platform.current_thread_id(),
                format_args!("unload: {}", err),
            );
        }

        logger::detach_logger();
        if let Err(err) = debug_log.shutdown() {
            log::warn!("spl: debug log shutdown: {}", err);
        }
    }
}

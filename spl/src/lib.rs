//! Solaris Porting Layer core for the storage driver.
//!
//! Translates the storage engine's kernel expectations onto native
//! facilities:
//! - `lock` - spinlock, ticket lock and reader-writer lock
//! - `mount` - mount-list registry and the global VFS busy gate
//! - `cbuf` - circular debug log buffer, saved on demand for post-mortem
//! - `time` - high-resolution monotonic and wall-clock time
//! - `lookaside` - fixed-size block caches over an allocator
//! - `err` - `cmn_err` severity routing and the fatal path
//! - `param` - the `cbuf_save` control parameter
//! - `logger` - `log` facade backend writing into the debug log
//! - `driver` - load/unload lifecycle owning all of the above
//!
//! ## Lock Ordering Protocol
//!
//! 1. Mount gate (`MountRegistry::acquire`)
//! 2. Mount list mutex
//! 3. Debug log spinlock (innermost, never blocks)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod constants;
mod lock;

pub mod cbuf;
pub mod config;
pub mod driver;
pub mod err;
pub mod error;
pub mod logger;
pub mod lookaside;
pub mod mount;
pub mod param;
pub mod platform;
pub mod time;

pub use lock::{RwLock, RwLockReadGuard, RwLockWriteGuard, Spinlock, SpinlockGuard, TicketLock, TicketLockGuard};

pub use cbuf::{ordered_segments, AppendStatus, CbufSink, DebugLog, DumpTarget, LineEnding};
#[cfg(any(test, feature = "std"))]
pub use cbuf::FileTarget;
pub use config::SplConfig;
pub use constants::{CBUF_SAVE_LEN, CBUF_SIZE, END_MARKER, MAX_LINE_LENGTH};
pub use driver::{Driver, SplContext};
pub use err::{cmn_err, spl_panic, CeLevel};
pub use error::{FatalReason, SplError};
pub use logger::{init_logger, CbufLogger};
pub use lookaside::{GlobalPool, LookasideBlock, LookasideCache, LookasideStats, PoolAllocator};
pub use mount::{GateHold, GateMode, MountEntry, MountFlags, MountRegistry, MountSnapshot};
pub use param::CbufSaveParam;
pub use platform::Platform;
#[cfg(any(test, feature = "std"))]
pub use platform::HostPlatform;
pub use time::{windows_to_unix, HrClock, Timespec};

//! Host facilities the porting layer consumes.
//!
//! The kernel build supplies its own `Platform`; `HostPlatform` backs the
//! user-mode build and the test-suite.

/// Clock and thread-identity collaborator
pub trait Platform: Send + Sync {
    /// Identity of the calling thread, printed in front of log lines
    fn current_thread_id(&self) -> usize;

    /// Raw high-resolution counter value
    fn performance_counter(&self) -> u64;

    /// Counter ticks per second
    fn performance_frequency(&self) -> u64;

    /// Wall clock in 100ns intervals since 1601-01-01 UTC
    fn system_time(&self) -> u64;
}

#[cfg(any(test, feature = "std"))]
pub use self::host::HostPlatform;

#[cfg(any(test, feature = "std"))]
mod host {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use std::time::{Instant, SystemTime, UNIX_EPOCH};

    use super::Platform;
    use crate::constants::WINDOWS_TO_UNIX_EPOCH;

    static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

    std::thread_local! {
        static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter rate of the user-mode platform, same as QPC on most hosts
    const HOST_FREQUENCY: u64 = 10_000_000;

    /// User-mode platform: `Instant` in 100ns ticks as the counter.
    pub struct HostPlatform {
        origin: OnceLock<Instant>,
    }

    impl HostPlatform {
        pub const fn new() -> Self {
            Self {
                origin: OnceLock::new(),
            }
        }
    }

    impl Default for HostPlatform {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Platform for HostPlatform {
        fn current_thread_id(&self) -> usize {
            THREAD_ID.with(|id| *id)
        }

        fn performance_counter(&self) -> u64 {
            // Start at one so the first reading is never zero
            let origin = self.origin.get_or_init(Instant::now);
            (origin.elapsed().as_nanos() / 100) as u64 + 1
        }

        fn performance_frequency(&self) -> u64 {
            HOST_FREQUENCY
        }

        fn system_time(&self) -> u64 {
            let since_unix = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            WINDOWS_TO_UNIX_EPOCH + (since_unix.as_nanos() / 100) as u64
        }
    }
}

//! High-resolution and wall-clock time.
//!
//! `gethrtime` has a machine-dependent origin (the first call), so it is
//! only useful for intervals. `gethrestime` is calendar time.

use alloc::sync::Arc;

use crate::constants::{NANOSEC, WINDOWS_TO_UNIX_EPOCH};
use crate::error::SplError;
use crate::platform::Platform;
use crate::Spinlock;

/// Solaris `lbolt` ticks per second
const LBOLT_HZ_DIVISOR: u64 = 10_000_000 / 119;

/// Calendar time split into seconds and nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

#[derive(Clone, Copy)]
struct Calibration {
    start: u64,
    /// Nanoseconds per counter tick
    scale: u64,
}

/// Counter to nanosecond translation, calibrated on first use.
pub struct HrClock {
    platform: Arc<dyn Platform>,
    calibration: Spinlock<Option<Calibration>>,
}

impl HrClock {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            calibration: Spinlock::new(None),
        }
    }

    /// Calibrate now, reporting a counter frequency the clock cannot use.
    ///
    /// Later calls are no-ops. The frequency must be below one tick per
    /// nanosecond, otherwise the integer scale would be zero.
    pub fn try_calibrate(&self) -> Result<(), SplError> {
        let mut calibration = self.calibration.lock();
        if calibration.is_some() {
            return Ok(());
        }

        let freq = self.platform.performance_frequency();
        if freq == 0 || freq >= NANOSEC {
            return Err(SplError::BadFrequency(freq));
        }

        *calibration = Some(Calibration {
            start: self.platform.performance_counter(),
            scale: NANOSEC / freq,
        });
        Ok(())
    }

    fn calibration(&self) -> Calibration {
        if let Some(calibration) = *self.calibration.lock() {
            return calibration;
        }

        if let Err(err) = self.try_calibrate() {
            log::warn!("hrtime: {}, assuming 1 tick per microsecond", err);
            let mut calibration = self.calibration.lock();
            calibration.get_or_insert(Calibration {
                start: self.platform.performance_counter(),
                scale: 1_000,
            });
        }

        // Calibrated by one of the branches above
        let calibration = *self.calibration.lock();
        calibration.unwrap_or(Calibration { start: 0, scale: 1 })
    }

    /// Nanoseconds since the first call.
    pub fn gethrtime(&self) -> u64 {
        let Calibration { start, scale } = self.calibration();
        let now = self.platform.performance_counter();
        now.saturating_sub(start).saturating_mul(scale)
    }

    /// Solaris clock ticks derived from `gethrtime`.
    pub fn lbolt(&self) -> u64 {
        self.gethrtime() / 100 / LBOLT_HZ_DIVISOR
    }

    /// Current calendar time.
    pub fn gethrestime(&self) -> Timespec {
        windows_to_unix(self.platform.system_time())
    }

    /// Current calendar time, whole seconds only.
    pub fn gethrestime_sec(&self) -> i64 {
        self.gethrestime().sec
    }
}

/// Convert 100ns intervals since 1601 to a Unix `Timespec`.
pub fn windows_to_unix(filetime: u64) -> Timespec {
    let delta = filetime as i128 - WINDOWS_TO_UNIX_EPOCH as i128;
    let sec = delta.div_euclid(10_000_000) as i64;
    let nsec = (delta.rem_euclid(10_000_000) * 100) as u32;
    Timespec { sec, nsec }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct FakeClock {
        counter: AtomicU64,
        freq: u64,
        filetime: u64,
    }

    impl FakeClock {
        fn new(freq: u64) -> Arc<Self> {
            Arc::new(Self {
                counter: AtomicU64::new(5_000),
                freq,
                filetime: WINDOWS_TO_UNIX_EPOCH + 15_000_000,
            })
        }

        fn advance(&self, ticks: u64) {
            self.counter.fetch_add(ticks, Ordering::SeqCst);
        }
    }

    impl Platform for FakeClock {
        fn current_thread_id(&self) -> usize {
            7
        }

        fn performance_counter(&self) -> u64 {
            self.counter.load(Ordering::SeqCst)
        }

        fn performance_frequency(&self) -> u64 {
            self.freq
        }

        fn system_time(&self) -> u64 {
            self.filetime
        }
    }

    #[test]
    fn hrtime_starts_at_first_use_and_scales() {
        let fake = FakeClock::new(10_000_000);
        let clock = HrClock::new(fake.clone());

        assert_eq!(clock.gethrtime(), 0);
        fake.advance(25);
        assert_eq!(clock.gethrtime(), 2_500);
    }

    #[test]
    fn hrtime_is_monotonic() {
        let clock = HrClock::new(Arc::new(crate::platform::HostPlatform::new()));
        let first = clock.gethrtime();
        let second = clock.gethrtime();
        assert!(second >= first);
    }

    #[test]
    fn calibration_rejects_unusable_frequency() {
        let clock = HrClock::new(FakeClock::new(NANOSEC));
        assert_eq!(clock.try_calibrate(), Err(SplError::BadFrequency(NANOSEC)));

        let clock = HrClock::new(FakeClock::new(0));
        assert_eq!(clock.try_calibrate(), Err(SplError::BadFrequency(0)));
    }

    #[test]
    fn bad_frequency_falls_back_instead_of_dividing_by_zero() {
        let fake = FakeClock::new(0);
        let clock = HrClock::new(fake.clone());
        assert_eq!(clock.gethrtime(), 0);
        fake.advance(3);
        assert_eq!(clock.gethrtime(), 3_000);
    }

    #[test]
    fn lbolt_counts_solaris_ticks() {
        let fake = FakeClock::new(10_000_000);
        let clock = HrClock::new(fake.clone());
        clock.gethrtime();
        // One second worth of ticks
        fake.advance(10_000_000);
        assert_eq!(clock.lbolt(), NANOSEC / 100 / LBOLT_HZ_DIVISOR);
    }

    #[test]
    fn wall_clock_converts_from_1601_epoch() {
        let clock = HrClock::new(FakeClock::new(10_000_000));
        assert_eq!(clock.gethrestime(), Timespec { sec: 1, nsec: 500_000_000 });
        assert_eq!(clock.gethrestime_sec(), 1);
    }

    #[test]
    fn filetime_before_unix_epoch_is_negative() {
        let ts = windows_to_unix(WINDOWS_TO_UNIX_EPOCH - 5_000_000);
        assert_eq!(ts, Timespec { sec: -1, nsec: 500_000_000 });
    }
}

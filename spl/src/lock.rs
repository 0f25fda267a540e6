//! Locks the porting layer is built on.
//!
//! - `Spinlock` - busy-wait lock for the debug log and other leaf state
//!   that may be touched from any execution context. Never sleeps.
//! - `TicketLock` - FIFO mutex for the mount list.
//! - `RwLock` - shared/exclusive lock for the global mount gate.
//!
//! `TicketLock` and `RwLock` may be held across a whole mount or unmount,
//! so their waiters park on a `WaitQueue` instead of spinning. On the host
//! build the queue sleeps on a condition variable; without `std` there is
//! nothing to sleep on and waiters fall back to spinning.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[cfg(any(test, feature = "std"))]
use std::sync::{Condvar, Mutex, PoisonError};

/// Polls before a waiter parks; most holds are short
const SPINS_BEFORE_PARK: u32 = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// SPINLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Busy-wait lock for state shared with non-blocking contexts.
///
/// Code holding a `Spinlock` must not block, allocate, or take another lock.
///
/// # Example
///
/// ```
/// use spl::Spinlock;
///
/// static DROPPED_LINES: Spinlock<u64> = Spinlock::new(0);
///
/// fn note_dropped() {
///     *DROPPED_LINES.lock() += 1;
/// }
/// ```
pub struct Spinlock<T> {
    held: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: `data` is only reached through a guard
unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        SpinlockGuard {
            lock: self,
            _pinned: PhantomData,
        }
    }
}

/// Held `Spinlock`; unlocks on drop.
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
    // Released by the context that took it
    _pinned: PhantomData<*const ()>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard is the only accessor while it lives
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAIT QUEUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Where `TicketLock` and `RwLock` waiters sleep until a holder lets go.
///
/// A waiter rechecks its condition while holding `sleepers`, and a waker
/// takes `sleepers` after changing lock state, so a wakeup cannot slip in
/// between the check and the sleep.
struct WaitQueue {
    /// Number of threads asleep on `wakeup`
    #[cfg(any(test, feature = "std"))]
    sleepers: Mutex<usize>,
    #[cfg(any(test, feature = "std"))]
    wakeup: Condvar,
}

impl WaitQueue {
    const fn new() -> Self {
        Self {
            #[cfg(any(test, feature = "std"))]
            sleepers: Mutex::new(0),
            #[cfg(any(test, feature = "std"))]
            wakeup: Condvar::new(),
        }
    }

    /// Return once `ready` has returned true.
    fn wait_until(&self, mut ready: impl FnMut() -> bool) {
        for _ in 0..SPINS_BEFORE_PARK {
            if ready() {
                return;
            }
            spin_loop();
        }

        #[cfg(any(test, feature = "std"))]
        {
            let mut sleepers = self.sleepers.lock().unwrap_or_else(PoisonError::into_inner);
            while !ready() {
                *sleepers += 1;
                sleepers = self
                    .wakeup
                    .wait(sleepers)
                    .unwrap_or_else(PoisonError::into_inner);
                *sleepers -= 1;
            }
        }

        #[cfg(not(any(test, feature = "std")))]
        while !ready() {
            spin_loop();
        }
    }

    /// Wake every sleeper so each can recheck its condition.
    fn wake_all(&self) {
        #[cfg(any(test, feature = "std"))]
        {
            let sleepers = self.sleepers.lock().unwrap_or_else(PoisonError::into_inner);
            if *sleepers > 0 {
                self.wakeup.notify_all();
            }
        }
    }

    #[cfg(test)]
    fn sleepers(&self) -> usize {
        *self.sleepers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TICKET LOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// FIFO mutex: each caller draws a ticket and waits until it is served, so
/// mount and unmount paths reach the mount list in arrival order.
pub struct TicketLock<T> {
    next_ticket: AtomicU32,
    serving: AtomicU32,
    queue: WaitQueue,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for TicketLock<T> {}
unsafe impl<T: Send> Send for TicketLock<T> {}

impl<T> TicketLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            serving: AtomicU32::new(0),
            queue: WaitQueue::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> TicketLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.queue
            .wait_until(|| self.serving.load(Ordering::Acquire) == ticket);
        TicketLockGuard { lock: self }
    }
}

/// Held `TicketLock`; serves the next ticket on drop.
pub struct TicketLockGuard<'a, T> {
    lock: &'a TicketLock<T>,
}

impl<T> Deref for TicketLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for TicketLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for TicketLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.serving.fetch_add(1, Ordering::Release);
        self.lock.queue.wake_all();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// READER-WRITER LOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// `holders` value while a writer is inside
const EXCLUSIVE: u32 = u32::MAX;

/// Shared/exclusive lock; the mount gate is an `RwLock<()>`.
///
/// Writers are preferred: while one is waiting, new readers wait behind it.
/// There is no in-place upgrade; a reader that wants exclusive access drops
/// its guard and calls `write`.
///
/// # Example
///
/// ```
/// use spl::RwLock;
///
/// static MOUNT_NAMES: RwLock<Vec<&str>> = RwLock::new(Vec::new());
///
/// fn mounted() -> usize {
///     MOUNT_NAMES.read().len()
/// }
///
/// fn mount(name: &'static str) {
///     MOUNT_NAMES.write().push(name);
/// }
/// ```
pub struct RwLock<T> {
    /// Reader count, or `EXCLUSIVE`
    holders: AtomicU32,
    writers_waiting: AtomicU32,
    queue: WaitQueue,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send + Sync> Sync for RwLock<T> {}
unsafe impl<T: Send> Send for RwLock<T> {}

impl<T> RwLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            holders: AtomicU32::new(0),
            writers_waiting: AtomicU32::new(0),
            queue: WaitQueue::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Shared access, waiting out any writer that holds or wants the lock.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.queue.wait_until(|| self.enter_shared());
        RwLockReadGuard { lock: self }
    }

    /// Shared access unless a writer holds or wants the lock.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.enter_shared().then(|| RwLockReadGuard { lock: self })
    }

    /// Exclusive access once every holder has left.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.writers_waiting.fetch_add(1, Ordering::Relaxed);
        self.queue.wait_until(|| self.enter_exclusive());
        self.writers_waiting.fetch_sub(1, Ordering::Relaxed);
        RwLockWriteGuard { lock: self }
    }

    /// Exclusive access only if nobody holds the lock.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.enter_exclusive()
            .then(|| RwLockWriteGuard { lock: self })
    }

    /// True when nobody holds or waits for exclusive access.
    pub fn is_idle(&self) -> bool {
        self.holders.load(Ordering::Relaxed) == 0
            && self.writers_waiting.load(Ordering::Relaxed) == 0
    }

    fn enter_shared(&self) -> bool {
        if self.writers_waiting.load(Ordering::Relaxed) != 0 {
            return false;
        }
        self.holders
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |holders| {
                (holders < EXCLUSIVE - 1).then_some(holders + 1)
            })
            .is_ok()
    }

    fn enter_exclusive(&self) -> bool {
        self.holders
            .compare_exchange(0, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

/// Shared hold on an `RwLock`
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        // The last reader out lets a waiting writer in
        if self.lock.holders.fetch_sub(1, Ordering::Release) == 1 {
            self.lock.queue.wake_all();
        }
    }
}

/// Exclusive hold on an `RwLock`
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.holders.store(0, Ordering::Release);
        self.lock.queue.wake_all();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

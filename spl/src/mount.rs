//! Mount-list registry and the global VFS busy gate.
//!
//! Every mounted filesystem instance is registered here for the lifetime
//! of the mount. Two locks are involved and they are independent:
//!
//! - the **list mutex** (`TicketLock`) serializes add/remove/iteration of
//!   the list itself, in arrival order;
//! - the **gate** (`RwLock`) is the "a structural mount-table operation is
//!   in progress" lock. Normal operations hold it shared, mount/unmount hold
//!   it exclusive. It is global, not per mount.
//!
//! Both are sleeping locks on the host build: a blocking `acquire` parks
//! the caller for as long as the gate is held.
//!
//! Iteration does not take the gate, so a snapshot is only consistent with
//! respect to other list mutations.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::ops::ControlFlow;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::error::{FatalReason, SplError};
use crate::{RwLock, RwLockReadGuard, RwLockWriteGuard, Spinlock, TicketLock};

bitflags! {
    /// Per-mount state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MountFlags: u64 {
        const RDONLY      = 0x0000_0001;
        const SYNCHRONOUS = 0x0000_0002;
        const NOEXEC      = 0x0000_0004;
        const NOSUID      = 0x0000_0008;
        const NODEV       = 0x0000_0010;
        const ASYNC       = 0x0000_0040;
        const LOCAL       = 0x0000_1000;
        const UPDATE      = 0x0001_0000;
        const FORCE       = 0x0008_0000;
        /// Unmount has started; new work must be refused
        const UNMOUNTING  = 0x4000_0000;
        /// Read-only mount waiting to be re-mounted read-write
        const WANTRDWR    = 0x8000_0000;
    }
}

/// One mounted filesystem instance.
///
/// Owned by the mount path; the registry only keeps a shared reference
/// while the entry is registered. Flag and private-data accessors do not
/// serialize against each other. Callers must own the entry (mount/unmount
/// thread, or the gate held exclusively) before changing it.
pub struct MountEntry {
    name: String,
    flags: AtomicU64,
    fs_private: Spinlock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl MountEntry {
    pub fn new(name: &str, flags: MountFlags) -> Arc<Self> {
        Arc::new(Self {
            name: String::from(name),
            flags: AtomicU64::new(flags.bits()),
            fs_private: Spinlock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> MountFlags {
        MountFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: MountFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub fn clear_flags(&self, flags: MountFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    pub fn is_read_only(&self) -> bool {
        self.flags().contains(MountFlags::RDONLY)
    }

    pub fn set_read_only(&self) {
        self.set_flags(MountFlags::RDONLY);
    }

    pub fn clear_read_only(&self) {
        self.clear_flags(MountFlags::RDONLY);
    }

    pub fn is_unmounting(&self) -> bool {
        self.flags().contains(MountFlags::UNMOUNTING)
    }

    /// Read-only mount with a pending read-write upgrade.
    pub fn is_write_upgrade(&self) -> bool {
        self.flags()
            .contains(MountFlags::RDONLY | MountFlags::WANTRDWR)
    }

    /// Filesystem-private data, if set and of type `T`.
    pub fn fs_private<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let private = self.fs_private.lock().clone()?;
        private.downcast::<T>().ok()
    }

    /// Replace the filesystem-private data, returning the previous value.
    pub fn set_fs_private(
        &self,
        data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        core::mem::replace(&mut *self.fs_private.lock(), data)
    }
}

impl fmt::Debug for MountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountEntry")
            .field("name", &self.name)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// How the gate is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Shared,
    Exclusive,
}

enum Held<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

/// A hold on the mount gate, released on drop or by `release`.
#[must_use = "dropping a GateHold releases the mount gate"]
pub struct GateHold<'a> {
    gate: &'a RwLock<()>,
    held: Held<'a>,
}

impl<'a> GateHold<'a> {
    fn acquire(gate: &'a RwLock<()>, mode: GateMode, nowait: bool) -> Result<Self, SplError> {
        let held = match (mode, nowait) {
            (GateMode::Shared, false) => Held::Shared(gate.read()),
            (GateMode::Exclusive, false) => Held::Exclusive(gate.write()),
            (GateMode::Shared, true) => Held::Shared(gate.try_read().ok_or(SplError::Busy)?),
            (GateMode::Exclusive, true) => {
                Held::Exclusive(gate.try_write().ok_or(SplError::Busy)?)
            }
        };
        Ok(Self { gate, held })
    }

    pub fn mode(&self) -> GateMode {
        match self.held {
            Held::Shared(_) => GateMode::Shared,
            Held::Exclusive(_) => GateMode::Exclusive,
        }
    }

    /// Convert a shared hold into an exclusive one.
    ///
    /// The gate has no atomic upgrade: the shared hold is dropped first and
    /// the gate is then acquired exclusively. Another party may take the
    /// gate in between, so anything observed under the shared hold must be
    /// revalidated. With `nowait` a failed upgrade returns `Busy` and the
    /// caller holds nothing. An exclusive hold is returned unchanged.
    pub fn upgrade(self, nowait: bool) -> Result<GateHold<'a>, SplError> {
        let GateHold { gate, held } = self;
        match held {
            Held::Exclusive(guard) => Ok(GateHold {
                gate,
                held: Held::Exclusive(guard),
            }),
            Held::Shared(guard) => {
                drop(guard);
                GateHold::acquire(gate, GateMode::Exclusive, nowait)
            }
        }
    }

    pub fn release(self) {}
}

/// Entries copied out by `MountRegistry::snapshot`
#[derive(Debug)]
pub struct MountSnapshot {
    pub entries: Vec<Arc<MountEntry>>,
    /// Registered entries that did not fit
    pub dropped: usize,
}

impl MountSnapshot {
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }
}

/// The mount list plus the global busy gate.
pub struct MountRegistry {
    gate: RwLock<()>,
    mounts: TicketLock<VecDeque<Arc<MountEntry>>>,
}

impl MountRegistry {
    /// Create the gate, the list and its mutex.
    pub fn init() -> Self {
        Self {
            gate: RwLock::new(()),
            mounts: TicketLock::new(VecDeque::new()),
        }
    }

    /// Tear the registry down.
    ///
    /// Every mount must have been removed and the gate released first;
    /// anything else is a fatal error.
    pub fn shutdown(self) -> Result<(), SplError> {
        let remaining = self.mounts.lock().len();
        if remaining != 0 {
            log::error!("spl_vfs_fini: {} mounts still registered", remaining);
            return Err(SplError::Fatal(FatalReason::MountsRemaining(remaining)));
        }
        if !self.gate.is_idle() {
            log::error!("spl_vfs_fini: mount gate still held");
            return Err(SplError::Fatal(FatalReason::GateHeld));
        }
        Ok(())
    }

    /// Register a mount at the head of the list.
    pub fn add(&self, entry: Arc<MountEntry>) {
        let mut mounts = self.mounts.lock();
        debug_assert!(
            !mounts.iter().any(|m| Arc::ptr_eq(m, &entry)),
            "mount {} registered twice",
            entry.name()
        );
        log::debug!("vfs_mount_add: {}", entry.name());
        mounts.push_front(entry);
    }

    /// Unregister a mount by identity. Returns false if it was not listed.
    pub fn remove(&self, entry: &Arc<MountEntry>) -> bool {
        let mut mounts = self.mounts.lock();
        match mounts.iter().position(|m| Arc::ptr_eq(m, entry)) {
            Some(index) => {
                mounts.remove(index);
                log::debug!("vfs_mount_remove: {}", entry.name());
                true
            }
            None => false,
        }
    }

    /// Number of registered mounts; stale as soon as it is returned.
    pub fn count(&self) -> usize {
        self.mounts.lock().len()
    }

    /// Copy up to `max` entries in list order.
    pub fn snapshot(&self, max: usize) -> MountSnapshot {
        let mounts = self.mounts.lock();
        let entries: Vec<_> = mounts.iter().take(max).cloned().collect();
        MountSnapshot {
            dropped: mounts.len() - entries.len(),
            entries,
        }
    }

    /// Visit entries in list order until the visitor breaks.
    ///
    /// Runs under the list mutex: the visitor must not call back into the
    /// registry. Returns true if the visitor stopped the walk early.
    pub fn for_each<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&Arc<MountEntry>) -> ControlFlow<()>,
    {
        let mounts = self.mounts.lock();
        mounts.iter().any(|entry| visitor(entry).is_break())
    }

    /// Take the gate. With `nowait` an unavailable gate returns `Busy`.
    pub fn acquire(&self, mode: GateMode, nowait: bool) -> Result<GateHold<'_>, SplError> {
        GateHold::acquire(&self.gate, mode, nowait)
    }

    /// Give back a hold taken with `acquire`.
    pub fn release(&self, hold: GateHold<'_>) {
        debug_assert!(core::ptr::eq(hold.gate, &self.gate), "hold from another registry");
        hold.release();
    }
}

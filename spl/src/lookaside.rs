//! Fixed-size block caches ("lookaside lists").
//!
//! A cache hands out blocks of one size and keeps a bounded number of
//! freed blocks for reuse. Counters follow the pool: a block parked on the
//! free list is still an active allocation.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use linked_list_allocator::LockedHeap;

use crate::error::SplError;
use crate::Spinlock;

/// Longest cache name kept
const CACHE_NAME_LEN: usize = 31;
/// Freed blocks parked per cache before they go back to the pool
const FREE_LIST_DEPTH: usize = 256;
/// Pool allocation alignment on 64-bit Windows
const BLOCK_ALIGN: usize = 16;

static NEXT_CACHE_ID: AtomicUsize = AtomicUsize::new(1);

/// Backing allocator of a cache
pub trait PoolAllocator: Send + Sync {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

impl PoolAllocator for LockedHeap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.lock().allocate_first_fit(layout).ok()
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.lock().deallocate(ptr, layout);
    }
}

/// The global allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalPool;

impl PoolAllocator for GlobalPool {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // Safety: non-zero size checked above
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

impl<T: PoolAllocator + ?Sized> PoolAllocator for &T {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

impl<T: PoolAllocator + ?Sized> PoolAllocator for Arc<T> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

/// Counters published for each cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookasideStats {
    /// Pool allocations not yet returned to the pool
    pub active_allocations: u64,
    /// Pool allocations ever made
    pub total_alloc: u64,
    /// Blocks ever returned to the pool
    pub total_free: u64,
    pub chunk_size: usize,
}

/// A block handed out by a `LookasideCache`.
///
/// Must be given back with `LookasideCache::free`; dropping it leaks.
#[must_use = "blocks must be returned with LookasideCache::free"]
pub struct LookasideBlock {
    ptr: NonNull<u8>,
    len: usize,
    cache_id: usize,
}

// Safety: the block is exclusively owned memory
unsafe impl Send for LookasideBlock {}

impl LookasideBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: initialized when first taken from the pool, owned by us
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above, and `&mut self` makes the access unique
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

struct FreeBlock(NonNull<u8>);

// Safety: parked blocks are only touched under the free-list lock
unsafe impl Send for FreeBlock {}

pub struct LookasideCache<A: PoolAllocator> {
    id: usize,
    name: String,
    layout: Layout,
    allocator: A,
    free_list: Spinlock<Vec<FreeBlock>>,
    active: AtomicU64,
    total_alloc: AtomicU64,
    total_free: AtomicU64,
}

impl<A: PoolAllocator> LookasideCache<A> {
    /// Create a cache of `chunk_size`-byte blocks drawn from `allocator`.
    pub fn create(name: &str, chunk_size: usize, allocator: A) -> Result<Self, SplError> {
        if chunk_size == 0 {
            return Err(SplError::InvalidArgument);
        }
        let layout =
            Layout::from_size_align(chunk_size, BLOCK_ALIGN).map_err(|_| SplError::InvalidArgument)?;

        let mut free_list = Vec::new();
        free_list
            .try_reserve_exact(FREE_LIST_DEPTH)
            .map_err(|_| SplError::OutOfMemory)?;

        let name = match name.char_indices().nth(CACHE_NAME_LEN) {
            Some((cut, _)) => &name[..cut],
            None => name,
        };

        log::debug!("lookaside: created {} ({} bytes)", name, chunk_size);
        Ok(Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            name: String::from(name),
            layout,
            allocator,
            free_list: Spinlock::new(free_list),
            active: AtomicU64::new(0),
            total_alloc: AtomicU64::new(0),
            total_free: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chunk_size(&self) -> usize {
        self.layout.size()
    }

    /// Take a block, reusing a parked one when available.
    pub fn alloc(&self) -> Result<LookasideBlock, SplError> {
        let parked = self.free_list.lock().pop();
        let ptr = match parked {
            Some(FreeBlock(ptr)) => ptr,
            None => {
                let ptr = self
                    .allocator
                    .allocate(self.layout)
                    .ok_or(SplError::OutOfMemory)?;
                // Safety: fresh allocation of layout.size() bytes
                unsafe { ptr.as_ptr().write_bytes(0, self.layout.size()) };
                self.active.fetch_add(1, Ordering::Relaxed);
                self.total_alloc.fetch_add(1, Ordering::Relaxed);
                ptr
            }
        };

        Ok(LookasideBlock {
            ptr,
            len: self.layout.size(),
            cache_id: self.id,
        })
    }

    /// Give a block back. Blocks from another cache are refused and leaked.
    pub fn free(&self, block: LookasideBlock) -> Result<(), SplError> {
        if block.cache_id != self.id {
            log::error!("lookaside {}: block from another cache", self.name);
            return Err(SplError::ForeignBlock);
        }

        {
            let mut free_list = self.free_list.lock();
            if free_list.len() < FREE_LIST_DEPTH {
                free_list.push(FreeBlock(block.ptr));
                return Ok(());
            }
        }

        // Safety: allocated by this cache's allocator with self.layout
        unsafe { self.release_to_pool(block.ptr) };
        Ok(())
    }

    pub fn stats(&self) -> LookasideStats {
        LookasideStats {
            active_allocations: self.active.load(Ordering::Relaxed),
            total_alloc: self.total_alloc.load(Ordering::Relaxed),
            total_free: self.total_free.load(Ordering::Relaxed),
            chunk_size: self.layout.size(),
        }
    }

    /// Return parked blocks to the pool and drop the cache.
    pub fn destroy(self) {
        drop(self);
    }

    unsafe fn release_to_pool(&self, ptr: NonNull<u8>) {
        self.allocator.deallocate(ptr, self.layout);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.total_free.fetch_add(1, Ordering::Relaxed);
    }
}

impl<A: PoolAllocator> Drop for LookasideCache<A> {
    fn drop(&mut self) {
        let parked = core::mem::take(&mut *self.free_list.lock());
        for FreeBlock(ptr) in parked {
            // Safety: parked blocks came from this cache's allocator
            unsafe { self.release_to_pool(ptr) };
        }

        let outstanding = self.active.load(Ordering::Relaxed);
        if outstanding != 0 {
            log::warn!(
                "lookaside {}: destroyed with {} blocks outstanding",
                self.name,
                outstanding
            );
        }
    }
}

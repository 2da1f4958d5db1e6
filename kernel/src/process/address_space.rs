//! Shared user address spaces.
//!
//! A process owns one [`AddressSpace`]; threads created by it hold further
//! references to the same one. The memory subsystem gets the space back when
//! the last reference is released.

use alloc::sync::Arc;
use spin::Mutex;

use crate::arch::MemoryManager;
use crate::error::{ProcError, Result};

struct Region<S> {
    space: S,
    size: usize,
}

/// Reference-counted handle to a user address space and its size.
pub struct AddressSpace<M: MemoryManager> {
    region: Mutex<Region<M::Space>>,
}

impl<M: MemoryManager> AddressSpace<M> {
    /// Wrap a freshly allocated space.
    pub fn new(space: M::Space, size: usize) -> Arc<Self> {
        Arc::new(AddressSpace {
            region: Mutex::new(Region { space, size }),
        })
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.region.lock().size
    }

    /// Grow or shrink by `delta` bytes, returning `(old_size, new_size)`.
    pub fn resize(&self, mm: &M, delta: isize) -> Result<(usize, usize)> {
        let mut region = self.region.lock();
        let old = region.size;
        let new = old
            .checked_add_signed(delta)
            .ok_or(ProcError::InvalidArgument)?;
        if new != old {
            let Region { space, size } = &mut *region;
            *size = mm.resize(space, old, new)?;
        }
        Ok((old, region.size))
    }

    /// Copy the space into a new, independently owned one.
    pub fn duplicate(&self, mm: &M) -> Result<Arc<Self>> {
        let region = self.region.lock();
        let copy = mm.duplicate(&region.space, region.size)?;
        Ok(AddressSpace::new(copy, region.size))
    }

    /// Run `f` with the space locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut M::Space, usize) -> R) -> R {
        let mut region = self.region.lock();
        let Region { space, size } = &mut *region;
        f(space, *size)
    }

    /// Drop one reference, handing the space back to `mm` if it was the last.
    ///
    /// Returns `true` when the space was released.
    pub fn release(this: Arc<Self>, mm: &M) -> bool {
        match Arc::into_inner(this) {
            Some(space) => {
                let Region { space, size } = space.region.into_inner();
                mm.release(space, size);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMemory {
        released: AtomicUsize,
        limit: usize,
    }

    impl MemoryManager for CountingMemory {
        type Space = usize;

        fn allocate(&self, size: usize) -> Result<usize> {
            Ok(size)
        }

        fn duplicate(&self, src: &usize, _size: usize) -> Result<usize> {
            Ok(*src)
        }

        fn resize(&self, space: &mut usize, _old: usize, new: usize) -> Result<usize> {
            if new > self.limit {
                return Err(ProcError::ResourceExhausted);
            }
            *space = new;
            Ok(new)
        }

        fn release(&self, _space: usize, _size: usize) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn memory() -> CountingMemory {
        CountingMemory { released: AtomicUsize::new(0), limit: 8192 }
    }

    #[test]
    fn test_released_once_by_last_holder() {
        let mm = memory();
        let space = AddressSpace::<CountingMemory>::new(4096, 4096);
        let shared = space.clone();

        assert!(!AddressSpace::release(space, &mm));
        assert_eq!(mm.released.load(Ordering::SeqCst), 0);
        assert!(AddressSpace::release(shared, &mm));
        assert_eq!(mm.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resize_reports_old_and_new() {
        let mm = memory();
        let space = AddressSpace::<CountingMemory>::new(4096, 4096);

        assert_eq!(space.resize(&mm, 1024), Ok((4096, 5120)));
        assert_eq!(space.resize(&mm, -5120), Ok((5120, 0)));
        assert_eq!(space.resize(&mm, -1), Err(ProcError::InvalidArgument));
        assert_eq!(space.resize(&mm, 10_000), Err(ProcError::ResourceExhausted));
        assert_eq!(space.size(), 0);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mm = memory();
        let space = AddressSpace::<CountingMemory>::new(4096, 4096);
        let copy = space.duplicate(&mm).unwrap();

        space.resize(&mm, 4096).unwrap();
        assert_eq!(copy.size(), 4096);
        assert_eq!(space.size(), 8192);
    }
}

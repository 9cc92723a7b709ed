// SPDX-License-Identifier: CEPL-1.0
//! Bump arena for short-lived build data.
//!
//! Memory is handed out through a [`Checkpoint`]; everything allocated through
//! a checkpoint is released in one step when it is dropped. Checkpoints nest
//! strictly: only the innermost open checkpoint may allocate or be released.
//! Misuse (exhaustion, out-of-order release) panics.

use std::cell::{Cell, UnsafeCell};
use std::ffi::CStr;
use std::mem::{align_of, size_of, MaybeUninit};

pub const DEFAULT_SCRATCH_BYTES: usize = 64 * 1024;

pub struct ScratchArena {
    storage: Box<[UnsafeCell<MaybeUninit<u8>>]>,
    top: Cell<usize>,
    depth: Cell<usize>,
    high_water: Cell<usize>,
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_BYTES)
    }
}

impl std::fmt::Debug for ScratchArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchArena")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .field("depth", &self.depth.get())
            .finish()
    }
}

impl ScratchArena {
    pub fn with_capacity(bytes: usize) -> Self {
        let storage = (0..bytes)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            storage,
            top: Cell::new(0),
            depth: Cell::new(0),
            high_water: Cell::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn in_use(&self) -> usize {
        self.top.get()
    }

    /// Largest number of bytes ever in use at once.
    pub fn high_water(&self) -> usize {
        self.high_water.get()
    }

    /// Open a nested checkpoint. Allocations made through it are released
    /// when it drops.
    pub fn checkpoint(&self) -> Checkpoint<'_> {
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        Checkpoint {
            arena: self,
            mark: self.top.get(),
            depth,
        }
    }

    fn base(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    fn bump(&self, size: usize, align: usize) -> *mut u8 {
        let base = self.base() as usize;
        let start = (base + self.top.get()).next_multiple_of(align) - base;
        let end = start
            .checked_add(size)
            .expect("scratch allocation size overflow");
        assert!(
            end <= self.capacity(),
            "scratch arena exhausted: need {end} of {} bytes",
            self.capacity()
        );
        self.top.set(end);
        if end > self.high_water.get() {
            self.high_water.set(end);
        }
        // SAFETY: start <= end <= capacity, so the offset stays in bounds.
        unsafe { self.base().add(start) }
    }
}

pub struct Checkpoint<'a> {
    arena: &'a ScratchArena,
    mark: usize,
    depth: usize,
}

impl Checkpoint<'_> {
    fn assert_innermost(&self) {
        assert_eq!(
            self.arena.depth.get(),
            self.depth,
            "scratch checkpoint used while a nested checkpoint is open"
        );
    }

    /// Bytes allocated through this checkpoint (and padding).
    pub fn used(&self) -> usize {
        self.arena.top.get() - self.mark
    }

    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> &[T] {
        self.assert_innermost();
        if src.is_empty() {
            return &[];
        }
        let ptr = self.arena.bump(size_of::<T>() * src.len(), align_of::<T>()) as *mut T;
        // SAFETY: `bump` returned an aligned region of the right size that no
        // live reference overlaps (everything above `top` is unused).
        unsafe {
            ptr.copy_from_nonoverlapping(src.as_ptr(), src.len());
            std::slice::from_raw_parts(ptr, src.len())
        }
    }

    pub fn alloc_iter<T, I>(&self, iter: I) -> &[T]
    where
        T: Copy,
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        self.assert_innermost();
        let iter = iter.into_iter();
        let len = iter.len();
        if len == 0 {
            return &[];
        }
        let ptr = self.arena.bump(size_of::<T>() * len, align_of::<T>()) as *mut T;
        let mut written = 0;
        for item in iter.take(len) {
            // SAFETY: written < len, inside the region reserved above.
            unsafe { ptr.add(written).write(item) };
            written += 1;
        }
        assert_eq!(written, len, "iterator reported a wrong length");
        // SAFETY: all `len` slots were initialised.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    /// Copy `s` into the arena with a trailing nul. `None` if `s` contains a
    /// nul byte.
    pub fn alloc_cstr(&self, s: &str) -> Option<&CStr> {
        self.assert_innermost();
        if s.as_bytes().contains(&0) {
            return None;
        }
        let len = s.len() + 1;
        let ptr = self.arena.bump(len, 1);
        // SAFETY: `len` bytes were reserved; the copy plus the terminator fill
        // them, and the source has no interior nul.
        unsafe {
            ptr.copy_from_nonoverlapping(s.as_ptr(), s.len());
            ptr.add(s.len()).write(0);
            Some(CStr::from_bytes_with_nul_unchecked(
                std::slice::from_raw_parts(ptr, len),
            ))
        }
    }
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.assert_innermost();
        }
        self.arena.top.set(self.mark);
        self.arena.depth.set(self.depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_restores_top() {
        let arena = ScratchArena::with_capacity(256);
        {
            let cp = arena.checkpoint();
            let xs = cp.alloc_slice_copy(&[1u32, 2, 3]);
            assert_eq!(xs, &[1, 2, 3]);
            assert!(arena.in_use() >= 12);
        }
        assert_eq!(arena.in_use(), 0);
        assert!(arena.high_water() >= 12);
    }

    #[test]
    fn alignment_is_respected() {
        let arena = ScratchArena::with_capacity(256);
        let cp = arena.checkpoint();
        let _ = cp.alloc_slice_copy(&[1u8]);
        let wide = cp.alloc_slice_copy(&[7u64, 9]);
        assert_eq!(wide.as_ptr() as usize % align_of::<u64>(), 0);
        assert_eq!(wide, &[7, 9]);
    }

    #[test]
    fn cstr_rejects_interior_nul() {
        let arena = ScratchArena::with_capacity(64);
        let cp = arena.checkpoint();
        assert!(cp.alloc_cstr("a\0b").is_none());
        assert_eq!(cp.alloc_cstr("VK_KHR_surface").unwrap().to_bytes(), b"VK_KHR_surface");
    }
}

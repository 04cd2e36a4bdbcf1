use std::alloc::Layout;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const BLOCK_SIZE: usize = 4096;

const ALIGN: usize = size_of::<*mut u8>();

/// Bump-pointer allocator. Memory handed out lives until the arena is dropped;
/// there is no way to free a single allocation.
pub struct Arena {
    // Allocation state
    alloc_ptr: *mut u8,
    alloc_bytes_remaining: usize,

    // Array of allocated memory blocks
    blocks: Vec<(*mut u8, usize)>,

    block_size: usize,
    memory_usage: MemoryUsage,
}

// The raw pointers are owned by the arena alone. Shared references only read `memory_usage`.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Arena::with_block_size(BLOCK_SIZE)
    }
}

impl Arena {
    pub fn with_block_size(block_size: usize) -> Arena {
        assert!(block_size >= 4 * ALIGN, "arena block size too small");
        Arena {
            alloc_ptr: std::ptr::null_mut(),
            alloc_bytes_remaining: 0,
            blocks: Vec::with_capacity(2),
            block_size,
            memory_usage: MemoryUsage::default(),
        }
    }

    /// Return a pointer to a newly allocated memory block of `bytes` bytes.
    pub fn allocate(&mut self, bytes: usize) -> *mut u8 {
        // The semantics of what to return are a bit messy if we allow
        // 0-byte allocations, so we disallow them here.
        debug_assert!(bytes > 0);
        if bytes <= self.alloc_bytes_remaining {
            let result = self.alloc_ptr;
            unsafe {
                self.alloc_ptr = self.alloc_ptr.add(bytes);
            }
            self.alloc_bytes_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(bytes)
    }

    /// Allocate memory aligned to the pointer size.
    pub fn allocate_aligned(&mut self, bytes: usize) -> *mut u8 {
        debug_assert!(bytes > 0);
        let current_mod = self.alloc_ptr as usize & (ALIGN - 1);
        let slop = if current_mod == 0 {
            0
        } else {
            ALIGN - current_mod
        };
        let needed = bytes + slop;
        let result = if needed <= self.alloc_bytes_remaining {
            unsafe {
                let result = self.alloc_ptr.add(slop);
                self.alloc_ptr = self.alloc_ptr.add(needed);
                self.alloc_bytes_remaining -= needed;
                result
            }
        } else {
            // allocate_fallback always returned aligned memory
            self.allocate_fallback(bytes)
        };
        debug_assert_eq!(result as usize & (ALIGN - 1), 0);
        result
    }

    /// Copy `data` into the arena and return the copy.
    ///
    /// # Safety
    ///
    /// The returned slice borrows arena memory without a lifetime;
    /// it must not be used after the arena is dropped.
    pub unsafe fn copy_from<'a>(&mut self, data: &[u8]) -> &'a [u8] {
        let ptr = self.allocate(data.len().max(1));
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        std::slice::from_raw_parts(ptr, data.len())
    }

    /// Total bytes held by the arena, including block bookkeeping.
    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.get()
    }

    /// A handle on the usage counter that can be read without access to the arena.
    pub fn memory_usage_handle(&self) -> MemoryUsage {
        self.memory_usage.clone()
    }

    fn allocate_fallback(&mut self, bytes: usize) -> *mut u8 {
        if bytes > self.block_size / 4 {
            // Object is more than a quarter of our block size.  Allocate it separately
            // to avoid wasting too much space in leftover bytes.
            return self.allocate_new_block(bytes);
        }

        // We waste the remaining space in the current block.
        self.alloc_ptr = self.allocate_new_block(self.block_size);
        self.alloc_bytes_remaining = self.block_size;

        let result = self.alloc_ptr;
        unsafe {
            self.alloc_ptr = self.alloc_ptr.add(bytes);
        }
        self.alloc_bytes_remaining -= bytes;
        result
    }

    fn allocate_new_block(&mut self, bytes: usize) -> *mut u8 {
        let layout = Self::layout_by_bytes(bytes);
        let alloc_ptr = unsafe { std::alloc::alloc(layout) };
        if alloc_ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        self.blocks.push((alloc_ptr, bytes));
        self.memory_usage.add(bytes + size_of::<*mut u8>());
        alloc_ptr
    }

    #[inline]
    fn layout_by_bytes(bytes: usize) -> Layout {
        Layout::from_size_align(bytes, ALIGN)
            .unwrap_or_else(|e| panic!("invalid arena block layout of {} bytes: {}", bytes, e))
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for &(ptr, bytes) in &self.blocks {
            unsafe {
                std::alloc::dealloc(ptr, Self::layout_by_bytes(bytes));
            }
        }
    }
}

/// Monotonic byte counter shared between an arena and its readers.
#[derive(Clone, Default, Debug)]
pub struct MemoryUsage(Arc<AtomicUsize>);

impl MemoryUsage {
    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }
}

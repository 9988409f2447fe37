//! Memory Management
//!
//! Allocation helpers and tracking registries for the runtime.
//!
//! ## Design
//!
//! Every runtime allocation goes through the `x*` helpers, which never
//! return null: allocator exhaustion prints a diagnostic and terminates the
//! process with exit code 123. There is no recovery path from a failed
//! allocation inside the runtime.
//!
//! Two registries back the raw-pointer surfaces:
//!
//! - the **heap registry** remembers the layout of every block handed out
//!   through the malloc upcall, so the free upcall can deallocate from a
//!   bare address;
//! - the **stack watch registry** records the live byte range of every proc
//!   stack body, standing in for an external memory checker. Registration
//!   is observable, which the stack tests rely on.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;

/// Machine word size in bytes.
pub const WORD: usize = std::mem::size_of::<usize>();

/// Alignment of blocks handed out through the malloc upcall.
const UPCALL_ALLOC_ALIGN: usize = 16;

/// Report allocator exhaustion and terminate. Bypasses the logger so the
/// line is emitted even when diagnostics are captured or disabled.
fn fatal_alloc(bytes: usize) -> ! {
    println!("rt: allocation of 0x{:x} bytes failed, exiting", bytes);
    std::process::exit(123);
}

/// Allocate uninitialized memory for `layout`, terminating on failure.
pub unsafe fn xalloc(layout: Layout) -> *mut u8 {
    let p = alloc::alloc(layout);
    if p.is_null() {
        fatal_alloc(layout.size());
    }
    p
}

/// Allocate zeroed memory for `layout`, terminating on failure.
pub unsafe fn xalloc_zeroed(layout: Layout) -> *mut u8 {
    let p = alloc::alloc_zeroed(layout);
    if p.is_null() {
        fatal_alloc(layout.size());
    }
    p
}

/// Grow or shrink `ptr` (allocated with `old_layout`) to `new_size` bytes,
/// terminating on failure.
pub unsafe fn xrealloc(ptr: *mut u8, old_layout: Layout, new_size: usize) -> *mut u8 {
    let p = alloc::realloc(ptr, old_layout, new_size);
    if p.is_null() {
        fatal_alloc(new_size);
    }
    p
}

/// Free memory allocated through one of the `x*` helpers.
pub unsafe fn xfree(ptr: *mut u8, layout: Layout) {
    alloc::dealloc(ptr, layout);
}

/// Layout for an array of `n` pointers, terminating on overflow.
pub fn ptr_array_layout(n: usize) -> Layout {
    match Layout::array::<*mut u8>(n) {
        Ok(l) => l,
        Err(_) => fatal_alloc(usize::MAX),
    }
}

// ============================================================================
// Heap registry (malloc/free upcalls)
// ============================================================================

/// Address → layout map for blocks handed out through the malloc upcall.
static HEAP: OnceLock<RwLock<HashMap<usize, Layout>>> = OnceLock::new();

fn heap_registry() -> &'static RwLock<HashMap<usize, Layout>> {
    HEAP.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Allocate `nbytes` on behalf of a proc and track the block.
pub fn heap_alloc(nbytes: usize) -> *mut u8 {
    let layout = match Layout::from_size_align(nbytes.max(1), UPCALL_ALLOC_ALIGN) {
        Ok(l) => l,
        Err(_) => fatal_alloc(nbytes),
    };
    let p = unsafe { xalloc(layout) };
    heap_registry().write().insert(p as usize, layout);
    p
}

/// Free a block previously handed out by [`heap_alloc`].
///
/// Panics on an address the registry does not know: a double free or a
/// pointer the runtime never allocated is a protocol violation by generated
/// code.
pub fn heap_free(ptr: *mut u8) {
    let layout = heap_registry()
        .write()
        .remove(&(ptr as usize))
        .unwrap_or_else(|| panic!("free of untracked pointer 0x{:x}", ptr as usize));
    unsafe { xfree(ptr, layout) };
}

/// Number of live blocks handed out through the malloc upcall.
pub fn heap_live_blocks() -> usize {
    heap_registry().read().len()
}

// ============================================================================
// Stack watch registry (memory-checker hook)
// ============================================================================

/// Watched stack ranges by id.
static WATCHED: OnceLock<RwLock<HashMap<u32, (usize, usize)>>> = OnceLock::new();

/// Next watch id. Zero is reserved for "not watched".
static NEXT_WATCH_ID: AtomicU32 = AtomicU32::new(1);

fn watch_registry() -> &'static RwLock<HashMap<u32, (usize, usize)>> {
    WATCHED.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a stack body range `[lo, hi)` and return its watch id.
pub fn watch_stack(lo: usize, hi: usize) -> u32 {
    debug_assert!(lo < hi);
    let id = NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed);
    watch_registry().write().insert(id, (lo, hi));
    id
}

/// Drop a stack range from the registry.
pub fn unwatch_stack(id: u32) {
    watch_registry().write().remove(&id);
}

/// Check whether an address falls inside any watched stack range.
pub fn is_watched(addr: usize) -> bool {
    watch_registry()
        .read()
        .values()
        .any(|&(lo, hi)| lo <= addr && addr < hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_alloc_free_roundtrip() {
        let p = heap_alloc(64);
        assert!(!p.is_null());
        assert_eq!(p as usize % UPCALL_ALLOC_ALIGN, 0);
        heap_free(p);
    }

    #[test]
    fn test_heap_alloc_zero_bytes() {
        // Zero-size requests still return a unique, freeable block.
        let p = heap_alloc(0);
        assert!(!p.is_null());
        heap_free(p);
    }

    #[test]
    #[should_panic(expected = "free of untracked pointer")]
    fn test_heap_free_untracked_panics() {
        heap_free(0x1000 as *mut u8);
    }

    #[test]
    fn test_watch_stack_ranges() {
        let id = watch_stack(0x4000, 0x8000);
        assert!(is_watched(0x4000));
        assert!(is_watched(0x7fff));
        assert!(!is_watched(0x8000));
        unwatch_stack(id);
        assert!(!is_watched(0x4000));
    }
}

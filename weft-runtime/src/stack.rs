//! Proc Stack Segments
//!
//! Heap-allocated contiguous stack regions. Segments carry sibling links so
//! a stack can later grow into a chain of size-doubling segments; the
//! current runtime never switches segments, so every proc lives in exactly
//! one. Destruction walks the `next` chain regardless, so growth only has
//! to link segments in.
//!
//! Each segment's body range is registered with the stack watch registry
//! (see `memory`) for the lifetime of the segment.

use std::alloc::Layout;
use std::mem;

use crate::log;
use crate::memory::{self, xalloc, xfree};

/// Default usable stack body size in bytes.
pub const DEFAULT_STACK_BYTES: usize = 65536;

/// Stack body alignment. Top-of-stack is additionally masked down to this
/// boundary before the activation frame is written.
pub const STACK_ALIGN: usize = 16;

/// A stack segment header. The stack body is the trailing allocation
/// directly after the header.
#[repr(C)]
pub struct StackSeg {
    /// Previous segment in the chain, or null.
    pub prev: *mut StackSeg,
    /// Next segment in the chain, or null.
    pub next: *mut StackSeg,
    /// Watch registry id for the body range.
    pub watch_id: u32,
    /// Usable body size in bytes.
    pub size: usize,
    /// Bytes of the body currently live.
    pub live: usize,
}

impl StackSeg {
    /// Pointer to the first byte of the stack body.
    pub unsafe fn body(this: *mut StackSeg) -> *mut u8 {
        (this as *mut u8).add(mem::size_of::<StackSeg>())
    }

    fn layout(body_bytes: usize) -> Layout {
        match Layout::from_size_align(mem::size_of::<StackSeg>() + body_bytes, STACK_ALIGN) {
            Ok(l) => l,
            Err(_) => panic!("unrepresentable stack layout for {} bytes", body_bytes),
        }
    }
}

/// Allocate a segment with a `body_bytes` usable body and register its
/// range with the watch registry. The body itself is left uninitialized;
/// proc creation writes the activation frame it needs.
pub unsafe fn new_stack(body_bytes: usize) -> *mut StackSeg {
    let stk = xalloc(StackSeg::layout(body_bytes)) as *mut StackSeg;
    log::logptr("new stk", stk as usize);
    let body = StackSeg::body(stk) as usize;
    std::ptr::addr_of_mut!((*stk).prev).write(std::ptr::null_mut());
    std::ptr::addr_of_mut!((*stk).next).write(std::ptr::null_mut());
    std::ptr::addr_of_mut!((*stk).size).write(body_bytes);
    std::ptr::addr_of_mut!((*stk).live).write(0);
    std::ptr::addr_of_mut!((*stk).watch_id).write(memory::watch_stack(body, body + body_bytes));
    stk
}

/// Free a segment and every segment chained after it, deregistering each
/// body range.
pub unsafe fn del_stack(stk: *mut StackSeg) {
    let mut stk = stk;
    while !stk.is_null() {
        let nxt = (*stk).next;
        log::logptr("freeing stk segment", stk as usize);
        memory::unwatch_stack((*stk).watch_id);
        let size = (*stk).size;
        xfree(stk as *mut u8, StackSeg::layout(size));
        stk = nxt;
    }
    log::debug("freed stacks");
}

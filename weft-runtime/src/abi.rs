//! Generated-Code ABI
//!
//! The contract between the runtime and compiled Weft programs. Generated
//! prologues and upcall stubs address proc and runtime records by fixed
//! word offsets; those offsets are pinned here and checked against the real
//! struct layouts at compile time.
//!
//! ## Proc record
//!
//! | Offset (words) | Field |
//! |---|---|
//! | 0 | runtime pointer |
//! | 1 | stack segment pointer |
//! | 2 | program pointer |
//! | 3 | saved PC (reserved register save) |
//! | 4 | saved SP |
//! | 5 | state |
//! | 6 | refcount |
//! | 7 | upcall code |
//! | 8..15 | upcall args |
//!
//! ## Runtime record
//!
//! | Offset (words) | Field |
//! |---|---|
//! | 0 | saved C PC |
//! | 1 | saved C SP |
//! | 2 | current proc pointer |
//! | 3.. | runnable pool, then blocked pool |
//!
//! ## State words
//!
//! Running is deliberately zero: generated code can signal any non-running
//! transition by OR-ing a state word into the slot instead of reading the
//! old value first.

use std::ffi::c_void;
use std::mem::offset_of;

use crate::memory::WORD;
use crate::proc::{Proc, MAX_UPCALL_ARGS};
use crate::runtime::Runtime;

/// Entry point of one phase of a program: takes an opaque environment
/// pointer and the executing proc.
pub type ProgFn = unsafe extern "C" fn(*mut c_void, *mut Proc);

/// Program descriptor handed to the runtime by the embedder: the init,
/// main, and fini entry PCs of a compiled program.
#[repr(C)]
pub struct Prog {
    /// Initialization code.
    pub init_code: ProgFn,
    /// Main activation code. Procs spawned from this program resume here.
    pub main_code: ProgFn,
    /// Finalization code.
    pub fini_code: ProgFn,
}

/// State word: executing.
pub const STATE_RUNNING: usize = 0;
/// State word: suspended at an upcall boundary.
pub const STATE_CALLING_C: usize = 1;
/// State word: terminating.
pub const STATE_EXITING: usize = 2;
/// State word: blocked in recv.
pub const STATE_BLOCKED_READING: usize = 3;
/// State word: blocked in send.
pub const STATE_BLOCKED_WRITING: usize = 4;

/// Proc field word offsets consumed by generated prologues.
pub mod proc_off {
    /// Runtime back-pointer.
    pub const RT: usize = 0;
    /// Stack segment pointer.
    pub const STK: usize = 1;
    /// Program descriptor pointer.
    pub const PROG: usize = 2;
    /// Saved PC register slot.
    pub const SAVED_PC: usize = 3;
    /// Saved SP.
    pub const SP: usize = 4;
    /// State word.
    pub const STATE: usize = 5;
    /// Reference count.
    pub const REFCNT: usize = 6;
    /// Upcall code word.
    pub const UPCALL_CODE: usize = 7;
    /// First upcall argument word.
    pub const UPCALL_ARGS: usize = 8;
}

/// Runtime field word offsets consumed by the switch glue.
pub mod rt_off {
    /// Saved C-side PC.
    pub const C_PC: usize = 0;
    /// Saved C-side SP.
    pub const C_SP: usize = 1;
    /// Currently executing proc.
    pub const CURR: usize = 2;
    /// Runnable pool vector.
    pub const RUNNING: usize = 3;
}

// Layout pins. A failure here means a struct drifted out from under the
// generated-code contract.
const _: () = {
    assert!(offset_of!(Proc, rt) == proc_off::RT * WORD);
    assert!(offset_of!(Proc, stk) == proc_off::STK * WORD);
    assert!(offset_of!(Proc, prog) == proc_off::PROG * WORD);
    assert!(offset_of!(Proc, saved_pc) == proc_off::SAVED_PC * WORD);
    assert!(offset_of!(Proc, sp) == proc_off::SP * WORD);
    assert!(offset_of!(Proc, state) == proc_off::STATE * WORD);
    assert!(offset_of!(Proc, refcnt) == proc_off::REFCNT * WORD);
    assert!(offset_of!(Proc, upcall_code) == proc_off::UPCALL_CODE * WORD);
    assert!(offset_of!(Proc, upcall_args) == proc_off::UPCALL_ARGS * WORD);
    assert!(
        offset_of!(Proc, idx) == (proc_off::UPCALL_ARGS + MAX_UPCALL_ARGS) * WORD,
        "pool index must sit directly after the upcall argument area",
    );
};

const _: () = {
    assert!(offset_of!(Runtime, c_regs) == rt_off::C_PC * WORD);
    assert!(offset_of!(Runtime, curr) == rt_off::CURR * WORD);
    assert!(offset_of!(Runtime, running) == rt_off::RUNNING * WORD);
};

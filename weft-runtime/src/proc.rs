//! Procs
//!
//! A proc is a lightweight cooperative task: a heap-allocated record, a
//! stack segment, and a parameter area for upcalls. The record's leading
//! fields are ABI (see `abi`); an inline slot region for the program's
//! internal slots trails the record.
//!
//! ## Initial frame
//!
//! A fresh proc must look, to the switch glue, like a proc that suspended
//! just before entering the program's main activation. Creation therefore
//! writes a synthetic frame at the top of the stack: the proc pointer, a
//! fake outptr, the activation PC twice, and one zero per callee-save
//! register. The activation PC appears twice intentionally: the glue
//! restores the callee-saves and returns to the first copy, and the frame
//! it lands in then sees a conventional shape (return PC and outptr above
//! its locals) in the second.

use std::alloc::Layout;
use std::mem;

use crate::abi::{self, Prog};
use crate::log;
use crate::memory::{xalloc_zeroed, xfree, WORD};
use crate::runtime::Runtime;
use crate::stack::{self, StackSeg};

/// Maximum number of upcall argument words a proc carries.
pub const MAX_UPCALL_ARGS: usize = 8;

/// Size of the inline slot region trailing each proc record.
pub const PROC_SLOT_BYTES: usize = 1024;

/// Callee-save registers preserved across a context switch on the
/// reference target.
pub const N_CALLEE_SAVES: usize = 4;

/// Proc execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ProcState {
    /// Executing on its own stack.
    Running = abi::STATE_RUNNING,
    /// Suspended at an upcall boundary.
    CallingC = abi::STATE_CALLING_C,
    /// Terminating; the loop frees it.
    Exiting = abi::STATE_EXITING,
    /// Blocked in recv, waiting for a writer.
    BlockedReading = abi::STATE_BLOCKED_READING,
    /// Blocked in send, waiting for a reader.
    BlockedWriting = abi::STATE_BLOCKED_WRITING,
}

impl ProcState {
    /// Decode a state word written by generated code.
    pub fn from_word(w: usize) -> Option<Self> {
        match w {
            abi::STATE_RUNNING => Some(ProcState::Running),
            abi::STATE_CALLING_C => Some(ProcState::CallingC),
            abi::STATE_EXITING => Some(ProcState::Exiting),
            abi::STATE_BLOCKED_READING => Some(ProcState::BlockedReading),
            abi::STATE_BLOCKED_WRITING => Some(ProcState::BlockedWriting),
            _ => None,
        }
    }

    /// Whether this state lives in the blocked pool.
    pub fn is_blocked(self) -> bool {
        matches!(self, ProcState::BlockedReading | ProcState::BlockedWriting)
    }
}

/// A proc record. Field order is ABI; see `abi::proc_off`.
#[repr(C)]
pub struct Proc {
    /// Owning runtime (non-owning back-reference).
    pub rt: *mut Runtime,
    /// Current stack segment (owned).
    pub stk: *mut StackSeg,
    /// Program descriptor (non-owning).
    pub prog: *const Prog,
    /// Reserved register save slot for the program counter.
    pub saved_pc: usize,
    /// Saved stack pointer; meaningful only while not executing.
    pub sp: usize,
    /// State word. Generated code writes this before yielding.
    pub state: usize,
    /// Reference count held by channels sending through this proc and
    /// ports it owns.
    pub refcnt: usize,
    /// Pending upcall code, zero when none.
    pub upcall_code: usize,
    /// Upcall parameter space.
    pub upcall_args: [usize; MAX_UPCALL_ARGS],
    /// Position in the pool that currently holds this proc.
    pub idx: usize,
    /// Bytes this proc may own. Carried, not enforced.
    pub mem_budget: usize,
    /// Bytes currently owned.
    pub curr_mem: usize,
    /// Tick budget over the proc lifetime, zero for unlimited.
    pub tick_budget: usize,
    /// Ticks consumed.
    pub curr_ticks: usize,
}

impl Proc {
    fn layout() -> Layout {
        // The inline slot region trails the record proper.
        match Layout::from_size_align(
            mem::size_of::<Proc>() + PROC_SLOT_BYTES,
            mem::align_of::<Proc>(),
        ) {
            Ok(l) => l,
            Err(_) => unreachable!(),
        }
    }

    /// Pointer to the inline slot region.
    pub unsafe fn slots(this: *mut Proc) -> *mut u8 {
        (this as *mut u8).add(mem::size_of::<Proc>())
    }

    /// Decoded state, or `None` for a corrupt state word.
    pub unsafe fn state_of(this: *mut Proc) -> Option<ProcState> {
        ProcState::from_word((*this).state)
    }
}

/// Create a proc for `prog`, owned by `rt`, in the Running state.
///
/// The proc is not placed in any pool; the caller enqueues it (the loop
/// does so for the root proc, the sched upcall for spawned ones).
///
/// # Safety
///
/// `rt` and `prog` must be valid for the lifetime of the proc.
pub unsafe fn new_proc(rt: *mut Runtime, prog: *const Prog) -> *mut Proc {
    let proc = xalloc_zeroed(Proc::layout()) as *mut Proc;
    log::logptr("new proc", proc as usize);
    log::logptr("from prog", prog as usize);
    log::logptr("init:", (*prog).init_code as usize);
    log::logptr("main:", (*prog).main_code as usize);
    log::logptr("fini:", (*prog).fini_code as usize);
    (*proc).prog = prog;
    (*proc).stk = stack::new_stack((*rt).stack_size);

    seed_activation_frame(proc, (*prog).main_code as usize);

    (*proc).rt = rt;
    (*proc).state = ProcState::Running as usize;
    proc
}

/// Write the synthetic activation frame described in the module docs and
/// record the proc's saved SP.
unsafe fn seed_activation_frame(proc: *mut Proc, activation_pc: usize) {
    let stk = (*proc).stk;
    let body = StackSeg::body(stk);

    // Top of stack: the last word-sized cell of the body, masked down to a
    // 16-byte boundary.
    let tos = (*stk).size - WORD;
    let top = (body.add(tos) as usize) & !(stack::STACK_ALIGN - 1);

    (*proc).sp = top - (3 + N_CALLEE_SAVES) * WORD;

    let mut w = top as *mut usize;
    w.write(proc as usize); // initial arg: the proc itself
    w = w.sub(1);
    w.write(0); // fake outptr, frame-shape parity
    w = w.sub(1);
    w.write(activation_pc); // conventional return-PC slot
    w = w.sub(1);
    w.write(activation_pc); // PC the glue returns to
    for _ in 0..N_CALLEE_SAVES {
        w = w.sub(1);
        w.write(0);
    }
}

/// Free a proc and its stack chain.
///
/// # Safety
///
/// The proc must already be out of every pool and unreferenced; asserts
/// that the reference count is zero.
pub unsafe fn del_proc(proc: *mut Proc) {
    log::logptr("del proc", proc as usize);
    assert_eq!((*proc).refcnt, 0, "proc freed while still referenced");
    stack::del_stack((*proc).stk);
    xfree(proc as *mut u8, Proc::layout());
}

//! Context-Switch Contract
//!
//! The machine-level switch between the host C context and a proc is
//! performed by glue emitted alongside generated code; the runtime only
//! consumes it through a function pointer. This module pins down the
//! contract and ships a script-driven mock that satisfies it without any
//! register or stack manipulation, for testing the scheduler, dispatcher,
//! and rendezvous engine and for embedders that have no generated code
//! yet.
//!
//! ## The two primitives
//!
//! - **c_to_proc**: save the host callee-saves and SP into the runtime's
//!   C register save area, load the proc's saved SP, restore callee-saves
//!   from the proc's stack top, and return, branching to the proc's
//!   activation PC.
//! - **proc_to_c**: the mirror image: save the proc's callee-saves and SP
//!   into its record, reload the host registers, and return into the
//!   runtime loop.
//!
//! Entering a proc is a single call taking the proc pointer. Control comes
//! back only when the proc has written a state other than Running and
//! issued proc_to_c; that is the only way a proc body yields.
//!
//! ## Two-PC frames
//!
//! Generated frames carry both a return PC and a yield PC, which lets a
//! callee yield across live non-tail frames. Three call variants exist:
//! the base call (the caller knows the static distance between its return
//! and yield points), the tail-yield call (pass the callee's return PC and
//! the caller's yield PC), and the full tail call (reuse both). The
//! variants are distinguished by tagging the low bit of the yield address,
//! so yield targets must be at least 2-byte aligned. The runtime never
//! inspects these PCs; it only preserves the saved SP.

use crate::proc::Proc;

/// The C-to-proc switch glue. Takes the proc to enter; returns when the
/// proc yields.
pub type CToProcGlue = unsafe extern "C" fn(*mut Proc);

pub mod mock {
    //! Script-driven stand-in for the switch glue.
    //!
    //! Programs are registered as step lists keyed by their descriptor
    //! address. Entering a proc executes its script from where it left
    //! off, up to and including the next yielding step. Cells give
    //! scripts stable addresses to receive upcall results through and to
    //! pass values between procs.

    use std::collections::HashMap;
    use std::ffi::c_void;
    use std::sync::OnceLock;

    use parking_lot::Mutex;

    use crate::abi::{Prog, ProgFn};
    use crate::proc::{Proc, ProcState, MAX_UPCALL_ARGS};
    use crate::upcall::UpcallCode;

    /// An upcall argument in a script step.
    #[derive(Debug, Clone, Copy)]
    pub enum Arg {
        /// A literal word.
        Word(usize),
        /// The address of a cell, for out-pointer arguments.
        CellAddr(usize),
        /// The value currently stored in a cell.
        CellValue(usize),
    }

    /// One step of a scripted proc body.
    #[derive(Debug, Clone)]
    pub enum Step {
        /// Issue an upcall and yield in CallingC.
        Upcall(UpcallCode, Vec<Arg>),
        /// Assert a cell's current value, without yielding.
        AssertCell(usize, usize),
        /// Yield while still Running.
        Yield,
        /// Write Exiting and yield; must be the final step.
        Exit,
    }

    struct Script {
        steps: Vec<Step>,
        pos: usize,
    }

    #[derive(Default)]
    struct MockState {
        programs: HashMap<usize, Vec<Step>>,
        scripts: HashMap<usize, Script>,
        cells: Vec<usize>,
    }

    static STATE: OnceLock<Mutex<MockState>> = OnceLock::new();

    fn state() -> &'static Mutex<MockState> {
        STATE.get_or_init(|| Mutex::new(MockState::default()))
    }

    unsafe extern "C" fn nop_code(_env: *mut c_void, _proc: *mut Proc) {}

    /// Build a program descriptor whose entry points do nothing. The mock
    /// glue never branches to them; creation only needs their addresses.
    pub fn leak_prog() -> *const Prog {
        Box::leak(Box::new(Prog {
            init_code: nop_code as ProgFn,
            main_code: nop_code as ProgFn,
            fini_code: nop_code as ProgFn,
        }))
    }

    /// Clear all registered programs, in-flight scripts, and cells.
    pub fn reset() {
        let mut s = state().lock();
        s.programs.clear();
        s.scripts.clear();
        for &addr in &s.cells {
            unsafe { drop(Box::from_raw(addr as *mut usize)) };
        }
        s.cells.clear();
    }

    /// Register the script every proc spawned from `prog` will run.
    pub fn program(prog: *const Prog, steps: Vec<Step>) {
        state().lock().programs.insert(prog as usize, steps);
    }

    /// Allocate a zeroed cell and return its id.
    pub fn new_cell() -> usize {
        let boxed: *mut usize = Box::into_raw(Box::new(0));
        let mut s = state().lock();
        s.cells.push(boxed as usize);
        s.cells.len() - 1
    }

    /// Read a cell's current value.
    pub fn cell(id: usize) -> usize {
        let addr = state().lock().cells[id];
        unsafe { *(addr as *const usize) }
    }

    fn resolve(cells: &[usize], arg: Arg) -> usize {
        match arg {
            Arg::Word(w) => w,
            Arg::CellAddr(id) => cells[id],
            Arg::CellValue(id) => unsafe { *(cells[id] as *const usize) },
        }
    }

    /// The mock switch glue: runs the entered proc's script up to its next
    /// yield.
    ///
    /// # Safety
    ///
    /// `proc` must be a live proc whose program was registered with
    /// [`program`].
    pub unsafe extern "C" fn glue(proc: *mut Proc) {
        let mut s = state().lock();
        let key = proc as usize;
        if !s.scripts.contains_key(&key) {
            let steps = s
                .programs
                .get(&((*proc).prog as usize))
                .unwrap_or_else(|| panic!("mock glue entered proc with unregistered program"))
                .clone();
            s.scripts.insert(key, Script { steps, pos: 0 });
        }

        loop {
            let step = {
                let script = s.scripts.get_mut(&key).expect("script vanished");
                assert!(
                    script.pos < script.steps.len(),
                    "mock proc entered with no steps remaining"
                );
                let step = script.steps[script.pos].clone();
                script.pos += 1;
                step
            };
            match step {
                Step::AssertCell(id, want) => {
                    let got = *(s.cells[id] as *const usize);
                    assert_eq!(got, want, "cell {} mismatch", id);
                }
                Step::Yield => {
                    return;
                }
                Step::Exit => {
                    (*proc).state = ProcState::Exiting as usize;
                    s.scripts.remove(&key);
                    return;
                }
                Step::Upcall(code, args) => {
                    assert!(args.len() <= MAX_UPCALL_ARGS);
                    (*proc).upcall_code = code as usize;
                    (*proc).upcall_args = [0; MAX_UPCALL_ARGS];
                    for (i, a) in args.iter().enumerate() {
                        (*proc).upcall_args[i] = resolve(&s.cells, *a);
                    }
                    (*proc).state = ProcState::CallingC as usize;
                    return;
                }
            }
        }
    }

}

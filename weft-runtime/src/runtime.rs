//! Runtime Core
//!
//! The runtime record, the two scheduling pools, the scheduler, and the
//! main loop that drives every proc.
//!
//! ## Design
//!
//! Single-threaded and cooperative: exactly one proc executes at a time,
//! and control returns to the loop only when that proc yields through the
//! switch glue. The loop reads the state the proc left behind and either
//! redispatches it, services an upcall, or frees it. A blocked state can
//! only be produced by the send/recv upcalls; observing one in the loop is
//! a protocol violation and panics.
//!
//! Procs live in exactly one of two pools: Running/CallingC/Exiting in the
//! runnable pool, BlockedReading/BlockedWriting in the blocked pool. Every
//! state transition that crosses that partition moves the proc between
//! pools and patches the swap-delete bookkeeping.
//!
//! The runtime record is passed explicitly through every function here;
//! there is no process-global runtime, so the embedder entry is re-entrant
//! as long as records are not shared.

use std::alloc::Layout;
use std::ffi::c_int;
use std::ptr::{self, addr_of_mut};

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::abi::Prog;
use crate::config::RuntimeConfig;
use crate::log;
use crate::memory::{xalloc_zeroed, xfree};
use crate::proc::{self, Proc, ProcState};
use crate::ptr_vec::PtrVec;
use crate::switch::CToProcGlue;
use crate::upcall;

/// Register save area for the host C context, live across `c_to_proc`.
#[repr(C)]
pub struct CRegSave {
    /// Saved program counter.
    pub pc: usize,
    /// Saved stack pointer.
    pub sp: usize,
}

/// The runtime record. Leading fields are ABI; see `abi::rt_off`.
#[repr(C)]
pub struct Runtime {
    /// Host register save area used by the switch glue.
    pub c_regs: CRegSave,
    /// Proc currently executing, null while control is in the runtime.
    pub curr: *mut Proc,
    /// Procs in {Running, CallingC, Exiting}.
    pub running: PtrVec<Proc>,
    /// Procs in {BlockedReading, BlockedWriting}.
    pub blocked: PtrVec<Proc>,
    /// Stack body size for procs spawned by this runtime.
    pub stack_size: usize,
    /// Scheduler PRNG.
    rng: SmallRng,
}

/// Allocate and initialize a runtime record.
pub unsafe fn new_runtime(config: &RuntimeConfig) -> *mut Runtime {
    let rt = xalloc_zeroed(Layout::new::<Runtime>()) as *mut Runtime;
    log::logptr("new rt", rt as usize);
    addr_of_mut!((*rt).running).write(PtrVec::new());
    addr_of_mut!((*rt).blocked).write(PtrVec::new());
    (*rt).stack_size = config.stack_size;
    let rng = match config.rng_seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };
    addr_of_mut!((*rt).rng).write(rng);
    rt
}

/// Free every proc left in both pools, then the record itself.
pub unsafe fn del_runtime(rt: *mut Runtime) {
    del_all_procs(addr_of_mut!((*rt).running));
    del_all_procs(addr_of_mut!((*rt).blocked));
    (*rt).running.fini();
    (*rt).blocked.fini();
    xfree(rt as *mut u8, Layout::new::<Runtime>());
}

unsafe fn del_all_procs(v: *mut PtrVec<Proc>) {
    while !(*v).is_empty() {
        let last = (*v).len() - 1;
        let p = (*v).get(last);
        (*v).swapdel(last);
        proc::del_proc(p);
    }
}

/// Draw a 32-bit word from the runtime PRNG.
pub unsafe fn rand_word(rt: *mut Runtime) -> u32 {
    (*rt).rng.next_u32()
}

/// The pool that holds procs in `state`.
pub unsafe fn pool_of(rt: *mut Runtime, state: ProcState) -> *mut PtrVec<Proc> {
    if state.is_blocked() {
        addr_of_mut!((*rt).blocked)
    } else {
        addr_of_mut!((*rt).running)
    }
}

/// The pool that currently holds `proc`, from its state word.
pub unsafe fn proc_pool(proc: *mut Proc) -> *mut PtrVec<Proc> {
    let state = Proc::state_of(proc).expect("corrupt proc state word");
    pool_of((*proc).rt, state)
}

/// Total procs alive in both pools.
pub unsafe fn n_live_procs(rt: *mut Runtime) -> usize {
    (*rt).running.len() + (*rt).blocked.len()
}

/// Append `proc` to the pool its state selects, recording its position.
/// This is what the sched upcall does for freshly spawned procs.
pub unsafe fn enqueue_proc(proc: *mut Proc) {
    let v = proc_pool(proc);
    (*proc).idx = (*v).len();
    (*v).push(proc);
}

/// Swap-delete `proc` out of `v`, patching the moved proc's position.
unsafe fn proc_vec_swapdel(v: *mut PtrVec<Proc>, proc: *mut Proc) {
    assert_eq!((*v).get((*proc).idx), proc);
    if let Some(moved) = (*v).swapdel((*proc).idx) {
        (*moved).idx = (*proc).idx;
    }
}

unsafe fn remove_proc_from_pool(proc: *mut Proc) {
    let v = proc_pool(proc);
    proc_vec_swapdel(v, proc);
    (*v).trim(n_live_procs((*proc).rt));
}

/// Move `proc` from state `src` to state `dst`, migrating it between pools.
///
/// # Safety
///
/// `proc` must be live, inside the pool its current state selects, and its
/// state word must equal `src`.
pub unsafe fn proc_state_transition(proc: *mut Proc, src: ProcState, dst: ProcState) {
    assert_eq!((*proc).state, src as usize);
    remove_proc_from_pool(proc);
    (*proc).state = dst as usize;
    enqueue_proc(proc);
}

/// Remove and free a proc observed in the Exiting state.
pub unsafe fn exit_proc(proc: *mut Proc) {
    let rt = (*proc).rt;
    assert!(n_live_procs(rt) > 0);
    let v = proc_pool(proc);
    proc_vec_swapdel(v, proc);
    let addr = proc as usize;
    proc::del_proc(proc);
    (*v).trim(n_live_procs(rt));
    log::info(format!("proc 0x{:x} exited (and deleted)", addr));
}

/// Pick the next proc to run, uniformly at random over the runnable pool.
/// Returns `None` when no proc is runnable (deadlock when any proc is
/// still blocked).
pub unsafe fn sched(rt: *mut Runtime) -> Option<*mut Proc> {
    debug_assert!(n_live_procs(rt) > 0);
    let n = (*rt).running.len();
    if n == 0 {
        return None;
    }
    let i = rand_word(rt) as usize % n;
    Some((*rt).running.get(i))
}

/// Verify the quantified pool invariants: every proc sits at its recorded
/// index, in the pool its state class selects, and pool capacities stay
/// powers of two at or above the floor. Runs at the top of every loop
/// iteration in debug builds.
pub unsafe fn audit_pools(rt: *mut Runtime) {
    for (pool, want_blocked) in [
        (addr_of_mut!((*rt).running), false),
        (addr_of_mut!((*rt).blocked), true),
    ] {
        let cap = (*pool).capacity();
        assert!(cap.is_power_of_two() && cap >= crate::ptr_vec::INIT_PTR_VEC_SZ);
        assert!(cap >= (*pool).len());
        for i in 0..(*pool).len() {
            let p = (*pool).get(i);
            assert_eq!((*p).idx, i);
            let state = Proc::state_of(p).expect("corrupt proc state word");
            assert_eq!(state.is_blocked(), want_blocked);
        }
    }
}

/// Run a program to completion and return its exit code.
///
/// Constructs a runtime, spawns the root proc from `prog`, and loops:
/// schedule, switch into the proc through `glue`, act on the state it
/// yielded with. Returns 0 on clean termination, 1 on deadlock.
///
/// # Safety
///
/// `prog` must point to a valid program descriptor, and `glue` must honor
/// the switch contract in `switch`.
pub unsafe fn start(prog: *const Prog, glue: CToProcGlue, config: &RuntimeConfig) -> i32 {
    log::set_level(config.log_level);
    log::info("control is in weft runtime");
    log::logptr("prog->init_code", (*prog).init_code as usize);
    log::logptr("prog->main_code", (*prog).main_code as usize);
    log::logptr("prog->fini_code", (*prog).fini_code as usize);

    let rt = new_runtime(config);
    enqueue_proc(proc::new_proc(rt, prog));
    let mut proc = sched(rt).expect("root proc is runnable");

    log::logptr("root proc is", proc as usize);
    log::logptr("proc->sp", (*proc).sp);
    log::logptr("c_to_proc_glue", glue as usize);

    let mut code = 0;
    loop {
        #[cfg(debug_assertions)]
        audit_pools(rt);

        (*proc).state = ProcState::Running as usize;
        (*rt).curr = proc;
        glue(proc);
        (*rt).curr = ptr::null_mut();

        match Proc::state_of(proc) {
            Some(ProcState::Running) => {}
            Some(ProcState::CallingC) => {
                upcall::handle_upcall(proc);
                if (*proc).state == ProcState::CallingC as usize {
                    (*proc).state = ProcState::Running as usize;
                } else if (*proc).state == ProcState::Exiting as usize {
                    // A failed check_expr exits the proc on return from the
                    // upcall; it must not be rescheduled.
                    log::logptr("proc exiting", proc as usize);
                    exit_proc(proc);
                }
            }
            Some(ProcState::Exiting) => {
                log::logptr("proc exiting", proc as usize);
                exit_proc(proc);
            }
            Some(ProcState::BlockedReading) | Some(ProcState::BlockedWriting) => {
                panic!(
                    "proc 0x{:x} yielded in a blocked state; only upcalls may block",
                    proc as usize
                );
            }
            None => {
                panic!(
                    "proc 0x{:x} yielded with invalid state word {}",
                    proc as usize,
                    (*proc).state
                );
            }
        }

        if n_live_procs(rt) == 0 {
            break;
        }
        match sched(rt) {
            Some(next) => proc = next,
            None => {
                log::info("no schedulable processes");
                code = 1;
                break;
            }
        }
    }

    log::debug("finished main loop");
    del_runtime(rt);
    log::debug("freed runtime");
    code
}

/// C entry point for embedders: run `prog` under a runtime configured from
/// the environment and return the exit code.
///
/// # Safety
///
/// Same contract as [`start`].
#[no_mangle]
pub unsafe extern "C" fn weft_start(prog: *const Prog, glue: CToProcGlue) -> c_int {
    let config = RuntimeConfig::from_env().unwrap_or_else(|e| {
        log::warn(format!("{}; using defaults", e));
        RuntimeConfig::default()
    });
    start(prog, glue, &config) as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::WORD;
    use crate::switch::mock;
    use std::mem::offset_of;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig::builder().rng_seed(42).build().unwrap()
    }

    #[test]
    fn test_c_reg_save_layout() {
        assert_eq!(offset_of!(CRegSave, pc), 0);
        assert_eq!(offset_of!(CRegSave, sp), WORD);
    }

    #[test]
    fn test_new_runtime_empty_pools() {
        unsafe {
            let rt = new_runtime(&test_config());
            assert_eq!(n_live_procs(rt), 0);
            assert!((*rt).curr.is_null());
            assert_eq!((*rt).running.capacity(), 8);
            assert_eq!((*rt).blocked.capacity(), 8);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_enqueue_records_idx() {
        unsafe {
            let rt = new_runtime(&test_config());
            let prog = mock::leak_prog();
            let a = proc::new_proc(rt, prog);
            let b = proc::new_proc(rt, prog);
            enqueue_proc(a);
            enqueue_proc(b);
            assert_eq!((*a).idx, 0);
            assert_eq!((*b).idx, 1);
            assert_eq!(n_live_procs(rt), 2);
            audit_pools(rt);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_transition_moves_between_pools() {
        unsafe {
            let rt = new_runtime(&test_config());
            let prog = mock::leak_prog();
            let a = proc::new_proc(rt, prog);
            let b = proc::new_proc(rt, prog);
            enqueue_proc(a);
            enqueue_proc(b);

            (*a).state = ProcState::CallingC as usize;
            proc_state_transition(a, ProcState::CallingC, ProcState::BlockedReading);

            assert_eq!((*rt).running.len(), 1);
            assert_eq!((*rt).blocked.len(), 1);
            // b was swapped into a's old slot and its idx followed.
            assert_eq!((*b).idx, 0);
            assert_eq!((*a).idx, 0);
            audit_pools(rt);

            proc_state_transition(a, ProcState::BlockedReading, ProcState::Running);
            assert_eq!((*rt).running.len(), 2);
            assert!((*rt).blocked.is_empty());
            audit_pools(rt);

            del_runtime(rt);
        }
    }

    #[test]
    #[should_panic]
    fn test_transition_asserts_source_state() {
        unsafe {
            let rt = new_runtime(&test_config());
            let a = proc::new_proc(rt, mock::leak_prog());
            enqueue_proc(a);
            // a is Running, not CallingC.
            proc_state_transition(a, ProcState::CallingC, ProcState::BlockedReading);
        }
    }

    #[test]
    fn test_sched_draws_from_runnable_pool() {
        unsafe {
            let rt = new_runtime(&test_config());
            let prog = mock::leak_prog();
            for _ in 0..4 {
                enqueue_proc(proc::new_proc(rt, prog));
            }
            for _ in 0..32 {
                let p = sched(rt).unwrap();
                let i = (*p).idx;
                assert_eq!((*rt).running.get(i), p);
            }
            del_runtime(rt);
        }
    }

    #[test]
    fn test_sched_reports_deadlock() {
        unsafe {
            let rt = new_runtime(&test_config());
            let a = proc::new_proc(rt, mock::leak_prog());
            enqueue_proc(a);
            (*a).state = ProcState::CallingC as usize;
            proc_state_transition(a, ProcState::CallingC, ProcState::BlockedReading);
            assert!(sched(rt).is_none());
            del_runtime(rt);
        }
    }

    #[test]
    fn test_exit_proc_frees_and_compacts() {
        unsafe {
            let rt = new_runtime(&test_config());
            let prog = mock::leak_prog();
            let a = proc::new_proc(rt, prog);
            let b = proc::new_proc(rt, prog);
            enqueue_proc(a);
            enqueue_proc(b);
            (*a).state = ProcState::Exiting as usize;
            exit_proc(a);
            assert_eq!(n_live_procs(rt), 1);
            assert_eq!((*b).idx, 0);
            audit_pools(rt);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_pool_capacity_grows_and_trims() {
        unsafe {
            let rt = new_runtime(&test_config());
            let prog = mock::leak_prog();
            let mut procs = Vec::new();
            for _ in 0..32 {
                let p = proc::new_proc(rt, prog);
                enqueue_proc(p);
                procs.push(p);
            }
            assert_eq!((*rt).running.capacity(), 32);
            audit_pools(rt);
            for p in procs {
                (*p).state = ProcState::Exiting as usize;
                exit_proc(p);
            }
            assert_eq!((*rt).running.capacity(), 8);
            del_runtime(rt);
        }
    }
}
